//! Signing backend abstraction
//!
//! The controllers talk to the CFSSL API only through the [`Signer`] and
//! [`HealthChecker`] traits, built from an issuer spec plus credential secret
//! data by the corresponding builder strategies. Tests inject fakes through
//! the same seams.

mod auth;
mod cfssl;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::crd::IssuerSpec;
use crate::error::Result;

pub use auth::AuthProvider;
pub use cfssl::{CfsslBuilder, CfsslClient};

/// Decoded credential secret contents
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Secret field holding the hex auth key
pub const SECRET_KEY_FIELD: &str = "key";
/// Optional secret field mixed into the auth token
pub const SECRET_ADDITIONAL_DATA_FIELD: &str = "additional_data";

/// A signed certificate returned by the backend, with the root CA when the
/// backend provided one (bundle responses may omit it).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedCertificate {
    pub ca: Option<Vec<u8>>,
    pub certificate: Vec<u8>,
}

#[async_trait]
pub trait Signer: Send + Sync {
    /// Validate and forward a PEM PKCS#10 CSR to the signing authority
    async fn sign(&self, csr: &[u8]) -> Result<SignedCertificate>;
}

#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Probe the signing authority for liveness of the configured
    /// label/profile pair. Does not validate credentials.
    async fn check(&self) -> Result<()>;
}

pub trait SignerBuilder: Send + Sync {
    fn build_signer(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<Box<dyn Signer>>;
}

pub trait HealthCheckerBuilder: Send + Sync {
    fn build_checker(
        &self,
        spec: &IssuerSpec,
        secret: &SecretData,
    ) -> Result<Box<dyn HealthChecker>>;
}

impl<F> SignerBuilder for F
where
    F: Fn(&IssuerSpec, &SecretData) -> Result<Box<dyn Signer>> + Send + Sync,
{
    fn build_signer(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<Box<dyn Signer>> {
        self(spec, secret)
    }
}

impl<F> HealthCheckerBuilder for F
where
    F: Fn(&IssuerSpec, &SecretData) -> Result<Box<dyn HealthChecker>> + Send + Sync,
{
    fn build_checker(
        &self,
        spec: &IssuerSpec,
        secret: &SecretData,
    ) -> Result<Box<dyn HealthChecker>> {
        self(spec, secret)
    }
}
