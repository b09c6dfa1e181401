//! cfssl-issuer: a Kubernetes operator that signs certificates through a
//! remote CFSSL API.
//!
//! Issuers and ClusterIssuers describe a CFSSL endpoint plus credentials;
//! SigningRequests carry PEM PKCS#10 CSRs and are fulfilled once approved,
//! with the signed certificate written back to their status.

pub mod controller;
pub mod crd;
pub mod error;
pub mod signer;

pub use crate::error::{Error, Result};
