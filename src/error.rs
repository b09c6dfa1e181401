//! Error types for the cfssl-issuer controllers

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// HTTP request to the CFSSL API failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Startup or wiring misconfiguration
    #[error("configuration error: {0}")]
    Config(String),

    /// The referenced auth secret could not be fetched
    #[error("failed to get auth secret: {0}")]
    GetAuthSecret(String),

    /// The auth secret exists but has no "key" field
    #[error("auth secret is missing the \"key\" field")]
    AuthSecretKeyMissing,

    /// The health checker could not be constructed from the issuer spec
    #[error("failed to build health checker: {0}")]
    HealthCheckerBuilder(String),

    /// The CFSSL info endpoint reported the issuer unhealthy
    #[error("health check failed: {0}")]
    HealthCheckerCheck(String),

    /// The referenced Issuer or ClusterIssuer could not be fetched
    #[error("failed to get issuer: {0}")]
    GetIssuer(String),

    /// The referenced issuer exists but is not Ready
    #[error("issuer is not ready: {0}")]
    IssuerNotReady(String),

    /// The signer could not be constructed from the issuer spec
    #[error("failed to build signer: {0}")]
    SignerBuilder(String),

    /// The remote signing call failed
    #[error("failed to sign certificate request: {0}")]
    SignerSign(String),

    /// Transport failure or error response from the CFSSL API
    #[error("CFSSL API error: {0}")]
    Backend(String),

    /// The CFSSL API answered successfully but the response shape is wrong
    #[error("malformed CFSSL API response: {0}")]
    BackendProtocol(String),

    /// The CSR is not a parseable PEM PKCS#10 request
    #[error("invalid certificate request: {0}")]
    InvalidCsr(String),

    /// The auth key in the credential secret is malformed
    #[error("failed to create auth provider: {0}")]
    AuthProvider(String),

    /// The issuerRef names a kind this operator does not own
    #[error("unknown issuer kind: {0}")]
    UnknownIssuerKind(String),
}

impl Error {
    /// Whether the reconcile loop should retry with backoff.
    ///
    /// Validation failures are permanent: retrying cannot succeed until a
    /// human edits the resource, and the edit itself retriggers
    /// reconciliation. Credential problems are still retried; the secret can
    /// be fixed without touching the watched resource.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Error::InvalidCsr(_) | Error::UnknownIssuerKind(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
