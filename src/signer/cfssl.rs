//! HTTP client for the CFSSL signing API
//!
//! Speaks the multiroot endpoints: `POST /api/v1/cfssl/info` for
//! unauthenticated health probes and `POST /api/v1/cfssl/authsign` for
//! HMAC-authenticated signing. Issuers may list several API URLs separated
//! by commas; requests fail over in order.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::FromDer;

use super::auth::AuthProvider;
use super::{
    HealthChecker, HealthCheckerBuilder, SecretData, SignedCertificate, Signer, SignerBuilder,
    SECRET_ADDITIONAL_DATA_FIELD, SECRET_KEY_FIELD,
};
use crate::crd::IssuerSpec;
use crate::error::{Error, Result};

const API_PATH: &str = "api/v1/cfssl";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("cfssl-issuer/", env!("CARGO_PKG_VERSION"));

/// Builds [`CfsslClient`] instances for both controller seams.
#[derive(Clone, Copy, Debug, Default)]
pub struct CfsslBuilder;

impl SignerBuilder for CfsslBuilder {
    fn build_signer(&self, spec: &IssuerSpec, secret: &SecretData) -> Result<Box<dyn Signer>> {
        Ok(Box::new(CfsslClient::new(spec, secret)?))
    }
}

impl HealthCheckerBuilder for CfsslBuilder {
    fn build_checker(
        &self,
        spec: &IssuerSpec,
        secret: &SecretData,
    ) -> Result<Box<dyn HealthChecker>> {
        Ok(Box::new(CfsslClient::new(spec, secret)?))
    }
}

pub struct CfsslClient {
    http: reqwest::Client,
    urls: Vec<String>,
    label: String,
    profile: String,
    bundle: bool,
    auth: AuthProvider,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Serialize)]
struct SignPayload<'a> {
    certificate_request: &'a str,
    label: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    profile: &'a str,
    #[serde(skip_serializing_if = "is_false")]
    bundle: bool,
}

#[derive(Serialize)]
struct InfoPayload<'a> {
    label: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    profile: &'a str,
}

#[derive(Serialize)]
struct AuthenticatedRequest {
    token: String,
    request: String,
    timestamp: i64,
}

#[derive(Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl ApiEnvelope {
    fn into_result(self) -> Result<serde_json::Value> {
        if !self.success {
            let detail = self
                .errors
                .first()
                .map(|e| format!("{} (code {})", e.message, e.code))
                .unwrap_or_else(|| "request not successful".into());
            return Err(Error::Backend(format!("CFSSL API error: {detail}")));
        }
        self.result
            .ok_or_else(|| Error::Backend("CFSSL API response has no result".into()))
    }
}

impl CfsslClient {
    pub fn new(spec: &IssuerSpec, secret: &SecretData) -> Result<Self> {
        if spec.label.trim().is_empty() {
            return Err(Error::Config("issuer has an empty CFSSL label".into()));
        }
        let urls: Vec<String> = spec
            .url
            .split(',')
            .map(|u| u.trim().trim_end_matches('/').to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(Error::Config("issuer has no CFSSL API URL".into()));
        }

        let key = secret
            .get(SECRET_KEY_FIELD)
            .ok_or(Error::AuthSecretKeyMissing)?;
        let key = std::str::from_utf8(key)
            .map_err(|_| Error::AuthProvider("auth key is not valid UTF-8".into()))?;
        let additional_data = secret
            .get(SECRET_ADDITIONAL_DATA_FIELD)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let auth = AuthProvider::new(key, additional_data)?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            urls,
            label: spec.label.trim().to_string(),
            profile: spec.profile.clone(),
            bundle: spec.bundle,
            auth,
        })
    }

    /// POST `body` to `target`, trying each configured URL in order until
    /// one answers with a successful envelope.
    async fn post(&self, target: &str, body: &serde_json::Value) -> Result<serde_json::Value> {
        let mut last_err = Error::Backend("no CFSSL API URL answered".into());
        for base in &self.urls {
            let url = format!("{base}/{API_PATH}/{target}");
            let response = match self.http.post(&url).json(body).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(%url, error = %e, "CFSSL request failed, trying next URL");
                    last_err = Error::Backend(format!("POST {url}: {e}"));
                    continue;
                }
            };
            let status = response.status();
            if !status.is_success() {
                warn!(%url, %status, "CFSSL returned an error status, trying next URL");
                last_err = Error::Backend(format!("POST {url}: HTTP {status}"));
                continue;
            }
            let envelope: ApiEnvelope = match response.json().await {
                Ok(envelope) => envelope,
                Err(e) => {
                    last_err = Error::Backend(format!("POST {url}: invalid response body: {e}"));
                    continue;
                }
            };
            match envelope.into_result() {
                Ok(result) => {
                    debug!(%url, target, "CFSSL request succeeded");
                    return Ok(result);
                }
                Err(e) => {
                    warn!(%url, error = %e, "CFSSL rejected the request, trying next URL");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn extract_plain(result: &serde_json::Value) -> Result<SignedCertificate> {
        let certificate = result
            .get("certificate")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if certificate.is_empty() {
            return Err(Error::BackendProtocol(
                "sign response contains no certificate".into(),
            ));
        }
        Ok(SignedCertificate {
            ca: None,
            certificate: certificate.as_bytes().to_vec(),
        })
    }

    fn extract_bundle(result: &serde_json::Value) -> Result<SignedCertificate> {
        let bundle = result.get("bundle").ok_or_else(|| {
            Error::BackendProtocol("sign response contains no bundle".into())
        })?;
        let certificate = bundle
            .get("bundle")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        if certificate.is_empty() {
            return Err(Error::BackendProtocol(
                "bundle response contains no certificate".into(),
            ));
        }
        // The root CA is not guaranteed to be present in a bundle response.
        let ca = bundle
            .get("root")
            .and_then(serde_json::Value::as_str)
            .filter(|root| !root.is_empty())
            .map(|root| root.as_bytes().to_vec());
        Ok(SignedCertificate {
            ca,
            certificate: certificate.as_bytes().to_vec(),
        })
    }
}

/// Rejects anything that is not a single PEM-encoded PKCS#10 request.
fn validate_csr(pem: &[u8]) -> Result<()> {
    let (_, parsed) =
        parse_x509_pem(pem).map_err(|e| Error::InvalidCsr(format!("invalid PEM: {e}")))?;
    if parsed.label != "CERTIFICATE REQUEST" {
        return Err(Error::InvalidCsr(format!(
            "expected a CERTIFICATE REQUEST block, found {}",
            parsed.label
        )));
    }
    X509CertificationRequest::from_der(&parsed.contents)
        .map_err(|e| Error::InvalidCsr(format!("invalid PKCS#10 request: {e}")))?;
    Ok(())
}

#[async_trait]
impl HealthChecker for CfsslClient {
    async fn check(&self) -> Result<()> {
        let body = serde_json::to_value(InfoPayload {
            label: &self.label,
            profile: &self.profile,
        })?;
        self.post("info", &body).await.map(|_| ())
    }
}

#[async_trait]
impl Signer for CfsslClient {
    async fn sign(&self, csr: &[u8]) -> Result<SignedCertificate> {
        validate_csr(csr)?;
        let certificate_request = std::str::from_utf8(csr)
            .map_err(|_| Error::InvalidCsr("request is not valid UTF-8".into()))?;
        let payload = serde_json::to_vec(&SignPayload {
            certificate_request,
            label: &self.label,
            profile: &self.profile,
            bundle: self.bundle,
        })?;
        let body = serde_json::to_value(AuthenticatedRequest {
            token: self.auth.token(&payload),
            request: BASE64.encode(&payload),
            timestamp: chrono::Utc::now().timestamp(),
        })?;
        let result = self.post("authsign", &body).await?;
        if self.bundle {
            Self::extract_bundle(&result)
        } else {
            Self::extract_plain(&result)
        }
    }
}
