//! Reconcilers for the operator's three watched kinds
//!
//! Issuer and ClusterIssuer share one controller parameterized over scope;
//! SigningRequest has its own. Status updates go through merge patches on
//! the status subresource, and every condition change is mirrored as a
//! Kubernetes Event.

pub mod events;
pub mod issuer;
pub mod request;

use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, Client};

use crate::error::{Error, Result};
use crate::signer::SecretData;

pub use issuer::IssuerState;
pub use request::RequestState;

/// Field manager used for status patches
pub const FIELD_MANAGER: &str = "cfssl-issuer";

/// Fetch and decode a credential secret
pub(crate) async fn get_secret_data(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<SecretData> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = api.get(name).await.map_err(|e| {
        Error::GetAuthSecret(format!("failed to get secret {namespace}/{name}: {e}"))
    })?;
    Ok(secret
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.0))
        .collect())
}
