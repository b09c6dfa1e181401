//! Issuer and ClusterIssuer Custom Resource Definitions
//!
//! Both kinds share one spec and status schema; they differ only in scope.
//! An Issuer serves SigningRequests in its own namespace, a ClusterIssuer
//! serves the whole cluster and resolves its credential secret from the
//! configured cluster-resource namespace.

use kube::{CustomResource, Resource, ResourceExt};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::condition::{Condition, ConditionSet, ConditionStatus, CONDITION_TYPE_READY};

pub const API_GROUP: &str = "cfssl-issuer.wikimedia.org";
pub const API_VERSION: &str = "v1alpha1";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cfssl-issuer.wikimedia.org",
    version = "v1alpha1",
    kind = "Issuer",
    namespaced,
    status = "IssuerStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    /// One or more base URLs for the CFSSL API, comma separated. If the first
    /// server cannot be reached the next is used, until the list is
    /// exhausted.
    pub url: String,

    /// Name of a Secret holding the CFSSL auth key under the field "key" (a
    /// hex string) and optionally "additional_data". For an Issuer the Secret
    /// is read from the Issuer's namespace; for a ClusterIssuer it is read
    /// from the controller's cluster-resource namespace.
    pub auth_secret_name: String,

    /// Which CFSSL signer to appoint. Mandatory: the info endpoint used for
    /// health checks requires it.
    pub label: String,

    /// Signing profile of the appointed signer. Defaults to "default".
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Request an "optimal" certificate bundle instead of the bare
    /// certificate.
    #[serde(default)]
    pub bundle: bool,
}

fn default_profile() -> String {
    "default".to_string()
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssuerStatus {
    /// Status conditions; the only known type is `Ready`.
    #[serde(default, skip_serializing_if = "ConditionSet::is_empty")]
    #[schemars(with = "Vec<Condition>")]
    pub conditions: ConditionSet,
}

impl IssuerStatus {
    pub fn is_ready(&self) -> bool {
        self.conditions.is_true(CONDITION_TYPE_READY)
    }

    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions.get(CONDITION_TYPE_READY)
    }

    /// Set the Ready condition, returning whether it observably changed
    pub fn set_ready(&mut self, status: ConditionStatus, reason: &str, message: &str) -> bool {
        self.conditions.set(CONDITION_TYPE_READY, status, reason, message)
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cfssl-issuer.wikimedia.org",
    version = "v1alpha1",
    kind = "ClusterIssuer",
    status = "IssuerStatus",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(transparent)]
pub struct ClusterIssuerSpec(pub IssuerSpec);

impl std::ops::Deref for ClusterIssuerSpec {
    type Target = IssuerSpec;

    fn deref(&self) -> &IssuerSpec {
        &self.0
    }
}

/// Scope-polymorphic view of an Issuer or ClusterIssuer.
///
/// The issuer controller reconciles both kinds through this trait; the only
/// scope-dependent behavior is where the credential secret lives.
pub trait ScopedIssuer:
    Resource<DynamicType = ()>
    + ResourceExt
    + Clone
    + std::fmt::Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    const KIND: &'static str;

    fn spec(&self) -> &IssuerSpec;
    fn status(&self) -> Option<&IssuerStatus>;

    /// The namespace to resolve the auth secret from, or `None` for
    /// cluster-scoped issuers (the caller substitutes the cluster-resource
    /// namespace).
    fn scope_namespace(&self) -> Option<String>;

    /// An Api handle scoped to this object
    fn scoped_api(&self, client: kube::Client) -> kube::Api<Self>;
}

impl ScopedIssuer for Issuer {
    const KIND: &'static str = "Issuer";

    fn spec(&self) -> &IssuerSpec {
        &self.spec
    }

    fn status(&self) -> Option<&IssuerStatus> {
        self.status.as_ref()
    }

    fn scope_namespace(&self) -> Option<String> {
        self.namespace()
    }

    fn scoped_api(&self, client: kube::Client) -> kube::Api<Self> {
        match self.namespace() {
            Some(ns) => kube::Api::namespaced(client, &ns),
            None => kube::Api::default_namespaced(client),
        }
    }
}

impl ScopedIssuer for ClusterIssuer {
    const KIND: &'static str = "ClusterIssuer";

    fn spec(&self) -> &IssuerSpec {
        &self.spec
    }

    fn status(&self) -> Option<&IssuerStatus> {
        self.status.as_ref()
    }

    fn scope_namespace(&self) -> Option<String> {
        None
    }

    fn scoped_api(&self, client: kube::Client) -> kube::Api<Self> {
        kube::Api::all(client)
    }
}

/// A fetched Issuer or ClusterIssuer, as resolved from a SigningRequest's
/// issuerRef.
#[derive(Clone, Debug)]
pub enum AnyIssuer {
    Issuer(Issuer),
    ClusterIssuer(ClusterIssuer),
}

impl AnyIssuer {
    pub fn spec(&self) -> &IssuerSpec {
        match self {
            AnyIssuer::Issuer(i) => &i.spec,
            AnyIssuer::ClusterIssuer(ci) => &ci.spec,
        }
    }

    pub fn status(&self) -> Option<&IssuerStatus> {
        match self {
            AnyIssuer::Issuer(i) => i.status.as_ref(),
            AnyIssuer::ClusterIssuer(ci) => ci.status.as_ref(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status().map(IssuerStatus::is_ready).unwrap_or(false)
    }

    /// Where to resolve this issuer's auth secret from
    pub fn secret_namespace(&self, cluster_resource_namespace: &str) -> String {
        match self {
            AnyIssuer::Issuer(i) => i
                .namespace()
                .unwrap_or_else(|| cluster_resource_namespace.to_string()),
            AnyIssuer::ClusterIssuer(_) => cluster_resource_namespace.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn spec() -> IssuerSpec {
        IssuerSpec {
            url: "https://cfssl.example.com".to_string(),
            auth_secret_name: "issuer1-credentials".to_string(),
            label: "issuer1-label".to_string(),
            profile: "default".to_string(),
            bundle: false,
        }
    }

    #[test]
    fn test_profile_defaults() {
        let parsed: IssuerSpec = serde_json::from_value(serde_json::json!({
            "url": "https://cfssl.example.com",
            "authSecretName": "creds",
            "label": "l1",
        }))
        .unwrap();
        assert_eq!(parsed.profile, "default");
        assert!(!parsed.bundle);
    }

    #[test]
    fn test_scope_namespace() {
        let issuer = Issuer {
            metadata: ObjectMeta {
                name: Some("issuer1".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: spec(),
            status: None,
        };
        assert_eq!(issuer.scope_namespace().as_deref(), Some("ns1"));

        let cluster_issuer = ClusterIssuer {
            metadata: ObjectMeta {
                name: Some("clusterissuer1".to_string()),
                ..Default::default()
            },
            spec: ClusterIssuerSpec(spec()),
            status: None,
        };
        assert_eq!(cluster_issuer.scope_namespace(), None);
    }

    #[test]
    fn test_any_issuer_secret_namespace() {
        let issuer = AnyIssuer::Issuer(Issuer {
            metadata: ObjectMeta {
                name: Some("issuer1".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: spec(),
            status: None,
        });
        assert_eq!(issuer.secret_namespace("kube-system"), "ns1");

        let cluster_issuer = AnyIssuer::ClusterIssuer(ClusterIssuer {
            metadata: ObjectMeta {
                name: Some("clusterissuer1".to_string()),
                ..Default::default()
            },
            spec: ClusterIssuerSpec(spec()),
            status: None,
        });
        assert_eq!(cluster_issuer.secret_namespace("kube-system"), "kube-system");
    }

    #[test]
    fn test_issuer_readiness_gate() {
        let mut status = IssuerStatus::default();
        assert!(!status.is_ready());

        status.set_ready(ConditionStatus::False, "GetAuthSecretError", "not found");
        assert!(!status.is_ready());

        status.set_ready(ConditionStatus::True, "Checked", "");
        assert!(status.is_ready());
    }
}
