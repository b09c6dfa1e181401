//! SigningRequest Custom Resource Definition
//!
//! A SigningRequest asks for a PEM PKCS#10 CSR to be signed by a referenced
//! Issuer or ClusterIssuer. Progress is tracked through conditions: an
//! external approver sets `Approved` or `Denied`, this operator sets `Ready`.
//! A request whose `Ready` condition is `True` is terminal and immutable; a
//! denied or failed request records `failureTime` exactly once.

use chrono::Utc;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::condition::{
    Condition, ConditionSet, ConditionStatus, CONDITION_TYPE_APPROVED, CONDITION_TYPE_DENIED,
    CONDITION_TYPE_READY,
};

/// Ready condition reasons, mirroring the CertificateRequest conventions
pub const REASON_PENDING: &str = "Pending";
pub const REASON_FAILED: &str = "Failed";
pub const REASON_ISSUED: &str = "Issued";
pub const REASON_DENIED: &str = "Denied";

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    /// API group of the issuer; requests for foreign groups are ignored
    #[serde(default)]
    pub group: String,
    /// "Issuer" or "ClusterIssuer"
    #[serde(default)]
    pub kind: String,
    pub name: String,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cfssl-issuer.wikimedia.org",
    version = "v1alpha1",
    kind = "SigningRequest",
    namespaced,
    status = "SigningRequestStatus",
    shortname = "sreq",
    printcolumn = r#"{"name":"Approved","type":"string","jsonPath":".status.conditions[?(@.type=='Approved')].status"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequestSpec {
    /// PEM-encoded PKCS#10 certificate signing request
    pub request: String,

    /// Reference to the Issuer or ClusterIssuer that should sign this request
    pub issuer_ref: IssuerRef,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SigningRequestStatus {
    #[serde(default, skip_serializing_if = "ConditionSet::is_empty")]
    #[schemars(with = "Vec<Condition>")]
    pub conditions: ConditionSet,

    /// PEM-encoded signed certificate; set only when Ready reason is Issued
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,

    /// PEM-encoded CA certificate, when the backend returned one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<String>,

    /// Set once when the request reaches a terminal failure; never cleared
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_time: Option<String>,
}

impl SigningRequestStatus {
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.conditions.get(CONDITION_TYPE_READY)
    }

    pub fn is_complete(&self) -> bool {
        self.conditions.is_true(CONDITION_TYPE_READY)
    }

    pub fn is_approved(&self) -> bool {
        self.conditions.is_true(CONDITION_TYPE_APPROVED)
    }

    pub fn is_denied(&self) -> bool {
        self.conditions.is_true(CONDITION_TYPE_DENIED)
    }

    /// Set the Ready condition, returning whether it observably changed
    pub fn set_ready(&mut self, status: ConditionStatus, reason: &str, message: &str) -> bool {
        self.conditions.set(CONDITION_TYPE_READY, status, reason, message)
    }

    /// Record the terminal-failure timestamp, once
    pub fn mark_failed(&mut self) {
        if self.failure_time.is_none() {
            self.failure_time = Some(Utc::now().to_rfc3339());
        }
    }
}

impl SigningRequest {
    /// Whether this request's issuerRef points at this operator's API group
    pub fn references_our_group(&self) -> bool {
        self.spec.issuer_ref.group == super::issuer::API_GROUP
    }
}
