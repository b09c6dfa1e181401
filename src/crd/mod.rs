//! Custom Resource Definitions for the cfssl-issuer operator

pub mod condition;
mod issuer;
mod request;

pub use condition::{
    Condition, ConditionSet, ConditionStatus, CONDITION_TYPE_APPROVED, CONDITION_TYPE_DENIED,
    CONDITION_TYPE_READY,
};
pub use issuer::{
    AnyIssuer, ClusterIssuer, ClusterIssuerSpec, Issuer, IssuerSpec, IssuerStatus, ScopedIssuer,
    API_GROUP, API_VERSION,
};
pub use request::{
    IssuerRef, SigningRequest, SigningRequestSpec, SigningRequestStatus, REASON_DENIED,
    REASON_FAILED, REASON_ISSUED, REASON_PENDING,
};
