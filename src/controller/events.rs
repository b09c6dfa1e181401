//! Kubernetes Event emission for the reconcilers
//!
//! One Event is recorded per reconcile that changed a condition, mirroring
//! the condition's outcome: `Warning` when the reconcile errored or left the
//! condition `False`, `Normal` otherwise.

use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};

use crate::error::Result;

pub const EVENT_TYPE_NORMAL: &str = "Normal";
pub const EVENT_TYPE_WARNING: &str = "Warning";

pub const EVENT_REASON_ISSUER: &str = "IssuerReconciler";
pub const EVENT_REASON_SIGNING_REQUEST: &str = "SigningRequestReconciler";

/// Message used when a reconcile failed but will be retried
pub fn retry_message(err: &crate::error::Error) -> String {
    format!("temporary error, retrying: {err}")
}

/// Record an Event against `obj`. Cluster-scoped objects get their events
/// in the `default` namespace.
pub async fn emit_event<K>(
    client: &Client,
    obj: &K,
    event_type: &str,
    reason: &str,
    message: &str,
) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let events: Api<Event> = Api::namespaced(client.clone(), &namespace);

    let time = chrono::Utc::now();
    let event = Event {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-event-", obj.name_any())),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: obj.object_ref(&()),
        first_timestamp: Some(Time(time)),
        last_timestamp: Some(Time(time)),
        count: Some(1),
        ..Default::default()
    };

    events.create(&PostParams::default(), &event).await?;
    Ok(())
}
