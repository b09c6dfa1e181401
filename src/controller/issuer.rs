//! Issuer and ClusterIssuer reconciliation
//!
//! An issuer is Ready when its auth secret resolves and the CFSSL API
//! answers a health probe for the configured label/profile. Both kinds run
//! through the same reconcile, parameterized over [`ScopedIssuer`]; healthy
//! issuers are re-probed on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        watcher,
    },
    ResourceExt,
};
use serde_json::json;
use tracing::{debug, info, warn};

use super::events::{
    emit_event, retry_message, EVENT_REASON_ISSUER, EVENT_TYPE_NORMAL, EVENT_TYPE_WARNING,
};
use super::{get_secret_data, FIELD_MANAGER};
use crate::crd::{ConditionStatus, IssuerStatus, ScopedIssuer};
use crate::error::{Error, Result};
use crate::signer::{HealthCheckerBuilder, SecretData};

pub const REASON_CHECKED: &str = "Checked";
pub const REASON_GET_AUTH_SECRET: &str = "GetAuthSecretError";
pub const REASON_AUTH_SECRET_KEY_MISSING: &str = "AuthSecretKeyMissingError";
pub const REASON_HEALTH_CHECKER_BUILDER: &str = "HealthCheckerBuilderError";
pub const REASON_HEALTH_CHECKER_CHECK: &str = "HealthCheckerCheckError";

/// Shared context for the Issuer and ClusterIssuer controllers
pub struct IssuerState {
    pub client: kube::Client,
    pub health_checker_builder: Arc<dyn HealthCheckerBuilder>,
    pub cluster_resource_namespace: String,
    pub health_check_interval: Duration,
}

/// What one reconcile observed: the Ready condition to record and, for
/// transient failures, the error to return so the reconcile is retried.
pub(crate) struct ReadyOutcome {
    pub status: ConditionStatus,
    pub reason: &'static str,
    pub message: String,
    pub retry: Option<Error>,
}

fn ready_reason(err: &Error) -> &'static str {
    match err {
        Error::GetAuthSecret(_) | Error::Kube(_) => REASON_GET_AUTH_SECRET,
        Error::AuthSecretKeyMissing => REASON_AUTH_SECRET_KEY_MISSING,
        Error::HealthCheckerCheck(_) => REASON_HEALTH_CHECKER_CHECK,
        _ => REASON_HEALTH_CHECKER_BUILDER,
    }
}

async fn check_health(
    spec: &crate::crd::IssuerSpec,
    secret: Result<SecretData>,
    builder: &dyn HealthCheckerBuilder,
) -> Result<()> {
    let secret = secret?;
    let checker = builder.build_checker(spec, &secret).map_err(|e| match e {
        Error::AuthSecretKeyMissing => e,
        e if e.is_retriable() => Error::HealthCheckerBuilder(e.to_string()),
        e => e,
    })?;
    checker
        .check()
        .await
        .map_err(|e| Error::HealthCheckerCheck(e.to_string()))
}

/// On first sight of an issuer the Ready condition does not exist yet.
/// Record it as Unknown and let the status update retrigger the
/// reconcile; the health check waits for the next pass.
pub(crate) fn initialize_ready(status: Option<&IssuerStatus>) -> Option<IssuerStatus> {
    match status {
        Some(existing) if existing.ready_condition().is_some() => None,
        existing => {
            let mut status = existing.cloned().unwrap_or_default();
            status.set_ready(ConditionStatus::Unknown, "", "");
            Some(status)
        }
    }
}

/// Run the health check and fold its outcome into a Ready condition.
pub(crate) async fn observe_issuer(
    spec: &crate::crd::IssuerSpec,
    secret: Result<SecretData>,
    builder: &dyn HealthCheckerBuilder,
) -> ReadyOutcome {
    match check_health(spec, secret, builder).await {
        Ok(()) => ReadyOutcome {
            status: ConditionStatus::True,
            reason: REASON_CHECKED,
            message: "health check succeeded".to_string(),
            retry: None,
        },
        Err(e) => ReadyOutcome {
            status: ConditionStatus::False,
            reason: ready_reason(&e),
            message: e.to_string(),
            retry: e.is_retriable().then_some(e),
        },
    }
}

#[tracing::instrument(skip_all, fields(kind = I::KIND, name = %issuer.name_any()))]
pub async fn reconcile<I: ScopedIssuer>(
    issuer: Arc<I>,
    state: Arc<IssuerState>,
) -> Result<Action> {
    let name = issuer.name_any();
    debug!("reconciling issuer");

    if let Some(status) = initialize_ready(issuer.status()) {
        patch_status(&state.client, issuer.as_ref(), &status).await?;
        return Ok(Action::requeue(state.health_check_interval));
    }

    let secret_namespace = issuer
        .scope_namespace()
        .unwrap_or_else(|| state.cluster_resource_namespace.clone());
    let secret = get_secret_data(
        &state.client,
        &secret_namespace,
        &issuer.spec().auth_secret_name,
    )
    .await;

    let outcome = observe_issuer(
        issuer.spec(),
        secret,
        state.health_checker_builder.as_ref(),
    )
    .await;

    let mut status = issuer.status().cloned().unwrap_or_default();
    let changed = status.set_ready(outcome.status, outcome.reason, &outcome.message);
    if changed {
        patch_status(&state.client, issuer.as_ref(), &status).await?;

        let (event_type, message) = match &outcome.retry {
            Some(e) => (EVENT_TYPE_WARNING, retry_message(e)),
            None if outcome.status == ConditionStatus::True => {
                (EVENT_TYPE_NORMAL, outcome.message.clone())
            }
            None => (EVENT_TYPE_WARNING, outcome.message.clone()),
        };
        emit_event(
            &state.client,
            issuer.as_ref(),
            event_type,
            EVENT_REASON_ISSUER,
            &message,
        )
        .await?;
    }

    match outcome.retry {
        Some(e) => Err(e),
        None => {
            if outcome.status == ConditionStatus::True {
                info!(kind = I::KIND, %name, "issuer is ready");
            }
            Ok(Action::requeue(state.health_check_interval))
        }
    }
}

async fn patch_status<I: ScopedIssuer>(
    client: &kube::Client,
    issuer: &I,
    status: &IssuerStatus,
) -> Result<()> {
    let api = issuer.scoped_api(client.clone());
    api.patch_status(
        &issuer.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    Ok(())
}

pub fn error_policy<I: ScopedIssuer>(
    issuer: Arc<I>,
    err: &Error,
    _state: Arc<IssuerState>,
) -> Action {
    warn!(
        kind = I::KIND,
        name = %issuer.name_any(),
        error = %err,
        "issuer reconcile failed"
    );
    Action::requeue(Duration::from_secs(10))
}

pub async fn run<I: ScopedIssuer>(state: Arc<IssuerState>) {
    let api: Api<I> = Api::all(state.client.clone());
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile::<I>, error_policy::<I>, state)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(kind = I::KIND, name = %obj.name, "reconciled"),
                Err(e) => warn!(kind = I::KIND, error = %e, "reconciliation error"),
            }
        })
        .await;
}
