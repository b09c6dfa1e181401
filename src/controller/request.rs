//! SigningRequest reconciliation
//!
//! Walks a request through its gates (group ownership, completeness,
//! condition initialization, denial, approval), resolves the referenced
//! issuer and its credentials, and asks the signing backend for a
//! certificate. Transient failures leave the request Pending and are
//! retried; unrecoverable ones fail it terminally.

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
    emit_event, retry_message, EVENT_REASON_SIGNING_REQUEST, EVENT_TYPE_NORMAL, EVENT_TYPE_WARNING,
};
use super::{get_secret_data, FIELD_MANAGER};
use crate::crd::{
    AnyIssuer, ClusterIssuer, ConditionStatus, Issuer, SigningRequest, SigningRequestStatus,
    REASON_DENIED, REASON_FAILED, REASON_ISSUED, REASON_PENDING,
};
use crate::error::{Error, Result};
use crate::signer::{SecretData, SignedCertificate, SignerBuilder};

/// Shared context for the SigningRequest controller
pub struct RequestState {
    pub client: kube::Client,
    pub signer_builder: Arc<dyn SignerBuilder>,
    pub cluster_resource_namespace: String,
    /// When false, requests are signed without waiting for an Approved
    /// condition.
    pub check_approval: bool,
}

/// Which of the reconcile gates a request is at
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Gate {
    /// Not ours, or already complete; nothing to do
    Ignore,
    /// No Ready condition yet; record a Pending one first
    InitializeReady,
    /// An approver set Denied; fail terminally
    Deny,
    /// Wait for an approver to set Approved
    AwaitApproval,
    Sign,
}

pub(crate) fn gate(request: &SigningRequest, check_approval: bool) -> Gate {
    if !request.references_our_group() {
        return Gate::Ignore;
    }
    let status = request.status.clone().unwrap_or_default();
    if status.is_complete() {
        return Gate::Ignore;
    }
    if status.ready_condition().is_none() {
        return Gate::InitializeReady;
    }
    if check_approval {
        if status.is_denied() {
            return Gate::Deny;
        }
        if !status.is_approved() {
            return Gate::AwaitApproval;
        }
    }
    Gate::Sign
}

/// Resolve the issuer, gate on its readiness, and sign the CSR. Every step
/// maps its failure to the error variant that decides the Ready reason and
/// retry behavior.
pub(crate) async fn sign_request(
    csr: &[u8],
    issuer: Result<AnyIssuer>,
    secret: Result<SecretData>,
    builder: &dyn SignerBuilder,
) -> Result<SignedCertificate> {
    let issuer = issuer?;
    if !issuer.is_ready() {
        return Err(Error::IssuerNotReady(
            "referenced issuer does not have a Ready condition of True".into(),
        ));
    }
    let secret = secret?;
    let signer = builder.build_signer(issuer.spec(), &secret).map_err(|e| {
        if e.is_retriable() {
            Error::SignerBuilder(e.to_string())
        } else {
            e
        }
    })?;
    signer.sign(csr).await.map_err(|e| {
        if e.is_retriable() {
            Error::SignerSign(e.to_string())
        } else {
            e
        }
    })
}

/// What folding a signing result into the status produced
pub(crate) struct Outcome {
    /// The Ready condition observably changed; status write + Event are due
    pub changed: bool,
    /// The error to return so the reconcile is retried
    pub retry: Option<Error>,
}

/// Fold the signing result into the request status.
pub(crate) fn record_outcome(
    status: &mut SigningRequestStatus,
    result: Result<SignedCertificate>,
) -> Outcome {
    match result {
        Ok(signed) => {
            status.certificate = Some(String::from_utf8_lossy(&signed.certificate).into_owned());
            status.ca = signed
                .ca
                .map(|ca| String::from_utf8_lossy(&ca).into_owned());
            let changed = status.set_ready(
                ConditionStatus::True,
                REASON_ISSUED,
                "certificate issued",
            );
            Outcome {
                changed,
                retry: None,
            }
        }
        Err(e) if e.is_retriable() => {
            let changed = status.set_ready(ConditionStatus::False, REASON_PENDING, &e.to_string());
            Outcome {
                changed,
                retry: Some(e),
            }
        }
        Err(e) => {
            let changed = status.set_ready(ConditionStatus::False, REASON_FAILED, &e.to_string());
            status.mark_failed();
            Outcome {
                changed,
                retry: None,
            }
        }
    }
}

async fn get_issuer(
    client: &kube::Client,
    request: &SigningRequest,
) -> Result<AnyIssuer> {
    let ref_ = &request.spec.issuer_ref;
    let kind = if ref_.kind.is_empty() {
        "Issuer"
    } else {
        ref_.kind.as_str()
    };
    match kind {
        "Issuer" => {
            let namespace = request
                .namespace()
                .ok_or_else(|| Error::GetIssuer("request has no namespace".into()))?;
            let api: Api<Issuer> = Api::namespaced(client.clone(), &namespace);
            let issuer = api.get(&ref_.name).await.map_err(|e| {
                Error::GetIssuer(format!("failed to get Issuer {namespace}/{}: {e}", ref_.name))
            })?;
            Ok(AnyIssuer::Issuer(issuer))
        }
        "ClusterIssuer" => {
            let api: Api<ClusterIssuer> = Api::all(client.clone());
            let issuer = api.get(&ref_.name).await.map_err(|e| {
                Error::GetIssuer(format!("failed to get ClusterIssuer {}: {e}", ref_.name))
            })?;
            Ok(AnyIssuer::ClusterIssuer(issuer))
        }
        other => Err(Error::UnknownIssuerKind(format!(
            "issuerRef kind {other} is not supported"
        ))),
    }
}

#[tracing::instrument(skip_all, fields(name = %request.name_any(), namespace = ?request.namespace()))]
pub async fn reconcile(
    request: Arc<SigningRequest>,
    state: Arc<RequestState>,
) -> Result<Action> {
    let name = request.name_any();
    let mut status = request.status.clone().unwrap_or_default();

    match gate(&request, state.check_approval) {
        Gate::Ignore => {
            debug!(%name, "nothing to do");
            return Ok(Action::await_change());
        }
        Gate::AwaitApproval => {
            debug!(%name, "waiting for approval");
            return Ok(Action::await_change());
        }
        Gate::InitializeReady => {
            status.set_ready(
                ConditionStatus::False,
                REASON_PENDING,
                "Initialising Ready condition",
            );
            publish(&state, &request, &status, EVENT_TYPE_WARNING, "Initialising Ready condition")
                .await?;
            return Ok(Action::await_change());
        }
        Gate::Deny => {
            let changed = status.set_ready(
                ConditionStatus::False,
                REASON_DENIED,
                "the SigningRequest was denied",
            );
            status.mark_failed();
            if changed {
                publish(
                    &state,
                    &request,
                    &status,
                    EVENT_TYPE_WARNING,
                    "the SigningRequest was denied",
                )
                .await?;
            }
            return Ok(Action::await_change());
        }
        Gate::Sign => {}
    }

    let issuer = get_issuer(&state.client, &request).await;
    let secret = match &issuer {
        Ok(issuer) => {
            get_secret_data(
                &state.client,
                &issuer.secret_namespace(&state.cluster_resource_namespace),
                &issuer.spec().auth_secret_name,
            )
            .await
        }
        // Never consulted; sign_request fails on the issuer first.
        Err(_) => Ok(SecretData::new()),
    };
    let result = sign_request(
        request.spec.request.as_bytes(),
        issuer,
        secret,
        state.signer_builder.as_ref(),
    )
    .await;

    let issued = result.is_ok();
    let outcome = record_outcome(&mut status, result);
    if outcome.changed {
        let (event_type, message) = match (&outcome.retry, status.ready_condition()) {
            (Some(e), _) => (EVENT_TYPE_WARNING, retry_message(e)),
            (None, condition) if issued => (
                EVENT_TYPE_NORMAL,
                condition.map(|c| c.message.clone()).unwrap_or_default(),
            ),
            (None, condition) => (
                EVENT_TYPE_WARNING,
                condition.map(|c| c.message.clone()).unwrap_or_default(),
            ),
        };
        publish(&state, &request, &status, event_type, &message).await?;
    }

    match outcome.retry {
        Some(e) => Err(e),
        None => {
            if issued {
                info!(%name, "certificate issued");
            }
            Ok(Action::await_change())
        }
    }
}

/// Patch the status and record the matching Event
async fn publish(
    state: &RequestState,
    request: &SigningRequest,
    status: &SigningRequestStatus,
    event_type: &str,
    message: &str,
) -> Result<()> {
    let namespace = request
        .namespace()
        .ok_or_else(|| Error::GetIssuer("request has no namespace".into()))?;
    let api: Api<SigningRequest> = Api::namespaced(state.client.clone(), &namespace);
    api.patch_status(
        &request.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(json!({ "status": status })),
    )
    .await?;
    emit_event(
        &state.client,
        request,
        event_type,
        EVENT_REASON_SIGNING_REQUEST,
        message,
    )
    .await
}

pub fn error_policy(
    request: Arc<SigningRequest>,
    err: &Error,
    _state: Arc<RequestState>,
) -> Action {
    warn!(name = %request.name_any(), error = %err, "signing request reconcile failed");
    Action::requeue(Duration::from_secs(10))
}

pub async fn run(state: Arc<RequestState>) {
    let api: Api<SigningRequest> = Api::all(state.client.clone());
    Controller::new(api, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(name = %obj.name, "reconciled"),
                Err(e) => warn!(error = %e, "reconciliation error"),
            }
        })
        .await;
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use kube::api::ObjectMeta;

    use super::*;
    use crate::crd::{
        ClusterIssuerSpec, IssuerRef, IssuerSpec, IssuerStatus, SigningRequestSpec,
        CONDITION_TYPE_APPROVED, CONDITION_TYPE_DENIED, API_GROUP,
    };
    use crate::signer::Signer;

    fn issuer_spec() -> IssuerSpec {
        IssuerSpec {
            url: "https://cfssl.example.com".to_string(),
            auth_secret_name: "creds".to_string(),
            label: "l1".to_string(),
            profile: "default".to_string(),
            bundle: false,
        }
    }

    fn ready_issuer() -> AnyIssuer {
        let mut status = IssuerStatus::default();
        status.set_ready(ConditionStatus::True, "Checked", "");
        AnyIssuer::Issuer(Issuer {
            metadata: ObjectMeta {
                name: Some("issuer1".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: issuer_spec(),
            status: Some(status),
        })
    }

    fn request(status: Option<SigningRequestStatus>) -> SigningRequest {
        SigningRequest {
            metadata: ObjectMeta {
                name: Some("sreq1".to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            spec: SigningRequestSpec {
                request: "csr".to_string(),
                issuer_ref: IssuerRef {
                    group: API_GROUP.to_string(),
                    kind: "Issuer".to_string(),
                    name: "issuer1".to_string(),
                },
            },
            status,
        }
    }

    struct FakeSigner {
        result: Result<SignedCertificate>,
    }

    #[async_trait]
    impl Signer for FakeSigner {
        async fn sign(&self, _csr: &[u8]) -> Result<SignedCertificate> {
            match &self.result {
                Ok(signed) => Ok(signed.clone()),
                Err(e) => Err(Error::SignerSign(e.to_string())),
            }
        }
    }

    fn signer_builder(
        result: Result<SignedCertificate>,
    ) -> impl Fn(&IssuerSpec, &SecretData) -> Result<Box<dyn Signer>> {
        move |_: &IssuerSpec, _: &SecretData| {
            Ok(Box::new(FakeSigner {
                result: match &result {
                    Ok(signed) => Ok(signed.clone()),
                    Err(e) => Err(Error::SignerSign(e.to_string())),
                },
            }) as Box<dyn Signer>)
        }
    }

    fn signed() -> SignedCertificate {
        SignedCertificate {
            ca: Some(b"CA".to_vec()),
            certificate: b"CERT".to_vec(),
        }
    }

    #[test]
    fn gate_ignores_foreign_groups() {
        let mut request = request(None);
        request.spec.issuer_ref.group = "other.example.com".to_string();
        assert_eq!(gate(&request, true), Gate::Ignore);
    }

    #[test]
    fn gate_ignores_complete_requests() {
        let mut status = SigningRequestStatus::default();
        status.set_ready(ConditionStatus::True, REASON_ISSUED, "");
        assert_eq!(gate(&request(Some(status)), true), Gate::Ignore);
    }

    #[test]
    fn gate_initializes_missing_ready_condition() {
        assert_eq!(gate(&request(None), true), Gate::InitializeReady);

        let mut status = SigningRequestStatus::default();
        status
            .conditions
            .set(CONDITION_TYPE_APPROVED, ConditionStatus::True, "", "");
        assert_eq!(gate(&request(Some(status)), true), Gate::InitializeReady);
    }

    #[test]
    fn gate_fails_denied_requests() {
        let mut status = SigningRequestStatus::default();
        status.set_ready(ConditionStatus::False, REASON_PENDING, "");
        status
            .conditions
            .set(CONDITION_TYPE_DENIED, ConditionStatus::True, "", "");
        assert_eq!(gate(&request(Some(status.clone())), true), Gate::Deny);

        // Denial is only honored while the approval check is enabled
        assert_eq!(gate(&request(Some(status)), false), Gate::Sign);
    }

    #[test]
    fn gate_waits_for_approval() {
        let mut status = SigningRequestStatus::default();
        status.set_ready(ConditionStatus::False, REASON_PENDING, "");
        assert_eq!(gate(&request(Some(status.clone())), true), Gate::AwaitApproval);

        // With the approval check disabled the same request is signed.
        assert_eq!(gate(&request(Some(status.clone())), false), Gate::Sign);

        status
            .conditions
            .set(CONDITION_TYPE_APPROVED, ConditionStatus::True, "", "");
        assert_eq!(gate(&request(Some(status)), true), Gate::Sign);
    }

    #[tokio::test]
    async fn signs_with_a_ready_issuer() {
        let builder = signer_builder(Ok(signed()));
        let result = sign_request(
            b"csr",
            Ok(ready_issuer()),
            Ok(SecretData::new()),
            &builder,
        )
        .await
        .unwrap();
        assert_eq!(result.certificate, b"CERT");
    }

    #[tokio::test]
    async fn missing_issuer_is_retried() {
        let builder = signer_builder(Ok(signed()));
        let err = sign_request(
            b"csr",
            Err(Error::GetIssuer("issuers \"issuer1\" not found".into())),
            Ok(SecretData::new()),
            &builder,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::GetIssuer(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn unready_issuer_is_retried() {
        let issuer = AnyIssuer::ClusterIssuer(ClusterIssuer {
            metadata: ObjectMeta {
                name: Some("ci1".to_string()),
                ..Default::default()
            },
            spec: ClusterIssuerSpec(issuer_spec()),
            status: None,
        });
        let builder = signer_builder(Ok(signed()));
        let err = sign_request(b"csr", Ok(issuer), Ok(SecretData::new()), &builder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IssuerNotReady(_)));
    }

    #[tokio::test]
    async fn secret_failure_is_retried() {
        let builder = signer_builder(Ok(signed()));
        let err = sign_request(
            b"csr",
            Ok(ready_issuer()),
            Err(Error::GetAuthSecret("secrets \"creds\" not found".into())),
            &builder,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::GetAuthSecret(_)));
    }

    #[tokio::test]
    async fn builder_failure_is_wrapped() {
        let builder = |_: &IssuerSpec, _: &SecretData| -> Result<Box<dyn Signer>> {
            Err(Error::Backend("cannot reach backend".into()))
        };
        let err = sign_request(b"csr", Ok(ready_issuer()), Ok(SecretData::new()), &builder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SignerBuilder(_)));
    }

    #[tokio::test]
    async fn misconfigured_issuer_is_retried_as_builder_failure() {
        let builder = |_: &IssuerSpec, _: &SecretData| -> Result<Box<dyn Signer>> {
            Err(Error::Config("issuer has an empty CFSSL label".into()))
        };
        let err = sign_request(b"csr", Ok(ready_issuer()), Ok(SecretData::new()), &builder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SignerBuilder(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn invalid_csr_fails_permanently() {
        let builder = |_: &IssuerSpec, _: &SecretData| -> Result<Box<dyn Signer>> {
            struct Rejecting;
            #[async_trait]
            impl Signer for Rejecting {
                async fn sign(&self, _csr: &[u8]) -> Result<SignedCertificate> {
                    Err(Error::InvalidCsr("invalid PEM".into()))
                }
            }
            Ok(Box::new(Rejecting))
        };
        let err = sign_request(b"garbage", Ok(ready_issuer()), Ok(SecretData::new()), &builder)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCsr(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn record_outcome_stores_certificate_on_success() {
        let mut status = SigningRequestStatus::default();
        let outcome = record_outcome(&mut status, Ok(signed()));
        assert!(outcome.retry.is_none());
        assert!(outcome.changed);
        assert_eq!(status.certificate.as_deref(), Some("CERT"));
        assert_eq!(status.ca.as_deref(), Some("CA"));
        assert!(status.is_complete());
        assert_eq!(status.ready_condition().unwrap().reason, REASON_ISSUED);
        assert!(status.failure_time.is_none());
    }

    #[test]
    fn record_outcome_leaves_transient_failures_pending() {
        let mut status = SigningRequestStatus::default();
        let outcome = record_outcome(
            &mut status,
            Err(Error::SignerSign("connection refused".into())),
        );
        assert!(matches!(outcome.retry, Some(Error::SignerSign(_))));
        assert!(outcome.changed);
        assert!(!status.is_complete());
        assert_eq!(status.ready_condition().unwrap().reason, REASON_PENDING);
        assert!(status.failure_time.is_none());
        assert!(status.certificate.is_none());

        // Same failure again: nothing observable changed, no new event is due
        let outcome = record_outcome(
            &mut status,
            Err(Error::SignerSign("connection refused".into())),
        );
        assert!(!outcome.changed);
        assert!(outcome.retry.is_some());
    }

    #[test]
    fn record_outcome_fails_permanent_errors_terminally() {
        let mut status = SigningRequestStatus::default();
        let outcome = record_outcome(&mut status, Err(Error::InvalidCsr("invalid PEM".into())));
        assert!(outcome.retry.is_none());
        assert!(outcome.changed);
        assert_eq!(status.ready_condition().unwrap().reason, REASON_FAILED);
        assert!(status.failure_time.is_some());
    }
}
