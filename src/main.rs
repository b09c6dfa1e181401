use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cfssl_issuer::controller::{issuer, request, IssuerState, RequestState};
use cfssl_issuer::crd::{ClusterIssuer, Issuer};
use cfssl_issuer::signer::CfsslBuilder;
use cfssl_issuer::Error;

#[derive(Parser, Debug)]
#[command(author, version, about = "CFSSL certificate issuer for Kubernetes", long_about = None)]
struct Args {
    /// Namespace to resolve ClusterIssuer auth secrets from
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    cluster_resource_namespace: String,

    /// Sign SigningRequests without waiting for an Approved condition
    #[arg(long, env = "DISABLE_APPROVED_CHECK")]
    disable_approved_check: bool,

    /// Seconds between health checks of a ready issuer
    #[arg(long, env = "HEALTH_CHECK_INTERVAL", default_value_t = 540)]
    health_check_interval: u64,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(env_filter);
    if args.log_json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }

    info!("Starting cfssl-issuer v{}", env!("CARGO_PKG_VERSION"));

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let builder = Arc::new(CfsslBuilder);
    let issuer_state = Arc::new(IssuerState {
        client: client.clone(),
        health_checker_builder: builder.clone(),
        cluster_resource_namespace: args.cluster_resource_namespace.clone(),
        health_check_interval: Duration::from_secs(args.health_check_interval),
    });
    let request_state = Arc::new(RequestState {
        client,
        signer_builder: builder,
        cluster_resource_namespace: args.cluster_resource_namespace,
        check_approval: !args.disable_approved_check,
    });

    if !request_state.check_approval {
        info!("Approved condition check is disabled");
    }

    tokio::join!(
        issuer::run::<Issuer>(issuer_state.clone()),
        issuer::run::<ClusterIssuer>(issuer_state),
        request::run(request_state),
    );

    Ok(())
}
