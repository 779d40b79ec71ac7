//! Mint an anonymous token for an operator id and print it.

use std::sync::Arc;

use aerogate_core::models::Credentials;
use aerogate_sdk::auth::AnonymousAuth;
use aerogate_sdk::client::{Client, ClientConfig, ServiceVersion};
use aerogate_sdk::context::{Context, ReturnCode, SchedulerBackend};
use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fetch an anonymous authentication token
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Service host
    #[arg(long, default_value = "https://api.aerogate.io")]
    host: String,

    /// SSO host
    #[arg(long, default_value = "https://sso.aerogate.io")]
    sso_host: String,

    /// API key (falls back to AEROGATE_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Operator id to mint the token for
    #[arg(long, default_value = "aerogate-operator")]
    id: String,

    /// Use the staging service routes
    #[arg(long)]
    staging: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let api_key = args
        .api_key
        .clone()
        .or_else(|| std::env::var("AEROGATE_API_KEY").ok())
        .context("no API key: pass --api-key or set AEROGATE_API_KEY")?;

    let config = ClientConfig {
        host: args.host.clone(),
        sso_host: args.sso_host.clone(),
        version: if args.staging {
            ServiceVersion::Staging
        } else {
            ServiceVersion::Production
        },
        credentials: Credentials::anonymous(api_key, args.id.clone()),
    };

    let context = Context::create(SchedulerBackend::Pool).into_result()?;

    let id = args.id.clone();
    let worker_context = Arc::clone(&context);
    context.create_client(
        config,
        Box::new(move |outcome| match outcome.into_result() {
            Ok(client) => {
                let context = worker_context.clone();
                let runner = context.clone();
                context.post(Box::pin(async move {
                    let outcome = client
                        .authenticator()
                        .authenticate_anonymously(AnonymousAuth { id })
                        .await;
                    match outcome.into_result() {
                        Ok(token) => {
                            println!("{}", token.id());
                            runner.stop(ReturnCode::Success);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "token exchange failed");
                            runner.stop_with_error();
                        }
                    }
                }));
            }
            Err(e) => {
                tracing::error!(error = %e, "client construction failed");
                worker_context.stop_with_error();
            }
        }),
    );

    std::process::exit(context.run().exit_code());
}
