//! Run the full enrollment workflow against the service and stream a
//! simulated orbit as live telemetry until interrupted.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use aerogate_cli::CircularOrbit;
use aerogate_core::models::{Credentials, TrafficUpdate};
use aerogate_sdk::client::{Client, ClientConfig, ServiceVersion};
use aerogate_sdk::context::{Context, ReturnCode, SchedulerBackend, SignalKind};
use aerogate_sdk::traffic::TrafficSubscriber;
use aerogate_sdk::TelemetrySubmitter;
use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Stream simulated drone telemetry through the authorization workflow
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

    /// Aircraft identifier
    #[arg(long, default_value = "AEROGATE-1")]
    aircraft: String,

    /// Use the staging service routes
    #[arg(long)]
    staging: bool,

    /// Orbit center latitude
    #[arg(long, default_value_t = 33.6846)]
    lat: f64,

    /// Orbit center longitude
    #[arg(long, default_value_t = -117.8265)]
    lon: f64,

    /// Orbit radius in meters
    #[arg(long, default_value_t = 200.0)]
    radius: f64,

    /// Altitude in meters MSL
    #[arg(long, default_value_t = 50.0)]
    altitude: f64,

    /// Speed in m/s
    #[arg(long, default_value_t = 10.0)]
    speed: f64,

    /// Update rate in Hz
    #[arg(long, default_value_t = 1.0)]
    rate: f64,
}

struct LogTraffic;

impl TrafficSubscriber for LogTraffic {
    fn handle_update(&self, updates: &[TrafficUpdate]) {
        for update in updates {
            tracing::warn!(
                aircraft = %update.aircraft_id,
                latitude = update.latitude,
                longitude = update.longitude,
                "traffic advisory"
            );
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("aerogate_sdk=debug".parse()?),
        )
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
        credentials: Credentials::anonymous(api_key, args.aircraft.clone()),
    };

    let context = Context::create(SchedulerBackend::Pool).into_result()?;

    let (tx, rx) = mpsc::channel();
    context.create_client(
        config,
        Box::new(move |outcome| {
            tx.send(outcome.into_result()).ok();
        }),
    );
    let client = rx
        .recv()
        .context("client construction did not complete")??;

    let submitter = TelemetrySubmitter::create(
        Arc::clone(&client) as Arc<dyn Client>,
        context.scheduler(),
        args.aircraft.clone(),
        Some(Arc::new(LogTraffic)),
    );

    let orbit = CircularOrbit::new(args.lat, args.lon, args.radius, args.altitude, args.speed);
    submitter.set_mission_geometry(orbit.boundary());
    submitter.activate();

    tracing::info!(
        aircraft = %args.aircraft,
        lat = args.lat,
        lon = args.lon,
        radius = args.radius,
        "streaming telemetry; Ctrl-C to end the flight"
    );

    let pump_submitter = Arc::clone(&submitter);
    let pump_context = Arc::clone(&context);
    let interval = Duration::from_secs_f64(1.0 / args.rate);
    let pump = std::thread::spawn(move || {
        let start = std::time::Instant::now();
        while !pump_context.is_stopped() {
            pump_submitter.submit(orbit.sample(start.elapsed().as_secs_f64()));
            std::thread::sleep(interval);
        }
    });

    let signal_submitter = Arc::clone(&submitter);
    let signal_context = Arc::clone(&context);
    let (teardown_tx, teardown_rx) = mpsc::channel();
    let code = context.exec(
        &[SignalKind::interrupt(), SignalKind::terminate()],
        move |_signal| {
            let done = teardown_tx.clone();
            signal_submitter.deactivate_then(Box::new(move |_| {
                done.send(()).ok();
            }));
            signal_context.stop(ReturnCode::Success);
        },
    );

    pump.join().ok();
    // Bounded wait for the teardown requests to settle.
    teardown_rx.recv_timeout(Duration::from_secs(5)).ok();

    std::process::exit(code.exit_code());
}
