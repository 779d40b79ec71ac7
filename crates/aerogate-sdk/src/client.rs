//! Client abstraction consumed by the workflow.

use std::env;
use std::sync::Arc;

use aerogate_core::models::{
    Aircraft, Credentials, Flight, FlightPlan, Geometry, Pilot, Position, Token,
};
use aerogate_core::{Error, Outcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::Authenticator;
use crate::traffic::TrafficMonitor;

pub use crate::rest::RestClient;

/// Host pair and credentials a client is bound to.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub sso_host: String,
    pub version: ServiceVersion,
    pub credentials: Credentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceVersion {
    Production,
    Staging,
}

impl ServiceVersion {
    /// Path segment selecting the service version.
    pub fn route(self) -> &'static str {
        match self {
            ServiceVersion::Production => "v2",
            ServiceVersion::Staging => "stage",
        }
    }
}

const DEFAULT_HOST: &str = "https://api.aerogate.io";
const DEFAULT_SSO_HOST: &str = "https://sso.aerogate.io";

impl ClientConfig {
    pub fn production(credentials: Credentials) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            sso_host: DEFAULT_SSO_HOST.to_string(),
            version: ServiceVersion::Production,
            credentials,
        }
    }

    pub fn staging(credentials: Credentials) -> Self {
        Self {
            version: ServiceVersion::Staging,
            ..Self::production(credentials)
        }
    }

    /// Build a configuration from the environment: AEROGATE_HOST,
    /// AEROGATE_SSO_HOST, AEROGATE_API_KEY, AEROGATE_ANONYMOUS_ID.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = env::var("AEROGATE_API_KEY")
            .map_err(|_| Error::validation("api_key", "AEROGATE_API_KEY is not set"))?;
        let anonymous_id =
            env::var("AEROGATE_ANONYMOUS_ID").unwrap_or_else(|_| "aerogate-operator".to_string());

        let mut config = Self::production(Credentials::anonymous(api_key, anonymous_id));
        if let Ok(host) = env::var("AEROGATE_HOST") {
            config.host = host;
        }
        if let Ok(sso_host) = env::var("AEROGATE_SSO_HOST") {
            config.sso_host = sso_host;
        }
        Ok(config)
    }
}

/// Search parameters for currently active flights.
#[derive(Debug, Clone)]
pub struct FlightSearch {
    pub pilot_id: String,
    /// Only flights still active at this instant.
    pub active_at: DateTime<Utc>,
}

/// Parameters for creating a flight plan.
#[derive(Debug, Clone, Serialize)]
pub struct FlightPlanCreate {
    pub pilot_id: String,
    pub takeoff_latitude: f64,
    pub takeoff_longitude: f64,
    pub geometry: Geometry,
    pub altitude_agl_min: f64,
    pub altitude_agl_max: f64,
    pub buffer: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[async_trait]
pub trait Pilots: Send + Sync {
    /// The pilot the current token authenticates.
    async fn current(&self) -> Outcome<Pilot, Error>;

    async fn aircrafts(&self, pilot_id: &str) -> Outcome<Vec<Aircraft>, Error>;
}

#[async_trait]
pub trait Flights: Send + Sync {
    async fn search(&self, params: FlightSearch) -> Outcome<Vec<Flight>, Error>;

    async fn end_flight(&self, id: &str) -> Outcome<(), Error>;

    /// Start the telemetry channel for a flight; yields the comms
    /// encryption key.
    async fn start_flight_comms(&self, id: &str) -> Outcome<String, Error>;

    async fn end_flight_comms(&self, id: &str) -> Outcome<(), Error>;
}

#[async_trait]
pub trait FlightPlans: Send + Sync {
    async fn create(&self, params: FlightPlanCreate) -> Outcome<FlightPlan, Error>;

    /// Submit a plan; the returned plan carries the id of the flight
    /// created for it.
    async fn submit(&self, id: &str) -> Outcome<FlightPlan, Error>;
}

#[async_trait]
pub trait Traffic: Send + Sync {
    async fn monitor(&self, flight_id: &str) -> Outcome<Arc<TrafficMonitor>, Error>;
}

#[async_trait]
pub trait Telemetry: Send + Sync {
    /// Encode and send exactly one telemetry packet for `position`.
    async fn submit_update(
        &self,
        flight_id: &str,
        key: &str,
        position: Position,
    ) -> Outcome<(), Error>;
}

/// Optional capability: accepts externally acquired tokens. Replaces
/// runtime type inspection with an explicit accessor on [`Client`].
pub trait TokenSink: Send + Sync {
    fn set_auth_token(&self, token: Token);
}

/// Minimum client surface the workflow consumes.
pub trait Client: Send + Sync {
    fn authenticator(&self) -> &dyn Authenticator;

    fn pilots(&self) -> &dyn Pilots;

    fn flights(&self) -> &dyn Flights;

    fn flight_plans(&self) -> &dyn FlightPlans;

    fn traffic(&self) -> &dyn Traffic;

    fn telemetry(&self) -> &dyn Telemetry;

    /// Clients that can ingest tokens acquired elsewhere expose the
    /// capability here; others return None.
    fn token_sink(&self) -> Option<&dyn TokenSink> {
        None
    }
}
