//! REST implementation of the client surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aerogate_core::models::{Aircraft, Flight, FlightPlan, Pilot, Position, Token};
use aerogate_core::{Error, Outcome};
use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use crate::auth::{Authenticator, SsoAuthenticator};
use crate::client::{
    Client, ClientConfig, FlightPlanCreate, FlightPlans, FlightSearch, Flights, Pilots, Telemetry,
    TokenSink, Traffic,
};
use crate::request::AuthorizedRequester;
use crate::traffic::TrafficMonitor;

/// Client bound to the service's REST surface. One `AuthorizedRequester`
/// per resource family, all attached to the authenticator for token
/// updates.
pub struct RestClient {
    authenticator: Arc<SsoAuthenticator>,
    pilots: RestPilots,
    flights: RestFlights,
    flight_plans: RestFlightPlans,
    traffic: RestTraffic,
    telemetry: RestTelemetry,
}

impl RestClient {
    /// Build a client bound to `config`. Fails on a malformed host URL.
    pub async fn create(config: ClientConfig) -> Result<Self, Error> {
        let base = Url::parse(&config.host)
            .map_err(|e| Error::validation("host", format!("{}: {e}", config.host)))?;
        let sso = Url::parse(&config.sso_host)
            .map_err(|e| Error::validation("sso_host", format!("{}: {e}", config.sso_host)))?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("aerogate-sdk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::transport_caused_by("http client construction failed", e))?;

        let api_key = config.credentials.api_key.clone();
        let requester = |url: &Url| {
            Arc::new(AuthorizedRequester::new(
                url.clone(),
                api_key.clone(),
                http.clone(),
            ))
        };

        let pilots = requester(&base);
        let flights = requester(&base);
        let flight_plans = requester(&base);
        let telemetry = requester(&base);

        let authenticator = Arc::new(SsoAuthenticator::new(requester(&base), requester(&sso)));
        for r in [&pilots, &flights, &flight_plans, &telemetry] {
            authenticator.attach(Arc::clone(r));
        }

        let route = config.version.route();
        Ok(Self {
            authenticator,
            pilots: RestPilots {
                requester: pilots,
                route,
            },
            flights: RestFlights {
                requester: flights,
                route,
            },
            flight_plans: RestFlightPlans {
                requester: flight_plans,
                route,
            },
            traffic: RestTraffic {},
            telemetry: RestTelemetry {
                requester: telemetry,
                route,
                serial: AtomicU64::new(0),
            },
        })
    }

    pub fn sso_authenticator(&self) -> &Arc<SsoAuthenticator> {
        &self.authenticator
    }
}

impl Client for RestClient {
    fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }

    fn pilots(&self) -> &dyn Pilots {
        &self.pilots
    }

    fn flights(&self) -> &dyn Flights {
        &self.flights
    }

    fn flight_plans(&self) -> &dyn FlightPlans {
        &self.flight_plans
    }

    fn traffic(&self) -> &dyn Traffic {
        &self.traffic
    }

    fn telemetry(&self) -> &dyn Telemetry {
        &self.telemetry
    }

    fn token_sink(&self) -> Option<&dyn TokenSink> {
        Some(self)
    }
}

impl TokenSink for RestClient {
    fn set_auth_token(&self, token: Token) {
        self.authenticator.update_token(token);
    }
}

struct RestPilots {
    requester: Arc<AuthorizedRequester>,
    route: &'static str,
}

#[async_trait]
impl Pilots for RestPilots {
    async fn current(&self) -> Outcome<Pilot, Error> {
        let path = format!("/pilot/{}/profile", self.route);
        self.requester.get(&path, &[]).await.into()
    }

    async fn aircrafts(&self, pilot_id: &str) -> Outcome<Vec<Aircraft>, Error> {
        let path = format!("/pilot/{}/{}/aircraft", self.route, pilot_id);
        self.requester.get(&path, &[]).await.into()
    }
}

#[derive(Debug, Deserialize)]
struct FlightSearchResponse {
    #[serde(default)]
    results: Vec<Flight>,
}

#[derive(Debug, Deserialize)]
struct StartCommsResponse {
    key: String,
}

struct RestFlights {
    requester: Arc<AuthorizedRequester>,
    route: &'static str,
}

#[async_trait]
impl Flights for RestFlights {
    async fn search(&self, params: FlightSearch) -> Outcome<Vec<Flight>, Error> {
        let path = format!("/flight/{}", self.route);
        let query = [
            ("pilot_id", params.pilot_id),
            ("end_after", params.active_at.to_rfc3339()),
        ];
        let result: Result<FlightSearchResponse, Error> =
            self.requester.get(&path, &query).await;
        result.map(|response| response.results).into()
    }

    async fn end_flight(&self, id: &str) -> Outcome<(), Error> {
        let path = format!("/flight/{}/{}/end", self.route, id);
        self.requester.post_expect_empty(&path).await.into()
    }

    async fn start_flight_comms(&self, id: &str) -> Outcome<String, Error> {
        let path = format!("/flight/{}/{}/start-comm", self.route, id);
        let result: Result<StartCommsResponse, Error> = self.requester.post_empty(&path).await;
        result.map(|response| response.key).into()
    }

    async fn end_flight_comms(&self, id: &str) -> Outcome<(), Error> {
        let path = format!("/flight/{}/{}/end-comm", self.route, id);
        self.requester.post_expect_empty(&path).await.into()
    }
}

struct RestFlightPlans {
    requester: Arc<AuthorizedRequester>,
    route: &'static str,
}

#[async_trait]
impl FlightPlans for RestFlightPlans {
    async fn create(&self, params: FlightPlanCreate) -> Outcome<FlightPlan, Error> {
        let path = format!("/flightplan/{}/plan", self.route);
        self.requester.post(&path, &params).await.into()
    }

    async fn submit(&self, id: &str) -> Outcome<FlightPlan, Error> {
        let path = format!("/flightplan/{}/plan/{}/submit", self.route, id);
        self.requester.post_empty(&path).await.into()
    }
}

struct RestTraffic {}

#[async_trait]
impl Traffic for RestTraffic {
    async fn monitor(&self, flight_id: &str) -> Outcome<Arc<TrafficMonitor>, Error> {
        // The advisory feed itself rides on the excluded MQTT layer; the
        // REST client hands out the subscription registry only.
        Outcome::value(Arc::new(TrafficMonitor::new(flight_id)))
    }
}

#[derive(Debug, serde::Serialize)]
struct TelemetryPacket<'a> {
    serial: u64,
    session_key: &'a str,
    latitude: f64,
    longitude: f64,
    altitude_msl: f64,
    recorded_at: chrono::DateTime<chrono::Utc>,
}

struct RestTelemetry {
    requester: Arc<AuthorizedRequester>,
    route: &'static str,
    serial: AtomicU64,
}

#[async_trait]
impl Telemetry for RestTelemetry {
    async fn submit_update(
        &self,
        flight_id: &str,
        key: &str,
        position: Position,
    ) -> Outcome<(), Error> {
        let packet = TelemetryPacket {
            serial: self.serial.fetch_add(1, Ordering::SeqCst),
            session_key: key,
            latitude: position.latitude,
            longitude: position.longitude,
            altitude_msl: position.altitude_msl,
            recorded_at: position.timestamp,
        };
        let path = format!("/telemetry/{}/{}", self.route, flight_id);
        let result: Result<serde_json::Value, Error> =
            self.requester.post(&path, &packet).await;
        result.map(|_| ()).into()
    }
}
