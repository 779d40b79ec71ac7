//! Flight telemetry workflow state machine.
//!
//! Sequences authorization, pilot lookup, stale-flight cleanup, plan
//! creation and submission, traffic monitoring and comms startup, then
//! per-sample telemetry submission; reverses the sequence on
//! deactivation. Each step completes asynchronously through the
//! scheduler, and a per-step "requested" flag keeps at most one instance
//! of that step in flight.

use std::sync::{Arc, Mutex, MutexGuard};

use aerogate_core::models::{Flight, FlightPlan, Geometry, Position};
use aerogate_core::{Callback, Error, Outcome};
use chrono::{TimeDelta, Utc};

use crate::auth::AnonymousAuth;
use crate::client::{Client, FlightPlanCreate, FlightSearch};
use crate::schedule::Scheduler;
use crate::traffic::{TrafficMonitor, TrafficSubscriber};

const DEFAULT_ALTITUDE_AGL_MIN: f64 = 0.0;
const DEFAULT_ALTITUDE_AGL_MAX: f64 = 100.0;
const DEFAULT_GEOMETRY_BUFFER_M: f64 = 25.0;
const DEFAULT_FLIGHT_WINDOW_SECS: i64 = 3600;

/// Lifecycle state of the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Processing telemetry submissions.
    Active,
    /// Dropping all telemetry submissions.
    Inactive,
}

#[derive(Debug, Default)]
struct StepFlags {
    authorization: bool,
    pilot_id: bool,
    active_flights: bool,
    end_active_flights: bool,
    create_flight_plan: bool,
    submit_flight_plan: bool,
    traffic_monitoring: bool,
    start_flight_comms: bool,
    end_flight_comms: bool,
}

impl StepFlags {
    fn clear(&mut self) {
        *self = StepFlags::default();
    }
}

/// Log the outcome of a step dispatch. A dropped duplicate is routine;
/// anything else points at a guard that failed to hold.
fn log_dispatch(result: Result<(), Error>) {
    if let Err(e) = result {
        if e.is_suppressed() {
            tracing::debug!(error = %e, "duplicate step request dropped");
        } else {
            tracing::error!(error = %e, "step dispatch failed");
        }
    }
}

#[derive(Default)]
struct Inner {
    state: Option<State>,
    flags: StepFlags,
    authorization: Option<String>,
    pilot_id: Option<String>,
    active_flights: Option<Vec<Flight>>,
    flight_plan: Option<FlightPlan>,
    flight: Option<Flight>,
    traffic_monitor: Option<Arc<TrafficMonitor>>,
    encryption_key: Option<String>,
    mission_geometry: Option<Geometry>,
    current_position: Option<Position>,
}

impl Inner {
    fn state(&self) -> State {
        self.state.unwrap_or(State::Inactive)
    }

    fn is_active(&self) -> bool {
        self.state() == State::Active
    }

    /// True once plan creation may be dispatched: enrollment reached the
    /// cleanup boundary, no plan exists yet, and geometry and a first
    /// position are known.
    fn ready_for_flight_plan(&self) -> bool {
        self.is_active()
            && self.flight_plan.is_none()
            && self.pilot_id.is_some()
            && self
                .active_flights
                .as_ref()
                .is_some_and(|flights| flights.is_empty())
            && !self.flags.end_active_flights
            && self.mission_geometry.is_some()
            && self.current_position.is_some()
    }
}

/// The workflow state machine. Shared by reference between the driving
/// application and the scheduler tasks carrying step completions.
pub struct TelemetrySubmitter {
    scheduler: Arc<dyn Scheduler>,
    client: Arc<dyn Client>,
    aircraft_id: String,
    traffic_subscriber: Option<Arc<dyn TrafficSubscriber>>,
    inner: Mutex<Inner>,
}

impl TelemetrySubmitter {
    pub fn create(
        client: Arc<dyn Client>,
        scheduler: Arc<dyn Scheduler>,
        aircraft_id: impl Into<String>,
        traffic_subscriber: Option<Arc<dyn TrafficSubscriber>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            scheduler,
            client,
            aircraft_id: aircraft_id.into(),
            traffic_subscriber,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn state(&self) -> State {
        self.inner().state()
    }

    /// Transition to `Active` and start enrollment. No-op when already
    /// active.
    pub fn activate(self: &Arc<Self>) {
        {
            let mut inner = self.inner();
            if inner.is_active() {
                return;
            }
            inner.state = Some(State::Active);
        }
        tracing::info!(aircraft_id = %self.aircraft_id, "telemetry submitter activated");
        log_dispatch(self.request_authorization());
    }

    /// Transition to `Inactive`. Clears every step flag so late
    /// completions of superseded steps are discarded on arrival, then
    /// tears down comms and the flight if they were established.
    /// Teardown failures are logged, never retried.
    pub fn deactivate(self: &Arc<Self>) {
        self.deactivate_then(Box::new(|_| {}));
    }

    /// Like [`TelemetrySubmitter::deactivate`], reporting through `done`
    /// once teardown has settled. Deactivation always completes locally,
    /// so `done` always receives a value; teardown failures are only
    /// logged. When already inactive, `done` fires immediately.
    pub fn deactivate_then(self: &Arc<Self>, done: Callback<()>) {
        let teardown = {
            let mut inner = self.inner();
            if !inner.is_active() {
                None
            } else {
                inner.state = Some(State::Inactive);
                inner.flags.clear();
                let comms_started = inner.encryption_key.take().is_some();
                let flight_id = inner.flight.take().map(|flight| flight.id);
                inner.authorization = None;
                inner.pilot_id = None;
                inner.active_flights = None;
                inner.flight_plan = None;
                inner.traffic_monitor = None;
                Some((flight_id, comms_started))
            }
        };

        let Some((flight_id, comms_started)) = teardown else {
            done(Outcome::value(()));
            return;
        };
        tracing::info!(aircraft_id = %self.aircraft_id, "telemetry submitter deactivated");

        match flight_id {
            Some(id) => self.post_teardown(id, comms_started, done),
            None => done(Outcome::value(())),
        }
    }

    /// Record `position` as the current sample, superseding any previous
    /// unconsumed one. Sends exactly one telemetry packet when enrollment
    /// is complete; otherwise the sample seeds the next plan creation.
    ///
    /// A sample arriving while plan creation is already in flight does
    /// not alter that request; it only affects the next cycle.
    pub fn submit(self: &Arc<Self>, position: Position) {
        let send;
        let kick_plan;
        {
            let mut inner = self.inner();
            inner.current_position = Some(position);
            if !inner.is_active() {
                return;
            }
            send = match (&inner.flight, &inner.encryption_key) {
                (Some(flight), Some(key)) => Some((flight.id.clone(), key.clone())),
                _ => None,
            };
            kick_plan = send.is_none() && inner.ready_for_flight_plan();
        }

        if let Some((flight_id, key)) = send {
            let this = Arc::clone(self);
            self.scheduler.post(Box::pin(async move {
                let outcome = this
                    .client
                    .telemetry()
                    .submit_update(&flight_id, &key, position)
                    .await;
                if let Some(e) = outcome.as_error() {
                    tracing::warn!(error = %e, "telemetry submission failed");
                }
            }));
        } else if kick_plan {
            // Enrollment stalled waiting for a first fix; this one
            // unblocks plan creation.
            log_dispatch(self.request_create_flight_plan());
        }
    }

    /// Geometry for the NEXT flight-plan creation; an already-submitted
    /// plan is unaffected.
    pub fn set_mission_geometry(&self, geometry: Geometry) {
        self.inner().mission_geometry = Some(geometry);
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn request_authorization(self: &Arc<Self>) -> Result<(), Error> {
        {
            let mut inner = self.inner();
            if inner.flags.authorization {
                return Err(Error::Suppressed("authorization"));
            }
            inner.flags.authorization = true;
        }
        tracing::debug!("requesting authorization");
        let this = Arc::clone(self);
        let params = AnonymousAuth {
            id: self.aircraft_id.clone(),
        };
        self.scheduler.post(Box::pin(async move {
            let outcome = this
                .client
                .authenticator()
                .authenticate_anonymously(params)
                .await;
            this.handle_authorization_finished(outcome.map(|token| token.id().to_string()));
        }));
        Ok(())
    }

    fn handle_authorization_finished(self: &Arc<Self>, outcome: Outcome<String, Error>) {
        {
            let mut inner = self.inner();
            if !inner.flags.authorization {
                tracing::debug!("discarding stale authorization completion");
                return;
            }
            inner.flags.authorization = false;
            if !inner.is_active() {
                return;
            }
            match outcome.into_result() {
                Ok(authorization) => inner.authorization = Some(authorization),
                Err(e) => {
                    tracing::error!(error = %e, "authorization failed");
                    return;
                }
            }
        }
        log_dispatch(self.request_pilot_id());
    }

    fn request_pilot_id(self: &Arc<Self>) -> Result<(), Error> {
        {
            let mut inner = self.inner();
            if inner.flags.pilot_id {
                return Err(Error::Suppressed("pilot_id"));
            }
            inner.flags.pilot_id = true;
        }
        tracing::debug!("requesting pilot identity");
        let this = Arc::clone(self);
        self.scheduler.post(Box::pin(async move {
            let outcome = this.client.pilots().current().await;
            this.handle_pilot_id_finished(outcome.map(|pilot| pilot.id));
        }));
        Ok(())
    }

    fn handle_pilot_id_finished(self: &Arc<Self>, outcome: Outcome<String, Error>) {
        {
            let mut inner = self.inner();
            if !inner.flags.pilot_id {
                tracing::debug!("discarding stale pilot lookup completion");
                return;
            }
            inner.flags.pilot_id = false;
            if !inner.is_active() {
                return;
            }
            match outcome.into_result() {
                Ok(pilot_id) => inner.pilot_id = Some(pilot_id),
                Err(e) => {
                    tracing::error!(error = %e, "pilot lookup failed");
                    return;
                }
            }
        }
        log_dispatch(self.request_active_flights());
    }

    fn request_active_flights(self: &Arc<Self>) -> Result<(), Error> {
        let pilot_id = {
            let mut inner = self.inner();
            if inner.flags.active_flights {
                return Err(Error::Suppressed("active_flights"));
            }
            let Some(pilot_id) = inner.pilot_id.clone() else {
                return Err(Error::PreconditionViolation(
                    "active flight query without pilot identity".to_string(),
                ));
            };
            inner.flags.active_flights = true;
            pilot_id
        };
        tracing::debug!(%pilot_id, "querying active flights");
        let this = Arc::clone(self);
        self.scheduler.post(Box::pin(async move {
            let outcome = this
                .client
                .flights()
                .search(FlightSearch {
                    pilot_id,
                    active_at: Utc::now(),
                })
                .await;
            this.handle_active_flights_finished(outcome);
        }));
        Ok(())
    }

    fn handle_active_flights_finished(self: &Arc<Self>, outcome: Outcome<Vec<Flight>, Error>) {
        {
            let mut inner = self.inner();
            if !inner.flags.active_flights {
                tracing::debug!("discarding stale active flight completion");
                return;
            }
            inner.flags.active_flights = false;
            if !inner.is_active() {
                return;
            }
            match outcome.into_result() {
                Ok(flights) => {
                    tracing::debug!(count = flights.len(), "active flights found");
                    inner.active_flights = Some(flights);
                }
                Err(e) => {
                    tracing::error!(error = %e, "active flight query failed");
                    return;
                }
            }
        }
        log_dispatch(self.request_end_active_flights());
    }

    /// End every previously active flight. Plan creation is only
    /// dispatched once none remain.
    fn request_end_active_flights(self: &Arc<Self>) -> Result<(), Error> {
        let ids: Vec<String>;
        {
            let mut inner = self.inner();
            if inner.flags.end_active_flights {
                return Err(Error::Suppressed("end_active_flights"));
            }
            ids = inner
                .active_flights
                .as_ref()
                .map(|flights| flights.iter().map(|f| f.id.clone()).collect())
                .unwrap_or_default();
            if !ids.is_empty() {
                inner.flags.end_active_flights = true;
            }
        }

        if ids.is_empty() {
            return self.request_create_flight_plan();
        }

        tracing::info!(count = ids.len(), "ending stale flights");
        for id in ids {
            let this = Arc::clone(self);
            self.scheduler.post(Box::pin(async move {
                let outcome = this.client.flights().end_flight(&id).await;
                this.handle_end_active_flight_finished(id, outcome);
            }));
        }
        Ok(())
    }

    fn handle_end_active_flight_finished(
        self: &Arc<Self>,
        id: String,
        outcome: Outcome<(), Error>,
    ) {
        {
            let mut inner = self.inner();
            if !inner.flags.end_active_flights {
                tracing::debug!("discarding stale flight-end completion");
                return;
            }
            if let Some(e) = outcome.as_error() {
                tracing::error!(error = %e, flight_id = %id, "failed to end stale flight");
                inner.flags.end_active_flights = false;
                return;
            }
            if let Some(flights) = inner.active_flights.as_mut() {
                flights.retain(|flight| flight.id != id);
                if !flights.is_empty() {
                    return;
                }
            }
            inner.flags.end_active_flights = false;
            if !inner.is_active() {
                return;
            }
        }
        log_dispatch(self.request_create_flight_plan());
    }

    fn request_create_flight_plan(self: &Arc<Self>) -> Result<(), Error> {
        let params;
        {
            let mut inner = self.inner();
            if inner.flags.create_flight_plan {
                return Err(Error::Suppressed("create_flight_plan"));
            }
            if !inner.is_active() || inner.flight_plan.is_some() {
                return Ok(());
            }
            let Some(pilot_id) = inner.pilot_id.clone() else {
                return Err(Error::PreconditionViolation(
                    "flight plan creation without pilot identity".to_string(),
                ));
            };
            let (Some(geometry), Some(position)) =
                (inner.mission_geometry.clone(), inner.current_position)
            else {
                // Not an error: enrollment resumes from the next sample
                // or geometry announcement.
                tracing::info!("deferring flight plan creation until geometry and a fix are known");
                return Ok(());
            };
            inner.flags.create_flight_plan = true;
            let now = Utc::now();
            params = FlightPlanCreate {
                pilot_id,
                takeoff_latitude: position.latitude,
                takeoff_longitude: position.longitude,
                geometry,
                altitude_agl_min: DEFAULT_ALTITUDE_AGL_MIN,
                altitude_agl_max: DEFAULT_ALTITUDE_AGL_MAX,
                buffer: DEFAULT_GEOMETRY_BUFFER_M,
                start_time: now,
                end_time: now + TimeDelta::seconds(DEFAULT_FLIGHT_WINDOW_SECS),
            };
        }
        tracing::debug!("creating flight plan");
        let this = Arc::clone(self);
        self.scheduler.post(Box::pin(async move {
            let outcome = this.client.flight_plans().create(params).await;
            this.handle_create_flight_plan_finished(outcome);
        }));
        Ok(())
    }

    fn handle_create_flight_plan_finished(self: &Arc<Self>, outcome: Outcome<FlightPlan, Error>) {
        {
            let mut inner = self.inner();
            if !inner.flags.create_flight_plan {
                tracing::debug!("discarding stale plan creation completion");
                return;
            }
            inner.flags.create_flight_plan = false;
            if !inner.is_active() {
                return;
            }
            match outcome.into_result() {
                Ok(plan) => inner.flight_plan = Some(plan),
                Err(e) => {
                    tracing::error!(error = %e, "flight plan creation failed");
                    return;
                }
            }
        }
        log_dispatch(self.request_submit_flight_plan());
    }

    fn request_submit_flight_plan(self: &Arc<Self>) -> Result<(), Error> {
        let plan_id = {
            let mut inner = self.inner();
            if inner.flags.submit_flight_plan {
                return Err(Error::Suppressed("submit_flight_plan"));
            }
            let Some(plan_id) = inner.flight_plan.as_ref().map(|plan| plan.id.clone()) else {
                return Err(Error::PreconditionViolation(
                    "flight plan submission without a created plan".to_string(),
                ));
            };
            inner.flags.submit_flight_plan = true;
            plan_id
        };
        tracing::debug!(%plan_id, "submitting flight plan");
        let this = Arc::clone(self);
        self.scheduler.post(Box::pin(async move {
            let outcome = this.client.flight_plans().submit(&plan_id).await;
            this.handle_submit_flight_plan_finished(outcome);
        }));
        Ok(())
    }

    fn handle_submit_flight_plan_finished(self: &Arc<Self>, outcome: Outcome<FlightPlan, Error>) {
        {
            let mut inner = self.inner();
            if !inner.flags.submit_flight_plan {
                tracing::debug!("discarding stale plan submission completion");
                return;
            }
            inner.flags.submit_flight_plan = false;
            if !inner.is_active() {
                return;
            }
            match outcome.into_result() {
                Ok(plan) => match plan.flight_id.clone() {
                    Some(flight_id) => {
                        inner.flight = Some(Flight {
                            id: flight_id,
                            pilot_id: Some(plan.pilot_id.clone()),
                            created_at: Some(Utc::now()),
                        });
                        inner.flight_plan = Some(plan);
                    }
                    None => {
                        tracing::error!("submitted plan carries no flight id");
                        return;
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "flight plan submission failed");
                    return;
                }
            }
        }
        log_dispatch(self.request_monitor_traffic());
    }

    fn request_monitor_traffic(self: &Arc<Self>) -> Result<(), Error> {
        let flight_id = {
            let mut inner = self.inner();
            if inner.flags.traffic_monitoring {
                return Err(Error::Suppressed("traffic_monitoring"));
            }
            let Some(flight_id) = inner.flight.as_ref().map(|flight| flight.id.clone()) else {
                return Err(Error::PreconditionViolation(
                    "traffic monitoring without a flight".to_string(),
                ));
            };
            inner.flags.traffic_monitoring = true;
            flight_id
        };
        tracing::debug!(%flight_id, "attaching traffic monitor");
        let this = Arc::clone(self);
        self.scheduler.post(Box::pin(async move {
            let outcome = this.client.traffic().monitor(&flight_id).await;
            this.handle_monitor_traffic_finished(outcome);
        }));
        Ok(())
    }

    fn handle_monitor_traffic_finished(
        self: &Arc<Self>,
        outcome: Outcome<Arc<TrafficMonitor>, Error>,
    ) {
        {
            let mut inner = self.inner();
            if !inner.flags.traffic_monitoring {
                tracing::debug!("discarding stale traffic monitor completion");
                return;
            }
            inner.flags.traffic_monitoring = false;
            if !inner.is_active() {
                return;
            }
            match outcome.into_result() {
                Ok(monitor) => {
                    if let Some(subscriber) = &self.traffic_subscriber {
                        monitor.subscribe(Arc::clone(subscriber));
                    }
                    inner.traffic_monitor = Some(monitor);
                }
                Err(e) => {
                    tracing::error!(error = %e, "traffic monitor attachment failed");
                    return;
                }
            }
        }
        log_dispatch(self.request_start_flight_comms());
    }

    fn request_start_flight_comms(self: &Arc<Self>) -> Result<(), Error> {
        let flight_id = {
            let mut inner = self.inner();
            if inner.flags.start_flight_comms {
                return Err(Error::Suppressed("start_flight_comms"));
            }
            let Some(flight_id) = inner.flight.as_ref().map(|flight| flight.id.clone()) else {
                return Err(Error::PreconditionViolation(
                    "comms startup without a flight".to_string(),
                ));
            };
            inner.flags.start_flight_comms = true;
            flight_id
        };
        tracing::debug!(%flight_id, "starting flight comms");
        let this = Arc::clone(self);
        self.scheduler.post(Box::pin(async move {
            let outcome = this.client.flights().start_flight_comms(&flight_id).await;
            this.handle_start_flight_comms_finished(outcome);
        }));
        Ok(())
    }

    fn handle_start_flight_comms_finished(self: &Arc<Self>, outcome: Outcome<String, Error>) {
        let mut inner = self.inner();
        if !inner.flags.start_flight_comms {
            tracing::debug!("discarding stale comms startup completion");
            return;
        }
        inner.flags.start_flight_comms = false;
        if !inner.is_active() {
            return;
        }
        match outcome.into_result() {
            Ok(key) => {
                tracing::info!("flight comms established");
                inner.encryption_key = Some(key);
            }
            Err(e) => tracing::error!(error = %e, "comms startup failed"),
        }
    }

    /// Comms stop before the flight ends, both inside one scheduler task
    /// so `done` observes the whole teardown.
    fn post_teardown(self: &Arc<Self>, flight_id: String, comms_started: bool, done: Callback<()>) {
        if comms_started {
            self.inner().flags.end_flight_comms = true;
        }
        let this = Arc::clone(self);
        self.scheduler.post(Box::pin(async move {
            if comms_started {
                tracing::debug!(%flight_id, "stopping flight comms");
                let outcome = this.client.flights().end_flight_comms(&flight_id).await;
                this.inner().flags.end_flight_comms = false;
                if let Some(e) = outcome.as_error() {
                    tracing::warn!(error = %e, "failed to stop flight comms");
                }
            }
            tracing::debug!(%flight_id, "ending flight");
            let outcome = this.client.flights().end_flight(&flight_id).await;
            if let Some(e) = outcome.as_error() {
                tracing::warn!(error = %e, flight_id = %flight_id, "failed to end flight");
            }
            done(Outcome::value(()));
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AnonymousAuth, Authenticator, PasswordAuth, RenewAuth};
    use crate::client::{
        Client, FlightPlanCreate, FlightPlans, FlightSearch, Flights, Pilots, Telemetry, Traffic,
    };
    use crate::schedule::HandleScheduler;
    use aerogate_core::models::{Aircraft, Pilot, Token};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::oneshot;

    struct MockState {
        calls: StdMutex<Vec<String>>,
        active_flights: StdMutex<Vec<Flight>>,
        fail_end_flight: AtomicBool,
        auth_gate: StdMutex<Option<oneshot::Receiver<()>>>,
        create_gate: StdMutex<Option<oneshot::Receiver<()>>>,
        telemetry_sent: StdMutex<Vec<(String, String, Position)>>,
    }

    impl MockState {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: StdMutex::new(Vec::new()),
                active_flights: StdMutex::new(Vec::new()),
                fail_end_flight: AtomicBool::new(false),
                auth_gate: StdMutex::new(None),
                create_gate: StdMutex::new(None),
                telemetry_sent: StdMutex::new(Vec::new()),
            })
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.calls()
                .iter()
                .filter(|call| call.starts_with(prefix))
                .count()
        }

        async fn wait_gate(gate: &StdMutex<Option<oneshot::Receiver<()>>>) {
            let receiver = gate.lock().unwrap().take();
            if let Some(receiver) = receiver {
                let _ = receiver.await;
            }
        }
    }

    struct MockAuth(Arc<MockState>);

    #[async_trait]
    impl Authenticator for MockAuth {
        fn current(&self) -> Option<Token> {
            None
        }

        async fn authenticate_anonymously(&self, params: AnonymousAuth) -> Outcome<Token, Error> {
            self.0.record(format!("authenticate:{}", params.id));
            MockState::wait_gate(&self.0.auth_gate).await;
            Outcome::value(Token::Anonymous {
                id: "jwt".to_string(),
                issued_at: Utc::now(),
            })
        }

        async fn authenticate_with_password(&self, _: PasswordAuth) -> Outcome<Token, Error> {
            Outcome::error(Error::Authentication("not scripted".to_string()))
        }

        async fn renew_authentication(&self, _: RenewAuth) -> Outcome<Token, Error> {
            Outcome::error(Error::Authentication("not scripted".to_string()))
        }
    }

    struct MockPilots(Arc<MockState>);

    #[async_trait]
    impl Pilots for MockPilots {
        async fn current(&self) -> Outcome<Pilot, Error> {
            self.0.record("pilot");
            Outcome::value(Pilot {
                id: "pilot-1".to_string(),
                first_name: None,
                last_name: None,
            })
        }

        async fn aircrafts(&self, _: &str) -> Outcome<Vec<Aircraft>, Error> {
            Outcome::value(Vec::new())
        }
    }

    struct MockFlights(Arc<MockState>);

    #[async_trait]
    impl Flights for MockFlights {
        async fn search(&self, params: FlightSearch) -> Outcome<Vec<Flight>, Error> {
            self.0.record(format!("search:{}", params.pilot_id));
            Outcome::value(self.0.active_flights.lock().unwrap().clone())
        }

        async fn end_flight(&self, id: &str) -> Outcome<(), Error> {
            self.0.record(format!("end_flight:{id}"));
            if self.0.fail_end_flight.load(Ordering::SeqCst) {
                return Outcome::error(Error::transport("end refused"));
            }
            Outcome::value(())
        }

        async fn start_flight_comms(&self, id: &str) -> Outcome<String, Error> {
            self.0.record(format!("start_comms:{id}"));
            Outcome::value("key-K".to_string())
        }

        async fn end_flight_comms(&self, id: &str) -> Outcome<(), Error> {
            self.0.record(format!("end_comms:{id}"));
            Outcome::value(())
        }
    }

    struct MockFlightPlans(Arc<MockState>);

    #[async_trait]
    impl FlightPlans for MockFlightPlans {
        async fn create(&self, params: FlightPlanCreate) -> Outcome<FlightPlan, Error> {
            self.0.record("create_plan");
            MockState::wait_gate(&self.0.create_gate).await;
            Outcome::value(FlightPlan {
                id: "plan-1".to_string(),
                flight_id: None,
                pilot_id: params.pilot_id,
                takeoff: aerogate_core::models::Coordinate {
                    latitude: params.takeoff_latitude,
                    longitude: params.takeoff_longitude,
                },
                altitude_agl_min: params.altitude_agl_min,
                altitude_agl_max: params.altitude_agl_max,
                buffer: params.buffer,
                geometry: params.geometry,
                start_time: params.start_time,
                end_time: params.end_time,
            })
        }

        async fn submit(&self, id: &str) -> Outcome<FlightPlan, Error> {
            self.0.record(format!("submit_plan:{id}"));
            let now = Utc::now();
            Outcome::value(FlightPlan {
                id: id.to_string(),
                flight_id: Some("flight-F".to_string()),
                pilot_id: "pilot-1".to_string(),
                takeoff: aerogate_core::models::Coordinate {
                    latitude: 0.0,
                    longitude: 0.0,
                },
                altitude_agl_min: 0.0,
                altitude_agl_max: 100.0,
                buffer: 25.0,
                geometry: Geometry::Point(aerogate_core::models::Coordinate {
                    latitude: 0.0,
                    longitude: 0.0,
                }),
                start_time: now,
                end_time: now,
            })
        }
    }

    struct MockTraffic(Arc<MockState>);

    #[async_trait]
    impl Traffic for MockTraffic {
        async fn monitor(&self, flight_id: &str) -> Outcome<Arc<TrafficMonitor>, Error> {
            self.0.record(format!("monitor:{flight_id}"));
            Outcome::value(Arc::new(TrafficMonitor::new(flight_id)))
        }
    }

    struct MockTelemetry(Arc<MockState>);

    #[async_trait]
    impl Telemetry for MockTelemetry {
        async fn submit_update(
            &self,
            flight_id: &str,
            key: &str,
            position: Position,
        ) -> Outcome<(), Error> {
            self.0.record(format!("telemetry:{flight_id}"));
            self.0.telemetry_sent.lock().unwrap().push((
                flight_id.to_string(),
                key.to_string(),
                position,
            ));
            Outcome::value(())
        }
    }

    struct MockClient {
        state: Arc<MockState>,
        auth: MockAuth,
        pilots: MockPilots,
        flights: MockFlights,
        flight_plans: MockFlightPlans,
        traffic: MockTraffic,
        telemetry: MockTelemetry,
    }

    impl MockClient {
        fn new() -> Arc<Self> {
            let state = MockState::new();
            Arc::new(Self {
                auth: MockAuth(Arc::clone(&state)),
                pilots: MockPilots(Arc::clone(&state)),
                flights: MockFlights(Arc::clone(&state)),
                flight_plans: MockFlightPlans(Arc::clone(&state)),
                traffic: MockTraffic(Arc::clone(&state)),
                telemetry: MockTelemetry(Arc::clone(&state)),
                state,
            })
        }
    }

    impl Client for MockClient {
        fn authenticator(&self) -> &dyn Authenticator {
            &self.auth
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
    }

    fn submitter(client: &Arc<MockClient>) -> Arc<TelemetrySubmitter> {
        TelemetrySubmitter::create(
            Arc::clone(client) as Arc<dyn Client>,
            Arc::new(HandleScheduler::current()),
            "AIRCRAFT-1",
            None,
        )
    }

    fn fix(latitude: f64, longitude: f64) -> Position {
        Position {
            latitude,
            longitude,
            altitude_msl: 80.0,
            timestamp: Utc::now(),
        }
    }

    fn square() -> Geometry {
        Geometry::Polygon(vec![
            aerogate_core::models::Coordinate {
                latitude: 33.68,
                longitude: -117.82,
            },
            aerogate_core::models::Coordinate {
                latitude: 33.69,
                longitude: -117.82,
            },
            aerogate_core::models::Coordinate {
                latitude: 33.69,
                longitude: -117.81,
            },
        ])
    }

    /// Let spawned step tasks drain on the current-thread runtime.
    async fn settle() {
        for _ in 0..64 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn full_workflow_sends_one_packet_per_sample() {
        let client = MockClient::new();
        let sub = submitter(&client);

        sub.set_mission_geometry(square());
        sub.submit(fix(33.68, -117.82));
        sub.activate();
        settle().await;

        assert_eq!(
            client.state.calls(),
            vec![
                "authenticate:AIRCRAFT-1",
                "pilot",
                "search:pilot-1",
                "create_plan",
                "submit_plan:plan-1",
                "monitor:flight-F",
                "start_comms:flight-F",
            ]
        );

        sub.submit(fix(33.681, -117.821));
        settle().await;

        let sent = client.state.telemetry_sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "flight-F");
        assert_eq!(sent[0].1, "key-K");
    }

    #[tokio::test]
    async fn stale_flights_end_before_plan_creation() {
        let client = MockClient::new();
        client.state.active_flights.lock().unwrap().push(Flight {
            id: "flight-0".to_string(),
            pilot_id: Some("pilot-1".to_string()),
            created_at: None,
        });
        let sub = submitter(&client);

        sub.set_mission_geometry(square());
        sub.submit(fix(33.68, -117.82));
        sub.activate();
        settle().await;

        let calls = client.state.calls();
        let ended = calls.iter().position(|c| c == "end_flight:flight-0");
        let created = calls.iter().position(|c| c == "create_plan");
        assert!(ended.is_some(), "stale flight was not ended: {calls:?}");
        assert!(created.is_some(), "plan was not created: {calls:?}");
        assert!(ended < created, "cleanup must precede plan creation");
    }

    #[tokio::test]
    async fn deactivation_makes_pending_authorization_inert() {
        let client = MockClient::new();
        let (release, gate) = oneshot::channel();
        *client.state.auth_gate.lock().unwrap() = Some(gate);
        let sub = submitter(&client);

        sub.set_mission_geometry(square());
        sub.submit(fix(33.68, -117.82));
        sub.activate();
        settle().await;
        assert_eq!(client.state.count("authenticate"), 1);

        sub.deactivate();
        release.send(()).ok();
        settle().await;

        assert_eq!(sub.state(), State::Inactive);
        assert_eq!(client.state.count("pilot"), 0, "chain progressed after deactivate");
        assert!(client.state.count("end_flight") == 0 && client.state.count("end_comms") == 0);
    }

    #[tokio::test]
    async fn duplicate_step_requests_are_suppressed() {
        let client = MockClient::new();
        let (release, gate) = oneshot::channel();
        *client.state.create_gate.lock().unwrap() = Some(gate);
        let sub = submitter(&client);

        sub.activate();
        settle().await;
        // Enrollment stalls at plan creation: no geometry or fix yet.
        assert_eq!(client.state.count("create_plan"), 0);

        sub.set_mission_geometry(square());
        sub.submit(fix(33.68, -117.82));
        sub.submit(fix(33.681, -117.821));
        sub.submit(fix(33.682, -117.822));
        settle().await;
        assert_eq!(
            client.state.count("create_plan"),
            1,
            "plan creation dispatched more than once while in flight"
        );

        release.send(()).ok();
        settle().await;
        assert_eq!(client.state.count("create_plan"), 1);
        assert_eq!(client.state.count("start_comms"), 1);
    }

    #[tokio::test]
    async fn activate_and_deactivate_are_idempotent() {
        let client = MockClient::new();
        let sub = submitter(&client);

        sub.set_mission_geometry(square());
        sub.submit(fix(33.68, -117.82));
        sub.activate();
        sub.activate();
        settle().await;
        assert_eq!(client.state.count("authenticate"), 1);

        sub.deactivate();
        sub.deactivate();
        settle().await;

        let calls = client.state.calls();
        let comms = calls.iter().position(|c| c == "end_comms:flight-F");
        let ended = calls.iter().position(|c| c == "end_flight:flight-F");
        assert_eq!(client.state.count("end_comms"), 1);
        assert_eq!(client.state.count("end_flight:flight-F"), 1);
        assert!(comms < ended, "comms must stop before the flight ends");
        assert_eq!(sub.state(), State::Inactive);
    }

    #[tokio::test]
    async fn teardown_failure_does_not_block_deactivation() {
        let client = MockClient::new();
        let sub = submitter(&client);

        sub.set_mission_geometry(square());
        sub.submit(fix(33.68, -117.82));
        sub.activate();
        settle().await;

        client.state.fail_end_flight.store(true, Ordering::SeqCst);
        sub.deactivate();
        settle().await;

        assert_eq!(sub.state(), State::Inactive);
        // Exactly one attempt, no retry.
        assert_eq!(client.state.count("end_flight:flight-F"), 1);
    }

    #[tokio::test]
    async fn duplicate_dispatch_reports_suppressed() {
        let client = MockClient::new();
        let (release, gate) = oneshot::channel();
        *client.state.auth_gate.lock().unwrap() = Some(gate);
        let sub = submitter(&client);

        sub.activate();
        settle().await;
        assert_eq!(client.state.count("authenticate"), 1);

        // First request still gated; a second is dropped, not a failure.
        let second = sub.request_authorization();
        assert!(matches!(second, Err(ref e) if e.is_suppressed()));

        release.send(()).ok();
        settle().await;
        assert_eq!(client.state.count("authenticate"), 1);
    }

    #[tokio::test]
    async fn deactivate_completion_follows_teardown() {
        let client = MockClient::new();
        let sub = submitter(&client);

        sub.set_mission_geometry(square());
        sub.submit(fix(33.68, -117.82));
        sub.activate();
        settle().await;

        let recorder = Arc::clone(&client.state);
        sub.deactivate_then(Box::new(move |_| recorder.record("teardown_done")));
        settle().await;

        let calls = client.state.calls();
        let ended = calls.iter().position(|c| c == "end_flight:flight-F");
        let done = calls.iter().position(|c| c == "teardown_done");
        assert!(ended.is_some(), "flight was not ended: {calls:?}");
        assert!(done.is_some(), "completion never fired: {calls:?}");
        assert!(ended < done, "completion fired before the flight ended");

        // Already inactive: completion fires immediately, no new requests.
        let recorder = Arc::clone(&client.state);
        sub.deactivate_then(Box::new(move |_| recorder.record("idle_done")));
        assert_eq!(client.state.count("idle_done"), 1);
        assert_eq!(client.state.count("end_flight:flight-F"), 1);
    }

    #[tokio::test]
    async fn samples_while_inactive_are_retained_not_sent() {
        let client = MockClient::new();
        let sub = submitter(&client);

        sub.submit(fix(33.68, -117.82));
        settle().await;
        assert!(client.state.calls().is_empty());

        // The retained fix seeds plan creation once activated.
        sub.set_mission_geometry(square());
        sub.activate();
        settle().await;
        assert_eq!(client.state.count("create_plan"), 1);
    }
}
