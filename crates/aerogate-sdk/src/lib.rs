//! Aerogate SDK - client toolkit for the airspace authorization service.
//!
//! The SDK is built around an asynchronous execution [`context::Context`]
//! that dispatches request/response pairs across pluggable
//! [`schedule::Scheduler`] backends. On top of it sit the credential and
//! token lifecycle ([`auth`]), the decorated HTTP requester ([`request`]),
//! the resource clients ([`client`]) and the flight telemetry workflow
//! state machine ([`submitter`]).

pub mod auth;
pub mod client;
pub mod context;
pub mod request;
pub mod rest;
pub mod schedule;
pub mod submitter;
pub mod traffic;

pub use client::{Client, ClientConfig, RestClient};
pub use context::{Context, ReturnCode};
pub use submitter::TelemetrySubmitter;
