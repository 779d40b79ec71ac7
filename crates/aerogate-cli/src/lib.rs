//! Aerogate CLI - operator tools for the airspace authorization service.
//!
//! Binaries:
//! - stream_telemetry: run the full enrollment workflow and stream a
//!   simulated orbit as live telemetry
//! - fetch_token: mint an anonymous token and print it

pub mod sim;

pub use sim::CircularOrbit;
