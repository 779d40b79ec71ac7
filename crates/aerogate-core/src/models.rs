//! Domain models consumed by the flight workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single georeferenced vehicle fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude above mean sea level in meters.
    pub altitude_msl: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// Mission geometry used for flight-plan creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Coordinate),
    Path(Vec<Coordinate>),
    Polygon(Vec<Coordinate>),
}

/// The pilot responsible for a flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pilot {
    pub id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// An aircraft registered to a pilot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aircraft {
    pub id: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// A flight created on successful plan submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flight {
    pub id: String,
    #[serde(default)]
    pub pilot_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A plan for a flight, prior to and after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightPlan {
    pub id: String,
    /// Set once the plan has been submitted.
    #[serde(default)]
    pub flight_id: Option<String>,
    pub pilot_id: String,
    pub takeoff: Coordinate,
    pub altitude_agl_min: f64,
    pub altitude_agl_max: f64,
    /// Buffer around the geometry in meters.
    pub buffer: f64,
    pub geometry: Geometry,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// A traffic advisory concerning another aircraft near an active flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficUpdate {
    pub aircraft_id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude_msl: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Immutable input to client creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    #[serde(default)]
    pub oauth: Option<OAuthCredentials>,
    #[serde(default)]
    pub anonymous: Option<AnonymousCredentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymousCredentials {
    /// Operator-chosen identifier the anonymous token is minted for.
    pub id: String,
}

impl Credentials {
    pub fn anonymous(api_key: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            oauth: None,
            anonymous: Some(AnonymousCredentials { id: id.into() }),
        }
    }
}

/// An authentication token with a variant origin.
///
/// The bearer string sent on the wire is `id()`. Newer tokens supersede
/// older ones for the same credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Token {
    Anonymous {
        id: String,
        issued_at: DateTime<Utc>,
    },
    OAuth {
        id: String,
        access: String,
        refresh: String,
        issued_at: DateTime<Utc>,
    },
    Refreshed {
        id: String,
        expires_in_secs: i64,
        issued_at: DateTime<Utc>,
    },
}

impl Token {
    /// The bearer identifier presented on authorized requests.
    pub fn id(&self) -> &str {
        match self {
            Token::Anonymous { id, .. } => id,
            Token::OAuth { id, .. } => id,
            Token::Refreshed { id, .. } => id,
        }
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        match self {
            Token::Anonymous { issued_at, .. } => *issued_at,
            Token::OAuth { issued_at, .. } => *issued_at,
            Token::Refreshed { issued_at, .. } => *issued_at,
        }
    }

    /// Whether this token replaces `other` as the canonical token.
    pub fn supersedes(&self, other: &Token) -> bool {
        self.issued_at() >= other.issued_at()
    }
}
