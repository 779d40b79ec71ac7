//! Simulated vehicle tracks for exercising the telemetry workflow.

use std::f64::consts::PI;

use aerogate_core::models::{Coordinate, Geometry, Position};
use chrono::Utc;

const EARTH_DEGREE_M: f64 = 111_320.0;

/// A vehicle orbiting a center point at constant speed and altitude.
pub struct CircularOrbit {
    pub center_lat: f64,
    pub center_lon: f64,
    pub radius_m: f64,
    pub altitude_msl: f64,
    pub speed_mps: f64,
    period_secs: f64,
}

impl CircularOrbit {
    pub fn new(
        center_lat: f64,
        center_lon: f64,
        radius_m: f64,
        altitude_msl: f64,
        speed_mps: f64,
    ) -> Self {
        let circumference = 2.0 * PI * radius_m;
        Self {
            center_lat,
            center_lon,
            radius_m,
            altitude_msl,
            speed_mps,
            period_secs: circumference / speed_mps,
        }
    }

    /// Position `t` seconds into the orbit, stamped with the current time.
    pub fn sample(&self, t: f64) -> Position {
        let angle = 2.0 * PI * t / self.period_secs;
        let dlat = self.radius_m * angle.cos() / EARTH_DEGREE_M;
        let dlon =
            self.radius_m * angle.sin() / (EARTH_DEGREE_M * self.center_lat.to_radians().cos());
        Position {
            latitude: self.center_lat + dlat,
            longitude: self.center_lon + dlon,
            altitude_msl: self.altitude_msl,
            timestamp: Utc::now(),
        }
    }

    /// Square mission geometry bounding the orbit, with a small margin.
    pub fn boundary(&self) -> Geometry {
        let margin = self.radius_m * 1.2;
        let dlat = margin / EARTH_DEGREE_M;
        let dlon = margin / (EARTH_DEGREE_M * self.center_lat.to_radians().cos());
        Geometry::Polygon(vec![
            Coordinate {
                latitude: self.center_lat - dlat,
                longitude: self.center_lon - dlon,
            },
            Coordinate {
                latitude: self.center_lat - dlat,
                longitude: self.center_lon + dlon,
            },
            Coordinate {
                latitude: self.center_lat + dlat,
                longitude: self.center_lon + dlon,
            },
            Coordinate {
                latitude: self.center_lat + dlat,
                longitude: self.center_lon - dlon,
            },
        ])
    }
}
