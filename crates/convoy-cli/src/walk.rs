//! Walking route implementations for the simulator.

use std::f64::consts::PI;

use convoy_core::geo::offset_by_bearing;

/// Trait for walking route implementations.
pub trait Route: Send + Sync {
    /// Get (lat, lng) at time t seconds from start.
    fn position_at(&self, t: f64) -> (f64, f64);

    /// Get walking speed in meters per second.
    fn speed_mps(&self) -> f64;
}

/// Loop around a trailhead. The pace-keeping members walk this.
pub struct LoopRoute {
    pub center_lat: f64,
    pub center_lng: f64,
    pub radius_m: f64,
    pub speed_mps: f64,
    pub start_angle: f64,
    period: f64,
}

impl LoopRoute {
    pub fn new(
        center_lat: f64,
        center_lng: f64,
        radius_m: f64,
        speed_mps: f64,
        start_angle: f64,
    ) -> Self {
        let circumference = 2.0 * PI * radius_m;
        let period = circumference / speed_mps;

        Self {
            center_lat,
            center_lng,
            radius_m,
            speed_mps,
            start_angle,
            period,
        }
    }

    /// Seconds for one full loop.
    pub fn period(&self) -> f64 {
        self.period
    }
}

impl Route for LoopRoute {
    fn position_at(&self, t: f64) -> (f64, f64) {
        let angle = self.start_angle + 2.0 * PI * t / self.period;
        offset_by_bearing(self.center_lat, self.center_lng, self.radius_m, angle)
    }

    fn speed_mps(&self) -> f64 {
        self.speed_mps
    }
}

/// Walk straight away from a starting point on a fixed bearing. The
/// member who falls behind the group walks this.
pub struct DriftRoute {
    pub start_lat: f64,
    pub start_lng: f64,
    pub bearing_rad: f64,
    pub speed_mps: f64,
}

impl DriftRoute {
    pub fn new(start_lat: f64, start_lng: f64, bearing_rad: f64, speed_mps: f64) -> Self {
        Self {
            start_lat,
            start_lng,
            bearing_rad,
            speed_mps,
        }
    }
}

impl Route for DriftRoute {
    fn position_at(&self, t: f64) -> (f64, f64) {
        offset_by_bearing(
            self.start_lat,
            self.start_lng,
            self.speed_mps * t.max(0.0),
            self.bearing_rad,
        )
    }

    fn speed_mps(&self) -> f64 {
        self.speed_mps
    }
}
