//! Geofenced feed options and the rectangular containment test.
//!
//! A geofenced feed republishes only the pilots inside a box of the configured
//! width and height. The box is centred on an airport, a fixed coordinate or the
//! current position of one particular pilot.

use anyhow::{Result, bail, ensure};
use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6371.0088;
const KM_PER_STATUTE_MILE: f64 = 1.609_344;
const KM_PER_NAUTICAL_MILE: f64 = 1.852;

/// What a geofenced feed is centred on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CentreOn {
    #[default]
    Coordinate,
    Airport,
    Pilot,
}

impl std::fmt::Display for CentreOn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CentreOn::Coordinate => write!(f, "coordinate"),
            CentreOn::Airport => write!(f, "airport"),
            CentreOn::Pilot => write!(f, "pilot"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceUnit {
    #[default]
    Kilometres,
    StatuteMiles,
    NauticalMiles,
}

impl DistanceUnit {
    pub fn to_kilometres(self, distance: f64) -> f64 {
        match self {
            DistanceUnit::Kilometres => distance,
            DistanceUnit::StatuteMiles => distance * KM_PER_STATUTE_MILE,
            DistanceUnit::NauticalMiles => distance * KM_PER_NAUTICAL_MILE,
        }
    }
}

/// Configuration of one geofenced feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceFeedOption {
    pub feed_name: String,
    #[serde(default)]
    pub centre_on: CentreOn,
    /// ICAO code, used when centred on an airport
    #[serde(default)]
    pub airport_code: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    /// Network id of the pilot to follow, used when centred on a pilot
    #[serde(default)]
    pub pilot_cid: i64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub distance_unit: DistanceUnit,
}

impl GeofenceFeedOption {
    /// Fails on the first invalid field.
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.feed_name.trim().is_empty(), "Feed name is required");
        ensure!(
            self.width > 0.0 && self.height > 0.0,
            "Feed {}: width and height must be positive",
            self.feed_name
        );
        match self.centre_on {
            CentreOn::Airport if self.airport_code.trim().is_empty() => bail!(
                "Feed {}: an airport code is required when centred on an airport",
                self.feed_name
            ),
            CentreOn::Pilot if self.pilot_cid <= 0 => bail!(
                "Feed {}: a pilot CID is required when centred on a pilot",
                self.feed_name
            ),
            CentreOn::Coordinate
                if !(-90.0..=90.0).contains(&self.latitude)
                    || !(-180.0..=180.0).contains(&self.longitude) =>
            {
                bail!("Feed {}: centre coordinate is out of range", self.feed_name)
            }
            _ => Ok(()),
        }
    }

    /// The box around `(latitude, longitude)` with this option's dimensions.
    pub fn bounds_around(&self, latitude: f64, longitude: f64) -> GeofenceBounds {
        GeofenceBounds::around(
            latitude,
            longitude,
            self.distance_unit.to_kilometres(self.width),
            self.distance_unit.to_kilometres(self.height),
        )
    }
}

/// Latitude/longitude box. Longitudes may wrap across the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceBounds {
    pub centre_latitude: f64,
    pub centre_longitude: f64,
    pub half_height_degrees: f64,
    pub half_width_degrees: f64,
}

impl GeofenceBounds {
    pub fn around(latitude: f64, longitude: f64, width_km: f64, height_km: f64) -> Self {
        let half_height_degrees = (height_km / 2.0 / EARTH_RADIUS_KM).to_degrees();

        // east/west extent is measured along the centre's parallel
        let parallel_radius = EARTH_RADIUS_KM * latitude.to_radians().cos();
        let half_width_degrees = if parallel_radius <= f64::EPSILON {
            180.0
        } else {
            (width_km / 2.0 / parallel_radius).to_degrees().min(180.0)
        };

        Self {
            centre_latitude: latitude,
            centre_longitude: longitude,
            half_height_degrees,
            half_width_degrees,
        }
    }

    pub fn is_within_bounds(&self, latitude: f64, longitude: f64) -> bool {
        if (latitude - self.centre_latitude).abs() > self.half_height_degrees {
            return false;
        }

        let mut delta = (longitude - self.centre_longitude) % 360.0;
        if delta > 180.0 {
            delta -= 360.0;
        } else if delta < -180.0 {
            delta += 360.0;
        }
        delta.abs() <= self.half_width_degrees
    }
}
