//! Reference data lookups: airports, airlines and aircraft types.
//!
//! The host owns the real databases; tables only see the [`ReferenceData`]
//! trait. [`StandingData`] is a small in-memory implementation used by the
//! binary and by tests.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Airport {
    pub icao: String,
    pub name: String,
    pub location: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl Airport {
    /// `EGLL London Heathrow, London`
    pub fn describe(&self) -> String {
        match &self.location {
            Some(location) if !location.is_empty() => {
                format!("{} {}, {}", self.icao, self.name, location)
            }
            _ => format!("{} {}", self.icao, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Airline {
    pub icao: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineType {
    #[default]
    Unknown,
    Piston,
    Turboprop,
    Jet,
    Electric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Species {
    #[default]
    Unknown,
    LandPlane,
    SeaPlane,
    Amphibian,
    Helicopter,
    Gyrocopter,
    TiltWing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WakeTurbulenceCategory {
    #[default]
    Unknown,
    Light,
    Medium,
    Heavy,
    Super,
}

/// Metadata for an ICAO type designator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftTypeInfo {
    pub designator: String,
    pub manufacturer: String,
    pub model: String,
    pub engine_type: EngineType,
    pub engine_count: u8,
    pub species: Species,
    pub wake_category: WakeTurbulenceCategory,
}

pub trait ReferenceData: Send + Sync {
    fn airport(&self, icao: &str) -> Result<Option<Airport>>;

    /// Airline operating `callsign`, keyed on its leading ICAO designator
    fn airline_for_callsign(&self, callsign: &str) -> Result<Option<Airline>>;

    fn aircraft_type(&self, designator: &str) -> Result<Option<AircraftTypeInfo>>;
}

/// Lookups that never find anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReferenceData;

impl ReferenceData for NoReferenceData {
    fn airport(&self, _icao: &str) -> Result<Option<Airport>> {
        Ok(None)
    }

    fn airline_for_callsign(&self, _callsign: &str) -> Result<Option<Airline>> {
        Ok(None)
    }

    fn aircraft_type(&self, _designator: &str) -> Result<Option<AircraftTypeInfo>> {
        Ok(None)
    }
}

/// In-memory reference data keyed on upper-case codes
#[derive(Debug, Clone, Default)]
pub struct StandingData {
    airports: HashMap<String, Airport>,
    airlines: HashMap<String, Airline>,
    aircraft_types: HashMap<String, AircraftTypeInfo>,
}

/// On-disk layout of a standing data file
#[derive(Debug, Default, Deserialize, Serialize)]
struct StandingDataFile {
    #[serde(default)]
    airports: Vec<Airport>,
    #[serde(default)]
    airlines: Vec<Airline>,
    #[serde(default)]
    aircraft_types: Vec<AircraftTypeInfo>,
}

impl StandingData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads airports, airlines and aircraft types from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let file: StandingDataFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        let data = file.airports.into_iter().fold(Self::new(), Self::with_airport);
        let data = file.airlines.into_iter().fold(data, Self::with_airline);
        let data = file
            .aircraft_types
            .into_iter()
            .fold(data, Self::with_aircraft_type);
        tracing::info!(
            airports = data.airports.len(),
            airlines = data.airlines.len(),
            aircraft_types = data.aircraft_types.len(),
            "Loaded standing data"
        );
        Ok(data)
    }

    pub fn with_airport(mut self, mut airport: Airport) -> Self {
        airport.icao = airport.icao.trim().to_uppercase();
        self.airports.insert(airport.icao.clone(), airport);
        self
    }

    pub fn with_airline(mut self, mut airline: Airline) -> Self {
        airline.icao = airline.icao.trim().to_uppercase();
        self.airlines.insert(airline.icao.clone(), airline);
        self
    }

    pub fn with_aircraft_type(mut self, mut info: AircraftTypeInfo) -> Self {
        info.designator = info.designator.trim().to_uppercase();
        self.aircraft_types.insert(info.designator.clone(), info);
        self
    }
}

/// Leading three-letter ICAO airline designator of a callsign, if it has one
pub fn airline_designator(callsign: &str) -> Option<&str> {
    let prefix = callsign.get(..3)?;
    let is_designator = prefix.chars().all(|c| c.is_ascii_uppercase())
        && callsign[3..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());
    is_designator.then_some(prefix)
}

impl ReferenceData for StandingData {
    fn airport(&self, icao: &str) -> Result<Option<Airport>> {
        Ok(self.airports.get(&icao.trim().to_uppercase()).cloned())
    }

    fn airline_for_callsign(&self, callsign: &str) -> Result<Option<Airline>> {
        let Some(designator) = airline_designator(callsign.trim()) else {
            return Ok(None);
        };
        Ok(self.airlines.get(&designator.to_uppercase()).cloned())
    }

    fn aircraft_type(&self, designator: &str) -> Result<Option<AircraftTypeInfo>> {
        Ok(self
            .aircraft_types
            .get(&designator.trim().to_uppercase())
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standing_data() -> StandingData {
        StandingData::new()
            .with_airport(Airport {
                icao: "EGLL".to_string(),
                name: "London Heathrow".to_string(),
                location: Some("London".to_string()),
                latitude: 51.4706,
                longitude: -0.4619,
            })
            .with_airline(Airline {
                icao: "BAW".to_string(),
                name: "British Airways".to_string(),
            })
            .with_aircraft_type(AircraftTypeInfo {
                designator: "A320".to_string(),
                manufacturer: "Airbus".to_string(),
                model: "A320".to_string(),
                engine_type: EngineType::Jet,
                engine_count: 2,
                species: Species::LandPlane,
                wake_category: WakeTurbulenceCategory::Medium,
            })
    }

    #[test]
    fn test_airline_designator() {
        assert_eq!(airline_designator("BAW123"), Some("BAW"));
        assert_eq!(airline_designator("BAW12A"), Some("BAW"));
        assert_eq!(airline_designator("GABCD"), None);
        assert_eq!(airline_designator("N123AB"), None);
        assert_eq!(airline_designator("BA"), None);
        assert_eq!(airline_designator("ÄÖÜ1"), None);
    }

    #[test]
    fn test_code_lookups_ignore_case() {
        let data = standing_data();

        let airport = data.airport("egll").unwrap().unwrap();
        assert_eq!(airport.describe(), "EGLL London Heathrow, London");

        let airline = data.airline_for_callsign("baw123").unwrap();
        assert!(airline.is_none(), "lower-case callsigns are not designators");
        let airline = data.airline_for_callsign("BAW123").unwrap().unwrap();
        assert_eq!(airline.name, "British Airways");

        let info = data.aircraft_type("a320").unwrap().unwrap();
        assert_eq!(info.engine_count, 2);
    }

    #[test]
    fn test_load_standing_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("standing.json");
        std::fs::write(
            &path,
            r#"{
                "airports": [
                    {"icao": "lfpg", "name": "Charles de Gaulle", "location": "Paris",
                     "latitude": 49.0097, "longitude": 2.5479}
                ],
                "aircraft_types": [
                    {"designator": "B738", "manufacturer": "Boeing", "model": "737-800",
                     "engine_type": "jet", "engine_count": 2, "species": "land_plane",
                     "wake_category": "medium"}
                ]
            }"#,
        )
        .unwrap();

        let data = StandingData::load(&path).unwrap();
        assert_eq!(
            data.airport("LFPG").unwrap().unwrap().describe(),
            "LFPG Charles de Gaulle, Paris"
        );
        let info = data.aircraft_type("B738").unwrap().unwrap();
        assert_eq!(info.engine_type, EngineType::Jet);
        assert!(data.airline_for_callsign("AFR12").unwrap().is_none());

        assert!(StandingData::load(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_unknown_codes() {
        let data = standing_data();
        assert!(data.airport("KJFK").unwrap().is_none());
        assert!(data.aircraft_type("").unwrap().is_none());
        assert!(NoReferenceData.airport("EGLL").unwrap().is_none());
    }
}
