//! Tracked aircraft records and the process-wide data version counter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::VatsimSettings;
use crate::reference::{AircraftTypeInfo, EngineType, Species, WakeTurbulenceCategory};

/// Squawks that declare an emergency: hijack, radio failure, general emergency
const EMERGENCY_SQUAWKS: [&str; 3] = ["7500", "7600", "7700"];

/// Monotonic version stamped on a record every time one of its fields is updated.
///
/// Shared by every table so that versions are unique across feeds.
#[derive(Debug, Default)]
pub struct DataVersion {
    current: AtomicU64,
}

impl DataVersion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next version. Strictly greater than every version handed out before.
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Highest version handed out so far
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

/// One pilot tracked by a feed, keyed on its synthetic id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedAircraft {
    /// Synthetic fixed-range address allocated for the pilot
    pub id: u32,
    pub pilot_cid: i64,

    pub callsign: String,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_feet: i32,
    pub heading: i32,
    pub ground_speed_knots: i32,
    pub squawk: String,
    pub pressure_mb: i32,
    pub pressure_in_hg: f64,
    pub server: String,

    pub registration: String,
    pub operator_icao: String,
    pub airline_icao: String,
    pub airline_name: String,
    /// Mode-S code from the remarks, else the synthetic id in hex
    pub icao24: String,

    pub type_code: String,
    pub manufacturer: String,
    pub model: String,
    pub engine_type: EngineType,
    pub engine_count: u8,
    pub species: Species,
    pub wake_category: WakeTurbulenceCategory,

    pub origin_code: String,
    pub origin: String,
    pub destination_code: String,
    pub destination: String,
    pub route: String,
    pub remarks: String,

    pub on_ground: bool,
    pub emergency: bool,

    pub first_seen: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub data_version: u64,

    /// Type metadata behind `manufacturer`/`model`, kept for re-deriving options
    #[serde(skip)]
    pub(crate) type_info: Option<AircraftTypeInfo>,
}

impl TrackedAircraft {
    pub fn new(id: u32, pilot_cid: i64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            pilot_cid,
            callsign: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            altitude_feet: 0,
            heading: 0,
            ground_speed_knots: 0,
            squawk: String::new(),
            pressure_mb: 0,
            pressure_in_hg: 0.0,
            server: String::new(),
            registration: String::new(),
            operator_icao: String::new(),
            airline_icao: String::new(),
            airline_name: String::new(),
            icao24: synthetic_icao24(id),
            type_code: String::new(),
            manufacturer: String::new(),
            model: String::new(),
            engine_type: EngineType::Unknown,
            engine_count: 0,
            species: Species::Unknown,
            wake_category: WakeTurbulenceCategory::Unknown,
            origin_code: String::new(),
            origin: String::new(),
            destination_code: String::new(),
            destination: String::new(),
            route: String::new(),
            remarks: String::new(),
            on_ground: false,
            emergency: false,
            first_seen: now,
            last_update: now,
            data_version: 0,
            type_info: None,
        }
    }

    /// Seconds since the last report, as of `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_update)
    }

    /// Copies type metadata into the record and re-derives the model.
    pub(crate) fn apply_type_info(
        &mut self,
        info: Option<AircraftTypeInfo>,
        settings: &VatsimSettings,
    ) {
        match &info {
            Some(info) => {
                self.manufacturer = info.manufacturer.clone();
                self.engine_type = info.engine_type;
                self.engine_count = info.engine_count;
                self.species = info.species;
                self.wake_category = info.wake_category;
            }
            None => {
                self.manufacturer.clear();
                self.engine_type = EngineType::Unknown;
                self.engine_count = 0;
                self.species = Species::Unknown;
                self.wake_category = WakeTurbulenceCategory::Unknown;
            }
        }
        self.type_info = info;
        self.derive_model(settings);
    }

    pub(crate) fn derive_model(&mut self, settings: &VatsimSettings) {
        self.model = match &self.type_info {
            Some(info) if settings.infer_model_from_type => info.model.clone(),
            _ => String::new(),
        };
    }

    pub(crate) fn derive_on_ground(&mut self, settings: &VatsimSettings) {
        self.on_ground = settings.assume_slow_aircraft_on_ground
            && self.ground_speed_knots <= settings.slow_aircraft_threshold_knots;
    }
}

pub fn synthetic_icao24(id: u32) -> String {
    format!("{:06X}", id)
}

pub fn is_emergency_squawk(squawk: &str) -> bool {
    EMERGENCY_SQUAWKS.contains(&squawk.trim())
}
