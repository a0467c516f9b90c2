//! Per-feed table of tracked aircraft.
//!
//! The live map is a copy-on-write snapshot: a new map is only published when
//! records are added or removed. Surviving records are mutated in place under
//! their own lock, which is safe because readers only ever see clones.
//!
//! Lock order is always table lock first, then record lock.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, trace};

use crate::aircraft::{DataVersion, TrackedAircraft, is_emergency_squawk, synthetic_icao24};
use crate::config::{SettingsStore, VatsimSettings};
use crate::id_allocator::{AllocationError, IdentifierAllocator};
use crate::reference::ReferenceData;
use crate::remarks::VatsimRemarks;
use crate::snapshot::SnapshotCell;
use crate::vatsim::{FlightPlan, PilotReport};

type SharedRecord = Arc<Mutex<TrackedAircraft>>;

/// Called with the table name when a batch fails
pub type TableErrorListener = Arc<dyn Fn(&str, &anyhow::Error) + Send + Sync>;

/// Point-in-time copy of the visible aircraft
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AircraftSnapshot {
    pub aircraft: Vec<TrackedAircraft>,
    pub taken_at: DateTime<Utc>,
    /// Highest data version among `aircraft`, zero when empty
    pub max_data_version: u64,
}

pub struct AircraftTable {
    name: String,
    allocator: Arc<IdentifierAllocator>,
    versions: Arc<DataVersion>,
    reference: Arc<dyn ReferenceData>,
    settings: SettingsStore,
    tracking: AtomicBool,
    aircraft: SnapshotCell<HashMap<u32, SharedRecord>>,
    table_lock: Mutex<()>,
    error_listener: Mutex<Option<TableErrorListener>>,
}

impl AircraftTable {
    pub fn new(
        name: impl Into<String>,
        allocator: Arc<IdentifierAllocator>,
        versions: Arc<DataVersion>,
        reference: Arc<dyn ReferenceData>,
        settings: SettingsStore,
    ) -> Self {
        Self {
            name: name.into(),
            allocator,
            versions,
            reference,
            settings,
            tracking: AtomicBool::new(false),
            aircraft: SnapshotCell::default(),
            table_lock: Mutex::new(()),
            error_listener: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.load(Ordering::SeqCst)
    }

    pub fn set_error_listener<F>(&self, listener: F)
    where
        F: Fn(&str, &anyhow::Error) + Send + Sync + 'static,
    {
        *self.error_listener.lock() = Some(Arc::new(listener));
    }

    pub fn start(&self) {
        self.tracking.store(true, Ordering::SeqCst);
    }

    /// Stops tracking and discards every record.
    pub fn stop(&self) {
        self.tracking.store(false, Ordering::SeqCst);

        let _table = self.table_lock.lock();
        self.aircraft.store(HashMap::new());
        metrics::gauge!("vatsim.table.aircraft", "feed" => self.name.clone()).set(0.0);
    }

    /// Number of records in the table, including ones past the display timeout
    pub fn len(&self) -> usize {
        self.aircraft.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn apply_pilot_reports(&self, reports: &[PilotReport]) {
        self.apply_pilot_reports_at(reports, Utc::now());
    }

    /// Applies one batch as of `now`.
    ///
    /// A failure abandons the rest of the batch and is reported to the error
    /// listener. The table stays usable.
    pub fn apply_pilot_reports_at(&self, reports: &[PilotReport], now: DateTime<Utc>) {
        if !self.is_tracking() || reports.is_empty() {
            return;
        }

        let _table = self.table_lock.lock();
        if !self.is_tracking() {
            return;
        }

        if let Err(e) = self.process_batch(reports, now) {
            metrics::counter!("vatsim.table.batch_failed_total", "feed" => self.name.clone())
                .increment(1);
            error!(feed = %self.name, error = %e, "Failed to apply pilot batch");
            let listener = self.error_listener.lock().clone();
            if let Some(listener) = listener {
                listener(&self.name, &e);
            }
        }
    }

    /// Drops records older than the removal timeout without new input.
    pub fn remove_expired_at(&self, now: DateTime<Utc>) {
        if !self.is_tracking() {
            return;
        }
        let _table = self.table_lock.lock();
        let settings = self.settings.current();
        let current = self.aircraft.load();
        let removed = expired_ids(&current, now, &settings);
        self.publish(&current, HashMap::new(), &removed);
    }

    fn process_batch(&self, reports: &[PilotReport], now: DateTime<Utc>) -> Result<()> {
        let settings = self.settings.current();
        let current = self.aircraft.load();
        let mut added: HashMap<u32, SharedRecord> = HashMap::new();

        for report in reports {
            let id = match self.allocator.create_or_fetch(report.cid) {
                Ok(id) => id,
                Err(AllocationError::InvalidExternalId(cid)) => {
                    trace!(feed = %self.name, cid, callsign = %report.callsign, "Skipping report with invalid CID");
                    continue;
                }
                Err(e) => {
                    debug!(feed = %self.name, cid = report.cid, error = %e, "Pilot left untracked");
                    continue;
                }
            };

            let existing = current.get(&id).or_else(|| added.get(&id)).cloned();
            let record = match existing {
                Some(record) => record,
                None => {
                    let record = Arc::new(Mutex::new(TrackedAircraft::new(id, report.cid, now)));
                    added.insert(id, Arc::clone(&record));
                    record
                }
            };

            let mut aircraft = record.lock();
            self.update_record(&mut aircraft, report, &settings, now)
                .with_context(|| format!("Failed to update {} ({})", report.callsign, report.cid))?;
        }

        let removed = expired_ids(&current, now, &settings);
        self.publish(&current, added, &removed);
        Ok(())
    }

    /// Publishes a new map when records were added or removed.
    fn publish(
        &self,
        current: &HashMap<u32, SharedRecord>,
        added: HashMap<u32, SharedRecord>,
        removed: &HashSet<u32>,
    ) {
        if added.is_empty() && removed.is_empty() {
            return;
        }

        let mut next = current.clone();
        for id in removed {
            next.remove(id);
        }
        let added_count = added.len();
        next.extend(added);

        debug!(
            feed = %self.name,
            added = added_count,
            removed = removed.len(),
            total = next.len(),
            "Aircraft table updated"
        );
        metrics::gauge!("vatsim.table.aircraft", "feed" => self.name.clone()).set(next.len() as f64);
        self.aircraft.store(next);
    }

    fn update_record(
        &self,
        aircraft: &mut TrackedAircraft,
        report: &PilotReport,
        settings: &VatsimSettings,
        now: DateTime<Utc>,
    ) -> Result<()> {
        aircraft.data_version = self.versions.next();
        aircraft.last_update = now;

        aircraft.latitude = report.latitude;
        aircraft.longitude = report.longitude;
        aircraft.altitude_feet = report.altitude;
        aircraft.heading = report.heading;
        aircraft.ground_speed_knots = report.groundspeed;
        aircraft.squawk = report.transponder.trim().to_string();
        aircraft.emergency = is_emergency_squawk(&aircraft.squawk);
        aircraft.pressure_mb = report.qnh_mb;
        aircraft.pressure_in_hg = report.qnh_i_hg;
        aircraft.server = report.server.clone();
        aircraft.derive_on_ground(settings);

        // triggers are stored only once their lookup has succeeded
        if aircraft.callsign != report.callsign {
            let airline = self
                .reference
                .airline_for_callsign(&report.callsign)
                .context("Airline lookup failed")?;
            aircraft.callsign = report.callsign.clone();
            (aircraft.airline_icao, aircraft.airline_name) = airline
                .map(|airline| (airline.icao, airline.name))
                .unwrap_or_default();
        }

        let empty_plan = FlightPlan::default();
        let plan = report.flight_plan.as_ref().unwrap_or(&empty_plan);
        aircraft.route = plan.route.clone();

        if aircraft.remarks != plan.remarks {
            aircraft.remarks = plan.remarks.clone();
            apply_remarks(aircraft, settings);
        }

        let departure = plan.departure.trim();
        if aircraft.origin_code != departure {
            aircraft.origin = self.describe_airport(departure)?;
            aircraft.origin_code = departure.to_string();
        }

        let arrival = plan.arrival.trim();
        if aircraft.destination_code != arrival {
            aircraft.destination = self.describe_airport(arrival)?;
            aircraft.destination_code = arrival.to_string();
        }

        let type_code = plan.aircraft_short.trim();
        if aircraft.type_code != type_code {
            let info = if type_code.is_empty() {
                None
            } else {
                self.reference
                    .aircraft_type(type_code)
                    .with_context(|| format!("Aircraft type lookup failed for {}", type_code))?
            };
            aircraft.type_code = type_code.to_string();
            aircraft.apply_type_info(info, settings);
        }

        Ok(())
    }

    fn describe_airport(&self, code: &str) -> Result<String> {
        if code.is_empty() {
            return Ok(String::new());
        }
        let airport = self
            .reference
            .airport(code)
            .with_context(|| format!("Airport lookup failed for {}", code))?;
        Ok(airport.map_or_else(|| code.to_string(), |airport| airport.describe()))
    }

    pub fn take_snapshot(&self) -> AircraftSnapshot {
        self.take_snapshot_at(Utc::now())
    }

    /// Clones every record updated within the display timeout.
    pub fn take_snapshot_at(&self, now: DateTime<Utc>) -> AircraftSnapshot {
        let display_timeout = self.settings.current().display_timeout();
        let current = self.aircraft.load();

        let mut aircraft: Vec<TrackedAircraft> = current
            .values()
            .filter_map(|record| {
                let record = record.lock();
                (record.age(now) <= display_timeout).then(|| record.clone())
            })
            .collect();
        aircraft.sort_by_key(|a| a.id);

        let max_data_version = aircraft.iter().map(|a| a.data_version).max().unwrap_or(0);
        AircraftSnapshot {
            aircraft,
            taken_at: now,
            max_data_version,
        }
    }

    /// Re-derives settings-dependent fields of every record.
    pub fn apply_options(&self) {
        let _table = self.table_lock.lock();
        let settings = self.settings.current();

        for record in self.aircraft.load().values() {
            let mut aircraft = record.lock();
            let before = (
                aircraft.on_ground,
                aircraft.registration.clone(),
                aircraft.model.clone(),
            );

            aircraft.derive_on_ground(&settings);
            apply_remarks(&mut aircraft, &settings);
            aircraft.derive_model(&settings);

            if before != (aircraft.on_ground, aircraft.registration.clone(), aircraft.model.clone()) {
                aircraft.data_version = self.versions.next();
            }
        }
    }
}

impl std::fmt::Debug for AircraftTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AircraftTable")
            .field("name", &self.name)
            .field("tracking", &self.is_tracking())
            .field("aircraft", &self.len())
            .finish()
    }
}

fn expired_ids(
    records: &HashMap<u32, SharedRecord>,
    now: DateTime<Utc>,
    settings: &VatsimSettings,
) -> HashSet<u32> {
    let removal_timeout = settings.removal_timeout();
    records
        .iter()
        .filter(|(_, record)| record.lock().age(now) > removal_timeout)
        .map(|(id, _)| *id)
        .collect()
}

/// Registration, operator and address from the record's remarks text
fn apply_remarks(aircraft: &mut TrackedAircraft, settings: &VatsimSettings) {
    let remarks = VatsimRemarks::parse(&aircraft.remarks);

    let registration = remarks.registration();
    aircraft.registration = if registration.is_empty() && settings.show_invalid_registrations {
        remarks.get("REG").unwrap_or_default().trim().to_string()
    } else {
        registration
    };
    aircraft.operator_icao = remarks.operator_icao();

    let code = remarks.mode_s_code();
    aircraft.icao24 = if code.len() == 6 && code.chars().all(|c| c.is_ascii_hexdigit()) {
        code.to_ascii_uppercase()
    } else {
        synthetic_icao24(aircraft.id)
    };
}
