//! Output feeds: the master feed and geofenced views of it.
//!
//! Every feed owns one [`AircraftTable`] and subscribes to the shared poller.
//! Geofenced feeds only apply the reports inside their box.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::aircraft::DataVersion;
use crate::aircraft_table::{AircraftSnapshot, AircraftTable};
use crate::config::SettingsStore;
use crate::geofence::{CentreOn, GeofenceBounds, GeofenceFeedOption};
use crate::id_allocator::IdentifierAllocator;
use crate::poller::{BatchListener, FeedPoller, PilotBatch, SubscriptionId};
use crate::reference::ReferenceData;
use crate::vatsim::PilotReport;

/// Name of the unfiltered feed
pub const MASTER_FEED_NAME: &str = "VATSIM";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedStatus::Disconnected => write!(f, "Disconnected"),
            FeedStatus::Connecting => write!(f, "Connecting"),
            FeedStatus::Connected => write!(f, "Connected"),
        }
    }
}

/// Shared services every feed is built from
#[derive(Clone)]
pub struct FeedContext {
    pub poller: FeedPoller,
    pub allocator: Arc<IdentifierAllocator>,
    pub versions: Arc<DataVersion>,
    pub reference: Arc<dyn ReferenceData>,
    pub settings: SettingsStore,
}

struct FeedInner {
    name: String,
    geofence: Option<GeofenceFeedOption>,
    table: AircraftTable,
    poller: FeedPoller,
    reference: Arc<dyn ReferenceData>,
    settings: SettingsStore,
    subscription: Mutex<Option<SubscriptionId>>,
    /// Box for coordinate and airport centres, which do not move
    static_bounds: Mutex<Option<GeofenceBounds>>,
}

/// Cheap to clone; clones share one feed.
#[derive(Clone)]
pub struct Feed {
    inner: Arc<FeedInner>,
}

/// Subscribed on the poller on behalf of a feed without keeping it alive
struct FeedSubscriber(Weak<FeedInner>);

impl BatchListener for FeedSubscriber {
    fn on_batch(&self, batch: &PilotBatch) {
        if let Some(feed) = self.0.upgrade() {
            feed.handle_batch_at(batch, Utc::now());
        }
    }
}

impl Feed {
    pub fn master(context: &FeedContext) -> Self {
        Self::build(MASTER_FEED_NAME.to_string(), None, context)
    }

    pub fn geofenced(option: GeofenceFeedOption, context: &FeedContext) -> Self {
        Self::build(option.feed_name.clone(), Some(option), context)
    }

    fn build(name: String, geofence: Option<GeofenceFeedOption>, context: &FeedContext) -> Self {
        let table = AircraftTable::new(
            name.clone(),
            Arc::clone(&context.allocator),
            Arc::clone(&context.versions),
            Arc::clone(&context.reference),
            context.settings.clone(),
        );

        Self {
            inner: Arc::new(FeedInner {
                name,
                geofence,
                table,
                poller: context.poller.clone(),
                reference: Arc::clone(&context.reference),
                settings: context.settings.clone(),
                subscription: Mutex::new(None),
                static_bounds: Mutex::new(None),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// `None` for the master feed
    pub fn geofence(&self) -> Option<&GeofenceFeedOption> {
        self.inner.geofence.as_ref()
    }

    /// Whether both handles refer to the same feed
    pub fn ptr_eq(&self, other: &Feed) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.subscription.lock().is_some()
    }

    /// Subscribes to the poller and starts tracking. No-op when connected.
    pub fn connect(&self) {
        let mut subscription = self.inner.subscription.lock();
        if subscription.is_some() {
            return;
        }

        self.inner.table.start();
        let subscriber = FeedSubscriber(Arc::downgrade(&self.inner));
        *subscription = Some(self.inner.poller.subscribe(Arc::new(subscriber)));
        info!(feed = %self.inner.name, "Feed connected");
    }

    /// Unsubscribes and discards the feed's aircraft. No-op when disconnected.
    pub fn disconnect(&self) {
        let Some(id) = self.inner.subscription.lock().take() else {
            return;
        };

        self.inner.poller.unsubscribe(id);
        self.inner.table.stop();
        info!(feed = %self.inner.name, "Feed disconnected");
    }

    pub fn status(&self) -> FeedStatus {
        if !self.inner.settings.current().enabled || !self.is_connected() {
            return FeedStatus::Disconnected;
        }

        let poller = &self.inner.poller;
        if !poller.has_data() {
            FeedStatus::Connecting
        } else if poller.is_running() {
            FeedStatus::Connected
        } else {
            FeedStatus::Disconnected
        }
    }

    pub fn take_snapshot(&self) -> AircraftSnapshot {
        self.inner.table.take_snapshot()
    }

    pub fn take_snapshot_at(&self, now: DateTime<Utc>) -> AircraftSnapshot {
        self.inner.table.take_snapshot_at(now)
    }

    /// Re-derives settings-dependent fields after a settings change.
    pub fn apply_options(&self) {
        self.inner.table.apply_options();
    }

    /// Number of tracked records, visible or not
    pub fn aircraft_count(&self) -> usize {
        self.inner.table.len()
    }

    #[cfg(test)]
    fn handle_batch_at(&self, batch: &PilotBatch, now: DateTime<Utc>) {
        self.inner.handle_batch_at(batch, now);
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("name", &self.inner.name)
            .field("geofence", &self.inner.geofence)
            .field("status", &self.status())
            .finish()
    }
}

impl FeedInner {
    fn handle_batch_at(&self, batch: &PilotBatch, now: DateTime<Utc>) {
        // a fetch that completed after stop is dropped here
        if !self.poller.is_running() {
            return;
        }

        let Some(option) = &self.geofence else {
            self.table.apply_pilot_reports_at(batch, now);
            return;
        };

        let inside: Vec<PilotReport> = match self.bounds(option, batch) {
            Some(bounds) => batch
                .iter()
                .filter(|report| bounds.is_within_bounds(report.latitude, report.longitude))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        debug!(feed = %self.name, pilots = inside.len(), "Geofence applied");
        if inside.is_empty() {
            self.table.remove_expired_at(now);
        } else {
            self.table.apply_pilot_reports_at(&inside, now);
        }
    }

    /// Current box, or `None` when its centre cannot be found
    fn bounds(&self, option: &GeofenceFeedOption, batch: &[PilotReport]) -> Option<GeofenceBounds> {
        if option.centre_on == CentreOn::Pilot {
            return batch
                .iter()
                .find(|report| report.cid == option.pilot_cid)
                .map(|pilot| option.bounds_around(pilot.latitude, pilot.longitude));
        }

        let mut cached = self.static_bounds.lock();
        if let Some(bounds) = *cached {
            return Some(bounds);
        }

        let bounds = match option.centre_on {
            CentreOn::Airport => match self.reference.airport(&option.airport_code) {
                Ok(Some(airport)) => option.bounds_around(airport.latitude, airport.longitude),
                Ok(None) => {
                    debug!(feed = %self.name, airport = %option.airport_code, "Geofence airport not found");
                    return None;
                }
                Err(e) => {
                    warn!(feed = %self.name, airport = %option.airport_code, error = %e, "Geofence airport lookup failed");
                    return None;
                }
            },
            _ => option.bounds_around(option.latitude, option.longitude),
        };

        *cached = Some(bounds);
        Some(bounds)
    }
}
