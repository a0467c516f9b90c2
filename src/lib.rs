//! VATSIM pilot feed
//!
//! Polls the VATSIM network's live data feed, gives every pilot a stable
//! synthetic aircraft address and keeps a table of tracked aircraft per output
//! feed. Geofenced feeds republish the pilots inside a box around an airport,
//! a coordinate or another pilot.

pub mod aircraft;
pub mod aircraft_table;
pub mod config;
pub mod endpoint;
pub mod feed;
pub mod geofence;
pub mod id_allocator;
pub mod log_format;
pub mod plugin;
pub mod poller;
pub mod reference;
pub mod remarks;
pub mod snapshot;
pub mod vatsim;

pub use aircraft::{DataVersion, TrackedAircraft};
pub use aircraft_table::{AircraftSnapshot, AircraftTable};
pub use config::{SettingsStore, VatsimSettings};
pub use endpoint::{EndpointSelector, choose_random_url};
pub use feed::{Feed, FeedStatus, MASTER_FEED_NAME};
pub use geofence::{CentreOn, DistanceUnit, GeofenceFeedOption};
pub use id_allocator::{AllocationError, IdentifierAllocator};
pub use plugin::VatsimPlugin;
pub use poller::{BatchListener, FeedPoller, PilotBatch, SubscriptionId};
pub use reference::{NoReferenceData, ReferenceData, StandingData};
pub use remarks::VatsimRemarks;
pub use vatsim::{HttpVatsimSource, PilotReport, PollError, VatsimSource};
