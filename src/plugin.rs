//! Owner of every service instance: one poller, one allocator and the feeds.
//!
//! Feeds are reconciled against the settings the same way data streams are
//! reconciled against their config file: feeds that disappeared are
//! disconnected, changed ones are recreated, new ones are added.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::aircraft::DataVersion;
use crate::config::{SettingsStore, VatsimSettings};
use crate::feed::{Feed, FeedContext, MASTER_FEED_NAME};
use crate::geofence::GeofenceFeedOption;
use crate::id_allocator::IdentifierAllocator;
use crate::poller::FeedPoller;
use crate::reference::ReferenceData;
use crate::vatsim::VatsimSource;

pub struct VatsimPlugin {
    context: FeedContext,
    master: Feed,
    geofenced: Mutex<Vec<Feed>>,
    started: AtomicBool,
}

impl VatsimPlugin {
    pub fn new(
        settings: VatsimSettings,
        source: Arc<dyn VatsimSource>,
        reference: Arc<dyn ReferenceData>,
    ) -> Result<Self> {
        settings.validate()?;

        let allocator = IdentifierAllocator::new(
            settings.id_range_start,
            settings.id_range_end,
            settings.preferred_memory_capacity,
        )
        .context("Failed to create identifier allocator")?;

        let settings = SettingsStore::new(settings);
        let context = FeedContext {
            poller: FeedPoller::new(source, settings.clone()),
            allocator: Arc::new(allocator),
            versions: Arc::new(DataVersion::new()),
            reference,
            settings,
        };
        let master = Feed::master(&context);

        let plugin = Self {
            context,
            master,
            geofenced: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        };
        plugin.refresh_feeds();
        Ok(plugin)
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.context.settings
    }

    pub fn poller(&self) -> &FeedPoller {
        &self.context.poller
    }

    pub fn allocator(&self) -> &Arc<IdentifierAllocator> {
        &self.context.allocator
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Connects every feed and starts polling if enabled. Needs a tokio runtime.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Starting VATSIM plugin");
        self.refresh_feeds();
    }

    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping VATSIM plugin");
        self.context.poller.stop();
        for feed in self.feeds() {
            feed.disconnect();
        }
    }

    /// `stop`, waiting for the poll task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        self.context.poller.shutdown().await;
    }

    /// Validates and publishes new settings, then reconciles the feeds.
    ///
    /// The identifier range is fixed for the lifetime of the plugin.
    pub fn update_settings(&self, settings: VatsimSettings) -> Result<()> {
        settings.validate()?;

        let current = self.context.settings.current();
        if (current.id_range_start, current.id_range_end)
            != (settings.id_range_start, settings.id_range_end)
        {
            warn!("Identifier range changes take effect after a restart");
        }

        self.context.settings.replace(settings);
        self.refresh_feeds();
        Ok(())
    }

    /// Brings feeds and the poller in line with the current settings.
    pub fn refresh_feeds(&self) {
        let settings = self.context.settings.current();
        let started = self.is_started();
        let desired = unique_feed_options(&settings.geofenced_feeds);

        let mut geofenced = self.geofenced.lock();

        // Drop feeds no longer configured or whose options changed
        geofenced.retain(|feed| {
            let keep = desired.iter().any(|option| feed.geofence() == Some(option));
            if !keep {
                info!(feed = %feed.name(), "Removing geofenced feed");
                feed.disconnect();
            }
            keep
        });

        let mut next = Vec::with_capacity(desired.len());
        for option in desired {
            let existing = geofenced
                .iter()
                .position(|feed| feed.geofence() == Some(&option));
            let feed = match existing {
                Some(index) => {
                    let feed = geofenced.swap_remove(index);
                    feed.apply_options();
                    feed
                }
                None => {
                    info!(feed = %option.feed_name, centre_on = %option.centre_on, "Adding geofenced feed");
                    Feed::geofenced(option, &self.context)
                }
            };
            next.push(feed);
        }
        *geofenced = next;
        self.master.apply_options();

        let run = started && settings.enabled;
        for feed in std::iter::once(&self.master).chain(geofenced.iter()) {
            if run {
                feed.connect();
            } else {
                feed.disconnect();
            }
        }
        drop(geofenced);

        if run {
            self.context.poller.start();
        } else {
            self.context.poller.stop();
        }
    }

    /// The master feed followed by every geofenced feed, in configuration order
    pub fn feeds(&self) -> Vec<Feed> {
        std::iter::once(self.master.clone())
            .chain(self.geofenced.lock().iter().cloned())
            .collect()
    }

    pub fn master_feed(&self) -> Feed {
        self.master.clone()
    }

    pub fn feed(&self, name: &str) -> Option<Feed> {
        self.feeds().into_iter().find(|feed| feed.name() == name)
    }
}

impl std::fmt::Debug for VatsimPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VatsimPlugin")
            .field("started", &self.is_started())
            .field("feeds", &self.feeds())
            .finish()
    }
}

/// Configured feeds with trimmed, unique names; first occurrence of each name wins
fn unique_feed_options(options: &[GeofenceFeedOption]) -> Vec<GeofenceFeedOption> {
    let mut names: HashSet<&str> = HashSet::from([MASTER_FEED_NAME]);
    let mut unique = Vec::new();
    for option in options {
        let name = option.feed_name.trim();
        if !names.insert(name) {
            warn!(feed = %name, "Ignoring geofenced feed with a duplicate name");
            continue;
        }
        unique.push(GeofenceFeedOption {
            feed_name: name.to_string(),
            ..option.clone()
        });
    }
    unique
}
