//! The process-wide directory of configured registries
//!
//! [`RegistryManager`] owns every [`RegistryRecord`] and the lifecycle of its
//! refresh scheduler. The directory itself sits behind one mutex; each
//! record's snapshot is guarded independently, so refreshing one registry
//! never blocks reads or refreshes of another. No await happens while the
//! directory lock is held.

pub mod record;
pub mod scheduler;

pub use record::{
    DEFAULT_REFRESH_INTERVAL, RegistryCredentials, RegistryHealth, RegistryIdentity,
    RegistryRecord, RegistrySettings, RegistrySnapshot, RegistryStatus, Repository, Scheme,
    TagInfo,
};
pub use scheduler::RefreshScheduler;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::info;

use crate::error::{RegistryError, Result};
use crate::registry::client::DEFAULT_CALL_TIMEOUT;
use crate::registry::{HttpRegistryClient, RegistryApi};

struct ManagedRegistry {
    record: Arc<RegistryRecord>,
    scheduler: Arc<RefreshScheduler>,
}

pub struct RegistryManager {
    records: Mutex<HashMap<RegistryIdentity, ManagedRegistry>>,
    call_timeout: Duration,
}

impl RegistryManager {
    pub fn new() -> Self {
        Self::with_call_timeout(DEFAULT_CALL_TIMEOUT)
    }

    /// `call_timeout` bounds every network call made during a refresh cycle;
    /// it should stay shorter than the refresh interval.
    pub fn with_call_timeout(call_timeout: Duration) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            call_timeout,
        }
    }

    fn build_client(&self, settings: &RegistrySettings) -> Result<Arc<dyn RegistryApi>> {
        let client = HttpRegistryClient::builder(settings.identity.base_url())
            .with_credentials(settings.credentials.clone())
            .with_skip_tls(settings.skip_tls)
            .with_timeout(self.call_timeout)
            .build()?;
        Ok(Arc::new(client))
    }

    /// Registers a registry and starts its refresh schedule. The record is
    /// accepted immediately with an empty snapshot; the scheduler's initial
    /// refresh fills it in or records the error, so a transient outage never
    /// blocks configuration.
    pub fn add_registry(&self, settings: RegistrySettings) -> Result<Arc<RegistryRecord>> {
        let client = self.build_client(&settings)?;
        self.add_registry_with_client(settings, client)
    }

    /// Same as [`add_registry`](Self::add_registry) with an explicit client,
    /// the seam tests use to inject an instrumented registry.
    pub fn add_registry_with_client(
        &self,
        settings: RegistrySettings,
        client: Arc<dyn RegistryApi>,
    ) -> Result<Arc<RegistryRecord>> {
        let record = Arc::new(RegistryRecord::new(settings));
        let mut records = self.records.lock().expect("registry directory lock poisoned");
        match records.entry(record.identity().clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateRegistry(record.identity().clone())),
            Entry::Vacant(slot) => {
                let scheduler = Arc::new(RefreshScheduler::start(Arc::clone(&record), client));
                slot.insert(ManagedRegistry {
                    record: Arc::clone(&record),
                    scheduler,
                });
                info!("added registry {}", record.identity());
                Ok(record)
            }
        }
    }

    /// Registers a registry from a `scheme://[user:password@]host:port`
    /// connection string.
    pub fn add_registry_url(
        &self,
        raw: &str,
        refresh_interval: Duration,
        skip_tls: bool,
    ) -> Result<Arc<RegistryRecord>> {
        let settings = RegistrySettings::from_url(raw, refresh_interval, skip_tls)?;
        self.add_registry(settings)
    }

    /// Stops the registry's scheduler and drops its record. Blocks until any
    /// in-flight refresh, scheduled or manual, has drained, so nothing can
    /// write into the record after this returns.
    pub async fn remove_registry(&self, identity: &RegistryIdentity) -> Result<()> {
        let entry = {
            let mut records = self.records.lock().expect("registry directory lock poisoned");
            records
                .remove(identity)
                .ok_or_else(|| RegistryError::NotFound(identity.clone()))?
        };
        entry.scheduler.stop().await;
        info!("removed registry {}", identity);
        Ok(())
    }

    pub fn get_registry(&self, identity: &RegistryIdentity) -> Result<Arc<RegistryRecord>> {
        let records = self.records.lock().expect("registry directory lock poisoned");
        records
            .get(identity)
            .map(|entry| Arc::clone(&entry.record))
            .ok_or_else(|| RegistryError::NotFound(identity.clone()))
    }

    /// Point-in-time listing of all records, ordered by identity. Safe to
    /// call while refreshes are running.
    pub fn list_registries(&self) -> Vec<Arc<RegistryRecord>> {
        let mut list: Vec<_> = {
            let records = self.records.lock().expect("registry directory lock poisoned");
            records
                .values()
                .map(|entry| Arc::clone(&entry.record))
                .collect()
        };
        list.sort_by(|a, b| a.identity().cmp(b.identity()));
        list
    }

    /// Runs one refresh cycle immediately, outside the schedule. The cycle
    /// executes on the registry's scheduler task, so a later
    /// [`remove_registry`](Self::remove_registry) still drains it. Returns
    /// false when a cycle was already in flight and this one was skipped.
    pub async fn refresh_registry(&self, identity: &RegistryIdentity) -> Result<bool> {
        let scheduler = {
            let records = self.records.lock().expect("registry directory lock poisoned");
            let entry = records
                .get(identity)
                .ok_or_else(|| RegistryError::NotFound(identity.clone()))?;
            Arc::clone(&entry.scheduler)
        };
        Ok(scheduler.refresh_now().await)
    }

    /// Replaces a registry's settings, restarting its schedule. The last
    /// snapshot and health carry over to the new record; when the identity is
    /// not configured yet this behaves like `add_registry`.
    pub async fn update_registry(&self, settings: RegistrySettings) -> Result<Arc<RegistryRecord>> {
        let client = self.build_client(&settings)?;
        self.update_registry_with_client(settings, client).await
    }

    pub async fn update_registry_with_client(
        &self,
        settings: RegistrySettings,
        client: Arc<dyn RegistryApi>,
    ) -> Result<Arc<RegistryRecord>> {
        let identity = settings.identity.clone();
        let previous = {
            let records = self.records.lock().expect("registry directory lock poisoned");
            records
                .get(&identity)
                .map(|entry| (Arc::clone(&entry.record), Arc::clone(&entry.scheduler)))
        };

        let Some((old_record, old_scheduler)) = previous else {
            return self.add_registry_with_client(settings, client);
        };

        // The old entry stays in the directory while its schedule winds down:
        // readers keep getting the last snapshot, and a concurrent add still
        // sees the identity as taken.
        old_scheduler.stop().await;
        let (snapshot, health) = old_record.snapshot();
        let record = Arc::new(RegistryRecord::restore(settings, snapshot, health));

        let mut records = self.records.lock().expect("registry directory lock poisoned");
        if let Some(entry) = records.get(&identity) {
            if !Arc::ptr_eq(&entry.record, &old_record) {
                // Removed and re-registered while the old schedule was
                // stopping; leave the new registration alone.
                return Err(RegistryError::DuplicateRegistry(identity));
            }
        }
        let scheduler = Arc::new(RefreshScheduler::start(Arc::clone(&record), client));
        records.insert(
            identity.clone(),
            ManagedRegistry {
                record: Arc::clone(&record),
                scheduler,
            },
        );
        info!("updated registry {}", identity);
        Ok(record)
    }

    /// Stops every scheduler, draining in-flight refreshes
    pub async fn shutdown(&self) {
        let entries: Vec<ManagedRegistry> = {
            let mut records = self.records.lock().expect("registry directory lock poisoned");
            records.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.scheduler.stop().await;
        }
    }
}

impl Default for RegistryManager {
    fn default() -> Self {
        Self::new()
    }
}
