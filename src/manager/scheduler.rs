//! Periodic refresh of one registry record
//!
//! Each record gets its own tokio task: an immediate refresh on start, then
//! one attempt per interval tick. Manual refreshes are commands sent to the
//! same task, so every cycle for a record runs there and `stop()` joining the
//! task guarantees no commit can land after it returns. The record's
//! compare-and-set gate makes a cycle skip rather than queue when the
//! previous one is still running.

use std::sync::Arc;

use futures::future;
use log::{debug, info, warn};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{RegistryError, Result};
use crate::manager::record::{RegistryRecord, RegistrySnapshot, Repository, TagInfo};
use crate::registry::RegistryApi;

pub struct RefreshScheduler {
    shutdown: watch::Sender<bool>,
    commands: mpsc::Sender<oneshot::Sender<bool>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    /// Spawns the refresh task for `record`. Must be called from within a
    /// tokio runtime.
    pub fn start(record: Arc<RegistryRecord>, client: Arc<dyn RegistryApi>) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let (commands, mut command_rx) = mpsc::channel::<oneshot::Sender<bool>>(1);
        let interval = record.refresh_interval();

        let handle = tokio::spawn(async move {
            run_refresh(&record, client.as_ref()).await;

            if interval.is_zero() {
                // Periodic refresh disabled; serve manual cycles until
                // cancelled.
                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => break,
                        Some(reply) = command_rx.recv() => {
                            let ran = run_refresh(&record, client.as_ref()).await;
                            let _ = reply.send(ran);
                        }
                    }
                }
                return;
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval resolves immediately, and the
            // initial refresh already ran.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        run_refresh(&record, client.as_ref()).await;
                    }
                    Some(reply) = command_rx.recv() => {
                        let ran = run_refresh(&record, client.as_ref()).await;
                        let _ = reply.send(ran);
                    }
                }
            }
        });

        Self {
            shutdown,
            commands,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Runs one refresh cycle on the scheduler's task, outside the schedule.
    /// Returns false when the cycle was skipped because one was already in
    /// flight, or when the scheduler is already stopping.
    pub async fn refresh_now(&self) -> bool {
        let (reply, response) = oneshot::channel();
        if self.commands.send(reply).await.is_err() {
            return false;
        }
        response.await.unwrap_or(false)
    }

    /// Signals the refresh task and waits for it to finish. An in-flight
    /// cycle, scheduled or manual, runs to completion first, so once this
    /// returns the record will never be written again. Concurrent callers all
    /// block until the task is joined.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut handle = self.handle.lock().await;
        if let Some(handle) = handle.take() {
            let _ = handle.await;
        }
    }
}

/// One refresh attempt. Returns false when another cycle already holds the
/// record's gate and this one was skipped.
async fn run_refresh(record: &RegistryRecord, client: &dyn RegistryApi) -> bool {
    if !record.begin_refresh() {
        debug!("{}: refresh already in flight, skipping", record.identity());
        return false;
    }

    match fetch_snapshot(client).await {
        Ok(snapshot) => {
            info!(
                "{}: refreshed {} repositories, {} tags",
                record.identity(),
                snapshot.repository_count(),
                snapshot.tag_count()
            );
            record.commit(snapshot);
        }
        Err(err) => {
            warn!("{}: refresh failed: {}", record.identity(), err);
            record.record_failure(&err);
        }
    }

    record.end_refresh();
    true
}

/// Builds a complete snapshot: catalog, then tags and manifests fanned out per
/// repository. All-or-nothing: any failure aborts the whole cycle, so a
/// snapshot never mixes data of different ages.
async fn fetch_snapshot(client: &dyn RegistryApi) -> Result<RegistrySnapshot> {
    let mut names = client.list_repositories().await?;
    names.sort();

    let repositories = future::try_join_all(
        names
            .into_iter()
            .map(|name| fetch_repository(client, name)),
    )
    .await?;

    Ok(RegistrySnapshot { repositories })
}

async fn fetch_repository(client: &dyn RegistryApi, name: String) -> Result<Repository> {
    let mut tag_names = client.list_tags(&name).await?;
    tag_names.sort();

    let tags = future::try_join_all(tag_names.into_iter().map(|tag| {
        let repository = name.clone();
        async move {
            let manifest = client.manifest(&repository, &tag).await?;
            Ok::<_, RegistryError>(TagInfo {
                name: tag,
                manifest,
            })
        }
    }))
    .await?;

    Ok(Repository { name, tags })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::record::{RegistryIdentity, RegistrySettings, Scheme};
    use async_trait::async_trait;

    struct EmptyRegistry;

    #[async_trait]
    impl RegistryApi for EmptyRegistry {
        async fn list_repositories(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn list_tags(&self, _repository: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn manifest(
            &self,
            _repository: &str,
            _reference: &str,
        ) -> Result<crate::registry::ManifestSummary> {
            Err(RegistryError::Protocol("no manifests".to_string()))
        }
    }

    fn record() -> RegistryRecord {
        let identity = RegistryIdentity::new(Scheme::Http, "localhost", 5000).unwrap();
        RegistryRecord::new(RegistrySettings::new(identity))
    }

    #[tokio::test]
    async fn refresh_skips_when_gate_is_held() {
        let record = record();
        assert!(record.begin_refresh());
        assert!(!run_refresh(&record, &EmptyRegistry).await);
        record.end_refresh();
        assert!(run_refresh(&record, &EmptyRegistry).await);
    }

    #[tokio::test]
    async fn manual_refresh_runs_on_scheduler_task() {
        let record = Arc::new(record());
        let scheduler = RefreshScheduler::start(Arc::clone(&record), Arc::new(EmptyRegistry));
        assert!(scheduler.refresh_now().await);

        scheduler.stop().await;
        assert!(!scheduler.refresh_now().await);
    }

    #[tokio::test]
    async fn refresh_commits_empty_catalog() {
        let record = record();
        assert!(run_refresh(&record, &EmptyRegistry).await);
        let (snapshot, health) = record.snapshot();
        assert_eq!(snapshot.repository_count(), 0);
        assert!(health.last_success.is_some());
        assert!(!health.refreshing);
    }
}
