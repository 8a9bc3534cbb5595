//! Concurrent group orchestrator.
//!
//! Each vehicle-day group is analysed on the blocking pool inside a
//! [`JoinSet`], with a [`Semaphore`] bounding how many run at once. Groups
//! share nothing; the only common sink is the [`SessionStore`].
//!
//! A semaphore permit lives as long as the blocking worker, so a group that
//! timed out still counts against the limit until its worker returns. The
//! worker and the waiting task race on a per-group flag before the save:
//! a group reported as timed out is never stored, and a group whose save has
//! begun is waited for and reported normally.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use telemetry_core::error::{Result, TelemetryError};
use telemetry_data::analysis::{analyze_group, AnalysisConfig};
use telemetry_data::reader::{find_log_files, group_files, load_group, FileGroup};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::store::SessionStore;

// ── Public types ──────────────────────────────────────────────────────────────

/// Restricts a run to one vehicle and/or one date.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupFilter {
    pub vehicle: Option<String>,
    pub date: Option<NaiveDate>,
}

impl GroupFilter {
    pub fn matches(&self, group: &FileGroup) -> bool {
        self.vehicle.as_deref().map_or(true, |v| v == group.vehicle)
            && self.date.map_or(true, |d| d == group.date)
    }
}

/// How one group ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GroupStatus {
    Completed {
        sessions: usize,
        valid_sessions: usize,
        events: usize,
    },
    Failed {
        error: String,
    },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOutcome {
    /// `VEHICLE_YYYYMMDD`.
    pub key: String,
    pub vehicle: String,
    pub date: NaiveDate,
    #[serde(flatten)]
    pub status: GroupStatus,
}

impl GroupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, GroupStatus::Completed { .. })
    }
}

/// Summary of one orchestrator run, groups ordered by key.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files_found: usize,
    pub groups: Vec<GroupOutcome>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.groups.iter().filter(|g| g.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.groups.len() - self.succeeded()
    }

    pub fn total_events(&self) -> usize {
        self.groups
            .iter()
            .map(|g| match g.status {
                GroupStatus::Completed { events, .. } => events,
                _ => 0,
            })
            .sum()
    }
}

// ── GroupOrchestrator ─────────────────────────────────────────────────────────

/// Runs the analysis pipeline over many groups concurrently.
pub struct GroupOrchestrator {
    config: Arc<AnalysisConfig>,
    store: Arc<dyn SessionStore>,
    concurrency: usize,
    group_timeout: Option<Duration>,
}

impl GroupOrchestrator {
    /// `concurrency` is clamped to at least 1.
    pub fn new(config: AnalysisConfig, store: Arc<dyn SessionStore>, concurrency: usize) -> Self {
        Self {
            config: Arc::new(config),
            store,
            concurrency: concurrency.max(1),
            group_timeout: None,
        }
    }

    /// Give up waiting on a group after `timeout`; the group is reported as
    /// timed out and its result is not stored.
    pub fn with_group_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.group_timeout = timeout;
        self
    }

    /// Discover, group, filter and process every log file under `data_dir`.
    pub async fn run_dir(&self, data_dir: &Path, filter: &GroupFilter) -> Result<RunSummary> {
        if !data_dir.is_dir() {
            return Err(TelemetryError::DataPathNotFound(data_dir.to_path_buf()));
        }
        let files = find_log_files(data_dir);
        let groups: Vec<FileGroup> = group_files(&files)
            .into_iter()
            .filter(|g| filter.matches(g))
            .collect();
        debug!(
            "Found {} log files, {} groups after filtering",
            files.len(),
            groups.len()
        );

        let mut summary = self.run(groups).await;
        summary.files_found = files.len();
        Ok(summary)
    }

    /// Process the given groups and wait for all of them.
    pub async fn run(&self, groups: Vec<FileGroup>) -> RunSummary {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<GroupOutcome> = JoinSet::new();

        for group in groups {
            let semaphore = Arc::clone(&semaphore);
            let config = Arc::clone(&self.config);
            let store = Arc::clone(&self.store);
            let timeout = self.group_timeout;

            tasks.spawn(async move {
                let permit = semaphore.acquire_owned().await.ok();
                let key = group.key();
                let (vehicle, date) = (group.vehicle.clone(), group.date);
                let committed = Arc::new(AtomicBool::new(false));
                let worker_committed = Arc::clone(&committed);

                let mut work = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    process_group(&group, &config, store.as_ref(), &worker_committed)
                });
                let joined = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, &mut work).await {
                        Ok(done) => Some(done),
                        // Save already under way.
                        Err(_) if committed.swap(true, Ordering::AcqRel) => Some(work.await),
                        Err(_) => None,
                    },
                    None => Some(work.await),
                };

                let status = match joined {
                    None => {
                        warn!("{}: timed out", key);
                        GroupStatus::TimedOut
                    }
                    Some(Err(e)) => GroupStatus::Failed {
                        error: format!("worker panicked: {}", e),
                    },
                    Some(Ok(Err(e))) => {
                        warn!("{}: {}", key, e);
                        GroupStatus::Failed {
                            error: e.to_string(),
                        }
                    }
                    Some(Ok(Ok(status))) => status,
                };
                GroupOutcome {
                    key,
                    vehicle,
                    date,
                    status,
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!("Group task failed to join: {}", e),
            }
        }
        outcomes.sort_by(|a, b| a.key.cmp(&b.key));

        let summary = RunSummary {
            files_found: 0,
            groups: outcomes,
            elapsed: started.elapsed(),
        };
        info!(
            "Processed {} groups: {} succeeded, {} failed, {} events",
            summary.groups.len(),
            summary.succeeded(),
            summary.failed(),
            summary.total_events()
        );
        summary
    }
}

/// Load, analyse and store one group. Runs on the blocking pool.
///
/// The result is stored only if this call is first to set `committed`.
fn process_group(
    group: &FileGroup,
    config: &AnalysisConfig,
    store: &dyn SessionStore,
    committed: &AtomicBool,
) -> Result<GroupStatus> {
    let inputs = load_group(group)?;
    let result = analyze_group(&inputs, config)?;
    if committed.swap(true, Ordering::AcqRel) {
        debug!("{}: abandoned after timeout, result not stored", group.key());
        return Ok(GroupStatus::TimedOut);
    }
    store.save_group(&result)?;
    Ok(GroupStatus::Completed {
        sessions: result.metadata.sessions_correlated,
        valid_sessions: result.metadata.valid_sessions,
        events: result.metadata.events_detected,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
