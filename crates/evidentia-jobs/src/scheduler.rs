//! In-process scheduler running linking and narrative drains on intervals.
//!
//! Deployments normally trigger both steps through the cron endpoints; the
//! scheduler covers single-binary setups. Each step runs at most once at a
//! time, a tick that arrives while the previous run is still going is
//! skipped, and shutdown waits for in-flight runs to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use evidentia_core::logging::subsystem;
use evidentia_core::{Error, Result};

use crate::config::SchedulerConfig;
use crate::linking::LinkingEngine;
use crate::narrative::NarrativeDrain;

/// Event emitted by the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    SchedulerStarted,
    LinkRunCompleted {
        linked: usize,
        failed: usize,
        skipped: usize,
        conflicts: usize,
        duration_ms: u64,
    },
    LinkRunFailed {
        error: String,
    },
    DrainCompleted {
        processed: usize,
        failed: usize,
        skipped: usize,
        duration_ms: u64,
    },
    DrainFailed {
        error: String,
    },
    SchedulerStopped,
}

/// Handle for controlling a running scheduler.
pub struct SchedulerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<SchedulerEvent>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signal shutdown and wait until in-flight runs have finished and the
    /// scheduler task has exited.
    pub async fn shutdown(self) -> Result<()> {
        // A send error means the loop already exited (e.g. disabled).
        if self.shutdown_tx.send(()).await.is_err() {
            debug!("Scheduler loop already exited");
        }
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Scheduler task failed: {e}")))
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Runs [`LinkingEngine`] and [`NarrativeDrain`] periodically.
pub struct PipelineScheduler {
    linking: Arc<LinkingEngine>,
    drain: Arc<NarrativeDrain>,
    config: SchedulerConfig,
    event_tx: broadcast::Sender<SchedulerEvent>,
}

impl PipelineScheduler {
    pub fn new(
        linking: Arc<LinkingEngine>,
        drain: Arc<NarrativeDrain>,
        config: SchedulerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(evidentia_core::defaults::EVENT_BUS_CAPACITY);
        Self {
            linking,
            drain,
            config,
            event_tx,
        }
    }

    /// Get a receiver for scheduler events.
    pub fn events(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the scheduler and return a handle for control.
    pub fn start(self) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        SchedulerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(subsystem = subsystem::SCHEDULER, component = "pipeline"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Pipeline scheduler is disabled, not starting");
            return;
        }

        info!(
            link_interval_secs = self.config.link_interval_secs,
            narrative_interval_secs = self.config.narrative_interval_secs,
            "Pipeline scheduler started"
        );
        let _ = self.event_tx.send(SchedulerEvent::SchedulerStarted);

        let mut link_tick = interval(Duration::from_secs(self.config.link_interval_secs.max(1)));
        link_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut drain_tick =
            interval(Duration::from_secs(self.config.narrative_interval_secs.max(1)));
        drain_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut link_runs: JoinSet<()> = JoinSet::new();
        let mut drain_runs: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Pipeline scheduler received shutdown signal");
                    break;
                }
                _ = link_tick.tick() => {
                    if link_runs.is_empty() {
                        link_runs.spawn(run_linking(self.linking.clone(), self.event_tx.clone()));
                    } else {
                        debug!("Linking run still in progress, tick skipped");
                    }
                }
                _ = drain_tick.tick() => {
                    if drain_runs.is_empty() {
                        drain_runs.spawn(run_drain(self.drain.clone(), self.event_tx.clone()));
                    } else {
                        debug!("Narrative drain still in progress, tick skipped");
                    }
                }
                Some(result) = link_runs.join_next(), if !link_runs.is_empty() => {
                    if let Err(e) = result {
                        error!(error = ?e, "Linking task panicked");
                    }
                }
                Some(result) = drain_runs.join_next(), if !drain_runs.is_empty() => {
                    if let Err(e) = result {
                        error!(error = ?e, "Narrative drain task panicked");
                    }
                }
            }
        }

        while let Some(result) = link_runs.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Linking task panicked");
            }
        }
        while let Some(result) = drain_runs.join_next().await {
            if let Err(e) = result {
                error!(error = ?e, "Narrative drain task panicked");
            }
        }

        let _ = self.event_tx.send(SchedulerEvent::SchedulerStopped);
        info!("Pipeline scheduler stopped");
    }
}

async fn run_linking(engine: Arc<LinkingEngine>, event_tx: broadcast::Sender<SchedulerEvent>) {
    let event = match engine.run().await {
        Ok(summary) => SchedulerEvent::LinkRunCompleted {
            linked: summary.linked,
            failed: summary.failed,
            skipped: summary.skipped,
            conflicts: summary.conflicts,
            duration_ms: summary.duration_ms,
        },
        Err(e) => {
            error!(error = %e, "Scheduled linking run failed");
            SchedulerEvent::LinkRunFailed {
                error: e.to_string(),
            }
        }
    };
    let _ = event_tx.send(event);
}

async fn run_drain(drain: Arc<NarrativeDrain>, event_tx: broadcast::Sender<SchedulerEvent>) {
    let event = match drain.run().await {
        Ok(summary) => SchedulerEvent::DrainCompleted {
            processed: summary.processed,
            failed: summary.failed,
            skipped: summary.skipped,
            duration_ms: summary.duration_ms,
        },
        Err(e) => {
            error!(error = %e, "Scheduled narrative drain failed");
            SchedulerEvent::DrainFailed {
                error: e.to_string(),
            }
        }
    };
    let _ = event_tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use evidentia_core::{CoreActivity, EvidenceItem, EvidenceSource, Project, SystematicStep};
    use evidentia_db::memory::MemoryStore;
    use uuid::Uuid;
    use evidentia_inference::mock::MockGenerationBackend;
    use evidentia_inference::{LinkClassifier, NarrativeGenerator};

    fn scheduler(config: SchedulerConfig) -> PipelineScheduler {
        let store = MemoryStore::new();
        let backend = Arc::new(MockGenerationBackend::new());
        let linking = LinkingEngine::new(store.repositories(), LinkClassifier::new(backend.clone()));
        let drain = NarrativeDrain::new(store.repositories(), NarrativeGenerator::new(backend));
        PipelineScheduler::new(Arc::new(linking), Arc::new(drain), config)
    }

    #[tokio::test]
    async fn test_runs_both_steps_then_stops() {
        let scheduler = scheduler(
            SchedulerConfig::default()
                .with_link_interval(3600)
                .with_narrative_interval(3600),
        );
        // Subscribe before starting so no early event is missed.
        let mut events = scheduler.events();
        let handle = scheduler.start();

        let mut saw_link = false;
        let mut saw_drain = false;
        while !(saw_link && saw_drain) {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("scheduler event")
                .unwrap();
            match event {
                SchedulerEvent::LinkRunCompleted { linked, .. } => {
                    assert_eq!(linked, 0);
                    saw_link = true;
                }
                SchedulerEvent::DrainCompleted { processed, .. } => {
                    assert_eq!(processed, 0);
                    saw_drain = true;
                }
                SchedulerEvent::SchedulerStarted => {}
                other => panic!("unexpected event {other:?}"),
            }
        }

        handle.shutdown().await.unwrap();
        // The task has exited, so the stop event is already queued.
        let stopped = events.try_recv().unwrap();
        assert!(matches!(stopped, SchedulerEvent::SchedulerStopped));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_run() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            name: "Edge cache".to_string(),
            hypothesis: None,
            created_at: now - chrono::Duration::days(30),
        };
        let activity = CoreActivity {
            id: Uuid::new_v4(),
            project_id: project.id,
            name: "Cache eviction".to_string(),
            uncertainty: "Whether adaptive eviction improves cache latency".to_string(),
            created_at: now - chrono::Duration::days(20),
        };
        store.put_project(project.clone()).await;
        store.put_activity(activity).await;
        store
            .put_evidence(EvidenceItem::new(
                project.id,
                "Benchmarked adaptive eviction with cache warming enabled",
                EvidenceSource::Note,
                SystematicStep::Experiment,
                now - chrono::Duration::hours(1),
            ))
            .await;

        let backend = MockGenerationBackend::new()
            .with_fixed_response("[]")
            .with_latency_ms(300);
        let linking = LinkingEngine::new(
            store.repositories(),
            LinkClassifier::new(Arc::new(backend.clone())),
        );
        let drain = NarrativeDrain::new(
            store.repositories(),
            NarrativeGenerator::new(Arc::new(backend.clone())),
        );
        let scheduler = PipelineScheduler::new(
            Arc::new(linking),
            Arc::new(drain),
            SchedulerConfig::default()
                .with_link_interval(3600)
                .with_narrative_interval(3600),
        );
        let mut events = scheduler.events();
        let handle = scheduler.start();

        tokio::time::timeout(Duration::from_secs(5), async {
            while backend.call_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("classifier called");

        handle.shutdown().await.unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen
            .iter()
            .any(|e| matches!(e, SchedulerEvent::LinkRunCompleted { .. })));
        assert!(matches!(seen.last(), Some(SchedulerEvent::SchedulerStopped)));
    }

    #[tokio::test]
    async fn test_shutdown_of_disabled_scheduler() {
        let handle = scheduler(SchedulerConfig::default().with_enabled(false)).start();
        handle.shutdown().await.unwrap();
    }

    #[test]
    fn test_scheduler_event_fields() {
        let event = SchedulerEvent::DrainFailed {
            error: "store unavailable".to_string(),
        };
        match event {
            SchedulerEvent::DrainFailed { error } => assert_eq!(error, "store unavailable"),
            _ => panic!("Wrong event variant"),
        }
    }
}
