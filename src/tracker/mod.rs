mod state;

pub use state::{TrackerSnapshot, TrackerState};

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::flush::{BeaconTransport, FlushPipeline, HttpTransport};
use crate::models::FlushPayload;
use crate::observer::{SectionLayout, VisibilityObserver};
use crate::sampler::FallbackSampler;
use crate::store::BackupStore;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

type Pipeline = FlushPipeline<HttpTransport, BeaconTransport>;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Async facade over the tracker core. Routes host signals (intersection
/// reports, scroll, activity changes) into the state machine under a single
/// lock and runs the background tasks: deferred observer attachment, the
/// fallback sampler poll, and the periodic flush.
///
/// Lock order is observer/sampler before state; background tasks share one
/// cancellation token and are joined on shutdown so nothing leaks across
/// page views.
pub struct TrackerController {
    state: Arc<Mutex<TrackerState>>,
    observer: Arc<Mutex<VisibilityObserver>>,
    sampler: Arc<Mutex<FallbackSampler>>,
    pipeline: Arc<Pipeline>,
    layout: Arc<dyn SectionLayout>,
    project_id: String,
    share_token: String,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TrackerController {
    /// Builds the tracker, re-sends any recent backup left over from a
    /// previous page view, and spawns the background tasks.
    pub async fn start(
        config: TrackerConfig,
        layout: Arc<dyn SectionLayout>,
        section_ids: Vec<String>,
    ) -> Result<Self> {
        // An unopenable backup database degrades to in-memory tracking; it
        // must never take the page's tracking down with it.
        let store = match BackupStore::new(config.backup_path.clone()) {
            Ok(store) => Some(store),
            Err(err) => {
                log_warn!("backup store unavailable, tracking in-memory only: {err:#}");
                None
            }
        };
        let periodic = HttpTransport::new(&config.endpoint, config.request_timeout)?;
        let fallback = HttpTransport::new(&config.endpoint, config.unload_timeout)?;
        let beacon = BeaconTransport::new(&config.endpoint)?;
        let pipeline = Arc::new(FlushPipeline::new(
            periodic,
            beacon,
            fallback,
            store,
            config.storage_key(),
            config.backup_max_age,
        ));

        if let Err(err) = pipeline.recover_backup().await {
            log_warn!("backup recovery failed: {err:#}");
        }

        let state = Arc::new(Mutex::new(TrackerState::new(
            section_ids.iter().cloned(),
            Utc::now(),
        )));
        let observer = Arc::new(Mutex::new(VisibilityObserver::new(
            section_ids,
            config.visibility_threshold,
        )));
        let sampler = Arc::new(Mutex::new(FallbackSampler::new(
            config.visibility_threshold,
            config.scroll_throttle,
        )));

        let controller = Self {
            state,
            observer,
            sampler,
            pipeline,
            layout,
            project_id: config.project_id.clone(),
            share_token: config.share_token.clone(),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };

        controller.spawn_attach_task(config.attach_retry_delays.clone()).await;
        controller.spawn_sampler_task(config.sampler_interval).await;
        controller.spawn_flush_task(config.flush_interval).await;

        Ok(controller)
    }

    /// Host callback: a section's intersection ratio crossed one of the
    /// registered thresholds.
    pub async fn on_intersection(&self, section_id: &str, ratio: f64) {
        let mut observer = self.observer.lock().await;
        let mut state = self.state.lock().await;
        observer.on_intersection(&mut state, section_id, ratio, now_ms());
    }

    /// Host callback: the page scrolled. Feeds the fallback sampler.
    pub async fn on_scroll(&self) {
        let mut sampler = self.sampler.lock().await;
        let mut state = self.state.lock().await;
        sampler.on_scroll(self.layout.as_ref(), &mut state, now_ms());
    }

    /// Host callback: the page transitioned between active and hidden.
    pub async fn on_activity(&self, active: bool) {
        let mut state = self.state.lock().await;
        state.handle_activity(active, now_ms());
    }

    pub async fn current_snapshot(&self) -> TrackerSnapshot {
        self.state.lock().await.snapshot(now_ms())
    }

    /// Final flush for `beforeunload`/`pagehide`. Safe to call from both
    /// signals; the pipeline sends at most one final payload.
    pub async fn on_unload(&self) {
        let payload = self.build_payload().await;
        self.pipeline.flush_final(payload).await;
    }

    /// Cancels and joins every background task, then sends the final flush.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for handle in self.tasks.lock().await.drain(..) {
            let _ = handle.await;
        }
        self.on_unload().await;
    }

    async fn build_payload(&self) -> FlushPayload {
        let snapshot = self.state.lock().await.snapshot(now_ms());
        payload_from_snapshot(snapshot, &self.project_id, &self.share_token)
    }

    async fn spawn_attach_task(&self, retry_delays: Vec<std::time::Duration>) {
        let observer = self.observer.clone();
        let state = self.state.clone();
        let layout = self.layout.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut missing = {
                let mut observer = observer.lock().await;
                let mut state = state.lock().await;
                observer.attach_pass(layout.as_ref(), &mut state, now_ms())
            };
            if missing == 0 {
                return;
            }

            for delay in retry_delays {
                tokio::select! {
                    _ = time::sleep(delay) => {}
                    _ = cancel.cancelled() => return,
                }

                missing = {
                    let mut observer = observer.lock().await;
                    let mut state = state.lock().await;
                    observer.attach_pass(layout.as_ref(), &mut state, now_ms())
                };
                if missing == 0 {
                    return;
                }
            }

            log_warn!("{missing} tracked sections never appeared in the layout");
        });

        self.tasks.lock().await.push(handle);
    }

    async fn spawn_sampler_task(&self, poll_interval: std::time::Duration) {
        let sampler = self.sampler.clone();
        let state = self.state.clone();
        let layout = self.layout.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let sampler = sampler.lock().await;
                        let mut state = state.lock().await;
                        sampler.poll(layout.as_ref(), &mut state, now_ms());
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });

        self.tasks.lock().await.push(handle);
    }

    async fn spawn_flush_task(&self, flush_interval: std::time::Duration) {
        let state = self.state.clone();
        let pipeline = self.pipeline.clone();
        let cancel = self.cancel.clone();
        let project_id = self.project_id.clone();
        let share_token = self.share_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        flush_once(&state, &pipeline, &project_id, &share_token).await;
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });

        self.tasks.lock().await.push(handle);
    }
}

fn payload_from_snapshot(
    snapshot: TrackerSnapshot,
    project_id: &str,
    share_token: &str,
) -> FlushPayload {
    FlushPayload {
        project_id: project_id.to_string(),
        share_token: share_token.to_string(),
        session_started_at: snapshot.session_started_at,
        section_times: snapshot.section_times,
        total_time_seconds: snapshot.total_time_seconds,
        visibility_changes: snapshot.visibility_changes,
        is_active: snapshot.is_active,
        session_id: snapshot.session_id,
        is_final: false,
    }
}

async fn flush_once(
    state: &Arc<Mutex<TrackerState>>,
    pipeline: &Arc<Pipeline>,
    project_id: &str,
    share_token: &str,
) {
    let payload = {
        let snapshot = state.lock().await.snapshot(now_ms());
        payload_from_snapshot(snapshot, project_id, share_token)
    };

    match pipeline.flush(payload).await {
        Ok(Some(session_id)) => {
            let mut guard = state.lock().await;
            if guard.session_id().is_none() {
                log_info!("collector assigned session {session_id}");
                guard.set_session_id(session_id);
            }
        }
        Ok(None) => {}
        Err(err) => {
            // The next tick retries with a fresh snapshot.
            log_warn!("periodic flush failed: {err:#}");
        }
    }
}
