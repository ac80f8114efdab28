use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::SessionState;
use crate::timer::SectionTimerRegistry;

/// Snapshot of the tracker suitable for flushing or host diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub session_id: Option<String>,
    pub session_started_at: DateTime<Utc>,
    pub section_times: BTreeMap<String, u64>,
    pub total_time_seconds: u64,
    pub visibility_changes: u32,
    pub is_active: bool,
}

/// Pure tracker core: the section timer registry plus session counters and
/// per-section last-known visibility, mutated only through explicit events
/// carrying a clock value (epoch ms).
///
/// The activity gate lives here and is authoritative: no event source may
/// start a timer while the page is inactive. All mutation happens under the
/// controller's single lock, so `start`/`stop` for one section strictly
/// alternate.
#[derive(Debug)]
pub struct TrackerState {
    registry: SectionTimerRegistry,
    session: SessionState,
    /// Last-known viewport visibility per section, updated even while the
    /// page is inactive so the resume sweep knows which timers to restart.
    visible: HashMap<String, bool>,
}

impl TrackerState {
    pub fn new<I, S>(section_ids: I, started_at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = SectionTimerRegistry::new(section_ids);
        let visible = registry
            .section_ids()
            .map(|id| (id.to_string(), false))
            .collect();
        Self {
            registry,
            session: SessionState::new(started_at),
            visible,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.session_id.as_deref()
    }

    pub fn set_session_id(&mut self, session_id: String) {
        self.session.session_id = Some(session_id);
    }

    pub fn section_ids(&self) -> Vec<String> {
        self.registry.section_ids().map(str::to_string).collect()
    }

    pub fn is_section_running(&self, section_id: &str) -> bool {
        self.registry.is_running(section_id)
    }

    /// A section crossed the visibility threshold in either direction.
    ///
    /// Stops always go through (crediting time up to `now_ms`); starts are
    /// gated on page activity. The visibility flag is recorded regardless so
    /// the resume sweep sees the current layout.
    pub fn handle_section_visibility(&mut self, section_id: &str, visible: bool, now_ms: i64) {
        if let Some(flag) = self.visible.get_mut(section_id) {
            *flag = visible;
        } else {
            return;
        }

        if visible {
            if self.session.is_active {
                self.registry.start(section_id, now_ms);
            }
        } else {
            self.registry.stop(section_id, now_ms);
        }
    }

    /// The page transitioned between active and hidden.
    ///
    /// Hidden: force-stop every running timer so no time accrues past this
    /// instant. Active: restart timers for sections whose last-known
    /// visibility still satisfies the threshold. The stop-all sweep always
    /// runs before any restart because the two branches are disjoint and
    /// ordered by the transitions themselves.
    pub fn handle_activity(&mut self, active: bool, now_ms: i64) {
        if active == self.session.is_active {
            return;
        }

        self.session.is_active = active;
        self.session.visibility_changes += 1;

        if active {
            let to_restart: Vec<String> = self
                .visible
                .iter()
                .filter(|(_, visible)| **visible)
                .map(|(id, _)| id.clone())
                .collect();
            for id in to_restart {
                self.registry.start(&id, now_ms);
            }
        } else {
            self.registry.stop_all(now_ms);
        }
    }

    /// Start-only entry point for the fallback sampler. Starts the timer only
    /// when the page is active and the timer is idle; never stops anything.
    pub fn sampler_start(&mut self, section_id: &str, now_ms: i64) -> bool {
        if !self.session.is_active {
            return false;
        }
        if let Some(flag) = self.visible.get_mut(section_id) {
            *flag = true;
        }
        self.registry.start(section_id, now_ms)
    }

    pub fn snapshot(&self, now_ms: i64) -> TrackerSnapshot {
        let started_ms = self.session.started_at.timestamp_millis();
        let total = ((now_ms - started_ms).max(0) as f64 / 1000.0).floor() as u64;

        TrackerSnapshot {
            session_id: self.session.session_id.clone(),
            session_started_at: self.session.started_at,
            section_times: self.registry.snapshot(now_ms, self.session.is_active),
            total_time_seconds: total,
            visibility_changes: self.session.visibility_changes,
            is_active: self.session.is_active,
        }
    }
}
