use std::collections::BTreeMap;

/// Accumulator for a single tracked section.
///
/// `start_ms` combines with `accumulated_secs` to produce the true dwell
/// duration; `None` means the timer is idle and nothing is accruing.
#[derive(Debug, Clone, Default)]
pub struct SectionTimer {
    pub start_ms: Option<i64>,
    pub accumulated_secs: f64,
}

impl SectionTimer {
    pub fn is_running(&self) -> bool {
        self.start_ms.is_some()
    }

    /// Live seconds including any currently running window. The running
    /// window only counts while the page is active.
    fn live_secs(&self, now_ms: i64, is_active: bool) -> f64 {
        match (is_active, self.start_ms) {
            (true, Some(start)) => {
                let running = (now_ms - start).max(0) as f64 / 1000.0;
                self.accumulated_secs + running
            }
            _ => self.accumulated_secs,
        }
    }
}

/// Per-section dwell accumulators, seeded once with a fixed set of section
/// ids. Unknown ids are ignored rather than created on the fly.
#[derive(Debug, Clone, Default)]
pub struct SectionTimerRegistry {
    timers: BTreeMap<String, SectionTimer>,
}

impl SectionTimerRegistry {
    pub fn new<I, S>(section_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let timers = section_ids
            .into_iter()
            .map(|id| (id.into(), SectionTimer::default()))
            .collect();
        Self { timers }
    }

    pub fn section_ids(&self) -> impl Iterator<Item = &str> {
        self.timers.keys().map(String::as_str)
    }

    pub fn is_running(&self, section_id: &str) -> bool {
        self.timers
            .get(section_id)
            .map(SectionTimer::is_running)
            .unwrap_or(false)
    }

    /// Anchors the timer at `now_ms` if it is idle. Idempotent: a second
    /// visible-signal for an already running timer leaves the anchor alone.
    /// Returns whether the timer transitioned from idle to running.
    pub fn start(&mut self, section_id: &str, now_ms: i64) -> bool {
        match self.timers.get_mut(section_id) {
            Some(timer) if timer.start_ms.is_none() => {
                timer.start_ms = Some(now_ms);
                true
            }
            _ => false,
        }
    }

    /// Credits the elapsed window and clears the anchor, only if the timer is
    /// running. Returns the seconds credited by this call.
    pub fn stop(&mut self, section_id: &str, now_ms: i64) -> Option<f64> {
        let timer = self.timers.get_mut(section_id)?;
        let start = timer.start_ms.take()?;
        let credited = (now_ms - start).max(0) as f64 / 1000.0;
        timer.accumulated_secs += credited;
        Some(credited)
    }

    /// Stops every running timer, crediting time up to `now_ms`.
    pub fn stop_all(&mut self, now_ms: i64) {
        for timer in self.timers.values_mut() {
            if let Some(start) = timer.start_ms.take() {
                timer.accumulated_secs += (now_ms - start).max(0) as f64 / 1000.0;
            }
        }
    }

    /// Whole-second dwell per section, including the live contribution of any
    /// running timer while the page is active. Floored, never negative.
    pub fn snapshot(&self, now_ms: i64, is_active: bool) -> BTreeMap<String, u64> {
        self.timers
            .iter()
            .map(|(id, timer)| {
                let secs = timer.live_secs(now_ms, is_active).max(0.0).floor() as u64;
                (id.clone(), secs)
            })
            .collect()
    }
}
