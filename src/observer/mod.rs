mod layout;

pub use layout::{visible_fraction, Rect, SectionLayout};

use std::collections::HashSet;

use crate::tracker::TrackerState;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::log_warn;

/// Maps intersection-ratio reports into visible/hidden edges on the tracker
/// core, and handles deferred attachment of sections that are not in the
/// layout yet (content rendered by downstream async fetches).
///
/// Stopping timers is the exclusive business of this observer and the
/// activity gate; the fallback sampler only ever starts.
#[derive(Debug)]
pub struct VisibilityObserver {
    threshold: f64,
    attached: HashSet<String>,
    pending: HashSet<String>,
}

impl VisibilityObserver {
    pub fn new<I, S>(section_ids: I, threshold: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            threshold,
            attached: HashSet::new(),
            pending: section_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_attached(&self, section_id: &str) -> bool {
        self.attached.contains(section_id)
    }

    /// Host callback for an intersection-ratio crossing. Ratios arrive at the
    /// registered thresholds, so both edges around the visibility threshold
    /// are reported precisely.
    pub fn on_intersection(
        &mut self,
        state: &mut TrackerState,
        section_id: &str,
        ratio: f64,
        now_ms: i64,
    ) {
        // An intersection report proves the element exists.
        if self.pending.remove(section_id) {
            self.attached.insert(section_id.to_string());
        }
        state.handle_section_visibility(section_id, ratio >= self.threshold, now_ms);
    }

    /// One attachment pass over the sections still missing from the layout.
    ///
    /// Newly found sections already satisfying the visibility threshold start
    /// their timer synchronously here instead of waiting for the next
    /// intersection report; content visible immediately on load would
    /// otherwise be undercounted. Returns how many sections remain missing.
    pub fn attach_pass(
        &mut self,
        layout: &dyn SectionLayout,
        state: &mut TrackerState,
        now_ms: i64,
    ) -> usize {
        let viewport = layout.viewport_height();
        let mut found = Vec::new();

        for id in &self.pending {
            match layout.section_rect(id) {
                Some(rect) => {
                    if visible_fraction(rect, viewport) >= self.threshold {
                        state.handle_section_visibility(id, true, now_ms);
                    }
                    found.push(id.clone());
                }
                None => {
                    log_warn!("section '{}' not found in layout, will retry", id);
                }
            }
        }

        for id in found {
            self.pending.remove(&id);
            self.attached.insert(id);
        }
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    struct FakeLayout {
        rects: HashMap<String, Rect>,
        viewport: f64,
    }

    impl SectionLayout for FakeLayout {
        fn section_rect(&self, section_id: &str) -> Option<Rect> {
            self.rects.get(section_id).copied()
        }

        fn viewport_height(&self) -> f64 {
            self.viewport
        }
    }

    fn tracker(ids: &[&str]) -> TrackerState {
        TrackerState::new(ids.iter().copied(), Utc.timestamp_millis_opt(0).unwrap())
    }

    #[test]
    fn intersection_edges_drive_start_and_stop() {
        let mut state = tracker(&["a"]);
        let mut observer = VisibilityObserver::new(["a"], 0.10);

        observer.on_intersection(&mut state, "a", 0.25, 0);
        assert!(state.is_section_running("a"));

        observer.on_intersection(&mut state, "a", 0.0, 4_000);
        assert!(!state.is_section_running("a"));
        assert_eq!(state.snapshot(4_000).section_times["a"], 4);
    }

    #[test]
    fn ratio_below_threshold_counts_as_hidden() {
        let mut state = tracker(&["a"]);
        let mut observer = VisibilityObserver::new(["a"], 0.10);

        observer.on_intersection(&mut state, "a", 0.05, 0);
        assert!(!state.is_section_running("a"));
    }

    #[test]
    fn attach_starts_already_visible_sections_synchronously() {
        let mut state = tracker(&["a", "b"]);
        let mut observer = VisibilityObserver::new(["a", "b"], 0.10);
        let layout = FakeLayout {
            rects: HashMap::from([
                ("a".to_string(), Rect { top: 0.0, bottom: 400.0 }),
                ("b".to_string(), Rect { top: 2_000.0, bottom: 2_400.0 }),
            ]),
            viewport: 800.0,
        };

        let missing = observer.attach_pass(&layout, &mut state, 0);
        assert_eq!(missing, 0);
        assert!(state.is_section_running("a"));
        assert!(!state.is_section_running("b"));
    }

    #[test]
    fn missing_sections_stay_pending_until_mounted() {
        let mut state = tracker(&["late"]);
        let mut observer = VisibilityObserver::new(["late"], 0.10);
        let empty = FakeLayout { rects: HashMap::new(), viewport: 800.0 };

        assert_eq!(observer.attach_pass(&empty, &mut state, 0), 1);
        assert!(observer.has_pending());

        let mounted = FakeLayout {
            rects: HashMap::from([("late".to_string(), Rect { top: 100.0, bottom: 500.0 })]),
            viewport: 800.0,
        };
        assert_eq!(observer.attach_pass(&mounted, &mut state, 2_000), 0);
        assert!(observer.is_attached("late"));
        assert!(state.is_section_running("late"));
    }

    #[test]
    fn attach_does_not_start_while_page_inactive() {
        let mut state = tracker(&["a"]);
        state.handle_activity(false, 0);

        let mut observer = VisibilityObserver::new(["a"], 0.10);
        let layout = FakeLayout {
            rects: HashMap::from([("a".to_string(), Rect { top: 0.0, bottom: 400.0 })]),
            viewport: 800.0,
        };

        observer.attach_pass(&layout, &mut state, 1_000);
        assert!(!state.is_section_running("a"));

        // Gate resumes it later because visibility was recorded.
        state.handle_activity(true, 5_000);
        assert!(state.is_section_running("a"));
    }
}
