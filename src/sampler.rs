use std::time::Duration;

use crate::observer::{visible_fraction, SectionLayout};
use crate::tracker::TrackerState;

/// Safety net for windows where intersection reports have not fired yet,
/// e.g. right after mount before the observer attached.
///
/// Runs off a throttled scroll signal and a periodic poll. It may only
/// *start* idle timers while the page is active; stopping is the exclusive
/// responsibility of the observer and the activity gate, so the sampler can
/// never race more precise intersection data into truncating dwell time.
#[derive(Debug)]
pub struct FallbackSampler {
    threshold: f64,
    throttle_ms: i64,
    last_scroll_sample_ms: Option<i64>,
}

impl FallbackSampler {
    pub fn new(threshold: f64, scroll_throttle: Duration) -> Self {
        Self {
            threshold,
            throttle_ms: scroll_throttle.as_millis() as i64,
            last_scroll_sample_ms: None,
        }
    }

    /// Scroll-driven sample, at most once per throttle window.
    pub fn on_scroll(&mut self, layout: &dyn SectionLayout, state: &mut TrackerState, now_ms: i64) {
        if let Some(last) = self.last_scroll_sample_ms {
            if now_ms - last < self.throttle_ms {
                return;
            }
        }
        self.last_scroll_sample_ms = Some(now_ms);
        self.sample(layout, state, now_ms);
    }

    /// Periodic poll, driven by the controller's interval task.
    pub fn poll(&self, layout: &dyn SectionLayout, state: &mut TrackerState, now_ms: i64) {
        self.sample(layout, state, now_ms);
    }

    fn sample(&self, layout: &dyn SectionLayout, state: &mut TrackerState, now_ms: i64) {
        if !state.is_active() {
            return;
        }

        let viewport = layout.viewport_height();
        for id in state.section_ids() {
            if state.is_section_running(&id) {
                continue;
            }
            let Some(rect) = layout.section_rect(&id) else {
                continue;
            };
            if visible_fraction(rect, viewport) >= self.threshold {
                state.sampler_start(&id, now_ms);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Rect;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    struct FakeLayout {
        rects: HashMap<String, Rect>,
    }

    impl SectionLayout for FakeLayout {
        fn section_rect(&self, section_id: &str) -> Option<Rect> {
            self.rects.get(section_id).copied()
        }

        fn viewport_height(&self) -> f64 {
            800.0
        }
    }

    fn tracker(ids: &[&str]) -> TrackerState {
        TrackerState::new(ids.iter().copied(), Utc.timestamp_millis_opt(0).unwrap())
    }

    fn layout_with(id: &str, rect: Rect) -> FakeLayout {
        FakeLayout {
            rects: HashMap::from([(id.to_string(), rect)]),
        }
    }

    #[test]
    fn starts_idle_visible_sections() {
        let mut state = tracker(&["a"]);
        let sampler = FallbackSampler::new(0.10, Duration::from_millis(500));
        let layout = layout_with("a", Rect { top: 0.0, bottom: 400.0 });

        sampler.poll(&layout, &mut state, 1_000);
        assert!(state.is_section_running("a"));
    }

    #[test]
    fn never_stops_a_running_timer() {
        let mut state = tracker(&["a"]);
        state.handle_section_visibility("a", true, 0);

        // Section has scrolled fully out of view, but only the observer or
        // the gate may stop it.
        let sampler = FallbackSampler::new(0.10, Duration::from_millis(500));
        let layout = layout_with("a", Rect { top: 5_000.0, bottom: 5_400.0 });

        sampler.poll(&layout, &mut state, 3_000);
        assert!(state.is_section_running("a"));
    }

    #[test]
    fn inactive_page_suppresses_sampling() {
        let mut state = tracker(&["a"]);
        state.handle_activity(false, 0);

        let sampler = FallbackSampler::new(0.10, Duration::from_millis(500));
        let layout = layout_with("a", Rect { top: 0.0, bottom: 400.0 });

        sampler.poll(&layout, &mut state, 1_000);
        assert!(!state.is_section_running("a"));
    }

    #[test]
    fn scroll_samples_are_throttled() {
        let mut state = tracker(&["a"]);
        let mut sampler = FallbackSampler::new(0.10, Duration::from_millis(500));

        // First scroll with the section out of view consumes the window.
        let far = layout_with("a", Rect { top: 5_000.0, bottom: 5_400.0 });
        sampler.on_scroll(&far, &mut state, 1_000);
        assert!(!state.is_section_running("a"));

        // 200ms later the section is in view but the throttle swallows it.
        let near = layout_with("a", Rect { top: 0.0, bottom: 400.0 });
        sampler.on_scroll(&near, &mut state, 1_200);
        assert!(!state.is_section_running("a"));

        // Past the window the sample goes through.
        sampler.on_scroll(&near, &mut state, 1_600);
        assert!(state.is_section_running("a"));
    }
}
