/// Vertical bounding rectangle of a section, in viewport coordinates
/// (0 = top of viewport, increasing downward).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub top: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

/// Host-provided geometry source for tracked sections.
///
/// Returns `None` for sections not mounted in the layout yet; the observer
/// retries attachment for those on a delay schedule.
pub trait SectionLayout: Send + Sync + 'static {
    fn section_rect(&self, section_id: &str) -> Option<Rect>;
    fn viewport_height(&self) -> f64;
}

/// Fraction of the section's area currently inside the viewport, in [0, 1].
pub fn visible_fraction(rect: Rect, viewport_height: f64) -> f64 {
    let height = rect.height();
    if height <= 0.0 || viewport_height <= 0.0 {
        return 0.0;
    }
    let visible = rect.bottom.min(viewport_height) - rect.top.max(0.0);
    (visible.max(0.0) / height).min(1.0)
}
