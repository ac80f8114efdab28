mod config;
mod flush;
mod models;
mod observer;
mod sampler;
mod store;
mod timer;
mod tracker;
mod utils;

pub use config::{TrackerConfig, INTERSECTION_THRESHOLDS};
pub use flush::{BeaconTransport, DeliveryReceipt, DeliveryTransport, FlushPipeline, HttpTransport};
pub use models::{FlushPayload, FlushResponse, SessionState};
pub use observer::{visible_fraction, Rect, SectionLayout, VisibilityObserver};
pub use sampler::FallbackSampler;
pub use store::{BackupRecord, BackupStore};
pub use timer::{SectionTimer, SectionTimerRegistry};
pub use tracker::{TrackerController, TrackerSnapshot, TrackerState};

/// Initialize logging (reads RUST_LOG env var).
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
