mod registry;

pub use registry::{SectionTimer, SectionTimerRegistry};
