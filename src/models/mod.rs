mod payload;
mod session;

pub use payload::{FlushPayload, FlushResponse};
pub use session::SessionState;
