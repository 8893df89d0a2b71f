//! Headless Chrome rendering
//!
//! Launches and controls per-client Chrome instances for the render path,
//! one session per relay client, pooled and swept when idle.

mod session;
mod pool;
mod actions;
mod errors;

pub use session::{RenderSession, RenderSessionConfig};
pub use pool::RenderPool;
pub use actions::{ActionOutcome, PageActions};
pub use errors::BrowserError;
