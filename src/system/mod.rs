//! System-level modules
//!
//! - Logging initialization
//! - Event bus for download/startup/cache progress

pub mod event;
pub mod logging;

pub use event::{EventBus, GeoEvent};
pub use logging::init_logging;
