pub mod events;

pub use events::{DownloadProgress, DownloadStatus, EventBus, GeoEvent, TimedEvent};
