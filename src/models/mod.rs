//! Data models for listwatch.

mod credential;
mod device;
mod listing;
mod notification;
mod run;
mod search_config;
mod service;
mod status;

pub use credential::{Credentials, ServiceCredential};
pub use device::{Device, Platform};
pub use listing::{Listing, RawListing};
pub use notification::{Notification, NotificationStatus};
pub use run::{RunOutcome, RunStats, ScrapeRun};
pub use search_config::{ConfigValidationError, SearchConfig};
pub use service::Service;
pub use status::{WatcherState, WatcherStats, WatcherStatus};
