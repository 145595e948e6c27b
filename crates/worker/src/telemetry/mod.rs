pub mod collectors;
pub mod store;

pub use collectors::{CollectorCleanup, activate_collectors};
pub use store::{SharedStore, TelemetryStore, shared_store};
