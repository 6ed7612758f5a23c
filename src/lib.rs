pub mod config;
pub mod inject;
pub mod logging;
pub mod project;
pub mod server;
pub mod watcher;

pub use config::Settings;
pub use inject::{InjectOutcome, inject_client_script};
pub use project::Project;
pub use watcher::{ReloadManager, Subscription, WatchError};
