// Library surface for headless/integration tests and reuse.
// The terminal front-end (App, ui) lives in main.rs.
pub mod alert;
pub mod app_dirs;
pub mod clock;
pub mod config;
pub mod encoding;
pub mod history;
pub mod monitor;
pub mod runtime;
pub mod session;
pub mod typewriter;
pub mod util;

pub use alert::{Alert, AlertKind, AlertSink, ChannelSink};
pub use monitor::{RateMonitor, RateSnapshot};
