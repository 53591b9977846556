pub mod backoff;
pub mod config;
pub mod engine;
pub mod mqtt;
pub mod stove;

pub use config::format_diagnostics;
pub use config::Config;
pub use config::Diagnostic;
pub use config::Diagnostics;
pub use config::LogLevel;
pub use engine::Engine;
