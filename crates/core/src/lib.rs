pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use config::AppConfig;
pub use error::PipelineError;
pub use types::*;
