pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod types;

pub use config::Settings;
pub use error::{PipelineError, Result};
pub use types::{RawItem, Record, RejectReason};
