pub mod error;
pub mod http;
pub mod metrics;
pub mod telemetry;

pub use error::InfraError;
