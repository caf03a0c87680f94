mod types;

pub use types::{HealthConfig, OperatorConfig, RequeueConfig};
