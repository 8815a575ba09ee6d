//! API endpoint groups.

mod graphs;
mod health;
mod invocations;

pub use graphs::GraphsApi;
pub use health::{HealthApi, HealthCheck};
pub use invocations::{InvocationPage, InvocationsApi, OutputsResponse, RunError};
