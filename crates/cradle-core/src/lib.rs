//! cradle-core: types shared by every Cradle crate.
//!
//! - [`WorkloadIdentity`]: the (customer, workload) pair and the runtime
//!   resource names derived from it
//! - [`EnvironmentContract`]: the variables injected into every workload
//!   container
//! - [`CradleConfig`]: `cradle.toml` parsing with environment overrides

pub mod config;
pub mod environment;
pub mod error;
pub mod identity;

pub use config::CradleConfig;
pub use environment::EnvironmentContract;
pub use error::{CoreError, CoreResult};
pub use identity::WorkloadIdentity;
