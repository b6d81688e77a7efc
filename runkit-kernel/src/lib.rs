//! Service kernel for runkit.
//!
//! [`UtilityService`] owns one TTL cache, retry tracker, rate limiter and
//! batch runner, keeps them tidy with background tasks, and exposes every
//! primitive both as typed methods and as named operations taking and
//! returning JSON.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod lifecycle;
mod maintenance;
mod operations;
mod service;

pub use error::{ServiceError, ServiceResult};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleEvent, LifecycleResult, ServiceState};
pub use maintenance::{MaintenanceConfig, MaintenanceHandle};
pub use operations::OperationName;
pub use service::{UtilityService, UtilityServiceBuilder};
