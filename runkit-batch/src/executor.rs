//! Operation executors: the injected capability that performs batch work.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use runkit_primitives::{Clock, SystemClock};
use serde_json::{Value, json};
use thiserror::Error;

use crate::BatchOperation;

/// Result alias for executor operations.
pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Trait implemented by anything that can perform a batch operation.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    /// Performs `operation`, returning its JSON output.
    async fn execute(&self, operation: &BatchOperation) -> ExecutorResult<Value>;
}

#[async_trait]
impl<F, Fut> OperationExecutor for F
where
    F: Send + Sync + Fn(BatchOperation) -> Fut,
    Fut: Future<Output = ExecutorResult<Value>> + Send,
{
    async fn execute(&self, operation: &BatchOperation) -> ExecutorResult<Value> {
        (self)(operation.clone()).await
    }
}

/// Executors keyed by operation type.
#[derive(Default)]
pub struct ExecutorRegistry {
    inner: RwLock<HashMap<String, Arc<dyn OperationExecutor>>>,
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("registered", &self.types())
            .finish()
    }
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the executor for `operation_type`.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::DuplicateType`] if the type is already
    /// registered, [`ExecutorError::InvalidType`] for an empty type, and
    /// [`ExecutorError::Poisoned`] on lock poisoning.
    pub fn register<E>(&self, operation_type: impl Into<String>, executor: E) -> ExecutorResult<()>
    where
        E: OperationExecutor + 'static,
    {
        let operation_type = operation_type.into();
        if operation_type.is_empty() {
            return Err(ExecutorError::InvalidType);
        }

        let mut inner = self.inner.write().map_err(|_| ExecutorError::Poisoned)?;
        if inner.contains_key(&operation_type) {
            return Err(ExecutorError::DuplicateType { operation_type });
        }
        inner.insert(operation_type, Arc::new(executor));
        Ok(())
    }

    /// Returns the executor for `operation_type`, if registered.
    #[must_use]
    pub fn get(&self, operation_type: &str) -> Option<Arc<dyn OperationExecutor>> {
        let inner = self.inner.read().ok()?;
        inner.get(operation_type).cloned()
    }

    /// Lists registered operation types, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .inner
            .read()
            .map(|inner| inner.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }
}

#[async_trait]
impl OperationExecutor for ExecutorRegistry {
    async fn execute(&self, operation: &BatchOperation) -> ExecutorResult<Value> {
        let executor = self
            .get(&operation.op_type)
            .ok_or_else(|| ExecutorError::UnknownType {
                operation_type: operation.op_type.clone(),
            })?;
        executor.execute(operation).await
    }
}

/// Executor that fabricates a result instead of doing real work.
pub struct SimulatedExecutor {
    clock: Arc<dyn Clock>,
    latency: Duration,
}

impl fmt::Debug for SimulatedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedExecutor")
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl SimulatedExecutor {
    /// Creates an executor stamping results with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            latency: Duration::ZERO,
        }
    }

    /// Delays every result by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

#[async_trait]
impl OperationExecutor for SimulatedExecutor {
    async fn execute(&self, operation: &BatchOperation) -> ExecutorResult<Value> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(json!({
            "processed": true,
            "type": operation.op_type,
            "data": operation.data,
            "processedAt": self.clock.now(),
        }))
    }
}

/// Errors produced by executor registration and execution.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// Operation type was empty.
    #[error("operation type cannot be empty")]
    InvalidType,

    /// Operation type collided with an existing registration.
    #[error("executor for `{operation_type}` is already registered")]
    DuplicateType {
        /// Offending operation type.
        operation_type: String,
    },

    /// No executor handles the operation type.
    #[error("no executor registered for `{operation_type}`")]
    UnknownType {
        /// Operation type without an executor.
        operation_type: String,
    },

    /// The operation itself failed.
    #[error("operation failed: {reason}")]
    Failed {
        /// Human-readable error returned by the executor.
        reason: String,
    },

    /// The registry lock was poisoned by a panicking writer.
    #[error("executor registry lock poisoned")]
    Poisoned,
}

impl ExecutorError {
    /// Creates a failure from the supplied reason.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use runkit_primitives::ManualClock;

    #[tokio::test]
    async fn registry_dispatches_by_type() {
        let registry = ExecutorRegistry::new();
        registry
            .register("echo", |op: BatchOperation| async move { Ok(op.data) })
            .unwrap();

        let op = BatchOperation::new("1", "echo", json!({"message": "hello"}));
        let output = registry.execute(&op).await.unwrap();
        assert_eq!(output, json!({"message": "hello"}));
    }

    #[tokio::test]
    async fn duplicate_registration_errors() {
        let registry = ExecutorRegistry::new();
        registry
            .register("echo", |op: BatchOperation| async move { Ok(op.data) })
            .unwrap();

        let err = registry
            .register("echo", |op: BatchOperation| async move { Ok(op.data) })
            .expect_err("duplicate registration should fail");
        assert!(matches!(err, ExecutorError::DuplicateType { operation_type } if operation_type == "echo"));
        assert_eq!(registry.types(), vec!["echo".to_owned()]);
    }

    #[tokio::test]
    async fn unknown_type_errors() {
        let registry = ExecutorRegistry::new();
        let err = registry
            .execute(&BatchOperation::new("1", "missing", Value::Null))
            .await
            .expect_err("unknown type should error");
        assert!(matches!(err, ExecutorError::UnknownType { operation_type } if operation_type == "missing"));
    }

    #[tokio::test]
    async fn empty_type_is_rejected() {
        let registry = ExecutorRegistry::new();
        let err = registry
            .register("", |op: BatchOperation| async move { Ok(op.data) })
            .unwrap_err();
        assert_eq!(err, ExecutorError::InvalidType);
    }

    #[tokio::test]
    async fn simulated_executor_echoes_operation() {
        let clock = Arc::new(ManualClock::starting_now());
        let executor = SimulatedExecutor::new(clock.clone());
        let op = BatchOperation::new("1", "resize", json!({"w": 10}));

        let output = executor.execute(&op).await.unwrap();
        assert_eq!(output["processed"], json!(true));
        assert_eq!(output["type"], json!("resize"));
        assert_eq!(output["data"], json!({"w": 10}));
        assert_eq!(output["processedAt"], json!(clock.now()));
    }
}
