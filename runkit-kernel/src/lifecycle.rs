//! Lifecycle state machine for a utility service.

use thiserror::Error;
use tracing::debug;

/// States a service can occupy during its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Stores constructed; background tasks not yet started.
    Init,
    /// Accepting operations; background tasks running.
    Running,
    /// Background tasks stopped; operations are refused.
    Stopped,
}

impl ServiceState {
    /// Returns `true` while the service accepts operations.
    #[must_use]
    pub const fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns `true` once the service has stopped.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Events that trigger lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Background tasks have been spawned.
    Start,
    /// Stop background tasks and refuse further operations.
    Shutdown,
}

/// Lifecycle state manager.
#[derive(Debug, Clone, Copy)]
pub struct Lifecycle {
    state: ServiceState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    /// Constructs a lifecycle in [`ServiceState::Init`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: ServiceState::Init,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> ServiceState {
        self.state
    }

    /// Applies a lifecycle event, returning the resulting state.
    ///
    /// Shutting down twice is allowed and leaves the service stopped.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] when the event is not
    /// allowed from the current state.
    pub fn transition(&mut self, event: LifecycleEvent) -> LifecycleResult<ServiceState> {
        let next = match (self.state, event) {
            (ServiceState::Init, LifecycleEvent::Start) => Some(ServiceState::Running),
            (_, LifecycleEvent::Shutdown) => Some(ServiceState::Stopped),
            _ => None,
        };

        let Some(next_state) = next else {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                event,
            });
        };

        if next_state != self.state {
            debug!(?self.state, ?next_state, ?event, "service lifecycle transition");
            self.state = next_state;
        }

        Ok(self.state)
    }
}

/// Errors emitted by the lifecycle controller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// Transition was not permitted from the current state.
    #[error("invalid lifecycle transition from {from:?} via {event:?}")]
    InvalidTransition {
        /// State prior to the attempted transition.
        from: ServiceState,
        /// Event that triggered the failure.
        event: LifecycleEvent,
    },
}

/// Result alias used for lifecycle operations.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_shutdown() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ServiceState::Init);
        assert!(
            lifecycle
                .transition(LifecycleEvent::Start)
                .unwrap()
                .is_running()
        );
        assert!(
            lifecycle
                .transition(LifecycleEvent::Shutdown)
                .unwrap()
                .is_terminal()
        );
        assert_eq!(
            lifecycle.transition(LifecycleEvent::Shutdown).unwrap(),
            ServiceState::Stopped
        );
    }

    #[test]
    fn stopped_service_cannot_restart() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.transition(LifecycleEvent::Shutdown).unwrap();
        let err = lifecycle.transition(LifecycleEvent::Start).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                from: ServiceState::Stopped,
                event: LifecycleEvent::Start,
            }
        );
    }
}
