//! Subsystem spawning helper built on `tokio_graceful_shutdown`'s
//! structured-concurrency primitives.

use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle};

/// Lifecycle state of a spawned component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Starting,
    Running,
    Stopped,
    Failed,
}

/// Spawns `body` as a named child subsystem under `parent`.
pub fn spawn_child<F, Fut>(parent: &SubsystemHandle, name: &str, body: F)
where
    F: FnOnce(SubsystemHandle) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = miette::Result<()>> + Send + 'static,
{
    parent.start(SubsystemBuilder::new(name.to_string(), body));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_state_variants_are_distinct() {
        assert_ne!(AppState::Starting, AppState::Running);
        assert_ne!(AppState::Running, AppState::Failed);
    }
}
