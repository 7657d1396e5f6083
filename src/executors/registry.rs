//! Executor registry with a default backend.

use std::collections::HashMap;
use std::sync::Arc;

use crate::executors::Executor;

/// Executors by name plus the default used when routing names none.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
    default: Option<String>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor. The first registration becomes the default
    /// unless a later one passes `is_default`.
    pub fn register(&mut self, executor: Arc<dyn Executor>, is_default: bool) {
        let name = executor.name().to_string();
        if is_default || self.default.is_none() {
            self.default = Some(name.clone());
        }
        self.executors.insert(name.clone(), executor);
        tracing::debug!(executor = %name, is_default, "Registered executor");
    }

    /// Executor by name, or the default for `None`.
    pub fn get(&self, name: Option<&str>) -> Option<Arc<dyn Executor>> {
        let name = name.or(self.default.as_deref())?;
        self.executors.get(name).cloned()
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.as_deref()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.executors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorError;
    use crate::executors::{ExecutorArtifacts, ExecutorStatus, ExecutorTask, LogStream};
    use async_trait::async_trait;
    use futures::StreamExt;

    struct NamedExecutor(&'static str);

    #[async_trait]
    impl Executor for NamedExecutor {
        fn name(&self) -> &str {
            self.0
        }
        async fn start(&self, _task: &ExecutorTask) -> Result<String, ExecutorError> {
            Ok("run-1".into())
        }
        async fn get_status(&self, _run_id: &str) -> Result<ExecutorStatus, ExecutorError> {
            Ok(ExecutorStatus::Completed)
        }
        async fn stream_logs(&self, _run_id: &str) -> Result<LogStream, ExecutorError> {
            Ok(futures::stream::empty().boxed())
        }
        async fn get_artifacts(&self, _run_id: &str) -> Result<ExecutorArtifacts, ExecutorError> {
            Ok(ExecutorArtifacts::default())
        }
        async fn cancel(&self, _run_id: &str) -> bool {
            true
        }
    }

    #[test]
    fn first_registered_is_default() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(NamedExecutor("openhands")), false);
        registry.register(Arc::new(NamedExecutor("claude_code")), false);

        assert_eq!(registry.default_name(), Some("openhands"));
        assert_eq!(registry.get(None).unwrap().name(), "openhands");
        assert_eq!(registry.get(Some("claude_code")).unwrap().name(), "claude_code");
    }

    #[test]
    fn explicit_default_overrides() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(NamedExecutor("openhands")), false);
        registry.register(Arc::new(NamedExecutor("codex")), true);

        assert_eq!(registry.get(None).unwrap().name(), "codex");
    }

    #[test]
    fn missing_names_resolve_to_none() {
        let registry = ExecutorRegistry::new();
        assert!(registry.get(None).is_none());
        assert!(registry.get(Some("openhands")).is_none());
    }
}
