//! Handler registry: task kind → processor.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::Handler;

/// Maps task kinds to their handlers.
///
/// Populated at startup; lookups afterwards are read-only.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<&'static str, Arc<dyn Handler>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        let kind = handler.kind();
        self.handlers.insert(kind, handler);
        info!(kind, "registered handler");
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn has(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted for stable logging.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("kinds", &self.kinds()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::broker::DequeuedTask;
    use crate::worker::{ProcessResult, TaskContext};
    use async_trait::async_trait;

    struct NoopHandler;

    #[async_trait]
    impl Handler for NoopHandler {
        fn kind(&self) -> &'static str {
            "noop"
        }

        async fn process(&self, _ctx: TaskContext, _task: DequeuedTask) -> ProcessResult {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = Registry::new();
        registry.register(Arc::new(NoopHandler));

        assert!(registry.has("noop"));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("other").is_none());
        assert_eq!(registry.kinds(), vec!["noop"]);
    }
}
