//! Step executor registry
//!
//! Maps each [`StepKind`] to the executor that performs its work. The same
//! registry is shared by in-context execution and the isolated runner.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use stationflow_schemas::StepKind;

use super::{StepContext, StepError, StepExecutor, StepInput};

/// Adapter that lets a plain async closure act as an executor
struct FnExecutor<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> StepExecutor for FnExecutor<F>
where
    F: Fn(StepContext, StepInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    async fn execute(&self, ctx: &StepContext, input: StepInput) -> Result<Value, StepError> {
        (self.func)(ctx.clone(), input).await
    }
}

/// Registry of step executors, keyed by step kind
#[derive(Clone, Default)]
pub struct StepExecutorRegistry {
    executors: HashMap<StepKind, Arc<dyn StepExecutor>>,
}

impl StepExecutorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for `kind`
    pub fn register<E: StepExecutor>(&mut self, kind: StepKind, executor: E) -> &mut Self {
        self.executors.insert(kind, Arc::new(executor));
        self
    }

    /// Register the same executor for several kinds
    pub fn register_shared(
        &mut self,
        kinds: impl IntoIterator<Item = StepKind>,
        executor: Arc<dyn StepExecutor>,
    ) -> &mut Self {
        for kind in kinds {
            self.executors.insert(kind, executor.clone());
        }
        self
    }

    /// Register an async closure as the executor for `kind`
    ///
    /// # Example
    ///
    /// ```ignore
    /// registry.register_fn(StepKind::Themes, |_ctx, input| async move {
    ///     Ok(json!({ "inputSize": input.input_data.len() }))
    /// });
    /// ```
    pub fn register_fn<F, Fut>(&mut self, kind: StepKind, func: F) -> &mut Self
    where
        F: Fn(StepContext, StepInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        self.register(kind, FnExecutor { func })
    }

    /// Get the executor for a kind
    pub fn get(&self, kind: StepKind) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&kind).cloned()
    }

    /// Check if a kind has an executor
    pub fn contains(&self, kind: StepKind) -> bool {
        self.executors.contains_key(&kind)
    }

    /// Registered kinds, in declaration order
    pub fn kinds(&self) -> Vec<StepKind> {
        StepKind::ALL
            .into_iter()
            .filter(|kind| self.executors.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl fmt::Debug for StepExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    struct Echo;

    #[async_trait]
    impl StepExecutor for Echo {
        async fn execute(&self, ctx: &StepContext, _input: StepInput) -> Result<Value, StepError> {
            Ok(json!({ "step": ctx.step_id }))
        }
    }

    #[test]
    fn test_registry_register() {
        let mut registry = StepExecutorRegistry::new();
        assert!(registry.is_empty());

        registry.register(StepKind::Full, Echo);
        registry.register_fn(StepKind::Characters, |_ctx, _input| async { Ok(json!(1)) });

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(StepKind::Full));
        assert!(!registry.contains(StepKind::Themes));
        assert_eq!(registry.kinds(), vec![StepKind::Characters, StepKind::Full]);
    }

    #[test]
    fn test_register_shared() {
        let mut registry = StepExecutorRegistry::new();
        registry.register_shared(StepKind::ALL, Arc::new(Echo));
        assert_eq!(registry.kinds().len(), StepKind::ALL.len());
    }

    #[tokio::test]
    async fn test_closure_executor_receives_input() {
        let mut registry = StepExecutorRegistry::new();
        registry.register_fn(StepKind::Themes, |ctx, input| async move {
            Ok(json!({
                "attempt": ctx.attempt,
                "inputSize": input.input_data.len(),
            }))
        });

        let executor = registry.get(StepKind::Themes).unwrap();
        let ctx = StepContext::new("e", "a", 2, 3, CancellationToken::new());
        let mut input = StepInput::default();
        input.input_data.insert("text".into(), json!("hello"));

        let output = executor.execute(&ctx, input).await.unwrap();
        assert_eq!(output, json!({ "attempt": 2, "inputSize": 1 }));
    }
}
