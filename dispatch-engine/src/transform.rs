//! Ordered, pluggable payload transformations, resolved by lifecycle scope.
//!
//! Transformations are registered as `(transformation id, transformer id)`
//! pairs against one or more scopes and applied serially in registration
//! order; each stage receives the previous stage's output and may drop the
//! dispatch outright by returning `None`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dispatch_core::Dispatch;
use tracing::{debug, warn};
use uuid::Uuid;

/// A lifecycle point at which transformations run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchScope {
    /// Right after collection, before the consent gate and enqueue.
    AfterCollect,
    /// The delivery path of every processor.
    AllProcessors,
    /// The delivery path of one named processor.
    Processor(String),
}

impl DispatchScope {
    /// Whether a transformation registered for `self` runs at `point`.
    /// `AllProcessors` registrations also cover every named processor scope.
    fn applies_at(&self, point: &DispatchScope) -> bool {
        self == point
            || (*self == DispatchScope::AllProcessors
                && matches!(point, DispatchScope::Processor(_)))
    }
}

#[async_trait]
pub trait Transformer: Send + Sync {
    fn id(&self) -> &str;

    /// Runs one transformation stage. Returning `None` drops the dispatch;
    /// the drop is final for the scope it happened in.
    async fn apply(
        &self,
        transformation_id: &str,
        dispatch: Dispatch,
        scope: &DispatchScope,
    ) -> Option<Dispatch>;
}

/// A registered transformation: which transformer runs it, under what id, and
/// at which lifecycle points.
#[derive(Clone)]
pub struct ScopedTransformation {
    pub id: String,
    pub transformer_id: String,
    pub scopes: Vec<DispatchScope>,
}

#[derive(Default)]
struct Registrations {
    transformers: HashMap<String, Arc<dyn Transformer>>,
    // Ordered; order of registration is the order of application.
    transformations: Vec<ScopedTransformation>,
}

/// Resolves and applies the transformations configured for a scope.
#[derive(Default)]
pub struct TransformerCoordinator {
    inner: RwLock<Registrations>,
}

impl TransformerCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces, by id) a transformer implementation.
    pub fn add_transformer(&self, transformer: Arc<dyn Transformer>) {
        let mut inner = self.inner.write().expect("registrations lock poisoned");
        inner
            .transformers
            .insert(transformer.id().to_string(), transformer);
    }

    /// Registers a transformation. A later registration with the same
    /// `(transformation id, transformer id)` pair replaces the earlier one,
    /// taking its place at the end of the order.
    pub fn register(&self, transformation: ScopedTransformation) {
        let mut inner = self.inner.write().expect("registrations lock poisoned");
        inner.transformations.retain(|t| {
            t.id != transformation.id || t.transformer_id != transformation.transformer_id
        });
        inner.transformations.push(transformation);
    }

    pub fn unregister(&self, transformation_id: &str, transformer_id: &str) {
        let mut inner = self.inner.write().expect("registrations lock poisoned");
        inner
            .transformations
            .retain(|t| t.id != transformation_id || t.transformer_id != transformer_id);
    }

    /// Applies every transformation matching `scope` to the dispatch, in
    /// registration order. `None` means some stage dropped it.
    pub async fn transform(&self, dispatch: Dispatch, scope: &DispatchScope) -> Option<Dispatch> {
        let mut chain = self.chain_for(scope);

        let mut current = dispatch;
        while let Some((transformation, transformer)) = chain.pop_front() {
            match transformer
                .apply(&transformation.id, current, scope)
                .await
            {
                Some(next) => current = next,
                None => {
                    debug!(
                        transformation = %transformation.id,
                        transformer = %transformation.transformer_id,
                        "dispatch dropped by transformation"
                    );
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Transforms a batch, running the per-dispatch chains concurrently.
    /// Output order follows input order, matched back by dispatch id; dropped
    /// dispatches are simply absent from the result.
    pub async fn transform_batch(
        &self,
        batch: Vec<Dispatch>,
        scope: &DispatchScope,
    ) -> Vec<Dispatch> {
        let order: Vec<Uuid> = batch.iter().map(Dispatch::id).collect();
        let results = futures::future::join_all(
            batch
                .into_iter()
                .map(|dispatch| self.transform(dispatch, scope)),
        )
        .await;

        let mut by_id: HashMap<Uuid, Dispatch> = results
            .into_iter()
            .flatten()
            .map(|d| (d.id(), d))
            .collect();
        order.into_iter().filter_map(|id| by_id.remove(&id)).collect()
    }

    // Snapshot of the matching (transformation, transformer) pairs, taken
    // under the lock so the chain is stable for the whole run.
    fn chain_for(
        &self,
        scope: &DispatchScope,
    ) -> VecDeque<(ScopedTransformation, Arc<dyn Transformer>)> {
        let inner = self.inner.read().expect("registrations lock poisoned");
        inner
            .transformations
            .iter()
            .filter(|t| t.scopes.iter().any(|s| s.applies_at(scope)))
            .filter_map(|t| match inner.transformers.get(&t.transformer_id) {
                Some(transformer) => Some((t.clone(), Arc::clone(transformer))),
                None => {
                    warn!(
                        transformation = %t.id,
                        transformer = %t.transformer_id,
                        "transformation references an unknown transformer"
                    );
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::DispatchType;
    use serde_json::json;

    /// Appends its transformation id to a "trace" list in the payload, or
    /// drops the dispatch when the transformation id is "drop".
    struct Tracing {
        id: String,
    }

    #[async_trait]
    impl Transformer for Tracing {
        fn id(&self) -> &str {
            &self.id
        }

        async fn apply(
            &self,
            transformation_id: &str,
            mut dispatch: Dispatch,
            _scope: &DispatchScope,
        ) -> Option<Dispatch> {
            if transformation_id == "drop" {
                return None;
            }
            let mut trace = dispatch.payload()["trace"].as_array().cloned().unwrap_or_default();
            trace.push(json!(transformation_id));
            dispatch.merge(json!({ "trace": trace }));
            Some(dispatch)
        }
    }

    fn coordinator_with_tracer() -> TransformerCoordinator {
        let coordinator = TransformerCoordinator::new();
        coordinator.add_transformer(Arc::new(Tracing { id: "tracer".to_string() }));
        coordinator
    }

    fn registration(id: &str, scopes: Vec<DispatchScope>) -> ScopedTransformation {
        ScopedTransformation {
            id: id.to_string(),
            transformer_id: "tracer".to_string(),
            scopes,
        }
    }

    fn event() -> Dispatch {
        Dispatch::new("event", DispatchType::Event, json!({}))
    }

    #[tokio::test]
    async fn chain_runs_in_registration_order() {
        let coordinator = coordinator_with_tracer();
        coordinator.register(registration("first", vec![DispatchScope::AfterCollect]));
        coordinator.register(registration("second", vec![DispatchScope::AfterCollect]));

        let out = coordinator
            .transform(event(), &DispatchScope::AfterCollect)
            .await
            .unwrap();
        assert_eq!(out.payload()["trace"], json!(["first", "second"]));
    }

    #[tokio::test]
    async fn drop_short_circuits_the_chain() {
        let coordinator = coordinator_with_tracer();
        coordinator.register(registration("first", vec![DispatchScope::AfterCollect]));
        coordinator.register(registration("drop", vec![DispatchScope::AfterCollect]));
        coordinator.register(registration("after", vec![DispatchScope::AfterCollect]));

        let out = coordinator
            .transform(event(), &DispatchScope::AfterCollect)
            .await;
        assert!(out.is_none());
    }

    #[tokio::test]
    async fn all_processors_scope_covers_named_processors() {
        let coordinator = coordinator_with_tracer();
        coordinator.register(registration("broad", vec![DispatchScope::AllProcessors]));
        coordinator.register(registration(
            "narrow",
            vec![DispatchScope::Processor("p1".to_string())],
        ));

        let p1 = coordinator
            .transform(event(), &DispatchScope::Processor("p1".to_string()))
            .await
            .unwrap();
        assert_eq!(p1.payload()["trace"], json!(["broad", "narrow"]));

        let p2 = coordinator
            .transform(event(), &DispatchScope::Processor("p2".to_string()))
            .await
            .unwrap();
        assert_eq!(p2.payload()["trace"], json!(["broad"]));

        // Processor scopes never run at the after-collect point.
        let collected = coordinator
            .transform(event(), &DispatchScope::AfterCollect)
            .await
            .unwrap();
        assert!(collected.payload()["trace"].is_null());
    }

    #[tokio::test]
    async fn duplicate_registration_replaces_the_earlier_one() {
        let coordinator = coordinator_with_tracer();
        coordinator.register(registration("only", vec![DispatchScope::AfterCollect]));
        // Re-register under the same pair with a different scope set.
        coordinator.register(registration("only", vec![DispatchScope::AllProcessors]));

        let collected = coordinator
            .transform(event(), &DispatchScope::AfterCollect)
            .await
            .unwrap();
        assert!(collected.payload()["trace"].is_null());

        let delivered = coordinator
            .transform(event(), &DispatchScope::Processor("p1".to_string()))
            .await
            .unwrap();
        assert_eq!(delivered.payload()["trace"], json!(["only"]));
    }

    #[tokio::test]
    async fn batch_output_is_matched_by_id() {
        let coordinator = coordinator_with_tracer();
        coordinator.register(registration("stamp", vec![DispatchScope::AfterCollect]));

        let a = event();
        let b = event();
        let ids = [a.id(), b.id()];
        let out = coordinator
            .transform_batch(vec![a, b], &DispatchScope::AfterCollect)
            .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id(), ids[0]);
        assert_eq!(out[1].id(), ids[1]);
    }

    #[tokio::test]
    async fn unregistered_transformation_no_longer_runs() {
        let coordinator = coordinator_with_tracer();
        coordinator.register(registration("gone", vec![DispatchScope::AfterCollect]));
        coordinator.unregister("gone", "tracer");

        let out = coordinator
            .transform(event(), &DispatchScope::AfterCollect)
            .await
            .unwrap();
        assert!(out.payload()["trace"].is_null());
    }
}
