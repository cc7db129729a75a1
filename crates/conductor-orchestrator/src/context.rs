use crate::types::StepOutcome;
use conductor_core::OrchestrationError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Step results visible to a dispatched step, keyed by step id.
pub type PriorResults = BTreeMap<String, StepOutcome>;

/// Write-once store of step results for a single plan execution.
///
/// Owned by the scheduler's round loop. Dispatched steps only ever see
/// immutable snapshots, so no lock is needed; a second write for the same step
/// is rejected instead of overwriting.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    results: PriorResults,
}

impl ExecutionContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Result of `step_id`, if recorded.
    pub fn get(&self, step_id: &str) -> Option<&StepOutcome> {
        self.results.get(step_id)
    }

    /// Whether `step_id` has a result.
    pub fn contains(&self, step_id: &str) -> bool {
        self.results.contains_key(step_id)
    }

    /// Record the result of `step_id`. Fails with `DuplicateResult` if it was
    /// already recorded.
    pub fn set(
        &mut self,
        step_id: impl Into<String>,
        outcome: StepOutcome,
    ) -> Result<(), OrchestrationError> {
        let step_id = step_id.into();
        if self.results.contains_key(&step_id) {
            return Err(OrchestrationError::DuplicateResult { step_id });
        }
        self.results.insert(step_id, outcome);
        Ok(())
    }

    /// Number of recorded results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether no result is recorded.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Immutable copy of every recorded result.
    pub fn snapshot(&self) -> Arc<PriorResults> {
        Arc::new(self.results.clone())
    }

    /// Immutable copy restricted to the given dependency ids.
    pub fn snapshot_for<'a>(
        &self,
        dependencies: impl IntoIterator<Item = &'a String>,
    ) -> Arc<PriorResults> {
        let scoped = dependencies
            .into_iter()
            .filter_map(|dep| self.results.get(dep).map(|r| (dep.clone(), r.clone())))
            .collect();
        Arc::new(scoped)
    }

    /// Consume the context, yielding every result.
    pub fn into_results(self) -> PriorResults {
        self.results
    }
}
