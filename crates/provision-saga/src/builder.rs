use std::marker::PhantomData;
use std::sync::Arc;

use crate::guard::{IdempotencyGuard, InMemoryGuard};
use crate::pipeline::Pipeline;
use crate::step::Step;

/// Marker type for a builder with no steps.
pub struct Empty;

/// Marker type for a builder with at least one step.
pub struct HasSteps;

/// Type-state builder for pipelines.
///
/// `build()` only exists once a first step was added, so an empty pipeline
/// cannot be constructed:
///
/// ```compile_fail
/// use provision_saga::PipelineBuilder;
///
/// let pipeline = PipelineBuilder::<()>::new("empty").build();
/// ```
///
/// Without an explicit guard the pipeline uses a fresh [`InMemoryGuard`], so
/// markers only live as long as the run.
pub struct PipelineBuilder<D, State = Empty> {
    name: String,
    steps: Vec<Arc<dyn Step<Deps = D>>>,
    guard: Option<Arc<dyn IdempotencyGuard>>,
    _state: PhantomData<State>,
}

impl<D: 'static> PipelineBuilder<D, Empty> {
    /// Create a new pipeline builder in the empty state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            guard: None,
            _state: PhantomData,
        }
    }

    /// Add the first step to the pipeline.
    #[must_use]
    pub fn first_step<S>(self, step: S) -> PipelineBuilder<D, HasSteps>
    where
        S: Step<Deps = D> + 'static,
    {
        self.first_shared(Arc::new(step))
    }

    /// Add an already shared step as the first step.
    #[must_use]
    pub fn first_shared(self, step: Arc<dyn Step<Deps = D>>) -> PipelineBuilder<D, HasSteps> {
        let mut steps = self.steps;
        steps.push(step);
        PipelineBuilder {
            name: self.name,
            steps,
            guard: self.guard,
            _state: PhantomData,
        }
    }
}

impl<D, State> PipelineBuilder<D, State> {
    /// Use `guard` for completion markers instead of a per-run in-memory store.
    #[must_use]
    pub fn with_guard(mut self, guard: Arc<dyn IdempotencyGuard>) -> Self {
        self.guard = Some(guard);
        self
    }
}

impl<D: 'static> PipelineBuilder<D, HasSteps> {
    /// Add another step to the pipeline.
    #[must_use]
    pub fn then<S>(self, step: S) -> Self
    where
        S: Step<Deps = D> + 'static,
    {
        self.then_shared(Arc::new(step))
    }

    #[must_use]
    pub fn then_shared(mut self, step: Arc<dyn Step<Deps = D>>) -> Self {
        self.steps.push(step);
        self
    }

    /// Append several shared steps in order.
    #[must_use]
    pub fn then_all(mut self, steps: impl IntoIterator<Item = Arc<dyn Step<Deps = D>>>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Build the pipeline from the accumulated steps.
    #[must_use]
    pub fn build(self) -> Pipeline<D> {
        let guard = self
            .guard
            .unwrap_or_else(|| Arc::new(InMemoryGuard::new()));
        Pipeline::from_parts(self.name, self.steps, guard)
    }
}

impl<D: 'static> PipelineBuilder<D, Empty> {
    /// Build from a dynamic list of steps; `None` when the list is empty.
    #[must_use]
    pub fn from_steps(
        name: impl Into<String>,
        steps: Vec<Arc<dyn Step<Deps = D>>>,
    ) -> Option<PipelineBuilder<D, HasSteps>> {
        let mut steps = steps.into_iter();
        let first = steps.next()?;
        Some(Self::new(name).first_shared(first).then_all(steps))
    }
}
