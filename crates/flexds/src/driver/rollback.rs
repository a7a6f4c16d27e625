//! Undo stack for the mount pipeline.

use flexds_common::{FlexResult, Phase};

type Undo<'a> = Box<dyn FnOnce() -> FlexResult<()> + Send + 'a>;

/// Compensating actions for the steps that completed so far.
///
/// Actions are registered as steps succeed and run newest first by
/// [`Rollback::unwind`]. A rollback that is never unwound or committed does
/// nothing when dropped.
#[derive(Default)]
pub struct Rollback<'a> {
    steps: Vec<(Phase, Undo<'a>)>,
}

impl<'a> Rollback<'a> {
    /// Create an empty rollback.
    #[must_use]
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Register the action that undoes a completed step.
    pub fn push<F>(&mut self, phase: Phase, undo: F)
    where
        F: FnOnce() -> FlexResult<()> + Send + 'a,
    {
        self.steps.push((phase, Box::new(undo)));
    }

    /// Number of registered actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no action is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Forget every action; the completed steps are kept.
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Run every action, newest first.
    ///
    /// A failing action is logged and does not stop the remaining ones.
    /// Returns the phases that were undone, in execution order.
    pub fn unwind(mut self) -> Vec<Phase> {
        let mut undone = Vec::with_capacity(self.steps.len());
        while let Some((phase, undo)) = self.steps.pop() {
            tracing::debug!(%phase, "Rolling back");
            if let Err(err) = undo() {
                tracing::warn!(%phase, error = %err, "Rollback step failed");
            }
            undone.push(phase);
        }
        undone
    }
}

impl std::fmt::Debug for Rollback<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|(phase, _)| phase))
            .finish()
    }
}
