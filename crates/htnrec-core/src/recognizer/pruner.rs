//! Candidate actions for unobserved timeline positions.

use tokio_util::sync::CancellationToken;

use crate::domain::Domain;
use crate::task::Action;

/// What the engine asks a [`SuffixPruner`] for.
#[derive(Debug, Clone, Copy)]
pub struct PruneRequest<'a> {
    pub domain: &'a Domain,
    /// The observed actions, in order.
    pub observed: &'a [Action],
    /// Unobserved positions to propose actions for.
    pub positions: &'a [usize],
    /// Number of unobserved positions in the current layout.
    pub level: usize,
}

/// Restricts which actions may appear at unobserved positions.
///
/// Returns one candidate list per requested position, in request order.
/// Candidates may leave arguments unbound; the engine grounds them over
/// the domain constants. `None` means no admissible continuation exists.
/// Implementations should return promptly once `cancel` fires.
pub trait SuffixPruner: Send + Sync {
    fn pruned_suffix(
        &self,
        request: &PruneRequest<'_>,
        cancel: &CancellationToken,
    ) -> Option<Vec<Vec<Action>>>;
}

/// Proposes every action that some method uses as a subtask, fully
/// unbound, at every position.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainSuffixPruner;

impl SuffixPruner for DomainSuffixPruner {
    fn pruned_suffix(
        &self,
        request: &PruneRequest<'_>,
        cancel: &CancellationToken,
    ) -> Option<Vec<Vec<Action>>> {
        let domain = request.domain;
        let candidates: Vec<Action> = domain
            .action_type_ids()
            .filter(|id| {
                let task = domain.action_type(*id).task;
                !domain.rules_with_subtask(task).is_empty()
            })
            .map(|id| Action::unbound(id, domain.action_type(id)))
            .collect();
        if cancel.is_cancelled() || candidates.is_empty() {
            return None;
        }
        Some(vec![candidates; request.positions.len()])
    }
}
