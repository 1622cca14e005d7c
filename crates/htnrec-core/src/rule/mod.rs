//! HTN methods ("rules"): one main task decomposing into subtasks, with
//! condition templates over a pooled variable list.
//!
//! A rule stores every variable it mentions once, in `vars`. Subtask and
//! main-task parameters refer into that pool by index, as do the
//! pre/post/between condition templates. Grounding a rule (see
//! [`grounding`]) means choosing one subplan per subtask and unifying their
//! bindings into the pool.

pub mod grounding;
pub mod ordering;

use std::collections::BTreeSet;

use crate::domain::DomainError;
use crate::task::{Param, TaskType, TaskTypeId};
use crate::term::{Constant, Literal, Term};

pub use grounding::{GroundingContext, GroundingOutcome, RuleInstance, fill_with_all_constants};
pub use ordering::{SubtaskOrder, explicit_subtask_orderings};

/// Reserved predicate for "same-variable" constraints: `=(a, b)` requires
/// equal bindings, `!=(a, b)` distinct ones.
pub const EQUALITY_PREDICATE: &str = "=";

/// Index of a [`Rule`] in the domain arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub(crate) usize);

impl RuleId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a pre/postcondition attaches on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    /// The whole main task: its first (pre) or last (post) used position.
    Main,
    /// One subtask, by index in the rule's subtask list.
    Subtask(usize),
}

/// A literal whose arguments are indices into the rule's variable pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralTemplate {
    pub predicate: String,
    pub vars: Vec<usize>,
    pub positive: bool,
}

impl LiteralTemplate {
    pub fn new(predicate: impl Into<String>, vars: Vec<usize>, positive: bool) -> Self {
        Self {
            predicate: predicate.into(),
            vars,
            positive,
        }
    }

    pub fn ground(&self, pool: &[Constant]) -> Literal {
        let args = self.vars.iter().map(|v| pool[*v].clone()).collect();
        Literal::new(Term::new(self.predicate.clone(), args), self.positive)
    }

    pub fn is_equality(&self) -> bool {
        self.predicate == EQUALITY_PREDICATE
    }
}

/// A pre- or postcondition template with its anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub anchor: Anchor,
    pub literal: LiteralTemplate,
}

/// A literal that must hold from the end of subtask `from` to the start of
/// subtask `to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetweenCondition {
    pub from: usize,
    pub to: usize,
    pub literal: LiteralTemplate,
}

/// An HTN method.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: String,
    /// The declared method this rule was expanded from. Equals the rule's
    /// own position among declared methods when no expansion happened.
    pub origin: usize,
    pub main_task: TaskTypeId,
    pub subtasks: Vec<TaskTypeId>,
    /// Per subtask: parameter position -> pooled variable index.
    pub subtask_refs: Vec<Vec<usize>>,
    /// Main task parameter position -> pooled variable index.
    pub main_refs: Vec<usize>,
    /// The pooled variables with their declared types.
    pub vars: Vec<Param>,
    pub pre: Vec<Condition>,
    pub post: Vec<Condition>,
    pub between: Vec<BetweenCondition>,
    pub order: SubtaskOrder,
    // Derived by `derive_bounds`.
    pub(crate) before: Vec<BTreeSet<usize>>,
    pub(crate) after: Vec<BTreeSet<usize>>,
    pub(crate) min_before: Vec<usize>,
    pub(crate) min_after: Vec<usize>,
}

impl Rule {
    /// Create a totally ordered rule without conditions. Chain the
    /// builder-style setters for the rest.
    pub fn new(
        name: impl Into<String>,
        main_task: TaskTypeId,
        main_refs: Vec<usize>,
        vars: Vec<Param>,
    ) -> Self {
        Self {
            name: name.into(),
            origin: 0,
            main_task,
            subtasks: Vec::new(),
            subtask_refs: Vec::new(),
            main_refs,
            vars,
            pre: Vec::new(),
            post: Vec::new(),
            between: Vec::new(),
            order: SubtaskOrder::Total,
            before: Vec::new(),
            after: Vec::new(),
            min_before: Vec::new(),
            min_after: Vec::new(),
        }
    }

    /// Append a subtask whose parameters bind the given pooled variables.
    pub fn subtask(mut self, ty: TaskTypeId, refs: Vec<usize>) -> Self {
        self.subtasks.push(ty);
        self.subtask_refs.push(refs);
        self
    }

    pub fn precondition(mut self, anchor: Anchor, literal: LiteralTemplate) -> Self {
        self.pre.push(Condition { anchor, literal });
        self
    }

    pub fn postcondition(mut self, anchor: Anchor, literal: LiteralTemplate) -> Self {
        self.post.push(Condition { anchor, literal });
        self
    }

    pub fn between(mut self, from: usize, to: usize, literal: LiteralTemplate) -> Self {
        self.between.push(BetweenCondition { from, to, literal });
        self
    }

    pub fn order(mut self, order: SubtaskOrder) -> Self {
        self.order = order;
        self
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Every admissible subtask sequence under this rule's order.
    pub fn explicit_subtask_ordering(&self) -> Vec<Vec<usize>> {
        explicit_subtask_orderings(self.subtasks.len(), &self.order)
    }

    /// How many instances of `ty` one grounding of this rule consumes.
    pub fn multiplicity(&self, ty: TaskTypeId) -> usize {
        self.subtasks.iter().filter(|t| **t == ty).count()
    }

    /// Structural checks: every index in range, arities agree with the
    /// referenced task types, the order is acyclic.
    pub fn validate(&self, task_types: &[TaskType]) -> Result<(), DomainError> {
        let malformed = |detail: String| DomainError::MalformedMethod {
            method: self.name.clone(),
            detail,
        };
        let n = self.subtasks.len();
        let pool = self.vars.len();
        let var_in_range = |v: &usize| *v < pool;

        let main = task_types
            .get(self.main_task.0)
            .ok_or_else(|| malformed("main task out of range".to_string()))?;
        if main.params.len() != self.main_refs.len() {
            return Err(malformed(format!(
                "main task {} takes {} parameters, got {}",
                main.name,
                main.params.len(),
                self.main_refs.len()
            )));
        }
        if !self.main_refs.iter().all(var_in_range) {
            return Err(malformed("main task references unknown variable".to_string()));
        }
        if self.subtask_refs.len() != n {
            return Err(malformed("one reference list per subtask required".to_string()));
        }
        for (i, (ty, refs)) in self.subtasks.iter().zip(&self.subtask_refs).enumerate() {
            let sub = task_types
                .get(ty.0)
                .ok_or_else(|| malformed(format!("subtask {i} out of range")))?;
            if sub.params.len() != refs.len() {
                return Err(malformed(format!(
                    "subtask {i} ({}) takes {} parameters, got {}",
                    sub.name,
                    sub.params.len(),
                    refs.len()
                )));
            }
            if !refs.iter().all(var_in_range) {
                return Err(malformed(format!("subtask {i} references unknown variable")));
            }
        }
        for cond in self.pre.iter().chain(&self.post) {
            if let Anchor::Subtask(i) = cond.anchor {
                if i >= n {
                    return Err(malformed(format!("condition anchored to missing subtask {i}")));
                }
            }
            if !cond.literal.vars.iter().all(var_in_range) {
                return Err(malformed("condition references unknown variable".to_string()));
            }
        }
        for between in &self.between {
            if between.from >= n || between.to >= n {
                return Err(malformed(format!(
                    "between condition {} -> {} out of range",
                    between.from, between.to
                )));
            }
            if !between.literal.vars.iter().all(var_in_range) {
                return Err(malformed("between condition references unknown variable".to_string()));
            }
        }
        for (i, j) in self.order.pairs(n) {
            if i >= n || j >= n {
                return Err(malformed(format!("order pair ({i}, {j}) out of range")));
            }
        }
        let before = ordering::before_closure(n, &self.order.pairs(n));
        if ordering::has_cycle(&before) {
            return Err(DomainError::OrderCycle {
                method: self.name.clone(),
            });
        }
        Ok(())
    }

    /// A totally ordered copy whose subtask `k` is this rule's subtask
    /// `sequence[k]`, with anchors and between conditions remapped.
    pub fn linearized(&self, sequence: &[usize]) -> Rule {
        let mut position = vec![0; sequence.len()];
        for (k, old) in sequence.iter().enumerate() {
            position[*old] = k;
        }
        let remap = |anchor: Anchor| match anchor {
            Anchor::Main => Anchor::Main,
            Anchor::Subtask(i) => Anchor::Subtask(position[i]),
        };
        let mut rule = self.clone();
        rule.subtasks = sequence.iter().map(|i| self.subtasks[*i]).collect();
        rule.subtask_refs = sequence.iter().map(|i| self.subtask_refs[*i].clone()).collect();
        for cond in rule.pre.iter_mut().chain(rule.post.iter_mut()) {
            cond.anchor = remap(cond.anchor);
        }
        for between in &mut rule.between {
            between.from = position[between.from];
            between.to = position[between.to];
        }
        rule.order = SubtaskOrder::Total;
        rule
    }

    /// Recompute the order closures and the per-subtask length bounds used
    /// to prune candidate intervals.
    pub(crate) fn derive_bounds(&mut self, task_types: &[TaskType]) {
        let n = self.subtasks.len();
        self.before = ordering::before_closure(n, &self.order.pairs(n));
        self.after = ordering::after_closure(&self.before);
        let lengths: Vec<usize> = self
            .subtasks
            .iter()
            .map(|t| task_types[t.0].min_length)
            .collect();
        let sum = |set: &BTreeSet<usize>| {
            set.iter()
                .fold(0usize, |acc, i| acc.saturating_add(lengths[*i]))
        };
        self.min_before = self.before.iter().map(sum).collect();
        self.min_after = self.after.iter().map(sum).collect();
    }

    /// Whether subtask `i` must precede subtask `j`.
    pub fn precedes(&self, i: usize, j: usize) -> bool {
        self.before.get(j).is_some_and(|set| set.contains(&i))
    }

    pub fn min_length_before(&self, i: usize) -> usize {
        self.min_before.get(i).copied().unwrap_or(0)
    }

    pub fn min_length_after(&self, i: usize) -> usize {
        self.min_after.get(i).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::TypeId;

    fn task_types() -> Vec<TaskType> {
        let p = |n: &str| Param::new(n, TypeId::ANY);
        let mut prim = TaskType::new("a", vec![p("x")]);
        prim.min_length = 1;
        let mut two = TaskType::new("b", vec![p("x"), p("y")]);
        two.min_length = 2;
        let top = TaskType::new("top", vec![p("x")]);
        vec![prim, two, top]
    }

    fn vars(n: usize) -> Vec<Param> {
        (0..n).map(|i| Param::new(format!("v{i}"), TypeId::ANY)).collect()
    }

    #[test]
    fn validate_accepts_well_formed_rule() {
        let rule = Rule::new("m", TaskTypeId(2), vec![0], vars(2))
            .subtask(TaskTypeId(0), vec![0])
            .subtask(TaskTypeId(1), vec![0, 1])
            .precondition(Anchor::Subtask(1), LiteralTemplate::new("p", vec![1], true));
        rule.validate(&task_types()).unwrap();
    }

    #[test]
    fn validate_rejects_out_of_range_references() {
        let types = task_types();
        let bad_var = Rule::new("m", TaskTypeId(2), vec![5], vars(1));
        assert!(matches!(
            bad_var.validate(&types),
            Err(DomainError::MalformedMethod { .. })
        ));

        let bad_arity = Rule::new("m", TaskTypeId(2), vec![0], vars(1)).subtask(TaskTypeId(1), vec![0]);
        assert!(bad_arity.validate(&types).is_err());

        let bad_anchor = Rule::new("m", TaskTypeId(2), vec![0], vars(1))
            .postcondition(Anchor::Subtask(0), LiteralTemplate::new("p", vec![0], true));
        assert!(bad_anchor.validate(&types).is_err());

        let bad_order = Rule::new("m", TaskTypeId(2), vec![0], vars(1))
            .subtask(TaskTypeId(0), vec![0])
            .order(SubtaskOrder::Partial(vec![(0, 3)]));
        assert!(bad_order.validate(&types).is_err());
    }

    #[test]
    fn validate_rejects_cyclic_order() {
        let rule = Rule::new("loop", TaskTypeId(2), vec![0], vars(1))
            .subtask(TaskTypeId(0), vec![0])
            .subtask(TaskTypeId(0), vec![0])
            .order(SubtaskOrder::Partial(vec![(0, 1), (1, 0)]));
        assert!(matches!(
            rule.validate(&task_types()),
            Err(DomainError::OrderCycle { .. })
        ));
    }

    #[test]
    fn linearized_rule_remaps_anchors_and_between() {
        let rule = Rule::new("m", TaskTypeId(2), vec![0], vars(2))
            .subtask(TaskTypeId(0), vec![0])
            .subtask(TaskTypeId(1), vec![0, 1])
            .precondition(Anchor::Subtask(0), LiteralTemplate::new("p", vec![0], true))
            .between(0, 1, LiteralTemplate::new("q", vec![1], true))
            .order(SubtaskOrder::Partial(vec![]));
        let swapped = rule.linearized(&[1, 0]);
        assert_eq!(swapped.subtasks, vec![TaskTypeId(1), TaskTypeId(0)]);
        assert_eq!(swapped.subtask_refs, vec![vec![0, 1], vec![0]]);
        assert_eq!(swapped.pre[0].anchor, Anchor::Subtask(1));
        assert_eq!((swapped.between[0].from, swapped.between[0].to), (1, 0));
        assert_eq!(swapped.order, SubtaskOrder::Total);
    }

    #[test]
    fn bounds_sum_min_lengths_of_ordered_neighbours() {
        let mut rule = Rule::new("m", TaskTypeId(2), vec![0], vars(2))
            .subtask(TaskTypeId(0), vec![0])
            .subtask(TaskTypeId(1), vec![0, 1])
            .subtask(TaskTypeId(0), vec![1]);
        rule.derive_bounds(&task_types());
        assert_eq!(rule.min_length_before(0), 0);
        assert_eq!(rule.min_length_after(0), 3);
        assert_eq!(rule.min_length_before(2), 3);
        assert_eq!(rule.min_length_after(2), 0);
        assert!(rule.precedes(0, 2));
        assert!(!rule.precedes(2, 0));
        assert_eq!(rule.multiplicity(TaskTypeId(0)), 2);
    }
}
