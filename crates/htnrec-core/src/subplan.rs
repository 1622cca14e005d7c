//! Subplans and the chart that owns them.
//!
//! A [`Subplan`] is a task occurrence together with the timeline positions
//! it accounts for, the condition records of those positions and the
//! derivation that justifies it. The [`Chart`] is the per-session arena of
//! subplans: it assigns ids, indexes them by task type, stamps the
//! iteration in which each task type received new instances, and drops
//! duplicates.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::domain::Domain;
use crate::rule::{Anchor, RuleInstance};
use crate::task::{Action, Task, TaskTypeId};
use crate::timeline::{Propagation, Slot, State, Timeline};

/// Index of a [`Subplan`] in its [`Chart`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubplanId(pub(crate) usize);

impl SubplanId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Closed interval of timeline positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn at(position: usize) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    /// Smallest span covering both.
    pub fn cover(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// How a subplan came to be.
#[derive(Debug, Clone)]
pub enum Origin {
    Observed,
    Hypothesized,
    Rule(RuleInstance),
}

#[derive(Debug, Clone)]
pub struct Subplan {
    pub task: Task,
    /// `None` for subplans of zero-subtask methods.
    pub span: Option<Span>,
    pub used: BTreeSet<usize>,
    /// The grounded actions this subplan is built from, by position.
    pub leaves: BTreeMap<usize, Action>,
    pub timeline: Timeline,
    pub iteration: usize,
    pub origin: Origin,
}

/// Condition record of a single action: its preconditions before, its
/// effects after. An atom both added and deleted ends up added.
pub fn leaf_slot(domain: &Domain, action: &Action) -> Slot {
    let action_type = domain.action_type(action.ty);
    let mut slot = Slot::labelled(domain.action_term(action));
    for literal in action_type.ground_pre(&action.args) {
        slot.add_pre(&literal);
    }
    let effects = action_type.ground_effects(&action.args);
    for literal in &effects {
        let overridden = !literal.positive
            && effects
                .iter()
                .any(|other| other.positive && other.atom == literal.atom);
        if !overridden {
            slot.add_post(literal);
        }
    }
    slot
}

impl Subplan {
    /// A single action at `position`, standing for its primitive task.
    pub fn leaf(
        domain: &Domain,
        action: Action,
        position: usize,
        iteration: usize,
        origin: Origin,
    ) -> Self {
        let mut timeline = Timeline::new();
        *timeline.slot_mut(position) = leaf_slot(domain, &action);
        Self {
            task: action.as_task(domain.action_type(action.ty)),
            span: Some(Span::at(position)),
            used: BTreeSet::from([position]),
            leaves: BTreeMap::from([(position, action)]),
            timeline,
            iteration,
            origin,
        }
    }

    /// Merge the chosen children of `instance` and anchor its conditions:
    /// preconditions at the start of their anchor, postconditions at its
    /// end, between conditions on every position after `from` up to the
    /// start of `to`. Conditions anchored on span-less children are
    /// dropped.
    pub fn compose(instance: RuleInstance, children: &[&Subplan], iteration: usize) -> Self {
        let mut used = BTreeSet::new();
        let mut leaves = BTreeMap::new();
        let mut timeline = Timeline::new();
        for child in children {
            used.extend(child.used.iter().copied());
            leaves.extend(child.leaves.iter().map(|(p, a)| (*p, a.clone())));
            timeline.merge(&child.timeline);
        }
        let span = children.iter().filter_map(|c| c.span).reduce(Span::cover);
        let anchored = |anchor: Anchor| match anchor {
            Anchor::Main => span,
            Anchor::Subtask(i) => children.get(i).and_then(|c| c.span),
        };

        for (anchor, literal) in &instance.pre {
            if let Some(s) = anchored(*anchor) {
                timeline.slot_mut(s.start).add_pre(literal);
            }
        }
        for (anchor, literal) in &instance.post {
            if let Some(s) = anchored(*anchor) {
                timeline.slot_mut(s.end).add_post(literal);
            }
        }
        for (from, to, literal) in &instance.between {
            let from = anchored(Anchor::Subtask(*from));
            let to = anchored(Anchor::Subtask(*to));
            if let (Some(from), Some(to)) = (from, to) {
                for position in from.end + 1..=to.start {
                    timeline.slot_mut(position).add_pre(literal);
                }
            }
        }

        Self {
            task: instance.main.clone(),
            span,
            used,
            leaves,
            timeline,
            iteration,
            origin: Origin::Rule(instance),
        }
    }

    pub fn overlaps(&self, other: &Subplan) -> bool {
        !self.used.is_disjoint(&other.used)
    }

    /// Slot validity everywhere plus local propagation across its
    /// contiguous runs of used positions.
    pub fn is_locally_valid(&self, initial: &State) -> bool {
        self.timeline.is_valid()
            && self
                .timeline
                .propagate(&self.used, initial, Propagation::Local)
                .is_some()
    }

    /// State after the last used position under local propagation.
    pub fn end_state(&self, initial: &State) -> Option<State> {
        self.timeline
            .propagate(&self.used, initial, Propagation::Local)
    }
}

/// Arena of subplans for one recognition session.
#[derive(Debug, Default)]
pub struct Chart {
    subplans: Vec<Subplan>,
    by_type: HashMap<TaskTypeId, Vec<SubplanId>>,
    known: HashSet<(Task, BTreeMap<usize, Action>)>,
    activations: HashSet<(TaskTypeId, usize)>,
}

impl Chart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subplan unless one with the same task and leaves is already
    /// known. Returns the new id, or `None` for a duplicate.
    pub fn insert(&mut self, subplan: Subplan) -> Option<SubplanId> {
        let key = (subplan.task.clone(), subplan.leaves.clone());
        if !self.known.insert(key) {
            return None;
        }
        let id = SubplanId(self.subplans.len());
        let ty = subplan.task.ty;
        self.activations.insert((ty, subplan.iteration));
        self.by_type.entry(ty).or_default().push(id);
        self.subplans.push(subplan);
        Some(id)
    }

    pub fn get(&self, id: SubplanId) -> &Subplan {
        &self.subplans[id.0]
    }

    pub fn instances_of(&self, ty: TaskTypeId) -> &[SubplanId] {
        self.by_type.get(&ty).map_or(&[], Vec::as_slice)
    }

    pub fn count_of(&self, ty: TaskTypeId) -> usize {
        self.instances_of(ty).len()
    }

    /// Whether `ty` received a new instance stamped `iteration`.
    pub fn activated_at(&self, ty: TaskTypeId, iteration: usize) -> bool {
        self.activations.contains(&(ty, iteration))
    }

    /// Task types activated at `iteration`.
    pub fn activated_types(&self, iteration: usize) -> BTreeSet<TaskTypeId> {
        self.activations
            .iter()
            .filter(|(_, i)| *i == iteration)
            .map(|(ty, _)| *ty)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subplans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subplans.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SubplanId, &Subplan)> {
        self.subplans
            .iter()
            .enumerate()
            .map(|(i, s)| (SubplanId(i), s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parser::parse_domain_toml;

    const DOMAIN: &str = r#"
[[types]]
name = "place"

[[constants]]
name = "a"
type = "place"

[[constants]]
name = "b"
type = "place"

[[actions]]
name = "go"
params = ["from:place", "to:place"]
pre = ["at(from)"]
add = ["at(to)"]
del = ["at(from)"]

[[actions]]
name = "stay"
params = ["p:place"]
pre = ["at(p)"]
add = ["at(p)"]
del = ["at(p)"]
"#;

    fn go(domain: &Domain, from: &str, to: &str) -> Action {
        let ty = domain.find_action("go", 2).unwrap();
        let args = [from, to]
            .iter()
            .map(|n| domain.constant(n).unwrap().clone())
            .collect();
        Action::new(ty, args)
    }

    #[test]
    fn leaf_slot_lets_add_win_over_delete() {
        let domain = parse_domain_toml(DOMAIN).unwrap();
        let ty = domain.find_action("stay", 1).unwrap();
        let stay = Action::new(ty, vec![domain.constant("a").unwrap().clone()]);
        let slot = leaf_slot(&domain, &stay);
        assert!(slot.is_valid());
        assert_eq!(slot.post_pos.len(), 1);
        assert!(slot.post_neg.is_empty());
    }

    #[test]
    fn chart_drops_duplicates_and_tracks_activation() {
        let domain = parse_domain_toml(DOMAIN).unwrap();
        let mut chart = Chart::new();
        let leaf = Subplan::leaf(&domain, go(&domain, "a", "b"), 0, 0, Origin::Observed);
        let ty = leaf.task.ty;

        let id = chart.insert(leaf.clone()).unwrap();
        assert!(chart.insert(leaf).is_none());
        assert_eq!(chart.instances_of(ty), &[id]);
        assert!(chart.activated_at(ty, 0));
        assert!(!chart.activated_at(ty, 1));

        let other = Subplan::leaf(&domain, go(&domain, "a", "b"), 1, 2, Origin::Hypothesized);
        chart.insert(other).unwrap();
        assert_eq!(chart.count_of(ty), 2);
        assert_eq!(chart.activated_types(2), BTreeSet::from([ty]));
    }

    #[test]
    fn leaf_at_position_zero_checks_initial_state() {
        let domain = parse_domain_toml(DOMAIN).unwrap();
        let at = |n: &str| {
            crate::term::Term::new("at", vec![domain.constant(n).unwrap().clone()])
        };
        let leaf = Subplan::leaf(&domain, go(&domain, "a", "b"), 0, 0, Origin::Observed);
        assert!(leaf.is_locally_valid(&State::closed([at("a")])));
        assert!(!leaf.is_locally_valid(&State::closed([at("b")])));

        // Away from position 0 nothing is known about the state before it.
        let later = Subplan::leaf(&domain, go(&domain, "a", "b"), 3, 0, Origin::Observed);
        assert!(later.is_locally_valid(&State::closed([at("b")])));
        let end = later.end_state(&State::closed([])).unwrap();
        assert!(end.is_true(&at("b")));
        assert!(end.is_false(&at("a")));
    }
}
