//! Per-position condition records and state propagation along a timeline.
//!
//! A [`Slot`] holds what is known about one timeline position: literals
//! required before the action there (pre) and literals true after it
//! (post). A [`Timeline`] is a sparse map of slots; replaying it through a
//! [`State`] detects contradictions between positions.

use std::collections::{BTreeMap, BTreeSet};

use crate::term::{Literal, Term};

/// Condition state of one timeline position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Slot {
    /// Label of the action occupying the position, if any.
    pub term: Option<Term>,
    pub pre_pos: BTreeSet<Term>,
    pub pre_neg: BTreeSet<Term>,
    pub post_pos: BTreeSet<Term>,
    pub post_neg: BTreeSet<Term>,
}

impl Slot {
    pub fn labelled(term: Term) -> Self {
        Self {
            term: Some(term),
            ..Self::default()
        }
    }

    pub fn add_pre(&mut self, literal: &Literal) {
        let set = if literal.positive {
            &mut self.pre_pos
        } else {
            &mut self.pre_neg
        };
        set.insert(literal.atom.clone());
    }

    pub fn add_post(&mut self, literal: &Literal) {
        let set = if literal.positive {
            &mut self.post_pos
        } else {
            &mut self.post_neg
        };
        set.insert(literal.atom.clone());
    }

    pub fn remove_post(&mut self, literal: &Literal) {
        if literal.positive {
            self.post_pos.remove(&literal.atom);
        } else {
            self.post_neg.remove(&literal.atom);
        }
    }

    /// No atom is both required and forbidden, on either side.
    pub fn is_valid(&self) -> bool {
        self.pre_pos.is_disjoint(&self.pre_neg) && self.post_pos.is_disjoint(&self.post_neg)
    }

    pub fn merge(&mut self, other: &Slot) {
        if self.term.is_none() {
            self.term.clone_from(&other.term);
        }
        self.pre_pos.extend(other.pre_pos.iter().cloned());
        self.pre_neg.extend(other.pre_neg.iter().cloned());
        self.post_pos.extend(other.post_pos.iter().cloned());
        self.post_neg.extend(other.post_neg.iter().cloned());
    }
}

/// Partial knowledge of the world at one point.
///
/// A closed state treats every atom not in `pos` as false (the initial
/// state). An open state only knows what it was told.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub pos: BTreeSet<Term>,
    pub neg: BTreeSet<Term>,
    pub closed: bool,
}

impl State {
    pub fn open() -> Self {
        Self::default()
    }

    pub fn closed(atoms: impl IntoIterator<Item = Term>) -> Self {
        Self {
            pos: atoms.into_iter().collect(),
            neg: BTreeSet::new(),
            closed: true,
        }
    }

    pub fn is_true(&self, atom: &Term) -> bool {
        self.pos.contains(atom)
    }

    pub fn is_false(&self, atom: &Term) -> bool {
        self.neg.contains(atom) || (self.closed && !self.pos.contains(atom))
    }

    /// Check the slot's preconditions, then move to the state after it.
    /// Returns `false` on a contradiction, leaving `self` unspecified.
    pub fn apply(&mut self, slot: &Slot) -> bool {
        if slot.pre_pos.iter().any(|a| self.is_false(a))
            || slot.pre_neg.iter().any(|a| self.is_true(a))
        {
            return false;
        }
        for atom in &slot.pre_pos {
            self.pos.insert(atom.clone());
        }
        for atom in &slot.pre_neg {
            self.neg.insert(atom.clone());
        }
        self.apply_effects(slot);
        true
    }

    /// Move past the slot without checking its preconditions.
    pub fn apply_effects(&mut self, slot: &Slot) {
        for atom in &slot.post_neg {
            self.pos.remove(atom);
            self.neg.insert(atom.clone());
        }
        for atom in &slot.post_pos {
            self.neg.remove(atom);
            self.pos.insert(atom.clone());
        }
    }
}

/// How far [`Timeline::propagate`] trusts the gaps between used positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Restart from an open state after every gap; positions the subplan
    /// does not use may still be filled by others. A run starting at
    /// position 0 starts from the initial state.
    Local,
    /// The used positions are the whole plan: replay them all from the
    /// initial state.
    Global,
}

/// Sparse sequence of slots indexed by timeline position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    slots: BTreeMap<usize, Slot>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, position: usize) -> Option<&Slot> {
        self.slots.get(&position)
    }

    pub fn slot_mut(&mut self, position: usize) -> &mut Slot {
        self.slots.entry(position).or_default()
    }

    pub fn merge(&mut self, other: &Timeline) {
        for (position, slot) in &other.slots {
            self.slot_mut(*position).merge(slot);
        }
    }

    pub fn is_valid(&self) -> bool {
        self.slots.values().all(Slot::is_valid)
    }

    /// Replay the `used` positions in order. Returns the final state, or
    /// `None` when some slot contradicts what is known before it.
    pub fn propagate(
        &self,
        used: &BTreeSet<usize>,
        initial: &State,
        mode: Propagation,
    ) -> Option<State> {
        let mut state = State::open();
        let mut previous: Option<usize> = None;
        for &position in used {
            let restart = match previous {
                None => true,
                Some(prev) => mode == Propagation::Local && position != prev + 1,
            };
            if restart {
                state = if mode == Propagation::Global || position == 0 {
                    initial.clone()
                } else {
                    State::open()
                };
            }
            if let Some(slot) = self.slots.get(&position) {
                if !state.apply(slot) {
                    return None;
                }
            }
            previous = Some(position);
        }
        Some(state)
    }
}

/// Speculative record of what may hold at an unobserved position, used to
/// restrict hypothesized actions there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Megaslot {
    possible: BTreeSet<Term>,
}

impl Megaslot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every atom `state` knows to be true.
    pub fn absorb(&mut self, state: &State) {
        self.possible.extend(state.pos.iter().cloned());
    }

    pub fn absorb_effects(&mut self, effects: &[Literal]) {
        self.possible
            .extend(effects.iter().filter(|l| l.positive).map(|l| l.atom.clone()));
    }

    /// Positive preconditions must be possibly true; negative ones never
    /// rule an action out.
    pub fn admits(&self, preconditions: &[Literal]) -> bool {
        preconditions
            .iter()
            .filter(|l| l.positive)
            .all(|l| self.possible.contains(&l.atom))
    }

    pub fn possible(&self) -> &BTreeSet<Term> {
        &self.possible
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lattice::TypeId;
    use crate::term::Constant;

    fn atom(name: &str, args: &[&str]) -> Term {
        Term::new(
            name,
            args.iter().map(|a| Constant::new(*a, TypeId::ANY)).collect(),
        )
    }

    fn lit(name: &str, args: &[&str], positive: bool) -> Literal {
        Literal::new(atom(name, args), positive)
    }

    #[test]
    fn conflicting_postconditions_invalidate_slot() {
        let mut slot = Slot::default();
        slot.add_post(&lit("on", &["A", "B"], true));
        assert!(slot.is_valid());
        slot.add_post(&lit("on", &["A", "B"], false));
        assert!(!slot.is_valid());
        slot.remove_post(&lit("on", &["A", "B"], false));
        assert!(slot.is_valid());
    }

    #[test]
    fn conflicting_preconditions_invalidate_slot() {
        let mut slot = Slot::default();
        slot.add_pre(&lit("clear", &["A"], true));
        slot.add_pre(&lit("clear", &["A"], false));
        assert!(!slot.is_valid());
    }

    fn move_slot(from: &str, to: &str) -> Slot {
        let mut slot = Slot::labelled(atom("move", &[from, to]));
        slot.add_pre(&lit("at", &[from], true));
        slot.add_post(&lit("at", &[to], true));
        slot.add_post(&lit("at", &[from], false));
        slot
    }

    #[test]
    fn global_replay_follows_effects_from_initial_state() {
        let mut timeline = Timeline::new();
        timeline.slot_mut(0).merge(&move_slot("a", "b"));
        timeline.slot_mut(1).merge(&move_slot("b", "c"));
        let init = State::closed([atom("at", &["a"])]);
        let used = BTreeSet::from([0, 1]);

        let end = timeline.propagate(&used, &init, Propagation::Global).unwrap();
        assert!(end.is_true(&atom("at", &["c"])));
        assert!(end.is_false(&atom("at", &["a"])));
    }

    #[test]
    fn closed_initial_state_rejects_missing_precondition() {
        let mut timeline = Timeline::new();
        timeline.slot_mut(0).merge(&move_slot("b", "c"));
        let init = State::closed([atom("at", &["a"])]);
        let used = BTreeSet::from([0]);
        assert!(timeline.propagate(&used, &init, Propagation::Global).is_none());
    }

    #[test]
    fn local_replay_forgets_across_gaps() {
        let mut timeline = Timeline::new();
        timeline.slot_mut(1).merge(&move_slot("a", "b"));
        timeline.slot_mut(3).merge(&move_slot("a", "c"));
        let init = State::closed([]);
        let used = BTreeSet::from([1, 3]);

        // Something at position 2 might move back to `a`.
        assert!(timeline.propagate(&used, &init, Propagation::Local).is_some());
        // As a whole plan, position 1 already needs `at(a)`.
        assert!(timeline.propagate(&used, &init, Propagation::Global).is_none());
    }

    #[test]
    fn local_replay_detects_contiguous_conflict() {
        let mut timeline = Timeline::new();
        timeline.slot_mut(4).merge(&move_slot("a", "b"));
        timeline.slot_mut(5).merge(&move_slot("a", "c"));
        let used = BTreeSet::from([4, 5]);
        assert!(
            timeline
                .propagate(&used, &State::open(), Propagation::Local)
                .is_none()
        );
    }

    #[test]
    fn megaslot_admits_only_possible_positive_preconditions() {
        let mut megaslot = Megaslot::new();
        megaslot.absorb(&State::closed([atom("at", &["a"])]));
        assert!(megaslot.admits(&[lit("at", &["a"], true), lit("at", &["b"], false)]));
        assert!(!megaslot.admits(&[lit("at", &["b"], true)]));
        megaslot.absorb_effects(&[lit("at", &["b"], true)]);
        assert!(megaslot.admits(&[lit("at", &["b"], true)]));
        assert_eq!(megaslot.possible().len(), 2);
    }
}
