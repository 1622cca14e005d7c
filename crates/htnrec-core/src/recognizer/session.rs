//! One recognition attempt over a fixed layout of observed and unobserved
//! positions.
//!
//! A session alternates bottom-up passes (ground every rule that has a
//! subtask type with new instances, compose, keep what is valid and new)
//! with opening unobserved positions (ask the pruner, ground and filter
//! its candidates, seed them as hypothesized leaves). Every kept subplan is
//! checked against the goal as soon as it enters the chart.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tokio_util::sync::CancellationToken;

use super::pruner::{PruneRequest, SuffixPruner};
use super::{
    InsertedAction, NodeSource, PlanNode, RecognizedPlan, RecognizerConfig, ResolvedProblem,
    SearchStats,
};
use crate::domain::Domain;
use crate::rule::{GroundingContext, RuleId, RuleInstance, fill_with_all_constants};
use crate::subplan::{Chart, Origin, Subplan, SubplanId, leaf_slot};
use crate::task::Action;
use crate::timeline::{Megaslot, Propagation};

/// Cancellation was observed; the session state is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Interrupted;

/// Read-only inputs shared by every session of one recognition run.
#[derive(Clone, Copy)]
pub(crate) struct Env<'a> {
    pub domain: &'a Domain,
    pub problem: &'a ResolvedProblem,
    pub config: &'a RecognizerConfig,
    pub pruner: &'a dyn SuffixPruner,
    pub cancel: &'a CancellationToken,
}

/// What a timeline position holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cell {
    /// Index into the observed actions.
    Observed(usize),
    Hole,
}

/// Observed actions in order, with holes before the given layout
/// positions.
pub(crate) fn layout_with_holes(observed: usize, holes: &[usize]) -> Vec<Cell> {
    let size = observed + holes.len();
    let mut next = 0;
    (0..size)
        .map(|position| {
            if holes.contains(&position) {
                Cell::Hole
            } else {
                next += 1;
                Cell::Observed(next - 1)
            }
        })
        .collect()
}

pub(crate) struct Session<'a> {
    env: Env<'a>,
    layout: Vec<Cell>,
    observed_positions: BTreeSet<usize>,
    chart: Chart,
    iteration: usize,
    /// Every (position, action) hypothesized so far.
    registry: HashSet<(usize, Action)>,
    hypotheses: BTreeMap<usize, Vec<Action>>,
    found: Option<SubplanId>,
    pub(crate) stats: SearchStats,
}

impl<'a> Session<'a> {
    /// Seed one leaf per observed position, stamped iteration 0.
    pub(crate) fn new(env: Env<'a>, layout: Vec<Cell>) -> Self {
        let observed_positions = layout
            .iter()
            .enumerate()
            .filter(|(_, cell)| matches!(cell, Cell::Observed(_)))
            .map(|(p, _)| p)
            .collect();
        let mut session = Self {
            env,
            layout,
            observed_positions,
            chart: Chart::new(),
            iteration: 0,
            registry: HashSet::new(),
            hypotheses: BTreeMap::new(),
            found: None,
            stats: SearchStats::default(),
        };
        for position in 0..session.layout.len() {
            if let Cell::Observed(index) = session.layout[position] {
                let action = env.problem.observed[index].clone();
                let leaf = Subplan::leaf(env.domain, action, position, 0, Origin::Observed);
                session.admit(leaf);
            }
        }
        session
    }

    fn check_cancel(&self) -> Result<(), Interrupted> {
        if self.env.cancel.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Saturate, then open each hole in layout order, saturating after
    /// each one.
    pub(crate) fn run(&mut self) -> Result<Option<SubplanId>, Interrupted> {
        if let Some(root) = self.saturate()? {
            return Ok(Some(root));
        }
        let holes: Vec<usize> = (0..self.layout.len())
            .filter(|p| self.layout[*p] == Cell::Hole)
            .collect();
        for position in holes {
            self.open_hole(position)?;
            if let Some(root) = self.saturate()? {
                return Ok(Some(root));
            }
        }
        Ok(None)
    }

    /// Append a hole to the layout and open it.
    pub(crate) fn push_hole(&mut self) -> Result<(), Interrupted> {
        self.layout.push(Cell::Hole);
        self.open_hole(self.layout.len() - 1)
    }

    /// Run bottom-up passes until one produces nothing new or the goal is
    /// reached.
    pub(crate) fn saturate(&mut self) -> Result<Option<SubplanId>, Interrupted> {
        loop {
            if let Some(root) = self.found {
                return Ok(Some(root));
            }
            self.check_cancel()?;
            let produced = self.bottom_up_pass()?;
            tracing::debug!(
                iteration = self.iteration,
                produced,
                subplans = self.chart.len(),
                "bottom-up pass"
            );
            self.iteration += 1;
            if produced == 0 {
                return Ok(self.found);
            }
        }
    }

    /// Rules with a subtask type that gained instances in the current
    /// iteration and enough instances of every subtask type.
    fn active_rules(&self) -> BTreeSet<RuleId> {
        let domain = self.env.domain;
        let mut rules: BTreeSet<RuleId> = self
            .chart
            .activated_types(self.iteration)
            .into_iter()
            .flat_map(|ty| domain.rules_with_subtask(ty).iter().copied())
            .collect();
        if self.iteration == 0 {
            rules.extend(domain.empty_rules().iter().copied());
        }
        rules.retain(|id| {
            let rule = domain.rule(*id);
            rule.subtasks
                .iter()
                .all(|ty| self.chart.count_of(*ty) >= rule.multiplicity(*ty))
        });
        rules
    }

    fn bottom_up_pass(&mut self) -> Result<usize, Interrupted> {
        let domain = self.env.domain;
        let mut produced = 0;
        for id in self.active_rules() {
            self.check_cancel()?;
            let outcome = {
                let ctx = GroundingContext {
                    domain,
                    chart: &self.chart,
                    plan_size: self.layout.len(),
                    iteration: self.iteration,
                    cancel: self.env.cancel,
                };
                domain.rule(id).get_rule_instances(id, &ctx)
            };
            self.stats.rule_instances += outcome.instances.len();
            self.stats.invalid_instances += outcome.invalid;
            for instance in outcome.instances {
                self.check_cancel()?;
                if self.compose(instance).is_some() {
                    produced += 1;
                    if self.found.is_some() {
                        return Ok(produced);
                    }
                }
            }
        }
        Ok(produced)
    }

    fn compose(&mut self, instance: RuleInstance) -> Option<SubplanId> {
        let subplan = {
            let children: Vec<&Subplan> = instance
                .children
                .iter()
                .map(|id| self.chart.get(*id))
                .collect();
            Subplan::compose(instance, &children, self.iteration + 1)
        };
        if !subplan.is_locally_valid(&self.env.problem.init) {
            self.stats.invalid_subplans += 1;
            return None;
        }
        self.admit(subplan)
    }

    fn admit(&mut self, subplan: Subplan) -> Option<SubplanId> {
        let Some(id) = self.chart.insert(subplan) else {
            self.stats.duplicate_subplans += 1;
            return None;
        };
        self.stats.subplans += 1;
        if self.found.is_none() && self.is_goal(id) {
            tracing::debug!(subplan = id.index(), "goal reached");
            self.found = Some(id);
        }
        Some(id)
    }

    /// Matches the goal pattern, accounts for every observation and
    /// replays from the initial state as a complete plan.
    fn is_goal(&self, id: SubplanId) -> bool {
        let subplan = self.chart.get(id);
        let problem = self.env.problem;
        problem
            .goal
            .subsumes(&subplan.task, self.env.domain.lattice())
            && subplan.used.is_superset(&self.observed_positions)
            && subplan
                .timeline
                .propagate(&subplan.used, &problem.init, Propagation::Global)
                .is_some()
    }

    /// Atoms that may hold right before `hole`.
    fn megaslot(&self, hole: usize) -> Megaslot {
        let domain = self.env.domain;
        let problem = self.env.problem;
        let mut state = problem.init.clone();
        for cell in &self.layout[..hole] {
            if let Cell::Observed(index) = cell {
                state.apply_effects(&leaf_slot(domain, &problem.observed[*index]));
            }
        }
        let mut megaslot = Megaslot::new();
        megaslot.absorb(&state);
        for actions in self.hypotheses.range(..hole).map(|(_, a)| a) {
            for action in actions {
                let action_type = domain.action_type(action.ty);
                megaslot.absorb_effects(&action_type.ground_effects(&action.args));
            }
        }
        for (_, subplan) in self.chart.iter() {
            if subplan.span.is_some_and(|s| s.end + 1 == hole) {
                if let Some(end) = subplan.end_state(&problem.init) {
                    megaslot.absorb(&end);
                }
            }
        }
        megaslot
    }

    /// Seed hypothesized actions at an unobserved position, stamped with
    /// the current iteration.
    fn open_hole(&mut self, position: usize) -> Result<(), Interrupted> {
        self.check_cancel()?;
        let domain = self.env.domain;
        let problem = self.env.problem;
        let level = self.layout.iter().filter(|c| **c == Cell::Hole).count();
        let request = PruneRequest {
            domain,
            observed: &problem.observed,
            positions: &[position],
            level,
        };
        let proposed = self.env.pruner.pruned_suffix(&request, self.env.cancel);
        self.check_cancel()?;
        let Some(partials) = proposed.and_then(|lists| lists.into_iter().next()) else {
            tracing::warn!(position, level, "no admissible continuation; skipping position");
            self.stats.levels_skipped += 1;
            return Ok(());
        };

        let megaslot = self.megaslot(position);
        let cap = self.env.config.max_hypotheses_per_position;
        let mut admitted = Vec::new();
        'candidates: for partial in partials {
            let free: Vec<usize> = (0..partial.args.len())
                .filter(|i| partial.args[*i].is_empty())
                .collect();
            let action_type = domain.action_type(partial.ty);
            for args in fill_with_all_constants(domain, &partial.args, &free) {
                if admitted.len() >= cap {
                    tracing::debug!(position, cap, "hypothesis cap reached");
                    break 'candidates;
                }
                if !megaslot.admits(&action_type.ground_pre(&args)) {
                    continue;
                }
                let action = Action::new(partial.ty, args);
                if self.registry.insert((position, action.clone())) {
                    admitted.push(action);
                }
            }
        }

        for action in &admitted {
            let leaf = Subplan::leaf(
                domain,
                action.clone(),
                position,
                self.iteration,
                Origin::Hypothesized,
            );
            if leaf.is_locally_valid(&problem.init) {
                self.admit(leaf);
            } else {
                self.stats.invalid_subplans += 1;
            }
        }
        tracing::debug!(position, hypotheses = admitted.len(), "opened position");
        self.stats.hypotheses += admitted.len();
        self.hypotheses.insert(position, admitted);
        Ok(())
    }

    pub(crate) fn plan(&self, root: SubplanId, level: usize) -> RecognizedPlan {
        let domain = self.env.domain;
        let subplan = self.chart.get(root);
        let inserted = subplan
            .leaves
            .iter()
            .filter(|(p, _)| self.layout[**p] == Cell::Hole)
            .map(|(p, a)| InsertedAction {
                position: *p,
                action: domain.action_term(a),
            })
            .collect();
        RecognizedPlan {
            root: self.node(root),
            inserted,
            level,
            iterations: self.iteration,
            stats: self.stats.clone(),
        }
    }

    fn node(&self, id: SubplanId) -> PlanNode {
        let domain = self.env.domain;
        let subplan = self.chart.get(id);
        let (source, children) = match &subplan.origin {
            Origin::Observed => (NodeSource::Observed, Vec::new()),
            Origin::Hypothesized => (NodeSource::Hypothesized, Vec::new()),
            Origin::Rule(instance) => (
                NodeSource::Method(domain.rule(instance.rule).name.clone()),
                instance.children.iter().map(|c| self.node(*c)).collect(),
            ),
        };
        PlanNode {
            task: domain.task_term(&subplan.task),
            span: subplan.span,
            source,
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_places_holes_between_observations() {
        assert_eq!(
            layout_with_holes(2, &[1]),
            vec![Cell::Observed(0), Cell::Hole, Cell::Observed(1)]
        );
        assert_eq!(
            layout_with_holes(1, &[0, 2]),
            vec![Cell::Hole, Cell::Observed(0), Cell::Hole]
        );
        assert_eq!(layout_with_holes(0, &[]), Vec::<Cell>::new());
    }
}
