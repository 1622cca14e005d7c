//! Rule grounding search.
//!
//! [`Rule::get_rule_instances`] enumerates every way to fill a rule's
//! subtask slots with known subplans such that the choice is new in the
//! current iteration, the chosen subplans are disjoint, respect the rule's
//! order and length bounds, and agree on the pooled variables. Each
//! surviving choice is completed over the remaining free variables and
//! materialized as a [`RuleInstance`].
//!
//! The search is pure: every step returns fresh partial assignments instead
//! of mutating a shared accumulator, so results come out in a stable order.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use tokio_util::sync::CancellationToken;

use super::{Anchor, Rule, RuleId};
use crate::domain::Domain;
use crate::subplan::{Chart, Subplan, SubplanId};
use crate::task::Task;
use crate::term::{Constant, Literal, Term};

/// Everything a grounding search reads.
pub struct GroundingContext<'a> {
    pub domain: &'a Domain,
    pub chart: &'a Chart,
    /// Current timeline length.
    pub plan_size: usize,
    /// Subplans stamped with this iteration count as new.
    pub iteration: usize,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Default)]
pub struct GroundingOutcome {
    pub instances: Vec<RuleInstance>,
    /// Complete subtask assignments reached by the search.
    pub assignments: usize,
    /// Completions dropped for contradictory conditions.
    pub invalid: usize,
}

/// A rule applied to one choice of subplans and one full binding of its
/// pooled variables, with its conditions resolved to ground literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleInstance {
    pub rule: RuleId,
    pub main: Task,
    /// Chosen subplan per subtask slot.
    pub children: Vec<SubplanId>,
    pub vars: Vec<Constant>,
    pub pre: Vec<(Anchor, Literal)>,
    pub post: Vec<(Anchor, Literal)>,
    pub between: Vec<(usize, usize, Literal)>,
    equalities: Vec<Literal>,
}

impl RuleInstance {
    fn build(id: RuleId, rule: &Rule, children: Vec<SubplanId>, vars: Vec<Constant>) -> Self {
        let main = Task::new(
            rule.main_task,
            rule.main_refs.iter().map(|v| vars[*v].clone()).collect(),
        );
        let mut equalities = Vec::new();
        let mut anchored = |conditions: &[super::Condition]| {
            let mut out = Vec::new();
            for cond in conditions {
                let literal = cond.literal.ground(&vars);
                if cond.literal.is_equality() {
                    equalities.push(literal);
                } else {
                    out.push((cond.anchor, literal));
                }
            }
            out
        };
        let pre = anchored(&rule.pre);
        let post = anchored(&rule.post);
        let between = rule
            .between
            .iter()
            .map(|b| (b.from, b.to, b.literal.ground(&vars)))
            .collect();
        Self {
            rule: id,
            main,
            children,
            vars,
            pre,
            post,
            between,
            equalities,
        }
    }

    /// Equality constraints hold and no atom is both required and forbidden
    /// at the same anchor.
    pub fn is_valid(&self) -> bool {
        self.equalities
            .iter()
            .all(|l| l.atom.check_equality(l.positive))
            && consistent(&self.pre)
            && consistent(&self.post)
    }

    /// What two instances of one call must never share.
    pub fn fingerprint(&self) -> (&Task, &[SubplanId], &[Constant]) {
        (&self.main, &self.children, &self.vars)
    }
}

fn consistent(conditions: &[(Anchor, Literal)]) -> bool {
    let mut seen: HashMap<(Anchor, &Term), bool> = HashMap::new();
    conditions.iter().all(|(anchor, literal)| {
        match seen.insert((*anchor, &literal.atom), literal.positive) {
            Some(previous) => previous == literal.positive,
            None => true,
        }
    })
}

/// A subtask assignment under construction.
#[derive(Debug, Clone)]
struct Partial {
    chosen: Vec<Option<SubplanId>>,
    vars: Vec<Constant>,
}

impl Rule {
    /// All rule instances that use at least one subplan from the current
    /// iteration. Zero-subtask rules produce their instances in iteration
    /// 0 only.
    pub fn get_rule_instances(&self, id: RuleId, ctx: &GroundingContext<'_>) -> GroundingOutcome {
        let start = Partial {
            chosen: vec![None; self.len()],
            vars: self.vars.iter().map(|p| Constant::unbound(p.ty)).collect(),
        };
        let assignments: Vec<Partial> = if self.is_empty() {
            if ctx.iteration == 0 {
                vec![start]
            } else {
                Vec::new()
            }
        } else {
            (0..self.len())
                .filter(|p| ctx.chart.activated_at(self.subtasks[*p], ctx.iteration))
                .flat_map(|pinned| {
                    let order: Vec<usize> = std::iter::once(pinned)
                        .chain((0..self.len()).filter(|s| *s != pinned))
                        .collect();
                    self.get_next_suitable_task(ctx, pinned, &order, start.clone())
                })
                .collect()
        };

        let mut outcome = GroundingOutcome {
            assignments: assignments.len(),
            ..GroundingOutcome::default()
        };
        let mut seen = HashSet::new();
        for assignment in assignments {
            if ctx.cancel.is_cancelled() {
                break;
            }
            for instance in self.complete(id, ctx, assignment) {
                let key = {
                    let (main, children, vars) = instance.fingerprint();
                    (main.clone(), children.to_vec(), vars.to_vec())
                };
                if !seen.insert(key) {
                    continue;
                }
                if instance.is_valid() {
                    outcome.instances.push(instance);
                } else {
                    outcome.invalid += 1;
                }
            }
        }
        tracing::trace!(
            rule = %self.name,
            iteration = ctx.iteration,
            assignments = outcome.assignments,
            instances = outcome.instances.len(),
            "grounded rule"
        );
        outcome
    }

    /// Assign the slots in `order`, one at a time, returning every complete
    /// assignment reachable from `partial`.
    fn get_next_suitable_task(
        &self,
        ctx: &GroundingContext<'_>,
        pinned: usize,
        order: &[usize],
        partial: Partial,
    ) -> Vec<Partial> {
        let Some((&slot, rest)) = order.split_first() else {
            return vec![partial];
        };
        if ctx.cancel.is_cancelled() {
            return Vec::new();
        }
        ctx.chart
            .instances_of(self.subtasks[slot])
            .iter()
            .filter(|id| self.is_suitable(ctx, pinned, slot, &partial, **id))
            .filter_map(|id| self.fill_main_task(ctx, slot, &partial, *id))
            .flat_map(|next| self.get_next_suitable_task(ctx, pinned, rest, next))
            .collect()
    }

    fn is_suitable(
        &self,
        ctx: &GroundingContext<'_>,
        pinned: usize,
        slot: usize,
        partial: &Partial,
        id: SubplanId,
    ) -> bool {
        let candidate = ctx.chart.get(id);
        let generation = match slot.cmp(&pinned) {
            Ordering::Equal => candidate.iteration == ctx.iteration,
            Ordering::Less => candidate.iteration <= ctx.iteration,
            Ordering::Greater => candidate.iteration < ctx.iteration,
        };
        if !generation {
            return false;
        }
        if let Some(span) = candidate.span {
            if span.start < self.min_length_before(slot)
                || span.end.saturating_add(self.min_length_after(slot)) >= ctx.plan_size
            {
                return false;
            }
        }
        partial
            .chosen
            .iter()
            .enumerate()
            .all(|(other_slot, chosen)| {
                let Some(other_id) = chosen else {
                    return true;
                };
                let other = ctx.chart.get(*other_id);
                !candidate.overlaps(other)
                    && (!self.precedes(slot, other_slot) || ends_before(candidate, other))
                    && (!self.precedes(other_slot, slot) || ends_before(other, candidate))
            })
    }

    /// Unify the candidate's bindings into the pooled variables. `None`
    /// when a bound pooled variable disagrees or a type does not fit.
    fn fill_main_task(
        &self,
        ctx: &GroundingContext<'_>,
        slot: usize,
        partial: &Partial,
        id: SubplanId,
    ) -> Option<Partial> {
        let lattice = ctx.domain.lattice();
        let candidate = ctx.chart.get(id);
        let mut next = partial.clone();
        for (position, var) in self.subtask_refs[slot].iter().enumerate() {
            let value = candidate.task.args.get(position)?;
            if value.is_empty() {
                continue;
            }
            let pooled = &next.vars[*var];
            if pooled.is_empty() {
                if !lattice.accepts(self.vars[*var].ty, value.ty()) {
                    return None;
                }
                next.vars[*var] = value.clone();
            } else if !pooled.equals(value, lattice) {
                return None;
            }
        }
        next.chosen[slot] = Some(id);
        Some(next)
    }

    /// Ground the main task and fan out over pooled variables that the
    /// main task or a condition needs but no subtask bound.
    fn complete(&self, id: RuleId, ctx: &GroundingContext<'_>, partial: Partial) -> Vec<RuleInstance> {
        let children: Vec<SubplanId> = partial.chosen.iter().flatten().copied().collect();
        let referenced: BTreeSet<usize> = self
            .main_refs
            .iter()
            .chain(self.pre.iter().flat_map(|c| &c.literal.vars))
            .chain(self.post.iter().flat_map(|c| &c.literal.vars))
            .chain(self.between.iter().flat_map(|b| &b.literal.vars))
            .copied()
            .collect();
        let free: Vec<usize> = referenced
            .into_iter()
            .filter(|v| partial.vars[*v].is_empty())
            .collect();
        fill_with_all_constants(ctx.domain, &partial.vars, &free)
            .into_iter()
            .map(|vars| RuleInstance::build(id, self, children.clone(), vars))
            .collect()
    }
}

/// Subplans without a span are ordered before and after anything.
fn ends_before(a: &Subplan, b: &Subplan) -> bool {
    match (a.span, b.span) {
        (Some(a), Some(b)) => a.end < b.start,
        _ => true,
    }
}

/// Every completion of `template` that binds each position in `free` to a
/// constant of the position's type. Positions are filled in the given
/// order; constants in domain order.
pub fn fill_with_all_constants(
    domain: &Domain,
    template: &[Constant],
    free: &[usize],
) -> Vec<Vec<Constant>> {
    let Some((&first, rest)) = free.split_first() else {
        return vec![template.to_vec()];
    };
    domain
        .get_constants(template[first].ty())
        .into_iter()
        .flat_map(|constant| {
            let mut next = template.to_vec();
            next[first] = constant.clone();
            fill_with_all_constants(domain, &next, rest)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parser::parse_domain_toml;
    use crate::subplan::Origin;
    use crate::task::Action;

    const DOMAIN: &str = r#"
[[types]]
name = "place"

[[constants]]
name = "a"
type = "place"

[[constants]]
name = "b"
type = "place"

[[constants]]
name = "c"
type = "place"

[[actions]]
name = "go"
params = ["from:place", "to:place"]
pre = ["at(from)"]
add = ["at(to)"]
del = ["at(from)"]

[[tasks]]
name = "trip"
params = ["x:place", "z:place"]

[[tasks]]
name = "wander"
params = ["x:place", "w:place"]

[[tasks]]
name = "idle"
params = ["p:place"]

[[tasks]]
name = "stuck"
params = ["x:place"]

[[methods]]
name = "two-legs"
task = "trip(x, z)"
subtasks = ["go(x, y)", "go(y, z)"]

[[methods]]
name = "wander-to"
task = "wander(x, w)"
subtasks = ["go(x, y)"]
pre = ["=(y, w)"]

[[methods]]
name = "idle"
task = "idle(p)"
subtasks = []

[[methods]]
name = "stuck"
task = "stuck(x)"
subtasks = ["go(x, y)"]
pre = ["at(x)", "!at(x)"]
"#;

    struct Fixture {
        domain: Domain,
        chart: Chart,
        cancel: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                domain: parse_domain_toml(DOMAIN).unwrap(),
                chart: Chart::new(),
                cancel: CancellationToken::new(),
            }
        }

        fn go(&mut self, from: &str, to: &str, position: usize, iteration: usize) {
            let ty = self.domain.find_action("go", 2).unwrap();
            let args = [from, to]
                .iter()
                .map(|n| self.domain.constant(n).unwrap().clone())
                .collect();
            let leaf = Subplan::leaf(
                &self.domain,
                Action::new(ty, args),
                position,
                iteration,
                Origin::Observed,
            );
            self.chart.insert(leaf).unwrap();
        }

        fn ground(&self, method: &str, iteration: usize, plan_size: usize) -> GroundingOutcome {
            let id = self.domain.find_rule(method).unwrap();
            let ctx = GroundingContext {
                domain: &self.domain,
                chart: &self.chart,
                plan_size,
                iteration,
                cancel: &self.cancel,
            };
            self.domain.rule(id).get_rule_instances(id, &ctx)
        }

        fn mains(&self, outcome: &GroundingOutcome) -> Vec<String> {
            outcome
                .instances
                .iter()
                .map(|i| self.domain.task_term(&i.main).to_string())
                .collect()
        }
    }

    fn assert_unique(outcome: &GroundingOutcome) {
        let keys: HashSet<_> = outcome.instances.iter().map(RuleInstance::fingerprint).collect();
        assert_eq!(keys.len(), outcome.instances.len());
    }

    #[test]
    fn chains_adjacent_legs_in_order() {
        let mut f = Fixture::new();
        f.go("a", "b", 0, 0);
        f.go("b", "c", 1, 0);
        f.go("c", "a", 2, 0);

        let outcome = f.ground("two-legs", 0, 3);
        assert_unique(&outcome);
        assert_eq!(f.mains(&outcome), vec!["trip(a, c)", "trip(b, a)"]);
    }

    #[test]
    fn old_combinations_are_not_rederived() {
        let mut f = Fixture::new();
        f.go("a", "b", 0, 0);
        f.go("b", "c", 1, 1);

        assert!(f.ground("two-legs", 0, 2).instances.is_empty());
        let fresh = f.ground("two-legs", 1, 2);
        assert_eq!(f.mains(&fresh), vec!["trip(a, c)"]);
        assert!(f.ground("two-legs", 2, 2).instances.is_empty());
    }

    #[test]
    fn symmetric_new_pairs_are_found_once() {
        let mut f = Fixture::new();
        f.go("a", "b", 0, 1);
        f.go("b", "a", 1, 1);

        let outcome = f.ground("two-legs", 1, 2);
        assert_unique(&outcome);
        assert_eq!(f.mains(&outcome), vec!["trip(a, a)"]);
    }

    #[test]
    fn length_bounds_reject_late_first_leg() {
        let mut f = Fixture::new();
        f.go("a", "b", 1, 0);
        f.go("b", "c", 0, 0);
        // The legs only chain in the wrong temporal order.
        assert!(f.ground("two-legs", 0, 2).instances.is_empty());
    }

    #[test]
    fn condition_only_variables_fan_out_and_equalities_filter() {
        let mut f = Fixture::new();
        f.go("a", "b", 0, 0);

        let outcome = f.ground("wander-to", 0, 1);
        assert_eq!(f.mains(&outcome), vec!["wander(a, b)"]);
        // `w` tried as `a` and `c` too.
        assert_eq!(outcome.invalid, 2);
    }

    #[test]
    fn contradictory_conditions_are_dropped_silently() {
        let mut f = Fixture::new();
        f.go("a", "b", 0, 0);

        let outcome = f.ground("stuck", 0, 1);
        assert!(outcome.instances.is_empty());
        assert_eq!(outcome.assignments, 1);
        assert_eq!(outcome.invalid, 1);
    }

    #[test]
    fn empty_methods_ground_once_per_constant_in_first_iteration() {
        let f = Fixture::new();
        let outcome = f.ground("idle", 0, 0);
        assert_eq!(f.mains(&outcome), vec!["idle(a)", "idle(b)", "idle(c)"]);
        assert!(outcome.instances.iter().all(|i| i.children.is_empty()));
        assert!(f.ground("idle", 1, 0).instances.is_empty());
    }

    #[test]
    fn cancelled_search_returns_nothing() {
        let mut f = Fixture::new();
        f.go("a", "b", 0, 0);
        f.go("b", "c", 1, 0);
        f.cancel.cancel();
        assert!(f.ground("two-legs", 0, 2).instances.is_empty());
    }

    #[test]
    fn fill_with_all_constants_enumerates_free_positions() {
        let f = Fixture::new();
        let place = f.domain.lattice().lookup("place").unwrap();
        let a = f.domain.constant("a").unwrap().clone();
        let template = vec![Constant::unbound(place), a.clone(), Constant::unbound(place)];

        let all = fill_with_all_constants(&f.domain, &template, &[0, 2]);
        assert_eq!(all.len(), 9);
        assert!(all.iter().all(|v| v[1] == a && !v[0].is_empty() && !v[2].is_empty()));
        assert_eq!(fill_with_all_constants(&f.domain, &template, &[]), vec![template]);
    }
}
