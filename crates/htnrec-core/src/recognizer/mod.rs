//! Plan recognition: find a derivation of the goal task that accounts for
//! every observed action, hypothesizing unobserved actions where needed.
//!
//! Recognition proceeds by level, the number of unobserved positions
//! allowed. Level 0 tries the observations alone. In
//! [`InsertionMode::Suffix`] each further level appends one unobserved
//! position after everything seen so far and continues the same session.
//! In [`InsertionMode::Anywhere`] each level tries every placement of its
//! unobserved positions among the observations, one fresh session per
//! placement.

pub mod pruner;
mod session;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{Atom, Domain};
use crate::subplan::Span;
use crate::task::{Action, Task};
use crate::term::{Constant, Term};
use crate::timeline::State;

pub use pruner::{DomainSuffixPruner, PruneRequest, SuffixPruner};
use session::{Env, Interrupted, Session, layout_with_holes};

/// Errors that abort a recognition request.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("observed action {index} ({name}/{arity}) matches no action type")]
    UnresolvableAction {
        index: usize,
        name: String,
        arity: usize,
    },

    #[error("unknown constant {0:?}")]
    UnknownConstant(String),

    #[error("constant {constant:?} does not fit parameter {param:?} of {name}")]
    IncompatibleConstant {
        name: String,
        param: String,
        constant: String,
    },

    #[error("goal {name}/{arity} matches no task type")]
    UnknownGoalTask { name: String, arity: usize },
}

/// A recognition problem as written: names not yet resolved against a
/// domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Problem {
    /// Ground atoms true initially; everything else is false.
    pub init: Vec<Atom>,
    /// Task pattern; an argument `_` is left open.
    pub goal: Atom,
    pub observed: Vec<Atom>,
}

/// Where hypothesized actions may go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertionMode {
    /// Only after the observed actions.
    #[default]
    Suffix,
    /// In any gap of the observation sequence.
    Anywhere,
}

impl fmt::Display for InsertionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsertionMode::Suffix => f.write_str("suffix"),
            InsertionMode::Anywhere => f.write_str("anywhere"),
        }
    }
}

impl FromStr for InsertionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suffix" => Ok(InsertionMode::Suffix),
            "anywhere" => Ok(InsertionMode::Anywhere),
            other => Err(format!(
                "invalid insertion mode {other:?} (expected suffix or anywhere)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizerConfig {
    pub insertion: InsertionMode,
    /// Most unobserved positions tried.
    pub max_level: usize,
    /// Most hypothesized actions kept per unobserved position.
    pub max_hypotheses_per_position: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            insertion: InsertionMode::Suffix,
            max_level: 4,
            max_hypotheses_per_position: 256,
        }
    }
}

/// Receives the recognized plan. Called exactly once per successful
/// recognition, never otherwise.
pub trait SolutionSink: Send + Sync {
    fn report(&self, plan: &RecognizedPlan);
}

/// Discards solutions.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl SolutionSink for NullSink {
    fn report(&self, _plan: &RecognizedPlan) {}
}

/// Diagnostic counters. Pruned candidates are counted here and nowhere
/// else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub rule_instances: usize,
    /// Rule instances with contradictory conditions.
    pub invalid_instances: usize,
    /// Composed or hypothesized subplans that failed propagation.
    pub invalid_subplans: usize,
    pub duplicate_subplans: usize,
    /// Subplans kept in the chart.
    pub subplans: usize,
    pub hypotheses: usize,
    /// Unobserved positions the pruner had nothing for.
    pub levels_skipped: usize,
}

impl SearchStats {
    pub fn absorb(&mut self, other: &SearchStats) {
        self.rule_instances += other.rule_instances;
        self.invalid_instances += other.invalid_instances;
        self.invalid_subplans += other.invalid_subplans;
        self.duplicate_subplans += other.duplicate_subplans;
        self.subplans += other.subplans;
        self.hypotheses += other.hypotheses;
        self.levels_skipped += other.levels_skipped;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSource {
    Observed,
    Hypothesized,
    /// Derived by the named method.
    Method(String),
}

/// One node of a derivation tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanNode {
    pub task: Term,
    pub span: Option<Span>,
    pub source: NodeSource,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    fn render(&self, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:indent$}{}", "", self.task, indent = depth * 2)?;
        if let Some(span) = self.span {
            write!(f, " [{}..{}]", span.start, span.end)?;
        }
        match &self.source {
            NodeSource::Observed => writeln!(f)?,
            NodeSource::Hypothesized => writeln!(f, " (inserted)")?,
            NodeSource::Method(name) => writeln!(f, " via {name}")?,
        }
        for child in &self.children {
            child.render(depth + 1, f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedAction {
    pub position: usize,
    pub action: Term,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedPlan {
    pub root: PlanNode,
    /// Hypothesized actions the plan uses, by position.
    pub inserted: Vec<InsertedAction>,
    /// Unobserved positions in the layout that succeeded.
    pub level: usize,
    /// Bottom-up passes of the final session.
    pub iterations: usize,
    pub stats: SearchStats,
}

impl fmt::Display for RecognizedPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.render(0, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Recognized(RecognizedPlan),
    /// Every level up to the configured maximum failed.
    NotRecognized { levels: usize, stats: SearchStats },
    Cancelled,
}

/// A [`Problem`] resolved against a domain.
#[derive(Debug, Clone)]
pub(crate) struct ResolvedProblem {
    pub init: State,
    pub goal: Task,
    pub observed: Vec<Action>,
}

impl ResolvedProblem {
    fn resolve(domain: &Domain, problem: &Problem) -> Result<Self, RecognitionError> {
        let constant = |name: &str| {
            domain
                .constant(name)
                .cloned()
                .ok_or_else(|| RecognitionError::UnknownConstant(name.to_string()))
        };

        let mut observed = Vec::with_capacity(problem.observed.len());
        for (index, atom) in problem.observed.iter().enumerate() {
            let ty = domain.find_action(&atom.name, atom.args.len()).ok_or_else(|| {
                RecognitionError::UnresolvableAction {
                    index,
                    name: atom.name.clone(),
                    arity: atom.args.len(),
                }
            })?;
            let action_type = domain.action_type(ty);
            let mut args = Vec::with_capacity(atom.args.len());
            for (arg, param) in atom.args.iter().zip(&action_type.params) {
                let value = constant(arg)?;
                if !domain.lattice().accepts(param.ty, value.ty()) {
                    return Err(RecognitionError::IncompatibleConstant {
                        name: atom.name.clone(),
                        param: param.name.clone(),
                        constant: arg.clone(),
                    });
                }
                args.push(value);
            }
            observed.push(Action::new(ty, args));
        }

        let init = problem
            .init
            .iter()
            .map(|atom| {
                let args = atom
                    .args
                    .iter()
                    .map(|a| constant(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Term::new(atom.name.clone(), args))
            })
            .collect::<Result<Vec<_>, RecognitionError>>()?;

        let goal_atom = &problem.goal;
        let goal_ty = domain
            .find_task(&goal_atom.name, goal_atom.args.len())
            .ok_or_else(|| RecognitionError::UnknownGoalTask {
                name: goal_atom.name.clone(),
                arity: goal_atom.args.len(),
            })?;
        let goal_args = goal_atom
            .args
            .iter()
            .zip(&domain.task_type(goal_ty).params)
            .map(|(arg, param)| {
                if arg == "_" {
                    Ok(Constant::unbound(param.ty))
                } else {
                    constant(arg)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            init: State::closed(init),
            goal: Task::new(goal_ty, goal_args),
            observed,
        })
    }
}

/// Every placement of `holes` unobserved positions among `observed`
/// observations, as sorted position lists in lexicographic order.
pub fn hole_layouts(observed: usize, holes: usize) -> Vec<Vec<usize>> {
    fn choose(from: usize, size: usize, k: usize, prefix: Vec<usize>) -> Vec<Vec<usize>> {
        if k == 0 {
            return vec![prefix];
        }
        (from..=size - k)
            .flat_map(|p| {
                let mut next = prefix.clone();
                next.push(p);
                choose(p + 1, size, k - 1, next)
            })
            .collect()
    }
    choose(0, observed + holes, holes, Vec::new())
}

/// Runs recognition requests against one domain.
pub struct Recognizer<'d> {
    domain: &'d Domain,
    config: RecognizerConfig,
    pruner: Box<dyn SuffixPruner + 'd>,
    sink: Box<dyn SolutionSink + 'd>,
}

impl<'d> Recognizer<'d> {
    pub fn new(domain: &'d Domain, config: RecognizerConfig) -> Self {
        Self {
            domain,
            config,
            pruner: Box::new(DomainSuffixPruner),
            sink: Box::new(NullSink),
        }
    }

    pub fn with_pruner(mut self, pruner: impl SuffixPruner + 'd) -> Self {
        self.pruner = Box::new(pruner);
        self
    }

    pub fn with_sink(mut self, sink: impl SolutionSink + 'd) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &RecognizerConfig {
        &self.config
    }

    /// Recognize `problem`. Structural problems with the request are
    /// errors; failing to find a plan and cancellation are outcomes.
    pub fn recognize(
        &self,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<RecognitionOutcome, RecognitionError> {
        let span = tracing::info_span!("recognize", run_id = %Uuid::new_v4());
        let _enter = span.enter();

        if cancel.is_cancelled() {
            tracing::info!("cancelled before start");
            return Ok(RecognitionOutcome::Cancelled);
        }
        let resolved = ResolvedProblem::resolve(self.domain, problem)?;
        tracing::info!(
            observed = resolved.observed.len(),
            insertion = %self.config.insertion,
            max_level = self.config.max_level,
            "recognition started"
        );

        let env = Env {
            domain: self.domain,
            problem: &resolved,
            config: &self.config,
            pruner: self.pruner.as_ref(),
            cancel,
        };
        let outcome = match self.config.insertion {
            InsertionMode::Suffix => self.run_suffix(env),
            InsertionMode::Anywhere => self.run_anywhere(env),
        }
        .unwrap_or(RecognitionOutcome::Cancelled);

        match &outcome {
            RecognitionOutcome::Recognized(plan) => {
                tracing::info!(
                    level = plan.level,
                    iterations = plan.iterations,
                    inserted = plan.inserted.len(),
                    "plan recognized"
                );
                self.sink.report(plan);
            }
            RecognitionOutcome::NotRecognized { levels, stats } => {
                tracing::info!(levels, subplans = stats.subplans, "no plan recognized");
            }
            RecognitionOutcome::Cancelled => tracing::info!("recognition cancelled"),
        }
        Ok(outcome)
    }

    fn run_suffix(&self, env: Env<'_>) -> Result<RecognitionOutcome, Interrupted> {
        let observed = env.problem.observed.len();
        let mut session = Session::new(env, layout_with_holes(observed, &[]));
        for level in 0..=self.config.max_level {
            if env.cancel.is_cancelled() {
                return Err(Interrupted);
            }
            if level > 0 {
                session.push_hole()?;
            }
            if let Some(root) = session.saturate()? {
                return Ok(RecognitionOutcome::Recognized(session.plan(root, level)));
            }
            tracing::info!(level, "level exhausted");
        }
        Ok(RecognitionOutcome::NotRecognized {
            levels: self.config.max_level + 1,
            stats: session.stats,
        })
    }

    fn run_anywhere(&self, env: Env<'_>) -> Result<RecognitionOutcome, Interrupted> {
        let observed = env.problem.observed.len();
        let mut stats = SearchStats::default();
        for level in 0..=self.config.max_level {
            for holes in hole_layouts(observed, level) {
                if env.cancel.is_cancelled() {
                    return Err(Interrupted);
                }
                let mut session = Session::new(env, layout_with_holes(observed, &holes));
                if let Some(root) = session.run()? {
                    let mut plan = session.plan(root, level);
                    plan.stats.absorb(&stats);
                    return Ok(RecognitionOutcome::Recognized(plan));
                }
                stats.absorb(&session.stats);
            }
            tracing::info!(level, "level exhausted");
        }
        Ok(RecognitionOutcome::NotRecognized {
            levels: self.config.max_level + 1,
            stats,
        })
    }
}
