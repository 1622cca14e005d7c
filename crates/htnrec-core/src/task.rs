//! Task and action signatures and their (partially) grounded occurrences.

use crate::lattice::{TypeId, TypeLattice};
use crate::rule::RuleId;
use crate::term::{Constant, Literal, Term};

/// Index of a [`TaskType`] in the domain arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskTypeId(pub(crate) usize);

/// Index of an [`ActionType`] in the domain arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionTypeId(pub(crate) usize);

impl TaskTypeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl ActionTypeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A declared, typed parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: TypeId,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A condition template whose arguments are positions in the owning
/// action's parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionCondition {
    pub predicate: String,
    pub args: Vec<usize>,
    pub positive: bool,
}

impl ActionCondition {
    fn ground(&self, bindings: &[Constant]) -> Literal {
        let args = self.args.iter().map(|i| bindings[*i].clone()).collect();
        Literal::new(Term::new(self.predicate.clone(), args), self.positive)
    }
}

/// A task signature. Two task types are the same type iff name and arity
/// match; the domain arena enforces that key is unique.
#[derive(Debug, Clone)]
pub struct TaskType {
    pub name: String,
    pub params: Vec<Param>,
    /// Set for primitive tasks: the action this task stands for.
    pub action: Option<ActionTypeId>,
    pub(crate) rules: Vec<RuleId>,
    pub(crate) min_length: usize,
}

impl TaskType {
    pub(crate) fn new(name: impl Into<String>, params: Vec<Param>) -> Self {
        Self {
            name: name.into(),
            params,
            action: None,
            rules: Vec::new(),
            min_length: usize::MAX,
        }
    }

    pub fn num_of_variables(&self) -> usize {
        self.params.len()
    }

    pub fn is_primitive(&self) -> bool {
        self.action.is_some()
    }

    /// Rules that decompose directly into this task type.
    pub fn rules(&self) -> &[RuleId] {
        &self.rules
    }

    /// Fewest actions any grounding of this task can use; `usize::MAX` when
    /// no decomposition reaches primitive tasks.
    pub fn min_length(&self) -> usize {
        self.min_length
    }

    pub fn same_signature(&self, other: &TaskType) -> bool {
        self.name == other.name && self.params.len() == other.params.len()
    }
}

/// A primitive action signature with its condition and effect templates.
#[derive(Debug, Clone)]
pub struct ActionType {
    pub name: String,
    pub params: Vec<Param>,
    /// The primitive task type standing for this action in methods.
    pub task: TaskTypeId,
    pub pre: Vec<ActionCondition>,
    pub add: Vec<ActionCondition>,
    pub del: Vec<ActionCondition>,
}

impl ActionType {
    pub fn num_of_variables(&self) -> usize {
        self.params.len()
    }

    pub fn same_signature(&self, other: &ActionType) -> bool {
        self.name == other.name && self.params.len() == other.params.len()
    }

    pub fn ground_pre(&self, bindings: &[Constant]) -> Vec<Literal> {
        self.pre.iter().map(|c| c.ground(bindings)).collect()
    }

    /// Add effects (positive) followed by delete effects (negative).
    pub fn ground_effects(&self, bindings: &[Constant]) -> Vec<Literal> {
        self.add
            .iter()
            .chain(&self.del)
            .map(|c| c.ground(bindings))
            .collect()
    }
}

fn positions_equal(a: &[Constant], b: &[Constant], lattice: &TypeLattice) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| (x.is_empty() && y.is_empty()) || x.equals(y, lattice))
}

fn positions_subsume(general: &[Constant], specific: &[Constant], lattice: &TypeLattice) -> bool {
    general.len() == specific.len()
        && general
            .iter()
            .zip(specific)
            .all(|(g, s)| g.is_empty() || g.equals(s, lattice))
}

/// An occurrence of a task type with one binding per parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Task {
    pub ty: TaskTypeId,
    pub args: Vec<Constant>,
}

impl Task {
    pub fn new(ty: TaskTypeId, args: Vec<Constant>) -> Self {
        Self { ty, args }
    }

    /// A task with every parameter unbound, typed as declared.
    pub fn unbound(ty: TaskTypeId, task_type: &TaskType) -> Self {
        let args = task_type
            .params
            .iter()
            .map(|p| Constant::unbound(p.ty))
            .collect();
        Self { ty, args }
    }

    pub fn is_ground(&self) -> bool {
        self.args.iter().all(|c| !c.is_empty())
    }

    /// Same signature and, per position, both unbound or lattice-equal.
    pub fn equals(&self, other: &Task, lattice: &TypeLattice) -> bool {
        self.ty == other.ty && positions_equal(&self.args, &other.args, lattice)
    }

    /// Like [`Task::equals`], but positions unbound in `self` accept any
    /// binding in `other`.
    pub fn subsumes(&self, other: &Task, lattice: &TypeLattice) -> bool {
        self.ty == other.ty && positions_subsume(&self.args, &other.args, lattice)
    }
}

/// An occurrence of an action type with one binding per parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Action {
    pub ty: ActionTypeId,
    pub args: Vec<Constant>,
}

impl Action {
    pub fn new(ty: ActionTypeId, args: Vec<Constant>) -> Self {
        Self { ty, args }
    }

    pub fn unbound(ty: ActionTypeId, action_type: &ActionType) -> Self {
        let args = action_type
            .params
            .iter()
            .map(|p| Constant::unbound(p.ty))
            .collect();
        Self { ty, args }
    }

    pub fn is_ground(&self) -> bool {
        self.args.iter().all(|c| !c.is_empty())
    }

    pub fn equals(&self, other: &Action, lattice: &TypeLattice) -> bool {
        self.ty == other.ty && positions_equal(&self.args, &other.args, lattice)
    }

    pub fn subsumes(&self, other: &Action, lattice: &TypeLattice) -> bool {
        self.ty == other.ty && positions_subsume(&self.args, &other.args, lattice)
    }

    /// The primitive task this action grounds.
    pub fn as_task(&self, action_type: &ActionType) -> Task {
        Task::new(action_type.task, self.args.clone())
    }
}
