//! The planning domain: type lattice, constants, task and action types and
//! rules, owned by one immutable arena.
//!
//! A [`Domain`] is assembled with a [`DomainBuilder`], usually through the
//! TOML loader in [`parser`]. Building validates every method, computes
//! minimum task lengths, expands partially ordered methods into totally
//! ordered rules and indexes rules by main task and by subtask type.

pub mod parser;
pub mod toml_format;

use std::collections::HashMap;

use thiserror::Error;

use crate::lattice::{TypeId, TypeLattice};
use crate::rule::{Rule, RuleId, SubtaskOrder};
use crate::task::{Action, ActionCondition, ActionType, ActionTypeId, Param, Task, TaskType, TaskTypeId};
use crate::term::{Constant, Term};

pub use parser::{Atom, parse_atom, parse_domain_toml, parse_literal, parse_problem_toml};

/// Errors that abort loading a domain.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("duplicate type: {0:?}")]
    DuplicateType(String),

    #[error("unknown type: {0:?}")]
    UnknownType(String),

    #[error("duplicate constant: {0:?}")]
    DuplicateConstant(String),

    #[error("duplicate task or action signature {name}/{arity}")]
    DuplicateSignature { name: String, arity: usize },

    #[error("method {method:?} references unknown task {name}/{arity}")]
    UnknownTask {
        method: String,
        name: String,
        arity: usize,
    },

    #[error("method {method:?} uses undeclared variable {variable:?}")]
    UnknownVariable { method: String, variable: String },

    #[error("malformed method {method:?}: {detail}")]
    MalformedMethod { method: String, detail: String },

    #[error("order constraints of method {method:?} are cyclic")]
    OrderCycle { method: String },

    #[error("invalid literal: {0:?}")]
    InvalidLiteral(String),

    #[error("invalid parameter {0:?} (expected name:type)")]
    InvalidParam(String),

    #[error("action {action:?} refers to unknown parameter {name:?}")]
    UnknownActionParam { action: String, name: String },
}

// ---------------------------------------------------------------------------
// Domain
// ---------------------------------------------------------------------------

/// Immutable arena of everything recognition reads.
#[derive(Debug, Clone)]
pub struct Domain {
    lattice: TypeLattice,
    constants: Vec<Constant>,
    constants_by_name: HashMap<String, usize>,
    /// Per type: indices of the constants whose type it accepts.
    constants_by_type: Vec<Vec<usize>>,
    task_types: Vec<TaskType>,
    action_types: Vec<ActionType>,
    rules: Vec<Rule>,
    declared_methods: usize,
    tasks_by_key: HashMap<(String, usize), TaskTypeId>,
    actions_by_key: HashMap<(String, usize), ActionTypeId>,
    rules_by_subtask: HashMap<TaskTypeId, Vec<RuleId>>,
    empty_rules: Vec<RuleId>,
}

impl Domain {
    pub fn lattice(&self) -> &TypeLattice {
        &self.lattice
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        self.constants_by_name.get(name).map(|i| &self.constants[*i])
    }

    /// Constants a parameter of type `ty` accepts, in declaration order.
    pub fn get_constants(&self, ty: TypeId) -> impl Iterator<Item = &Constant> + '_ {
        self.constants_by_type
            .get(ty.index())
            .into_iter()
            .flatten()
            .map(|i| &self.constants[*i])
    }

    pub fn task_type(&self, id: TaskTypeId) -> &TaskType {
        &self.task_types[id.0]
    }

    pub fn task_types(&self) -> &[TaskType] {
        &self.task_types
    }

    pub fn action_type(&self, id: ActionTypeId) -> &ActionType {
        &self.action_types[id.0]
    }

    pub fn action_types(&self) -> &[ActionType] {
        &self.action_types
    }

    pub fn action_type_ids(&self) -> impl Iterator<Item = ActionTypeId> {
        (0..self.action_types.len()).map(ActionTypeId)
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0]
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of methods as declared, before ordering expansion.
    pub fn declared_methods(&self) -> usize {
        self.declared_methods
    }

    /// First rule with the given name.
    pub fn find_rule(&self, name: &str) -> Option<RuleId> {
        self.rules.iter().position(|r| r.name == name).map(RuleId)
    }

    pub fn find_task(&self, name: &str, arity: usize) -> Option<TaskTypeId> {
        self.tasks_by_key.get(&(name.to_string(), arity)).copied()
    }

    pub fn find_action(&self, name: &str, arity: usize) -> Option<ActionTypeId> {
        self.actions_by_key.get(&(name.to_string(), arity)).copied()
    }

    /// Rules with at least one subtask of type `ty`.
    pub fn rules_with_subtask(&self, ty: TaskTypeId) -> &[RuleId] {
        self.rules_by_subtask.get(&ty).map_or(&[], Vec::as_slice)
    }

    /// Rules without subtasks.
    pub fn empty_rules(&self) -> &[RuleId] {
        &self.empty_rules
    }

    pub fn task_term(&self, task: &Task) -> Term {
        Term::new(self.task_type(task.ty).name.clone(), task.args.clone())
    }

    pub fn action_term(&self, action: &Action) -> Term {
        Term::new(self.action_type(action.ty).name.clone(), action.args.clone())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Incremental constructor for a [`Domain`].
#[derive(Debug, Clone)]
pub struct DomainBuilder {
    lattice: TypeLattice,
    constants: Vec<Constant>,
    constants_by_name: HashMap<String, usize>,
    task_types: Vec<TaskType>,
    action_types: Vec<ActionType>,
    methods: Vec<Rule>,
    tasks_by_key: HashMap<(String, usize), TaskTypeId>,
    actions_by_key: HashMap<(String, usize), ActionTypeId>,
    linearize_methods: bool,
}

impl Default for DomainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainBuilder {
    pub fn new() -> Self {
        Self {
            lattice: TypeLattice::new(),
            constants: Vec::new(),
            constants_by_name: HashMap::new(),
            task_types: Vec::new(),
            action_types: Vec::new(),
            methods: Vec::new(),
            tasks_by_key: HashMap::new(),
            actions_by_key: HashMap::new(),
            linearize_methods: true,
        }
    }

    /// Expand partially ordered methods into one rule per linearization
    /// (default). When off, the grounding search enforces the partial order.
    pub fn linearize_methods(mut self, enabled: bool) -> Self {
        self.linearize_methods = enabled;
        self
    }

    pub fn lattice(&self) -> &TypeLattice {
        &self.lattice
    }

    pub fn lattice_mut(&mut self) -> &mut TypeLattice {
        &mut self.lattice
    }

    pub fn add_constant(&mut self, name: &str, ty: TypeId) -> Result<(), DomainError> {
        if self.constants_by_name.contains_key(name) {
            return Err(DomainError::DuplicateConstant(name.to_string()));
        }
        self.constants_by_name
            .insert(name.to_string(), self.constants.len());
        self.constants.push(Constant::new(name, ty));
        Ok(())
    }

    fn claim_task_key(&self, name: &str, arity: usize) -> Result<(), DomainError> {
        if self.tasks_by_key.contains_key(&(name.to_string(), arity)) {
            return Err(DomainError::DuplicateSignature {
                name: name.to_string(),
                arity,
            });
        }
        Ok(())
    }

    /// Declare a compound task.
    pub fn add_task(&mut self, name: &str, params: Vec<Param>) -> Result<TaskTypeId, DomainError> {
        self.claim_task_key(name, params.len())?;
        let id = TaskTypeId(self.task_types.len());
        self.tasks_by_key.insert((name.to_string(), params.len()), id);
        self.task_types.push(TaskType::new(name, params));
        Ok(id)
    }

    /// Declare an action together with the primitive task standing for it
    /// in methods.
    pub fn add_action(
        &mut self,
        name: &str,
        params: Vec<Param>,
        pre: Vec<ActionCondition>,
        add: Vec<ActionCondition>,
        del: Vec<ActionCondition>,
    ) -> Result<ActionTypeId, DomainError> {
        self.claim_task_key(name, params.len())?;
        let id = ActionTypeId(self.action_types.len());
        let task = TaskTypeId(self.task_types.len());
        let key = (name.to_string(), params.len());
        self.tasks_by_key.insert(key.clone(), task);
        self.actions_by_key.insert(key, id);

        let mut task_type = TaskType::new(name, params.clone());
        task_type.action = Some(id);
        self.task_types.push(task_type);
        self.action_types.push(ActionType {
            name: name.to_string(),
            params,
            task,
            pre,
            add,
            del,
        });
        Ok(id)
    }

    pub fn find_task(&self, name: &str, arity: usize) -> Option<TaskTypeId> {
        self.tasks_by_key.get(&(name.to_string(), arity)).copied()
    }

    pub fn task_type(&self, id: TaskTypeId) -> &TaskType {
        &self.task_types[id.0]
    }

    /// Validate and register a method.
    pub fn add_method(&mut self, mut rule: Rule) -> Result<(), DomainError> {
        rule.validate(&self.task_types)?;
        rule.origin = self.methods.len();
        self.methods.push(rule);
        Ok(())
    }

    pub fn build(mut self) -> Result<Domain, DomainError> {
        self.lattice.seal();
        self.compute_min_lengths();

        let declared_methods = self.methods.len();
        let mut rules = Vec::new();
        for method in std::mem::take(&mut self.methods) {
            if self.linearize_methods && matches!(method.order, SubtaskOrder::Partial(_)) {
                rules.extend(
                    method
                        .explicit_subtask_ordering()
                        .iter()
                        .map(|sequence| method.linearized(sequence)),
                );
            } else {
                rules.push(method);
            }
        }
        for rule in &mut rules {
            rule.derive_bounds(&self.task_types);
        }

        let mut rules_by_subtask: HashMap<TaskTypeId, Vec<RuleId>> = HashMap::new();
        let mut empty_rules = Vec::new();
        for (index, rule) in rules.iter().enumerate() {
            let id = RuleId(index);
            self.task_types[rule.main_task.0].rules.push(id);
            if rule.is_empty() {
                empty_rules.push(id);
            }
            let mut seen = Vec::new();
            for ty in &rule.subtasks {
                if !seen.contains(ty) {
                    seen.push(*ty);
                    rules_by_subtask.entry(*ty).or_default().push(id);
                }
            }
        }

        for task in self.task_types.iter().filter(|t| t.min_length == usize::MAX) {
            tracing::warn!(task = %task.name, "task has no decomposition into actions");
        }

        let constants_by_type = self
            .lattice
            .ids()
            .map(|ty| {
                let accepted = self.lattice.descendants(ty);
                self.constants
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| accepted.contains(&c.ty()))
                    .map(|(i, _)| i)
                    .collect()
            })
            .collect();

        tracing::debug!(
            types = self.lattice.len(),
            constants = self.constants.len(),
            tasks = self.task_types.len(),
            actions = self.action_types.len(),
            methods = declared_methods,
            rules = rules.len(),
            "domain built"
        );

        Ok(Domain {
            lattice: self.lattice,
            constants: self.constants,
            constants_by_name: self.constants_by_name,
            constants_by_type,
            task_types: self.task_types,
            action_types: self.action_types,
            rules,
            declared_methods,
            tasks_by_key: self.tasks_by_key,
            actions_by_key: self.actions_by_key,
            rules_by_subtask,
            empty_rules,
        })
    }

    /// Primitive tasks have length 1; a compound task takes the shortest
    /// of its methods, each the sum over its subtasks. Iterated to a
    /// fixpoint since lengths only decrease.
    fn compute_min_lengths(&mut self) {
        for task in &mut self.task_types {
            task.min_length = if task.is_primitive() { 1 } else { usize::MAX };
        }
        let mut changed = true;
        while changed {
            changed = false;
            for method in &self.methods {
                let length = method.subtasks.iter().fold(0usize, |acc, t| {
                    acc.saturating_add(self.task_types[t.0].min_length)
                });
                let main = &mut self.task_types[method.main_task.0];
                if length < main.min_length {
                    main.min_length = length;
                    changed = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Anchor, LiteralTemplate};

    fn builder() -> (DomainBuilder, TypeId) {
        let mut builder = DomainBuilder::new();
        let place = builder.lattice_mut().declare("place");
        builder.add_constant("a", place).unwrap();
        builder.add_constant("b", place).unwrap();
        builder
            .add_action(
                "go",
                vec![Param::new("from", place), Param::new("to", place)],
                vec![],
                vec![],
                vec![],
            )
            .unwrap();
        (builder, place)
    }

    #[test]
    fn actions_register_primitive_tasks() {
        let (builder, _) = builder();
        let domain = builder.build().unwrap();
        let action = domain.find_action("go", 2).unwrap();
        let task = domain.find_task("go", 2).unwrap();
        assert_eq!(domain.action_type(action).task, task);
        assert_eq!(domain.task_type(task).action, Some(action));
        assert_eq!(domain.task_type(task).min_length(), 1);
        assert!(domain.find_task("go", 1).is_none());
    }

    #[test]
    fn duplicate_signatures_and_constants_are_rejected() {
        let (mut builder, place) = builder();
        let err = builder.add_task("go", vec![Param::new("x", place), Param::new("y", place)]);
        assert!(matches!(err, Err(DomainError::DuplicateSignature { arity: 2, .. })));
        // Same name, other arity is a different signature.
        builder.add_task("go", vec![Param::new("x", place)]).unwrap();
        assert!(matches!(
            builder.add_constant("a", place),
            Err(DomainError::DuplicateConstant(_))
        ));
    }

    #[test]
    fn min_lengths_reach_fixpoint_through_nested_methods() {
        let (mut builder, place) = builder();
        let go = builder.find_task("go", 2).unwrap();
        let leg = builder.add_task("leg", vec![Param::new("x", place)]).unwrap();
        let tour = builder.add_task("tour", vec![Param::new("x", place)]).unwrap();
        let never = builder.add_task("never", vec![]).unwrap();
        let vars = || vec![Param::new("x", place), Param::new("y", place)];

        builder
            .add_method(Rule::new("tour", tour, vec![0], vars()).subtask(leg, vec![0]).subtask(leg, vec![1]))
            .unwrap();
        builder
            .add_method(Rule::new("leg", leg, vec![0], vars()).subtask(go, vec![0, 1]))
            .unwrap();
        builder
            .add_method(Rule::new("leg-long", leg, vec![0], vars()).subtask(go, vec![0, 1]).subtask(go, vec![1, 0]))
            .unwrap();
        builder
            .add_method(Rule::new("never", never, vec![], vec![]).subtask(never, vec![]))
            .unwrap();

        let domain = builder.build().unwrap();
        assert_eq!(domain.task_type(leg).min_length(), 1);
        assert_eq!(domain.task_type(tour).min_length(), 2);
        assert_eq!(domain.task_type(never).min_length(), usize::MAX);
        assert_eq!(domain.rules_with_subtask(go).len(), 2);
        assert_eq!(domain.task_type(leg).rules().len(), 2);
    }

    #[test]
    fn partial_orders_expand_unless_disabled() {
        let make = |linearize: bool| {
            let (builder, place) = builder();
            let mut builder = builder.linearize_methods(linearize);
            let go = builder.find_task("go", 2).unwrap();
            let pair = builder.add_task("pair", vec![]).unwrap();
            let vars = vec![Param::new("x", place), Param::new("y", place)];
            let rule = Rule::new("pair", pair, vec![], vars)
                .subtask(go, vec![0, 1])
                .subtask(go, vec![1, 0])
                .precondition(Anchor::Subtask(0), LiteralTemplate::new("at", vec![0], true))
                .order(SubtaskOrder::Partial(vec![]));
            builder.add_method(rule).unwrap();
            builder.build().unwrap()
        };

        let expanded = make(true);
        assert_eq!(expanded.declared_methods(), 1);
        assert_eq!(expanded.rules().len(), 2);
        assert!(expanded.rules().iter().all(|r| r.origin == 0 && r.order == SubtaskOrder::Total));
        assert_eq!(expanded.rules()[1].pre[0].anchor, Anchor::Subtask(1));

        let kept = make(false);
        assert_eq!(kept.rules().len(), 1);
        assert_eq!(kept.rules_with_subtask(kept.find_task("go", 2).unwrap()).len(), 1);
    }

    #[test]
    fn constants_are_enumerated_through_subtypes() {
        let mut builder = DomainBuilder::new();
        let place = builder.lattice_mut().declare("place");
        let depot = builder.lattice_mut().declare("depot");
        assert!(builder.lattice_mut().try_add_ancestor(depot, place));
        builder.add_constant("p1", place).unwrap();
        builder.add_constant("d1", depot).unwrap();
        let domain = builder.build().unwrap();

        let names = |ty| domain.get_constants(ty).map(|c| c.name().to_string()).collect::<Vec<_>>();
        assert_eq!(names(place), vec!["p1", "d1"]);
        assert_eq!(names(depot), vec!["d1"]);
        assert_eq!(names(TypeId::ANY), vec!["p1", "d1"]);
    }
}
