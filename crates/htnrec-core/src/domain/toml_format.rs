//! TOML format types for domain and problem files.
//!
//! These types map directly to the on-disk format and are deserialized via
//! `serde` + the `toml` crate. Literals stay strings here; [`super::parser`]
//! resolves them against the declared types, tasks and variables.

use serde::{Deserialize, Serialize};

/// Top-level structure of a domain file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DomainToml {
    #[serde(default)]
    pub types: Vec<TypeToml>,
    #[serde(default)]
    pub constants: Vec<ConstantToml>,
    #[serde(default)]
    pub actions: Vec<ActionToml>,
    #[serde(default)]
    pub tasks: Vec<TaskToml>,
    #[serde(default)]
    pub methods: Vec<MethodToml>,
}

/// A `[[types]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeToml {
    pub name: String,
    /// Direct supertypes; any number of them.
    #[serde(default)]
    pub parents: Vec<String>,
}

/// A `[[constants]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConstantToml {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// An `[[actions]]` entry. Parameters are `"name:type"`; conditions are
/// literals over parameter names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionToml {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub pre: Vec<String>,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub del: Vec<String>,
}

/// A `[[tasks]]` entry declaring a compound task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskToml {
    pub name: String,
    #[serde(default)]
    pub params: Vec<String>,
}

/// A `[[methods]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MethodToml {
    pub name: String,
    /// The decomposed task, e.g. `"transfer(l1, c, r, l2)"`.
    pub task: String,
    #[serde(default)]
    pub subtasks: Vec<String>,
    /// Absent: totally ordered in declaration order. Present: only the
    /// listed `[before, after]` pairs constrain the order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<[usize; 2]>>,
    /// Variables used only in conditions, `"name:type"`.
    #[serde(default)]
    pub vars: Vec<String>,
    #[serde(default)]
    pub pre: Vec<ConditionToml>,
    #[serde(default)]
    pub post: Vec<ConditionToml>,
    #[serde(default)]
    pub between: Vec<BetweenToml>,
}

/// A condition on the whole method (plain string) or on one subtask.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionToml {
    Main(String),
    Subtask { literal: String, subtask: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetweenToml {
    pub from: usize,
    pub to: usize,
    pub literal: String,
}

/// Top-level structure of a problem file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProblemToml {
    /// Ground atoms true initially; everything else is false.
    #[serde(default)]
    pub init: Vec<String>,
    /// Task pattern to recognize; `_` leaves a position open.
    pub goal: String,
    /// Observed actions in order.
    #[serde(default)]
    pub observed: Vec<String>,
}
