//! Domain and problem TOML loader.
//!
//! Parses the text forms of [`super::toml_format`] and resolves them into a
//! [`Domain`]:
//! - Every type, constant, task and action name is declared once.
//! - Parameters and variables carry known types.
//! - Method tasks and subtasks resolve by name and arity.
//! - Conditions only mention declared variables.
//!
//! Structural checks on the resulting rules run in [`DomainBuilder`].

use std::collections::HashSet;

use super::toml_format::{ActionToml, ConditionToml, DomainToml, MethodToml, ProblemToml};
use super::{Domain, DomainBuilder, DomainError};
use crate::lattice::{TypeId, TypeLattice};
use crate::recognizer::Problem;
use crate::rule::{Anchor, LiteralTemplate, Rule, SubtaskOrder};
use crate::task::{ActionCondition, Param};

/// An unresolved atom: a name applied to argument names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub name: String,
    pub args: Vec<String>,
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.args.join(", "))
    }
}

/// Parse `name(a, b)`, optionally negated with a leading `!`. Returns the
/// atom and whether it is positive.
pub fn parse_literal(text: &str) -> Result<(Atom, bool), DomainError> {
    let invalid = || DomainError::InvalidLiteral(text.to_string());
    let trimmed = text.trim();
    let (positive, body) = match trimmed.strip_prefix('!') {
        Some(rest) => (false, rest.trim_start()),
        None => (true, trimmed),
    };
    let open = body.find('(').ok_or_else(invalid)?;
    let inner = body[open + 1..].strip_suffix(')').ok_or_else(invalid)?;
    let name = body[..open].trim();
    if name.is_empty() || inner.contains(['(', ')']) {
        return Err(invalid());
    }
    let args = if inner.trim().is_empty() {
        Vec::new()
    } else {
        inner
            .split(',')
            .map(|a| {
                let a = a.trim();
                if a.is_empty() { Err(invalid()) } else { Ok(a.to_string()) }
            })
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok((
        Atom {
            name: name.to_string(),
            args,
        },
        positive,
    ))
}

/// Parse a literal that must not be negated.
pub fn parse_atom(text: &str) -> Result<Atom, DomainError> {
    match parse_literal(text)? {
        (atom, true) => Ok(atom),
        (_, false) => Err(DomainError::InvalidLiteral(text.to_string())),
    }
}

/// Parse a `name:type` parameter. A bare name is typed `any`.
fn parse_param(text: &str, lattice: &TypeLattice) -> Result<Param, DomainError> {
    let (name, ty) = match text.split_once(':') {
        Some((name, ty)) => (name.trim(), ty.trim()),
        None => (text.trim(), crate::lattice::ANY_TYPE),
    };
    if name.is_empty() || ty.is_empty() {
        return Err(DomainError::InvalidParam(text.to_string()));
    }
    let ty = lattice
        .lookup(ty)
        .ok_or_else(|| DomainError::UnknownType(ty.to_string()))?;
    Ok(Param::new(name, ty))
}

/// Parse and resolve a domain file with default builder settings.
pub fn parse_domain_toml(content: &str) -> Result<Domain, DomainError> {
    let parsed: DomainToml = toml::from_str(content)?;
    domain_from_toml(&parsed, DomainBuilder::new())
}

/// Resolve an already deserialized domain into `builder` and build it.
pub fn domain_from_toml(parsed: &DomainToml, mut builder: DomainBuilder) -> Result<Domain, DomainError> {
    // Declare all types first so parents may be listed in any order.
    let mut seen = HashSet::new();
    for ty in &parsed.types {
        if !seen.insert(ty.name.as_str()) {
            return Err(DomainError::DuplicateType(ty.name.clone()));
        }
        builder.lattice_mut().declare(&ty.name);
    }
    for ty in &parsed.types {
        let id = lookup_type(builder.lattice(), &ty.name)?;
        for parent in &ty.parents {
            let parent = lookup_type(builder.lattice(), parent)?;
            // Cyclic edges are logged and dropped by the lattice.
            builder.lattice_mut().try_add_ancestor(id, parent);
        }
    }

    for constant in &parsed.constants {
        let ty = lookup_type(builder.lattice(), &constant.ty)?;
        builder.add_constant(&constant.name, ty)?;
    }

    for action in &parsed.actions {
        add_action(&mut builder, action)?;
    }

    for task in &parsed.tasks {
        let params = task
            .params
            .iter()
            .map(|p| parse_param(p, builder.lattice()))
            .collect::<Result<Vec<_>, _>>()?;
        builder.add_task(&task.name, params)?;
    }

    for method in &parsed.methods {
        let rule = resolve_method(&builder, method)?;
        builder.add_method(rule)?;
    }

    builder.build()
}

fn lookup_type(lattice: &TypeLattice, name: &str) -> Result<TypeId, DomainError> {
    lattice
        .lookup(name)
        .ok_or_else(|| DomainError::UnknownType(name.to_string()))
}

fn add_action(builder: &mut DomainBuilder, action: &ActionToml) -> Result<(), DomainError> {
    let params = action
        .params
        .iter()
        .map(|p| parse_param(p, builder.lattice()))
        .collect::<Result<Vec<_>, _>>()?;

    let condition = |text: &String, effect: bool| -> Result<ActionCondition, DomainError> {
        let (atom, positive) = parse_literal(text)?;
        if effect && !positive {
            return Err(DomainError::InvalidLiteral(text.clone()));
        }
        let args = atom
            .args
            .iter()
            .map(|arg| {
                params.iter().position(|p| p.name == *arg).ok_or_else(|| {
                    DomainError::UnknownActionParam {
                        action: action.name.clone(),
                        name: arg.clone(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ActionCondition {
            predicate: atom.name,
            args,
            positive,
        })
    };

    let pre = action
        .pre
        .iter()
        .map(|t| condition(t, false))
        .collect::<Result<Vec<_>, _>>()?;
    let add = action
        .add
        .iter()
        .map(|t| condition(t, true))
        .collect::<Result<Vec<_>, _>>()?;
    let del = action
        .del
        .iter()
        .map(|t| condition(t, true).map(|c| ActionCondition { positive: false, ..c }))
        .collect::<Result<Vec<_>, _>>()?;

    builder.add_action(&action.name, params, pre, add, del)?;
    Ok(())
}

/// Pooled variables of a method under construction.
struct VarPool<'m> {
    method: &'m str,
    vars: Vec<Param>,
}

impl VarPool<'_> {
    fn index(&self, name: &str) -> Option<usize> {
        self.vars.iter().position(|p| p.name == name)
    }

    /// Index of `name`, declaring it with `ty` when new.
    fn bind(&mut self, name: &str, ty: TypeId) -> usize {
        self.index(name).unwrap_or_else(|| {
            self.vars.push(Param::new(name, ty));
            self.vars.len() - 1
        })
    }

    fn require(&self, name: &str) -> Result<usize, DomainError> {
        self.index(name).ok_or_else(|| DomainError::UnknownVariable {
            method: self.method.to_string(),
            variable: name.to_string(),
        })
    }

    fn template(&self, text: &str) -> Result<LiteralTemplate, DomainError> {
        let (atom, positive) = parse_literal(text)?;
        let vars = atom
            .args
            .iter()
            .map(|a| self.require(a))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LiteralTemplate::new(atom.name, vars, positive))
    }
}

/// Variables are pooled in order of first appearance: main task
/// parameters, declared `vars`, then subtask arguments, each typed by the
/// parameter it first fills.
fn resolve_method(builder: &DomainBuilder, method: &MethodToml) -> Result<Rule, DomainError> {
    let mut pool = VarPool {
        method: &method.name,
        vars: Vec::new(),
    };
    let resolve_task = |text: &str| {
        let atom = parse_atom(text)?;
        let id = builder
            .find_task(&atom.name, atom.args.len())
            .ok_or_else(|| DomainError::UnknownTask {
                method: method.name.clone(),
                name: atom.name.clone(),
                arity: atom.args.len(),
            })?;
        Ok::<_, DomainError>((id, atom))
    };

    let (main_task, main_atom) = resolve_task(&method.task)?;
    let main_params = builder.task_type(main_task).params.clone();
    let main_refs: Vec<usize> = main_atom
        .args
        .iter()
        .zip(&main_params)
        .map(|(arg, param)| pool.bind(arg, param.ty))
        .collect();

    for text in &method.vars {
        let param = parse_param(text, builder.lattice())?;
        if pool.index(&param.name).is_some() {
            return Err(DomainError::MalformedMethod {
                method: method.name.clone(),
                detail: format!("variable {:?} declared twice", param.name),
            });
        }
        pool.vars.push(param);
    }

    let mut subtasks = Vec::new();
    for text in &method.subtasks {
        let (id, atom) = resolve_task(text)?;
        let params = builder.task_type(id).params.clone();
        let refs: Vec<usize> = atom
            .args
            .iter()
            .zip(&params)
            .map(|(arg, param)| pool.bind(arg, param.ty))
            .collect();
        subtasks.push((id, refs));
    }

    let mut rule = Rule::new(method.name.clone(), main_task, main_refs, Vec::new());
    for (id, refs) in subtasks {
        rule = rule.subtask(id, refs);
    }
    for cond in &method.pre {
        let (anchor, text) = anchor_of(cond);
        rule = rule.precondition(anchor, pool.template(text)?);
    }
    for cond in &method.post {
        let (anchor, text) = anchor_of(cond);
        rule = rule.postcondition(anchor, pool.template(text)?);
    }
    for between in &method.between {
        rule = rule.between(between.from, between.to, pool.template(&between.literal)?);
    }
    if let Some(pairs) = &method.order {
        rule = rule.order(SubtaskOrder::Partial(
            pairs.iter().map(|[i, j]| (*i, *j)).collect(),
        ));
    }
    rule.vars = pool.vars;
    Ok(rule)
}

fn anchor_of(cond: &ConditionToml) -> (Anchor, &str) {
    match cond {
        ConditionToml::Main(text) => (Anchor::Main, text.as_str()),
        ConditionToml::Subtask { literal, subtask } => {
            (Anchor::Subtask(*subtask), literal.as_str())
        }
    }
}

/// Parse a problem file. Names are resolved against a domain only when
/// recognition starts.
pub fn parse_problem_toml(content: &str) -> Result<Problem, DomainError> {
    let parsed: ProblemToml = toml::from_str(content)?;
    Ok(Problem {
        init: parsed
            .init
            .iter()
            .map(|t| parse_atom(t))
            .collect::<Result<_, _>>()?,
        goal: parse_atom(&parsed.goal)?,
        observed: parsed
            .observed
            .iter()
            .map(|t| parse_atom(t))
            .collect::<Result<_, _>>()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_literal_forms() {
        let (atom, positive) = parse_literal(" !at( r1 , l1 )").unwrap();
        assert!(!positive);
        assert_eq!(atom.name, "at");
        assert_eq!(atom.args, vec!["r1", "l1"]);
        assert_eq!(atom.to_string(), "at(r1, l1)");

        let (empty, positive) = parse_literal("done()").unwrap();
        assert!(positive);
        assert!(empty.args.is_empty());

        let (eq, _) = parse_literal("=(x, y)").unwrap();
        assert_eq!(eq.name, "=");
    }

    #[test]
    fn parse_literal_rejects_malformed_text() {
        for text in ["at", "at(x", "(x)", "at(x,)", "at(f(x))", "!"] {
            let err = parse_literal(text).unwrap_err();
            assert!(
                matches!(err, DomainError::InvalidLiteral(_)),
                "{text}: unexpected {err:?}"
            );
        }
        assert!(parse_atom("!at(x)").is_err());
    }

    const BASE: &str = r#"
[[types]]
name = "vehicle"
parents = ["object"]

[[types]]
name = "object"

[[constants]]
name = "v1"
type = "vehicle"

[[actions]]
name = "drive"
params = ["v:vehicle", "o:object"]
pre = ["ready(v)"]
add = ["near(v, o)"]
del = ["ready(v)"]

[[tasks]]
name = "visit"
params = ["o:object"]
"#;

    fn with_method(method: &str) -> String {
        format!("{BASE}\n[[methods]]\n{method}")
    }

    #[test]
    fn parses_types_actions_and_method_pool() {
        let domain = parse_domain_toml(&with_method(
            r#"
name = "visit-by-vehicle"
task = "visit(o)"
subtasks = ["drive(v, o)"]
vars = ["w:vehicle"]
pre = ["ready(v)", { literal = "!=(v, w)", subtask = 0 }]
post = ["near(v, o)"]
"#,
        ))
        .unwrap();

        let lattice = domain.lattice();
        let vehicle = lattice.lookup("vehicle").unwrap();
        let object = lattice.lookup("object").unwrap();
        assert!(lattice.is_ancestor_to(object, vehicle));

        let drive = domain.action_type(domain.find_action("drive", 2).unwrap());
        assert!(!drive.del[0].positive);
        assert_eq!(drive.add[0].args, vec![0, 1]);

        let rule = domain.rule(domain.find_rule("visit-by-vehicle").unwrap());
        let names: Vec<&str> = rule.vars.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["o", "w", "v"]);
        assert_eq!(rule.vars[2].ty, vehicle);
        assert_eq!(rule.main_refs, vec![0]);
        assert_eq!(rule.subtask_refs, vec![vec![2, 0]]);
        assert_eq!(rule.pre[1].anchor, Anchor::Subtask(0));
        assert!(rule.pre[1].literal.is_equality());
        assert!(!rule.pre[1].literal.positive);
        assert_eq!(rule.order, SubtaskOrder::Total);
    }

    #[test]
    fn unknown_names_are_reported() {
        let err = parse_domain_toml(&with_method(
            r#"
name = "m"
task = "visit(o)"
subtasks = ["fly(o)"]
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, DomainError::UnknownTask { arity: 1, .. }));

        let err = parse_domain_toml(&with_method(
            r#"
name = "m"
task = "visit(o)"
subtasks = ["drive(v, o)"]
pre = ["fuel(x)"]
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, DomainError::UnknownVariable { ref variable, .. } if variable == "x"));

        let err = parse_domain_toml(&BASE.replace("ready(v)\"]\nadd", "ready(q)\"]\nadd")).unwrap_err();
        assert!(matches!(err, DomainError::UnknownActionParam { .. }));

        let err = parse_domain_toml(&BASE.replace("type = \"vehicle\"", "type = \"boat\"")).unwrap_err();
        assert!(matches!(err, DomainError::UnknownType(_)));
    }

    #[test]
    fn structural_errors_abort_loading() {
        let err = parse_domain_toml(&with_method(
            r#"
name = "m"
task = "visit(o)"
subtasks = ["drive(v, o)", "drive(v, o)"]
order = [[0, 1], [1, 0]]
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, DomainError::OrderCycle { .. }));

        let err = parse_domain_toml(&with_method(
            r#"
name = "m"
task = "visit(o)"
subtasks = ["drive(v, o)"]
between = [{ from = 0, to = 4, literal = "ready(v)" }]
"#,
        ))
        .unwrap_err();
        assert!(matches!(err, DomainError::MalformedMethod { .. }));

        let err = parse_domain_toml("[[types]]\nname = \"a\"\n[[types]]\nname = \"a\"\n").unwrap_err();
        assert!(matches!(err, DomainError::DuplicateType(_)));

        let err = parse_domain_toml("types = 3").unwrap_err();
        assert!(matches!(err, DomainError::TomlError(_)));
    }

    #[test]
    fn cyclic_type_parents_are_dropped_not_fatal() {
        let domain = parse_domain_toml(
            r#"
[[types]]
name = "a"
parents = ["b"]

[[types]]
name = "b"
parents = ["a"]
"#,
        )
        .unwrap();
        let lattice = domain.lattice();
        let a = lattice.lookup("a").unwrap();
        let b = lattice.lookup("b").unwrap();
        assert!(lattice.is_ancestor_to(b, a));
        assert!(!lattice.is_ancestor_to(a, b));
    }

    #[test]
    fn problem_atoms_are_parsed_but_not_resolved() {
        let problem = parse_problem_toml(
            r#"
init = ["at(r1, l1)"]
goal = "transfer(_, c1, _, l2)"
observed = ["teleport(r1)"]
"#,
        )
        .unwrap();
        assert_eq!(problem.goal.args, vec!["_", "c1", "_", "l2"]);
        assert_eq!(problem.observed[0].name, "teleport");

        let err = parse_problem_toml("goal = \"!t()\"").unwrap_err();
        assert!(matches!(err, DomainError::InvalidLiteral(_)));
    }
}
