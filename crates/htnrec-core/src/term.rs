//! Grounding primitives: typed constants, parameterized terms and literals.
//!
//! `==`/`Hash` on these types is structural identity (names and exact type
//! ids) and is what the dedup registries key on. The lattice-aware
//! equivalence used during unification is the explicit `equals` family,
//! which needs a [`TypeLattice`] to decide type relatedness.

use std::fmt;

use crate::lattice::{TypeId, TypeLattice};

/// A typed atom. An empty name is the unbound-variable sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Constant {
    name: String,
    ty: TypeId,
}

impl Constant {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// An unbound placeholder of the given declared type.
    pub fn unbound(ty: TypeId) -> Self {
        Self {
            name: String::new(),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> TypeId {
        self.ty
    }

    /// True for the unbound sentinel, regardless of type.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }

    /// Equal names and related types. An unbound constant never equals a
    /// bound one.
    pub fn equals(&self, other: &Constant, lattice: &TypeLattice) -> bool {
        self.name == other.name && lattice.is_related(self.ty, other.ty)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("_")
        } else {
            f.write_str(&self.name)
        }
    }
}

/// A name applied to an ordered argument list. Used as task and action
/// signature and as (partially) ground condition atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term {
    pub name: String,
    pub args: Vec<Constant>,
}

impl Term {
    pub fn new(name: impl Into<String>, args: Vec<Constant>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    pub fn is_ground(&self) -> bool {
        self.args.iter().all(|c| !c.is_empty())
    }

    /// Same name and arity; every position is either unbound on both sides
    /// or lattice-equal.
    pub fn equals(&self, other: &Term, lattice: &TypeLattice) -> bool {
        self.name == other.name
            && self.args.len() == other.args.len()
            && self
                .args
                .iter()
                .zip(&other.args)
                .all(|(a, b)| (a.is_empty() && b.is_empty()) || a.equals(b, lattice))
    }

    /// Loose match: names agree and every position present on both sides is
    /// unbound on one of them or lattice-equal. Trailing positions that only
    /// one side has are ignored.
    pub fn equal_or_null(&self, other: &Term, lattice: &TypeLattice) -> bool {
        self.name == other.name
            && self
                .args
                .iter()
                .zip(&other.args)
                .all(|(a, b)| a.is_empty() || b.is_empty() || a.equals(b, lattice))
    }

    /// For "same-variable" conditions: all arguments pairwise equal
    /// (`positive`) or all pairwise distinct (`!positive`). Terms with fewer
    /// than two arguments satisfy both.
    pub fn check_equality(&self, positive: bool) -> bool {
        let names: Vec<&str> = self.args.iter().map(Constant::name).collect();
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                if (a == b) != positive {
                    return false;
                }
            }
        }
        true
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// A possibly negated atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    pub atom: Term,
    pub positive: bool,
}

impl Literal {
    pub fn new(atom: Term, positive: bool) -> Self {
        Self { atom, positive }
    }

    pub fn negated(&self) -> Self {
        Self {
            atom: self.atom.clone(),
            positive: !self.positive,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.positive {
            f.write_str("!")?;
        }
        write!(f, "{}", self.atom)
    }
}
