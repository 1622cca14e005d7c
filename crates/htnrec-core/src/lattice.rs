//! Multiple-inheritance type lattice for constants and parameters.
//!
//! Types form a directed acyclic graph with any number of parents per type.
//! Every type keeps the full closure of its ancestors (self included), so
//! subsumption is a set lookup. Descendant sets are filled in once the
//! hierarchy is loaded ([`TypeLattice::seal`]) and are the hot path for
//! enumerating the constants a parameter accepts.
//!
//! The distinguished type `"any"` is implicitly an ancestor of every type
//! without appearing in any explicit ancestor set; comparisons special-case
//! it.

use std::collections::{BTreeSet, HashMap};

/// Name of the implicit top type.
pub const ANY_TYPE: &str = "any";

/// Stable index of a type inside a [`TypeLattice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(usize);

impl TypeId {
    /// The implicit top type `"any"`.
    pub const ANY: TypeId = TypeId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// One node of the lattice.
#[derive(Debug, Clone)]
pub struct ConstantType {
    /// Declared type name.
    pub name: String,
    ancestors: BTreeSet<TypeId>,
    children: BTreeSet<TypeId>,
    descendants: BTreeSet<TypeId>,
}

impl ConstantType {
    fn new(id: TypeId, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ancestors: BTreeSet::from([id]),
            children: BTreeSet::new(),
            descendants: BTreeSet::new(),
        }
    }

    /// Ancestor closure, including the type itself. Never contains `"any"`
    /// unless this is `"any"`.
    pub fn ancestors(&self) -> &BTreeSet<TypeId> {
        &self.ancestors
    }

    /// Direct children.
    pub fn children(&self) -> &BTreeSet<TypeId> {
        &self.children
    }

    /// Descendant closure, including the type itself, once sealed.
    pub fn descendants(&self) -> &BTreeSet<TypeId> {
        &self.descendants
    }
}

/// Arena of [`ConstantType`]s addressed by [`TypeId`].
#[derive(Debug, Clone)]
pub struct TypeLattice {
    types: Vec<ConstantType>,
    by_name: HashMap<String, TypeId>,
    sealed: bool,
}

impl Default for TypeLattice {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeLattice {
    /// Create a lattice containing only `"any"`.
    pub fn new() -> Self {
        let mut lattice = Self {
            types: Vec::new(),
            by_name: HashMap::new(),
            sealed: false,
        };
        lattice.declare(ANY_TYPE);
        lattice
    }

    /// Declare a type, returning the existing id if the name is known.
    pub fn declare(&mut self, name: &str) -> TypeId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = TypeId(self.types.len());
        self.types.push(ConstantType::new(id, name));
        self.by_name.insert(name.to_string(), id);
        if self.sealed {
            self.create_descendant_line(id);
        }
        id
    }

    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, id: TypeId) -> &ConstantType {
        &self.types[id.0]
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.types[id.0].name
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Iterate over all type ids in declaration order.
    pub fn ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.types.len()).map(TypeId)
    }

    /// Register `ancestor` as an ancestor of `ty`, propagating the new
    /// ancestors to every current descendant of `ty`.
    ///
    /// Returns `false` and leaves the lattice untouched when the edge would
    /// close a cycle (`ancestor` is already below `ty`, or is `ty` itself).
    pub fn try_add_ancestor(&mut self, ty: TypeId, ancestor: TypeId) -> bool {
        if ancestor == TypeId::ANY {
            return true;
        }
        if ty == TypeId::ANY || self.types[ancestor.0].ancestors.contains(&ty) {
            tracing::warn!(
                ty = %self.name(ty),
                ancestor = %self.name(ancestor),
                "rejected ancestor edge: would create a type cycle"
            );
            return false;
        }
        self.link(ancestor, ty);
        true
    }

    /// Register `child` as a direct child of `ty`, pushing all ancestors of
    /// `ty` down to `child` and its descendants.
    ///
    /// Returns `false` and leaves the lattice untouched when `child` is
    /// already an ancestor of `ty`.
    pub fn try_add_child(&mut self, ty: TypeId, child: TypeId) -> bool {
        if ty == TypeId::ANY {
            return true;
        }
        if child == TypeId::ANY || self.types[ty.0].ancestors.contains(&child) {
            tracing::warn!(
                ty = %self.name(ty),
                child = %self.name(child),
                "rejected child edge: would create a type cycle"
            );
            return false;
        }
        self.link(ty, child);
        true
    }

    fn link(&mut self, parent: TypeId, child: TypeId) {
        self.types[parent.0].children.insert(child);
        let inherited = self.types[parent.0].ancestors.clone();
        let subtree = self.subtree(child);
        for id in &subtree {
            self.types[id.0].ancestors.extend(inherited.iter().copied());
        }
        if self.sealed {
            for id in subtree {
                self.create_descendant_line(id);
            }
        }
    }

    /// `ty` plus everything reachable through `children`.
    fn subtree(&self, ty: TypeId) -> BTreeSet<TypeId> {
        let mut seen = BTreeSet::from([ty]);
        let mut stack = vec![ty];
        while let Some(id) = stack.pop() {
            for child in &self.types[id.0].children {
                if seen.insert(*child) {
                    stack.push(*child);
                }
            }
        }
        seen
    }

    /// True when `a` is `"any"` or appears in the ancestor closure of `b`.
    pub fn is_ancestor_to(&self, a: TypeId, b: TypeId) -> bool {
        a == TypeId::ANY || self.types[b.0].ancestors.contains(&a)
    }

    /// True when either type is an ancestor of the other.
    pub fn is_related(&self, a: TypeId, b: TypeId) -> bool {
        self.is_ancestor_to(a, b) || self.is_ancestor_to(b, a)
    }

    /// Whether a value of type `actual` may bind a parameter declared as
    /// `declared`. Constants typed `"any"` are wildcards and bind anywhere.
    pub fn accepts(&self, declared: TypeId, actual: TypeId) -> bool {
        actual == TypeId::ANY || self.is_ancestor_to(declared, actual)
    }

    /// Register `ty` as a descendant of each of its ancestors (and of
    /// `"any"`). Idempotent.
    pub fn create_descendant_line(&mut self, ty: TypeId) {
        let ancestors: Vec<TypeId> = self.types[ty.0].ancestors.iter().copied().collect();
        for ancestor in ancestors {
            self.types[ancestor.0].descendants.insert(ty);
        }
        self.types[TypeId::ANY.0].descendants.insert(ty);
    }

    /// Close the descendant sets over the whole hierarchy. Types declared or
    /// linked afterwards keep the sets current.
    pub fn seal(&mut self) {
        for index in 0..self.types.len() {
            self.create_descendant_line(TypeId(index));
        }
        self.sealed = true;
    }

    pub fn descendants(&self, ty: TypeId) -> &BTreeSet<TypeId> {
        &self.types[ty.0].descendants
    }
}
