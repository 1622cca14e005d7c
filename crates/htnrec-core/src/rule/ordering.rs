//! Partial-order closure and linearization of method subtasks.

use std::collections::BTreeSet;

/// How a method's subtasks are ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubtaskOrder {
    /// No order declared: subtasks run in declaration order.
    Total,
    /// Explicit `(i, j)` pairs meaning "subtask `i` precedes subtask `j`".
    /// Unlisted pairs are unordered; an empty list leaves every subtask
    /// free.
    Partial(Vec<(usize, usize)>),
}

impl SubtaskOrder {
    /// The order as explicit precedence pairs over `n` subtasks.
    pub fn pairs(&self, n: usize) -> Vec<(usize, usize)> {
        match self {
            SubtaskOrder::Total => (1..n).map(|j| (j - 1, j)).collect(),
            SubtaskOrder::Partial(pairs) => pairs.clone(),
        }
    }
}

/// For each subtask, the set of subtasks that must precede it, closed
/// under transitivity. A subtask that ends up in its own set sits on a
/// cycle.
pub fn before_closure(n: usize, pairs: &[(usize, usize)]) -> Vec<BTreeSet<usize>> {
    let mut before = vec![BTreeSet::new(); n];
    for &(i, j) in pairs {
        before[j].insert(i);
    }
    let mut changed = true;
    while changed {
        changed = false;
        for j in 0..n {
            let inherited: Vec<usize> = before[j]
                .iter()
                .flat_map(|i| before[*i].iter().copied())
                .collect();
            for i in inherited {
                changed |= before[j].insert(i);
            }
        }
    }
    before
}

/// Invert a before-closure into the matching after-closure.
pub fn after_closure(before: &[BTreeSet<usize>]) -> Vec<BTreeSet<usize>> {
    let mut after = vec![BTreeSet::new(); before.len()];
    for (j, preds) in before.iter().enumerate() {
        for i in preds {
            after[*i].insert(j);
        }
    }
    after
}

pub fn has_cycle(before: &[BTreeSet<usize>]) -> bool {
    before.iter().enumerate().any(|(i, preds)| preds.contains(&i))
}

/// Every topological linearization of `n` subtasks under `order`.
///
/// A totally ordered method yields exactly its declaration order. The
/// result is in lexicographic order and is empty when the order is cyclic.
pub fn explicit_subtask_orderings(n: usize, order: &SubtaskOrder) -> Vec<Vec<usize>> {
    if *order == SubtaskOrder::Total {
        return vec![(0..n).collect()];
    }
    let before = before_closure(n, &order.pairs(n));
    if has_cycle(&before) {
        return Vec::new();
    }
    linearize(Vec::new(), before, (0..n).collect())
}

fn linearize(
    prefix: Vec<usize>,
    before: Vec<BTreeSet<usize>>,
    remaining: BTreeSet<usize>,
) -> Vec<Vec<usize>> {
    if remaining.is_empty() {
        return vec![prefix];
    }
    remaining
        .iter()
        .filter(|i| before[**i].is_empty())
        .flat_map(|&next| {
            let mut prefix = prefix.clone();
            prefix.push(next);
            let mut before = before.clone();
            for preds in &mut before {
                preds.remove(&next);
            }
            let mut remaining = remaining.clone();
            remaining.remove(&next);
            linearize(prefix, before, remaining)
        })
        .collect()
}
