//! Shared fixtures for htnrec integration tests.
//!
//! The fixtures describe a small logistics domain: a robot carries cargo
//! between locations with `load`, `move` and `unload`, and the compound
//! task `transfer` strings the three together.

use std::path::PathBuf;

use htnrec_core::domain::{parse_domain_toml, parse_problem_toml};
use htnrec_core::{Domain, Problem};
use tempfile::TempDir;

pub const TRANSPORT_DOMAIN: &str = r#"
[[types]]
name = "location"

[[types]]
name = "cargo"

[[types]]
name = "robot"

[[constants]]
name = "l1"
type = "location"

[[constants]]
name = "l2"
type = "location"

[[constants]]
name = "c1"
type = "cargo"

[[constants]]
name = "r1"
type = "robot"

[[actions]]
name = "load"
params = ["c:cargo", "l:location", "r:robot"]
pre = ["at(c, l)", "at(r, l)"]
add = ["in(c, r)"]
del = ["at(c, l)"]

[[actions]]
name = "move"
params = ["r:robot", "from:location", "to:location"]
pre = ["at(r, from)"]
add = ["at(r, to)"]
del = ["at(r, from)"]

[[actions]]
name = "unload"
params = ["c:cargo", "l:location", "r:robot"]
pre = ["in(c, r)", "at(r, l)"]
add = ["at(c, l)"]
del = ["in(c, r)"]

[[tasks]]
name = "transfer"
params = ["from:location", "c:cargo", "r:robot", "to:location"]

[[methods]]
name = "carry"
task = "transfer(l1, c, r, l2)"
subtasks = ["load(c, l1, r)", "move(r, l1, l2)", "unload(c, l2, r)"]
"#;

/// Every observation of a full transfer of `c1` from `l1` to `l2`.
pub const FULL_TRANSFER: &str = r#"
init = ["at(r1, l1)", "at(c1, l1)"]
goal = "transfer(l1, c1, r1, l2)"
observed = ["load(c1, l1, r1)", "move(r1, l1, l2)", "unload(c1, l2, r1)"]
"#;

/// The same transfer with the move never observed.
pub const MISSING_MOVE: &str = r#"
init = ["at(r1, l1)", "at(c1, l1)"]
goal = "transfer(_, c1, _, l2)"
observed = ["load(c1, l1, r1)", "unload(c1, l2, r1)"]
"#;

/// An observation naming an action the domain does not have.
pub const UNKNOWN_ACTION: &str = r#"
init = ["at(r1, l1)", "at(c1, l1)"]
goal = "transfer(l1, c1, r1, l2)"
observed = ["load(c1, l1, r1)", "teleport(r1, l2)"]
"#;

/// Parse [`TRANSPORT_DOMAIN`].
///
/// # Panics
///
/// Panics if the fixture fails to load.
pub fn transport_domain() -> Domain {
    parse_domain_toml(TRANSPORT_DOMAIN).expect("transport domain should load")
}

/// Parse a problem fixture.
///
/// # Panics
///
/// Panics if the fixture fails to parse.
pub fn problem(content: &str) -> Problem {
    parse_problem_toml(content).expect("problem fixture should parse")
}

/// A temp directory holding `domain.toml` and `problem.toml`.
pub struct FixtureDir {
    pub dir: TempDir,
    pub domain: PathBuf,
    pub problem: PathBuf,
}

/// Write a domain and a problem file into a fresh temp directory.
///
/// # Panics
///
/// Panics if the files cannot be written.
pub fn write_fixtures(domain: &str, problem: &str) -> FixtureDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    let domain_path = dir.path().join("domain.toml");
    let problem_path = dir.path().join("problem.toml");
    std::fs::write(&domain_path, domain).expect("failed to write domain");
    std::fs::write(&problem_path, problem).expect("failed to write problem");
    FixtureDir {
        dir,
        domain: domain_path,
        problem: problem_path,
    }
}
