//! `htnrec check`: load a domain file and summarize it.

use anyhow::{Context, Result};

use htnrec_core::Domain;
use htnrec_core::domain::parse_domain_toml;

/// Read and parse a domain file.
pub fn load_domain(path: &str) -> Result<Domain> {
    tracing::debug!(path, "loading domain");
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read domain file {path}"))?;
    parse_domain_toml(&contents).with_context(|| format!("invalid domain file {path}"))
}

pub fn run_check(path: &str) -> Result<()> {
    let domain = load_domain(path)?;
    let compound = domain
        .task_types()
        .iter()
        .filter(|t| !t.is_primitive())
        .count();

    println!("Domain {path} is valid.");
    // The lattice always holds the implicit `any` type.
    println!("  types:     {}", domain.lattice().len() - 1);
    println!("  constants: {}", domain.constants().len());
    println!("  actions:   {}", domain.action_types().len());
    println!("  tasks:     {compound}");
    println!("  methods:   {}", domain.declared_methods());
    println!("  rules:     {}", domain.rules().len());
    Ok(())
}
