//! `htnrec recognize`: run recognition for one problem file.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use htnrec_core::domain::parse_problem_toml;
use htnrec_core::recognizer::SearchStats;
use htnrec_core::{RecognitionOutcome, RecognizedPlan, Recognizer, RecognizerConfig};

use crate::check_cmd::load_domain;

pub const EXIT_NOT_RECOGNIZED: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

/// Run recognition and print the result. Returns the process exit code.
pub async fn run_recognize(
    domain_path: &str,
    problem_path: &str,
    config: RecognizerConfig,
) -> Result<i32> {
    let domain = load_domain(domain_path)?;
    let contents = std::fs::read_to_string(problem_path)
        .with_context(|| format!("failed to read problem file {problem_path}"))?;
    let problem = parse_problem_toml(&contents)
        .with_context(|| format!("invalid problem file {problem_path}"))?;

    // First signal cancels, second force-exits.
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(EXIT_CANCELLED);
            }
            eprintln!("\nCancelling recognition (Ctrl+C again to force)...");
            cancel_clone.cancel();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || {
        Recognizer::new(&domain, config).recognize(&problem, &cancel)
    })
    .await
    .context("recognition task panicked")?
    .context("recognition failed")?;

    Ok(match outcome {
        RecognitionOutcome::Recognized(plan) => {
            print_plan(&plan);
            0
        }
        RecognitionOutcome::NotRecognized { levels, stats } => {
            println!("No plan recognized after {levels} level(s).");
            print_stats(&stats);
            EXIT_NOT_RECOGNIZED
        }
        RecognitionOutcome::Cancelled => {
            println!("Recognition cancelled.");
            EXIT_CANCELLED
        }
    })
}

fn print_plan(plan: &RecognizedPlan) {
    println!(
        "Recognized at level {} after {} iteration(s):",
        plan.level, plan.iterations
    );
    print!("{plan}");
    if plan.inserted.is_empty() {
        println!("Inserted actions: none");
    } else {
        println!("Inserted actions:");
        for inserted in &plan.inserted {
            println!("  {:>3}  {}", inserted.position, inserted.action);
        }
    }
    print_stats(&plan.stats);
}

fn print_stats(stats: &SearchStats) {
    println!("Stats:");
    println!("  rule instances:     {}", stats.rule_instances);
    println!("  invalid instances:  {}", stats.invalid_instances);
    println!("  invalid subplans:   {}", stats.invalid_subplans);
    println!("  duplicate subplans: {}", stats.duplicate_subplans);
    println!("  subplans:           {}", stats.subplans);
    println!("  hypotheses:         {}", stats.hypotheses);
    println!("  levels skipped:     {}", stats.levels_skipped);
}
