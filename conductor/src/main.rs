//! Multi-agent software-change pipeline.
//!
//! Drives a queue of change tasks (`.conductor/state/tasks.json`) through
//! analysis, coding, review and supervision against the project in the
//! current directory.

use std::process::exit;

use anyhow::Result;
use clap::{Parser, Subcommand};

use conductor::core::context::RunOptions;
use conductor::exit_codes;
use conductor::logging;
use conductor::looping::{LoopOutcome, LoopStop};
use conductor::start::{self, ConductorPaths};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Dependency-aware multi-agent change pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed `.conductor/state/tasks.json` from `.conductor/seed.json`.
    Init,
    /// Run the task queue until it completes, pauses or hits a ceiling.
    Run {
        /// Continue a previously started run.
        #[arg(long)]
        resume: bool,
        /// Walk the queue without model calls, commits or file changes.
        #[arg(long)]
        dry_run: bool,
        /// Run only this task id.
        #[arg(long)]
        task: Option<String>,
        /// Token budget for this run. 0 disables the ceiling.
        #[arg(long)]
        budget: Option<u64>,
        /// Model-call limit for this run. 0 disables the ceiling.
        #[arg(long)]
        call_limit: Option<u64>,
        /// Cap on dynamically generated tasks.
        #[arg(long)]
        max_dynamic_tasks: Option<u32>,
    },
    /// Print per-status task counts from the snapshot.
    Status,
    /// Flip failed tasks back to pending with a fresh retry budget.
    ResetFailed,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            exit(exit_codes::INVALID);
        }
    }
}

fn dispatch(cli: Cli) -> Result<i32> {
    let paths = ConductorPaths::new(std::env::current_dir()?);
    match cli.command {
        Command::Init => {
            let count = start::init(&paths)?;
            println!("seeded {count} tasks");
            Ok(exit_codes::OK)
        }
        Command::Run {
            resume,
            dry_run,
            task,
            budget,
            call_limit,
            max_dynamic_tasks,
        } => {
            let defaults = RunOptions::default();
            let options = RunOptions {
                dry_run,
                only_task: task,
                budget_limit: budget.unwrap_or(defaults.budget_limit),
                call_limit: call_limit.unwrap_or(defaults.call_limit),
                max_dynamic_tasks: max_dynamic_tasks.unwrap_or(defaults.max_dynamic_tasks),
            };
            let outcome = start::run(&paths, options, resume)?;
            report(&outcome);
            Ok(stop_code(outcome.stop))
        }
        Command::Status => {
            let counts = start::status(&paths)?;
            println!("{counts}");
            Ok(exit_codes::OK)
        }
        Command::ResetFailed => {
            let count = start::reset_failed(&paths)?;
            println!("reset {count} failed tasks");
            Ok(exit_codes::OK)
        }
    }
}

fn report(outcome: &LoopOutcome) {
    let reason = match outcome.stop {
        LoopStop::Complete => "complete",
        LoopStop::BudgetExhausted => "token budget exhausted",
        LoopStop::CallLimitReached => "call limit reached",
        LoopStop::Paused => "paused awaiting guidance",
        LoopStop::Stalled => "stalled",
    };
    println!(
        "{reason}: {} (tokens {}, calls {})",
        outcome.counts, outcome.tokens_used, outcome.calls_made
    );
}

fn stop_code(stop: LoopStop) -> i32 {
    match stop {
        LoopStop::Complete => exit_codes::OK,
        LoopStop::Paused => exit_codes::PAUSED,
        LoopStop::Stalled => exit_codes::STALLED,
        LoopStop::BudgetExhausted | LoopStop::CallLimitReached => exit_codes::LIMIT,
    }
}
