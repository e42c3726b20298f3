//! CLI inspection entry point.
//!
//! # Responsibility
//! - Load one model file with the built-in kinds and print load diagnostics.
//! - Keep output deterministic `key=value` lines for quick sanity checks.

use clap::Parser;
use log::error;
use modelgraph_core::{
    core_version, init_logging, open_model, IdOrder, LoadOptions, LoadSummary, LogConfig,
    ObjectRegistry, ScopeFilter,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// Load a model file and print its load summary
#[derive(Parser, Debug)]
#[command(name = "modelgraph_cli")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Absolute directory for rolling log files; logging stays off without it
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Read streams newer than the supported format version
    #[arg(long)]
    force: bool,

    /// Model file to inspect
    model_file: PathBuf,
}

fn print_summary(registry: &ObjectRegistry, summary: &LoadSummary) {
    println!("core_version={}", core_version());
    println!("model_id={}", registry.model_id());
    println!("format_version={}", summary.format_version);
    println!("records_read={}", summary.records_read);
    println!("objects_created={}", summary.objects_created);
    println!("objects_merged={}", summary.objects_merged);
    println!("remapped_ids={}", summary.remapped_ids.len());
    println!("dangling_references={}", summary.dangling_references);
    println!("unknown_keywords={}", summary.unknown_keyword_count());
    println!("unknown_record_types={}", summary.unknown_record_count());
    println!("malformed_lines={}", summary.malformed_lines);
    println!("hook_failures={}", summary.hook_failures);
    println!("unresolved_scopes={}", summary.unresolved_scopes);
    for tag in registry.kinds().tags() {
        let count = registry
            .all_of_type(tag.as_str(), &ScopeFilter::Any, IdOrder::Insertion)
            .len();
        if count > 0 {
            println!("objects.{tag}={count}");
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir {
        let config = LogConfig {
            log_dir,
            ..LogConfig::default()
        };
        if let Err(err) = init_logging(&config) {
            eprintln!("logging disabled: {err}");
        }
    }

    let mut registry = ObjectRegistry::with_builtin_kinds();
    let options = LoadOptions {
        force_version: cli.force,
        ..LoadOptions::default()
    };
    match open_model(&mut registry, &cli.model_file, &options) {
        Ok(summary) => {
            print_summary(&registry, &summary);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("event=cli_inspect module=cli status=error error={}", err);
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
