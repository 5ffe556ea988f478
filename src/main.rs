//! ATS session CLI
//!
//! Entry point for the `ats-session` command-line tool.

use ats_protocol::{NewMultiCommandRequest, SessionRequest};
use ats_session::config::{default_host_config_path, merge_into, EffectiveConfig};
use ats_session::job::{command_id, command_id_of_line};
use ats_session::orchestrator::find_xts_archive;
use ats_session::summary::RequestSummary;
use ats_session::RequestDetail;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ats-session")]
#[command(about = "Session coordinator for multi-command xTS requests", version)]
struct Cli {
    /// Explicit config file, merged over ~/.config/ats/session.toml
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Override a config key, e.g. `--set mount.command=fuse-zip` (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a request and show what each command resolves to
    Validate {
        /// Request file: a session envelope or a bare multi-command request
        request: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the stable id of a command line
    CommandId {
        command_line: String,

        /// Command line of the attempt being retried
        #[arg(long)]
        previous: Option<String>,
    },

    /// Summarize a published request snapshot
    Show {
        /// Path to request_detail.json
        snapshot: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration and its sources
    Config,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate { request, json } => run_validate(&request, json),
        Commands::CommandId {
            command_line,
            previous,
        } => {
            println!("{}", command_id_of_line(previous.as_deref().unwrap_or(&command_line)));
        }
        Commands::Show { snapshot, json } => run_show(&snapshot, json),
        Commands::Config => run_config(cli.config.as_deref(), &cli.overrides),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Validation result of one command
#[derive(Serialize)]
struct CommandReport {
    command_line: String,
    command_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_plan: Option<String>,
    modules: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shard_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ValidationReport {
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive: Option<PathBuf>,
    commands: Vec<CommandReport>,
}

fn run_validate(path: &Path, json: bool) {
    let request = match load_request(path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error reading request: {}", e);
            process::exit(1);
        }
    };

    let archive = find_xts_archive(&request);
    let commands: Vec<CommandReport> = request
        .commands
        .iter()
        .map(|info| {
            let mut report = CommandReport {
                command_line: info.command_line.clone(),
                command_id: command_id(&request, info),
                test_plan: None,
                modules: Vec::new(),
                shard_count: None,
                error: None,
            };
            match ats_cmdline::parse(&info.command_line) {
                Ok(parsed) => {
                    report.test_plan = Some(parsed.test_plan);
                    report.modules = parsed.modules;
                    report.shard_count = Some(info.shard_count)
                        .filter(|n| *n > 0)
                        .or(parsed.shard_count);
                }
                Err(e) => report.error = Some(e.to_string()),
            }
            report
        })
        .collect();

    let valid = archive.is_some()
        && !commands.is_empty()
        && commands.iter().all(|c| c.error.is_none());
    let report = ValidationReport {
        valid,
        archive,
        commands,
    };

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        print_validation(&report);
    }

    if !report.valid {
        process::exit(1);
    }
}

fn print_validation(report: &ValidationReport) {
    match &report.archive {
        Some(path) => println!("Archive: {}", path.display()),
        None => println!("Archive: none (COMMAND_NOT_AVAILABLE)"),
    }
    if report.commands.is_empty() {
        println!("No commands");
    }
    for command in &report.commands {
        println!();
        println!("  {}", command.command_line);
        println!("    id: {}", command.command_id);
        match &command.error {
            Some(e) => println!("    invalid: {}", e),
            None => {
                if let Some(plan) = &command.test_plan {
                    println!("    plan: {}", plan);
                }
                if !command.modules.is_empty() {
                    println!("    modules: {}", command.modules.join(", "));
                }
                if let Some(shards) = command.shard_count {
                    println!("    shards: {}", shards);
                }
            }
        }
    }
    println!();
    println!("{}", if report.valid { "Request valid" } else { "Request invalid" });
}

/// Read a session envelope, falling back to a bare request.
fn load_request(path: &Path) -> Result<NewMultiCommandRequest, String> {
    let json = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    match SessionRequest::from_json(&json) {
        Ok(envelope) => envelope
            .as_new_multi_command()
            .cloned()
            .ok_or_else(|| "unsupported request kind".to_string()),
        Err(envelope_error) => serde_json::from_str(&json)
            .map_err(|_| format!("not a session request: {}", envelope_error)),
    }
}

fn run_show(path: &Path, json: bool) {
    let detail = match RequestDetail::from_file(path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error reading snapshot {}: {}", path.display(), e);
            process::exit(1);
        }
    };
    let summary = RequestSummary::from_detail(&detail);

    if json {
        match summary.to_json() {
            Ok(out) => println!("{}", out),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                process::exit(1);
            }
        }
    } else {
        println!("{}", summary.render());
    }
    process::exit(summary.exit_code);
}

fn run_config(config_path: Option<&Path>, overrides: &[String]) {
    let overrides = match parse_overrides(overrides) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Invalid override: {}", e);
            process::exit(1);
        }
    };
    let host = default_host_config_path();
    let effective = match EffectiveConfig::build(host.as_deref(), config_path, overrides) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            process::exit(1);
        }
    };
    match effective.to_json() {
        Ok(out) => println!("{}", out),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

/// Turn `a.b=value` pairs into a nested JSON object. Values that parse as
/// JSON keep their type; anything else is a string.
fn parse_overrides(pairs: &[String]) -> Result<Option<Value>, String> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut root = Value::Object(Map::new());
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        let mut parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
        let leaf = parts.pop().ok_or_else(|| format!("empty key in {:?}", pair))?;
        let mut nested = Map::new();
        nested.insert(leaf.to_string(), value);
        for part in parts.into_iter().rev() {
            let mut outer = Map::new();
            outer.insert(part.to_string(), Value::Object(nested));
            nested = outer;
        }
        merge_into(&mut root, Value::Object(nested));
    }
    Ok(Some(root))
}
