//! OpenPrint CLI - Bridge interface for host applications
//!
//! Commands: hooks, compile, validate, rules, snippets
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when validation finds errors

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::{fmt, EnvFilter};

use openprint_core::{
    generate_snippets, list_hooks, summarize, validate_filament, validate_pdl, validate_printer, validate_process,
    CompileRequest, FilamentProfile, Firmware, KnownHook, Pipeline, PolicyOverrides, PrinterProfile, ProcessProfile,
};

#[derive(Parser)]
#[command(name = "openprint-cli")]
#[command(about = "OpenPrint CLI - Printer Hook Compiler")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List hook names (all known hooks, or those a document defines)
    Hooks {
        /// PDL document (JSON)
        #[arg(short, long)]
        pdl: Option<PathBuf>,
    },

    /// Synthesize, map and render hooks
    Compile {
        #[arg(short, long)]
        pdl: PathBuf,

        /// Placeholder variables (JSON object)
        #[arg(long)]
        vars: Option<PathBuf>,

        /// Override the document's firmware
        #[arg(short, long)]
        firmware: Option<String>,

        /// Policy overrides (JSON)
        #[arg(long)]
        policies: Option<PathBuf>,

        /// Compile even when validation reports errors
        #[arg(long)]
        allow_errors: bool,
    },

    /// Validate a PDL document
    Validate {
        #[arg(short, long)]
        pdl: PathBuf,
    },

    /// Validate printer/filament/process profiles
    Rules {
        #[arg(long)]
        printer: Option<PathBuf>,

        #[arg(long)]
        filament: Option<PathBuf>,

        #[arg(long)]
        process: Option<PathBuf>,
    },

    /// Print start/end G-code snippets
    Snippets {
        #[arg(short, long)]
        pdl: PathBuf,

        #[arg(short, long)]
        firmware: Option<String>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("Invalid JSON in {}: {}", path.display(), e))
}

fn emit<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(text) => {
            println!("{}", text);
            true
        }
        Err(e) => {
            eprintln!("failed to serialize output: {}", e);
            false
        }
    }
}

fn fail(error: impl std::fmt::Display) -> ExitCode {
    println!("{}", serde_json::json!({"success": false, "error": error.to_string()}));
    ExitCode::FAILURE
}

fn finish(value: &impl Serialize, has_errors: bool) -> ExitCode {
    if !emit(value) {
        ExitCode::FAILURE
    } else if has_errors {
        ExitCode::from(2) // Validation failure
    } else {
        ExitCode::SUCCESS
    }
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Hooks { pdl } => {
            let names: Vec<String> = match pdl {
                Some(path) => match Pipeline::parse_document_file(&path) {
                    Ok(doc) => list_hooks(&doc.gcode),
                    Err(e) => return fail(e),
                },
                None => KnownHook::ALL.iter().map(|h| h.as_str().to_string()).collect(),
            };
            finish(&serde_json::json!({"hooks": names}), false)
        }

        Commands::Compile { pdl, vars, firmware, policies, allow_errors } => {
            let doc = match Pipeline::parse_document_file(&pdl) {
                Ok(doc) => doc,
                Err(e) => return fail(e),
            };
            let vars = match vars.as_deref().map(read_json::<serde_json::Value>).transpose() {
                Ok(v) => v,
                Err(e) => return fail(e),
            };
            let policy_overrides = match policies.as_deref().map(read_json::<PolicyOverrides>).transpose() {
                Ok(p) => p,
                Err(e) => return fail(e),
            };
            let request = CompileRequest { pdl: doc, vars, firmware, policy_overrides, allow_errors };

            match Pipeline::new().compile(&request) {
                Ok(compiled) => {
                    let output = serde_json::json!({
                        "success": true,
                        "generated_at": Utc::now().to_rfc3339(),
                        "compiled": compiled,
                    });
                    finish(&output, false)
                }
                Err(e) => {
                    let output = serde_json::json!({
                        "success": false,
                        "error": e.to_string(),
                    });
                    println!("{}", output);
                    ExitCode::from(2) // Compilation failure (validation)
                }
            }
        }

        Commands::Validate { pdl } => {
            let doc = match Pipeline::parse_document_file(&pdl) {
                Ok(doc) => doc,
                Err(e) => return fail(e),
            };
            let issues = validate_pdl(&doc);
            let summary = summarize(&[issues.as_slice()]);
            debug!(total = summary.total, "validate finished");
            let output = serde_json::json!({
                "generated_at": Utc::now().to_rfc3339(),
                "issues": issues,
                "summary": summary,
            });
            finish(&output, summary.has_errors())
        }

        Commands::Rules { printer, filament, process } => {
            let printer = match printer.as_deref().map(read_json::<PrinterProfile>).transpose() {
                Ok(p) => p,
                Err(e) => return fail(e),
            };
            let filament = match filament.as_deref().map(read_json::<FilamentProfile>).transpose() {
                Ok(f) => f,
                Err(e) => return fail(e),
            };
            let process = match process.as_deref().map(read_json::<ProcessProfile>).transpose() {
                Ok(p) => p,
                Err(e) => return fail(e),
            };

            let printer_issues = printer.as_ref().map(validate_printer).unwrap_or_default();
            let filament_issues = filament.as_ref().map(validate_filament).unwrap_or_default();
            let process_issues = process
                .as_ref()
                .map(|p| validate_process(p, printer.as_ref()))
                .unwrap_or_default();
            let summary = summarize(&[printer_issues.as_slice(), filament_issues.as_slice(), process_issues.as_slice()]);

            let output = serde_json::json!({
                "generated_at": Utc::now().to_rfc3339(),
                "printer": printer_issues,
                "filament": filament_issues,
                "process": process_issues,
                "summary": summary,
            });
            finish(&output, summary.has_errors())
        }

        Commands::Snippets { pdl, firmware } => {
            let doc = match Pipeline::parse_document_file(&pdl) {
                Ok(doc) => doc,
                Err(e) => return fail(e),
            };
            let firmware = firmware.as_deref().map(Firmware::parse);
            let (start, end) = generate_snippets(&doc, firmware.as_ref());
            finish(&serde_json::json!({"start": start, "end": end}), false)
        }
    }
}
