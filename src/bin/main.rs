//! joindecl CLI - Validate and compile join declarations
//!
//! Usage:
//!   joindecl validate <paths..> [--registry <file>] [--config <file>]
//!   joindecl compile <paths..> [--out <dir>]
//!   joindecl list <file.lua>
//!
//! Examples:
//!   joindecl validate joins/ --registry registry.toml
//!   joindecl compile joins/sample_team --out compiled
//!   joindecl list joins/sample_team/sample_join.lua

use clap::{Parser, Subcommand};
use joindecl::compile::{compile_paths, write_descriptors, CompileOptions, CompileSummary};
use joindecl::config::Settings;
use joindecl::loader::{self, extract_bindings_regex};
use joindecl::registry::Registry;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "joindecl")]
#[command(about = "joindecl - Load, validate and normalize join declarations")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to JOINDECL_CONFIG, ./joindecl.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Registry TOML file, overriding the one in the settings file
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Log debug output (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate units without writing anything
    Validate {
        /// Unit files or directories of units
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Validate units and write descriptors as JSON
    Compile {
        /// Unit files or directories of units
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Output directory, overriding the settings file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List the joins declared in a unit
    List {
        /// Path to the .lua unit
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Validate { paths } => cmd_validate(&settings, cli.registry, paths),
        Commands::Compile { paths, out } => cmd_compile(&settings, cli.registry, paths, out),
        Commands::List { file } => cmd_list(file),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_registry(settings: &Settings, registry: Option<PathBuf>) -> Result<Registry, String> {
    match registry {
        Some(path) => Registry::from_file(&path)
            .map_err(|e| format!("Error loading registry '{}': {}", path.display(), e)),
        None => settings
            .load_registry()
            .map_err(|e| format!("Error loading registry: {}", e)),
    }
}

fn run(
    settings: &Settings,
    registry: Option<PathBuf>,
    paths: &[PathBuf],
) -> Result<(CompileSummary, CompileOptions), String> {
    let registry = load_registry(settings, registry)?;
    let options = CompileOptions::default()
        .with_validation(settings.validation_options())
        .with_write_invalid(settings.output.write_invalid);

    let summary = compile_paths(paths, &registry, &options).map_err(|e| e.to_string())?;
    Ok((summary, options))
}

fn print_summary(summary: &CompileSummary) {
    for (unit, error) in summary.failed_units() {
        eprintln!("FAILED {}: {}", unit, error);
    }

    for (unit, compiled) in summary.joins() {
        let status = if compiled.report.has_errors() {
            "INVALID"
        } else {
            "OK"
        };
        println!("{} {} ({})", status, compiled.name(), unit);
        for issue in &compiled.report.issues {
            println!("  {}", issue);
        }
    }
}

fn cmd_validate(settings: &Settings, registry: Option<PathBuf>, paths: Vec<PathBuf>) -> ExitCode {
    let (summary, _) = match run(settings, registry, &paths) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    print_summary(&summary);

    if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_compile(
    settings: &Settings,
    registry: Option<PathBuf>,
    paths: Vec<PathBuf>,
    out: Option<PathBuf>,
) -> ExitCode {
    let out_dir = match out.map(Ok).unwrap_or_else(|| settings.output_dir()) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error resolving output directory: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (summary, options) = match run(settings, registry, &paths) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    print_summary(&summary);

    match write_descriptors(&summary, &out_dir, &options) {
        Ok(written) => {
            println!(
                "Wrote {} descriptor(s) to {}",
                written.len(),
                out_dir.display()
            );
        }
        Err(e) => {
            eprintln!("Error writing descriptors: {}", e);
            return ExitCode::FAILURE;
        }
    }

    if summary.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_list(file: PathBuf) -> ExitCode {
    println!("File: {}", file.display());
    println!();

    match loader::load(&file) {
        Ok(declarations) => {
            if declarations.is_empty() {
                println!("No joins defined.");
                return ExitCode::SUCCESS;
            }

            println!("Joins:");
            for (binding, join) in &declarations.joins {
                let group_bys: Vec<_> = join
                    .right_parts
                    .iter()
                    .map(|p| p.group_by.name.as_str())
                    .collect();
                println!(
                    "  - {} ({} {}, online: {}, right: {})",
                    binding,
                    join.left.kind(),
                    join.left.table(),
                    join.online,
                    group_bys.join(", ")
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Load error: {}", e);

            // Still show what the unit meant to declare
            let Ok(source) = fs::read_to_string(&file) else {
                return ExitCode::FAILURE;
            };
            let bindings = extract_bindings_regex(&source);
            if !bindings.is_empty() {
                println!("Joins (unevaluated):");
                for binding in bindings {
                    println!("  - {} (line {})", binding.name, binding.line);
                }
            }
            ExitCode::FAILURE
        }
    }
}
