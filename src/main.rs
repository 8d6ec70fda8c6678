use anyhow::{Context, Result};
use build_intercept::cli::Cli;
use build_intercept::config::{BaseDefaults, ConfigFile, ProfileTable, Toolchain};
use build_intercept::orchestrator::{self, BuildPlan};
use build_intercept::settings::{Resolution, Resolver};
use build_intercept::{shim, InterceptError};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Initialize tracing; warnings are always shown, `--debug` shows everything
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve the settings of this build from all configuration layers
fn resolve_settings(args: &Cli) -> Result<Resolution> {
    let toolchain = Toolchain::discover();
    let base = BaseDefaults::new(&toolchain)
        .with_compilers(std::env::var("CC").ok(), std::env::var("CXX").ok());

    let mut profiles = ProfileTable::builtin(&toolchain);
    if let Some(path) = &args.config {
        let file = ConfigFile::from_toml_file(path)?;
        profiles.apply_overlay(&file, &base);
    }

    let resolver = Resolver::new(base, profiles);
    Ok(resolver.resolve(
        &args.overrides(),
        args.fuzzer.as_deref(),
        args.effective_sanitizer(),
    ))
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    if args.shim {
        let command = args.command.unwrap_or_default();
        match shim::run(&command).context("Shim failed to exec the compiler")? {}
    }

    let resolution = resolve_settings(&args)?;

    if args.print_settings {
        println!("{}", serde_json::to_string_pretty(&resolution.settings)?);
        return Ok(());
    }

    let command = match args.command {
        Some(command) if !command.is_empty() => command,
        _ => anyhow::bail!(
            "Must specify a build command. Usage: intercept [OPTIONS] -- BUILD_COMMAND [ARGS...]"
        ),
    };

    let preload = if args.no_preload {
        None
    } else {
        Some(orchestrator::locate_preload_library(args.preload_lib.as_deref())?)
    };

    let plan = BuildPlan {
        command,
        listen: args.listen,
        preload,
        database: args.create_compiler_db.then_some(args.output),
    };

    match orchestrator::run_build(&plan, &resolution) {
        Ok(outcome) => {
            if let Some(database) = &outcome.database {
                eprintln!(
                    "[intercept: {} compilation commands from {} intercepted calls]",
                    database.len(),
                    outcome.reports.len()
                );
            }
            Ok(())
        }
        Err(InterceptError::BuildFailed(code)) => {
            eprintln!("[intercept: build command failed with exit code {}]", code);
            std::process::exit(code);
        }
        Err(e) => Err(e.into()),
    }
}
