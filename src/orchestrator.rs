//! Running one build under interception
//!
//! Starts the service with the resolved settings, spawns the build with
//! the shim injected through the environment, waits for it and turns the
//! collected reports into a compilation database on request.

use crate::compilation_db::{self, CompilationCommand};
use crate::error::{InterceptError, Result};
use crate::protocol::{InterceptedCommand, REPORT_URL_ENV};
use crate::rewrite::Rewriter;
use crate::service::InterceptorServer;
use crate::settings::{EnvChange, Resolution};
use nix::sys::signal::Signal;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use tracing::{debug, info, warn};

/// File name of the preload shim looked up next to the executable
pub const PRELOAD_LIBRARY_NAME: &str = "libintercept_preload.so";

/// Dynamic linker preload variable
pub const PRELOAD_ENV: &str = "LD_PRELOAD";

/// Everything needed to run one intercepted build
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// Build command and its arguments
    pub command: Vec<String>,
    /// Service listening address; port 0 picks a free port
    pub listen: String,
    /// Shim library to preload, `None` to run without preloading
    pub preload: Option<PathBuf>,
    /// Database path, `None` to skip database emission
    pub database: Option<PathBuf>,
}

/// Result of a successful build
#[derive(Debug, Clone, Default)]
pub struct BuildOutcome {
    pub reports: Vec<InterceptedCommand>,
    pub database: Option<Vec<CompilationCommand>>,
}

/// Find the preload shim
///
/// An explicit path must exist; otherwise the library is expected next
/// to the running executable.
pub fn locate_preload_library(explicit: Option<&Path>) -> Result<PathBuf> {
    let candidate = match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::current_exe()?
            .parent()
            .map(|dir| dir.join(PRELOAD_LIBRARY_NAME))
            .unwrap_or_else(|| PathBuf::from(PRELOAD_LIBRARY_NAME)),
    };

    if candidate.is_file() {
        Ok(candidate)
    } else {
        Err(InterceptError::PreloadLibraryNotFound(
            candidate.display().to_string(),
        ))
    }
}

/// Apply the resolver's environment requests to the build command
pub fn apply_env_changes(command: &mut Command, changes: &[EnvChange]) {
    for change in changes {
        match change {
            EnvChange::Set(name) => {
                debug!("Setting {}=1 for the build", name);
                command.env(name, "1");
            }
            EnvChange::Unset(name) => {
                debug!("Unsetting {} for the build", name);
                command.env_remove(name);
            }
        }
    }
}

fn preload_value(library: &Path) -> String {
    match std::env::var(PRELOAD_ENV) {
        Ok(existing) if !existing.is_empty() => format!("{}:{}", library.display(), existing),
        _ => library.display().to_string(),
    }
}

/// Exit code of the build; signals map to 128 + signal number
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    match status.signal() {
        Some(sig) => {
            match Signal::try_from(sig) {
                Ok(signal) => warn!("Build killed by signal: {:?}", signal),
                Err(_) => warn!("Build killed by signal {}", sig),
            }
            128 + sig
        }
        None => 1,
    }
}

/// Run `plan` with the settings of `resolution`
///
/// # Errors
/// Invalid match patterns, a busy listening address, a build that cannot
/// be started or exits non-zero, and a database that cannot be written
/// are all fatal. A failed build never writes a database.
pub fn run_build(plan: &BuildPlan, resolution: &Resolution) -> Result<BuildOutcome> {
    let (program, args) = plan
        .command
        .split_first()
        .ok_or_else(|| InterceptError::BuildSpawn {
            command: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty build command"),
        })?;

    // Patterns are validated here so that a typo fails the run, not every compiler call
    Rewriter::new(&resolution.settings)?;

    let server = InterceptorServer::start(&plan.listen, resolution.settings.clone())?;

    let mut command = Command::new(program);
    command
        .args(args)
        .env(REPORT_URL_ENV, server.local_addr().to_string());
    if let Some(library) = &plan.preload {
        command.env(PRELOAD_ENV, preload_value(library));
    }
    apply_env_changes(&mut command, &resolution.env_changes);

    info!("Running build: {}", plan.command.join(" "));
    let status = command.status().map_err(|source| InterceptError::BuildSpawn {
        command: plan.command.join(" "),
        source,
    })?;

    let collected = server.finish()?;
    debug!("Collected {} intercepted commands", collected.reports.len());

    if !status.success() {
        return Err(InterceptError::BuildFailed(exit_code(status)));
    }

    let database = match &plan.database {
        Some(path) => {
            let commands = compilation_db::build(&collected.reports);
            compilation_db::write(path, &commands)?;
            info!(
                "Wrote {} compilation commands to {}",
                commands.len(),
                path.display()
            );
            Some(commands)
        }
        None => None,
    };

    Ok(BuildOutcome {
        reports: collected.reports,
        database,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::InterceptSettings;
    use serial_test::serial;
    use tempfile::TempDir;

    fn plan(script: &str) -> BuildPlan {
        BuildPlan {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            listen: "127.0.0.1:0".to_string(),
            preload: None,
            database: None,
        }
    }

    fn resolution(env_changes: Vec<EnvChange>) -> Resolution {
        Resolution {
            settings: InterceptSettings::default(),
            env_changes,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_successful_build_without_reports() {
        let outcome = run_build(&plan("true"), &resolution(vec![])).unwrap();
        assert!(outcome.reports.is_empty());
        assert!(outcome.database.is_none());
    }

    #[test]
    fn test_failed_build_reports_exit_code_and_skips_database() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("compile_commands.json");
        let mut failing = plan("exit 3");
        failing.database = Some(db.clone());
        let err = run_build(&failing, &resolution(vec![])).unwrap_err();
        assert!(matches!(err, InterceptError::BuildFailed(3)));
        assert!(!db.exists());
    }

    #[test]
    fn test_report_url_exported() {
        run_build(&plan("test -n \"$REPORT_URL\""), &resolution(vec![])).unwrap();
    }

    #[test]
    fn test_preload_exported() {
        let mut with_preload = plan("case \"$LD_PRELOAD\" in /tmp/shim.so*) exit 0;; *) exit 1;; esac");
        with_preload.preload = Some(PathBuf::from("/tmp/shim.so"));
        run_build(&with_preload, &resolution(vec![])).unwrap();
    }

    #[test]
    #[serial]
    fn test_env_changes_reach_build() {
        std::env::set_var("AFL_USE_MSAN", "1");
        let changes = vec![
            EnvChange::Set("AFL_USE_ASAN".to_string()),
            EnvChange::Unset("AFL_USE_MSAN".to_string()),
        ];
        let result = run_build(
            &plan("test \"$AFL_USE_ASAN\" = 1 && test -z \"${AFL_USE_MSAN+x}\""),
            &resolution(changes),
        );
        std::env::remove_var("AFL_USE_MSAN");
        result.unwrap();
        assert!(std::env::var("AFL_USE_ASAN").is_err());
    }

    #[test]
    fn test_empty_database_written() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("compile_commands.json");
        let mut with_db = plan("true");
        with_db.database = Some(db.clone());
        let outcome = run_build(&with_db, &resolution(vec![])).unwrap();
        assert_eq!(outcome.database, Some(vec![]));
        assert_eq!(std::fs::read_to_string(&db).unwrap().trim(), "[]");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let mut missing = plan("");
        missing.command = vec!["/nonexistent/build-tool".to_string()];
        let err = run_build(&missing, &resolution(vec![])).unwrap_err();
        assert!(matches!(err, InterceptError::BuildSpawn { .. }));
    }

    #[test]
    fn test_invalid_pattern_fails_before_build() {
        let mut res = resolution(vec![]);
        res.settings.matching_rules.push(crate::settings::MatchingRule {
            match_pattern: "(".to_string(),
            replace_command: "clang".to_string(),
            add_arguments: vec![],
            remove_arguments: vec![],
        });
        let err = run_build(&plan("true"), &res).unwrap_err();
        assert!(matches!(err, InterceptError::InvalidPattern { .. }));
    }

    #[test]
    fn test_locate_preload_explicit_missing() {
        let err = locate_preload_library(Some(Path::new("/nonexistent/shim.so"))).unwrap_err();
        assert!(matches!(err, InterceptError::PreloadLibraryNotFound(_)));
    }

    #[test]
    fn test_locate_preload_explicit_present() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join(PRELOAD_LIBRARY_NAME);
        std::fs::write(&lib, b"").unwrap();
        assert_eq!(locate_preload_library(Some(&lib)).unwrap(), lib);
    }

    #[test]
    fn test_exit_code_from_signal() {
        let status = ExitStatus::from_raw(9);
        assert_eq!(exit_code(status), 137);
        let status = ExitStatus::from_raw(2 << 8);
        assert_eq!(exit_code(status), 2);
    }
}
