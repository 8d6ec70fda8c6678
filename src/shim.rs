//! Shim mode: intercept one compiler invocation explicitly
//!
//! Does for a single command what the preload library does for every
//! exec of a build: pull the settings, rewrite the command, report it,
//! then replace the current process with the rewritten command. Builds
//! that cannot use `LD_PRELOAD` call `intercept --shim -- cc ...`
//! instead of the compiler.

use crate::client::InterceptorClient;
use crate::error::{InterceptError, Result};
use crate::protocol::InterceptedCommand;
use crate::rewrite::Rewriter;
use std::convert::Infallible;
use std::os::unix::process::CommandExt;
use std::process::Command;
use tracing::{debug, warn};

/// Decide what to run for `argv`, reporting it when a rule matched
///
/// Returns the command line to execute: the rewritten one when a rule
/// matched, `argv` unchanged otherwise.
pub fn intercept(
    client: &mut InterceptorClient,
    argv: &[String],
    directory: &str,
) -> Result<Vec<String>> {
    let settings = client.get_settings()?;
    let rewriter = Rewriter::new(&settings)?;

    let Some(replaced) = rewriter.rewrite(argv) else {
        debug!("No matching rule for {:?}", argv.first());
        return Ok(argv.to_vec());
    };

    client.report(InterceptedCommand {
        original_arguments: argv.to_vec(),
        replaced_arguments: replaced.clone(),
        directory: directory.to_string(),
    })?;
    Ok(replaced)
}

/// Intercept `argv` through the service named by `REPORT_URL`, then exec
///
/// Service failures never stop the build: the original command runs.
/// Only returns if exec itself fails.
pub fn run(argv: &[String]) -> Result<Infallible> {
    if argv.is_empty() {
        return Err(InterceptError::Protocol("shim needs a command to run".to_string()));
    }

    let directory = std::env::current_dir()?.to_string_lossy().into_owned();
    let command = match InterceptorClient::from_env()
        .and_then(|mut client| intercept(&mut client, argv, &directory))
    {
        Ok(command) => command,
        Err(e) => {
            warn!("Interception failed, running original command: {}", e);
            argv.to_vec()
        }
    };

    let source = Command::new(&command[0]).args(&command[1..]).exec();
    Err(InterceptError::BuildSpawn {
        command: command.join(" "),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::InterceptorServer;
    use crate::settings::{InterceptSettings, MatchingRule};

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn start() -> InterceptorServer {
        InterceptorServer::start(
            "127.0.0.1:0",
            InterceptSettings {
                matching_rules: vec![MatchingRule {
                    match_pattern: "cc".to_string(),
                    replace_command: "echo".to_string(),
                    add_arguments: args(&["-g"]),
                    remove_arguments: args(&["-O2"]),
                }],
            },
        )
        .unwrap()
    }

    #[test]
    fn test_matching_command_is_rewritten_and_reported() {
        let server = start();
        let mut client = InterceptorClient::connect(&server.local_addr().to_string()).unwrap();
        let argv = args(&["cc", "-O2", "hello.c", "-o", "hello.o"]);
        let command = intercept(&mut client, &argv, "/build").unwrap();
        assert_eq!(command, args(&["echo", "hello.c", "-o", "hello.o", "-g"]));

        let collected = server.finish().unwrap();
        assert_eq!(
            collected.reports,
            vec![InterceptedCommand {
                original_arguments: argv,
                replaced_arguments: command,
                directory: "/build".to_string(),
            }]
        );
    }

    #[test]
    fn test_unmatched_command_passes_through_unreported() {
        let server = start();
        let mut client = InterceptorClient::connect(&server.local_addr().to_string()).unwrap();
        let argv = args(&["make", "all"]);
        assert_eq!(intercept(&mut client, &argv, "/build").unwrap(), argv);
        assert!(server.finish().unwrap().reports.is_empty());
    }

    #[test]
    fn test_run_without_command_fails() {
        assert!(run(&[]).is_err());
    }
}
