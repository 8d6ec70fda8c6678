//! CLI argument parsing for the interceptor

use crate::config::DEFAULT_SANITIZER;
use crate::protocol::DEFAULT_SERVER_ADDR;
use crate::settings::CliOverrides;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "intercept")]
#[command(version)]
#[command(
    about = "Run a build with every compiler call rewritten and recorded",
    long_about = None
)]
pub struct Cli {
    /// Write a compilation database after a successful build
    #[arg(long = "create-compiler-db", alias = "create_compiler_db")]
    pub create_compiler_db: bool,

    /// Path of the compilation database
    #[arg(long, value_name = "PATH", default_value = "compile_commands.json")]
    pub output: PathBuf,

    /// TOML file overriding or extending the built-in fuzzer profiles
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Override the C compiler match pattern
    #[arg(long = "match-cc", alias = "match_cc", value_name = "REGEX")]
    pub match_cc: Option<String>,

    /// Override the C++ compiler match pattern
    #[arg(long = "match-cxx", alias = "match_cxx", value_name = "REGEX")]
    pub match_cxx: Option<String>,

    /// The command to replace the C compiler with
    #[arg(long = "replace-cc", alias = "replace_cc", value_name = "CMD")]
    pub replace_cc: Option<String>,

    /// The command to replace the C++ compiler with
    #[arg(long = "replace-cxx", alias = "replace_cxx", value_name = "CMD")]
    pub replace_cxx: Option<String>,

    /// Fuzzer profile to build for (e.g. libfuzzer, afl, llvm-cov)
    #[arg(long, env = "CI_FUZZER", value_name = "NAME")]
    pub fuzzer: Option<String>,

    /// Sanitizer profile of the selected fuzzer (default: address)
    #[arg(long, env = "CI_SANITIZER", value_name = "NAME")]
    pub sanitizer: Option<String>,

    /// Address the interceptor service listens on
    #[arg(long, value_name = "ADDR", default_value = DEFAULT_SERVER_ADDR)]
    pub listen: String,

    /// Preload shim library injected into the build
    #[arg(long = "preload-lib", env = "INTERCEPT_PRELOAD_LIB", value_name = "PATH")]
    pub preload_lib: Option<PathBuf>,

    /// Do not inject the preload shim (for builds calling `--shim` themselves)
    #[arg(long = "no-preload")]
    pub no_preload: bool,

    /// Print the resolved intercept settings as JSON and exit
    #[arg(long = "print-settings")]
    pub print_settings: bool,

    /// Act as the shim for a single compiler invocation
    #[arg(long, hide = true)]
    pub shim: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Build command to run (everything after --)
    #[arg(last = true)]
    pub command: Option<Vec<String>>,
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            match_cc: self.match_cc.clone(),
            match_cxx: self.match_cxx.clone(),
            replace_cc: self.replace_cc.clone(),
            replace_cxx: self.replace_cxx.clone(),
        }
    }

    /// Sanitizer to apply; defaults to address once a fuzzer is selected
    pub fn effective_sanitizer(&self) -> Option<&str> {
        match (self.fuzzer.as_deref(), self.sanitizer.as_deref()) {
            (_, Some(sanitizer)) if !sanitizer.is_empty() => Some(sanitizer),
            (Some(fuzzer), _) if !fuzzer.is_empty() => Some(DEFAULT_SANITIZER),
            _ => None,
        }
    }
}
