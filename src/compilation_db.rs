//! Compilation database (`compile_commands.json`) construction

use crate::classify::classify;
use crate::error::{InterceptError, Result};
use crate::protocol::InterceptedCommand;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default file name of the compilation database
pub const DEFAULT_DATABASE_PATH: &str = "compile_commands.json";

/// One compilation database entry, one per source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationCommand {
    pub arguments: Vec<String>,
    pub directory: String,
    pub output: String,
    pub file: String,
}

/// Expand reports into per-source-file entries
///
/// Entries keep report arrival order, then input order within a report.
/// Reports without source inputs contribute nothing.
pub fn build(reports: &[InterceptedCommand]) -> Vec<CompilationCommand> {
    reports
        .iter()
        .flat_map(|report| {
            let command_line = classify(&report.replaced_arguments);
            command_line
                .input_files
                .into_iter()
                .map(move |file| CompilationCommand {
                    arguments: report.replaced_arguments.clone(),
                    directory: report.directory.clone(),
                    output: command_line.output_file.clone(),
                    file,
                })
        })
        .collect()
}

/// Serialize entries as a JSON array indented with four spaces
pub fn to_json(commands: &[CompilationCommand]) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    commands.serialize(&mut serializer)?;
    buf.push(b'\n');
    String::from_utf8(buf).map_err(<serde_json::Error as serde::ser::Error>::custom)
}

/// Write the database to `path`, replacing any existing file
pub fn write<P: AsRef<Path>>(path: P, commands: &[CompilationCommand]) -> Result<()> {
    let path = path.as_ref();
    let json = to_json(commands).map_err(|e| InterceptError::Database {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    fs::write(path, json).map_err(|e| InterceptError::Database {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Read a database back, mainly for tooling and tests
pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<CompilationCommand>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| InterceptError::Database {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
