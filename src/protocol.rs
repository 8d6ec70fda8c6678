//! Wire protocol between intercepted compilers and the interceptor service
//!
//! JSON lines over TCP: every request and every response is a single JSON
//! object terminated by `\n`. A connection may carry several requests.
//!
//! ```text
//! -> {"method":"get_intercept_settings"}
//! <- {"settings":{"matching_rules":[...]}}
//! -> {"method":"report_intercepted_command","command":{...}}
//! <- {"status":{"received":1}}
//! ```

use crate::error::{InterceptError, Result};
use crate::settings::InterceptSettings;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Environment variable carrying the service address to intercepted processes
pub const REPORT_URL_ENV: &str = "REPORT_URL";

/// Default listening address of the service
pub const DEFAULT_SERVER_ADDR: &str = "127.0.0.1:6774";

/// What an intercepted process actually executed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptedCommand {
    #[serde(default)]
    pub original_arguments: Vec<String>,
    #[serde(default)]
    pub replaced_arguments: Vec<String>,
    #[serde(default)]
    pub directory: String,
}

/// Acknowledgement of a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Reports accepted by the service so far, this one included
    pub received: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Request {
    GetInterceptSettings,
    ReportInterceptedCommand { command: InterceptedCommand },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Settings(InterceptSettings),
    Status(Status),
    Error(String),
}

/// Encode a message as one protocol line, newline included
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line =
        serde_json::to_string(message).map_err(|e| InterceptError::Protocol(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decode one protocol line; surrounding whitespace is ignored
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T> {
    serde_json::from_str(line.trim()).map_err(|e| InterceptError::Protocol(e.to_string()))
}
