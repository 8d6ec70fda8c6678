//! Blocking client for the interceptor protocol
//!
//! Intercepted compiler processes are short-lived, so the client is a
//! plain blocking TCP connection without an async runtime.

use crate::error::{InterceptError, Result};
use crate::protocol::{
    decode_line, encode_line, InterceptedCommand, Request, Response, Status, REPORT_URL_ENV,
};
use crate::settings::InterceptSettings;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

/// Connection to a running interceptor service
#[derive(Debug)]
pub struct InterceptorClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl InterceptorClient {
    pub fn connect(addr: &str) -> Result<Self> {
        let writer = TcpStream::connect(addr)?;
        writer.set_nodelay(true)?;
        let reader = BufReader::new(writer.try_clone()?);
        Ok(Self { reader, writer })
    }

    /// Connect to the address exported in `REPORT_URL`
    pub fn from_env() -> Result<Self> {
        let addr = std::env::var(REPORT_URL_ENV)
            .map_err(|_| InterceptError::Protocol(format!("{} is not set", REPORT_URL_ENV)))?;
        Self::connect(&addr)
    }

    pub fn get_settings(&mut self) -> Result<InterceptSettings> {
        match self.call(&Request::GetInterceptSettings)? {
            Response::Settings(settings) => Ok(settings),
            other => Err(unexpected(other)),
        }
    }

    /// Report a command; returns once the service has queued it
    pub fn report(&mut self, command: InterceptedCommand) -> Result<Status> {
        match self.call(&Request::ReportInterceptedCommand { command })? {
            Response::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    fn call(&mut self, request: &Request) -> Result<Response> {
        self.writer.write_all(encode_line(request)?.as_bytes())?;
        self.writer.flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(InterceptError::Protocol(
                "connection closed before response".to_string(),
            ));
        }
        decode_line(&line)
    }
}

fn unexpected(response: Response) -> InterceptError {
    match response {
        Response::Error(message) => InterceptError::Protocol(message),
        other => InterceptError::Protocol(format!("unexpected response: {:?}", other)),
    }
}
