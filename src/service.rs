//! Interceptor service: hands out settings and collects reports
//!
//! The service runs on its own tokio runtime so the orchestrator can stay
//! synchronous while it waits for the build. Every connection is served
//! by an independent task. Reports are funneled through a bounded channel
//! into a single aggregator; a report is acknowledged only after it sits
//! in that channel, so once the build has exited every acknowledged
//! report is collected by [`InterceptorServer::finish`].

use crate::error::{InterceptError, Result};
use crate::protocol::{decode_line, encode_line, InterceptedCommand, Request, Response, Status};
use crate::settings::InterceptSettings;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reports that may wait in the channel before reporters block
const REPORT_QUEUE_DEPTH: usize = 1;

/// State shared by all connection tasks
#[derive(Debug)]
struct ServiceState {
    settings: InterceptSettings,
    reports: mpsc::Sender<InterceptedCommand>,
    settings_requests: AtomicU64,
    reports_received: AtomicU64,
}

impl ServiceState {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::GetInterceptSettings => {
                self.settings_requests.fetch_add(1, Ordering::Relaxed);
                Response::Settings(self.settings.clone())
            }
            Request::ReportInterceptedCommand { command } => {
                debug!("Report: {:?}", command.replaced_arguments);
                match self.reports.send(command).await {
                    Ok(()) => Response::Status(Status {
                        received: self.reports_received.fetch_add(1, Ordering::SeqCst) + 1,
                    }),
                    Err(_) => {
                        warn!("Report arrived after aggregation closed; dropping it");
                        Response::Error("interceptor service is shutting down".to_string())
                    }
                }
            }
        }
    }
}

/// Counters reported when the service stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub settings_requests: u64,
    pub reports_received: u64,
}

/// Everything the service collected during one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Collected {
    /// Reports in arrival order
    pub reports: Vec<InterceptedCommand>,
    pub stats: ServiceStats,
}

/// Running interceptor service bound to a TCP address
pub struct InterceptorServer {
    runtime: tokio::runtime::Runtime,
    local_addr: SocketAddr,
    state: Arc<ServiceState>,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    aggregator: JoinHandle<Vec<InterceptedCommand>>,
}

impl InterceptorServer {
    /// Bind `addr` and start serving `settings`
    ///
    /// # Errors
    /// Failing to bind is fatal: intercepted compilers would have nothing
    /// to talk to.
    pub fn start(addr: &str, settings: InterceptSettings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_io()
            .thread_name("intercept-service")
            .build()?;

        let listener = runtime
            .block_on(TcpListener::bind(addr))
            .map_err(|source| InterceptError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let (report_tx, report_rx) = mpsc::channel(REPORT_QUEUE_DEPTH);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let state = Arc::new(ServiceState {
            settings,
            reports: report_tx,
            settings_requests: AtomicU64::new(0),
            reports_received: AtomicU64::new(0),
        });

        let aggregator = runtime.spawn(aggregate(report_rx, shutdown_rx.clone()));
        let accept_task = runtime.spawn(accept_loop(listener, Arc::clone(&state), shutdown_rx));

        info!("Interceptor service listening on {}", local_addr);

        Ok(Self {
            runtime,
            local_addr,
            state,
            shutdown,
            accept_task,
            aggregator,
        })
    }

    /// Address the service actually listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            settings_requests: self.state.settings_requests.load(Ordering::Relaxed),
            reports_received: self.state.reports_received.load(Ordering::SeqCst),
        }
    }

    /// Stop accepting, drain the report channel and return what arrived
    pub fn finish(self) -> Result<Collected> {
        let stats = self.stats();
        let Self {
            runtime,
            shutdown,
            accept_task,
            aggregator,
            ..
        } = self;
        let _ = shutdown.send(true);

        let reports = runtime
            .block_on(async move {
                if let Err(e) = accept_task.await {
                    warn!("Accept loop ended abnormally: {}", e);
                }
                aggregator.await
            })
            .map_err(|e| InterceptError::Protocol(format!("aggregator failed: {}", e)))?;

        info!(
            "Interceptor service stopped: {} settings requests, {} reports, {} collected",
            stats.settings_requests,
            stats.reports_received,
            reports.len()
        );

        runtime.shutdown_background();
        Ok(Collected { reports, stats })
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServiceState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Connection from {}", peer);
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, state).await {
                            warn!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => warn!("Accept error: {}", e),
            },
            _ = shutdown.changed() => break,
        }
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<ServiceState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("Received request: {}", line);

        let response = match decode_line::<Request>(&line) {
            Ok(request) => state.handle(request).await,
            Err(e) => {
                warn!("Malformed request: {}", e);
                Response::Error(e.to_string())
            }
        };
        writer.write_all(encode_line(&response)?.as_bytes()).await?;
    }
    Ok(())
}

/// Single consumer of the report channel
async fn aggregate(
    mut reports: mpsc::Receiver<InterceptedCommand>,
    mut shutdown: watch::Receiver<bool>,
) -> Vec<InterceptedCommand> {
    let mut collected = Vec::new();
    loop {
        tokio::select! {
            received = reports.recv() => match received {
                Some(command) => collected.push(command),
                None => break,
            },
            _ = shutdown.changed() => {
                reports.close();
                while let Some(command) = reports.recv().await {
                    collected.push(command);
                }
                break;
            }
        }
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::InterceptorClient;
    use crate::settings::MatchingRule;

    fn settings() -> InterceptSettings {
        InterceptSettings {
            matching_rules: vec![MatchingRule {
                match_pattern: "cc".to_string(),
                replace_command: "clang".to_string(),
                add_arguments: vec!["-g".to_string()],
                remove_arguments: vec!["-O2".to_string()],
            }],
        }
    }

    fn command(file: &str) -> InterceptedCommand {
        InterceptedCommand {
            original_arguments: vec!["cc".to_string(), file.to_string()],
            replaced_arguments: vec!["clang".to_string(), file.to_string()],
            directory: "/work".to_string(),
        }
    }

    #[test]
    fn test_serves_precomputed_settings() {
        let server = InterceptorServer::start("127.0.0.1:0", settings()).unwrap();
        let mut client = InterceptorClient::connect(&server.local_addr().to_string()).unwrap();
        assert_eq!(client.get_settings().unwrap(), settings());
        assert_eq!(client.get_settings().unwrap(), settings());
        assert_eq!(server.stats().settings_requests, 2);
        let collected = server.finish().unwrap();
        assert!(collected.reports.is_empty());
    }

    #[test]
    fn test_acknowledged_reports_are_collected_in_order() {
        let server = InterceptorServer::start("127.0.0.1:0", settings()).unwrap();
        let mut client = InterceptorClient::connect(&server.local_addr().to_string()).unwrap();
        for (i, file) in ["a.c", "b.c", "c.c"].iter().enumerate() {
            let status = client.report(command(file)).unwrap();
            assert_eq!(status.received, i as u64 + 1);
        }
        let collected = server.finish().unwrap();
        let files: Vec<&str> = collected
            .reports
            .iter()
            .map(|c| c.replaced_arguments[1].as_str())
            .collect();
        assert_eq!(files, vec!["a.c", "b.c", "c.c"]);
        assert_eq!(collected.stats.reports_received, 3);
    }

    #[test]
    fn test_concurrent_reporters() {
        let server = InterceptorServer::start("127.0.0.1:0", settings()).unwrap();
        let addr = server.local_addr().to_string();
        let workers: Vec<_> = (0..16)
            .map(|i| {
                let addr = addr.clone();
                std::thread::spawn(move || {
                    let mut client = InterceptorClient::connect(&addr).unwrap();
                    client.get_settings().unwrap();
                    client.report(command(&format!("f{}.c", i))).unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let collected = server.finish().unwrap();
        assert_eq!(collected.reports.len(), 16);
        assert_eq!(collected.stats.settings_requests, 16);
    }

    #[test]
    fn test_empty_report_accepted() {
        let server = InterceptorServer::start("127.0.0.1:0", settings()).unwrap();
        let mut client = InterceptorClient::connect(&server.local_addr().to_string()).unwrap();
        client.report(InterceptedCommand::default()).unwrap();
        let collected = server.finish().unwrap();
        assert_eq!(collected.reports, vec![InterceptedCommand::default()]);
    }

    #[test]
    fn test_malformed_line_keeps_connection_usable() {
        use std::io::{BufRead, BufReader, Write};
        let server = InterceptorServer::start("127.0.0.1:0", settings()).unwrap();
        let mut stream = std::net::TcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(b"not json\n{\"method\":\"get_intercept_settings\"}\n").unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut first = String::new();
        reader.read_line(&mut first).unwrap();
        assert!(first.starts_with("{\"error\""));
        let mut second = String::new();
        reader.read_line(&mut second).unwrap();
        assert!(second.starts_with("{\"settings\""));
        drop(stream);
        server.finish().unwrap();
    }

    #[test]
    fn test_address_in_use_is_bind_error() {
        let server = InterceptorServer::start("127.0.0.1:0", settings()).unwrap();
        let addr = server.local_addr().to_string();
        let result = InterceptorServer::start(&addr, settings());
        assert!(matches!(result, Err(InterceptError::Bind { .. })));
        server.finish().unwrap();
    }
}
