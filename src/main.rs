use std::sync::Arc;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::ratelimit::{
    MemoryBackend, RateLimitBackend, RateLimitGuard, RateLimiter, RedisWindowStore, SharedBackend,
};

/// Request rate limiting sidecar.
///
/// Reads one JSON request per line on stdin, e.g.
/// `{"path": "/api/demo", "ip": "10.0.0.1", "user_id": "42"}`, and writes
/// one JSON decision per line on stdout. A line that cannot be parsed is
/// answered with `{"status": 400, "error": "malformed request"}`, so replies
/// always pair up with requests in order.
#[derive(Debug, Parser)]
#[command(name = "gatekeeper", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Shared store connection string; overrides the configuration file
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Debug, Deserialize)]
struct CheckRequest {
    path: String,
    ip: String,
    #[serde(default)]
    user_id: Option<String>,
}

/// Reply written for a line that is not a valid request.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    error: &'static str,
}

impl ErrorResponse {
    const MALFORMED: Self = Self {
        status: 400,
        error: "malformed request",
    };
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries decisions.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatekeeperConfig::load(args.config.as_deref())?;
    if let Some(url) = args.redis_url {
        config.store.url = Some(url);
    }
    let rules = config.rule_table();
    info!(routes = rules.routes().len(), "Configuration loaded");

    let shared = shared_backend(&config)?;
    let limiter = Arc::new(RateLimiter::new(shared, MemoryBackend::new()));
    info!(shared_store = limiter.has_shared_store(), "Rate limiter initialized");

    let guard = RateLimitGuard::new(limiter, Arc::new(rules));

    tokio::select! {
        result = serve(&guard, BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => result?,
        _ = shutdown_signal() => {}
    }

    info!("Gatekeeper stopped");
    Ok(())
}

/// Build the shared backend, or `None` for memory-only operation.
///
/// The store is dialed lazily, so a server that is down at startup does not
/// pin the process to memory: checks fall back per call until it answers.
/// Only a URL that cannot be parsed is fatal.
fn shared_backend(config: &GatekeeperConfig) -> anyhow::Result<Option<Arc<dyn RateLimitBackend>>> {
    let Some(url) = config.store.url() else {
        info!("No shared store configured, using process memory only");
        return Ok(None);
    };

    let store = RedisWindowStore::new(url)?;
    let backend = SharedBackend::new(Arc::new(store)).with_timeout(config.store.timeout());
    Ok(Some(Arc::new(backend)))
}

/// Answer line-delimited JSON requests until the input closes.
///
/// Every input line gets exactly one output line.
async fn serve<R, W>(guard: &RateLimitGuard, reader: R, mut writer: W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let mut out = match serde_json::from_str::<CheckRequest>(&line) {
            Ok(request) => {
                let decision = guard
                    .check_request(&request.path, &request.ip, request.user_id.as_deref())
                    .await;
                serde_json::to_vec(&decision.to_response())?
            }
            Err(e) => {
                warn!(error = %e, "Malformed request line");
                serde_json::to_vec(&ErrorResponse::MALFORMED)?
            }
        };
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }

    info!("Input closed");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeeper::ratelimit::RuleTable;
    use serde_json::Value;

    fn guard() -> RateLimitGuard {
        RateLimitGuard::new(
            Arc::new(RateLimiter::memory_only()),
            Arc::new(RuleTable::builtin()),
        )
    }

    async fn run(input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        serve(&guard(), BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn header<'a>(reply: &'a Value, name: &str) -> Option<&'a str> {
        reply["headers"]
            .as_array()?
            .iter()
            .find(|pair| pair[0] == name)
            .and_then(|pair| pair[1].as_str())
    }

    #[tokio::test]
    async fn test_one_reply_per_line_in_order() {
        let input = concat!(
            r#"{"path": "/api/demo", "ip": "10.0.0.1"}"#,
            "\n",
            r#"{"path": "/api/de"#,
            "\n",
            r#"{"path": "/api/auth/signup", "ip": "10.0.0.1", "user_id": "42"}"#,
            "\n",
        );
        let replies = run(input).await;

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["status"], 200);
        assert_eq!(replies[1]["status"], 400);
        assert_eq!(replies[1]["error"], "malformed request");
        assert_eq!(replies[2]["status"], 200);
        assert_eq!(header(&replies[2], "X-RateLimit-Limit"), Some("5"));
    }

    #[tokio::test]
    async fn test_blank_and_incomplete_lines_are_answered() {
        let replies = run("\n{\"path\": \"/api/demo\"}\n").await;

        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(|reply| reply["status"] == 400));
    }

    #[tokio::test]
    async fn test_denied_request_reports_retry_after() {
        let line = r#"{"path": "/api/auth/signup", "ip": "10.0.0.9"}"#;
        let input = format!("{}\n", line).repeat(6);
        let replies = run(&input).await;

        assert_eq!(replies.len(), 6);
        let last = replies.last().unwrap();
        assert_eq!(last["status"], 429);
        assert_eq!(last["allowed"], false);
        assert!(header(last, "Retry-After").is_some());
    }

    #[test]
    fn test_shared_backend_without_url_is_memory_only() {
        let config = GatekeeperConfig::default();
        assert!(shared_backend(&config).unwrap().is_none());
    }

    #[test]
    fn test_shared_backend_installed_while_store_is_down() {
        let mut config = GatekeeperConfig::default();
        config.store.url = Some("redis://127.0.0.1:1/0".to_string());
        assert!(shared_backend(&config).unwrap().is_some());
    }

    #[test]
    fn test_shared_backend_rejects_invalid_url() {
        let mut config = GatekeeperConfig::default();
        config.store.url = Some("not a url".to_string());
        assert!(shared_backend(&config).is_err());
    }
}
