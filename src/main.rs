mod backend;
mod db;
mod ipc;
mod sheet;

use clap::{Parser, ValueEnum};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

/// Bulk-edit sheet sidecar: line-delimited JSON requests on stdin,
/// one JSON response per line on stdout.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Open this workspace before reading requests.
    #[arg(long, env = "SHEETD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `sheetd=debug`.
    #[arg(long, env = "SHEETD_LOG", default_value = "info")]
    log_filter: String,

    #[arg(long, value_enum, default_value = "compact")]
    log_format: LogFormat,
}

/// Logs go to stderr; stdout carries the protocol.
fn init_tracing(args: &Args) {
    let filter = EnvFilter::try_new(&args.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr).with_ansi(false))
            .init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .init(),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let mut state = ipc::AppState::default();
    if let Some(path) = &args.workspace {
        state.db = Some(db::open_db(path)?);
        state.workspace = Some(path.clone());
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sheetd ready");

    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match stdin.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("stdin read failed: {e}");
                break;
            }
        }

        // Can't reply without id.
        let req: ipc::Request = match std::str::from_utf8(&buf)
            .map_err(|e| e.to_string())
            .and_then(|line| {
                if line.trim().is_empty() {
                    Ok(None)
                } else {
                    serde_json::from_str::<ipc::Request>(line)
                        .map(Some)
                        .map_err(|e| e.to_string())
                }
            }) {
            Ok(Some(v)) => v,
            Ok(None) => continue,
            Err(message) => {
                tracing::warn!("bad request line: {message}");
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": message }
                });
                let _ = writeln!(stdout, "{}", reply);
                let _ = stdout.flush();
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    Ok(())
}
