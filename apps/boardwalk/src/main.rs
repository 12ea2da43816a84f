use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Args, Parser};
use tokio::signal;
use tokio::task::LocalSet;
use tokio::time::{Duration, interval};
use tracing::{debug, info};

use boardwalk::config::Config;
use boardwalk::model::{PixelBuffer, Rect};
use boardwalk::output::trace::{TraceEventSink, TraceOutputFactory};
use boardwalk::server::{DisplayServer, StaticAssets};
use boardwalk::telemetry::logging::{self as logctl, LogConfig, LogLevel};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let log_config = cli.logging.to_config();
    logctl::init(&log_config).context("failed to initialise logging")?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    let mut config = Config::from_env().context("bad environment configuration")?;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if cli.client_html.is_some() {
        config.client_html = cli.client_html;
    }
    if cli.client_js.is_some() {
        config.client_js = cli.client_js;
    }

    let assets = load_assets(&config)?;
    let server = DisplayServer::new(assets, Box::new(TraceOutputFactory), Rc::new(TraceEventSink));
    let listener = DisplayServer::bind(config.listen)
        .await
        .context("failed to bind listener")?;

    // All connection handling runs as local tasks on this one thread; the
    // server state is never touched from anywhere else.
    let local = LocalSet::new();
    local
        .run_until(async {
            if cli.demo_surface {
                tokio::task::spawn_local(run_demo(server.clone()));
            }
            tokio::select! {
                result = server.serve(listener) => result.context("listener failed"),
                _ = signal::ctrl_c() => {
                    info!("shutdown signal received");
                    Ok(())
                }
            }
        })
        .await
}

#[derive(Parser, Debug)]
#[command(
    name = "boardwalk",
    about = "Bridge display surfaces to web browsers over websockets",
    version
)]
struct Cli {
    #[arg(
        long,
        value_name = "ADDR",
        help = "Address for the HTTP/websocket listener (overrides BOARDWALK_LISTEN)"
    )]
    listen: Option<SocketAddr>,

    #[arg(
        long,
        value_name = "PATH",
        help = "HTML page served to browsers (a placeholder page when omitted)"
    )]
    client_html: Option<PathBuf>,

    #[arg(
        long,
        value_name = "PATH",
        help = "Client script served alongside the HTML page"
    )]
    client_js: Option<PathBuf>,

    #[arg(
        long,
        help = "Animate a small demo surface so attached clients see live damage"
    )]
    demo_surface: bool,

    #[command(flatten)]
    logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "BOARDWALK_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "BOARDWALK_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    file: Option<PathBuf>,
}

impl LoggingArgs {
    fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

fn load_assets(config: &Config) -> Result<StaticAssets> {
    let placeholder = StaticAssets::placeholder();
    let html = match config.client_html.as_deref() {
        Some(path) => read_asset(path)?,
        None => placeholder.html().clone(),
    };
    let js = match config.client_js.as_deref() {
        Some(path) => read_asset(path)?,
        None => placeholder.js().clone(),
    };
    Ok(StaticAssets::new(html, js))
}

fn read_asset(path: &Path) -> Result<Bytes> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to read client asset {}", path.display()))?;
    Ok(Bytes::from(bytes))
}

const DEMO_SIZE: i32 = 128;
const DEMO_SQUARE: i32 = 32;

/// Bounces a square around one surface so a connected browser has
/// something to look at without a real renderer attached. The first frame
/// goes out as a full upload, every later one as a damage delta.
async fn run_demo(server: DisplayServer) {
    let id = server.create_surface(96, 96, DEMO_SIZE, DEMO_SIZE, false);
    server.show_surface(id);
    info!(id, "demo surface animating");

    let mut ticker = interval(Duration::from_millis(100));
    let mut pos = 0i32;
    let mut step = 4i32;
    loop {
        ticker.tick().await;
        if !server.has_client() {
            continue;
        }
        let mut frame = PixelBuffer::new(DEMO_SIZE, DEMO_SIZE);
        frame.fill_rect(Rect::new(0, 0, DEMO_SIZE, DEMO_SIZE), 0xff20_2430);
        frame.fill_rect(
            Rect::new(pos, (DEMO_SIZE - DEMO_SQUARE) / 2, DEMO_SQUARE, DEMO_SQUARE),
            0xffe0_a030,
        );
        server.update_surface(id, &frame);
        server.flush();

        pos += step;
        if pos <= 0 || pos + DEMO_SQUARE >= DEMO_SIZE {
            step = -step;
            pos = pos.clamp(0, DEMO_SIZE - DEMO_SQUARE);
        }
    }
}
