//! Duplex session engine binary.
//!
//! Runs the hello conversation as a server, as a client, or both in one
//! process against each other.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use duplex_session::{
    ClientSession, FailureSink, HelloWorld, Listener, LogSink, SessionError, SessionOutcome,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::DuplexConfig;
use logging::DuplexLogFormatter;

/// Half-duplex message session engine
#[derive(Parser, Debug)]
#[command(name = "redb-duplex", version, about = "Half-duplex message session engine")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections and answer the hello conversation
    Serve {
        /// Listen address, e.g. 0.0.0.0:8080
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Serve one connection, then exit
        #[arg(long)]
        single: bool,
    },

    /// Connect to a server and run the hello conversation
    Connect {
        /// Server host name or address
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(long)]
        port: Option<u16>,

        /// Target path
        #[arg(long)]
        target: Option<String>,

        /// Connect timeout, e.g. 5s
        #[arg(long)]
        connect_timeout: Option<humantime::Duration>,
    },

    /// Run server and client against each other over loopback
    Demo,
}

/// Logs failures and counts them
struct CountingSink {
    failures: AtomicUsize,
}

impl FailureSink for CountingSink {
    fn notify(&self, error: &SessionError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        LogSink.notify(error);
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("redb_duplex={}", args.log_level).parse()?)
        .add_directive(format!("duplex_session={}", args.log_level).parse()?)
        .add_directive(format!("duplex_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(true)
        .event_format(DuplexLogFormatter::new("duplex"))
        .init();

    info!("Starting reDB Duplex v{}", env!("CARGO_PKG_VERSION"));

    let mut config = DuplexConfig::load_from_file(&args.config)?;

    match args.command {
        Command::Serve { listen, single } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            config.single_connection |= single;
            serve(config).await
        }
        Command::Connect {
            host,
            port,
            target,
            connect_timeout,
        } => {
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(target) = target {
                config.target = target;
            }
            if let Some(timeout) = connect_timeout {
                config.connect_timeout = timeout.into();
            }
            connect(config).await
        }
        Command::Demo => demo(config).await,
    }
}

async fn serve(config: DuplexConfig) -> anyhow::Result<()> {
    let listener = Listener::bind(
        config.listen,
        config.single_connection,
        Arc::new(LogSink),
        HelloWorld::server,
        config.session_config(),
    )
    .with_context(|| format!("failed to listen on {}", config.listen))?;

    tokio::select! {
        outcome = listener.run() => {
            info!("Listener finished: {:?}", outcome);
        }
        result = shutdown_signal() => {
            result?;
            info!("Listener stopped");
        }
    }
    Ok(())
}

async fn connect(config: DuplexConfig) -> anyhow::Result<()> {
    let client = ClientSession::new(
        HelloWorld::client(),
        Arc::new(LogSink),
        config.session_config(),
    );
    let handle = client.shutdown_handle();

    let run = client.run(&config.host, config.port, &config.target);
    tokio::pin!(run);

    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        result = shutdown_signal() => {
            result?;
            handle.shutdown();
            run.await
        }
    };

    match outcome {
        SessionOutcome::Closed | SessionOutcome::Cancelled => {
            info!("Client finished: {:?}", outcome);
            Ok(())
        }
        SessionOutcome::Failed { code, what } => bail!("session failed during {}: {}", what, code),
        SessionOutcome::PeerClosed => bail!("server closed the conversation early"),
    }
}

async fn demo(config: DuplexConfig) -> anyhow::Result<()> {
    let sink = Arc::new(CountingSink {
        failures: AtomicUsize::new(0),
    });
    let session_config = config.session_config();

    let listener = Listener::bind(
        SocketAddr::from(([127, 0, 0, 1], 0)),
        true,
        sink.clone(),
        HelloWorld::server,
        session_config.clone(),
    )?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(listener.run());

    let client = ClientSession::new(HelloWorld::client(), sink.clone(), session_config);
    let client_outcome = client.run("127.0.0.1", addr.port(), &config.target).await;
    let server_outcome = server.await?;

    info!(
        "Demo finished: client {:?}, server {:?}",
        client_outcome, server_outcome
    );

    let failures = sink.failures.load(Ordering::SeqCst);
    if failures > 0 || client_outcome != SessionOutcome::Closed {
        error!("Demo failed with {} reported failures", failures);
        bail!("demo conversation did not complete cleanly");
    }
    Ok(())
}

async fn shutdown_signal() -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
        _ = sigint.recv() => info!("Received SIGINT signal"),
    }
    Ok(())
}
