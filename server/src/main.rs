//! Reference DICOM server over the pacs-rs protocol engine.
//!
//! One thread per TCP connection reads bytes and feeds the engine;
//! outbound buffers are written back through the session send
//! callback. All protocol work happens inside the engine's stage
//! pools.

mod config;

use clap::{Parser, Subcommand};
use config::ServerConfig;
use pacs_engine::{BlobStore, FileBlobStore, PacsEngine, SendFn};
use pacs_index::IndexDatabase;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// clean shutdown
const EXIT_OK: u8 = 0;
/// configuration could not be loaded
const EXIT_BAD_CONFIG: u8 = 64;
/// the listen socket could not be bound
const EXIT_BIND_FAILURE: u8 = 69;
/// unrecoverable internal fault
const EXIT_INTERNAL: u8 = 70;

/// DICOM archive node: C-STORE / C-FIND / C-MOVE / C-GET / C-ECHO,
/// worklist and MPPS.
#[derive(Debug, Parser)]
#[command(name = "pacs-server", version)]
struct App {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Listen for DICOM associations
    Serve {
        /// port to listen on
        #[arg(long, default_value = "11112")]
        port: u16,

        /// path to the TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let app = App::parse();
    match app.command {
        Command::Serve { port, config } => serve(port, config),
    }
}

fn serve(port: u16, config_path: Option<PathBuf>) -> ExitCode {
    let config = match config_path {
        Some(path) => match ServerConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                return ExitCode::from(EXIT_BAD_CONFIG);
            }
        },
        None => ServerConfig::default(),
    };

    let index = match IndexDatabase::open(&config.db_path) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            error!("could not open index database: {e}");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };
    let blob: Arc<dyn BlobStore> = match FileBlobStore::new(&config.storage_dir) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("could not open storage directory: {e}");
            return ExitCode::from(EXIT_INTERNAL);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => listener,
        Err(e) => {
            error!("could not bind port {port}: {e}");
            return ExitCode::from(EXIT_BIND_FAILURE);
        }
    };

    let engine = Arc::new(PacsEngine::new(config.to_engine_config(), index, blob));
    info!(port, ae_title = %config.ae_title, "listening for associations");

    for stream in listener.incoming() {
        match stream {
            Ok(socket) => {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || handle_connection(engine, socket));
            }
            Err(e) => {
                warn!("accept failed: {e}");
            }
        }
    }

    ExitCode::from(EXIT_OK)
}

/// Pump bytes from one TCP connection into the engine.
fn handle_connection(engine: Arc<PacsEngine>, socket: TcpStream) {
    let peer = socket
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    let writer = match socket.try_clone() {
        Ok(writer) => Arc::new(Mutex::new(writer)),
        Err(e) => {
            warn!(peer = %peer, "could not clone socket: {e}");
            return;
        }
    };
    let send_fn: SendFn = Arc::new(move |bytes: &[u8]| {
        let mut writer = writer.lock().expect("writer lock");
        writer.write_all(bytes)
    });

    let session_id = engine.open_session(send_fn);
    info!(session_id, peer = %peer, "connection accepted");

    let mut socket = socket;
    let mut buffer = [0u8; 8192];
    loop {
        match socket.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => engine.on_bytes_received(session_id, buffer[..n].to_vec()),
            Err(e) => {
                warn!(session_id, peer = %peer, "read failed: {e}");
                break;
            }
        }
    }

    engine.on_connection_closed(session_id);
    info!(session_id, peer = %peer, "connection closed");
}
