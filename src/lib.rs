//! # QuickKV - A Minimal In-Memory Key-Value Server
//!
//! QuickKV is a small networked key/value store. Clients connect over TCP,
//! send length-prefixed request frames in a RESP-style encoding, and get
//! back one reply per request.
//!
//! ## Features
//!
//! - **Binary-Safe Requests**: keys and values may contain any byte
//! - **Concurrent Clients**: one tokio task per connection over a sharded store
//! - **TTL Support**: `SET ... PX <ms>` with lazy expiry, optional background sweep
//! - **Graceful Shutdown**: in-flight replies get a short grace period before connections close
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              QuickKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│  Session    │───>│ Dispatcher  │                  │
//! │  │ (server.rs) │    │ (per conn)  │    │             │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐    │
//! │  │   Frame     │    │              StorageEngine                   │    │
//! │  │  Decoder /  │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │    │
//! │  │  Encoder    │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...64   │ │    │
//! │  └─────────────┘    │  └────────┘ └────────┘ └────────┘ └────────┘ │    │
//! │                     └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use quickkv::server::{run, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig {
//!         port: 7000,
//!         ..ServerConfig::default()
//!     };
//!     run(config, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `ECHO message`
//! - `SET key value [PX milliseconds | EX seconds]`
//! - `GET key`
//!
//! ## Module Overview
//!
//! - [`protocol`]: frame decoder, request and reply types
//! - [`commands`]: command parsing and dispatch
//! - [`storage`]: sharded store with TTL support
//! - [`connection`]: per-client session
//! - [`server`]: listener, accept loop and shutdown
//! - [`config`]: command-line options

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
mod shutdown;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{Command, CommandError, Dispatcher};
pub use config::Cli;
pub use connection::{handle_connection, ConnectionError, ConnectionStats, Session};
pub use protocol::{Decoded, FrameDecoder, ProtocolError, Reply, Request};
pub use server::{run, serve, ServerConfig, ServerError};
pub use storage::{ExpiryConfig, ExpirySweeper, StorageEngine, Sweep};

/// The default port QuickKV listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host QuickKV binds to (all interfaces)
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default limit on concurrently served clients
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Version of QuickKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
