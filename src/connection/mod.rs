//! Connection Module
//!
//! Manages individual client connections. Each accepted stream is served by
//! its own [`Session`] in its own tokio task, so a slow client never holds up
//! the others.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │
//!                        │ accept() + permit
//!                        ▼
//!           ┌────────────────────────┐
//!           │   JoinSet::spawn       │
//!           └────────────┬───────────┘
//!                        │
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Session                               │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│ Decode frame│───>│  Dispatch   │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │         ▲                                     │             │
//! │         │                            ┌────────▼────┐        │
//! │         └────────────────────────────│ Write reply │        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sessions work over any `AsyncRead + AsyncWrite` stream, which keeps them
//! testable without sockets.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionStats, Session};
