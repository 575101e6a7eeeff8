//! Command Module
//!
//! Receives decoded requests, validates them, executes them against the
//! storage engine, and returns replies.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  Frame Decoder  │  (protocol module)
//! └────────┬────────┘
//!          │ Request
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │  (this module)
//! │                 │
//! │  - Parse        │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```

pub mod command;
pub mod handler;

pub use command::{Command, CommandError};
pub use handler::Dispatcher;
