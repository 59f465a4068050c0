//! # atrium-store
//!
//! SQLite persistence for sessions, their ordered message logs, tool
//! invocation records, and durable circuit snapshots.
//!
//! The one invariant everything downstream leans on: per-session `seq` is
//! strictly increasing and gapless. Writes to a session are serialized by an
//! in-process per-session lock, and `UNIQUE(session_id, seq)` backs the same
//! guarantee at the database level; a violation there means the in-process
//! invariant broke and surfaces as [`errors::StoreError::OrderingConflict`].
//!
//! ## Crate Position
//!
//! Depends on: atrium-core, atrium-resilience (snapshot types only).
//! Depended on by: atrium-runtime, atrium-server, atrium-agent.

#![deny(unsafe_code)]

pub mod circuits;
pub mod connection;
pub mod errors;
pub mod migrations;
pub mod store;

pub use circuits::CircuitRepo;
pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use errors::{Result, StoreError};
pub use store::{Session, SessionStore};
