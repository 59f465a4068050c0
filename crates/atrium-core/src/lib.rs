//! # atrium-core
//!
//! Foundation types for the Atrium assistant core.
//!
//! This crate provides the shared vocabulary the other atrium crates depend on:
//!
//! - **IDs**: [`ids`] — prefixed, sortable uuid-v7 identifiers
//! - **Messages**: [`messages::Message`] with role, origin surface, and metadata
//! - **Tool vocabulary**: [`invocations::ToolRequest`] and
//!   [`invocations::ToolInvocation`] with tagged success/failure outcomes
//! - **Deltas**: [`delta::SessionDelta`] — incremental state changes fanned out
//!   to subscribed surfaces
//! - **Errors**: [`errors::TurnError`] taxonomy with stable internal codes
//! - **Logging**: [`logging::init_logging`] subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other atrium crates.

#![deny(unsafe_code)]

pub mod delta;
pub mod errors;
pub mod ids;
pub mod invocations;
pub mod logging;
pub mod messages;
