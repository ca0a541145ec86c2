//! # HertzBoard - realtime collaborative whiteboard backend
//!
//! A CRDT-backed, Lamport-ordered, multi-replica whiteboard server.
//!
//! ## Architecture
//!
//! - `clock`: the shared Lamport logical clock
//! - `model`: elements, operations, identifiers, state vectors
//! - `store`: the Operation Log and Element Store traits, plus in-memory
//!   and Postgres implementations
//! - `crdt`: the CRDT Engine applying operations with LWW semantics
//! - `frame`: the wire protocol envelope and typed payloads
//! - `presence`: transient per-user cursor/selection state
//! - `room`: the per-workspace actor loop
//! - `hub`: the workspace directory and cross-replica bridge
//! - `replica`: the `ReplicaBus` abstraction (Redis-backed and in-process)
//! - `session`: one connected client's reader/writer task pair
//! - `dispatcher`: routing of inbound frames to the above
//! - `auth`: the identity/authorization trait boundary
//! - `config`: runtime configuration
//! - `error`: the crate-wide error taxonomy

pub mod auth;
pub mod clock;
pub mod config;
pub mod crdt;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod hub;
pub mod model;
pub mod presence;
pub mod replica;
pub mod room;
pub mod session;
pub mod store;

/// Re-export version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
