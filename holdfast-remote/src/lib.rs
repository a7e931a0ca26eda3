//! Remote data service collaborators.
//!
//! The sync core talks to its backend through table-oriented CRUD calls.
//! This crate defines that surface ([`RemoteService`]), the factory the
//! connection pool uses to open handles ([`RemoteConnector`]), the error
//! type with its retry classification ([`RemoteError`]), and an in-memory
//! backend with fault injection ([`MemoryRemote`]) for tests and
//! simulation.

mod error;
mod filter;
mod memory;
mod service;

pub use error::{RATE_LIMIT_CODES, RemoteError, RemoteResult};
pub use filter::Filter;
pub use memory::{CallRecord, MemoryConnector, MemoryRemote, RemoteOp};
pub use service::{HEALTH_TABLE, RemoteConnector, RemoteService};
