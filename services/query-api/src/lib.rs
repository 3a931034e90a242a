//! Query service.
//!
//! Answers `GET /query` by running a fixed statement in a disposable
//! database sandbox taken from a pre-provisioned pool.

pub mod config;
pub mod error;
pub mod pool;
pub mod postgres;
pub mod server;

pub use config::ServiceConfig;
pub use error::{QueryError, QueryResult};
pub use pool::{QueryRows, Sandbox, SandboxPool, SandboxProvider};
pub use postgres::PostgresProvider;
pub use server::{create_router, serve_with_shutdown, AppState, QUERY_SQL};
