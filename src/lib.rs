//! Async SQL client for a single-connection embedded engine.
//!
//! Statements are built from literal fragments and typed slots, compiled into SQL text
//! plus positional parameters, and run on the one engine connection behind a FIFO gate.
//! Transactions nest through savepoints and are rolled back on every exit path,
//! cancellation included.
//!
//! ```no_run
//! use sql_gate::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlGateError> {
//! let client = ClientOptions::builder().path("app.db").build()?;
//! let tx = client.clone();
//! client
//!     .with_transaction(|| async move {
//!         tx
//!             .execute(&Statement::new("INSERT INTO items ").insert(InsertRows::new(
//!                 ["name"],
//!                 vec![vec!["widget".into()]],
//!             )))
//!             .await?;
//!         Ok::<_, SqlGateError>(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;
pub mod engine;
pub mod error;
pub mod gate;
pub mod prelude;
pub mod results;
pub mod statement;
pub mod transaction;
pub mod transform;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::{ClientOptions, ClientOptionsBuilder, SqlClient};
pub use error::{EngineError, SqlGateError};
pub use results::{ResultSet, Row};
pub use statement::{CompiledQuery, PlaceholderStyle, Statement, StatementCompiler};
pub use types::{DebugLevel, RowValues};
