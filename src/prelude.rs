//! Convenient imports for common functionality.

pub use crate::client::{ClientOptions, ClientOptionsBuilder, SqlClient};
pub use crate::engine::{DbLocation, Engine, QueryResult};
pub use crate::error::SqlGateError;
pub use crate::results::{ResultSet, Row};
pub use crate::statement::{
    BulkUpdate, CompiledQuery, Ident, InsertRows, PlaceholderStyle, RecordUpdate, Statement,
    StatementCompiler,
};
pub use crate::transform::NameTransform;
pub use crate::types::{DebugLevel, RowValues};
