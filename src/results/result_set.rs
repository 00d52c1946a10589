use std::sync::Arc;

use crate::engine::QueryResult;
use crate::transform::NameTransform;

use super::row::{Row, index_columns};

/// Decoded rows returned by [`crate::SqlClient::execute`].
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<Row>,
    /// The number of rows changed by the statement
    pub rows_affected: usize,
    /// Column names shared by all rows (to avoid duplicating in each row)
    column_names: Option<Arc<Vec<String>>>,
}

impl ResultSet {
    /// Decode an engine result, mapping column names through the incoming name transform.
    #[must_use]
    pub fn from_raw(raw: QueryResult, transform: Option<&NameTransform>) -> Self {
        let names: Vec<String> = match transform {
            Some(t) => raw.columns.iter().map(|name| t.incoming(name)).collect(),
            None => raw.columns,
        };
        let column_names = Arc::new(names);
        let column_index = Arc::new(index_columns(&column_names));
        let results = raw
            .rows
            .into_iter()
            .map(|values| Row {
                column_names: Arc::clone(&column_names),
                values,
                column_index: Arc::clone(&column_index),
            })
            .collect();
        Self {
            results,
            rows_affected: raw.rows_affected,
            column_names: Some(column_names),
        }
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn get_column_names(&self) -> Option<&Arc<Vec<String>>> {
        self.column_names.as_ref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.results.iter()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.results.first()
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
