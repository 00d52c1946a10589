use std::collections::HashMap;
use std::sync::Arc;

use crate::types::RowValues;

/// A decoded row with access by column name or position.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column names shared across all rows in a result set
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<RowValues>,
    #[doc(hidden)]
    pub(crate) column_index: Arc<HashMap<String, usize>>,
}

impl Row {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValues>) -> Self {
        let column_index = Arc::new(index_columns(&column_names));
        Self {
            column_names,
            values,
            column_index,
        }
    }

    /// Get the index of a column by name
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_index.get(column_name).copied()
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    /// Consume the row into a JSON object keyed by column name.
    #[must_use]
    pub fn into_json(self) -> serde_json::Value {
        let map = self
            .column_names
            .iter()
            .cloned()
            .zip(self.values)
            .map(|(name, value)| (name, value_to_json(value)))
            .collect();
        serde_json::Value::Object(map)
    }
}

pub(crate) fn index_columns(column_names: &[String]) -> HashMap<String, usize> {
    // First occurrence wins for duplicate names, matching positional lookup order.
    let mut index = HashMap::with_capacity(column_names.len());
    for (i, name) in column_names.iter().enumerate() {
        index.entry(name.clone()).or_insert(i);
    }
    index
}

fn value_to_json(value: RowValues) -> serde_json::Value {
    use serde_json::Value;
    match value {
        RowValues::Int(i) => Value::from(i),
        RowValues::Float(f) => Value::from(f),
        RowValues::Text(s) => Value::String(s),
        RowValues::Bool(b) => Value::Bool(b),
        RowValues::Timestamp(dt) => Value::String(dt.format("%F %T%.f").to_string()),
        RowValues::Null => Value::Null,
        RowValues::JSON(v) => v,
        RowValues::Blob(bytes) => Value::from(bytes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_index() {
        let names = Arc::new(vec!["id".to_string(), "name".to_string()]);
        let row = Row::new(names, vec![RowValues::Int(1), RowValues::Text("a".into())]);
        assert_eq!(row.get("name"), Some(&RowValues::Text("a".into())));
        assert_eq!(row.get_by_index(0), Some(&RowValues::Int(1)));
        assert!(row.get("missing").is_none());
        assert_eq!(row.into_json(), serde_json::json!({"id": 1, "name": "a"}));
    }
}
