//! Export request model

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Default row cap when a request does not name one.
pub const DEFAULT_LIMIT: u64 = 100;

/// Default cursor batch size.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// What a caller asks to export.
///
/// ```json
/// {"entity": "granules", "columns": "granuleId,status", "filters": {"granules": "status = 'completed'"}, "limit": 5}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    /// Target entity tag
    pub entity: String,

    #[serde(default)]
    pub columns: ColumnSelection,

    /// Filter predicate per entity scope
    #[serde(default)]
    pub filters: BTreeMap<String, String>,

    /// Row cap; 0 exports every row
    #[serde(default = "default_limit")]
    pub limit: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl ExportRequest {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            columns: ColumnSelection::All,
            filters: BTreeMap::new(),
            limit: DEFAULT_LIMIT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn columns(mut self, columns: &str) -> Self {
        self.columns = ColumnSelection::parse(columns);
        self
    }

    pub fn filter(mut self, scope: impl Into<String>, predicate: impl Into<String>) -> Self {
        self.filters.insert(scope.into(), predicate.into());
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Row cap as applied to the statement.
    pub fn row_cap(&self) -> Option<u64> {
        (self.limit > 0).then_some(self.limit)
    }
}

/// Requested output columns: `*` or an explicit list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawColumns", into = "String")]
pub enum ColumnSelection {
    #[default]
    All,
    Columns(Vec<String>),
}

impl ColumnSelection {
    /// Parse `*` or a comma separated list. A `*` anywhere selects everything.
    pub fn parse(text: &str) -> Self {
        let names: Vec<String> = text
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
        Self::from_names(names)
    }

    fn from_names(names: Vec<String>) -> Self {
        if names.iter().any(|name| name.trim() == "*") {
            ColumnSelection::All
        } else {
            ColumnSelection::Columns(names)
        }
    }
}

impl fmt::Display for ColumnSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnSelection::All => f.write_str("*"),
            ColumnSelection::Columns(names) => f.write_str(&names.join(",")),
        }
    }
}

impl From<ColumnSelection> for String {
    fn from(selection: ColumnSelection) -> Self {
        selection.to_string()
    }
}

/// Wire forms accepted for `columns`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawColumns {
    Text(String),
    List(Vec<String>),
}

impl From<RawColumns> for ColumnSelection {
    fn from(raw: RawColumns) -> Self {
        match raw {
            RawColumns::Text(text) => ColumnSelection::parse(&text),
            RawColumns::List(names) => ColumnSelection::from_names(
                names
                    .into_iter()
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_column_selection() {
        assert_eq!(ColumnSelection::parse("*"), ColumnSelection::All);
        assert_eq!(ColumnSelection::parse("name, *"), ColumnSelection::All);
        assert_eq!(
            ColumnSelection::parse(" name ,protocol,"),
            ColumnSelection::Columns(vec!["name".into(), "protocol".into()])
        );
        assert_eq!(ColumnSelection::parse(""), ColumnSelection::Columns(vec![]));
    }

    #[test]
    fn test_request_from_json_defaults() {
        let request: ExportRequest =
            serde_json::from_str(r#"{"entity": "providers", "columns": "name,protocol"}"#)
                .unwrap();
        assert_eq!(request.limit, DEFAULT_LIMIT);
        assert_eq!(request.batch_size, DEFAULT_BATCH_SIZE);
        assert!(request.filters.is_empty());
        assert_eq!(
            request.columns,
            ColumnSelection::Columns(vec!["name".into(), "protocol".into()])
        );
    }

    #[test]
    fn test_request_accepts_column_list_and_camel_case() {
        let request: ExportRequest = serde_json::from_str(
            r#"{"entity": "granules", "columns": ["granuleId", "status"], "limit": 0, "batchSize": 50}"#,
        )
        .unwrap();
        assert_eq!(request.batch_size, 50);
        assert_eq!(request.row_cap(), None);
        assert_eq!(request.columns.to_string(), "granuleId,status");

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["columns"], "granuleId,status");
        assert_eq!(json["batchSize"], 50);
    }

    #[test]
    fn test_builder() {
        let request = ExportRequest::new("granules")
            .columns("*")
            .filter("granules", "status = 'completed'")
            .limit(5);
        assert_eq!(request.columns, ColumnSelection::All);
        assert_eq!(request.row_cap(), Some(5));
        assert_eq!(request.filters["granules"], "status = 'completed'");
    }
}
