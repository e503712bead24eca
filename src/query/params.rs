//! Parameter extraction for filter predicates
//!
//! Every literal value in a predicate is replaced by a positional placeholder
//! (`$1`, `$2`, ...) and collected, in placeholder order, into the argument
//! list bound at execution time. Literal values never reach the SQL text.
//!
//! Classification rules, applied per token:
//! - a word naming a column of the predicate's scope entity (storage or
//!   external spelling) is a column reference;
//! - a reserved word is kept verbatim;
//! - quoted strings, numbers and every other word are literals.
//!
//! A bare word that happens to equal a column name is therefore a column
//! reference, even when the caller meant it as a value. Quote the value to
//! force literal treatment.

use serde::{Deserialize, Serialize};

use crate::error::QueryBuildError;

use super::catalog::{self, Entity};
use super::lexer::{PredicateLexer, TokenKind};

/// Words kept verbatim in predicates.
const RESERVED_WORDS: &[&str] = &[
    "and", "or", "not", "in", "like", "ilike", "is", "null", "true", "false", "between",
    "similar", "to", "escape", "any", "all", "some", "exists", "case", "when", "then", "else",
    "end", "cast", "as", "distinct", "from", "interval", "lower", "upper", "length", "trim",
    "coalesce", "nullif", "now", "current_date", "current_timestamp", "date_trunc", "extract",
    "epoch", "timestamptz", "timestamp", "date", "text", "varchar", "integer", "int", "bigint",
    "numeric", "boolean", "jsonb", "json",
];

/// A literal value extracted from a predicate, in its textual form.
///
/// The streamer converts it to the parameter type the server infers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryArg(pub String);

impl QueryArg {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ordered argument list shared by every predicate of one statement.
#[derive(Debug, Default, Clone)]
pub struct Parameters {
    args: Vec<QueryArg>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a literal and return its placeholder.
    pub fn push(&mut self, value: impl Into<String>) -> String {
        self.args.push(QueryArg(value.into()));
        format!("${}", self.args.len())
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn into_args(self) -> Vec<QueryArg> {
        self.args
    }
}

/// A predicate with its literals replaced by placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundPredicate {
    pub text: String,
    /// Storage columns of the scope entity the predicate mentions, in order of appearance.
    pub columns: Vec<&'static str>,
}

/// Whether `word` is kept verbatim in predicates.
pub fn is_reserved_word(word: &str) -> bool {
    RESERVED_WORDS.contains(&word.to_ascii_lowercase().as_str())
}

/// Storage columns of `scope` that the predicate mentions, by whole-token match.
pub fn referenced_columns(
    predicate: &str,
    scope: Entity,
) -> Result<Vec<&'static str>, QueryBuildError> {
    let tokens = PredicateLexer::tokenize(predicate)
        .map_err(|e| QueryBuildError::InvalidPredicate(e.to_string()))?;

    let mut columns = Vec::new();
    for token in tokens {
        let column = match &token.kind {
            TokenKind::Word(word) => catalog::resolve_column(scope, word),
            TokenKind::Qualified { qualifier, name } if qualifies(qualifier, scope) => {
                catalog::resolve_column(scope, name)
            }
            _ => None,
        };
        if let Some(col) = column {
            if !columns.contains(&col) {
                columns.push(col);
            }
        }
    }
    Ok(columns)
}

/// Replace the literals of `predicate` with placeholders.
///
/// Column references are rendered lowercase and, when `qualify_with` is set,
/// prefixed with that relation name.
///
/// # Arguments
/// * `predicate` - Caller supplied filter text
/// * `scope` - Entity whose columns the predicate may reference
/// * `qualify_with` - Relation name to prefix column references with
/// * `params` - Statement-wide argument list, appended in encounter order
///
/// # Returns
/// * `Result<BoundPredicate, QueryBuildError>` - Parameterized text or the unresolved reference
pub fn bind_predicate(
    predicate: &str,
    scope: Entity,
    qualify_with: Option<&str>,
    params: &mut Parameters,
) -> Result<BoundPredicate, QueryBuildError> {
    let tokens = PredicateLexer::tokenize(predicate)
        .map_err(|e| QueryBuildError::InvalidPredicate(e.to_string()))?;

    let mut parts: Vec<String> = Vec::with_capacity(tokens.len());
    let mut columns = Vec::new();

    let render_column = |column: &'static str, columns: &mut Vec<&'static str>| {
        if !columns.contains(&column) {
            columns.push(column);
        }
        match qualify_with {
            Some(relation) => format!("{relation}.{column}"),
            None => column.to_string(),
        }
    };

    for token in tokens {
        let part = match token.kind {
            TokenKind::Word(word) => {
                if let Some(column) = catalog::resolve_column(scope, &word) {
                    render_column(column, &mut columns)
                } else if is_reserved_word(&word) {
                    word
                } else {
                    params.push(word)
                }
            }
            TokenKind::Qualified { qualifier, name } => {
                if !qualifies(&qualifier, scope) {
                    return Err(QueryBuildError::UnknownQualifier { qualifier, column: name });
                }
                match catalog::resolve_column(scope, &name) {
                    Some(column) => render_column(column, &mut columns),
                    None => {
                        return Err(QueryBuildError::UnknownColumn {
                            entity: scope.name().to_string(),
                            column: name,
                        });
                    }
                }
            }
            TokenKind::Number(number) => params.push(number),
            TokenKind::Quoted(value) => params.push(value),
            TokenKind::Symbol(symbol) => symbol,
        };
        parts.push(part);
    }

    Ok(BoundPredicate {
        text: parts.join(" "),
        columns,
    })
}

fn qualifies(qualifier: &str, scope: Entity) -> bool {
    qualifier.eq_ignore_ascii_case(scope.table())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quoted_literal_becomes_placeholder() {
        let mut params = Parameters::new();
        let bound =
            bind_predicate("status='completed'", Entity::Granules, None, &mut params).unwrap();
        assert_eq!(bound.text, "status = $1");
        assert_eq!(bound.columns, vec!["status"]);
        assert_eq!(params.into_args(), vec![QueryArg("completed".into())]);
    }

    #[test]
    fn test_bare_literals_and_keywords() {
        let mut params = Parameters::new();
        let bound = bind_predicate(
            "status = completed AND granule_id like %MOD09% or duration > 10",
            Entity::Granules,
            None,
            &mut params,
        )
        .unwrap();
        assert_eq!(
            bound.text,
            "status = $1 AND granule_id like $2 or duration > $3"
        );
        let args: Vec<String> = params.into_args().into_iter().map(|a| a.0).collect();
        assert_eq!(args, vec!["completed", "%MOD09%", "10"]);
    }

    #[test]
    fn test_modulo_keeps_column_reference() {
        let mut params = Parameters::new();
        let bound =
            bind_predicate("duration%60 = 0", Entity::Granules, None, &mut params).unwrap();
        assert_eq!(bound.text, "duration % $1 = $2");
        assert_eq!(bound.columns, vec!["duration"]);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_placeholders_continue_across_predicates() {
        let mut params = Parameters::new();
        bind_predicate("name = 'MOD09GQ'", Entity::Collections, None, &mut params).unwrap();
        let bound = bind_predicate("status = 'failed'", Entity::Granules, None, &mut params).unwrap();
        assert_eq!(bound.text, "status = $2");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_qualification_and_external_names() {
        let mut params = Parameters::new();
        let bound = bind_predicate(
            "granules.granuleId = 'G1' and createdAt > '2024-01-01'",
            Entity::Granules,
            Some("granules"),
            &mut params,
        )
        .unwrap();
        assert_eq!(
            bound.text,
            "granules.granule_id = $1 and granules.created_at > $2"
        );
        assert_eq!(bound.columns, vec!["granule_id", "created_at"]);
    }

    #[test]
    fn test_foreign_qualifier_is_rejected() {
        let mut params = Parameters::new();
        let err = bind_predicate("providers.name = 'x'", Entity::Granules, None, &mut params)
            .unwrap_err();
        assert!(matches!(err, QueryBuildError::UnknownQualifier { .. }));
    }

    #[test]
    fn test_unknown_qualified_column_is_rejected() {
        let mut params = Parameters::new();
        let err = bind_predicate("granules.nope = 1", Entity::Granules, None, &mut params)
            .unwrap_err();
        assert_eq!(
            err,
            QueryBuildError::UnknownColumn {
                entity: "granules".into(),
                column: "nope".into()
            }
        );
    }

    // A bare value spelled like a column is read as that column.
    #[test]
    fn test_bare_value_matching_column_is_a_column_reference() {
        let mut params = Parameters::new();
        let bound =
            bind_predicate("status = published", Entity::Granules, None, &mut params).unwrap();
        assert_eq!(bound.text, "status = published");
        assert!(params.is_empty());

        let mut params = Parameters::new();
        let bound =
            bind_predicate("status = 'published'", Entity::Granules, None, &mut params).unwrap();
        assert_eq!(bound.text, "status = $1");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_referenced_columns_uses_whole_tokens() {
        // "name" is a substring of "file_name" but not a files column on its own.
        assert_eq!(
            referenced_columns("file_name = 'x.hdf'", Entity::Files).unwrap(),
            vec!["file_name"]
        );
        assert!(
            referenced_columns("file_name = 'x.hdf'", Entity::Providers)
                .unwrap()
                .is_empty()
        );
    }
}
