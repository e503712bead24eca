//! Tests for statement composition
//!
//! Full requests through the composer registry, checked against the rendered SQL.

#[cfg(test)]
mod tests {
    use super::super::composer::{ComposedQuery, CompositionStrategy, QueryComposer, StandaloneStrategy};
    use super::super::{Entity, ExportRequest, QueryArg};
    use crate::error::{ExportError, QueryBuildError};

    fn compose(request: &ExportRequest) -> ComposedQuery {
        QueryComposer::new().compose(request).unwrap()
    }

    fn args(values: &[&str]) -> Vec<QueryArg> {
        values.iter().map(|v| QueryArg(v.to_string())).collect()
    }

    fn build_error(request: &ExportRequest) -> QueryBuildError {
        match QueryComposer::new().compose(request) {
            Err(ExportError::QueryBuild(err)) => err,
            other => panic!("expected a build error, got {other:?}"),
        }
    }

    #[test]
    fn test_plain_providers_statement() {
        let query = compose(&ExportRequest::new("providers").columns("name,protocol").limit(10));
        assert_eq!(query.sql, "SELECT name, protocol FROM providers LIMIT 10");
        assert!(query.args.is_empty());
        assert_eq!(query.entity, Entity::Providers);
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn test_granules_wildcard_joins_everything_and_limits_once() {
        let query = compose(
            &ExportRequest::new("granules")
                .columns("*")
                .filter("granules", "status='completed'")
                .limit(5),
        );

        assert!(query.sql.starts_with(
            "WITH granules_cte AS (SELECT granules.*, granules.cumulus_id AS granule_cumulus_id \
             FROM granules WHERE granules.status = $1) SELECT * FROM granules_cte"
        ));
        for alias in [
            "AS provider_names",
            "AS collection_ids",
            "AS pdr_names",
            "AS latest_executions",
            "AS file_arrays",
        ] {
            assert!(query.sql.contains(alias), "missing {alias}");
        }
        assert_eq!(query.sql.matches("LIMIT").count(), 1);
        assert!(query.sql.ends_with("AS file_arrays USING (granule_cumulus_id) LIMIT 5"));
        assert_eq!(query.args, args(&["completed"]));
    }

    #[test]
    fn test_secondary_joins_follow_fixed_order() {
        let sql = compose(&ExportRequest::new("granules")).sql;
        let positions: Vec<usize> = [
            "provider_names",
            "collection_ids",
            "pdr_names",
            "latest_executions",
            "file_arrays",
        ]
        .iter()
        .map(|alias| sql.find(alias).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_bare_column_token_is_a_column_reference() {
        let query = compose(
            &ExportRequest::new("providers")
                .columns("name")
                .filter("providers", "name = host")
                .limit(10),
        );
        assert_eq!(query.sql, "SELECT name FROM providers WHERE name = host LIMIT 10");
        assert!(query.args.is_empty());

        let quoted = compose(
            &ExportRequest::new("providers")
                .columns("name")
                .filter("providers", "name = 'host'")
                .limit(10),
        );
        assert_eq!(quoted.sql, "SELECT name FROM providers WHERE name = $1 LIMIT 10");
        assert_eq!(quoted.args, args(&["host"]));
    }

    #[test]
    fn test_identical_requests_compose_identically() {
        let request = ExportRequest::new("granules")
            .columns("granuleId, provider, files")
            .filter("providers", "name = 'p1'")
            .filter("granules", "published = true AND status IN ('completed', 'failed')")
            .limit(25);
        let first = compose(&request);
        let second = compose(&request);
        assert_eq!(first, second);
    }

    #[test]
    fn test_unreferenced_secondaries_are_omitted() {
        let query = compose(&ExportRequest::new("granules").columns("granuleId,provider").limit(4));
        assert!(query.sql.contains("AS provider_names"));
        for alias in ["collection_ids", "pdr_names", "latest_executions", "file_arrays"] {
            assert!(!query.sql.contains(alias), "unexpected {alias}");
        }
        // No one-to-many entity: the limit stays inside the primary CTE.
        assert!(query.sql.contains("FROM granules LIMIT 4)"));
        assert!(query.sql.starts_with("WITH granules_cte AS"));
        assert!(query.sql.contains("SELECT granules_cte.granule_id, provider FROM granules_cte"));
    }

    #[test]
    fn test_granule_columns_only_is_plain() {
        let query = compose(&ExportRequest::new("granules").columns("granuleId,status").limit(3));
        assert_eq!(query.sql, "SELECT granule_id, status FROM granules LIMIT 3");
    }

    #[test]
    fn test_to_one_prefilter_keeps_limit_in_primary() {
        let query = compose(
            &ExportRequest::new("pdrs")
                .columns("name,provider")
                .filter("providers", "name = 'ftp'")
                .limit(10),
        );
        assert_eq!(
            query.sql,
            "WITH providers_cte AS (SELECT providers.cumulus_id AS provider_cumulus_id, \
             providers.name AS provider FROM providers WHERE providers.name = $1), \
             pdrs_cte AS (SELECT pdrs.*, pdrs.cumulus_id AS pdr_cumulus_id, providers_cte.provider \
             FROM pdrs JOIN providers_cte ON providers_cte.provider_cumulus_id = pdrs.provider_cumulus_id \
             LIMIT 10) SELECT pdrs_cte.name, provider FROM pdrs_cte"
        );
        assert_eq!(query.args, args(&["ftp"]));
    }

    #[test]
    fn test_files_filter_selects_granules_and_defers_limit() {
        let query = compose(
            &ExportRequest::new("granules")
                .columns("granuleId")
                .filter("files", "type = 'data'")
                .limit(3),
        );
        assert_eq!(
            query.sql,
            "WITH files_cte AS (SELECT DISTINCT files.granule_cumulus_id FROM files \
             WHERE files.type = $1), granules_cte AS (SELECT granules.*, granules.cumulus_id AS \
             granule_cumulus_id FROM granules JOIN files_cte ON files_cte.granule_cumulus_id = \
             granules.cumulus_id) SELECT granules_cte.granule_id FROM granules_cte LIMIT 3"
        );
    }

    #[test]
    fn test_filtered_and_projected_files_keep_full_array() {
        let query = compose(
            &ExportRequest::new("granules")
                .columns("granuleId,files")
                .filter("files", "type = 'data'")
                .limit(3),
        );
        assert!(query.sql.starts_with("WITH files_cte AS"));
        // The aggregate is computed over every file of a selected granule.
        assert!(query.sql.contains(
            "LEFT JOIN (SELECT files.granule_cumulus_id, json_agg(files ORDER BY files.cumulus_id) \
             AS files FROM files JOIN granules_cte ON granules_cte.granule_cumulus_id = \
             files.granule_cumulus_id GROUP BY files.granule_cumulus_id) AS file_arrays"
        ));
        assert_eq!(query.sql.matches("files.type").count(), 1);
        assert!(query.sql.ends_with("LIMIT 3"));
    }

    #[test]
    fn test_parameters_follow_textual_order() {
        let query = compose(
            &ExportRequest::new("granules")
                .columns("granuleId")
                .filter("granules", "status = 'completed'")
                .filter("providers", "name = 'p1'")
                .filter("executions", "status = 'failed'")
                .limit(2),
        );
        assert!(query.sql.contains("WHERE providers.name = $1"));
        assert!(query.sql.contains("WHERE executions.status = $2"));
        assert!(query.sql.contains("WHERE granules.status = $3"));
        assert_eq!(query.args, args(&["p1", "failed", "completed"]));
    }

    #[test]
    fn test_executions_wildcard() {
        let query = compose(&ExportRequest::new("executions").limit(7));
        assert!(query.sql.contains("AS collection_ids USING (collection_cumulus_id)"));
        assert!(query.sql.contains("AS async_operation_ids USING (async_operation_cumulus_id)"));
        assert!(query.sql.contains("FROM executions LIMIT 7)"));
        assert_eq!(query.sql.matches("LIMIT").count(), 1);
    }

    #[test]
    fn test_qualified_projection_names() {
        let query = compose(
            &ExportRequest::new("granules")
                .columns("granules.status, collections.collection_id")
                .limit(1),
        );
        assert!(query.sql.contains("SELECT granules_cte.status, collection_id FROM granules_cte"));
        assert!(query.sql.contains("AS collection_ids"));
    }

    #[test]
    fn test_zero_limit_has_no_limit_clause() {
        let query = compose(&ExportRequest::new("collections").limit(0));
        assert_eq!(query.sql, "SELECT * FROM collections");
        assert_eq!(query.limit, None);
    }

    #[test]
    fn test_unknown_entity_is_rejected() {
        let err = QueryComposer::new()
            .compose(&ExportRequest::new("widgets"))
            .unwrap_err();
        assert!(matches!(err, ExportError::UnsupportedEntity(name) if name == "widgets"));
    }

    #[test]
    fn test_unregistered_entity_is_unsupported() {
        let mut composer = QueryComposer::empty();
        composer.register(Box::new(StandaloneStrategy::new(Entity::Providers)));
        assert!(composer.supports("providers"));
        assert!(!composer.supports("granules"));
        assert!(matches!(
            composer.compose(&ExportRequest::new("granules")),
            Err(ExportError::UnsupportedEntity(_))
        ));
        assert_eq!(StandaloneStrategy::new(Entity::Files).secondaries(), vec![]);
    }

    #[test]
    fn test_projection_errors() {
        assert!(matches!(
            build_error(&ExportRequest::new("granules").columns("bogus")),
            QueryBuildError::UnknownColumn { .. }
        ));
        assert!(matches!(
            build_error(&ExportRequest::new("granules").columns("widgets.name")),
            QueryBuildError::UnknownQualifier { .. }
        ));
        assert!(matches!(
            build_error(&ExportRequest::new("providers").columns("collection_id")),
            QueryBuildError::UnknownColumn { .. }
        ));
        assert_eq!(
            build_error(&ExportRequest::new("granules").columns("")),
            QueryBuildError::EmptyProjection
        );
    }

    #[test]
    fn test_filter_errors() {
        assert!(matches!(
            build_error(&ExportRequest::new("providers").filter("files", "type = 'data'")),
            QueryBuildError::UnknownFilterScope { .. }
        ));
        assert!(matches!(
            build_error(&ExportRequest::new("granules").filter("granules", "1 = 1")),
            QueryBuildError::UnreferencedFilter { .. }
        ));
        assert!(matches!(
            build_error(&ExportRequest::new("granules").filter("granules", "status = 'x'; DROP")),
            QueryBuildError::InvalidPredicate(_)
        ));
        assert!(matches!(
            build_error(&ExportRequest::new("granules").filter("granules", "status = 'x' AND providers.name = 'x'")),
            QueryBuildError::UnknownQualifier { .. }
        ));
    }

    #[test]
    fn test_blank_filters_are_ignored() {
        let query = compose(
            &ExportRequest::new("providers")
                .columns("name")
                .filter("providers", "  ")
                .limit(1),
        );
        assert_eq!(query.sql, "SELECT name FROM providers LIMIT 1");
    }
}
