//! Query composer
//!
//! Turns an [`ExportRequest`] into one parameterized statement. Composition is
//! dispatched through a registry keyed by entity: every exportable entity has
//! a [`CompositionStrategy`], and adding an entity means registering one more.
//!
//! Two statement forms come out of a strategy:
//!
//! - plain, when no secondary entity is referenced:
//!   `SELECT <cols> FROM <table> [WHERE ...] [LIMIT n]`
//! - joined: pre-filter CTEs, then the primary CTE, then a final `SELECT`
//!   over the primary CTE with the correlated joins in fixed order.
//!
//! The limit appears once. It stays in the primary CTE unless a one-to-many
//! entity takes part, in which case it moves to the final statement.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{ExportError, QueryBuildError, Result};

use super::catalog::{self, Entity};
use super::fragment::{self, Predicate, Projection, Select, Statement};
use super::params::{self, Parameters, QueryArg};
use super::request::{ColumnSelection, ExportRequest};
use super::resolver::{
    self, Anchor, Cardinality, FileArrayJoin, LatestExecutionJoin, LookupJoin, Placement,
    ResolvedColumn, ResolvedProjection, SecondaryJoin,
};

/// A statement ready for the streamer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedQuery {
    pub entity: Entity,
    pub sql: String,
    /// Literal values, in placeholder order
    pub args: Vec<QueryArg>,
    /// Row cap carried by the statement
    pub limit: Option<u64>,
    pub batch_size: usize,
}

/// Statement tree plus its arguments, before rendering.
#[derive(Debug, Clone)]
pub struct Composition {
    pub statement: Statement,
    pub args: Vec<QueryArg>,
}

/// Per-entity composition.
pub trait CompositionStrategy: Send + Sync {
    /// Entity this strategy composes statements for
    fn entity(&self) -> Entity;

    /// Secondary entities that may be joined onto the target, in assembly order
    fn secondaries(&self) -> Vec<Entity>;

    fn compose(&self, request: &ExportRequest) -> std::result::Result<Composition, QueryBuildError>;
}

/// Entity with no secondaries: always the plain form.
pub struct StandaloneStrategy {
    entity: Entity,
}

impl StandaloneStrategy {
    pub fn new(entity: Entity) -> Self {
        Self { entity }
    }
}

impl CompositionStrategy for StandaloneStrategy {
    fn entity(&self) -> Entity {
        self.entity
    }

    fn secondaries(&self) -> Vec<Entity> {
        Vec::new()
    }

    fn compose(&self, request: &ExportRequest) -> std::result::Result<Composition, QueryBuildError> {
        let projection = resolve_projection(self.entity, &[], &request.columns)?;
        let filters = validate_filters(self.entity, &[], &request.filters)?;
        plain_statement(self.entity, &projection, &filters, request.row_cap())
    }
}

/// Entity enriched by secondary joins.
pub struct EnrichedStrategy {
    entity: Entity,
    joins: Vec<Box<dyn SecondaryJoin>>,
}

impl EnrichedStrategy {
    /// # Arguments
    /// * `entity` - Target entity
    /// * `joins` - Secondary join builders; sorted into assembly order here
    pub fn new(entity: Entity, mut joins: Vec<Box<dyn SecondaryJoin>>) -> Self {
        joins.sort_by_key(|join| join.entity());
        Self { entity, joins }
    }

    pub fn granules() -> Self {
        Self::new(
            Entity::Granules,
            vec![
                Box::new(LookupJoin::providers()),
                Box::new(LookupJoin::collections()),
                Box::new(LookupJoin::pdrs()),
                Box::new(LatestExecutionJoin),
                Box::new(FileArrayJoin),
            ],
        )
    }

    pub fn pdrs() -> Self {
        Self::new(
            Entity::Pdrs,
            vec![
                Box::new(LookupJoin::providers()),
                Box::new(LookupJoin::collections()),
            ],
        )
    }

    pub fn executions() -> Self {
        Self::new(
            Entity::Executions,
            vec![
                Box::new(LookupJoin::collections()),
                Box::new(LookupJoin::async_operations()),
            ],
        )
    }
}

impl CompositionStrategy for EnrichedStrategy {
    fn entity(&self) -> Entity {
        self.entity
    }

    fn secondaries(&self) -> Vec<Entity> {
        self.joins.iter().map(|join| join.entity()).collect()
    }

    fn compose(&self, request: &ExportRequest) -> std::result::Result<Composition, QueryBuildError> {
        let secondaries = self.secondaries();
        let projection = resolve_projection(self.entity, &secondaries, &request.columns)?;
        let filters = validate_filters(self.entity, &secondaries, &request.filters)?;

        let placed: Vec<(&dyn SecondaryJoin, Placement)> = self
            .joins
            .iter()
            .filter_map(|join| {
                let filter = filters.get(&join.entity()).map(String::as_str);
                resolver::placement(join.as_ref(), &projection, filter)
                    .map(|placement| (join.as_ref(), placement))
            })
            .collect();

        if placed.is_empty() {
            return plain_statement(self.entity, &projection, &filters, request.row_cap());
        }

        let anchor = Anchor {
            entity: self.entity,
        };
        let table = anchor.table();
        let mut params = Parameters::new();
        let mut ctes = Vec::new();

        let mut primary = Select::from(
            table,
            vec![
                Projection::expr(format!("{table}.*")),
                Projection::aliased(format!("{table}.cumulus_id"), anchor.key_alias()),
            ],
        );

        for (join, placement) in &placed {
            if *placement == Placement::Correlated {
                continue;
            }
            let scope = join.entity();
            let predicate = filters
                .get(&scope)
                .ok_or_else(|| QueryBuildError::InvalidPredicate(format!("no filter for {scope}")))?;
            let bound = params::bind_predicate(predicate, scope, Some(scope.table()), &mut params)?;
            ctes.push(join.prefilter(Predicate(bound.text)));
            primary.joins.push(join.prefilter_join(&anchor));
            primary.projection.extend(join.prefilter_projection());
        }

        if let Some(predicate) = filters.get(&self.entity) {
            let bound = params::bind_predicate(predicate, self.entity, Some(table), &mut params)?;
            primary.filter = Some(Predicate(bound.text));
        }

        let expands = placed
            .iter()
            .any(|(join, _)| join.cardinality() == Cardinality::ToMany);

        let cte_name = anchor.cte();
        let mut body = Select::from(cte_name.clone(), final_projection(self.entity, &cte_name, &projection));
        body.joins = placed
            .iter()
            .filter(|(_, placement)| *placement != Placement::PreFilter)
            .map(|(join, _)| join.correlated(&anchor))
            .collect();

        if expands {
            body.limit = request.row_cap();
        } else {
            primary.limit = request.row_cap();
        }

        ctes.push(fragment::Cte {
            name: cte_name,
            query: primary,
        });

        Ok(Composition {
            statement: Statement { ctes, body },
            args: params.into_args(),
        })
    }
}

/// Registry of composition strategies keyed by entity.
pub struct QueryComposer {
    strategies: BTreeMap<Entity, Box<dyn CompositionStrategy>>,
}

impl QueryComposer {
    /// A composer with no strategy registered.
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// A composer for every exportable entity.
    pub fn new() -> Self {
        let mut composer = Self::empty();
        composer.register(Box::new(EnrichedStrategy::granules()));
        composer.register(Box::new(EnrichedStrategy::pdrs()));
        composer.register(Box::new(EnrichedStrategy::executions()));
        for entity in [
            Entity::Collections,
            Entity::Providers,
            Entity::Files,
            Entity::AsyncOperations,
        ] {
            composer.register(Box::new(StandaloneStrategy::new(entity)));
        }
        composer
    }

    /// Register or replace the strategy for its entity.
    pub fn register(&mut self, strategy: Box<dyn CompositionStrategy>) {
        self.strategies.insert(strategy.entity(), strategy);
    }

    pub fn supports(&self, entity: &str) -> bool {
        Entity::from_name(entity).is_some_and(|e| self.strategies.contains_key(&e))
    }

    /// Compose the statement for a request.
    ///
    /// # Returns
    /// * `Result<ComposedQuery>` - Rendered SQL and its arguments, or
    ///   `UnsupportedEntity` / `QueryBuild` before any I/O happens
    pub fn compose(&self, request: &ExportRequest) -> Result<ComposedQuery> {
        let (entity, strategy) = Entity::from_name(&request.entity)
            .and_then(|entity| self.strategies.get(&entity).map(|s| (entity, s)))
            .ok_or_else(|| ExportError::UnsupportedEntity(request.entity.clone()))?;

        let composition = strategy.compose(request)?;
        let sql = fragment::render(&composition.statement);
        debug!(
            "Composed {} statement with {} argument(s): {}",
            entity,
            composition.args.len(),
            sql
        );

        Ok(ComposedQuery {
            entity,
            sql,
            args: composition.args,
            limit: request.row_cap(),
            batch_size: request.batch_size,
        })
    }
}

impl Default for QueryComposer {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve requested names against the target's view.
///
/// A name may be a primary storage column, a column exposed by one of
/// `secondaries`, either qualified as `entity.column`, or an external field
/// name translating to one of those.
fn resolve_projection(
    entity: Entity,
    secondaries: &[Entity],
    selection: &ColumnSelection,
) -> std::result::Result<ResolvedProjection, QueryBuildError> {
    let names = match selection {
        ColumnSelection::All => return Ok(ResolvedProjection::Wildcard),
        ColumnSelection::Columns(names) if names.is_empty() => {
            return Err(QueryBuildError::EmptyProjection);
        }
        ColumnSelection::Columns(names) => names,
    };

    let mut resolved: Vec<ResolvedColumn> = Vec::with_capacity(names.len());
    for name in names {
        let column = match name.split_once('.') {
            Some((qualifier, column)) => {
                resolve_qualified(entity, secondaries, qualifier.trim(), column.trim())?
            }
            None => resolve_bare(entity, secondaries, name.trim())?,
        };
        if !resolved.contains(&column) {
            resolved.push(column);
        }
    }
    Ok(ResolvedProjection::Columns(resolved))
}

fn resolve_bare(
    entity: Entity,
    secondaries: &[Entity],
    name: &str,
) -> std::result::Result<ResolvedColumn, QueryBuildError> {
    if let Some(column) = catalog::resolve_column(entity, name) {
        return Ok(ResolvedColumn {
            owner: entity,
            column,
        });
    }
    secondaries
        .iter()
        .find_map(|secondary| {
            exposed_column(*secondary, name).map(|column| ResolvedColumn {
                owner: *secondary,
                column,
            })
        })
        .ok_or_else(|| QueryBuildError::UnknownColumn {
            entity: entity.name().to_string(),
            column: name.to_string(),
        })
}

fn resolve_qualified(
    entity: Entity,
    secondaries: &[Entity],
    qualifier: &str,
    name: &str,
) -> std::result::Result<ResolvedColumn, QueryBuildError> {
    let unknown_column = |owner: Entity| QueryBuildError::UnknownColumn {
        entity: owner.name().to_string(),
        column: name.to_string(),
    };

    match Entity::from_name(qualifier) {
        Some(owner) if owner == entity => catalog::resolve_column(entity, name)
            .map(|column| ResolvedColumn { owner, column })
            .ok_or_else(|| unknown_column(owner)),
        Some(owner) if secondaries.contains(&owner) => exposed_column(owner, name)
            .map(|column| ResolvedColumn { owner, column })
            .ok_or_else(|| unknown_column(owner)),
        _ => Err(QueryBuildError::UnknownQualifier {
            qualifier: qualifier.to_string(),
            column: name.to_string(),
        }),
    }
}

fn exposed_column(entity: Entity, name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    let storage = catalog::to_storage_column(name);
    catalog::exposed_columns(entity)
        .iter()
        .find(|column| **column == lower || **column == storage)
        .copied()
}

/// Check every filter scope and drop blank predicates.
fn validate_filters(
    entity: Entity,
    secondaries: &[Entity],
    filters: &BTreeMap<String, String>,
) -> std::result::Result<BTreeMap<Entity, String>, QueryBuildError> {
    let mut validated = BTreeMap::new();
    for (scope_name, predicate) in filters {
        if predicate.trim().is_empty() {
            continue;
        }
        let scope = Entity::from_name(scope_name)
            .filter(|scope| *scope == entity || secondaries.contains(scope))
            .ok_or_else(|| QueryBuildError::UnknownFilterScope {
                entity: entity.name().to_string(),
                scope: scope_name.clone(),
            })?;

        if params::referenced_columns(predicate, scope)?.is_empty() {
            return Err(QueryBuildError::UnreferencedFilter {
                scope: scope.name().to_string(),
                predicate: predicate.clone(),
            });
        }
        validated.insert(scope, predicate.clone());
    }
    Ok(validated)
}

fn plain_statement(
    entity: Entity,
    projection: &ResolvedProjection,
    filters: &BTreeMap<Entity, String>,
    limit: Option<u64>,
) -> std::result::Result<Composition, QueryBuildError> {
    let projection = match projection {
        ResolvedProjection::Wildcard => vec![Projection::Wildcard],
        ResolvedProjection::Columns(columns) => columns
            .iter()
            .map(|column| Projection::expr(column.column))
            .collect(),
    };

    let mut params = Parameters::new();
    let mut body = Select::from(entity.table(), projection);
    if let Some(predicate) = filters.get(&entity) {
        let bound = params::bind_predicate(predicate, entity, None, &mut params)?;
        body.filter = Some(Predicate(bound.text));
    }
    body.limit = limit;

    Ok(Composition {
        statement: Statement {
            ctes: Vec::new(),
            body,
        },
        args: params.into_args(),
    })
}

fn final_projection(
    entity: Entity,
    cte_name: &str,
    projection: &ResolvedProjection,
) -> Vec<Projection> {
    match projection {
        ResolvedProjection::Wildcard => vec![Projection::Wildcard],
        ResolvedProjection::Columns(columns) => columns
            .iter()
            .map(|column| {
                if column.owner == entity {
                    Projection::expr(format!("{cte_name}.{}", column.column))
                } else {
                    Projection::expr(column.column)
                }
            })
            .collect(),
    }
}
