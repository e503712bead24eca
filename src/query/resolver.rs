//! Join resolver
//!
//! Decides which secondary entities a request needs and builds their
//! fragments. Each secondary comes in two shapes:
//!
//! - **correlated**: a subquery joined onto the final statement, restricted to
//!   keys already present in the primary CTE;
//! - **pre-filter**: a CTE computed before the primary CTE and inner-joined by
//!   it, so the secondary's filter restricts which primary rows exist at all.
//!
//! One-to-many entities (executions, files) pre-filter to a key set only; the
//! aggregated column always comes from the correlated join so that a
//! granule's `files` stays complete and its `execution` stays the latest one.

use super::catalog::{self, Entity};
use super::fragment::{
    Cte, Distinct, Join, JoinConstraint, JoinKind, JoinTarget, Predicate, Projection, Select,
};
use super::params;

/// Join table linking granules to executions.
const GRANULE_EXECUTIONS: &str = "granules_executions";

/// A projected column resolved against the target entity's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    /// Entity the column comes from: the target itself or one of its secondaries.
    pub owner: Entity,
    pub column: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedProjection {
    Wildcard,
    Columns(Vec<ResolvedColumn>),
}

impl ResolvedProjection {
    fn owns(&self, entity: Entity) -> bool {
        match self {
            ResolvedProjection::Wildcard => true,
            ResolvedProjection::Columns(columns) => columns.iter().any(|c| c.owner == entity),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    ToOne,
    ToMany,
}

/// How a referenced secondary takes part in the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Correlated,
    PreFilter,
    /// One-to-many entity that is both filtered and projected.
    PreFilterAndCorrelated,
}

/// The primary relation secondary joins hang off.
#[derive(Debug, Clone, Copy)]
pub struct Anchor {
    pub entity: Entity,
}

impl Anchor {
    pub fn table(&self) -> &'static str {
        self.entity.table()
    }

    pub fn cte(&self) -> String {
        self.entity.cte_name()
    }

    pub fn key_alias(&self) -> &'static str {
        self.entity.key_alias()
    }
}

/// Fragment builder for one secondary entity.
pub trait SecondaryJoin: Send + Sync {
    fn entity(&self) -> Entity;

    fn cardinality(&self) -> Cardinality;

    /// Subquery joined onto the final statement.
    fn correlated(&self, anchor: &Anchor) -> Join;

    /// CTE holding the filtered secondary rows.
    fn prefilter(&self, predicate: Predicate) -> Cte;

    /// Inner join from the primary table onto the pre-filter CTE.
    fn prefilter_join(&self, anchor: &Anchor) -> Join;

    /// Columns the primary CTE carries over from the pre-filter CTE.
    fn prefilter_projection(&self) -> Vec<Projection>;
}

/// True when the projection is the wildcard, a projected column belongs to
/// `entity`, or `filter_text` mentions one of `entity`'s columns as a whole token.
pub fn is_referenced(
    projection: &ResolvedProjection,
    filter_text: Option<&str>,
    entity: Entity,
) -> bool {
    if projection.owns(entity) {
        return true;
    }
    // Untokenizable filters are rejected by the composer before resolution.
    filter_text
        .map(|text| {
            params::referenced_columns(text, entity)
                .map(|columns| !columns.is_empty())
                .unwrap_or(false)
        })
        .unwrap_or(false)
}

/// Decide the placement of a secondary, or `None` when it is not needed.
pub fn placement(
    join: &dyn SecondaryJoin,
    projection: &ResolvedProjection,
    filter_text: Option<&str>,
) -> Option<Placement> {
    let entity = join.entity();
    if !is_referenced(projection, filter_text, entity) {
        return None;
    }

    let filtered = filter_text.is_some_and(|text| !text.trim().is_empty());
    match (filtered, join.cardinality()) {
        (false, _) => Some(Placement::Correlated),
        (true, Cardinality::ToOne) => Some(Placement::PreFilter),
        (true, Cardinality::ToMany) if projection.owns(entity) => {
            Some(Placement::PreFilterAndCorrelated)
        }
        (true, Cardinality::ToMany) => Some(Placement::PreFilter),
    }
}

/// To-one secondary reached through a `<entity>_cumulus_id` column of the primary.
pub struct LookupJoin {
    entity: Entity,
    kind: JoinKind,
    value: &'static str,
    subquery_alias: &'static str,
}

impl LookupJoin {
    pub fn providers() -> Self {
        Self {
            entity: Entity::Providers,
            kind: JoinKind::Left,
            value: "providers.name",
            subquery_alias: "provider_names",
        }
    }

    pub fn collections() -> Self {
        Self {
            entity: Entity::Collections,
            kind: JoinKind::Inner,
            value: "collections.name || '___' || collections.version",
            subquery_alias: "collection_ids",
        }
    }

    pub fn pdrs() -> Self {
        Self {
            entity: Entity::Pdrs,
            kind: JoinKind::Left,
            value: "pdrs.name",
            subquery_alias: "pdr_names",
        }
    }

    pub fn async_operations() -> Self {
        Self {
            entity: Entity::AsyncOperations,
            kind: JoinKind::Left,
            value: "async_operations.id",
            subquery_alias: "async_operation_ids",
        }
    }

    fn alias(&self) -> &'static str {
        catalog::exposed_columns(self.entity)[0]
    }

    fn key_projection(&self) -> Vec<Projection> {
        let table = self.entity.table();
        vec![
            Projection::aliased(format!("{table}.cumulus_id"), self.entity.key_alias()),
            Projection::aliased(self.value, self.alias()),
        ]
    }
}

impl SecondaryJoin for LookupJoin {
    fn entity(&self) -> Entity {
        self.entity
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::ToOne
    }

    fn correlated(&self, anchor: &Anchor) -> Join {
        let table = self.entity.table();
        let foreign_key = self.entity.key_alias();
        let cte = anchor.cte();

        let mut query = Select::from(table, self.key_projection());
        query.distinct = Distinct::On(vec![format!("{table}.cumulus_id")]);
        query.joins.push(Join {
            kind: JoinKind::Inner,
            target: JoinTarget::Relation(cte.clone()),
            constraint: JoinConstraint::On(format!("{cte}.{foreign_key} = {table}.cumulus_id")),
        });

        Join {
            kind: self.kind,
            target: JoinTarget::Subquery {
                query: Box::new(query),
                alias: self.subquery_alias.to_string(),
            },
            constraint: JoinConstraint::Using(vec![foreign_key.to_string()]),
        }
    }

    fn prefilter(&self, predicate: Predicate) -> Cte {
        let mut query = Select::from(self.entity.table(), self.key_projection());
        query.filter = Some(predicate);
        Cte {
            name: self.entity.cte_name(),
            query,
        }
    }

    fn prefilter_join(&self, anchor: &Anchor) -> Join {
        let cte = self.entity.cte_name();
        let foreign_key = self.entity.key_alias();
        Join {
            kind: JoinKind::Inner,
            target: JoinTarget::Relation(cte.clone()),
            constraint: JoinConstraint::On(format!(
                "{cte}.{foreign_key} = {}.{foreign_key}",
                anchor.table()
            )),
        }
    }

    fn prefilter_projection(&self) -> Vec<Projection> {
        vec![Projection::expr(format!(
            "{}.{}",
            self.entity.cte_name(),
            self.alias()
        ))]
    }
}

/// Most recent execution URL of each granule.
pub struct LatestExecutionJoin;

impl SecondaryJoin for LatestExecutionJoin {
    fn entity(&self) -> Entity {
        Entity::Executions
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::ToMany
    }

    fn correlated(&self, anchor: &Anchor) -> Join {
        let cte = anchor.cte();
        let key = anchor.key_alias();
        let link_key = format!("{GRANULE_EXECUTIONS}.{key}");

        let mut query = Select::from(
            GRANULE_EXECUTIONS,
            vec![
                Projection::expr(link_key.clone()),
                Projection::aliased("executions.url", "execution"),
            ],
        );
        query.distinct = Distinct::On(vec![link_key.clone()]);
        query.joins.push(Join {
            kind: JoinKind::Inner,
            target: JoinTarget::Relation(cte.clone()),
            constraint: JoinConstraint::On(format!("{cte}.{key} = {link_key}")),
        });
        query.joins.push(execution_link_join());
        query.order_by = vec![link_key, "executions.timestamp DESC".to_string()];

        Join {
            kind: JoinKind::Left,
            target: JoinTarget::Subquery {
                query: Box::new(query),
                alias: "latest_executions".to_string(),
            },
            constraint: JoinConstraint::Using(vec![key.to_string()]),
        }
    }

    fn prefilter(&self, predicate: Predicate) -> Cte {
        let mut query = Select::from(
            GRANULE_EXECUTIONS,
            vec![Projection::expr(format!(
                "{GRANULE_EXECUTIONS}.{}",
                Entity::Granules.key_alias()
            ))],
        );
        query.distinct = Distinct::All;
        query.joins.push(execution_link_join());
        query.filter = Some(predicate);
        Cte {
            name: Entity::Executions.cte_name(),
            query,
        }
    }

    fn prefilter_join(&self, anchor: &Anchor) -> Join {
        key_set_join(Entity::Executions, anchor)
    }

    fn prefilter_projection(&self) -> Vec<Projection> {
        Vec::new()
    }
}

/// Ordered JSON array of each granule's file rows.
pub struct FileArrayJoin;

impl SecondaryJoin for FileArrayJoin {
    fn entity(&self) -> Entity {
        Entity::Files
    }

    fn cardinality(&self) -> Cardinality {
        Cardinality::ToMany
    }

    fn correlated(&self, anchor: &Anchor) -> Join {
        let cte = anchor.cte();
        let key = anchor.key_alias();

        let mut query = Select::from(
            "files",
            vec![
                Projection::expr(format!("files.{key}")),
                Projection::aliased("json_agg(files ORDER BY files.cumulus_id)", "files"),
            ],
        );
        query.joins.push(Join {
            kind: JoinKind::Inner,
            target: JoinTarget::Relation(cte.clone()),
            constraint: JoinConstraint::On(format!("{cte}.{key} = files.{key}")),
        });
        query.group_by = vec![format!("files.{key}")];

        Join {
            kind: JoinKind::Left,
            target: JoinTarget::Subquery {
                query: Box::new(query),
                alias: "file_arrays".to_string(),
            },
            constraint: JoinConstraint::Using(vec![key.to_string()]),
        }
    }

    fn prefilter(&self, predicate: Predicate) -> Cte {
        let mut query = Select::from(
            "files",
            vec![Projection::expr(format!(
                "files.{}",
                Entity::Granules.key_alias()
            ))],
        );
        query.distinct = Distinct::All;
        query.filter = Some(predicate);
        Cte {
            name: Entity::Files.cte_name(),
            query,
        }
    }

    fn prefilter_join(&self, anchor: &Anchor) -> Join {
        key_set_join(Entity::Files, anchor)
    }

    fn prefilter_projection(&self) -> Vec<Projection> {
        Vec::new()
    }
}

fn execution_link_join() -> Join {
    Join {
        kind: JoinKind::Inner,
        target: JoinTarget::Relation("executions".to_string()),
        constraint: JoinConstraint::On(format!(
            "executions.cumulus_id = {GRANULE_EXECUTIONS}.execution_cumulus_id"
        )),
    }
}

/// Inner join restricting the primary table to the keys of a one-to-many pre-filter.
fn key_set_join(entity: Entity, anchor: &Anchor) -> Join {
    let cte = entity.cte_name();
    Join {
        kind: JoinKind::Inner,
        target: JoinTarget::Relation(cte.clone()),
        constraint: JoinConstraint::On(format!(
            "{cte}.{} = {}.cumulus_id",
            anchor.key_alias(),
            anchor.table()
        )),
    }
}
