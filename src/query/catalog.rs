//! Schema catalog
//!
//! Static description of the exportable entities: their tables, storage
//! columns, the columns each one contributes when joined onto another
//! entity's view, and the reversible mapping between external (API) field
//! names and storage column names.

use std::fmt;

/// An exportable entity of the metadata store.
///
/// Variant order is the fixed assembly order of secondary joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Providers,
    Collections,
    Pdrs,
    Executions,
    Files,
    AsyncOperations,
    Granules,
}

const GRANULE_COLUMNS: &[&str] = &[
    "cumulus_id",
    "granule_id",
    "status",
    "collection_cumulus_id",
    "provider_cumulus_id",
    "pdr_cumulus_id",
    "created_at",
    "updated_at",
    "published",
    "duration",
    "time_to_archive",
    "time_to_process",
    "product_volume",
    "error",
    "cmr_link",
    "beginning_date_time",
    "ending_date_time",
    "last_update_date_time",
    "processing_end_date_time",
    "processing_start_date_time",
    "production_date_time",
    "query_fields",
    "timestamp",
];

const COLLECTION_COLUMNS: &[&str] = &[
    "cumulus_id",
    "name",
    "version",
    "sample_file_name",
    "granule_id_validation_regex",
    "granule_id_extraction_regex",
    "files",
    "process",
    "url_path",
    "duplicate_handling",
    "report_to_ems",
    "ignore_files_config_for_discovery",
    "meta",
    "tags",
    "created_at",
    "updated_at",
];

const PROVIDER_COLUMNS: &[&str] = &[
    "cumulus_id",
    "id",
    "name",
    "protocol",
    "host",
    "port",
    "username",
    "password",
    "global_connection_limit",
    "private_key",
    "cm_key_id",
    "certificate_uri",
    "created_at",
    "updated_at",
    "allowed_redirects",
    "max_download_time",
];

const PDR_COLUMNS: &[&str] = &[
    "cumulus_id",
    "collection_cumulus_id",
    "provider_cumulus_id",
    "execution_cumulus_id",
    "status",
    "name",
    "progress",
    "pan_sent",
    "pan_message",
    "stats",
    "address",
    "original_url",
    "duration",
    "timestamp",
    "created_at",
    "updated_at",
];

const EXECUTION_COLUMNS: &[&str] = &[
    "cumulus_id",
    "arn",
    "async_operation_cumulus_id",
    "collection_cumulus_id",
    "parent_cumulus_id",
    "cumulus_version",
    "url",
    "status",
    "tasks",
    "error",
    "workflow_name",
    "duration",
    "original_payload",
    "final_payload",
    "timestamp",
    "created_at",
    "updated_at",
];

const FILE_COLUMNS: &[&str] = &[
    "cumulus_id",
    "granule_cumulus_id",
    "created_at",
    "updated_at",
    "file_size",
    "bucket",
    "checksum_type",
    "checksum_value",
    "file_name",
    "key",
    "path",
    "source",
    "type",
];

const ASYNC_OPERATION_COLUMNS: &[&str] = &[
    "cumulus_id",
    "id",
    "description",
    "operation_type",
    "output",
    "status",
    "task_arn",
    "created_at",
    "updated_at",
];

/// External field names of the granule API model.
///
/// These are the only names that translate between external and storage form.
const EXTERNAL_FIELDS: &[&str] = &[
    "beginningDateTime",
    "cmrLink",
    "collectionId",
    "createdAt",
    "duration",
    "endingDateTime",
    "error",
    "execution",
    "files",
    "granuleId",
    "lastUpdateDateTime",
    "pdrName",
    "processingEndDateTime",
    "processingStartDateTime",
    "productVolume",
    "productionDateTime",
    "provider",
    "published",
    "queryFields",
    "status",
    "timeToArchive",
    "timeToPreprocess",
    "timestamp",
    "updatedAt",
];

impl Entity {
    /// Every entity, in assembly order.
    pub const ALL: [Entity; 7] = [
        Entity::Providers,
        Entity::Collections,
        Entity::Pdrs,
        Entity::Executions,
        Entity::Files,
        Entity::AsyncOperations,
        Entity::Granules,
    ];

    /// Parse an entity tag as used in requests and filter scopes.
    pub fn from_name(name: &str) -> Option<Entity> {
        let name = name.trim().to_ascii_lowercase();
        Entity::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Request tag, which is also the table name.
    pub fn name(self) -> &'static str {
        match self {
            Entity::Granules => "granules",
            Entity::Collections => "collections",
            Entity::Providers => "providers",
            Entity::Pdrs => "pdrs",
            Entity::Executions => "executions",
            Entity::Files => "files",
            Entity::AsyncOperations => "async_operations",
        }
    }

    pub fn table(self) -> &'static str {
        self.name()
    }

    /// Name of the CTE holding this entity's rows inside a composed statement.
    pub fn cte_name(self) -> String {
        format!("{}_cte", self.name())
    }

    /// Column name the entity's `cumulus_id` takes when carried by another relation.
    pub fn key_alias(self) -> &'static str {
        match self {
            Entity::Granules => "granule_cumulus_id",
            Entity::Collections => "collection_cumulus_id",
            Entity::Providers => "provider_cumulus_id",
            Entity::Pdrs => "pdr_cumulus_id",
            Entity::Executions => "execution_cumulus_id",
            Entity::Files => "file_cumulus_id",
            Entity::AsyncOperations => "async_operation_cumulus_id",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Storage columns of an entity's table.
pub fn columns_of(entity: Entity) -> &'static [&'static str] {
    match entity {
        Entity::Granules => GRANULE_COLUMNS,
        Entity::Collections => COLLECTION_COLUMNS,
        Entity::Providers => PROVIDER_COLUMNS,
        Entity::Pdrs => PDR_COLUMNS,
        Entity::Executions => EXECUTION_COLUMNS,
        Entity::Files => FILE_COLUMNS,
        Entity::AsyncOperations => ASYNC_OPERATION_COLUMNS,
    }
}

/// Columns an entity contributes to another entity's view when joined as a secondary.
pub fn exposed_columns(entity: Entity) -> &'static [&'static str] {
    match entity {
        Entity::Providers => &["provider"],
        Entity::Collections => &["collection_id"],
        Entity::Pdrs => &["pdr_name"],
        Entity::Executions => &["execution"],
        Entity::Files => &["files"],
        Entity::AsyncOperations => &["async_operation_id"],
        Entity::Granules => &[],
    }
}

/// Whether `column` (lowercase) is a storage column of `entity`.
pub fn is_column(entity: Entity, column: &str) -> bool {
    columns_of(entity).contains(&column)
}

/// Translate an external field name to its storage column.
///
/// Returns an empty string for names outside the external field set.
pub fn to_storage_column(external_field: &str) -> String {
    if !EXTERNAL_FIELDS.contains(&external_field) {
        return String::new();
    }

    let mut column = String::with_capacity(external_field.len() + 4);
    for ch in external_field.chars() {
        if ch.is_ascii_uppercase() {
            column.push('_');
            column.push(ch.to_ascii_lowercase());
        } else {
            column.push(ch);
        }
    }
    column
}

/// Translate a storage column to its external field name.
///
/// Returns an empty string when the camel-cased name is not an external field.
pub fn to_external_field(storage_column: &str) -> String {
    let mut field = String::with_capacity(storage_column.len());
    let mut upper_next = false;
    for ch in storage_column.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            field.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            field.push(ch);
        }
    }

    if EXTERNAL_FIELDS.contains(&field.as_str()) {
        field
    } else {
        String::new()
    }
}

/// Resolve a bare name against an entity's storage columns.
///
/// Accepts the storage spelling (any case) or a translatable external field name.
pub fn resolve_column(entity: Entity, name: &str) -> Option<&'static str> {
    let lower = name.to_ascii_lowercase();
    if let Some(col) = columns_of(entity).iter().find(|c| **c == lower) {
        return Some(*col);
    }
    let storage = to_storage_column(name);
    columns_of(entity).iter().find(|c| **c == storage).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_round_trip_names() {
        for entity in Entity::ALL {
            assert_eq!(Entity::from_name(entity.name()), Some(entity));
        }
        assert_eq!(Entity::from_name(" Granules "), Some(Entity::Granules));
        assert_eq!(Entity::from_name("rules"), None);
    }

    #[test]
    fn test_external_to_storage() {
        assert_eq!(to_storage_column("beginningDateTime"), "beginning_date_time");
        assert_eq!(to_storage_column("collectionId"), "collection_id");
        assert_eq!(to_storage_column("status"), "status");
        assert_eq!(to_storage_column("fieldTwo"), "");
        assert_eq!(to_storage_column("something_else"), "");
    }

    #[test]
    fn test_storage_to_external() {
        assert_eq!(to_external_field("pdr_name"), "pdrName");
        assert_eq!(to_external_field("granule_id"), "granuleId");
        assert_eq!(to_external_field("cumulus_id"), "");
        assert_eq!(to_external_field("file_size"), "");
    }

    #[test]
    fn test_mapping_is_reversible_for_external_fields() {
        for field in EXTERNAL_FIELDS {
            let column = to_storage_column(field);
            assert_eq!(to_external_field(&column), *field);
        }
    }

    #[test]
    fn test_resolve_column_accepts_both_spellings() {
        assert_eq!(resolve_column(Entity::Granules, "granuleId"), Some("granule_id"));
        assert_eq!(resolve_column(Entity::Granules, "STATUS"), Some("status"));
        assert_eq!(resolve_column(Entity::Granules, "protocol"), None);
        assert_eq!(resolve_column(Entity::Providers, "protocol"), Some("protocol"));
    }

    #[test]
    fn test_exposed_columns_are_not_storage_columns_of_granules() {
        for entity in Entity::ALL {
            for col in exposed_columns(entity) {
                assert!(!is_column(Entity::Granules, col), "{col} collides");
            }
        }
    }
}
