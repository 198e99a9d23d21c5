//! SQLite implementation of [`AttrStore`].
//!
//! Every write runs in a transaction. Catalog objects are stored as JSON
//! TEXT columns; attribute values use one typed column per slot plus the
//! formatted text used for lookups. Unique values are indexed in
//! `plain_attr_unique_values`, whose `UNIQUE(schema_key, formatted)`
//! constraint backs the commit-time duplicate check.
//!
//! Attribute rows carry a blake3 content hash so [`SqliteStore::save_any`]
//! only rewrites the attributes that changed.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use anyattr_core::{
    Any, AnyDetails, AnyKey, AnyType, AnyTypeClass, AnyTypeKind, AttrSchemaType, AttrValue, CoreError,
    ExternalResource, MembershipKey, PlainAttr, PlainSchema, Schema, SchemaRegistry,
};

use crate::convert::{
    decompose, detach_class, recompose, unique_entries, unique_token, AnyRecord, AttrSlot, DecomposedAny,
    MembershipRecord, PlainAttrRecord,
};
use crate::dirty::compute_dirty_set;
use crate::error::StorageError;
use crate::hash::hash_attrs;
use crate::traits::AttrStore;
use crate::types::{AnySummary, StorageKind};

/// Drops unique index rows no longer backed by a stored unique value.
const PRUNE_UNIQUE_VALUES: &str = "DELETE FROM plain_attr_unique_values WHERE NOT EXISTS (
    SELECT 1 FROM plain_attrs pa JOIN plain_attr_values v ON v.attr_id = pa.id
    WHERE pa.any_key = plain_attr_unique_values.any_key
      AND pa.schema_key = plain_attr_unique_values.schema_key
      AND v.is_unique = 1
      AND v.formatted = plain_attr_unique_values.formatted)";

/// Relational [`AttrStore`] over one SQLite connection.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) a database at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        Ok(SqliteStore { conn })
    }

    /// Opens a private in-memory database with migrations applied.
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore { conn })
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    /// Runs a `SELECT EXISTS(...)` query bound to `key`.
    fn exists(tx: &Connection, sql: &str, key: &str) -> Result<bool, StorageError> {
        Ok(tx.query_row(sql, params![key], |row| row.get(0))?)
    }

    /// References an owner makes must exist before it is written.
    fn check_references(tx: &Transaction<'_>, record: &AnyRecord) -> Result<(), StorageError> {
        if !Self::exists(tx, "SELECT EXISTS(SELECT 1 FROM any_types WHERE key = ?1)", &record.any_type)? {
            return Err(CoreError::AnyTypeNotFound {
                key: record.any_type.clone(),
            }
            .into());
        }
        for class in &record.aux_classes {
            if !Self::exists(tx, "SELECT EXISTS(SELECT 1 FROM any_type_classes WHERE key = ?1)", class)? {
                return Err(CoreError::ClassNotFound { key: class.clone() }.into());
            }
        }
        for resource in &record.resources {
            if !Self::exists(tx, "SELECT EXISTS(SELECT 1 FROM resources WHERE key = ?1)", resource)? {
                return Err(StorageError::ResourceNotFound(resource.clone()));
            }
        }
        for m in &record.memberships {
            let is_group = Self::exists(
                tx,
                "SELECT EXISTS(SELECT 1 FROM anys WHERE key = ?1 AND kind = 'GROUP')",
                &m.group.to_string(),
            )?;
            if !is_group {
                return Err(StorageError::AnyNotFound(m.group));
            }
        }
        Ok(())
    }

    /// Rejects a unique value already held by another owner. The table's
    /// UNIQUE constraint still guards the insert; this check only turns a
    /// conflict into [`StorageError::Duplicate`] before anything is written.
    fn check_unique(tx: &Transaction<'_>, any: &Any) -> Result<(), StorageError> {
        let mut stmt = tx.prepare_cached(
            "SELECT any_key FROM plain_attr_unique_values WHERE schema_key = ?1 AND formatted = ?2",
        )?;
        let me = any.key().to_string();
        for (schema, token) in unique_entries(any) {
            let holder: Option<String> = stmt.query_row(params![schema, token], |row| row.get(0)).optional()?;
            if holder.is_some_and(|h| h != me) {
                return Err(StorageError::Duplicate { schema, value: token });
            }
        }
        Ok(())
    }

    /// Upserts the `anys` row, keeping the key so child rows are untouched.
    fn write_any_row(tx: &Transaction<'_>, record: &AnyRecord, kind: AnyTypeKind) -> Result<(), StorageError> {
        let date = |d: Option<DateTime<Utc>>| d.map(|d| d.to_rfc3339_opts(SecondsFormat::AutoSi, true));
        tx.execute(
            "INSERT INTO anys (key, kind, any_type, realm, name, status, creator, creation_date, last_modifier, last_change_date, details_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(key) DO UPDATE SET
                kind = excluded.kind, any_type = excluded.any_type, realm = excluded.realm,
                name = excluded.name, status = excluded.status, creator = excluded.creator,
                creation_date = excluded.creation_date, last_modifier = excluded.last_modifier,
                last_change_date = excluded.last_change_date, details_json = excluded.details_json",
            params![
                record.key.to_string(),
                kind.as_str(),
                record.any_type,
                record.realm,
                record.name(),
                record.status,
                record.creator,
                date(record.creation_date),
                record.last_modifier,
                date(record.last_change_date),
                serde_json::to_string(&record.details)?,
            ],
        )?;

        let key = record.key.to_string();
        tx.execute("DELETE FROM any_aux_classes WHERE any_key = ?1", params![key])?;
        for (i, class) in record.aux_classes.iter().enumerate() {
            tx.execute(
                "INSERT INTO any_aux_classes (any_key, class_key, position) VALUES (?1, ?2, ?3)",
                params![key, class, i as i64],
            )?;
        }
        tx.execute("DELETE FROM any_resources WHERE any_key = ?1", params![key])?;
        for (i, resource) in record.resources.iter().enumerate() {
            tx.execute(
                "INSERT INTO any_resources (any_key, resource_key, position) VALUES (?1, ?2, ?3)",
                params![key, resource, i as i64],
            )?;
        }
        tx.execute("DELETE FROM memberships WHERE any_key = ?1", params![key])?;
        for (i, m) in record.memberships.iter().enumerate() {
            tx.execute(
                "INSERT INTO memberships (key, any_key, group_key, position) VALUES (?1, ?2, ?3, ?4)",
                params![m.key.to_string(), key, m.group.to_string(), i as i64],
            )?;
        }
        Ok(())
    }

    /// Rewrites the attribute rows whose content hash changed.
    fn write_attrs(tx: &Transaction<'_>, any: &Any, records: &[PlainAttrRecord]) -> Result<(), StorageError> {
        let key = any.key().to_string();

        let mut previous = BTreeMap::new();
        {
            let mut stmt = tx.prepare_cached(
                "SELECT membership_key, schema_key, content_hash FROM plain_attrs WHERE any_key = ?1",
            )?;
            let rows = stmt.query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?;
            for row in rows {
                let (membership, schema, hash) = row?;
                let hash = blake3::Hash::from_hex(&hash).map_err(|e| StorageError::ReconstructionError {
                    reason: format!("bad content hash for '{}': {}", schema, e),
                })?;
                previous.insert(
                    AttrSlot {
                        membership: parse_membership(&membership)?,
                        schema,
                    },
                    hash,
                );
            }
        }
        let current = hash_attrs(records)?;
        let dirty = compute_dirty_set(&previous, &current);
        debug!(
            any = %key,
            new = dirty.new.len(),
            modified = dirty.modified.len(),
            removed = dirty.removed.len(),
            "saving attributes"
        );

        {
            let mut delete = tx.prepare_cached(
                "DELETE FROM plain_attrs WHERE any_key = ?1 AND membership_key = ?2 AND schema_key = ?3",
            )?;
            for slot in dirty.removed.iter().chain(&dirty.modified) {
                delete.execute(params![key, membership_column(slot.membership), slot.schema])?;
            }
        }

        let to_write = dirty.needs_write();
        let attrs: Vec<&PlainAttr> = any.all_plain_attrs().collect();
        for (position, (record, attr)) in records.iter().zip(attrs).enumerate() {
            let slot = record.slot();
            let membership = membership_column(slot.membership);
            if !to_write.contains(&slot) {
                tx.execute(
                    "UPDATE plain_attrs SET position = ?1 WHERE any_key = ?2 AND membership_key = ?3 AND schema_key = ?4",
                    params![position as i64, key, membership, slot.schema],
                )?;
                continue;
            }

            tx.execute(
                "INSERT INTO plain_attrs (any_key, membership_key, schema_key, schema_type, position, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    key,
                    membership,
                    record.schema,
                    record.ty.as_str(),
                    position as i64,
                    current[&slot].to_hex().to_string(),
                ],
            )?;
            let attr_id = tx.last_insert_rowid();
            if attr.schema().is_none() {
                continue;
            }
            let values = record
                .values
                .iter()
                .map(|v| (v, false))
                .chain(record.unique_value.iter().map(|v| (v, true)));
            for (i, (value, is_unique)) in values.enumerate() {
                insert_value(tx, attr_id, i, value, is_unique)?;
            }
        }

        tx.execute("DELETE FROM plain_attr_unique_values WHERE any_key = ?1", params![key])?;
        for (schema, token) in unique_entries(any) {
            tx.execute(
                "INSERT INTO plain_attr_unique_values (schema_key, formatted, any_key) VALUES (?1, ?2, ?3)",
                params![schema, token, key],
            )?;
        }
        Ok(())
    }

    /// Loads the owner row with its classes, resources and memberships.
    fn load_record(&self, key: AnyKey) -> Result<AnyRecord, StorageError> {
        let k = key.to_string();
        let row = self
            .conn
            .query_row(
                "SELECT any_type, realm, status, creator, creation_date, last_modifier, last_change_date, details_json
                 FROM anys WHERE key = ?1",
                params![k],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()?
            .ok_or(StorageError::AnyNotFound(key))?;
        let (any_type, realm, status, creator, creation_date, last_modifier, last_change_date, details_json) = row;
        let details: AnyDetails = serde_json::from_str(&details_json)?;

        let aux_classes = self.strings(
            "SELECT class_key FROM any_aux_classes WHERE any_key = ?1 ORDER BY position",
            &k,
        )?;
        let resources = self.strings(
            "SELECT resource_key FROM any_resources WHERE any_key = ?1 ORDER BY position",
            &k,
        )?;
        let mut memberships = Vec::new();
        {
            let mut stmt = self
                .conn
                .prepare_cached("SELECT key, group_key FROM memberships WHERE any_key = ?1 ORDER BY position")?;
            let rows = stmt.query_map(params![k], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                let (m, group) = row?;
                memberships.push(MembershipRecord {
                    key: parse_uuid::<MembershipKey>(&m)?,
                    group: parse_uuid::<AnyKey>(&group)?,
                });
            }
        }

        Ok(AnyRecord {
            key,
            any_type,
            realm,
            status,
            creator,
            creation_date: parse_utc(creation_date)?,
            last_modifier,
            last_change_date: parse_utc(last_change_date)?,
            details,
            aux_classes,
            resources,
            memberships,
        })
    }

    /// Loads the attribute rows of one owner in position order.
    fn load_attr_records(&self, key: AnyKey) -> Result<Vec<PlainAttrRecord>, StorageError> {
        let mut attrs = Vec::new();
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, membership_key, schema_key, schema_type FROM plain_attrs WHERE any_key = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![key.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        for row in rows {
            let (id, membership, schema, ty) = row?;
            let ty = AttrSchemaType::from_str(&ty).map_err(|reason| StorageError::ReconstructionError { reason })?;
            let mut record = PlainAttrRecord {
                schema,
                ty,
                membership: parse_membership(&membership)?,
                values: Vec::new(),
                unique_value: None,
            };
            for (value, is_unique) in self.load_values(id)? {
                if is_unique {
                    record.unique_value = Some(value);
                } else {
                    record.values.push(value);
                }
            }
            attrs.push(record);
        }
        Ok(attrs)
    }

    /// Values of one attribute row, each flagged when it is the unique value.
    fn load_values(&self, attr_id: i64) -> Result<Vec<(AttrValue, bool)>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT is_unique, string_value, date_value, boolean_value, long_value, double_value, binary_value
             FROM plain_attr_values WHERE attr_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![attr_id], |row| {
            Ok((
                row.get::<_, bool>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<bool>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, Option<Vec<u8>>>(6)?,
            ))
        })?;
        let mut values = Vec::new();
        for row in rows {
            let (is_unique, string_value, date_value, boolean_value, long_value, double_value, binary_value) = row?;
            let date_value = date_value
                .map(|d| DateTime::<FixedOffset>::parse_from_rfc3339(&d))
                .transpose()
                .map_err(|e| StorageError::ReconstructionError {
                    reason: format!("bad stored date: {}", e),
                })?;
            values.push((
                AttrValue {
                    string_value,
                    date_value,
                    boolean_value,
                    long_value,
                    double_value,
                    binary_value,
                },
                is_unique,
            ));
        }
        Ok(values)
    }

    /// First column of every row `sql` returns for `key`.
    fn strings(&self, sql: &str, key: &str) -> Result<Vec<String>, StorageError> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn keys(&self, sql: &str, param: &str) -> Result<Vec<AnyKey>, StorageError> {
        self.strings(sql, param)?.iter().map(|k| parse_uuid::<AnyKey>(k)).collect()
    }
}

/// Writes one value row: the typed slot plus the canonical text used by
/// value lookups.
fn insert_value(
    tx: &Transaction<'_>,
    attr_id: i64,
    position: usize,
    value: &AttrValue,
    is_unique: bool,
) -> Result<(), StorageError> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO plain_attr_values
            (attr_id, position, is_unique, string_value, date_value, boolean_value, long_value, double_value, binary_value, formatted)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    stmt.execute(params![
        attr_id,
        position as i64,
        is_unique,
        value.string_value,
        value.date_value.map(|d| d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        value.boolean_value,
        value.long_value,
        value.double_value,
        value.binary_value,
        unique_token(value),
    ])?;
    Ok(())
}

/// Direct attributes store `''` so the UNIQUE index covers them too.
fn membership_column(membership: Option<MembershipKey>) -> String {
    membership.map(|m| m.to_string()).unwrap_or_default()
}

fn parse_membership(s: &str) -> Result<Option<MembershipKey>, StorageError> {
    if s.is_empty() {
        return Ok(None);
    }
    parse_uuid(s).map(Some)
}

fn parse_uuid<K: FromStr<Err = uuid::Error>>(s: &str) -> Result<K, StorageError> {
    s.parse().map_err(|e| StorageError::ReconstructionError {
        reason: format!("bad key '{}': {}", s, e),
    })
}

/// Reads an RFC 3339 date column; NULL stays `None`.
fn parse_utc(s: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
    s.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| StorageError::ReconstructionError {
                reason: format!("bad stored date '{}': {}", s, e),
            })
    })
    .transpose()
}

impl AttrStore for SqliteStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Relational
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    fn save_class(&mut self, class: &AnyTypeClass) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO any_type_classes (key) VALUES (?1)",
            params![class.key],
        )?;
        Ok(())
    }

    fn delete_class(&mut self, key: &str) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        if !Self::exists(&tx, "SELECT EXISTS(SELECT 1 FROM any_type_classes WHERE key = ?1)", key)? {
            return Err(CoreError::ClassNotFound { key: key.to_string() }.into());
        }

        let schemas: Vec<(String, String)> = {
            let mut stmt = tx.prepare("SELECT key, schema_json FROM schemas WHERE any_type_class = ?1")?;
            let rows = stmt.query_map(params![key], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        for (schema_key, json) in schemas {
            let mut schema: Schema = serde_json::from_str(&json)?;
            detach_class(&mut schema, key);
            tx.execute(
                "UPDATE schemas SET any_type_class = NULL, schema_json = ?1 WHERE key = ?2",
                params![serde_json::to_string(&schema)?, schema_key],
            )?;
        }

        let any_types: Vec<(String, String)> = {
            let mut stmt = tx.prepare("SELECT key, classes_json FROM any_types")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        for (type_key, json) in any_types {
            let mut classes: Vec<String> = serde_json::from_str(&json)?;
            let before = classes.len();
            classes.retain(|c| c != key);
            if classes.len() != before {
                tx.execute(
                    "UPDATE any_types SET classes_json = ?1 WHERE key = ?2",
                    params![serde_json::to_string(&classes)?, type_key],
                )?;
            }
        }

        tx.execute("DELETE FROM any_type_classes WHERE key = ?1", params![key])?;
        tx.commit()?;
        Ok(())
    }

    fn list_classes(&self) -> Result<Vec<AnyTypeClass>, StorageError> {
        let mut stmt = self.conn.prepare_cached("SELECT key FROM any_type_classes ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| Ok(AnyTypeClass::new(r?))).collect()
    }

    fn save_any_type(&mut self, any_type: &AnyType) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for class in &any_type.classes {
            if !Self::exists(&tx, "SELECT EXISTS(SELECT 1 FROM any_type_classes WHERE key = ?1)", class)? {
                return Err(CoreError::ClassNotFound { key: class.clone() }.into());
            }
        }
        tx.execute(
            "INSERT INTO any_types (key, kind, classes_json) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET kind = excluded.kind, classes_json = excluded.classes_json",
            params![any_type.key, any_type.kind.as_str(), serde_json::to_string(&any_type.classes)?],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn list_any_types(&self) -> Result<Vec<AnyType>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT key, kind, classes_json FROM any_types ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        let mut types = Vec::new();
        for row in rows {
            let (key, kind, classes) = row?;
            let kind = AnyTypeKind::from_str(&kind).map_err(|reason| StorageError::ReconstructionError { reason })?;
            let mut any_type = AnyType::new(key, kind);
            any_type.classes = serde_json::from_str(&classes)?;
            types.push(any_type);
        }
        Ok(types)
    }

    fn save_schema(&mut self, schema: &Schema) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        if let Some(class) = schema.any_type_class() {
            if !Self::exists(&tx, "SELECT EXISTS(SELECT 1 FROM any_type_classes WHERE key = ?1)", class)? {
                return Err(CoreError::ClassNotFound { key: class.to_string() }.into());
            }
        }
        tx.execute(
            "INSERT INTO schemas (key, kind, any_type_class, schema_json) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                kind = excluded.kind, any_type_class = excluded.any_type_class, schema_json = excluded.schema_json",
            params![
                schema.key(),
                schema.kind().as_str(),
                schema.any_type_class(),
                serde_json::to_string(schema)?,
            ],
        )?;
        tx.commit()?;
        debug!(schema = %schema.key(), kind = schema.kind().as_str(), "schema saved");
        Ok(())
    }

    fn delete_schema(&mut self, key: &str) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        let kind: Option<String> = tx
            .query_row("SELECT kind FROM schemas WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        let Some(kind) = kind else {
            return Err(StorageError::SchemaNotFound(key.to_string()));
        };
        if kind == "PLAIN" {
            let removed = tx.execute("DELETE FROM plain_attrs WHERE schema_key = ?1", params![key])?;
            tx.execute(
                "DELETE FROM plain_attr_unique_values WHERE schema_key = ?1",
                params![key],
            )?;
            debug!(schema = %key, attributes = removed, "removed attributes of deleted schema");
        }
        tx.execute("DELETE FROM schemas WHERE key = ?1", params![key])?;
        tx.commit()?;
        Ok(())
    }

    fn list_schemas(&self) -> Result<Vec<Schema>, StorageError> {
        let mut stmt = self.conn.prepare_cached("SELECT schema_json FROM schemas ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| Ok(serde_json::from_str(&r?)?)).collect()
    }

    fn save_resource(&mut self, resource: &ExternalResource) -> Result<(), StorageError> {
        resource.validate()?;
        self.conn.execute(
            "INSERT INTO resources (key, resource_json) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET resource_json = excluded.resource_json",
            params![resource.key, serde_json::to_string(resource)?],
        )?;
        Ok(())
    }

    fn load_resource(&self, key: &str) -> Result<ExternalResource, StorageError> {
        let json: Option<String> = self
            .conn
            .query_row("SELECT resource_json FROM resources WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        let json = json.ok_or_else(|| StorageError::ResourceNotFound(key.to_string()))?;
        Ok(serde_json::from_str(&json)?)
    }

    fn delete_resource(&mut self, key: &str) -> Result<(), StorageError> {
        let deleted = self.conn.execute("DELETE FROM resources WHERE key = ?1", params![key])?;
        if deleted == 0 {
            return Err(StorageError::ResourceNotFound(key.to_string()));
        }
        Ok(())
    }

    fn list_resources(&self) -> Result<Vec<ExternalResource>, StorageError> {
        let mut stmt = self.conn.prepare_cached("SELECT resource_json FROM resources ORDER BY key")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| Ok(serde_json::from_str(&r?)?)).collect()
    }

    // -----------------------------------------------------------------------
    // Owners
    // -----------------------------------------------------------------------

    fn save_any(&mut self, any: &Any) -> Result<(), StorageError> {
        let DecomposedAny { record, attrs } = decompose(any)?;
        let tx = self.conn.transaction()?;
        Self::check_references(&tx, &record)?;
        Self::check_unique(&tx, any)?;
        Self::write_any_row(&tx, &record, any.kind())?;
        Self::write_attrs(&tx, any, &attrs)?;
        tx.commit()?;
        debug!(any = %any.key(), "owner saved");
        Ok(())
    }

    fn load_any(&self, key: AnyKey, registry: &SchemaRegistry) -> Result<Any, StorageError> {
        let record = self.load_record(key)?;
        let attrs = self.load_attr_records(key)?;
        recompose(DecomposedAny { record, attrs }, registry)
    }

    fn delete_any(&mut self, key: AnyKey) -> Result<(), StorageError> {
        let k = key.to_string();
        let tx = self.conn.transaction()?;
        let kind: Option<String> = tx
            .query_row("SELECT kind FROM anys WHERE key = ?1", params![k], |row| row.get(0))
            .optional()?;
        let Some(kind) = kind else {
            return Err(StorageError::AnyNotFound(key));
        };
        if kind == AnyTypeKind::Group.as_str() {
            let overlays = tx.execute(
                "DELETE FROM plain_attrs WHERE membership_key IN (SELECT key FROM memberships WHERE group_key = ?1)",
                params![k],
            )?;
            debug!(group = %k, overlays, "removing group memberships");
        }
        tx.execute("DELETE FROM anys WHERE key = ?1", params![k])?;
        tx.execute(PRUNE_UNIQUE_VALUES, [])?;
        tx.commit()?;
        Ok(())
    }

    fn list_anys(&self, kind: Option<AnyTypeKind>) -> Result<Vec<AnySummary>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT key, kind, any_type, name, realm FROM anys WHERE ?1 IS NULL OR kind = ?1 ORDER BY key",
        )?;
        let rows = stmt.query_map(params![kind.map(|k| k.as_str())], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (key, kind, any_type, name, realm) = row?;
            out.push(AnySummary {
                key: parse_uuid(&key)?,
                kind: AnyTypeKind::from_str(&kind).map_err(|reason| StorageError::ReconstructionError { reason })?,
                any_type,
                name,
                realm,
            });
        }
        Ok(out)
    }

    fn find_by_unique_value(&self, schema: &PlainSchema, value: &AttrValue) -> Result<Option<AnyKey>, StorageError> {
        let key: Option<String> = self
            .conn
            .query_row(
                "SELECT any_key FROM plain_attr_unique_values WHERE schema_key = ?1 AND formatted = ?2",
                params![schema.key, unique_token(value)],
                |row| row.get(0),
            )
            .optional()?;
        key.map(|k| parse_uuid(&k)).transpose()
    }

    fn find_by_plain_attr_value(&self, schema: &PlainSchema, value: &AttrValue) -> Result<Vec<AnyKey>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT DISTINCT pa.any_key FROM plain_attrs pa JOIN plain_attr_values v ON v.attr_id = pa.id
             WHERE pa.schema_key = ?1 AND v.formatted = ?2 ORDER BY pa.any_key",
        )?;
        let rows = stmt.query_map(params![schema.key, unique_token(value)], |row| {
            row.get::<_, String>(0)
        })?;
        rows.map(|r| parse_uuid(&r?)).collect()
    }

    fn find_members(&self, group: AnyKey) -> Result<Vec<AnyKey>, StorageError> {
        self.keys(
            "SELECT any_key FROM memberships WHERE group_key = ?1 ORDER BY any_key",
            &group.to_string(),
        )
    }

    fn find_by_resource(&self, resource: &str) -> Result<Vec<AnyKey>, StorageError> {
        self.keys(
            "SELECT any_key FROM any_resources WHERE resource_key = ?1 ORDER BY any_key",
            resource,
        )
    }

    fn plain_attr_count(&self, schema: &str) -> Result<usize, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM plain_attrs WHERE schema_key = ?1",
            params![schema],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyattr_core::Unused;

    fn store_with_user() -> (SqliteStore, SchemaRegistry, Any) {
        let mut store = SqliteStore::in_memory().unwrap();
        let registry = SchemaRegistry::new();
        let phone = PlainSchema::new("phone", AttrSchemaType::String).multivalue();
        registry.define(phone.clone(), &Unused).unwrap();
        store.save_schema(&Schema::Plain(phone)).unwrap();
        let user = Any::user("ann", "/");
        store.save_any(&user).unwrap();
        (store, registry, user)
    }

    fn hashes(store: &SqliteStore, any: AnyKey) -> Vec<(String, String)> {
        let mut stmt = store
            .conn
            .prepare("SELECT schema_key, content_hash FROM plain_attrs WHERE any_key = ?1 ORDER BY schema_key")
            .unwrap();
        stmt.query_map(params![any.to_string()], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn unchanged_attributes_keep_their_rows() {
        let (mut store, registry, mut user) = store_with_user();
        let phone = registry.require_plain("phone").unwrap();
        let mut attr = PlainAttr::new(user.key()).with_schema(phone).unwrap();
        attr.restore_value(AttrValue::string("555-1")).unwrap();
        user.restore_plain_attr(attr).unwrap();
        store.save_any(&user).unwrap();

        let id_before: i64 = store
            .conn
            .query_row("SELECT id FROM plain_attrs WHERE schema_key = 'phone'", [], |r| r.get(0))
            .unwrap();
        let hash_before = hashes(&store, user.key());

        user.set_realm("/other");
        store.save_any(&user).unwrap();
        let id_after: i64 = store
            .conn
            .query_row("SELECT id FROM plain_attrs WHERE schema_key = 'phone'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(id_before, id_after);
        assert_eq!(hash_before, hashes(&store, user.key()));
    }

    #[test]
    fn typed_columns_are_populated() {
        let (mut store, registry, mut user) = store_with_user();
        let phone = registry.require_plain("phone").unwrap();
        let mut attr = PlainAttr::new(user.key()).with_schema(phone).unwrap();
        attr.restore_value(AttrValue::string("555-1")).unwrap();
        attr.restore_value(AttrValue::string("555-2")).unwrap();
        user.restore_plain_attr(attr).unwrap();
        store.save_any(&user).unwrap();

        let rows: Vec<(Option<String>, Option<i64>, String)> = {
            let mut stmt = store
                .conn
                .prepare("SELECT string_value, long_value, formatted FROM plain_attr_values ORDER BY position")
                .unwrap();
            stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
                .unwrap()
                .collect::<Result<_, _>>()
                .unwrap()
        };
        assert_eq!(
            rows,
            vec![
                (Some("555-1".to_string()), None, "555-1".to_string()),
                (Some("555-2".to_string()), None, "555-2".to_string()),
            ]
        );
    }

    #[test]
    fn missing_any_type_is_rejected() {
        let mut store = SqliteStore::in_memory().unwrap();
        let device = Any::any_object("PRINTER", "p1", "/");
        match store.save_any(&device) {
            Err(StorageError::Core(CoreError::AnyTypeNotFound { key })) => assert_eq!(key, "PRINTER"),
            other => panic!("expected AnyTypeNotFound, got {:?}", other),
        }
    }

    #[test]
    fn reserved_any_types_are_seeded() {
        let store = SqliteStore::in_memory().unwrap();
        let keys: Vec<String> = store.list_any_types().unwrap().into_iter().map(|t| t.key).collect();
        assert_eq!(keys, vec!["GROUP".to_string(), "USER".to_string()]);
    }
}
