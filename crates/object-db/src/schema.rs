//! Per-type attribute schemas and the online migration that keeps every
//! `objects_<type>` table in sync with them.
//!
//! A type's schema only ever grows. Re-registering a type merges the new
//! attribute set into the stored one; when the merge adds column-backed
//! attributes the table is rebuilt inside a single transaction, so a failed
//! migration leaves the previous schema in charge.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bitflags::bitflags;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
	error::Error,
	value::{Value, ValueKind},
};

bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
	pub struct AttrFlags: u8 {
		const SIMPLE            = 1 << 0;
		/// Stored in its own column so it can be filtered on
		const SEARCHABLE        = 1 << 1;
		/// Column with a lookup index
		const INDEXED           = 1 << 2;
		const KEYWORDS          = 1 << 3;
		/// Keywords taken from a path, only the tail segments are indexed
		const KEYWORDS_FILENAME = 1 << 4;
	}
}

/// Names with a meaning of their own in queries or in the table layout
pub const RESERVED_NAMES: [&str; 9] = [
	"parent",
	"object",
	"keywords",
	"type",
	"limit",
	"id",
	"parent_type",
	"parent_id",
	"blob",
];

pub(crate) const STANDARD_ATTRS: [(&str, ValueKind, AttrFlags); 3] = [
	("name", ValueKind::Str, AttrFlags::INDEXED),
	("size", ValueKind::Int, AttrFlags::SEARCHABLE),
	("mtime", ValueKind::Int, AttrFlags::SEARCHABLE),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrDef {
	pub kind: ValueKind,
	pub flags: AttrFlags,
}

impl AttrDef {
	#[must_use]
	pub const fn new(kind: ValueKind, flags: AttrFlags) -> Self {
		Self { kind, flags }
	}

	#[must_use]
	pub const fn simple(kind: ValueKind) -> Self {
		Self::new(kind, AttrFlags::SIMPLE)
	}

	#[must_use]
	pub const fn is_column(&self) -> bool {
		self.flags
			.intersects(AttrFlags::SEARCHABLE.union(AttrFlags::INDEXED))
	}

	#[must_use]
	pub const fn is_indexed(&self) -> bool {
		self.flags.contains(AttrFlags::INDEXED)
	}

	#[must_use]
	pub const fn is_keywords(&self) -> bool {
		self.flags
			.intersects(AttrFlags::KEYWORDS.union(AttrFlags::KEYWORDS_FILENAME))
	}

	pub(crate) fn check(&self, attr: &str, value: &Value) -> Result<(), Error> {
		if value.kind() == self.kind {
			Ok(())
		} else {
			Err(Error::TypeMismatch {
				attr: attr.to_owned(),
				expected: self.kind,
				found: value.kind(),
			})
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeSchema {
	pub id: i64,
	pub name: String,
	pub attrs: BTreeMap<String, AttrDef>,
}

impl TypeSchema {
	#[must_use]
	pub fn table(&self) -> String {
		table_name(&self.name)
	}

	pub fn attr(&self, attr: &str) -> Result<&AttrDef, Error> {
		self.attrs.get(attr).ok_or_else(|| Error::UnknownAttribute {
			type_name: self.name.clone(),
			attr: attr.to_owned(),
		})
	}

	/// Column-backed attributes in column order
	pub fn columns(&self) -> impl Iterator<Item = (&str, &AttrDef)> {
		self.attrs
			.iter()
			.filter(|(_, def)| def.is_column())
			.map(|(name, def)| (name.as_str(), def))
	}

	pub fn keyword_attrs(&self) -> impl Iterator<Item = (&str, &AttrDef)> {
		self.attrs
			.iter()
			.filter(|(_, def)| def.is_keywords())
			.map(|(name, def)| (name.as_str(), def))
	}

	fn column_set(&self) -> BTreeSet<&str> {
		self.columns().map(|(name, _)| name).collect()
	}
}

pub(crate) fn table_name(type_name: &str) -> String {
	format!("objects_{type_name}")
}

pub(crate) fn check_identifier(ident: &str) -> Result<(), Error> {
	let mut chars = ident.chars();
	let valid_head = chars
		.next()
		.map_or(false, |c| c.is_ascii_alphabetic() || c == '_');

	if valid_head && ident.len() <= 64 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
		Ok(())
	} else {
		Err(Error::InvalidIdentifier(ident.to_owned()))
	}
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
	types: HashMap<String, TypeSchema>,
	names_by_id: BTreeMap<i64, String>,
}

impl SchemaRegistry {
	pub(crate) fn load(conn: &Connection) -> Result<Self, Error> {
		let mut registry = Self::default();

		let mut stmt = conn.prepare("SELECT id, name, attrs FROM types")?;
		let rows = stmt.query_map([], |row| {
			Ok((
				row.get::<_, i64>(0)?,
				row.get::<_, String>(1)?,
				row.get::<_, Vec<u8>>(2)?,
			))
		})?;

		for row in rows {
			let (id, name, attrs) = row?;
			registry.insert(TypeSchema {
				id,
				name,
				attrs: rmp_serde::from_slice(&attrs)?,
			});
		}

		debug!(types = registry.types.len(), "Loaded object types;");

		Ok(registry)
	}

	fn insert(&mut self, schema: TypeSchema) {
		self.names_by_id.insert(schema.id, schema.name.clone());
		self.types.insert(schema.name.clone(), schema);
	}

	pub fn get(&self, type_name: &str) -> Result<&TypeSchema, Error> {
		self.types
			.get(type_name)
			.ok_or_else(|| Error::UnknownType(type_name.to_owned()))
	}

	#[must_use]
	pub fn by_id(&self, type_id: i64) -> Option<&TypeSchema> {
		self.names_by_id
			.get(&type_id)
			.and_then(|name| self.types.get(name))
	}

	/// All registered types, in registration order
	#[must_use]
	pub fn all(&self) -> Vec<&TypeSchema> {
		self.names_by_id
			.values()
			.filter_map(|name| self.types.get(name))
			.collect()
	}

	/// Registers `type_name` or extends its schema with `attrs`.
	///
	/// Returns `false` when nothing had to change.
	#[instrument(skip(self, conn, attrs), err)]
	pub(crate) fn register(
		&mut self,
		conn: &mut Connection,
		type_name: &str,
		attrs: BTreeMap<String, AttrDef>,
	) -> Result<bool, Error> {
		check_identifier(type_name)?;

		let existing = self.types.get(type_name);
		let base = existing.map_or_else(standard_attrs, |schema| schema.attrs.clone());
		let merged = merge_attrs(base, attrs)?;

		let tx = conn.transaction()?;

		let schema = match existing {
			None => {
				tx.execute(
					"INSERT INTO types (name, attrs) VALUES (?1, ?2)",
					params![type_name, rmp_serde::to_vec_named(&merged)?],
				)?;
				let schema = TypeSchema {
					id: tx.last_insert_rowid(),
					name: type_name.to_owned(),
					attrs: merged,
				};
				create_table(&tx, &schema.table(), &schema)?;
				create_indexes(&tx, &schema)?;

				info!(type_id = schema.id, "Registered new object type;");
				schema
			}

			Some(old) if old.attrs == merged => return Ok(false),

			Some(old) => {
				tx.execute(
					"UPDATE types SET attrs = ?1 WHERE id = ?2",
					params![rmp_serde::to_vec_named(&merged)?, old.id],
				)?;
				let schema = TypeSchema {
					attrs: merged,
					..old.clone()
				};

				if old.column_set() == schema.column_set() {
					debug!("Schema descriptor updated without migration;");
				} else {
					migrate_table(&tx, old, &schema)?;
					info!("Migrated object table to the new schema;");
				}
				create_indexes(&tx, &schema)?;

				schema
			}
		};

		tx.commit()?;
		self.insert(schema);

		Ok(true)
	}
}

fn standard_attrs() -> BTreeMap<String, AttrDef> {
	STANDARD_ATTRS
		.iter()
		.map(|&(name, kind, flags)| (name.to_owned(), AttrDef::new(kind, flags)))
		.collect()
}

fn merge_attrs(
	mut base: BTreeMap<String, AttrDef>,
	attrs: BTreeMap<String, AttrDef>,
) -> Result<BTreeMap<String, AttrDef>, Error> {
	for (name, def) in attrs {
		check_identifier(&name)?;
		if RESERVED_NAMES.contains(&name.as_str()) {
			return Err(Error::ReservedAttribute(name));
		}
		if def.kind == ValueKind::List && def.is_column() {
			return Err(Error::ListColumn(name));
		}

		match base.get_mut(&name) {
			Some(current) if current.kind != def.kind => {
				return Err(Error::KindChange {
					attr: name,
					from: current.kind,
					to: def.kind,
				})
			}
			Some(current) => current.flags |= def.flags,
			None => {
				base.insert(name, def);
			}
		}
	}

	Ok(base)
}

fn create_table(tx: &Transaction<'_>, table: &str, schema: &TypeSchema) -> Result<(), Error> {
	let columns = schema
		.columns()
		.map(|(name, def)| format!("{name} {}", def.kind.sql_type()))
		.collect::<Vec<_>>()
		.join(", ");

	tx.execute_batch(&format!(
		"CREATE TABLE {table} (
			id          INTEGER PRIMARY KEY AUTOINCREMENT,
			parent_type INTEGER,
			parent_id   INTEGER,
			{columns},
			blob        BLOB
		)"
	))?;

	Ok(())
}

fn create_indexes(tx: &Transaction<'_>, schema: &TypeSchema) -> Result<(), Error> {
	let table = schema.table();

	let mut sql = format!(
		"CREATE UNIQUE INDEX IF NOT EXISTS {table}_parent_name ON {table} (parent_type, parent_id, name);
		CREATE INDEX IF NOT EXISTS {table}_parent ON {table} (parent_type, parent_id);"
	);
	for (attr, _) in schema.columns().filter(|(_, def)| def.is_indexed()) {
		sql.push_str(&format!(
			"CREATE INDEX IF NOT EXISTS {table}_{attr}_idx ON {table} ({attr});"
		));
	}

	tx.execute_batch(&sql)?;

	Ok(())
}

/// Rebuilds the table for `new`, carrying over every column `old` had and
/// moving attributes that became columns out of the blob.
fn migrate_table(tx: &Transaction<'_>, old: &TypeSchema, new: &TypeSchema) -> Result<(), Error> {
	let table = new.table();
	let tmp = format!("{table}_tmp");

	create_table(tx, &tmp, new)?;

	// rebuilding would hand out ids of deleted objects again
	let sequence = tx
		.query_row(
			"SELECT seq FROM sqlite_sequence WHERE name = ?1",
			[&table],
			|row| row.get::<_, i64>(0),
		)
		.optional()?;

	let carried = old
		.column_set()
		.into_iter()
		.map(|c| format!(", {c}"))
		.collect::<String>();
	tx.execute_batch(&format!(
		"INSERT INTO {tmp} (id, parent_type, parent_id, blob{carried})
			SELECT id, parent_type, parent_id, blob{carried} FROM {table};
		DROP TABLE {table};
		ALTER TABLE {tmp} RENAME TO {table};"
	))?;

	if let Some(sequence) = sequence {
		tx.execute("DELETE FROM sqlite_sequence WHERE name = ?1", [&table])?;
		tx.execute(
			"INSERT INTO sqlite_sequence (name, seq) VALUES (?1, ?2)",
			params![table, sequence],
		)?;
	}

	let promoted = new
		.columns()
		.filter(|(name, _)| old.attrs.get(*name).is_some_and(|def| !def.is_column()))
		.map(|(name, _)| name)
		.collect::<Vec<_>>();

	if !promoted.is_empty() {
		promote_blob_attrs(tx, &table, &promoted)?;
	}

	Ok(())
}

fn promote_blob_attrs(tx: &Transaction<'_>, table: &str, promoted: &[&str]) -> Result<(), Error> {
	let rows = tx
		.prepare(&format!("SELECT id, blob FROM {table} WHERE blob IS NOT NULL"))?
		.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))?
		.collect::<Result<Vec<_>, _>>()?;

	for (id, blob) in rows {
		let mut values: BTreeMap<String, Value> = rmp_serde::from_slice(&blob)?;

		for attr in promoted {
			if let Some(value) = values.remove(*attr) {
				tx.execute(
					&format!("UPDATE {table} SET {attr} = ?1 WHERE id = ?2"),
					params![value, id],
				)?;
			}
		}

		let blob = if values.is_empty() {
			None
		} else {
			Some(rmp_serde::to_vec_named(&values)?)
		};
		tx.execute(
			&format!("UPDATE {table} SET blob = ?1 WHERE id = ?2"),
			params![blob, id],
		)?;
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn attrs(defs: &[(&str, ValueKind, AttrFlags)]) -> BTreeMap<String, AttrDef> {
		defs.iter()
			.map(|&(name, kind, flags)| (name.to_owned(), AttrDef::new(kind, flags)))
			.collect()
	}

	#[test]
	fn identifiers() {
		assert!(check_identifier("track_2").is_ok());
		assert!(check_identifier("_hidden").is_ok());
		assert!(check_identifier("2fast").is_err());
		assert!(check_identifier("drop table").is_err());
		assert!(check_identifier("").is_err());
	}

	#[test]
	fn merge_rejects_reserved_names() {
		for name in ["parent", "keywords", "type", "limit", "object", "blob"] {
			let res = merge_attrs(
				standard_attrs(),
				attrs(&[(name, ValueKind::Str, AttrFlags::SIMPLE)]),
			);
			assert!(matches!(res, Err(Error::ReservedAttribute(n)) if n == name));
		}
	}

	#[test]
	fn merge_unions_flags_of_standard_attrs() {
		let merged = merge_attrs(
			standard_attrs(),
			attrs(&[("name", ValueKind::Str, AttrFlags::KEYWORDS_FILENAME)]),
		)
		.expect("merge");

		assert_eq!(
			merged["name"].flags,
			AttrFlags::INDEXED | AttrFlags::KEYWORDS_FILENAME
		);
		assert!(merged["name"].is_keywords());
	}

	#[test]
	fn merge_rejects_kind_changes_and_list_columns() {
		assert!(matches!(
			merge_attrs(standard_attrs(), attrs(&[("size", ValueKind::Str, AttrFlags::SIMPLE)])),
			Err(Error::KindChange { .. })
		));
		assert!(matches!(
			merge_attrs(standard_attrs(), attrs(&[("tags", ValueKind::List, AttrFlags::SEARCHABLE)])),
			Err(Error::ListColumn(_))
		));
	}
}
