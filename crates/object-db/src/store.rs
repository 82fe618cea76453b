use std::{
	collections::BTreeMap,
	fmt,
	path::Path,
};

use rusqlite::{
	params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Row,
};
use sd_utils::chain_optional_iter;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::{
	error::Error,
	keywords,
	schema::{AttrDef, AttrFlags, SchemaRegistry, TypeSchema},
	search::{self, SearchStats},
	value::{Attrs, Value},
};

const SCHEMA_VERSION: i64 = 1;

const INIT_SQL: &str = "
	CREATE TABLE IF NOT EXISTS meta (
		key   TEXT PRIMARY KEY,
		value
	);
	CREATE TABLE IF NOT EXISTS types (
		id    INTEGER PRIMARY KEY AUTOINCREMENT,
		name  TEXT UNIQUE NOT NULL,
		attrs BLOB NOT NULL
	);
	CREATE TABLE IF NOT EXISTS words (
		id    INTEGER PRIMARY KEY AUTOINCREMENT,
		word  TEXT UNIQUE NOT NULL,
		count INTEGER NOT NULL DEFAULT 0
	);
	CREATE TABLE IF NOT EXISTS words_map (
		rank        INTEGER NOT NULL,
		word_id     INTEGER NOT NULL,
		object_type INTEGER NOT NULL,
		object_id   INTEGER NOT NULL,
		frequency   REAL NOT NULL
	);
	CREATE INDEX IF NOT EXISTS words_map_word ON words_map (word_id, rank, object_type);
	CREATE INDEX IF NOT EXISTS words_map_object ON words_map (object_type, object_id);
	INSERT OR IGNORE INTO meta (key, value) VALUES ('keywords_filecount', 0);
";

/// `(type, id)` handle of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
	pub type_name: String,
	pub id: i64,
}

impl ObjectRef {
	pub fn new(type_name: impl Into<String>, id: i64) -> Self {
		Self {
			type_name: type_name.into(),
			id,
		}
	}
}

impl fmt::Display for ObjectRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}#{}", self.type_name, self.id)
	}
}

/// Normalized object as returned by every read.
///
/// `attrs` holds every attribute of the type's schema except `name`, with
/// `None` for the unset ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
	pub object: ObjectRef,
	pub parent: Option<ObjectRef>,
	pub name: String,
	pub attrs: BTreeMap<String, Option<Value>>,
}

impl Record {
	#[must_use]
	pub fn get(&self, attr: &str) -> Option<&Value> {
		self.attrs.get(attr).and_then(Option::as_ref)
	}

	#[must_use]
	pub fn get_int(&self, attr: &str) -> Option<i64> {
		self.get(attr).and_then(Value::as_int)
	}
}

/// Store mutation that can be staged and applied in a batch
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
	Add {
		type_name: String,
		name: String,
		parent: Option<ObjectRef>,
		attrs: Attrs,
	},
	Update {
		object: ObjectRef,
		parent: Option<ObjectRef>,
		name: Option<String>,
		attrs: Attrs,
	},
	Delete {
		object: ObjectRef,
	},
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
	pub applied: usize,
	pub skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
enum ParentFilter {
	#[default]
	Any,
	Root,
	Of(ObjectRef),
}

/// Exact-match query over column attributes, optionally combined with a
/// keyword search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
	type_name: Option<String>,
	parent: ParentFilter,
	object: Option<ObjectRef>,
	filters: BTreeMap<String, Value>,
	keywords: Option<String>,
	limit: Option<usize>,
}

impl Query {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn of_type(mut self, type_name: impl Into<String>) -> Self {
		self.type_name = Some(type_name.into());
		self
	}

	#[must_use]
	pub fn parent(mut self, parent: ObjectRef) -> Self {
		self.parent = ParentFilter::Of(parent);
		self
	}

	/// Only objects without a parent
	#[must_use]
	pub fn roots(mut self) -> Self {
		self.parent = ParentFilter::Root;
		self
	}

	#[must_use]
	pub fn object(mut self, object: ObjectRef) -> Self {
		self.type_name = Some(object.type_name.clone());
		self.object = Some(object);
		self
	}

	#[must_use]
	pub fn filter(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
		self.filters.insert(attr.into(), value.into());
		self
	}

	#[must_use]
	pub fn keywords(mut self, text: impl Into<String>) -> Self {
		self.keywords = Some(text.into());
		self
	}

	#[must_use]
	pub const fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}

	/// Only keyword, type and limit are set, so the search may cut rows itself
	fn keyword_only(&self) -> bool {
		self.filters.is_empty() && self.parent == ParentFilter::Any && self.object.is_none()
	}
}

/// Row image shared by reads and writes, `values` never contains `name`
struct RowData {
	id: i64,
	parent: Option<(i64, i64)>,
	name: String,
	values: BTreeMap<String, Value>,
}

pub struct ObjectStore {
	conn: Connection,
	registry: SchemaRegistry,
}

impl fmt::Debug for ObjectStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ObjectStore")
			.field("registry", &self.registry)
			.finish_non_exhaustive()
	}
}

impl ObjectStore {
	#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
	pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
		let conn = Connection::open(path)?;
		conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
		conn.pragma_update(None, "synchronous", "NORMAL")?;

		Self::init(conn)
	}

	pub fn open_in_memory() -> Result<Self, Error> {
		Self::init(Connection::open_in_memory()?)
	}

	fn init(conn: Connection) -> Result<Self, Error> {
		conn.execute_batch(INIT_SQL)?;

		let version = conn
			.query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
				row.get::<_, i64>(0)
			})
			.optional()?;
		match version {
			None => {
				conn.execute(
					"INSERT INTO meta (key, value) VALUES ('version', ?1)",
					[SCHEMA_VERSION],
				)?;
			}
			Some(SCHEMA_VERSION) => {}
			Some(other) => {
				return Err(Error::Consistency(format!(
					"unsupported database version {other}"
				)))
			}
		}

		let registry = SchemaRegistry::load(&conn)?;

		Ok(Self { conn, registry })
	}

	#[must_use]
	pub const fn registry(&self) -> &SchemaRegistry {
		&self.registry
	}

	pub fn register_type(
		&mut self,
		type_name: &str,
		attrs: BTreeMap<String, AttrDef>,
	) -> Result<bool, Error> {
		self.registry.register(&mut self.conn, type_name, attrs)
	}

	pub fn add(
		&mut self,
		type_name: &str,
		name: &str,
		parent: Option<&ObjectRef>,
		attrs: Attrs,
	) -> Result<Record, Error> {
		let tx = self.conn.transaction()?;
		let record = Ops::new(&tx, &self.registry).add(type_name, name, parent, attrs)?;
		tx.commit()?;

		Ok(record)
	}

	pub fn update(
		&mut self,
		object: &ObjectRef,
		parent: Option<&ObjectRef>,
		name: Option<&str>,
		attrs: Attrs,
	) -> Result<Record, Error> {
		let tx = self.conn.transaction()?;
		let record = Ops::new(&tx, &self.registry).update(object, parent, name, attrs)?;
		tx.commit()?;

		Ok(record)
	}

	/// Deletes one object, children are left in place
	pub fn delete(&mut self, object: &ObjectRef) -> Result<(), Error> {
		let tx = self.conn.transaction()?;
		Ops::new(&tx, &self.registry).delete(object)?;
		tx.commit()?;

		Ok(())
	}

	/// Moves an object to another type, children follow the new id
	pub fn change_type(&mut self, object: &ObjectRef, type_name: &str) -> Result<Record, Error> {
		let tx = self.conn.transaction()?;
		let record = Ops::new(&tx, &self.registry).change_type(object, type_name)?;
		tx.commit()?;

		Ok(record)
	}

	pub fn get(&self, object: &ObjectRef) -> Result<Option<Record>, Error> {
		Ops::new(&self.conn, &self.registry).get(object)
	}

	pub fn query(&self, query: &Query) -> Result<Vec<Record>, Error> {
		Ops::new(&self.conn, &self.registry).query(query)
	}

	/// Children of `parent` across every type, sorted by name
	pub fn children(&self, parent: &ObjectRef) -> Result<Vec<Record>, Error> {
		let mut children = self.query(&Query::new().parent(parent.clone()))?;
		children.sort_by(|a, b| a.name.cmp(&b.name));

		Ok(children)
	}

	/// Object named `name` under `parent`, or among the roots
	pub fn lookup(&self, parent: Option<&ObjectRef>, name: &str) -> Result<Option<Record>, Error> {
		let query = Query::new().filter("name", name).limit(1);
		let query = match parent {
			Some(parent) => query.parent(parent.clone()),
			None => query.roots(),
		};

		Ok(self.query(&query)?.into_iter().next())
	}

	pub fn keyword_search(
		&self,
		text: &str,
		type_name: Option<&str>,
		limit: Option<usize>,
	) -> Result<(Vec<(ObjectRef, f64)>, SearchStats), Error> {
		let type_id = type_name
			.map(|type_name| self.registry.get(type_name).map(|schema| schema.id))
			.transpose()?;
		let (hits, stats) = search::search(&self.conn, text, type_id, limit)?;

		let hits = hits
			.into_iter()
			.filter_map(|hit| {
				self.registry
					.by_id(hit.type_id)
					.map(|schema| (ObjectRef::new(schema.name.clone(), hit.object_id), hit.score))
			})
			.collect();

		Ok((hits, stats))
	}

	pub fn keyword_file_count(&self) -> Result<i64, Error> {
		keywords::file_count(&self.conn)
	}

	/// Applies `changes` in one transaction.
	///
	/// A change that breaks a constraint or refers to a missing object is
	/// rolled back alone and counted as skipped, storage failures abort the
	/// whole batch.
	#[instrument(skip_all, fields(changes = changes.len()), err)]
	pub fn apply_batch(&mut self, changes: Vec<Change>) -> Result<BatchReport, Error> {
		let mut report = BatchReport::default();
		let mut tx = self.conn.transaction()?;

		for change in changes {
			let sp = tx.savepoint()?;
			match Ops::new(&sp, &self.registry).apply(change) {
				Ok(()) => {
					sp.commit()?;
					report.applied += 1;
				}
				Err(e)
					if e.is_constraint_violation()
						|| e.is_schema_error() || matches!(e, Error::NotFound(_)) =>
				{
					warn!(?e, "Skipping staged change;");
					report.skipped += 1;
				}
				Err(e) => return Err(e),
			}
		}

		tx.commit()?;
		debug!(?report, "Committed change batch;");

		Ok(report)
	}
}

/// Store operations over any connection, transaction or savepoint
struct Ops<'a> {
	conn: &'a Connection,
	registry: &'a SchemaRegistry,
}

impl<'a> Ops<'a> {
	const fn new(conn: &'a Connection, registry: &'a SchemaRegistry) -> Self {
		Self { conn, registry }
	}

	fn apply(&self, change: Change) -> Result<(), Error> {
		match change {
			Change::Add {
				type_name,
				name,
				parent,
				attrs,
			} => self.add(&type_name, &name, parent.as_ref(), attrs).map(|_| ()),
			Change::Update {
				object,
				parent,
				name,
				attrs,
			} => self
				.update(&object, parent.as_ref(), name.as_deref(), attrs)
				.map(|_| ()),
			Change::Delete { object } => self.delete(&object),
		}
	}

	fn parent_key(&self, parent: &ObjectRef) -> Result<(i64, i64), Error> {
		Ok((self.registry.get(&parent.type_name)?.id, parent.id))
	}

	fn add(
		&self,
		type_name: &str,
		name: &str,
		parent: Option<&ObjectRef>,
		attrs: Attrs,
	) -> Result<Record, Error> {
		let schema = self.registry.get(type_name)?;

		let mut row = RowData {
			id: 0,
			parent: parent.map(|parent| self.parent_key(parent)).transpose()?,
			name: name.to_owned(),
			values: BTreeMap::new(),
		};
		merge_attrs(schema, &mut row.values, attrs)?;

		let columns = schema.columns().map(|(column, _)| column).collect::<Vec<_>>();
		let placeholders = (1..=columns.len() + 3)
			.map(|i| format!("?{i}"))
			.collect::<Vec<_>>()
			.join(", ");

		self.conn.execute(
			&format!(
				"INSERT INTO {} (parent_type, parent_id, blob, {}) VALUES ({placeholders})",
				schema.table(),
				columns.join(", ")
			),
			params_from_iter(write_params(schema, &row)?),
		)?;
		row.id = self.conn.last_insert_rowid();

		keywords::index_object(self.conn, schema.id, row.id, &keyword_scores(schema, &row))?;
		trace!(object = %ObjectRef::new(type_name, row.id), "Added object;");

		self.record(schema, row)
	}

	fn update(
		&self,
		object: &ObjectRef,
		parent: Option<&ObjectRef>,
		name: Option<&str>,
		attrs: Attrs,
	) -> Result<Record, Error> {
		let schema = self.registry.get(&object.type_name)?;
		let mut row = self
			.load_row(schema, object.id)?
			.ok_or_else(|| Error::NotFound(object.clone()))?;

		let old_keywords = keyword_source(schema, &row);

		merge_attrs(schema, &mut row.values, attrs)?;
		if let Some(parent) = parent {
			row.parent = Some(self.parent_key(parent)?);
		}
		if let Some(name) = name {
			row.name = name.to_owned();
		}

		let assignments = schema
			.columns()
			.enumerate()
			.map(|(i, (column, _))| format!(", {column} = ?{}", i + 4))
			.collect::<String>();
		let mut values = write_params(schema, &row)?;
		values.push(SqlValue::Integer(row.id));

		self.conn.execute(
			&format!(
				"UPDATE {} SET parent_type = ?1, parent_id = ?2, blob = ?3{assignments} WHERE id = ?{}",
				schema.table(),
				values.len()
			),
			params_from_iter(values),
		)?;

		if keyword_source(schema, &row) != old_keywords {
			keywords::unindex_object(self.conn, schema.id, row.id)?;
			keywords::index_object(self.conn, schema.id, row.id, &keyword_scores(schema, &row))?;
			trace!(%object, "Re-indexed object keywords;");
		}

		self.record(schema, row)
	}

	fn delete(&self, object: &ObjectRef) -> Result<(), Error> {
		let schema = self.registry.get(&object.type_name)?;

		keywords::unindex_object(self.conn, schema.id, object.id)?;
		let deleted = self.conn.execute(
			&format!("DELETE FROM {} WHERE id = ?1", schema.table()),
			[object.id],
		)?;

		if deleted == 0 {
			Err(Error::NotFound(object.clone()))
		} else {
			trace!(%object, "Deleted object;");
			Ok(())
		}
	}

	fn change_type(&self, object: &ObjectRef, type_name: &str) -> Result<Record, Error> {
		let old_schema = self.registry.get(&object.type_name)?;
		let new_schema = self.registry.get(type_name)?;
		let row = self
			.load_row(old_schema, object.id)?
			.ok_or_else(|| Error::NotFound(object.clone()))?;

		self.delete(object)?;

		let attrs = row
			.values
			.into_iter()
			.filter(|(attr, value)| {
				new_schema
					.attrs
					.get(attr)
					.is_some_and(|def| def.kind == value.kind())
			})
			.map(|(attr, value)| (attr, Some(value)))
			.collect();
		let parent = row
			.parent
			.map(|(type_id, id)| self.object_ref(type_id, id))
			.transpose()?;
		let record = self.add(type_name, &row.name, parent.as_ref(), attrs)?;

		for schema in self.registry.all() {
			self.conn.execute(
				&format!(
					"UPDATE {} SET parent_type = ?1, parent_id = ?2
						WHERE parent_type = ?3 AND parent_id = ?4",
					schema.table()
				),
				[new_schema.id, record.object.id, old_schema.id, object.id],
			)?;
		}

		debug!(from = %object, to = %record.object, "Changed object type;");

		Ok(record)
	}

	fn get(&self, object: &ObjectRef) -> Result<Option<Record>, Error> {
		let schema = self.registry.get(&object.type_name)?;
		self.load_row(schema, object.id)?
			.map(|row| self.record(schema, row))
			.transpose()
	}

	fn query(&self, query: &Query) -> Result<Vec<Record>, Error> {
		if let Some(text) = &query.keywords {
			return self.keyword_query(query, text);
		}

		let schemas = match &query.type_name {
			Some(type_name) => vec![self.registry.get(type_name)?],
			None => self.registry.all(),
		};

		let mut records = vec![];
		for schema in schemas {
			let remaining = query.limit.map(|limit| limit.saturating_sub(records.len()));
			if remaining == Some(0) {
				break;
			}

			match self.query_type(schema, query, remaining) {
				Ok(found) => records.extend(found),
				Err(e) if query.type_name.is_none() && e.is_schema_error() => {
					trace!(type_name = %schema.name, ?e, "Type can't match the query;");
				}
				Err(e) => return Err(e),
			}
		}

		Ok(records)
	}

	fn keyword_query(&self, query: &Query, text: &str) -> Result<Vec<Record>, Error> {
		let type_id = query
			.type_name
			.as_deref()
			.map(|type_name| self.registry.get(type_name).map(|schema| schema.id))
			.transpose()?;
		let search_limit = if query.keyword_only() { query.limit } else { None };

		let (hits, _) = search::search(self.conn, text, type_id, search_limit)?;

		let mut records = vec![];
		for hit in hits {
			if query.limit.is_some_and(|limit| records.len() >= limit) {
				break;
			}
			let Some(schema) = self.registry.by_id(hit.type_id) else {
				warn!(type_id = hit.type_id, "Keyword index refers to an unknown type;");
				continue;
			};

			let by_id = Query {
				object: Some(ObjectRef::new(schema.name.clone(), hit.object_id)),
				keywords: None,
				limit: None,
				..query.clone()
			};
			match self.query_type(schema, &by_id, Some(1)) {
				Ok(found) => records.extend(found),
				Err(e) if query.type_name.is_none() && e.is_schema_error() => {}
				Err(e) => return Err(e),
			}
		}

		Ok(records)
	}

	fn query_type(
		&self,
		schema: &TypeSchema,
		query: &Query,
		limit: Option<usize>,
	) -> Result<Vec<Record>, Error> {
		let mut params = vec![];
		let mut conditions = vec![];

		for (attr, value) in &query.filters {
			let def = schema.attr(attr)?;
			if !def.is_column() {
				return Err(Error::NotSearchable {
					type_name: schema.name.clone(),
					attr: attr.clone(),
				});
			}
			def.check(attr, value)?;

			params.push(sql_value(value));
			conditions.push(format!("{attr} = ?{}", params.len()));
		}

		let parent_condition = match &query.parent {
			ParentFilter::Any => None,
			ParentFilter::Root => Some("parent_type IS NULL".to_owned()),
			ParentFilter::Of(parent) => {
				let (type_id, id) = self.parent_key(parent)?;
				params.extend([SqlValue::Integer(type_id), SqlValue::Integer(id)]);
				Some(format!(
					"parent_type = ?{} AND parent_id = ?{}",
					params.len() - 1,
					params.len()
				))
			}
		};
		let object_condition = query.object.as_ref().map(|object| {
			params.push(SqlValue::Integer(object.id));
			format!("id = ?{}", params.len())
		});

		let conditions = chain_optional_iter(conditions, [parent_condition, object_condition]);
		let mut sql = select_sql(schema);
		if !conditions.is_empty() {
			sql.push_str(" WHERE ");
			sql.push_str(&conditions.join(" AND "));
		}
		if let Some(limit) = limit {
			sql.push_str(&format!(" LIMIT {limit}"));
		}

		let rows = self
			.conn
			.prepare(&sql)?
			.query_map(params_from_iter(params), |row| read_row(schema, row))?
			.collect::<Result<Vec<_>, _>>()?;

		Ok(rows
			.into_iter()
			.filter_map(|row| {
				let id = row.id;
				self.record(schema, row)
					.map_err(|e| warn!(?e, type_name = %schema.name, id, "Skipping unreadable object;"))
					.ok()
			})
			.collect())
	}

	fn load_row(&self, schema: &TypeSchema, id: i64) -> Result<Option<RowData>, Error> {
		self.conn
			.query_row(
				&format!("{} WHERE id = ?1", select_sql(schema)),
				[id],
				|row| read_row(schema, row),
			)
			.optional()
			.map_err(Into::into)
	}

	fn object_ref(&self, type_id: i64, id: i64) -> Result<ObjectRef, Error> {
		self.registry
			.by_id(type_id)
			.map(|schema| ObjectRef::new(schema.name.clone(), id))
			.ok_or_else(|| Error::Consistency(format!("parent type {type_id} is not registered")))
	}

	fn record(&self, schema: &TypeSchema, row: RowData) -> Result<Record, Error> {
		let parent = row
			.parent
			.map(|(type_id, id)| self.object_ref(type_id, id))
			.transpose()?;

		let mut values = row.values;
		let attrs = schema
			.attrs
			.keys()
			.filter(|attr| *attr != "name")
			.map(|attr| (attr.clone(), values.remove(attr)))
			.collect();

		Ok(Record {
			object: ObjectRef::new(schema.name.clone(), row.id),
			parent,
			name: row.name,
			attrs,
		})
	}
}

fn select_sql(schema: &TypeSchema) -> String {
	let columns = schema
		.columns()
		.map(|(column, _)| format!(", {column}"))
		.collect::<String>();

	format!(
		"SELECT id, parent_type, parent_id, blob{columns} FROM {}",
		schema.table()
	)
}

fn read_row(schema: &TypeSchema, row: &Row<'_>) -> rusqlite::Result<RowData> {
	let parent = match (row.get::<_, Option<i64>>(1)?, row.get::<_, Option<i64>>(2)?) {
		(Some(type_id), Some(id)) => Some((type_id, id)),
		_ => None,
	};

	let mut values = match row.get::<_, Option<Vec<u8>>>(3)? {
		Some(blob) => rmp_serde::from_slice::<BTreeMap<String, Value>>(&blob).map_err(|e| {
			rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Blob, Box::new(e))
		})?,
		None => BTreeMap::new(),
	};

	let mut name = None;
	for (i, (column, def)) in schema.columns().enumerate() {
		let idx = i + 4;
		let raw = row.get_ref(idx)?;
		let value = Value::from_column(def.kind, raw).map_err(|e| {
			rusqlite::Error::FromSqlConversionFailure(idx, raw.data_type(), Box::new(e))
		})?;

		match (column, value) {
			("name", Some(Value::Str(s))) => name = Some(s),
			(_, Some(value)) => {
				values.insert(column.to_owned(), value);
			}
			(_, None) => {}
		}
	}

	Ok(RowData {
		id: row.get(0)?,
		parent,
		name: name.unwrap_or_default(),
		values,
	})
}

/// Validates `attrs` against the schema and folds them into `values`
fn merge_attrs(
	schema: &TypeSchema,
	values: &mut BTreeMap<String, Value>,
	attrs: Attrs,
) -> Result<(), Error> {
	for (attr, value) in attrs {
		if attr == "name" {
			return Err(Error::ReservedAttribute(attr));
		}
		let def = schema.attr(&attr)?;

		match value {
			Some(value) => {
				def.check(&attr, &value)?;
				values.insert(attr, value);
			}
			None => {
				values.remove(&attr);
			}
		}
	}

	Ok(())
}

/// `[parent_type, parent_id, blob, columns...]` for inserts and updates
fn write_params(schema: &TypeSchema, row: &RowData) -> Result<Vec<SqlValue>, Error> {
	let (parent_type, parent_id) = row.parent.map_or((SqlValue::Null, SqlValue::Null), |(t, id)| {
		(SqlValue::Integer(t), SqlValue::Integer(id))
	});

	let blob_values = row
		.values
		.iter()
		.filter(|(attr, _)| schema.attrs.get(*attr).is_some_and(|def| !def.is_column()))
		.collect::<BTreeMap<_, _>>();
	let blob = if blob_values.is_empty() {
		SqlValue::Null
	} else {
		SqlValue::Blob(rmp_serde::to_vec_named(&blob_values)?)
	};

	let mut params = vec![parent_type, parent_id, blob];
	params.extend(schema.columns().map(|(column, _)| {
		if column == "name" {
			SqlValue::Text(row.name.clone())
		} else {
			row.values.get(column).map_or(SqlValue::Null, sql_value)
		}
	}));

	Ok(params)
}

fn sql_value(value: &Value) -> SqlValue {
	match value {
		Value::Str(s) => SqlValue::Text(s.clone()),
		Value::Int(i) => SqlValue::Integer(*i),
		Value::Float(x) => SqlValue::Real(*x),
		Value::Bytes(b) => SqlValue::Blob(b.clone()),
		Value::List(_) => SqlValue::Null,
	}
}

/// Keyword-flagged texts of a row, the input of re-indexing decisions
fn keyword_source(schema: &TypeSchema, row: &RowData) -> Vec<(String, AttrFlags)> {
	schema
		.keyword_attrs()
		.flat_map(|(attr, def)| {
			let texts = if attr == "name" {
				vec![row.name.clone()]
			} else {
				row.values
					.get(attr)
					.map(|value| value.keyword_texts().into_iter().map(str::to_owned).collect())
					.unwrap_or_default()
			};
			texts.into_iter().map(move |text| (text, def.flags))
		})
		.collect()
}

fn keyword_scores(schema: &TypeSchema, row: &RowData) -> BTreeMap<String, f64> {
	let source = keyword_source(schema, row);
	keywords::score(source.iter().map(|(text, flags)| (text.as_str(), 1.0, *flags)))
}
