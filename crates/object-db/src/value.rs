use std::{collections::BTreeMap, fmt};

use rusqlite::types::{FromSqlError, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Attribute map as passed to `add`/`update`, `None` clears the attribute
pub type Attrs = BTreeMap<String, Option<Value>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
	Str(String),
	Int(i64),
	Float(f64),
	Bytes(Vec<u8>),
	List(Vec<Value>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ValueKind {
	Str,
	Int,
	Float,
	Bytes,
	List,
}

impl ValueKind {
	pub(crate) const fn sql_type(self) -> &'static str {
		match self {
			Self::Str => "TEXT",
			Self::Int => "INTEGER",
			Self::Float => "REAL",
			Self::Bytes | Self::List => "BLOB",
		}
	}
}

impl Value {
	#[must_use]
	pub const fn kind(&self) -> ValueKind {
		match self {
			Self::Str(_) => ValueKind::Str,
			Self::Int(_) => ValueKind::Int,
			Self::Float(_) => ValueKind::Float,
			Self::Bytes(_) => ValueKind::Bytes,
			Self::List(_) => ValueKind::List,
		}
	}

	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(s) => Some(s),
			_ => None,
		}
	}

	#[must_use]
	pub const fn as_int(&self) -> Option<i64> {
		match self {
			Self::Int(i) => Some(*i),
			_ => None,
		}
	}

	/// Text fed to the keyword indexer, lists contribute each string element
	pub(crate) fn keyword_texts(&self) -> Vec<&str> {
		match self {
			Self::Str(s) => vec![s.as_str()],
			Self::List(items) => items.iter().filter_map(Self::as_str).collect(),
			_ => vec![],
		}
	}

	pub(crate) fn from_column(kind: ValueKind, raw: ValueRef<'_>) -> Result<Option<Self>, FromSqlError> {
		let value = match (kind, raw) {
			(_, ValueRef::Null) => return Ok(None),
			(ValueKind::Str, ValueRef::Text(text)) => {
				Self::Str(std::str::from_utf8(text).map_err(|e| FromSqlError::Other(Box::new(e)))?.to_owned())
			}
			(ValueKind::Int, ValueRef::Integer(i)) => Self::Int(i),
			(ValueKind::Float, ValueRef::Real(f)) => Self::Float(f),
			#[allow(clippy::cast_precision_loss)]
			(ValueKind::Float, ValueRef::Integer(i)) => Self::Float(i as f64),
			(ValueKind::Bytes, ValueRef::Blob(bytes)) => Self::Bytes(bytes.to_vec()),
			_ => return Err(FromSqlError::InvalidType),
		};

		Ok(Some(value))
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Str(s) => write!(f, "{s:?}"),
			Self::Int(i) => write!(f, "{i}"),
			Self::Float(x) => write!(f, "{x}"),
			Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
			Self::List(items) => write!(f, "<list of {}>", items.len()),
		}
	}
}

impl ToSql for Value {
	fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
		Ok(match self {
			Self::Str(s) => ToSqlOutput::from(s.as_str()),
			Self::Int(i) => ToSqlOutput::from(*i),
			Self::Float(x) => ToSqlOutput::from(*x),
			Self::Bytes(b) => ToSqlOutput::from(b.as_slice()),
			Self::List(_) => {
				return Err(rusqlite::Error::ToSqlConversionFailure(
					"list values live in the attribute blob".into(),
				))
			}
		})
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Self::Str(s.to_owned())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Self::Str(s)
	}
}

impl From<i64> for Value {
	fn from(i: i64) -> Self {
		Self::Int(i)
	}
}

impl From<f64> for Value {
	fn from(x: f64) -> Self {
		Self::Float(x)
	}
}

impl From<Vec<u8>> for Value {
	fn from(b: Vec<u8>) -> Self {
		Self::Bytes(b)
	}
}

impl From<Vec<Self>> for Value {
	fn from(items: Vec<Self>) -> Self {
		Self::List(items)
	}
}

/// Builds an [`Attrs`] map from `name => value` pairs
#[macro_export]
macro_rules! attrs {
	() => { $crate::Attrs::new() };
	($($name:expr => $value:expr),+ $(,)?) => {{
		let mut attrs = $crate::Attrs::new();
		$(attrs.insert($name.to_string(), Some($crate::Value::from($value)));)+
		attrs
	}};
}
