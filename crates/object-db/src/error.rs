use crate::{value::ValueKind, ObjectRef};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	// Schema errors
	#[error("invalid identifier: '{0}'")]
	InvalidIdentifier(String),
	#[error("attribute name is reserved: '{0}'")]
	ReservedAttribute(String),
	#[error("unknown object type: '{0}'")]
	UnknownType(String),
	#[error("unknown attribute '{attr}' for type '{type_name}'")]
	UnknownAttribute { type_name: String, attr: String },
	#[error("attribute '{attr}' of type '{type_name}' is not stored in a column")]
	NotSearchable { type_name: String, attr: String },
	#[error("attribute '{attr}' expects {expected}, got {found}")]
	TypeMismatch {
		attr: String,
		expected: ValueKind,
		found: ValueKind,
	},
	#[error("attribute '{attr}' can't change kind from {from} to {to}")]
	KindChange {
		attr: String,
		from: ValueKind,
		to: ValueKind,
	},
	#[error("list attribute '{0}' can't be stored in a column")]
	ListColumn(String),

	// Lookup errors
	#[error("object not found: {0}")]
	NotFound(ObjectRef),
	#[error("inconsistent store: {0}")]
	Consistency(String),

	// Storage errors
	#[error("storage error: {0}")]
	Storage(#[from] rusqlite::Error),
	#[error("failed to encode attribute blob: {0}")]
	Encode(#[from] rmp_serde::encode::Error),
	#[error("failed to decode attribute blob: {0}")]
	Decode(#[from] rmp_serde::decode::Error),

	// Executor errors
	#[error("failed to spawn database worker thread: {0}")]
	WorkerSpawn(#[source] std::io::Error),
	#[error("database job panicked")]
	JobPanicked,
	#[error("database worker is shut down")]
	ExecutorShutdown,
}

impl Error {
	#[must_use]
	pub const fn is_schema_error(&self) -> bool {
		matches!(
			self,
			Self::InvalidIdentifier(_)
				| Self::ReservedAttribute(_)
				| Self::UnknownType(_)
				| Self::UnknownAttribute { .. }
				| Self::NotSearchable { .. }
				| Self::TypeMismatch { .. }
				| Self::KindChange { .. }
				| Self::ListColumn(_)
		)
	}

	/// Sibling name collisions and other constraint failures
	#[must_use]
	pub fn is_constraint_violation(&self) -> bool {
		matches!(
			self,
			Self::Storage(rusqlite::Error::SqliteFailure(e, _))
				if e.code == rusqlite::ErrorCode::ConstraintViolation
		)
	}
}
