//!
//! Object database with a dynamic schema per object type.
//!
//! Every object type gets its own `objects_<type>` table. Attributes flagged
//! [`AttrFlags::SEARCHABLE`] or [`AttrFlags::INDEXED`] live in columns and can
//! be filtered on, everything else is packed into a MessagePack blob. Text of
//! attributes flagged [`AttrFlags::KEYWORDS`] feeds an inverted index queried
//! with [`Query::keywords`].
//!
//! [`ObjectStore`] is the synchronous store working on one SQLite connection.
//! [`DbHandle`] moves it to a dedicated thread and serializes every caller
//! through a FIFO job queue:
//!
//! ```no_run
//! use std::{collections::BTreeMap, time::Duration};
//!
//! use sd_object_db::{attrs, AttrDef, AttrFlags, DbHandle, ObjectStore, Query, ValueKind};
//!
//! # async fn example() -> Result<(), sd_object_db::Error> {
//! let db = DbHandle::spawn(ObjectStore::open("index.db")?, Duration::from_millis(100))?;
//!
//! db.register_type(
//! 	"photo",
//! 	BTreeMap::from([(
//! 		"caption".to_string(),
//! 		AttrDef::new(ValueKind::Str, AttrFlags::KEYWORDS),
//! 	)]),
//! )
//! .await?;
//!
//! db.add("photo", "IMG_0001.jpg", None, attrs! { "caption" => "beach at dusk" })
//! 	.await?;
//!
//! let found = db.query(Query::new().keywords("beach").limit(10)).await?;
//! assert_eq!(found.len(), 1);
//! # Ok(())
//! # }
//! ```
#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod error;
mod executor;
pub mod keywords;
mod schema;
mod search;
mod store;
mod value;

pub use error::Error;
pub use executor::{DbHandle, JobHandle};
pub use schema::{AttrDef, AttrFlags, SchemaRegistry, TypeSchema, RESERVED_NAMES};
pub use search::{Hit, SearchStats};
pub use store::{BatchReport, Change, ObjectRef, ObjectStore, Query, Record};
pub use value::{Attrs, Value, ValueKind};
