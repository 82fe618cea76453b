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
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::{ffi::OsStr, path::Path};

pub mod error;

/// Combines an iterator of `T` and an iterator of `Option<T>`,
/// removing any `None` values in the process
pub fn chain_optional_iter<T>(
	required: impl IntoIterator<Item = T>,
	optional: impl IntoIterator<Item = Option<T>>,
) -> Vec<T> {
	required
		.into_iter()
		.map(Some)
		.chain(optional)
		.flatten()
		.collect()
}

/// Dot-prefixed names are hidden and never indexed
#[must_use]
pub fn is_hidden_name(name: impl AsRef<OsStr>) -> bool {
	name.as_ref()
		.to_str()
		.map_or(false, |name| name.starts_with('.'))
}

/// Returns the final component of `path` as UTF-8, if it has one
pub fn file_name_str(path: &Path) -> Result<&str, error::NonUtf8PathError> {
	path.file_name()
		.and_then(OsStr::to_str)
		.ok_or_else(|| error::NonUtf8PathError(path.into()))
}
