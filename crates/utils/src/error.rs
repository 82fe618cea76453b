use std::{
	fmt::{self, Display},
	io,
	path::Path,
};

use thiserror::Error;
use tracing::error;

/// Logs the error side of a fire-and-forget `Result`
pub fn report_error(res: &Result<(), impl Display>) {
	if let Err(e) = res {
		error!("{e:#}");
	}
}

/// I/O error carrying the path it happened on
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
	pub maybe_context: Option<&'static str>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "file I/O error")?;
		if let Some(ctx) = self.maybe_context {
			write!(f, " ({ctx})")?;
		}
		write!(f, ": {}; <path='{}'>", self.source, self.path.display())
	}
}

impl FileIOError {
	pub fn new(path: impl AsRef<Path>, source: io::Error) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}

	pub fn with_context(path: impl AsRef<Path>, source: io::Error, ctx: &'static str) -> Self {
		Self {
			maybe_context: Some(ctx),
			..Self::new(path, source)
		}
	}

	/// Vanished files are routine for a crawler, callers usually treat them as empty
	#[must_use]
	pub fn is_not_found(&self) -> bool {
		self.source.kind() == io::ErrorKind::NotFound
	}
}

impl From<(&Path, io::Error)> for FileIOError {
	fn from((path, source): (&Path, io::Error)) -> Self {
		Self::new(path, source)
	}
}

/// Error for paths that contain non-UTF8 characters
#[derive(Error, Debug)]
#[error("received a non UTF-8 path: <path='{}'>", .0.display())]
pub struct NonUtf8PathError(pub Box<Path>);

#[cfg(test)]
mod tests {
	use super::*;

	use tracing_test::traced_test;

	#[test]
	fn display_includes_context_and_path() {
		let e = FileIOError::with_context(
			"/tmp/missing",
			io::Error::from(io::ErrorKind::NotFound),
			"reading directory",
		);

		let msg = e.to_string();
		assert!(msg.starts_with("file I/O error (reading directory):"));
		assert!(msg.ends_with("<path='/tmp/missing'>"));
		assert!(e.is_not_found());
	}

	#[test]
	#[traced_test]
	fn report_error_logs_failures() {
		let res: Result<(), _> = Err(FileIOError::new(
			"/nowhere",
			io::Error::from(io::ErrorKind::PermissionDenied),
		));
		report_error(&res);

		assert!(logs_contain("/nowhere"));
	}
}
