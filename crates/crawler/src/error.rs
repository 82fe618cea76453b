use sd_utils::error::{FileIOError, NonUtf8PathError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
	#[error("database error: {0}")]
	Db(#[from] sd_object_db::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	NonUtf8Path(#[from] NonUtf8PathError),
	#[error("watcher error: {0}")]
	Watch(#[from] notify::Error),
	#[error("inconsistent index: {0}")]
	Consistency(String),
	#[error("invalid configuration: {0}")]
	Config(#[from] toml::de::Error),
}
