use std::collections::{BTreeMap, HashSet};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::trace;

use crate::{error::Error, schema::AttrFlags};

const MIN_WORD_LEN: usize = 2;
const MAX_WORD_LEN: usize = 30;

const SPLIT_CHARS: [char; 9] = ['_', '-', '(', ')', '/', '\\', '[', ']', '"'];

const STOP_WORDS: [&str; 26] = [
	"an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "in", "is", "it", "no",
	"not", "of", "on", "or", "that", "the", "this", "to", "was", "were", "with", "de",
];

const FILECOUNT_KEY: &str = "keywords_filecount";

/// Splits `text` into index terms, lower-cased and filtered
pub fn tokenize(text: &str, flags: AttrFlags) -> Vec<String> {
	let candidate = if flags.contains(AttrFlags::KEYWORDS_FILENAME) {
		filename_text(text)
	} else {
		text.to_owned()
	};

	candidate
		.split(|c: char| c.is_whitespace() || SPLIT_CHARS.contains(&c))
		.filter_map(|word| {
			let word = word.to_lowercase();
			let len = word.chars().count();
			((MIN_WORD_LEN..=MAX_WORD_LEN).contains(&len) && !STOP_WORDS.contains(&word.as_str()))
				.then_some(word)
		})
		.collect()
}

/// Reduces a path to its two parent directories and the basename without
/// extension, so absolute prefixes never reach the index
fn filename_text(path: &str) -> String {
	let mut segments = path
		.split(['/', '\\'])
		.filter(|segment| !segment.is_empty())
		.collect::<Vec<_>>();

	let Some(basename) = segments.pop() else {
		return String::new();
	};
	let stem = match basename.rsplit_once('.') {
		Some((stem, _)) if !stem.is_empty() => stem,
		_ => basename,
	};

	let dirs = &segments[segments.len().saturating_sub(2)..];
	let mut text = dirs.join(" ");
	if !text.is_empty() {
		text.push(' ');
	}
	text.push_str(stem);
	text
}

/// Word scores for one object, from `(text, coefficient, flags)` parts.
///
/// Scores are `sqrt(weight / total)` clamped to `1.0`, so every indexed word
/// ends up in `(0, 1]`.
pub fn score<'a>(parts: impl IntoIterator<Item = (&'a str, f64, AttrFlags)>) -> BTreeMap<String, f64> {
	let mut weights = BTreeMap::<String, f64>::new();
	let mut total = 0_u32;

	for (text, coefficient, flags) in parts {
		for word in tokenize(text, flags) {
			*weights.entry(word).or_default() += coefficient;
			total += 1;
		}
	}

	let total = f64::from(total);
	weights
		.into_iter()
		.filter(|(_, weight)| *weight > 0.0)
		.map(|(word, weight)| (word, (weight / total).sqrt().min(1.0)))
		.collect()
}

#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn rank(score: f64) -> u8 {
	(score * 10.0).floor().clamp(0.0, 10.0) as u8
}

pub(crate) fn file_count(conn: &Connection) -> Result<i64, Error> {
	Ok(conn
		.query_row("SELECT value FROM meta WHERE key = ?1", [FILECOUNT_KEY], |row| row.get(0))
		.optional()?
		.unwrap_or(0))
}

fn bump_file_count(conn: &Connection, delta: i64) -> Result<(), Error> {
	conn.execute(
		"INSERT INTO meta (key, value) VALUES (?1, MAX(?2, 0))
			ON CONFLICT(key) DO UPDATE SET value = MAX(value + ?2, 0)",
		params![FILECOUNT_KEY, delta],
	)?;

	Ok(())
}

/// Adds an object's word scores to the inverted index
pub(crate) fn index_object(
	conn: &Connection,
	type_id: i64,
	object_id: i64,
	scores: &BTreeMap<String, f64>,
) -> Result<(), Error> {
	if scores.is_empty() {
		return Ok(());
	}

	let mut find_word = conn.prepare_cached("SELECT id FROM words WHERE word = ?1")?;
	let mut bump_word = conn.prepare_cached("UPDATE words SET count = count + 1 WHERE id = ?1")?;
	let mut new_word = conn.prepare_cached("INSERT INTO words (word, count) VALUES (?1, 1)")?;
	let mut map_word = conn.prepare_cached(
		"INSERT INTO words_map (rank, word_id, object_type, object_id, frequency)
			VALUES (?1, ?2, ?3, ?4, ?5)",
	)?;

	for (word, score) in scores {
		let word_id = if let Some(id) = find_word
			.query_row([word], |row| row.get::<_, i64>(0))
			.optional()?
		{
			bump_word.execute([id])?;
			id
		} else {
			new_word.execute([word])?;
			conn.last_insert_rowid()
		};

		map_word.execute(params![rank(*score), word_id, type_id, object_id, score])?;
	}

	bump_file_count(conn, 1)?;
	trace!(type_id, object_id, words = scores.len(), "Indexed object keywords;");

	Ok(())
}

/// Drops every index entry of an object; words nobody uses anymore are forgotten
pub(crate) fn unindex_object(conn: &Connection, type_id: i64, object_id: i64) -> Result<(), Error> {
	let word_ids = conn
		.prepare_cached("SELECT word_id FROM words_map WHERE object_type = ?1 AND object_id = ?2")?
		.query_map([type_id, object_id], |row| row.get::<_, i64>(0))?
		.collect::<Result<HashSet<_>, _>>()?;

	if word_ids.is_empty() {
		return Ok(());
	}

	conn.execute(
		"DELETE FROM words_map WHERE object_type = ?1 AND object_id = ?2",
		[type_id, object_id],
	)?;

	let mut drop_word = conn.prepare_cached("UPDATE words SET count = count - 1 WHERE id = ?1")?;
	for word_id in &word_ids {
		drop_word.execute([word_id])?;
	}
	conn.execute("DELETE FROM words WHERE count <= 0", [])?;

	bump_file_count(conn, -1)?;
	trace!(type_id, object_id, words = word_ids.len(), "Removed object keywords;");

	Ok(())
}
