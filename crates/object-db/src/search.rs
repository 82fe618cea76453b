//! Ranked keyword search over the inverted index.
//!
//! Terms are intersected rarest first. Each pass sweeps the rank buckets from
//! 10 down to 0, pulling at most `sql_limit` mapping rows per term and bucket.
//! When a pass can't produce enough intersecting objects the window grows
//! tenfold and the sweep resumes where every term left off, which bounds the
//! total number of sub-queries even when terms never co-occur.

use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::{
	error::Error,
	keywords::{self, tokenize},
	schema::AttrFlags,
};

const RANKS: usize = 11;
const MIN_SQL_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
	pub type_id: i64,
	pub object_id: i64,
	pub score: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
	/// Mapping sub-queries issued
	pub queries: usize,
	pub passes: usize,
}

type ObjectKey = (i64, i64);

struct Term {
	word_id: i64,
	idf: f64,
	offsets: [usize; RANKS],
	exhausted: [bool; RANKS],
	partial: HashMap<ObjectKey, f64>,
}

impl Term {
	fn done(&self) -> bool {
		self.exhausted.iter().all(|done| *done)
	}
}

/// Runs a keyword query, optionally restricted to one object type.
///
/// A `limit` of `None` or `Some(0)` returns every match.
#[instrument(skip(conn), err)]
pub fn search(
	conn: &Connection,
	text: &str,
	type_id: Option<i64>,
	limit: Option<usize>,
) -> Result<(Vec<Hit>, SearchStats), Error> {
	let mut stats = SearchStats::default();
	let limit = limit.filter(|limit| *limit > 0);

	let mut words = tokenize(text, AttrFlags::KEYWORDS);
	words.sort_unstable();
	words.dedup();
	if words.is_empty() {
		return Ok((vec![], stats));
	}

	#[allow(clippy::cast_precision_loss)]
	let file_count = keywords::file_count(conn)?.max(1) as f64;

	let mut terms = Vec::with_capacity(words.len());
	for word in &words {
		let Some((word_id, doc_freq)) = conn
			.query_row("SELECT id, count FROM words WHERE word = ?1", [word], |row| {
				Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
			})
			.optional()?
		else {
			debug!(%word, "Query term is not indexed;");
			return Ok((vec![], stats));
		};

		#[allow(clippy::cast_precision_loss)]
		let idf = (file_count / doc_freq.max(1) as f64 + 1.0).ln() + 1.0;
		terms.push((doc_freq, Term {
			word_id,
			idf,
			offsets: [0; RANKS],
			exhausted: [false; RANKS],
			partial: HashMap::new(),
		}));
	}

	terms.sort_by_key(|(doc_freq, term)| (*doc_freq, term.word_id));
	let mut terms = terms.into_iter().map(|(_, term)| term).collect::<Vec<_>>();

	let mut sql_limit = limit.map(|limit| (limit * 2).max(MIN_SQL_LIMIT));
	let mut matches;

	loop {
		stats.passes += 1;
		matches = HashSet::new();

		for rank in (0..RANKS).rev() {
			for term in &mut terms {
				if term.exhausted[rank] {
					continue;
				}
				let fetched = fetch_rank(conn, term, rank, type_id, sql_limit)?;
				stats.queries += 1;

				term.offsets[rank] += fetched;
				if sql_limit.map_or(true, |window| fetched < window) {
					term.exhausted[rank] = true;
				}
			}

			matches = intersect(&terms);
			if limit.is_some_and(|limit| matches.len() > 2 * limit) {
				break;
			}
		}

		if terms.iter().all(Term::done) || limit.is_some_and(|limit| matches.len() >= limit) {
			break;
		}

		if terms
			.windows(2)
			.any(|pair| pair[0].done() && pair[1].done() && disjoint(&pair[0], &pair[1]))
		{
			debug!(?stats, "Query terms never co-occur;");
			return Ok((vec![], stats));
		}

		sql_limit = sql_limit.map(|window| window * 10);
	}

	let mut hits = matches
		.into_iter()
		.map(|key @ (type_id, object_id)| Hit {
			type_id,
			object_id,
			score: terms.iter().filter_map(|term| term.partial.get(&key)).sum(),
		})
		.collect::<Vec<_>>();

	hits.sort_by(|a, b| {
		b.score
			.total_cmp(&a.score)
			.then(a.type_id.cmp(&b.type_id))
			.then(a.object_id.cmp(&b.object_id))
	});
	if let Some(limit) = limit {
		hits.truncate(limit);
	}

	debug!(?stats, hits = hits.len(), "Keyword search finished;");

	Ok((hits, stats))
}

#[allow(clippy::cast_possible_wrap)]
fn fetch_rank(
	conn: &Connection,
	term: &mut Term,
	rank: usize,
	type_id: Option<i64>,
	sql_limit: Option<usize>,
) -> Result<usize, Error> {
	// LIMIT -1 means no limit in SQLite
	let window = sql_limit.map_or(-1, |window| window as i64);
	let offset = term.offsets[rank] as i64;
	let rank = rank as i64;

	let rows = if let Some(type_id) = type_id {
		conn.prepare_cached(
			"SELECT object_type, object_id, frequency FROM words_map
				WHERE word_id = ?1 AND rank = ?2 AND object_type = ?3
				ORDER BY object_type, object_id LIMIT ?4 OFFSET ?5",
		)?
		.query_map(
			rusqlite::params![term.word_id, rank, type_id, window, offset],
			mapping_row,
		)?
		.collect::<Result<Vec<_>, _>>()?
	} else {
		conn.prepare_cached(
			"SELECT object_type, object_id, frequency FROM words_map
				WHERE word_id = ?1 AND rank = ?2
				ORDER BY object_type, object_id LIMIT ?3 OFFSET ?4",
		)?
		.query_map(
			rusqlite::params![term.word_id, rank, window, offset],
			mapping_row,
		)?
		.collect::<Result<Vec<_>, _>>()?
	};

	let fetched = rows.len();
	for (key, frequency) in rows {
		*term.partial.entry(key).or_default() += frequency * term.idf;
	}

	Ok(fetched)
}

fn mapping_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ObjectKey, f64)> {
	Ok(((row.get(0)?, row.get(1)?), row.get(2)?))
}

fn intersect(terms: &[Term]) -> HashSet<ObjectKey> {
	let Some((first, rest)) = terms.split_first() else {
		return HashSet::new();
	};

	first
		.partial
		.keys()
		.filter(|key| rest.iter().all(|term| term.partial.contains_key(key)))
		.copied()
		.collect()
}

fn disjoint(a: &Term, b: &Term) -> bool {
	a.partial.keys().all(|key| !b.partial.contains_key(key))
}
