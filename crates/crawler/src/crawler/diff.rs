use std::cmp::Ordering;

use itertools::{EitherOrBoth, Itertools};

/// Outcome of merging the stored children of a directory with its listing
#[derive(Debug, PartialEq, Eq)]
pub struct DirDiff<S, L> {
	pub unchanged: Vec<(S, L)>,
	/// On disk, not in the index
	pub added: Vec<L>,
	/// In the index, gone from disk
	pub removed: Vec<S>,
}

impl<S, L> Default for DirDiff<S, L> {
	fn default() -> Self {
		Self {
			unchanged: vec![],
			added: vec![],
			removed: vec![],
		}
	}
}

/// Single pass over two name-sorted sequences
pub fn diff_sorted<S, L>(
	stored: impl IntoIterator<Item = S>,
	live: impl IntoIterator<Item = L>,
	mut cmp: impl FnMut(&S, &L) -> Ordering,
) -> DirDiff<S, L> {
	stored
		.into_iter()
		.merge_join_by(live, |stored, live| cmp(stored, live))
		.fold(DirDiff::default(), |mut diff, entry| {
			match entry {
				EitherOrBoth::Both(stored, live) => diff.unchanged.push((stored, live)),
				EitherOrBoth::Left(stored) => diff.removed.push(stored),
				EitherOrBoth::Right(live) => diff.added.push(live),
			}
			diff
		})
}

#[cfg(test)]
mod tests {
	use super::*;

	use pretty_assertions::assert_eq;

	#[test]
	fn classifies_every_name_once() {
		let diff = diff_sorted(["a", "c", "e"], ["a", "b", "c", "d"], |s, l| s.cmp(l));

		assert_eq!(diff.unchanged, vec![("a", "a"), ("c", "c")]);
		assert_eq!(diff.added, vec!["b", "d"]);
		assert_eq!(diff.removed, vec!["e"]);
	}

	#[test]
	fn empty_sides() {
		let diff = diff_sorted(Vec::<&str>::new(), ["x"], |s, l| s.cmp(l));
		assert_eq!(diff.added, vec!["x"]);

		let diff = diff_sorted(["x"], Vec::<&str>::new(), |s, l| s.cmp(l));
		assert_eq!(diff.removed, vec!["x"]);
		assert!(diff.unchanged.is_empty());
	}
}
