#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::BTreeMap;

use sd_object_db::{
	attrs, AttrDef, AttrFlags, ObjectRef, ObjectStore, Query, Record, Value, ValueKind,
};

fn store() -> ObjectStore {
	let mut store = ObjectStore::open_in_memory().unwrap();
	store
		.register_type(
			"photo",
			BTreeMap::from([
				(
					"caption".to_string(),
					AttrDef::new(ValueKind::Str, AttrFlags::KEYWORDS),
				),
				(
					"album".to_string(),
					AttrDef::new(ValueKind::Str, AttrFlags::INDEXED),
				),
			]),
		)
		.unwrap();
	store
		.register_type(
			"document",
			BTreeMap::from([(
				"name".to_string(),
				AttrDef::new(ValueKind::Str, AttrFlags::KEYWORDS_FILENAME),
			)]),
		)
		.unwrap();
	store
}

fn word_count(store: &ObjectStore, word: &str) -> usize {
	store
		.keyword_search(word, None, None)
		.unwrap()
		.0
		.len()
}

fn photo(store: &mut ObjectStore, name: &str, caption: &str) -> Record {
	store
		.add("photo", name, None, attrs! { "caption" => caption })
		.unwrap()
}

#[test]
fn only_objects_containing_every_term_match() {
	let mut store = store();
	let first = photo(&mut store, "1.jpg", "beach photo");
	photo(&mut store, "2.jpg", "beach");
	photo(&mut store, "3.jpg", "photo trip");

	let found = store.query(&Query::new().keywords("beach photo")).unwrap();

	assert_eq!(found.len(), 1);
	assert_eq!(found[0].object, first.object);
}

#[test]
fn unknown_terms_match_nothing() {
	let mut store = store();
	photo(&mut store, "1.jpg", "beach photo");

	assert!(store
		.query(&Query::new().keywords("beach volcano"))
		.unwrap()
		.is_empty());
	assert!(store.query(&Query::new().keywords("a")).unwrap().is_empty());
}

#[test]
fn results_are_ordered_by_score() {
	let mut store = store();
	let diluted = photo(&mut store, "1.jpg", "beach sand waves sunset palms");
	let focused = photo(&mut store, "2.jpg", "beach beach");

	let found = store.query(&Query::new().keywords("beach")).unwrap();

	assert_eq!(
		found.iter().map(|r| &r.object).collect::<Vec<_>>(),
		vec![&focused.object, &diluted.object]
	);
}

#[test]
fn limit_applies_after_ranking() {
	let mut store = store();
	for i in 0..30 {
		photo(&mut store, &format!("{i}.jpg"), "summer holiday");
	}

	let found = store
		.query(&Query::new().keywords("summer holiday").limit(5))
		.unwrap();
	assert_eq!(found.len(), 5);
}

#[test]
fn filters_combine_with_keywords() {
	let mut store = store();
	store
		.add("photo", "1.jpg", None, attrs! { "caption" => "harbour", "album" => "lisbon" })
		.unwrap();
	let porto = store
		.add("photo", "2.jpg", None, attrs! { "caption" => "harbour", "album" => "porto" })
		.unwrap();

	let found = store
		.query(
			&Query::new()
				.keywords("harbour")
				.filter("album", "porto")
				.limit(1),
		)
		.unwrap();

	assert_eq!(found.len(), 1);
	assert_eq!(found[0].object, porto.object);
}

#[test]
fn type_restriction_limits_the_search() {
	let mut store = store();
	photo(&mut store, "1.jpg", "invoice");
	let doc = store
		.add("document", "/home/me/taxes/invoice.pdf", None, attrs! {})
		.unwrap();

	let found = store
		.query(&Query::new().of_type("document").keywords("invoice"))
		.unwrap();
	assert_eq!(found.len(), 1);
	assert_eq!(found[0].object, doc.object);

	// path segments above the two parent directories are never indexed
	assert!(store.query(&Query::new().keywords("home")).unwrap().is_empty());
	assert_eq!(word_count(&store, "taxes"), 1);
}

#[test]
fn disjoint_terms_stop_after_a_bounded_number_of_queries() {
	let mut store = store();
	for i in 0..50 {
		photo(&mut store, &format!("a{i}.jpg"), "mountain");
		photo(&mut store, &format!("b{i}.jpg"), "ocean");
	}

	let (hits, stats) = store
		.keyword_search("mountain ocean", None, Some(3))
		.unwrap();

	assert!(hits.is_empty());
	// 11 rank buckets, 2 terms, window growing tenfold per pass
	assert!(stats.passes <= 3, "{stats:?}");
	assert!(stats.queries <= 11 * 2 * 3, "{stats:?}");
}

#[test]
fn unchanged_keywords_leave_word_counts_alone() {
	let mut store = store();
	let a = photo(&mut store, "1.jpg", "red kite");
	photo(&mut store, "2.jpg", "red squirrel");

	store
		.update(&a.object, None, None, attrs! { "caption" => "red kite", "album" => "birds" })
		.unwrap();
	assert_eq!(word_count(&store, "red"), 2);
	assert_eq!(word_count(&store, "kite"), 1);
	assert_eq!(store.keyword_file_count().unwrap(), 2);

	store
		.update(&a.object, None, None, attrs! { "caption" => "blue kite" })
		.unwrap();
	assert_eq!(word_count(&store, "red"), 1);
	assert_eq!(word_count(&store, "blue"), 1);
	assert_eq!(store.keyword_file_count().unwrap(), 2);
}

#[test]
fn deleting_removes_index_entries() {
	let mut store = store();
	let a = photo(&mut store, "1.jpg", "lighthouse");

	store.delete(&a.object).unwrap();

	assert_eq!(word_count(&store, "lighthouse"), 0);
	assert_eq!(store.keyword_file_count().unwrap(), 0);
}

#[test]
fn deleting_a_parent_keeps_its_children() {
	let mut store = store();
	let album = photo(&mut store, "holiday", "album");
	let child = store
		.add(
			"photo",
			"1.jpg",
			Some(&album.object),
			attrs! { "caption" => "pier" },
		)
		.unwrap();

	store.delete(&album.object).unwrap();

	let orphan = store.get(&child.object).unwrap().unwrap();
	assert_eq!(orphan.parent, Some(album.object));
	assert_eq!(word_count(&store, "pier"), 1);
}

#[test]
fn changing_type_moves_children_along() {
	let mut store = store();
	let parent = photo(&mut store, "scan", "receipt");
	let child = store
		.add("photo", "page1.jpg", Some(&parent.object), attrs! {})
		.unwrap();

	let moved = store.change_type(&parent.object, "document").unwrap();

	assert_eq!(moved.name, "scan");
	assert!(store.get(&parent.object).unwrap().is_none());
	assert_eq!(
		store.get(&child.object).unwrap().unwrap().parent,
		Some(moved.object.clone())
	);
	assert_eq!(
		store.children(&moved.object).unwrap()[0].object,
		child.object
	);
	// captions don't exist on documents
	assert_eq!(moved.attrs.get("caption"), None);
	assert_eq!(word_count(&store, "receipt"), 0);
	assert_eq!(
		store.lookup(None, "scan").unwrap().map(|r| r.object),
		Some(ObjectRef::new("document", moved.object.id))
	);
	assert_eq!(moved.get("size"), None::<&Value>);
}
