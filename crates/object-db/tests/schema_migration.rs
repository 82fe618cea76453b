#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;
use sd_object_db::{attrs, AttrDef, AttrFlags, Error, ObjectStore, Query, Value, ValueKind};
use tempfile::tempdir;

fn defs(defs: &[(&str, ValueKind, AttrFlags)]) -> BTreeMap<String, AttrDef> {
	defs.iter()
		.map(|&(name, kind, flags)| (name.to_owned(), AttrDef::new(kind, flags)))
		.collect()
}

#[test]
fn registering_the_same_attributes_twice_is_a_no_op() {
	let mut store = ObjectStore::open_in_memory().unwrap();
	let attrs = defs(&[("artist", ValueKind::Str, AttrFlags::INDEXED)]);

	assert!(store.register_type("track", attrs.clone()).unwrap());
	let before = store.registry().get("track").unwrap().clone();

	assert!(!store.register_type("track", attrs).unwrap());
	assert_eq!(store.registry().get("track").unwrap(), &before);
}

#[test]
fn new_columns_keep_existing_rows() {
	let mut store = ObjectStore::open_in_memory().unwrap();
	store
		.register_type(
			"track",
			defs(&[
				("artist", ValueKind::Str, AttrFlags::INDEXED),
				("year", ValueKind::Int, AttrFlags::SIMPLE),
			]),
		)
		.unwrap();

	let added = store
		.add(
			"track",
			"so_what.flac",
			None,
			attrs! { "artist" => "Miles Davis", "year" => 1959_i64, "size" => 42_i64 },
		)
		.unwrap();

	// adds a column and promotes `year` from the blob into its own column
	store
		.register_type(
			"track",
			defs(&[
				("album", ValueKind::Str, AttrFlags::SEARCHABLE),
				("year", ValueKind::Int, AttrFlags::SEARCHABLE),
			]),
		)
		.unwrap();

	let fetched = store.get(&added.object).unwrap().unwrap();
	assert_eq!(fetched.object, added.object);
	assert_eq!(fetched.get("artist"), Some(&Value::from("Miles Davis")));
	assert_eq!(fetched.get_int("year"), Some(1959));
	assert_eq!(fetched.get_int("size"), Some(42));
	assert_eq!(fetched.get("album"), None);

	let by_year = store
		.query(&Query::new().of_type("track").filter("year", 1959_i64))
		.unwrap();
	assert_eq!(by_year.len(), 1);
}

#[test]
fn blob_only_additions_skip_the_migration() {
	let mut store = ObjectStore::open_in_memory().unwrap();
	store.register_type("note", BTreeMap::new()).unwrap();
	let added = store.add("note", "todo", None, attrs! { "size" => 1_i64 }).unwrap();

	assert!(store
		.register_type("note", defs(&[("body", ValueKind::Str, AttrFlags::SIMPLE)]))
		.unwrap());

	let updated = store
		.update(&added.object, None, None, attrs! { "body" => "buy milk" })
		.unwrap();
	assert_eq!(updated.get("body"), Some(&Value::from("buy milk")));
}

#[test]
fn reserved_and_malformed_names_fail_without_side_effects() {
	let mut store = ObjectStore::open_in_memory().unwrap();
	store.register_type("note", BTreeMap::new()).unwrap();
	let before = store.registry().get("note").unwrap().clone();

	let reserved = store.register_type(
		"note",
		defs(&[
			("body", ValueKind::Str, AttrFlags::SEARCHABLE),
			("parent", ValueKind::Int, AttrFlags::SIMPLE),
		]),
	);
	assert!(matches!(reserved, Err(Error::ReservedAttribute(name)) if name == "parent"));
	assert_eq!(store.registry().get("note").unwrap(), &before);

	assert!(matches!(
		store.register_type("bad name", BTreeMap::new()),
		Err(Error::InvalidIdentifier(_))
	));
}

#[test]
fn schemas_and_objects_survive_reopening() {
	let dir = tempdir().unwrap();
	let path = dir.path().join("index.db");

	let object = {
		let mut store = ObjectStore::open(&path).unwrap();
		store
			.register_type(
				"photo",
				defs(&[("caption", ValueKind::Str, AttrFlags::KEYWORDS)]),
			)
			.unwrap();
		store
			.add("photo", "img.jpg", None, attrs! { "caption" => "sunset over the bay" })
			.unwrap()
			.object
	};

	let store = ObjectStore::open(&path).unwrap();
	let fetched = store.get(&object).unwrap().unwrap();
	assert_eq!(fetched.get("caption"), Some(&Value::from("sunset over the bay")));
	assert_eq!(store.keyword_file_count().unwrap(), 1);

	let (hits, _) = store.keyword_search("sunset", None, None).unwrap();
	assert_eq!(hits.len(), 1);
	assert_eq!(hits[0].0, object);
}

#[test]
fn migrations_never_reuse_ids_of_deleted_objects() {
	let mut store = ObjectStore::open_in_memory().unwrap();
	store.register_type("track", BTreeMap::new()).unwrap();

	let album = store.add("track", "album", None, attrs! {}).unwrap();
	let orphan = store
		.add("track", "song.flac", Some(&album.object), attrs! {})
		.unwrap();
	let last = store.add("track", "last.flac", None, attrs! {}).unwrap();
	store.delete(&last.object).unwrap();

	store
		.register_type("track", defs(&[("genre", ValueKind::Str, AttrFlags::INDEXED)]))
		.unwrap();

	let added = store.add("track", "new.flac", None, attrs! {}).unwrap();
	assert!(added.object.id > last.object.id);
	assert_eq!(
		store.get(&orphan.object).unwrap().unwrap().parent,
		Some(album.object)
	);
}

#[test]
fn types_are_listed_in_registration_order() {
	let mut store = ObjectStore::open_in_memory().unwrap();
	store.register_type("zeta", BTreeMap::new()).unwrap();
	store.register_type("alpha", BTreeMap::new()).unwrap();

	let names = store
		.registry()
		.all()
		.into_iter()
		.map(|schema| schema.name.as_str())
		.collect::<Vec<_>>();
	assert_eq!(names, vec!["zeta", "alpha"]);
}
