extern crate byteorder;
extern crate hex;
extern crate md5;
extern crate mongolite;

mod mock;

use byteorder::{ByteOrder, LittleEndian};
use md5::{Digest, Md5};
use mongolite::bson::{DocumentBuilder, DocumentView, ElementType};
use mongolite::client::command::IndexOptions;
use mongolite::client::{Connection, ServerError};
use mongolite::wire_protocol::flags::{OpQueryFlags, OpUpdateFlags};
use mongolite::Error;

use mock::MockConnector;

fn connected(connector: MockConnector) -> Connection<MockConnector> {
    let mut conn = Connection::with_connector(connector);
    conn.connect("localhost", 27017).unwrap();
    conn
}

// The first document of an OP_INSERT frame.
fn insert_doc<'a>(frame: &'a [u8], namespace: &str) -> DocumentView<'a> {
    let offset = 16 + 4 + namespace.len() + 1;
    DocumentView::new(&frame[offset..])
}

// The query document of an OP_QUERY frame.
fn query_doc<'a>(frame: &'a [u8], namespace: &str) -> DocumentView<'a> {
    let offset = 16 + 4 + namespace.len() + 1 + 8;
    DocumentView::new(&frame[offset..])
}

#[test]
fn insert_then_query_round_trip() {
    let mut builder = DocumentBuilder::new();
    builder.append_new_oid("_id").unwrap();
    builder.append_i32("n", 1).unwrap();
    let stored = builder.into_document().unwrap();

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", mock::reply_bytes(0, &[&stored]));
    let written = connector.written.clone();

    let mut conn = connected(connector);
    conn.insert("db.c", &stored).unwrap();

    let query = mock::doc_i32("n", 1);
    {
        let mut cursor = conn
            .find("db.c", &query, None, 1, 0, OpQueryFlags::no_flags())
            .unwrap();
        assert!(cursor.advance().unwrap());
        let current = cursor.current().unwrap();
        let mut it = current.reader();
        assert_eq!(it.find("n").unwrap(), ElementType::Int32);
        assert_eq!(it.as_i32(), 1);
        assert!(!cursor.advance().unwrap());
    }

    // The server id was already zero, so no release is sent on drop.
    let log = written.borrow();
    assert_eq!(mock::sent_opcodes(&log), vec![2002, 2004]);
    let frames = mock::sent_frames(&log);
    let mut sent = insert_doc(frames[0], "db.c").reader();
    assert_eq!(sent.find("n").unwrap(), ElementType::Int32);
    assert_eq!(sent.i32_value(), 1);
}

#[test]
fn cursor_fetches_continuations() {
    let first = mock::doc_i32("n", 1);
    let second = mock::doc_i32("n", 2);

    let mut stream = mock::reply_bytes(91, &[&first]);
    stream.extend_from_slice(&mock::reply_bytes(0, &[&second]));

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", stream);
    let written = connector.written.clone();

    let mut conn = connected(connector);
    let query = mongolite::bson::Document::empty();
    {
        let mut cursor = conn
            .find("db.c", &query, None, 0, 0, OpQueryFlags::no_flags())
            .unwrap();

        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.cursor_id(), 91);
        {
            let mut it = cursor.current().unwrap().reader();
            it.find("n").unwrap();
            assert_eq!(it.i32_value(), 1);
        }

        assert!(cursor.advance().unwrap());
        {
            let mut it = cursor.current().unwrap().reader();
            it.find("n").unwrap();
            assert_eq!(it.i32_value(), 2);
        }

        assert!(!cursor.advance().unwrap());
    }

    let log = written.borrow();
    assert_eq!(mock::sent_opcodes(&log), vec![2004, 2005]);

    // The continuation carries the live cursor id.
    let frames = mock::sent_frames(&log);
    let get_more = frames[1];
    assert_eq!(
        LittleEndian::read_i64(&get_more[get_more.len() - 8..]),
        91
    );
}

#[test]
fn dropping_a_live_cursor_releases_it() {
    let doc = mock::doc_i32("n", 1);

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", mock::reply_bytes(55, &[&doc]));
    let written = connector.written.clone();

    let mut conn = connected(connector);
    let query = mongolite::bson::Document::empty();
    {
        let mut cursor = conn
            .find("db.c", &query, None, 0, 0, OpQueryFlags::no_flags())
            .unwrap();
        assert!(cursor.advance().unwrap());
        // Dropped with the batch unfinished and the server id live.
    }

    let log = written.borrow();
    assert_eq!(mock::sent_opcodes(&log), vec![2004, 2007]);

    let frames = mock::sent_frames(&log);
    let kill = frames[1];
    assert_eq!(LittleEndian::read_i32(&kill[20..24]), 1);
    assert_eq!(LittleEndian::read_i64(&kill[24..32]), 55);
}

#[test]
fn tailable_cursor_reports_pending() {
    let mut stream = mock::reply_bytes(77, &[]);
    stream.extend_from_slice(&mock::reply_bytes(77, &[]));

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", stream);
    let written = connector.written.clone();

    let mut conn = connected(connector);
    let query = mongolite::bson::Document::empty();
    {
        let mut cursor = conn
            .find("db.c", &query, None, 0, 0, OpQueryFlags::TAILABLE_CURSOR)
            .unwrap();
        match cursor.advance() {
            Err(Error::CursorPending) => (),
            other => panic!("expected CursorPending, got {:?}", other),
        }
    }

    // Query, the empty continuation, then the release on drop.
    assert_eq!(mock::sent_opcodes(&written.borrow()), vec![2004, 2005, 2007]);
}

#[test]
fn find_one_copies_the_first_document() {
    let doc = mock::doc_i32("n", 5);

    let mut stream = mock::reply_bytes(0, &[&doc]);
    stream.extend_from_slice(&mock::reply_bytes(0, &[]));

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", stream);

    let mut conn = connected(connector);
    let query = mongolite::bson::Document::empty();

    let found = conn.find_one("db.c", &query, None).unwrap().unwrap();
    let mut it = found.reader();
    assert_eq!(it.find("n").unwrap(), ElementType::Int32);
    assert_eq!(it.as_i32(), 5);

    assert!(conn.find_one("db.c", &query, None).unwrap().is_none());
}

#[test]
fn insert_refuses_suspect_field_names() {
    let mut builder = DocumentBuilder::new();
    builder.start_document("$set").unwrap();
    builder.append_i32("n", 1).unwrap();
    builder.finish_document().unwrap();
    let operator_doc = builder.into_document().unwrap();

    let selector = mock::doc_i32("n", 1);

    let mut conn = connected(MockConnector::new());

    match conn.insert("db.c", &operator_doc) {
        Err(Error::InvalidDocument(_)) => (),
        other => panic!("expected InvalidDocument, got {:?}", other),
    }

    // The same document is a legitimate update operation.
    conn.update("db.c", &selector, &operator_doc, OpUpdateFlags::no_flags())
        .unwrap();
}

#[test]
fn malformed_utf8_is_refused_everywhere() {
    let mut builder = DocumentBuilder::new();
    builder.append_string_bytes("s", &[0xC3, 0x28]).unwrap();
    let bad = builder.into_document().unwrap();

    let selector = mock::doc_i32("n", 1);
    let mut conn = connected(MockConnector::new());

    assert!(conn.insert("db.c", &bad).is_err());
    assert!(
        conn.update("db.c", &selector, &bad, OpUpdateFlags::no_flags())
            .is_err()
    );
}

#[test]
fn insert_batch_concatenates_documents() {
    let first = mock::doc_i32("n", 1);
    let second = mock::doc_i32("n", 2);

    let connector = MockConnector::new();
    let written = connector.written.clone();

    let mut conn = connected(connector);
    conn.insert_batch("db.c", &[&first, &second]).unwrap();

    let log = written.borrow();
    let frames = mock::sent_frames(&log);
    assert_eq!(mock::sent_opcodes(&log), vec![2002]);

    let offset = 16 + 4 + "db.c".len() + 1;
    let body = &frames[0][offset..];
    assert_eq!(body.len(), first.as_bytes().len() + second.as_bytes().len());
    assert_eq!(&body[..first.as_bytes().len()], first.as_bytes());
}

#[test]
fn remove_sends_a_delete() {
    let selector = mock::doc_i32("n", 1);

    let connector = MockConnector::new();
    let written = connector.written.clone();

    let mut conn = connected(connector);
    conn.remove("db.c", &selector).unwrap();

    let log = written.borrow();
    assert_eq!(mock::sent_opcodes(&log), vec![2006]);

    let frames = mock::sent_frames(&log);
    let offset = 16 + 4 + "db.c".len() + 1 + 4;
    assert_eq!(&frames[0][offset..], selector.as_bytes());
}

#[test]
fn command_failure_is_recorded() {
    let mut builder = DocumentBuilder::new();
    builder.append_double("ok", 0.0).unwrap();
    builder.append_string("errmsg", "oops").unwrap();
    builder.append_i32("code", 13).unwrap();
    let reply = builder.into_document().unwrap();

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", mock::reply_bytes(0, &[&reply]));

    let mut conn = connected(connector);
    match conn.drop_database("db") {
        Err(Error::CommandFailed { code: 13, ref message }) if message == "oops" => (),
        other => panic!("expected CommandFailed, got {:?}", other),
    }
    assert_eq!(
        conn.last_error(),
        Some(&ServerError {
            code: 13,
            message: String::from("oops"),
        })
    );
}

#[test]
fn get_last_error_round_trip() {
    let mut builder = DocumentBuilder::new();
    builder.append_double("ok", 1.0).unwrap();
    builder.append_null("err").unwrap();
    let clean = builder.into_document().unwrap();

    let mut builder = DocumentBuilder::new();
    builder.append_double("ok", 1.0).unwrap();
    builder.append_string("err", "duplicate key").unwrap();
    builder.append_i32("code", 11000).unwrap();
    let failed = builder.into_document().unwrap();

    let mut stream = mock::reply_bytes(0, &[&clean]);
    stream.extend_from_slice(&mock::reply_bytes(0, &[&failed]));

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", stream);

    let mut conn = connected(connector);
    assert_eq!(conn.get_last_error("db").unwrap(), None);

    let error = conn.get_last_error("db").unwrap().unwrap();
    assert_eq!(error.code, 11000);
    assert_eq!(error.message, "duplicate key");
    assert_eq!(conn.last_error(), Some(&error));
}

#[test]
fn count_reads_the_tally() {
    let mut builder = DocumentBuilder::new();
    builder.append_double("ok", 1.0).unwrap();
    builder.append_i32("n", 42).unwrap();
    let reply = builder.into_document().unwrap();

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", mock::reply_bytes(0, &[&reply]));
    let written = connector.written.clone();

    let mut conn = connected(connector);
    let count = conn.count("db", "c", None).unwrap();
    assert_eq!(count, 42);

    let log = written.borrow();
    let frames = mock::sent_frames(&log);
    let mut it = query_doc(frames[0], "db.$cmd").reader();
    assert_eq!(it.find("count").unwrap(), ElementType::String);
    assert_eq!(it.string_value(), "c");
}

#[test]
fn create_index_builds_the_specification() {
    let mut builder = DocumentBuilder::new();
    builder.append_double("ok", 1.0).unwrap();
    builder.append_null("err").unwrap();
    let gle = builder.into_document().unwrap();

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", mock::reply_bytes(0, &[&gle]));
    let written = connector.written.clone();

    let mut conn = connected(connector);

    let mut builder = DocumentBuilder::new();
    builder.append_i32("a", 1).unwrap();
    builder.append_i32("b", 1).unwrap();
    let key = builder.into_document().unwrap();

    let outcome = conn.create_index("db.c", &key, IndexOptions::UNIQUE).unwrap();
    assert!(outcome.is_none());

    let log = written.borrow();
    assert_eq!(mock::sent_opcodes(&log), vec![2002, 2004]);

    let frames = mock::sent_frames(&log);
    let mut spec = insert_doc(frames[0], "db.system.indexes").reader();
    assert_eq!(spec.find("name").unwrap(), ElementType::String);
    assert_eq!(spec.string_value(), "_ab");
    assert_eq!(spec.find("ns").unwrap(), ElementType::String);
    assert_eq!(spec.string_value(), "db.c");
    assert_eq!(spec.find("unique").unwrap(), ElementType::Bool);
    assert!(spec.bool_value());
    assert_eq!(spec.find("sparse").unwrap(), ElementType::EndOfDocument);
}

#[test]
fn authenticate_derives_the_digest_key() {
    let mut builder = DocumentBuilder::new();
    builder.append_double("ok", 1.0).unwrap();
    builder.append_string("nonce", "abc").unwrap();
    let nonce_reply = builder.into_document().unwrap();

    let mut stream = mock::reply_bytes(0, &[&nonce_reply]);
    stream.extend_from_slice(&mock::reply_bytes(0, &[&mock::doc_ok(true)]));

    let mut connector = MockConnector::new();
    connector.script("localhost:27017", stream);
    let written = connector.written.clone();

    let mut conn = connected(connector);
    conn.authenticate("db", "user", "pass").unwrap();

    let mut hasher = Md5::new();
    hasher.input(b"user:mongo:pass");
    let digest = hex::encode(hasher.result());
    let mut hasher = Md5::new();
    hasher.input(b"abc");
    hasher.input(b"user");
    hasher.input(digest.as_bytes());
    let expected_key = hex::encode(hasher.result());

    let log = written.borrow();
    let frames = mock::sent_frames(&log);
    let mut auth = query_doc(frames[1], "db.$cmd").reader();
    assert_eq!(auth.find("authenticate").unwrap(), ElementType::Int32);
    assert_eq!(auth.i32_value(), 1);
    assert_eq!(auth.find("nonce").unwrap(), ElementType::String);
    assert_eq!(auth.string_value(), "abc");
    assert_eq!(auth.find("key").unwrap(), ElementType::String);
    assert_eq!(auth.string_value(), expected_key);
}

#[test]
fn replica_set_discovery_finds_the_primary() {
    let mut connector = MockConnector::new();
    connector.script(
        "seed:27017",
        mock::reply_bytes(
            0,
            &[&mock::ismaster_doc(false, &["h1:27017", "h2:27017"], Some("rs"))],
        ),
    );
    connector.script(
        "h1:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(false, &[], Some("rs"))]),
    );
    connector.script(
        "h2:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(true, &[], Some("rs"))]),
    );
    let connects = connector.connects.clone();

    let mut conn = Connection::with_connector(connector);
    conn.replset_init("rs");
    conn.add_seed("seed", 27017).unwrap();
    conn.replset_connect().unwrap();

    assert!(conn.is_primary_connected());
    let primary = conn.primary().unwrap();
    assert_eq!(primary.host_name, "h2");
    assert_eq!(primary.port, 27017);
    assert_eq!(
        &*connects.borrow(),
        &["seed:27017", "h1:27017", "h2:27017"]
    );
}

#[test]
fn discovery_rejects_a_mismatched_set_name() {
    let mut connector = MockConnector::new();
    connector.script(
        "seed:27017",
        mock::reply_bytes(
            0,
            &[&mock::ismaster_doc(false, &["h1:27017", "h2:27017"], Some("rs"))],
        ),
    );
    connector.script(
        "h1:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(false, &[], Some("rs"))]),
    );
    connector.script(
        "h2:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(true, &[], Some("other"))]),
    );

    let mut conn = Connection::with_connector(connector);
    conn.replset_init("rs");
    conn.add_seed("seed", 27017).unwrap();

    match conn.replset_connect() {
        Err(Error::BadSetName(ref name)) if name == "other" => (),
        other => panic!("expected BadSetName, got {:?}", other),
    }
    assert!(!conn.is_primary_connected());
}

#[test]
fn discovery_without_a_host_list_fails() {
    let mut connector = MockConnector::new();
    connector.script(
        "seed:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(true, &[], Some("rs"))]),
    );

    let mut conn = Connection::with_connector(connector);
    conn.replset_init("rs");
    conn.add_seed("seed", 27017).unwrap();

    match conn.replset_connect() {
        Err(Error::CannotFindPrimary) => (),
        other => panic!("expected CannotFindPrimary, got {:?}", other),
    }
}

#[test]
fn missing_set_name_is_configurable() {
    // Permissive by default: a host that never reports its set name is
    // accepted.
    let mut connector = MockConnector::new();
    connector.script(
        "seed:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(false, &["h1:27017"], Some("rs"))]),
    );
    connector.script(
        "h1:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(true, &[], None)]),
    );

    let mut conn = Connection::with_connector(connector);
    conn.replset_init("rs");
    conn.add_seed("seed", 27017).unwrap();
    conn.replset_connect().unwrap();
    assert!(conn.is_primary_connected());

    // Strict mode treats the omission as a mismatch.
    let mut connector = MockConnector::new();
    connector.script(
        "seed:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(false, &["h1:27017"], Some("rs"))]),
    );
    connector.script(
        "h1:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(true, &[], None)]),
    );

    let mut conn = Connection::with_connector(connector);
    conn.set_strict_set_name(true);
    conn.replset_init("rs");
    conn.add_seed("seed", 27017).unwrap();
    match conn.replset_connect() {
        Err(Error::BadSetName(_)) => (),
        other => panic!("expected BadSetName, got {:?}", other),
    }
}

#[test]
fn unresponsive_seeds_are_skipped() {
    let mut connector = MockConnector::new();
    // The first seed is never scripted and yields an empty stream, so its
    // handshake fails and discovery moves on.
    connector.script(
        "seed2:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(false, &["h1:27017"], Some("rs"))]),
    );
    connector.script(
        "h1:27017",
        mock::reply_bytes(0, &[&mock::ismaster_doc(true, &[], Some("rs"))]),
    );

    let mut conn = Connection::with_connector(connector);
    conn.replset_init("rs");
    conn.add_seed("seed1", 27017).unwrap();
    conn.add_seed("seed2", 27017).unwrap();
    conn.replset_connect().unwrap();
    assert!(conn.is_primary_connected());
}

#[test]
fn reconnect_reopens_the_configured_endpoint() {
    let connector = MockConnector::new();
    let connects = connector.connects.clone();

    let mut conn = connected(connector);
    assert!(conn.is_connected());

    conn.disconnect();
    assert!(!conn.is_connected());

    conn.reconnect().unwrap();
    assert!(conn.is_connected());
    assert_eq!(connects.borrow().len(), 2);
}
