#![allow(dead_code)]

//! A scripted in-memory transport for driving the wire client without a
//! server.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use mongolite::bson::{Document, DocumentBuilder};
use mongolite::transport::{Connector, Transport};
use mongolite::Result;

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::rc::Rc;

/// A transport reading from a pre-scripted byte stream and logging every
/// write into a shared buffer.
pub struct MockTransport {
    input: Cursor<Vec<u8>>,
    written: Rc<RefCell<Vec<u8>>>,
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn set_timeout(&mut self, _millis: u64) -> io::Result<()> {
        Ok(())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hands out mock transports keyed by endpoint, each preloaded with the
/// next scripted input for that endpoint. All transports share one write
/// log and one connect log.
pub struct MockConnector {
    scripts: HashMap<String, Vec<Vec<u8>>>,
    pub written: Rc<RefCell<Vec<u8>>>,
    pub connects: Rc<RefCell<Vec<String>>>,
}

impl MockConnector {
    pub fn new() -> MockConnector {
        MockConnector {
            scripts: HashMap::new(),
            written: Rc::new(RefCell::new(Vec::new())),
            connects: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Queues the input stream served by the next connection to an
    /// endpoint. Unscripted endpoints connect with an empty stream.
    pub fn script(&mut self, endpoint: &str, input: Vec<u8>) {
        self.scripts
            .entry(endpoint.to_owned())
            .or_insert_with(Vec::new)
            .push(input);
    }
}

impl Connector for MockConnector {
    type Stream = MockTransport;

    fn connect(&mut self, host: &str, port: u16) -> Result<MockTransport> {
        let endpoint = format!("{}:{}", host, port);
        self.connects.borrow_mut().push(endpoint.clone());
        let input = match self.scripts.get_mut(&endpoint) {
            Some(queue) if !queue.is_empty() => queue.remove(0),
            _ => Vec::new(),
        };
        Ok(MockTransport {
            input: Cursor::new(input),
            written: self.written.clone(),
        })
    }
}

/// Serializes an OP_REPLY frame carrying the given documents.
pub fn reply_bytes(cursor_id: i64, documents: &[&Document]) -> Vec<u8> {
    let mut body = Vec::new();
    for doc in documents {
        body.extend_from_slice(doc.as_bytes());
    }

    let mut buf = Vec::new();
    buf.write_i32::<LittleEndian>(36 + body.len() as i32).unwrap();
    buf.write_i32::<LittleEndian>(1).unwrap();
    buf.write_i32::<LittleEndian>(0).unwrap();
    buf.write_i32::<LittleEndian>(1).unwrap(); // OP_REPLY
    buf.write_i32::<LittleEndian>(0).unwrap(); // response flags
    buf.write_i64::<LittleEndian>(cursor_id).unwrap();
    buf.write_i32::<LittleEndian>(0).unwrap(); // starting from
    buf.write_i32::<LittleEndian>(documents.len() as i32).unwrap();
    buf.extend_from_slice(&body);
    buf
}

/// Splits a write log back into message frames.
pub fn sent_frames(bytes: &[u8]) -> Vec<&[u8]> {
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset + 16 <= bytes.len() {
        let length = LittleEndian::read_i32(&bytes[offset..offset + 4]) as usize;
        frames.push(&bytes[offset..offset + length]);
        offset += length;
    }
    frames
}

/// The opcode of each frame in a write log, in order.
pub fn sent_opcodes(bytes: &[u8]) -> Vec<i32> {
    sent_frames(bytes)
        .iter()
        .map(|frame| LittleEndian::read_i32(&frame[12..16]))
        .collect()
}

pub fn doc_i32(name: &str, value: i32) -> Document {
    let mut builder = DocumentBuilder::new();
    builder.append_i32(name, value).unwrap();
    builder.into_document().unwrap()
}

pub fn doc_ok(ok: bool) -> Document {
    let mut builder = DocumentBuilder::new();
    builder.append_double("ok", if ok { 1.0 } else { 0.0 }).unwrap();
    builder.into_document().unwrap()
}

/// Builds the handshake reply a replica-set member would send.
pub fn ismaster_doc(ismaster: bool, hosts: &[&str], set_name: Option<&str>) -> Document {
    let mut builder = DocumentBuilder::new();
    builder.append_double("ok", 1.0).unwrap();
    builder.append_bool("ismaster", ismaster).unwrap();
    if !hosts.is_empty() {
        builder.start_array("hosts").unwrap();
        for (index, host) in hosts.iter().enumerate() {
            builder.append_string(&index.to_string(), host).unwrap();
        }
        builder.finish_document().unwrap();
    }
    if let Some(name) = set_name {
        builder.append_string("setName", name).unwrap();
    }
    builder.into_document().unwrap()
}
