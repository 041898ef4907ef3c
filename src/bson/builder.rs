//! Incremental document assembly.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Utc};
use std::str;

use bson::{self, BinarySubtype, Document, DocumentReader, ElementType, ObjectId, Timestamp,
           ValidityFlags};
use Error::{ObjectFinished, OperationError, SizeOverflow};
use Result;

const INITIAL_BUFFER_SIZE: usize = 128;

/// The deepest stack of open documents and arrays a builder will track.
pub const MAX_NESTING: usize = 32;

/// Assembles a document into a growable byte buffer.
///
/// The first four bytes are reserved for the outer length and written on
/// finalization. Nested documents and arrays are tracked as a stack of
/// buffer offsets so each nested length can be backpatched on close;
/// offsets stay valid across buffer growth.
pub struct DocumentBuilder {
    buf: Vec<u8>,
    stack: Vec<usize>,
    finished: bool,
    errors: ValidityFlags,
}

impl DocumentBuilder {
    pub fn new() -> DocumentBuilder {
        let mut buf = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        buf.extend_from_slice(&[0; 4]);
        DocumentBuilder {
            buf: buf,
            stack: Vec::new(),
            finished: false,
            errors: ValidityFlags::empty(),
        }
    }

    /// Validity bits accumulated so far.
    pub fn errors(&self) -> ValidityFlags {
        self.errors
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    // Guarantees room for `needed` more bytes, growing by 1.5x of the
    // combined size and never past 2^31 - 1. The buffer is untouched when
    // an error is returned.
    fn ensure_space(&mut self, needed: usize) -> Result<()> {
        if self.finished {
            self.errors |= ValidityFlags::OBJECT_FINISHED;
            return Err(ObjectFinished);
        }

        let pos = self.buf.len();
        if pos + needed > i32::max_value() as usize {
            self.errors |= ValidityFlags::SIZE_OVERFLOW;
            return Err(SizeOverflow);
        }

        if pos + needed > self.buf.capacity() {
            let mut new_size = (self.buf.capacity() + needed) * 3 / 2;
            if new_size > i32::max_value() as usize {
                new_size = i32::max_value() as usize;
            }
            self.buf.reserve_exact(new_size - pos);
        }

        Ok(())
    }

    // Field names may carry dots or a leading dollar; both are recorded on
    // the error word and checked again by the wire client before a write.
    fn check_field_name(&mut self, name: &str) {
        let mut flagged = false;
        if name.contains('.') {
            self.errors |= ValidityFlags::FIELD_HAS_DOT;
            flagged = true;
        }
        if name.starts_with('$') {
            self.errors |= ValidityFlags::FIELD_INIT_DOLLAR;
            flagged = true;
        }
        if flagged {
            bson::builder_error("invalid field name");
        }
    }

    fn check_string(&mut self, value: &[u8]) {
        if str::from_utf8(value).is_err() {
            self.errors |= ValidityFlags::NOT_UTF8;
            bson::builder_error("string is not valid UTF-8");
        }
    }

    // Emits the tag byte and NUL-terminated field name after reserving
    // room for the element's payload.
    fn append_element_start(
        &mut self,
        tag: ElementType,
        name: &str,
        payload_size: usize,
    ) -> Result<()> {
        self.ensure_space(1 + name.len() + 1 + payload_size)?;
        self.check_field_name(name);
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(name.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    fn write_i32(&mut self, value: i32) {
        let mut bytes = [0; 4];
        LittleEndian::write_i32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    fn write_i64(&mut self, value: i64) {
        let mut bytes = [0; 8];
        LittleEndian::write_i64(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn append_i32(&mut self, name: &str, value: i32) -> Result<()> {
        self.append_element_start(ElementType::Int32, name, 4)?;
        self.write_i32(value);
        Ok(())
    }

    pub fn append_i64(&mut self, name: &str, value: i64) -> Result<()> {
        self.append_element_start(ElementType::Int64, name, 8)?;
        self.write_i64(value);
        Ok(())
    }

    pub fn append_double(&mut self, name: &str, value: f64) -> Result<()> {
        self.append_element_start(ElementType::Double, name, 8)?;
        let mut bytes = [0; 8];
        LittleEndian::write_f64(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
        Ok(())
    }

    pub fn append_bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.append_element_start(ElementType::Bool, name, 1)?;
        self.buf.push(value as u8);
        Ok(())
    }

    pub fn append_null(&mut self, name: &str) -> Result<()> {
        self.append_element_start(ElementType::Null, name, 0)
    }

    pub fn append_undefined(&mut self, name: &str) -> Result<()> {
        self.append_element_start(ElementType::Undefined, name, 0)
    }

    fn append_string_base(&mut self, tag: ElementType, name: &str, value: &[u8]) -> Result<()> {
        let len_with_nul = value.len() + 1;
        self.check_string(value);
        self.append_element_start(tag, name, 4 + len_with_nul)?;
        self.write_i32(len_with_nul as i32);
        self.buf.extend_from_slice(value);
        self.buf.push(0);
        Ok(())
    }

    pub fn append_string(&mut self, name: &str, value: &str) -> Result<()> {
        self.append_string_base(ElementType::String, name, value.as_bytes())
    }

    /// Appends a string element from raw bytes. The payload is surface
    /// checked for UTF-8 well-formedness; a failed check records
    /// `NOT_UTF8` without rejecting the append.
    pub fn append_string_bytes(&mut self, name: &str, value: &[u8]) -> Result<()> {
        self.append_string_base(ElementType::String, name, value)
    }

    pub fn append_symbol(&mut self, name: &str, value: &str) -> Result<()> {
        self.append_string_base(ElementType::Symbol, name, value.as_bytes())
    }

    pub fn append_code(&mut self, name: &str, value: &str) -> Result<()> {
        self.append_string_base(ElementType::Code, name, value.as_bytes())
    }

    pub fn append_code_with_scope(&mut self, name: &str, code: &str, scope: &Document) -> Result<()> {
        let code_len = code.len() + 1;
        let total = 4 + 4 + code_len + scope.as_bytes().len();
        self.append_element_start(ElementType::CodeWithScope, name, total)?;
        self.write_i32(total as i32);
        self.write_i32(code_len as i32);
        self.buf.extend_from_slice(code.as_bytes());
        self.buf.push(0);
        self.buf.extend_from_slice(scope.as_bytes());
        Ok(())
    }

    /// Appends a binary element. The legacy `BinaryOld` subtype stores a
    /// redundant inner length, inflating the outer length by four.
    pub fn append_binary(&mut self, name: &str, subtype: BinarySubtype, data: &[u8]) -> Result<()> {
        if subtype == BinarySubtype::BinaryOld {
            self.append_element_start(ElementType::Binary, name, 4 + 1 + 4 + data.len())?;
            self.write_i32(data.len() as i32 + 4);
            self.buf.push(subtype as u8);
            self.write_i32(data.len() as i32);
        } else {
            self.append_element_start(ElementType::Binary, name, 4 + 1 + data.len())?;
            self.write_i32(data.len() as i32);
            self.buf.push(subtype as u8);
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    pub fn append_oid(&mut self, name: &str, oid: &ObjectId) -> Result<()> {
        self.append_element_start(ElementType::ObjectId, name, 12)?;
        self.buf.extend_from_slice(oid.bytes());
        Ok(())
    }

    /// Generates a fresh object id and appends it.
    pub fn append_new_oid(&mut self, name: &str) -> Result<()> {
        let oid = ObjectId::new();
        self.append_oid(name, &oid)
    }

    pub fn append_regex(&mut self, name: &str, pattern: &str, options: &str) -> Result<()> {
        let payload = pattern.len() + 1 + options.len() + 1;
        self.check_string(pattern.as_bytes());
        self.append_element_start(ElementType::Regex, name, payload)?;
        self.buf.extend_from_slice(pattern.as_bytes());
        self.buf.push(0);
        self.buf.extend_from_slice(options.as_bytes());
        self.buf.push(0);
        Ok(())
    }

    /// Appends a date element from raw milliseconds since the epoch.
    pub fn append_date(&mut self, name: &str, millis: i64) -> Result<()> {
        self.append_element_start(ElementType::UtcDatetime, name, 8)?;
        self.write_i64(millis);
        Ok(())
    }

    pub fn append_utc_datetime(&mut self, name: &str, value: &DateTime<Utc>) -> Result<()> {
        self.append_date(name, value.timestamp_millis())
    }

    pub fn append_timestamp(&mut self, name: &str, ts: Timestamp) -> Result<()> {
        self.append_element_start(ElementType::Timestamp, name, 8)?;
        self.write_i32(ts.increment);
        self.write_i32(ts.time);
        Ok(())
    }

    /// Appends a finalized document as an embedded document element.
    pub fn append_document(&mut self, name: &str, doc: &Document) -> Result<()> {
        self.append_element_start(ElementType::EmbeddedDocument, name, doc.as_bytes().len())?;
        self.buf.extend_from_slice(doc.as_bytes());
        Ok(())
    }

    /// Copies the element a reader is positioned on, either verbatim or
    /// under a new field name.
    pub fn append_element(&mut self, name: Option<&str>, elem: &DocumentReader) -> Result<()> {
        match name {
            None => {
                let bytes = elem.element_bytes()?;
                self.ensure_space(bytes.len())?;
                self.buf.extend_from_slice(bytes);
            }
            Some(new_name) => {
                let tag = elem.element_type()?;
                let value = elem.value_bytes()?;
                self.append_element_start(tag, new_name, value.len())?;
                self.buf.extend_from_slice(value);
            }
        }
        Ok(())
    }

    /// Opens a nested document. Elements appended before the matching
    /// `finish_document` land inside it.
    pub fn start_document(&mut self, name: &str) -> Result<()> {
        self.start_container(ElementType::EmbeddedDocument, name)
    }

    /// Opens a nested array. The caller supplies decimal-string field
    /// names "0", "1", ... for its elements.
    pub fn start_array(&mut self, name: &str) -> Result<()> {
        self.start_container(ElementType::Array, name)
    }

    fn start_container(&mut self, tag: ElementType, name: &str) -> Result<()> {
        assert!(
            self.stack.len() < MAX_NESTING,
            "document nesting deeper than {} levels",
            MAX_NESTING
        );
        self.append_element_start(tag, name, 5)?;
        self.stack.push(self.buf.len());
        self.write_i32(0);
        Ok(())
    }

    /// Closes the most recently opened document or array, backpatching its
    /// length field.
    pub fn finish_document(&mut self) -> Result<()> {
        self.ensure_space(1)?;
        let start = match self.stack.pop() {
            Some(offset) => offset,
            None => {
                return Err(OperationError(
                    String::from("no open document or array to finish"),
                ))
            }
        };
        self.buf.push(0);
        let len = (self.buf.len() - start) as i32;
        LittleEndian::write_i32(&mut self.buf[start..start + 4], len);
        Ok(())
    }

    /// Appends the terminator and writes the outer length. Idempotent;
    /// any append attempted afterwards fails.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if !self.stack.is_empty() {
            return Err(OperationError(
                String::from("document finalized with open containers"),
            ));
        }
        self.ensure_space(1)?;
        self.buf.push(0);
        let total = self.buf.len() as i32;
        LittleEndian::write_i32(&mut self.buf[..4], total);
        self.finished = true;
        Ok(())
    }

    /// Finalizes the builder and hands the byte image to an owning
    /// document, along with the accumulated validity bits.
    pub fn into_document(mut self) -> Result<Document> {
        self.finish()?;
        Ok(Document::from_parts(self.buf, self.errors))
    }
}

impl Default for DocumentBuilder {
    fn default() -> DocumentBuilder {
        DocumentBuilder::new()
    }
}
