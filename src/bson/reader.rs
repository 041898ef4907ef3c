//! Forward-only typed iteration over an encoded document.

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, LocalResult, TimeZone, Utc};
use std::str;
use std::time::UNIX_EPOCH;

use bson::{BinarySubtype, DocumentView, ElementType, ObjectId, Timestamp, EMPTY_DOCUMENT};
use Error::MalformedDocument;
use Result;

/// A cursor over the elements of an encoded document.
///
/// A reader borrows the byte image it walks and never allocates. It starts
/// one byte past the outer length, positioned on the first element; the
/// first call to `next` reports that element's tag without moving.
#[derive(Debug, Clone, Copy)]
pub struct DocumentReader<'a> {
    data: &'a [u8],
    cur: usize,
    first: bool,
}

impl<'a> DocumentReader<'a> {
    pub fn new(data: &'a [u8]) -> DocumentReader<'a> {
        DocumentReader {
            data: data,
            cur: 4,
            first: true,
        }
    }

    /// The tag of the element the reader is positioned on.
    pub fn element_type(&self) -> Result<ElementType> {
        let byte = match self.data.get(self.cur) {
            Some(&b) => b,
            None => return Err(MalformedDocument(String::from("truncated document"))),
        };
        match ElementType::from_u8(byte) {
            Some(tag) => Ok(tag),
            None => Err(MalformedDocument(
                format!("unknown element tag 0x{:02x}", byte),
            )),
        }
    }

    /// Whether an element other than the terminator is under the reader.
    pub fn more(&self) -> bool {
        match self.data.get(self.cur) {
            Some(&b) => b != 0,
            None => false,
        }
    }

    /// Advances to the next element and returns its tag. The first call
    /// reports the first element without advancing, and a terminator is
    /// returned repeatedly without moving past it. An unknown tag is a
    /// fatal protocol violation.
    pub fn next(&mut self) -> Result<ElementType> {
        if self.first {
            self.first = false;
            return self.element_type();
        }

        let tag = self.element_type()?;
        if tag == ElementType::EndOfDocument {
            return Ok(tag);
        }

        let size = self.payload_size(tag)?;
        let next = self.value_offset() + size;
        if next >= self.data.len() {
            return Err(MalformedDocument(String::from("truncated document")));
        }
        self.cur = next;
        self.element_type()
    }

    /// The field name of the current element.
    pub fn key(&self) -> &'a str {
        str::from_utf8(self.key_bytes()).unwrap_or("")
    }

    /// Scans from the start for the named field, leaving the reader
    /// positioned on the match. Returns `EndOfDocument` when absent.
    pub fn find(&mut self, name: &str) -> Result<ElementType> {
        self.cur = 4;
        self.first = true;
        loop {
            let tag = self.next()?;
            if tag == ElementType::EndOfDocument || self.key() == name {
                return Ok(tag);
            }
        }
    }

    fn key_bytes(&self) -> &'a [u8] {
        self.cstr_at(self.cur + 1)
    }

    fn value_offset(&self) -> usize {
        self.cur + 1 + self.key_bytes().len() + 1
    }

    // Bytes from `offset` up to (excluding) the next NUL, or to the end of
    // the buffer when no terminator is present.
    fn cstr_at(&self, offset: usize) -> &'a [u8] {
        if offset >= self.data.len() {
            return &[];
        }
        let rest = &self.data[offset..];
        match rest.iter().position(|&b| b == 0) {
            Some(end) => &rest[..end],
            None => rest,
        }
    }

    fn read_i32_at(&self, offset: usize) -> i32 {
        if offset + 4 <= self.data.len() {
            LittleEndian::read_i32(&self.data[offset..offset + 4])
        } else {
            0
        }
    }

    fn read_i64_at(&self, offset: usize) -> i64 {
        if offset + 8 <= self.data.len() {
            LittleEndian::read_i64(&self.data[offset..offset + 8])
        } else {
            0
        }
    }

    fn read_f64_at(&self, offset: usize) -> f64 {
        if offset + 8 <= self.data.len() {
            LittleEndian::read_f64(&self.data[offset..offset + 8])
        } else {
            0.0
        }
    }

    fn slice_at(&self, offset: usize, len: usize) -> &'a [u8] {
        if len > 0 && offset + len <= self.data.len() {
            &self.data[offset..offset + len]
        } else {
            &[]
        }
    }

    // Payload size of the current element. Variable-length kinds read
    // their own 32-bit prefix; a negative prefix marks corruption.
    fn payload_size(&self, tag: ElementType) -> Result<usize> {
        let value = self.value_offset();
        let prefixed = |raw: i32| -> Result<usize> {
            if raw < 0 {
                Err(MalformedDocument(String::from("negative length prefix")))
            } else {
                Ok(raw as usize)
            }
        };

        match tag {
            ElementType::EndOfDocument | ElementType::Undefined | ElementType::Null => Ok(0),
            ElementType::Bool => Ok(1),
            ElementType::Int32 => Ok(4),
            ElementType::Int64
            | ElementType::Double
            | ElementType::Timestamp
            | ElementType::UtcDatetime => Ok(8),
            ElementType::ObjectId => Ok(12),
            ElementType::String | ElementType::Symbol | ElementType::Code => {
                Ok(4 + prefixed(self.read_i32_at(value))?)
            }
            ElementType::Binary => Ok(5 + prefixed(self.read_i32_at(value))?),
            ElementType::EmbeddedDocument
            | ElementType::Array
            | ElementType::CodeWithScope => prefixed(self.read_i32_at(value)),
            ElementType::DbRef => Ok(4 + 12 + prefixed(self.read_i32_at(value))?),
            ElementType::Regex => {
                let pattern = self.cstr_at(value);
                let options = self.cstr_at(value + pattern.len() + 1);
                Ok(pattern.len() + 1 + options.len() + 1)
            }
        }
    }

    /// The full encoded span of the current element: tag, name, payload.
    pub fn element_bytes(&self) -> Result<&'a [u8]> {
        let tag = self.element_type()?;
        let size = self.value_offset() - self.cur + self.payload_size(tag)?;
        Ok(self.slice_at(self.cur, size))
    }

    /// The payload bytes of the current element.
    pub fn value_bytes(&self) -> Result<&'a [u8]> {
        let tag = self.element_type()?;
        let size = self.payload_size(tag)?;
        Ok(self.slice_at(self.value_offset(), size))
    }

    /// The raw 32-bit payload of the current element.
    pub fn i32_value(&self) -> i32 {
        self.read_i32_at(self.value_offset())
    }

    /// The raw 64-bit integer payload of the current element.
    pub fn i64_value(&self) -> i64 {
        self.read_i64_at(self.value_offset())
    }

    /// The raw floating-point payload of the current element.
    pub fn double_value(&self) -> f64 {
        self.read_f64_at(self.value_offset())
    }

    /// The stored boolean bit.
    pub fn bool_value(&self) -> bool {
        match self.slice_at(self.value_offset(), 1) {
            [b] => *b != 0,
            _ => false,
        }
    }

    /// Coerces Int32, Int64, and Double payloads to `i32`; other tags
    /// yield zero.
    pub fn as_i32(&self) -> i32 {
        match self.element_type() {
            Ok(ElementType::Int32) => self.i32_value(),
            Ok(ElementType::Int64) => self.i64_value() as i32,
            Ok(ElementType::Double) => self.double_value() as i32,
            _ => 0,
        }
    }

    /// Coerces Int32, Int64, and Double payloads to `i64`; other tags
    /// yield zero.
    pub fn as_i64(&self) -> i64 {
        match self.element_type() {
            Ok(ElementType::Int32) => i64::from(self.i32_value()),
            Ok(ElementType::Int64) => self.i64_value(),
            Ok(ElementType::Double) => self.double_value() as i64,
            _ => 0,
        }
    }

    /// Coerces Int32, Int64, and Double payloads to `f64`; other tags
    /// yield zero.
    pub fn as_f64(&self) -> f64 {
        match self.element_type() {
            Ok(ElementType::Int32) => f64::from(self.i32_value()),
            Ok(ElementType::Int64) => self.i64_value() as f64,
            Ok(ElementType::Double) => self.double_value(),
            _ => 0.0,
        }
    }

    /// True for non-zero numerics, the stored bit for booleans, false for
    /// null and the terminator, and true for every other tag.
    pub fn as_bool(&self) -> bool {
        match self.element_type() {
            Ok(ElementType::Bool) => self.bool_value(),
            Ok(ElementType::Int32) => self.i32_value() != 0,
            Ok(ElementType::Int64) => self.i64_value() != 0,
            Ok(ElementType::Double) => self.double_value() != 0.0,
            Ok(ElementType::Null) | Ok(ElementType::EndOfDocument) | Err(_) => false,
            Ok(_) => true,
        }
    }

    /// The string payload without its terminator. Symbols share the
    /// string layout.
    pub fn string_value(&self) -> &'a str {
        let len = self.read_i32_at(self.value_offset());
        if len <= 0 {
            return "";
        }
        let bytes = self.slice_at(self.value_offset() + 4, len as usize - 1);
        str::from_utf8(bytes).unwrap_or("")
    }

    /// The declared string length, including the trailing NUL.
    pub fn string_len(&self) -> i32 {
        self.read_i32_at(self.value_offset())
    }

    pub fn oid_value(&self) -> ObjectId {
        let mut bytes = [0; 12];
        let raw = self.slice_at(self.value_offset(), 12);
        if raw.len() == 12 {
            bytes.copy_from_slice(raw);
        }
        ObjectId::with_bytes(bytes)
    }

    /// Milliseconds since the epoch, as stored by the date element.
    pub fn date_value(&self) -> i64 {
        self.i64_value()
    }

    pub fn datetime_value(&self) -> DateTime<Utc> {
        match Utc.timestamp_millis_opt(self.date_value()) {
            LocalResult::Single(dt) => dt,
            _ => DateTime::<Utc>::from(UNIX_EPOCH),
        }
    }

    pub fn timestamp_value(&self) -> Timestamp {
        let value = self.value_offset();
        Timestamp {
            increment: self.read_i32_at(value),
            time: self.read_i32_at(value + 4),
        }
    }

    /// The binary payload's subtype and data. The legacy subtype skips
    /// the redundant inner length it carries.
    pub fn binary_value(&self) -> (BinarySubtype, &'a [u8]) {
        let value = self.value_offset();
        let declared = self.read_i32_at(value);
        let subtype = match self.slice_at(value + 4, 1) {
            [b] => BinarySubtype::from_u8(*b),
            _ => BinarySubtype::Generic,
        };
        let (offset, len) = if subtype == BinarySubtype::BinaryOld {
            (value + 9, declared - 4)
        } else {
            (value + 5, declared)
        };
        if len <= 0 {
            return (subtype, &[]);
        }
        (subtype, self.slice_at(offset, len as usize))
    }

    /// The regular expression's pattern and options strings.
    pub fn regex_value(&self) -> (&'a str, &'a str) {
        let value = self.value_offset();
        let pattern = self.cstr_at(value);
        let options = self.cstr_at(value + pattern.len() + 1);
        (
            str::from_utf8(pattern).unwrap_or(""),
            str::from_utf8(options).unwrap_or(""),
        )
    }

    /// The source of a code element. Strings and plain code share a
    /// layout; code-with-scope stores its source behind a second length.
    pub fn code_value(&self) -> &'a str {
        match self.element_type() {
            Ok(ElementType::String) | Ok(ElementType::Code) => self.string_value(),
            Ok(ElementType::CodeWithScope) => {
                let value = self.value_offset();
                let code_len = self.read_i32_at(value + 4);
                if code_len <= 0 {
                    return "";
                }
                let bytes = self.slice_at(value + 8, code_len as usize - 1);
                str::from_utf8(bytes).unwrap_or("")
            }
            _ => "",
        }
    }

    /// The scope of a code-with-scope element, or the empty document for
    /// any other tag.
    pub fn code_scope(&self) -> DocumentView<'a> {
        if let Ok(ElementType::CodeWithScope) = self.element_type() {
            let value = self.value_offset();
            let code_len = self.read_i32_at(value + 4);
            if code_len >= 0 {
                let scope = value + 8 + code_len as usize;
                let scope_len = self.read_i32_at(scope);
                if scope_len > 0 {
                    return DocumentView::new(self.slice_at(scope, scope_len as usize));
                }
            }
        }
        DocumentView::new(&EMPTY_DOCUMENT)
    }

    /// A view of the embedded document or array under the reader, without
    /// copying. Any other tag yields the empty document.
    pub fn subdocument(&self) -> DocumentView<'a> {
        match self.element_type() {
            Ok(ElementType::EmbeddedDocument) | Ok(ElementType::Array) => {
                let value = self.value_offset();
                let len = self.read_i32_at(value);
                if len > 0 {
                    return DocumentView::new(self.slice_at(value, len as usize));
                }
                DocumentView::new(&EMPTY_DOCUMENT)
            }
            _ => DocumentView::new(&EMPTY_DOCUMENT),
        }
    }

    /// A reader positioned inside the embedded document or array under
    /// this one.
    pub fn subreader(&self) -> DocumentReader<'a> {
        self.subdocument().reader()
    }
}
