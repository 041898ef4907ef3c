//! The binary document codec.
//!
//! Documents are contiguous byte images: a little-endian `i32` total length
//! (inclusive), a run of tagged elements, and a single zero terminator.
//! `DocumentBuilder` assembles an image incrementally, `DocumentReader`
//! walks one forward-only, and `Document`/`DocumentView` model the owned
//! versus borrowed forms of a finished image.

mod builder;
mod oid;
mod reader;

pub use self::builder::DocumentBuilder;
pub use self::oid::{set_counter_source, set_fuzz_source, ObjectId};
pub use self::reader::DocumentReader;

use byteorder::{ByteOrder, LittleEndian};
use std::sync::Mutex;

/// The canonical image of a document with no elements.
pub const EMPTY_DOCUMENT: [u8; 5] = [5, 0, 0, 0, 0];

/// The element type tags of the document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    EndOfDocument = 0x00,
    Double = 0x01,
    String = 0x02,
    EmbeddedDocument = 0x03,
    Array = 0x04,
    Binary = 0x05,
    Undefined = 0x06,
    ObjectId = 0x07,
    Bool = 0x08,
    UtcDatetime = 0x09,
    Null = 0x0A,
    Regex = 0x0B,
    DbRef = 0x0C,
    Code = 0x0D,
    Symbol = 0x0E,
    CodeWithScope = 0x0F,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
}

impl ElementType {
    /// Converts a tag byte to its element type, or `None` for unknown tags.
    pub fn from_u8(tag: u8) -> Option<ElementType> {
        Some(match tag {
            0x00 => ElementType::EndOfDocument,
            0x01 => ElementType::Double,
            0x02 => ElementType::String,
            0x03 => ElementType::EmbeddedDocument,
            0x04 => ElementType::Array,
            0x05 => ElementType::Binary,
            0x06 => ElementType::Undefined,
            0x07 => ElementType::ObjectId,
            0x08 => ElementType::Bool,
            0x09 => ElementType::UtcDatetime,
            0x0A => ElementType::Null,
            0x0B => ElementType::Regex,
            0x0C => ElementType::DbRef,
            0x0D => ElementType::Code,
            0x0E => ElementType::Symbol,
            0x0F => ElementType::CodeWithScope,
            0x10 => ElementType::Int32,
            0x11 => ElementType::Timestamp,
            0x12 => ElementType::Int64,
            _ => return None,
        })
    }
}

/// Subtypes of the binary element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinarySubtype {
    Generic = 0x00,
    Function = 0x01,
    BinaryOld = 0x02,
    UuidOld = 0x03,
    Uuid = 0x04,
    Md5 = 0x05,
    UserDefined = 0x80,
}

impl BinarySubtype {
    pub fn from_u8(byte: u8) -> BinarySubtype {
        match byte {
            0x01 => BinarySubtype::Function,
            0x02 => BinarySubtype::BinaryOld,
            0x03 => BinarySubtype::UuidOld,
            0x04 => BinarySubtype::Uuid,
            0x05 => BinarySubtype::Md5,
            0x80 => BinarySubtype::UserDefined,
            _ => BinarySubtype::Generic,
        }
    }
}

/// An increment/time pair as stored by the timestamp element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub increment: i32,
    pub time: i32,
}

bitflags! {
    /// Validity bits accumulated while building a document.
    ///
    /// Surface checks report through these bits without rejecting the
    /// append; the wire client refuses offending documents before a write
    /// is sent.
    pub struct ValidityFlags: u32 {
        /// A string payload was not well-formed UTF-8.
        const NOT_UTF8          = 0b00001;
        /// A field name contained a dot.
        const FIELD_HAS_DOT     = 0b00010;
        /// A field name began with a dollar sign.
        const FIELD_INIT_DOLLAR = 0b00100;
        /// An append was attempted after finalization.
        const OBJECT_FINISHED   = 0b01000;
        /// The buffer would have grown past 2^31 - 1 bytes.
        const SIZE_OVERFLOW     = 0b10000;
    }
}

impl ValidityFlags {
    pub fn no_flags() -> ValidityFlags {
        ValidityFlags::empty()
    }
}

/// A finalized document owning its byte image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    data: Vec<u8>,
    errors: ValidityFlags,
}

impl Document {
    pub(crate) fn from_parts(data: Vec<u8>, errors: ValidityFlags) -> Document {
        Document {
            data: data,
            errors: errors,
        }
    }

    /// Returns a document with no elements.
    pub fn empty() -> Document {
        Document {
            data: EMPTY_DOCUMENT.to_vec(),
            errors: ValidityFlags::empty(),
        }
    }

    /// The total byte length declared by the image's length prefix.
    pub fn size(&self) -> i32 {
        LittleEndian::read_i32(&self.data[..4])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Validity bits accumulated while this document was built.
    pub fn errors(&self) -> ValidityFlags {
        self.errors
    }

    /// A reader positioned before the first element.
    pub fn reader(&self) -> DocumentReader {
        DocumentReader::new(&self.data)
    }
}

/// A document image borrowed from a larger buffer, such as a reply batch
/// or an embedded document. Readers derived from a view must not outlive
/// the buffer it points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentView<'a> {
    data: &'a [u8],
}

impl<'a> DocumentView<'a> {
    pub fn new(data: &'a [u8]) -> DocumentView<'a> {
        DocumentView { data: data }
    }

    pub fn size(&self) -> i32 {
        if self.data.len() < 4 {
            return 0;
        }
        LittleEndian::read_i32(&self.data[..4])
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn reader(&self) -> DocumentReader<'a> {
        DocumentReader::new(self.data)
    }

    /// Deep-copies the image into an owned document.
    pub fn to_document(&self) -> Document {
        Document {
            data: self.data.to_vec(),
            errors: ValidityFlags::empty(),
        }
    }
}

/// A process-wide callback receiving short diagnostics for non-fatal
/// builder errors. Install once at startup.
pub type ErrorHandler = fn(&str);

static ERROR_HANDLER: Mutex<Option<ErrorHandler>> = Mutex::new(None);

/// Installs the process-wide error handler. The first installed handler
/// wins; later calls are ignored.
pub fn set_error_handler(handler: ErrorHandler) {
    if let Ok(mut slot) = ERROR_HANDLER.lock() {
        if slot.is_none() {
            *slot = Some(handler);
        }
    }
}

pub(crate) fn builder_error(msg: &str) {
    if let Ok(slot) = ERROR_HANDLER.lock() {
        if let Some(handler) = *slot {
            handler(msg);
        }
    }
}
