//! Message headers for the wire protocol.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand;
use std::fmt;
use std::io::{Read, Write};

use Error::ResponseError;
use Result;

/// The size of a serialized header: four 32-bit fields.
pub const HEADER_SIZE: i32 = 16;

/// Operations of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
}

impl OpCode {
    /// Maps an i32 to its corresponding opcode, or `None` for an
    /// unrecognized value.
    pub fn from_i32(i: i32) -> Option<OpCode> {
        match i {
            1 => Some(OpCode::Reply),
            2001 => Some(OpCode::Update),
            2002 => Some(OpCode::Insert),
            2004 => Some(OpCode::Query),
            2005 => Some(OpCode::GetMore),
            2006 => Some(OpCode::Delete),
            2007 => Some(OpCode::KillCursors),
            _ => None,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let string = match *self {
            OpCode::Reply => "OP_REPLY",
            OpCode::Update => "OP_UPDATE",
            OpCode::Insert => "OP_INSERT",
            OpCode::Query => "OP_QUERY",
            OpCode::GetMore => "OP_GET_MORE",
            OpCode::Delete => "OP_DELETE",
            OpCode::KillCursors => "OP_KILL_CURSORS",
        };
        fmt.write_str(string)
    }
}

/// The 16-byte prefix carried by every message, stored little-endian on
/// the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// The total message length, inclusive of the header.
    pub message_length: i32,
    /// An identifier for the message; a pseudo-random value is substituted
    /// when zero is supplied.
    pub request_id: i32,
    /// The request id this message responds to.
    pub response_to: i32,
    /// The operation the message performs.
    pub op_code: OpCode,
}

impl Header {
    /// Constructs a new request header.
    pub fn new(message_length: i32, request_id: i32, op_code: OpCode) -> Header {
        let id = if request_id == 0 {
            rand::random::<i32>()
        } else {
            request_id
        };
        Header {
            message_length: message_length,
            request_id: id,
            response_to: 0,
            op_code: op_code,
        }
    }

    pub fn new_insert(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, OpCode::Insert)
    }

    pub fn new_update(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, OpCode::Update)
    }

    pub fn new_delete(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, OpCode::Delete)
    }

    pub fn new_query(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, OpCode::Query)
    }

    pub fn new_get_more(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, OpCode::GetMore)
    }

    pub fn new_kill_cursors(message_length: i32, request_id: i32) -> Header {
        Header::new(message_length, request_id, OpCode::KillCursors)
    }

    /// Serializes the header, endian-converting each field.
    pub fn write<W: Write>(&self, buffer: &mut W) -> Result<()> {
        buffer.write_i32::<LittleEndian>(self.message_length)?;
        buffer.write_i32::<LittleEndian>(self.request_id)?;
        buffer.write_i32::<LittleEndian>(self.response_to)?;
        buffer.write_i32::<LittleEndian>(self.op_code as i32)?;
        Ok(())
    }

    /// Reads a header from a buffer.
    pub fn read<R: Read>(buffer: &mut R) -> Result<Header> {
        let message_length = buffer.read_i32::<LittleEndian>()?;
        let request_id = buffer.read_i32::<LittleEndian>()?;
        let response_to = buffer.read_i32::<LittleEndian>()?;
        let op_code_raw = buffer.read_i32::<LittleEndian>()?;

        let op_code = match OpCode::from_i32(op_code_raw) {
            Some(code) => code,
            None => {
                return Err(ResponseError(
                    format!("Invalid opcode received from server: {}.", op_code_raw),
                ))
            }
        };

        Ok(Header {
            message_length: message_length,
            request_id: request_id,
            response_to: response_to,
            op_code: op_code,
        })
    }
}
