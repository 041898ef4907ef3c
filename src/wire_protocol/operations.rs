//! Wire protocol operational client-server communication logic.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use wire_protocol::flags::{OpInsertFlags, OpQueryFlags, OpReplyFlags, OpUpdateFlags};
use wire_protocol::header::{Header, OpCode, HEADER_SIZE};
use Error::{ReadSizeError, ResponseError};
use Result;

/// The size of the fixed reply fields trailing the header.
pub const REPLY_FIELDS_SIZE: i32 = 20;

/// The largest reply the client will accept.
pub const MAX_REPLY_LENGTH: i32 = 64 * 1024 * 1024;

/// Represents a client request in the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    OpUpdate {
        /// The message header.
        header: Header,
        // The wire protocol specifies that a 32-bit 0 field goes here
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        /// A bit vector of update options.
        flags: OpUpdateFlags,
        /// Identifies the document(s) to be updated.
        selector: Vec<u8>,
        /// Instruction document for how to update the document(s).
        update: Vec<u8>,
    },
    OpInsert {
        /// The message header.
        header: Header,
        /// A bit vector of insert options.
        flags: OpInsertFlags,
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        /// The concatenated documents to be inserted.
        documents: Vec<u8>,
    },
    OpDelete {
        /// The message header.
        header: Header,
        // The wire protocol specifies that a 32-bit 0 field goes here
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        // A second reserved 32-bit 0 field precedes the selector
        /// Identifies the document(s) to be removed.
        selector: Vec<u8>,
    },
    OpQuery {
        /// The message header.
        header: Header,
        /// A bit vector of query options.
        flags: OpQueryFlags,
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        /// The number of initial documents to skip over in the query results.
        number_to_skip: i32,
        /// The total number of documents that should be returned by the query.
        number_to_return: i32,
        /// Specifies which documents to return.
        query: Vec<u8>,
        /// An optional projection of which fields should be present in the
        /// documents to be returned by the query.
        return_field_selector: Option<Vec<u8>>,
    },
    OpGetMore {
        /// The message header.
        header: Header,
        // The wire protocol specifies that a 32-bit 0 field goes here
        /// The full qualified name of the collection, beginning with the
        /// database name and a dot separator.
        namespace: String,
        /// The total number of documents that should be returned by the query.
        number_to_return: i32,
        /// Uniquely identifies the cursor being continued.
        cursor_id: i64,
    },
    OpKillCursors {
        /// The message header.
        header: Header,
        // The wire protocol specifies that a 32-bit 0 field goes here
        /// The server-side cursors to release.
        cursor_ids: Vec<i64>,
    },
}

/// A received OP_REPLY: the header, the fixed reply fields, and the
/// concatenated encoded documents of the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// The message header.
    pub header: Header,
    /// A bit vector of reply options.
    pub flags: OpReplyFlags,
    /// Uniquely identifies the cursor being returned; zero when the server
    /// holds no further state.
    pub cursor_id: i64,
    /// The starting position of the batch within the cursor.
    pub starting_from: i32,
    /// The total number of documents in this batch.
    pub number_returned: i32,
    /// The batch documents, laid out back to back.
    pub documents: Vec<u8>,
}

impl Message {
    /// Constructs a new message for an update.
    pub fn new_update(
        request_id: i32,
        namespace: String,
        flags: OpUpdateFlags,
        selector: Vec<u8>,
        update: Vec<u8>,
    ) -> Message {
        // Add an extra byte after the string for null-termination, and two
        // i32 fields: the wire protocol-specified ZERO and the flag vector.
        let total_length = HEADER_SIZE + 4 + namespace.len() as i32 + 1 + 4 +
            selector.len() as i32 + update.len() as i32;

        Message::OpUpdate {
            header: Header::new_update(total_length, request_id),
            namespace: namespace,
            flags: flags,
            selector: selector,
            update: update,
        }
    }

    /// Constructs a new message request for an insertion.
    pub fn new_insert(
        request_id: i32,
        flags: OpInsertFlags,
        namespace: String,
        documents: Vec<u8>,
    ) -> Message {
        let total_length = HEADER_SIZE + 4 + namespace.len() as i32 + 1 +
            documents.len() as i32;

        Message::OpInsert {
            header: Header::new_insert(total_length, request_id),
            flags: flags,
            namespace: namespace,
            documents: documents,
        }
    }

    /// Constructs a new message request for a removal.
    pub fn new_delete(request_id: i32, namespace: String, selector: Vec<u8>) -> Message {
        // Two reserved ZERO fields bracket the namespace.
        let total_length = HEADER_SIZE + 4 + namespace.len() as i32 + 1 + 4 +
            selector.len() as i32;

        Message::OpDelete {
            header: Header::new_delete(total_length, request_id),
            namespace: namespace,
            selector: selector,
        }
    }

    /// Constructs a new message request for a query.
    pub fn new_query(
        request_id: i32,
        flags: OpQueryFlags,
        namespace: String,
        number_to_skip: i32,
        number_to_return: i32,
        query: Vec<u8>,
        return_field_selector: Option<Vec<u8>>,
    ) -> Message {
        let option_length = match return_field_selector {
            Some(ref doc) => doc.len() as i32,
            None => 0,
        };

        // Three i32 fields: the flag vector, skip, and return.
        let total_length = HEADER_SIZE + 12 + namespace.len() as i32 + 1 +
            query.len() as i32 + option_length;

        Message::OpQuery {
            header: Header::new_query(total_length, request_id),
            flags: flags,
            namespace: namespace,
            number_to_skip: number_to_skip,
            number_to_return: number_to_return,
            query: query,
            return_field_selector: return_field_selector,
        }
    }

    /// Constructs a new "get more" request message.
    pub fn new_get_more(
        request_id: i32,
        namespace: String,
        number_to_return: i32,
        cursor_id: i64,
    ) -> Message {
        let total_length = HEADER_SIZE + 4 + namespace.len() as i32 + 1 + 4 + 8;

        Message::OpGetMore {
            header: Header::new_get_more(total_length, request_id),
            namespace: namespace,
            number_to_return: number_to_return,
            cursor_id: cursor_id,
        }
    }

    /// Constructs a new message releasing a set of server-side cursors.
    pub fn new_kill_cursors(request_id: i32, cursor_ids: Vec<i64>) -> Message {
        // ZERO field, cursor count, then one i64 per cursor.
        let total_length = HEADER_SIZE + 4 + 4 + 8 * cursor_ids.len() as i32;

        Message::OpKillCursors {
            header: Header::new_kill_cursors(total_length, request_id),
            cursor_ids: cursor_ids,
        }
    }

    /// The header of the message.
    pub fn header(&self) -> &Header {
        match *self {
            Message::OpUpdate { ref header, .. } |
            Message::OpInsert { ref header, .. } |
            Message::OpDelete { ref header, .. } |
            Message::OpQuery { ref header, .. } |
            Message::OpGetMore { ref header, .. } |
            Message::OpKillCursors { ref header, .. } => header,
        }
    }

    fn write_cstring(buffer: &mut Vec<u8>, string: &str) {
        buffer.extend_from_slice(string.as_bytes());
        buffer.push(0);
    }

    /// Serializes the message into a single frame. The write cursor is
    /// asserted to land exactly on the length the header declares.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header = self.header();
        let mut buffer = Vec::with_capacity(header.message_length as usize);
        header.write(&mut buffer)?;

        match *self {
            Message::OpUpdate {
                ref namespace,
                ref flags,
                ref selector,
                ref update,
                ..
            } => {
                buffer.write_i32::<LittleEndian>(0)?;
                Message::write_cstring(&mut buffer, namespace);
                buffer.write_i32::<LittleEndian>(flags.bits())?;
                buffer.extend_from_slice(selector);
                buffer.extend_from_slice(update);
            }
            Message::OpInsert {
                ref flags,
                ref namespace,
                ref documents,
                ..
            } => {
                buffer.write_i32::<LittleEndian>(flags.bits())?;
                Message::write_cstring(&mut buffer, namespace);
                buffer.extend_from_slice(documents);
            }
            Message::OpDelete {
                ref namespace,
                ref selector,
                ..
            } => {
                buffer.write_i32::<LittleEndian>(0)?;
                Message::write_cstring(&mut buffer, namespace);
                buffer.write_i32::<LittleEndian>(0)?;
                buffer.extend_from_slice(selector);
            }
            Message::OpQuery {
                ref flags,
                ref namespace,
                number_to_skip,
                number_to_return,
                ref query,
                ref return_field_selector,
                ..
            } => {
                buffer.write_i32::<LittleEndian>(flags.bits())?;
                Message::write_cstring(&mut buffer, namespace);
                buffer.write_i32::<LittleEndian>(number_to_skip)?;
                buffer.write_i32::<LittleEndian>(number_to_return)?;
                buffer.extend_from_slice(query);
                if let Some(ref doc) = *return_field_selector {
                    buffer.extend_from_slice(doc);
                }
            }
            Message::OpGetMore {
                ref namespace,
                number_to_return,
                cursor_id,
                ..
            } => {
                buffer.write_i32::<LittleEndian>(0)?;
                Message::write_cstring(&mut buffer, namespace);
                buffer.write_i32::<LittleEndian>(number_to_return)?;
                buffer.write_i64::<LittleEndian>(cursor_id)?;
            }
            Message::OpKillCursors { ref cursor_ids, .. } => {
                buffer.write_i32::<LittleEndian>(0)?;
                buffer.write_i32::<LittleEndian>(cursor_ids.len() as i32)?;
                for id in cursor_ids {
                    buffer.write_i64::<LittleEndian>(*id)?;
                }
            }
        }

        assert_eq!(
            buffer.len() as i32,
            header.message_length,
            "message body diverged from its declared length"
        );
        Ok(buffer)
    }

    /// Attempts to write the serialized message to a buffer.
    pub fn write<W: Write>(&self, buffer: &mut W) -> Result<()> {
        let bytes = self.to_bytes()?;
        buffer.write_all(&bytes)?;
        let _ = buffer.flush();
        Ok(())
    }

    /// Attempts to read a serialized reply from a buffer.
    ///
    /// The declared length is validated against the fixed-field minimum
    /// and the maximum accepted reply size before the batch is read.
    pub fn read<R: Read>(buffer: &mut R) -> Result<Reply> {
        let header = Header::read(buffer)?;
        if header.op_code != OpCode::Reply {
            return Err(ResponseError(format!(
                "Expected to read {} but instead found {}",
                OpCode::Reply,
                header.op_code
            )));
        }

        let flags = buffer.read_i32::<LittleEndian>()?;
        let cursor_id = buffer.read_i64::<LittleEndian>()?;
        let starting_from = buffer.read_i32::<LittleEndian>()?;
        let number_returned = buffer.read_i32::<LittleEndian>()?;

        if header.message_length < HEADER_SIZE + REPLY_FIELDS_SIZE ||
            header.message_length > MAX_REPLY_LENGTH
        {
            return Err(ReadSizeError(header.message_length));
        }

        let body_length = (header.message_length - HEADER_SIZE - REPLY_FIELDS_SIZE) as usize;
        let mut documents = vec![0; body_length];
        buffer.read_exact(&mut documents)?;

        Ok(Reply {
            header: header,
            flags: OpReplyFlags::from_bits_truncate(flags),
            cursor_id: cursor_id,
            starting_from: starting_from,
            number_returned: number_returned,
            documents: documents,
        })
    }
}
