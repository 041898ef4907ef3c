//! Iteration over query result batches.

use byteorder::{ByteOrder, LittleEndian};

use bson::DocumentView;
use client::Connection;
use transport::Connector;
use wire_protocol::flags::OpQueryFlags;
use wire_protocol::operations::{Message, Reply};
use Error::{CursorExhausted, CursorPending, MalformedDocument};
use Result;

/// A client-side iterator over the documents a query returned, bound to a
/// possibly live server-side cursor.
///
/// The cursor owns its reply buffer and namespace and borrows the
/// connection; advancing past the final document of a batch fetches the
/// next one from the server. Dropping the cursor releases any remaining
/// server-side state.
pub struct Cursor<'a, C: Connector + 'a> {
    conn: &'a mut Connection<C>,
    namespace: String,
    reply: Reply,
    offset: Option<usize>,
    options: OpQueryFlags,
}

impl<'a, C: Connector> Cursor<'a, C> {
    pub(crate) fn new(
        conn: &'a mut Connection<C>,
        namespace: String,
        reply: Reply,
        options: OpQueryFlags,
    ) -> Cursor<'a, C> {
        Cursor {
            conn: conn,
            namespace: namespace,
            reply: reply,
            offset: None,
            options: options,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The server-side cursor identifier; zero once the server holds no
    /// further state.
    pub fn cursor_id(&self) -> i64 {
        self.reply.cursor_id
    }

    pub fn options(&self) -> OpQueryFlags {
        self.options
    }

    /// Moves to the next document, fetching a continuation batch when the
    /// current one is exhausted and the server still holds state.
    ///
    /// Returns `false` once the result set is exhausted. A tailable query
    /// whose continuation comes back empty while the server id stays live
    /// reports `CursorPending`.
    pub fn advance(&mut self) -> Result<bool> {
        // An empty first batch with a live server id is the tailable
        // case: ask for a continuation immediately.
        if self.reply.number_returned == 0 {
            if self.reply.cursor_id == 0 {
                return Ok(false);
            }
            self.get_more()?;
            if self.reply.number_returned == 0 {
                return if self.reply.cursor_id != 0 {
                    Err(CursorPending)
                } else {
                    Ok(false)
                };
            }
        }

        let next = match self.offset {
            None => 0,
            Some(offset) => offset + self.document_length_at(offset)?,
        };

        if next >= self.reply.documents.len() {
            if self.reply.cursor_id == 0 {
                return Ok(false);
            }
            self.get_more()?;
            if self.reply.number_returned == 0 {
                return if self.reply.cursor_id != 0 {
                    Err(CursorPending)
                } else {
                    Ok(false)
                };
            }
            self.offset = Some(0);
        } else {
            self.offset = Some(next);
        }

        Ok(true)
    }

    /// A view of the document the cursor is positioned on.
    pub fn current(&self) -> Option<DocumentView> {
        let offset = match self.offset {
            Some(offset) => offset,
            None => return None,
        };
        let length = match self.document_length_at(offset) {
            Ok(length) => length,
            Err(_) => return None,
        };
        let end = offset + length;
        if end > self.reply.documents.len() {
            return None;
        }
        Some(DocumentView::new(&self.reply.documents[offset..end]))
    }

    fn document_length_at(&self, offset: usize) -> Result<usize> {
        let documents = &self.reply.documents;
        if offset + 4 > documents.len() {
            return Err(MalformedDocument(String::from("truncated reply batch")));
        }
        let length = LittleEndian::read_i32(&documents[offset..offset + 4]);
        if length < 5 {
            return Err(MalformedDocument(
                format!("reply document declares a length of {}", length),
            ));
        }
        Ok(length as usize)
    }

    /// Fetches the next batch for the cursor's server-side id, replacing
    /// the reply buffer.
    pub fn get_more(&mut self) -> Result<()> {
        if self.reply.cursor_id == 0 {
            return Err(CursorExhausted);
        }

        let message =
            Message::new_get_more(0, self.namespace.clone(), 0, self.reply.cursor_id);

        // A transport failure leaves the cursor dead; there is no state
        // left worth releasing over a broken connection.
        if let Err(err) = self.conn.send_message(&message) {
            self.reply.cursor_id = 0;
            return Err(err);
        }
        match self.conn.read_reply() {
            Ok(reply) => {
                self.reply = reply;
                self.offset = None;
                Ok(())
            }
            Err(err) => {
                self.reply.cursor_id = 0;
                Err(err)
            }
        }
    }
}

impl<'a, C: Connector + 'a> Drop for Cursor<'a, C> {
    // Releases the server-side cursor when the server still holds one.
    fn drop(&mut self) {
        if self.reply.cursor_id != 0 {
            let _ = self.conn.kill_cursors(&[self.reply.cursor_id]);
        }
    }
}
