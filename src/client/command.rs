//! Database commands layered over the query path.
//!
//! Commands are single-document queries against the `$cmd` collection of
//! a database; helpers here cover the administrative commands the client
//! itself needs (handshakes, error retrieval, authentication) along with
//! the common conveniences built from core writes.

use hex;
use md5::{Digest, Md5};

use bson::{Document, DocumentBuilder, ElementType};
use client::{Connection, ServerError};
use transport::Connector;
use wire_protocol::flags::OpUpdateFlags;
use Error::{CommandFailed, ResponseError};
use Result;

bitflags! {
    /// Options mapped onto named boolean fields of an index specification.
    pub struct IndexOptions: i32 {
        const UNIQUE     = 0b0001;
        const DROP_DUPS  = 0b0010;
        const BACKGROUND = 0b0100;
        const SPARSE     = 0b1000;
    }
}

impl IndexOptions {
    /// Constructs a new struct with all flags set to false.
    pub fn no_flags() -> IndexOptions {
        IndexOptions::empty()
    }
}

// The digest stored server-side for a user: md5(user ":mongo:" pass).
fn pass_digest(user: &str, pass: &str) -> String {
    let mut hasher = Md5::new();
    hasher.input(user.as_bytes());
    hasher.input(b":mongo:");
    hasher.input(pass.as_bytes());
    hex::encode(hasher.result())
}

impl<C: Connector> Connection<C> {
    /// Runs a command document against a database and returns the reply
    /// document. The reply's `ok` field is not inspected.
    pub fn run_command(&mut self, db: &str, command: &Document) -> Result<Document> {
        let namespace = format!("{}.$cmd", db);
        let fields = Document::empty();
        match self.find_one(&namespace, command, Some(&fields))? {
            Some(doc) => Ok(doc),
            None => Err(ResponseError(
                String::from("the command returned no reply document"),
            )),
        }
    }

    // Checks a command reply's `ok` field, recording the server-supplied
    // code and message on failure. The connection stays usable.
    fn check_command_reply(&mut self, reply: Document) -> Result<Document> {
        let ok = {
            let mut it = reply.reader();
            match it.find("ok") {
                Ok(tag) if tag != ElementType::EndOfDocument => it.as_bool(),
                _ => false,
            }
        };
        if ok {
            return Ok(reply);
        }

        let (code, message) = {
            let mut it = reply.reader();
            let message = match it.find("errmsg") {
                Ok(ElementType::String) => it.string_value().to_owned(),
                _ => String::new(),
            };
            let code = match it.find("code") {
                Ok(tag) if tag != ElementType::EndOfDocument => it.as_i32(),
                _ => 0,
            };
            (code, message)
        };
        self.record_server_error(Some(ServerError {
            code: code,
            message: message.clone(),
        }));
        Err(CommandFailed {
            code: code,
            message: message,
        })
    }

    /// Runs `{name: arg}` against a database, requiring a truthy `ok`.
    pub fn simple_int_command(&mut self, db: &str, name: &str, arg: i32) -> Result<Document> {
        let mut builder = DocumentBuilder::new();
        builder.append_i32(name, arg)?;
        let command = builder.into_document()?;
        let reply = self.run_command(db, &command)?;
        self.check_command_reply(reply)
    }

    /// Runs `{name: arg}` with a string argument, requiring a truthy `ok`.
    pub fn simple_str_command(&mut self, db: &str, name: &str, arg: &str) -> Result<Document> {
        let mut builder = DocumentBuilder::new();
        builder.append_string(name, arg)?;
        let command = builder.into_document()?;
        let reply = self.run_command(db, &command)?;
        self.check_command_reply(reply)
    }

    /// Asks the connected host whether it is the master.
    pub fn is_master(&mut self) -> Result<bool> {
        let reply = self.simple_int_command("admin", "ismaster", 1)?;
        let mut it = reply.reader();
        Ok(match it.find("ismaster")? {
            ElementType::EndOfDocument => false,
            _ => it.as_bool(),
        })
    }

    pub fn drop_database(&mut self, db: &str) -> Result<()> {
        self.simple_int_command(db, "dropDatabase", 1).map(|_| ())
    }

    pub fn drop_collection(&mut self, db: &str, collection: &str) -> Result<()> {
        self.simple_str_command(db, "drop", collection).map(|_| ())
    }

    /// Clears the server-side error state for a database.
    pub fn reset_error(&mut self, db: &str) -> Result<()> {
        self.simple_int_command(db, "reseterror", 1).map(|_| ())
    }

    /// Fetches the outcome of the most recent operation on this
    /// connection, recording any reported error.
    pub fn get_last_error(&mut self, db: &str) -> Result<Option<ServerError>> {
        self.get_error_command(db, "getlasterror")
    }

    /// Like `get_last_error`, but survives intervening operations until
    /// the error state is reset.
    pub fn get_prev_error(&mut self, db: &str) -> Result<Option<ServerError>> {
        self.get_error_command(db, "getpreverror")
    }

    fn get_error_command(&mut self, db: &str, name: &str) -> Result<Option<ServerError>> {
        self.record_server_error(None);

        let reply = self.simple_int_command(db, name, 1)?;
        let mut it = reply.reader();
        let message = match it.find("err")? {
            ElementType::EndOfDocument | ElementType::Null => return Ok(None),
            _ => it.string_value().to_owned(),
        };
        let code = match it.find("code")? {
            ElementType::EndOfDocument | ElementType::Null => 0,
            _ => it.as_i32(),
        };

        let error = ServerError {
            code: code,
            message: message,
        };
        self.record_server_error(Some(error.clone()));
        Ok(Some(error))
    }

    /// Counts the documents of a collection, optionally restricted by a
    /// query document.
    pub fn count(&mut self, db: &str, collection: &str, query: Option<&Document>) -> Result<i64> {
        let mut builder = DocumentBuilder::new();
        builder.append_string("count", collection)?;
        if let Some(query) = query {
            // An empty query document adds nothing to the command.
            if query.size() > 5 {
                builder.append_document("query", query)?;
            }
        }
        let command = builder.into_document()?;

        let reply = self.run_command(db, &command)?;
        let reply = self.check_command_reply(reply)?;
        let mut it = reply.reader();
        match it.find("n")? {
            ElementType::EndOfDocument => Err(ResponseError(
                String::from("count reply carried no \"n\" field"),
            )),
            _ => Ok(it.as_i64()),
        }
    }

    /// Creates an index over the given key document on `namespace`,
    /// returning the outcome reported by `getLastError`.
    pub fn create_index(
        &mut self,
        namespace: &str,
        key: &Document,
        options: IndexOptions,
    ) -> Result<Option<ServerError>> {
        // The index name is an underscore followed by the key field names.
        let mut name = String::from("_");
        {
            let mut it = key.reader();
            while it.next()? != ElementType::EndOfDocument {
                name.push_str(it.key());
            }
        }

        let mut builder = DocumentBuilder::new();
        builder.append_document("key", key)?;
        builder.append_string("ns", namespace)?;
        builder.append_string("name", &name)?;
        if options.contains(IndexOptions::UNIQUE) {
            builder.append_bool("unique", true)?;
        }
        if options.contains(IndexOptions::DROP_DUPS) {
            builder.append_bool("dropDups", true)?;
        }
        if options.contains(IndexOptions::BACKGROUND) {
            builder.append_bool("background", true)?;
        }
        if options.contains(IndexOptions::SPARSE) {
            builder.append_bool("sparse", true)?;
        }
        let spec = builder.into_document()?;

        let db = match namespace.find('.') {
            Some(idx) => &namespace[..idx],
            None => namespace,
        };
        let index_namespace = format!("{}.system.indexes", db);
        self.insert(&index_namespace, &spec)?;
        self.get_last_error(db)
    }

    /// Creates an ascending single-field index.
    pub fn create_simple_index(
        &mut self,
        namespace: &str,
        field: &str,
        options: IndexOptions,
    ) -> Result<Option<ServerError>> {
        let mut builder = DocumentBuilder::new();
        builder.append_i32(field, 1)?;
        let key = builder.into_document()?;
        self.create_index(namespace, &key, options)
    }

    /// Creates or updates a user by upserting its credential digest into
    /// the database's user collection.
    pub fn add_user(&mut self, db: &str, user: &str, pass: &str) -> Result<()> {
        let digest = pass_digest(user, pass);

        let mut builder = DocumentBuilder::new();
        builder.append_string("user", user)?;
        let selector = builder.into_document()?;

        let mut builder = DocumentBuilder::new();
        builder.start_document("$set")?;
        builder.append_string("pwd", &digest)?;
        builder.finish_document()?;
        let update = builder.into_document()?;

        let namespace = format!("{}.system.users", db);
        self.update(&namespace, &selector, &update, OpUpdateFlags::UPSERT)
    }

    /// Authenticates against a database: fetches a nonce, derives
    /// `md5(nonce + user + md5(user ":mongo:" pass))`, and submits it.
    pub fn authenticate(&mut self, db: &str, user: &str, pass: &str) -> Result<()> {
        let nonce_reply = self.simple_int_command(db, "getnonce", 1)?;
        let nonce = {
            let mut it = nonce_reply.reader();
            match it.find("nonce")? {
                ElementType::EndOfDocument => {
                    return Err(ResponseError(
                        String::from("getnonce reply carried no nonce"),
                    ))
                }
                _ => it.string_value().to_owned(),
            }
        };

        let digest = pass_digest(user, pass);
        let mut hasher = Md5::new();
        hasher.input(nonce.as_bytes());
        hasher.input(user.as_bytes());
        hasher.input(digest.as_bytes());
        let key = hex::encode(hasher.result());

        let mut builder = DocumentBuilder::new();
        builder.append_i32("authenticate", 1)?;
        builder.append_string("user", user)?;
        builder.append_string("nonce", &nonce)?;
        builder.append_string("key", &key)?;
        let command = builder.into_document()?;

        let reply = self.run_command(db, &command)?;
        self.check_command_reply(reply).map(|_| ())
    }
}
