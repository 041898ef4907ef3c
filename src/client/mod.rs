//! Connection management and replica-set primary discovery.

pub mod command;
pub mod cursor;

use bson::{Document, ElementType, ValidityFlags};
use client::cursor::Cursor;
use transport::{Connector, TcpConnector, Transport};
use wire_protocol::flags::{OpInsertFlags, OpQueryFlags, OpUpdateFlags};
use wire_protocol::operations::{Message, Reply};
use Error::{BadSetName, CannotFindPrimary, InvalidDocument, OperationError};
use Result;

/// The port assumed for hosts that do not name one.
pub const DEFAULT_PORT: u16 = 27017;

/// A server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// The hostname to connect to.
    pub host_name: String,
    /// The port to connect to.
    pub port: u16,
}

impl Host {
    pub fn new(host_name: String, port: u16) -> Host {
        Host {
            host_name: host_name,
            port: port,
        }
    }

    /// Parses a `host[:port]` string, falling back to the default port
    /// when none is given.
    pub fn parse(host_string: &str) -> Host {
        match host_string.rfind(':') {
            Some(idx) => {
                let port = host_string[idx + 1..].parse().unwrap_or(DEFAULT_PORT);
                Host::new(host_string[..idx].to_owned(), port)
            }
            None => Host::new(host_string.to_owned(), DEFAULT_PORT),
        }
    }
}

/// An error code and message reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub code: i32,
    pub message: String,
}

// Replica-set bookkeeping: the configured name, the user-supplied seeds,
// and the host list the seeds reported.
#[derive(Debug)]
struct ReplicaSetState {
    name: String,
    seeds: Vec<Host>,
    hosts: Vec<Host>,
    primary_connected: bool,
}

/// A single connection to a server or replica-set primary.
///
/// A connection is exclusively owned: cursors and readers borrow from it
/// and requests are strictly serial, so a reply must be fully consumed
/// before the next request is sent.
pub struct Connection<C: Connector = TcpConnector> {
    connector: C,
    transport: Option<C::Stream>,
    primary: Option<Host>,
    replset: Option<ReplicaSetState>,
    timeout_ms: u64,
    strict_set_name: bool,
    last_error: Option<ServerError>,
}

impl Connection<TcpConnector> {
    /// Connects directly to a single server over TCP.
    pub fn new(host: &str, port: u16) -> Result<Connection<TcpConnector>> {
        let mut conn = Connection::with_connector(TcpConnector);
        conn.connect(host, port)?;
        Ok(conn)
    }
}

impl<C: Connector> Connection<C> {
    /// Creates a disconnected connection that acquires transports through
    /// the given connector.
    pub fn with_connector(connector: C) -> Connection<C> {
        Connection {
            connector: connector,
            transport: None,
            primary: None,
            replset: None,
            timeout_ms: 0,
            strict_set_name: false,
            last_error: None,
        }
    }

    /// Connects directly to the given endpoint, clearing any replica-set
    /// configuration.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.replset = None;
        self.primary = Some(Host::new(host.to_owned(), port));
        let transport = self.open_transport(host, port)?;
        self.transport = Some(transport);
        Ok(())
    }

    /// Puts the connection in replica-set mode under the given set name.
    /// Seeds are added afterwards, then `replset_connect` runs discovery.
    pub fn replset_init(&mut self, name: &str) {
        self.close_transport();
        self.primary = None;
        self.replset = Some(ReplicaSetState {
            name: name.to_owned(),
            seeds: Vec::new(),
            hosts: Vec::new(),
            primary_connected: false,
        });
    }

    /// Registers a seed endpoint for discovery.
    pub fn add_seed(&mut self, host: &str, port: u16) -> Result<()> {
        match self.replset {
            Some(ref mut replset) => {
                replset.seeds.push(Host::new(host.to_owned(), port));
                Ok(())
            }
            None => Err(OperationError(
                String::from("seeds require a replica-set connection"),
            )),
        }
    }

    /// When enabled, a host whose handshake omits the set name is treated
    /// as a set-name mismatch instead of being accepted.
    pub fn set_strict_set_name(&mut self, strict: bool) {
        self.strict_set_name = strict;
    }

    /// Discovers the replica set from its seeds and connects to the
    /// primary.
    ///
    /// Seeds are consulted in insertion order until one yields a host
    /// list; unreachable seeds are skipped. The discovered hosts are then
    /// walked in order until one identifies itself as master.
    pub fn replset_connect(&mut self) -> Result<()> {
        let seeds = match self.replset {
            Some(ref replset) => replset.seeds.clone(),
            None => {
                return Err(OperationError(
                    String::from("connection is not configured for a replica set"),
                ))
            }
        };

        for seed in &seeds {
            match self.open_transport(&seed.host_name, seed.port) {
                Ok(transport) => {
                    self.transport = Some(transport);
                    self.check_seed();
                }
                Err(_) => continue,
            }
            let have_hosts = match self.replset {
                Some(ref replset) => !replset.hosts.is_empty(),
                None => false,
            };
            if have_hosts {
                break;
            }
        }

        let hosts = match self.replset {
            Some(ref replset) => replset.hosts.clone(),
            None => Vec::new(),
        };
        if hosts.is_empty() {
            return Err(CannotFindPrimary);
        }

        for host in &hosts {
            if let Ok(transport) = self.open_transport(&host.host_name, host.port) {
                self.transport = Some(transport);
                if self.check_host(host)? {
                    return Ok(());
                }
            }
        }

        Err(CannotFindPrimary)
    }

    // Asks a seed for the canonical host list and appends every entry it
    // reports. The seed connection is closed either way.
    fn check_seed(&mut self) {
        let mut discovered = Vec::new();

        if let Ok(out) = self.simple_int_command("admin", "ismaster", 1) {
            let mut it = out.reader();
            if let Ok(ElementType::Array) = it.find("hosts") {
                let mut hosts_it = it.subreader();
                while let Ok(tag) = hosts_it.next() {
                    if tag == ElementType::EndOfDocument {
                        break;
                    }
                    discovered.push(Host::parse(hosts_it.string_value()));
                }
            }
        }

        if let Some(ref mut replset) = self.replset {
            replset.hosts.extend(discovered);
        }
        self.close_transport();
    }

    // Runs the handshake against the currently connected host. Returns
    // true when the host is the primary, in which case the transport is
    // kept open. A set-name mismatch aborts discovery altogether.
    fn check_host(&mut self, host: &Host) -> Result<bool> {
        let configured_name = match self.replset {
            Some(ref replset) => replset.name.clone(),
            None => String::new(),
        };

        let mut ismaster = false;
        if let Ok(out) = self.simple_int_command("admin", "ismaster", 1) {
            let mut it = out.reader();
            if it.find("ismaster")? != ElementType::EndOfDocument {
                ismaster = it.as_bool();
            }
            match it.find("setName")? {
                ElementType::EndOfDocument => {
                    if self.strict_set_name {
                        self.close_transport();
                        return Err(BadSetName(String::from("(unreported)")));
                    }
                }
                _ => {
                    let reported = it.string_value();
                    if reported != configured_name {
                        let reported = reported.to_owned();
                        self.close_transport();
                        return Err(BadSetName(reported));
                    }
                }
            }
        }

        if ismaster {
            if let Some(ref mut replset) = self.replset {
                replset.primary_connected = true;
            }
            self.primary = Some(host.clone());
            Ok(true)
        } else {
            self.close_transport();
            Ok(false)
        }
    }

    /// Re-establishes the connection: replica-set mode discards the
    /// discovered host list and reruns discovery, direct mode reopens the
    /// configured endpoint.
    pub fn reconnect(&mut self) -> Result<()> {
        self.disconnect();

        if self.replset.is_some() {
            return self.replset_connect();
        }

        let primary = match self.primary {
            Some(ref host) => host.clone(),
            None => {
                return Err(OperationError(
                    String::from("no endpoint configured to reconnect to"),
                ))
            }
        };
        let transport = self.open_transport(&primary.host_name, primary.port)?;
        self.transport = Some(transport);
        Ok(())
    }

    /// Closes the transport and forgets any discovered replica-set hosts.
    pub fn disconnect(&mut self) {
        if let Some(ref mut replset) = self.replset {
            replset.primary_connected = false;
            replset.hosts.clear();
        }
        self.close_transport();
    }

    /// Applies one timeout to sends and receives, in milliseconds. Zero
    /// disables the timeout.
    pub fn set_timeout(&mut self, millis: u64) -> Result<()> {
        self.timeout_ms = millis;
        if let Some(ref mut transport) = self.transport {
            transport.set_timeout(millis)?;
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Whether replica-set discovery has connected to the primary.
    pub fn is_primary_connected(&self) -> bool {
        match self.replset {
            Some(ref replset) => replset.primary_connected,
            None => false,
        }
    }

    /// The endpoint the connection is bound to: the configured host in
    /// direct mode, the discovered primary in replica-set mode.
    pub fn primary(&self) -> Option<&Host> {
        self.primary.as_ref()
    }

    /// The most recent error the server reported through a command reply.
    pub fn last_error(&self) -> Option<&ServerError> {
        self.last_error.as_ref()
    }

    pub(crate) fn record_server_error(&mut self, error: Option<ServerError>) {
        self.last_error = error;
    }

    fn open_transport(&mut self, host: &str, port: u16) -> Result<C::Stream> {
        let mut transport = self.connector.connect(host, port)?;
        transport.set_timeout(self.timeout_ms)?;
        Ok(transport)
    }

    fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close();
        }
    }

    /// Writes a framed message to the transport.
    pub fn send_message(&mut self, message: &Message) -> Result<()> {
        match self.transport {
            Some(ref mut transport) => message.write(transport),
            None => Err(OperationError(String::from("connection is not open"))),
        }
    }

    /// Reads one reply from the transport.
    pub fn read_reply(&mut self) -> Result<Reply> {
        match self.transport {
            Some(ref mut transport) => Message::read(transport),
            None => Err(OperationError(String::from("connection is not open"))),
        }
    }

    // Refuses documents whose validity bits forbid the operation:
    // malformed UTF-8 always, dotted or dollar-initial field names only
    // for inserts (update operators legitimately begin with '$').
    fn check_document(&self, doc: &Document, insert: bool) -> Result<()> {
        let errors = doc.errors();
        if errors.contains(ValidityFlags::NOT_UTF8) {
            return Err(InvalidDocument(errors));
        }
        if insert
            && (errors.contains(ValidityFlags::FIELD_HAS_DOT)
                || errors.contains(ValidityFlags::FIELD_INIT_DOLLAR))
        {
            return Err(InvalidDocument(errors));
        }
        Ok(())
    }

    /// Inserts a single document into the namespace.
    pub fn insert(&mut self, namespace: &str, document: &Document) -> Result<()> {
        self.check_document(document, true)?;
        let message = Message::new_insert(
            0,
            OpInsertFlags::no_flags(),
            namespace.to_owned(),
            document.as_bytes().to_vec(),
        );
        self.send_message(&message)
    }

    /// Inserts a batch of documents in one message.
    pub fn insert_batch(&mut self, namespace: &str, documents: &[&Document]) -> Result<()> {
        let mut body = Vec::new();
        for document in documents {
            self.check_document(document, true)?;
            body.extend_from_slice(document.as_bytes());
        }
        let message = Message::new_insert(0, OpInsertFlags::no_flags(), namespace.to_owned(), body);
        self.send_message(&message)
    }

    /// Updates the documents matching `selector` according to `update`.
    pub fn update(
        &mut self,
        namespace: &str,
        selector: &Document,
        update: &Document,
        flags: OpUpdateFlags,
    ) -> Result<()> {
        self.check_document(update, false)?;
        let message = Message::new_update(
            0,
            namespace.to_owned(),
            flags,
            selector.as_bytes().to_vec(),
            update.as_bytes().to_vec(),
        );
        self.send_message(&message)
    }

    /// Removes the documents matching `selector`.
    pub fn remove(&mut self, namespace: &str, selector: &Document) -> Result<()> {
        let message = Message::new_delete(0, namespace.to_owned(), selector.as_bytes().to_vec());
        self.send_message(&message)
    }

    /// Issues a query and returns a cursor over its result batches.
    pub fn find(
        &mut self,
        namespace: &str,
        query: &Document,
        fields: Option<&Document>,
        number_to_return: i32,
        number_to_skip: i32,
        options: OpQueryFlags,
    ) -> Result<Cursor<C>> {
        let message = Message::new_query(
            0,
            options,
            namespace.to_owned(),
            number_to_skip,
            number_to_return,
            query.as_bytes().to_vec(),
            fields.map(|doc| doc.as_bytes().to_vec()),
        );
        self.send_message(&message)?;
        let reply = self.read_reply()?;
        Ok(Cursor::new(self, namespace.to_owned(), reply, options))
    }

    /// Returns the first document matching the query, if any.
    pub fn find_one(
        &mut self,
        namespace: &str,
        query: &Document,
        fields: Option<&Document>,
    ) -> Result<Option<Document>> {
        let mut cursor = self.find(namespace, query, fields, 1, 0, OpQueryFlags::no_flags())?;
        if cursor.advance()? {
            Ok(cursor.current().map(|view| view.to_document()))
        } else {
            Ok(None)
        }
    }

    /// Releases the given server-side cursors.
    pub fn kill_cursors(&mut self, cursor_ids: &[i64]) -> Result<()> {
        let message = Message::new_kill_cursors(0, cursor_ids.to_vec());
        self.send_message(&message)
    }
}
