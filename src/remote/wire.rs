//! Wire protocol framing and the client-side peer.
//!
//! Framing over a duplex byte channel:
//!
//! - a **control frame** is a UTF-8 JSON object followed by a single zero
//!   byte;
//! - a **data frame** is a control frame `{"len": N}` followed by exactly N
//!   raw bytes; `N = 0` ends the stream.
//!
//! Requests are `{"cmd": <mnemonic>, "par": [...]}`; responses carry a
//! `"status"` of `"ok"`, `"done"` or an error text. Mnemonics are four
//! characters or fewer to keep frames small. A Meta travels as the 3-tuple
//! `[filename, checksum, modtime]`; commit history only moves inside full
//! database snapshots (`dbg`/`dbs`).

use serde_json::{Map, Value, json};

use crate::config::{DATA_BLOCK_SIZE, WIRE_VERSION};
use crate::database::{Database, Meta};
use crate::error::{CofferError, Result};
use crate::logging::Logger;
use crate::remote::transport::{ChildTransport, Transport};
use crate::remote::{ChunkSource, Remote};
use crate::sync::SyncTable;

pub const CMD_HELLO: &str = "hello";
pub const CMD_CLOSE: &str = "close";
pub const CMD_GET: &str = "get";
pub const CMD_SET: &str = "set";
pub const CMD_DEL: &str = "del";
pub const CMD_MOVE: &str = "mov";
pub const CMD_COPY: &str = "cpy";
pub const CMD_DB_GET: &str = "dbg";
pub const CMD_DB_SET: &str = "dbs";

pub const KEY_CMD: &str = "cmd";
pub const KEY_PARAMS: &str = "par";
pub const KEY_STATUS: &str = "status";
pub const KEY_DATABASE: &str = "db";
pub const KEY_LEN: &str = "len";
pub const KEY_VERSION: &str = "version";

pub const STATUS_OK: &str = "ok";
pub const STATUS_DONE: &str = "done";

const END_MARKER: u8 = 0;

/// A JSON control frame payload.
pub type Frame = Map<String, Value>;

/// Pack a Meta for the wire.
pub fn meta_pack(meta: &Meta) -> Value {
    json!([meta.filename, meta.checksum, meta.modtime])
}

/// Unpack a wire Meta 3-tuple. The commit history does not travel per-file.
pub fn meta_unpack(value: &Value) -> Result<Meta> {
    let parts = value
        .as_array()
        .filter(|parts| parts.len() == 3)
        .ok_or_else(|| CofferError::Protocol(format!("malformed meta tuple: {value}")))?;
    let filename = parts[0]
        .as_str()
        .ok_or_else(|| CofferError::Protocol("meta filename is not a string".to_string()))?;
    let checksum = parts[1]
        .as_str()
        .ok_or_else(|| CofferError::Protocol("meta checksum is not a string".to_string()))?;
    let modtime = parts[2]
        .as_i64()
        .ok_or_else(|| CofferError::Protocol("meta modtime is not an integer".to_string()))?;
    let mut meta = Meta::new(filename);
    meta.checksum = checksum.to_string();
    meta.modtime = modtime;
    Ok(meta)
}

/// Buffered frame reader/writer over a [`Transport`].
pub struct Connection {
    transport: Box<dyn Transport>,
    data: Vec<u8>,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            data: Vec::new(),
        }
    }

    fn read_more(&mut self) -> Result<()> {
        let chunk = self.transport.recv()?;
        if chunk.is_empty() {
            return Err(CofferError::ConnectionClosed);
        }
        self.data.extend_from_slice(&chunk);
        Ok(())
    }

    /// True when no unconsumed bytes are buffered; a request may only be
    /// issued on a drained connection.
    pub fn is_drained(&self) -> bool {
        self.data.is_empty()
    }

    /// Block until a full control frame is buffered, then decode it.
    pub fn wait_object(&mut self) -> Result<Frame> {
        loop {
            if let Some(index) = self.data.iter().position(|b| *b == END_MARKER) {
                let frame: Frame = serde_json::from_slice(&self.data[..index])?;
                self.data.drain(..=index);
                return Ok(frame);
            }
            self.read_more()?;
        }
    }

    /// Block until `count` raw bytes are buffered, then take them.
    pub fn wait_count(&mut self, count: usize) -> Result<Vec<u8>> {
        while self.data.len() < count {
            self.read_more()?;
        }
        let rest = self.data.split_off(count);
        Ok(std::mem::replace(&mut self.data, rest))
    }

    /// Send one zero-terminated control frame.
    pub fn send_obj(&mut self, value: &Value) -> Result<()> {
        let mut bytes = serde_json::to_vec(value)?;
        bytes.push(END_MARKER);
        self.transport.send(&bytes)
    }

    /// Stream a chunk source as a sequence of data frames, then the
    /// end-of-stream frame.
    pub fn data_send(&mut self, source: &mut dyn ChunkSource) -> Result<()> {
        while let Some(block) = source.next_chunk()? {
            self.send_obj(&json!({ KEY_LEN: block.len() }))?;
            self.transport.send(&block)?;
        }
        self.send_obj(&json!({ KEY_LEN: 0 }))
    }

    /// Start consuming an incoming data-frame sequence.
    pub fn data_receive(&mut self) -> DataFrames<'_> {
        DataFrames {
            conn: self,
            remaining: 0,
            finished: false,
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.transport.close()
    }
}

/// Incoming data-frame stream, yielded in block-sized chunks.
pub struct DataFrames<'a> {
    conn: &'a mut Connection,
    remaining: usize,
    finished: bool,
}

impl ChunkSource for DataFrames<'_> {
    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        if self.remaining == 0 {
            let header = self.conn.wait_object()?;
            let len = header
                .get(KEY_LEN)
                .and_then(Value::as_u64)
                .ok_or_else(|| CofferError::Protocol("data frame without length".to_string()))?;
            if len == 0 {
                self.finished = true;
                return Ok(None);
            }
            self.remaining = len as usize;
        }
        let to_get = self.remaining.min(DATA_BLOCK_SIZE);
        let block = self.conn.wait_count(to_get)?;
        self.remaining -= to_get;
        Ok(Some(block))
    }
}

/// Client-side peer speaking the wire protocol.
///
/// Holds a local snapshot of the peer's database, fetched on open (`dbg`)
/// and pushed back by `database_save` (`dbs`).
pub struct RemoteWire {
    name: String,
    db: Database,
    conn: Connection,
    xtable: Option<SyncTable>,
    log: Logger,
}

impl std::fmt::Debug for RemoteWire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWire")
            .field("name", &self.name)
            .field("db", &self.db)
            .field("xtable", &self.xtable)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl RemoteWire {
    /// Open an `ssh://user@host:<path>` peer by spawning the transport
    /// subprocess running `coffer _server_mode <path>` on the remote side.
    pub fn open(url: &str, name: &str, ssh_command: &str, log: Logger) -> Result<Self> {
        let rest = url
            .strip_prefix("ssh://")
            .ok_or_else(|| CofferError::Protocol(format!("not an ssh url: '{url}'")))?;
        let (host, path) = rest.split_once(':').ok_or_else(|| {
            CofferError::Protocol(format!(
                "Invalid url '{url}'. It must be in format 'ssh://<hostname>:<path to repository>'"
            ))
        })?;

        log.verbose(1, format!("Opening connection to {host} .. "));
        let transport = ChildTransport::spawn(ssh_command, &[host, "coffer", "_server_mode", path])?;
        log.info("Connection opened, fetching database .. ");
        Self::from_transport(Box::new(transport), name, log)
    }

    /// Handshake and fetch the database snapshot over an already-open
    /// transport.
    pub fn from_transport(
        transport: Box<dyn Transport>,
        name: &str,
        log: Logger,
    ) -> Result<Self> {
        let mut remote = Self {
            name: name.to_string(),
            db: Database::in_memory(name),
            conn: Connection::new(transport),
            xtable: None,
            log,
        };
        remote.send(CMD_HELLO, vec![json!(WIRE_VERSION)])?;
        remote.log.verbose(1, "Connection ok. Fetching database .. ");
        let resp = remote.send(CMD_DB_GET, vec![])?;
        let raw = resp
            .get(KEY_DATABASE)
            .and_then(Value::as_str)
            .ok_or_else(|| CofferError::Protocol("database response without payload".to_string()))?
            .to_string();
        remote.db.json_loads(&raw)?;
        Ok(remote)
    }

    /// Issue one request and wait for its acknowledgement.
    fn send(&mut self, cmd: &str, params: Vec<Value>) -> Result<Frame> {
        debug_assert!(self.conn.is_drained());
        self.conn
            .send_obj(&json!({ KEY_CMD: cmd, KEY_PARAMS: params }))?;
        let resp = self.conn.wait_object()?;
        match resp.get(KEY_STATUS).and_then(Value::as_str) {
            Some(STATUS_OK | STATUS_DONE) => Ok(resp),
            Some(error) => Err(CofferError::ServerError(error.to_string())),
            None => Err(CofferError::Protocol(
                "response without status".to_string(),
            )),
        }
    }
}

impl Remote for RemoteWire {
    fn name(&self) -> &str {
        &self.name
    }

    fn database(&mut self) -> &mut Database {
        &mut self.db
    }

    fn database_save(&mut self) -> Result<()> {
        let raw = self.db.json_dumps()?;
        self.send(CMD_DB_SET, vec![Value::String(raw)])?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.send(CMD_CLOSE, Vec::new())?;
        self.conn.close()
    }

    fn file_get(&mut self, source: &Meta) -> Result<Box<dyn ChunkSource + '_>> {
        self.send(CMD_GET, vec![meta_pack(source)])?;
        Ok(Box::new(self.conn.data_receive()))
    }

    fn file_set(&mut self, target: &Meta, content: &mut dyn ChunkSource) -> Result<()> {
        let resp = self.send(CMD_SET, vec![meta_pack(target)])?;
        if resp.get(KEY_STATUS).and_then(Value::as_str) == Some(STATUS_DONE) {
            // The target already matches; the server refuses the data.
            return Ok(());
        }
        self.conn.data_send(content)
    }

    fn file_del(&mut self, target: &Meta) -> Result<()> {
        self.send(CMD_DEL, vec![meta_pack(target)])?;
        Ok(())
    }

    fn file_move(&mut self, source: &Meta, target: &Meta) -> Result<()> {
        self.send(CMD_MOVE, vec![meta_pack(source), meta_pack(target)])?;
        Ok(())
    }

    fn file_copy(&mut self, source: &Meta, target: &Meta) -> Result<()> {
        self.send(CMD_COPY, vec![meta_pack(source), meta_pack(target)])?;
        Ok(())
    }

    fn table_set(&mut self, table: SyncTable) {
        self.xtable = Some(table);
    }

    fn table_take(&mut self) -> Option<SyncTable> {
        self.xtable.take()
    }

    fn table_done(&self) -> bool {
        self.xtable.as_ref().is_none_or(SyncTable::done)
    }
}
