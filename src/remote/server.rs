//! Server side of the wire protocol.
//!
//! Accepts requests on a duplex channel until the peer closes. Every
//! mutation of the served repository goes through the same overwrite guard
//! and two-phase file creation as a local sync, so a crashed connection
//! leaves only trash-staged partial files behind.

use serde_json::{Value, json};

use crate::config::WIRE_VERSION;
use crate::database::{Database, Meta};
use crate::error::{CofferError, Result};
use crate::logging::Logger;
use crate::remote::transport::Transport;
use crate::remote::wire::{
    CMD_CLOSE, CMD_COPY, CMD_DB_GET, CMD_DB_SET, CMD_DEL, CMD_GET, CMD_HELLO, CMD_MOVE, CMD_SET,
    Connection, Frame, KEY_CMD, KEY_DATABASE, KEY_PARAMS, KEY_STATUS, KEY_VERSION, STATUS_DONE,
    STATUS_OK, meta_unpack,
};
use crate::sync::{OverwriteCheck, check_database, check_file_equal};
use crate::worktree::WorkTree;

/// Serve the wire protocol over `transport` until the peer closes.
pub fn serve(
    db: &mut Database,
    tree: &WorkTree,
    transport: Box<dyn Transport>,
    log: Logger,
) -> Result<()> {
    WireServer {
        db,
        tree,
        conn: Connection::new(transport),
        last_sent_error: None,
        log,
    }
    .run()
}

struct WireServer<'a> {
    db: &'a mut Database,
    tree: &'a WorkTree,
    conn: Connection,
    /// Last error text sent to the peer. A transport close that follows an
    /// errored exchange is a clean shutdown, not a crash.
    last_sent_error: Option<String>,
    log: Logger,
}

impl WireServer<'_> {
    fn run(mut self) -> Result<()> {
        loop {
            let request = match self.conn.wait_object() {
                Ok(request) => request,
                Err(CofferError::ConnectionClosed) if self.last_sent_error.is_some() => {
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let cmd = request
                .get(KEY_CMD)
                .and_then(Value::as_str)
                .ok_or_else(|| CofferError::Protocol("request without command".to_string()))?
                .to_string();
            let params = request
                .get(KEY_PARAMS)
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            self.log.verbose(1, format!("serving '{cmd}'"));
            match cmd.as_str() {
                CMD_HELLO => self.serve_hello()?,
                CMD_CLOSE => {
                    self.serve_close()?;
                    return Ok(());
                }
                CMD_GET => self.serve_get(&params)?,
                CMD_SET => self.serve_set(&params)?,
                CMD_DEL => self.serve_del(&params)?,
                CMD_MOVE => self.serve_move(&params)?,
                CMD_COPY => self.serve_copy(&params)?,
                CMD_DB_GET => self.serve_db_get()?,
                CMD_DB_SET => self.serve_db_set(&params)?,
                other => {
                    return Err(CofferError::Protocol(format!("unknown command '{other}'")));
                }
            }
        }
    }

    fn send_response(&mut self, values: Option<Frame>, error: Option<String>) -> Result<()> {
        let mut frame = values.unwrap_or_default();
        match error {
            None => {
                frame.insert(KEY_STATUS.to_string(), json!(STATUS_OK));
                self.last_sent_error = None;
            }
            Some(error) => {
                frame.insert(KEY_STATUS.to_string(), json!(error));
                self.last_sent_error = Some(error);
            }
        }
        self.conn.send_obj(&Value::Object(frame))
    }

    fn serve_hello(&mut self) -> Result<()> {
        if let Err(e) = check_database(self.db) {
            return self.send_response(None, Some(e.to_string()));
        }
        self.tree.trash_clear()?;
        let mut values = Frame::new();
        values.insert(KEY_VERSION.to_string(), json!(WIRE_VERSION));
        self.send_response(Some(values), None)
    }

    fn serve_close(&mut self) -> Result<()> {
        self.send_response(None, None)?;
        self.tree.trash_clear()
    }

    fn serve_get(&mut self, params: &[Value]) -> Result<()> {
        let meta = par_meta(params, 0)?;
        let mut stream = self.tree.file_read(&meta.filename)?;
        self.send_response(None, None)?;
        self.conn.data_send(&mut stream)
    }

    /// Run the overwrite guard for a write target and answer the peer for
    /// the short-circuit outcomes: `done` when the target already matches,
    /// the error text when it holds untracked data.
    fn guard_response(&mut self, target: &Meta) -> Result<OverwriteCheck> {
        let check = check_file_equal(target, self.db, self.tree)?;
        match &check {
            OverwriteCheck::OverwriteOk => {}
            OverwriteCheck::Equal => {
                self.send_response(None, Some(STATUS_DONE.to_string()))?;
            }
            OverwriteCheck::Untracked(filename) => {
                let message = CofferError::WouldOverwrite(filename.clone()).to_string();
                self.send_response(None, Some(message))?;
            }
        }
        Ok(check)
    }

    fn serve_set(&mut self, params: &[Value]) -> Result<()> {
        let target = par_meta(params, 0)?;
        if self.guard_response(&target)? != OverwriteCheck::OverwriteOk {
            return Ok(());
        }
        // Ack before the data starts flowing.
        self.send_response(None, None)?;
        let mut frames = self.conn.data_receive();
        self.tree.file_create(&target, &mut frames)
    }

    fn serve_del(&mut self, params: &[Value]) -> Result<()> {
        let target = par_meta(params, 0)?;
        self.tree.file_del(&target.filename, true)?;
        self.send_response(None, None)
    }

    fn serve_move(&mut self, params: &[Value]) -> Result<()> {
        let source = par_meta(params, 0)?;
        let target = par_meta(params, 1)?;
        match self.guard_response(&target)? {
            OverwriteCheck::OverwriteOk => {
                self.tree.move_file(
                    &source.filename,
                    &target.filename,
                    true,
                    Some(target.modtime),
                )?;
                self.send_response(None, None)
            }
            // Target already holds the content; drop the stale pre-move
            // name.
            OverwriteCheck::Equal => self.tree.file_del(&source.filename, true),
            OverwriteCheck::Untracked(_) => Ok(()),
        }
    }

    fn serve_copy(&mut self, params: &[Value]) -> Result<()> {
        let source = par_meta(params, 0)?;
        let target = par_meta(params, 1)?;
        match self.guard_response(&target)? {
            OverwriteCheck::OverwriteOk => {
                let mut stream = self.tree.file_read(&source.filename)?;
                self.tree.file_create(&target, &mut stream)?;
                self.send_response(None, None)
            }
            _ => Ok(()),
        }
    }

    fn serve_db_get(&mut self) -> Result<()> {
        let raw = self.db.json_dumps()?;
        let mut values = Frame::new();
        values.insert(KEY_DATABASE.to_string(), json!(raw));
        self.send_response(Some(values), None)
    }

    fn serve_db_set(&mut self, params: &[Value]) -> Result<()> {
        let raw = params
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| CofferError::Protocol("dbs without database payload".to_string()))?;
        self.db.json_loads(raw)?;
        self.db.save()?;
        self.send_response(None, None)
    }
}

fn par_meta(params: &[Value], index: usize) -> Result<Meta> {
    let value = params
        .get(index)
        .ok_or_else(|| CofferError::Protocol(format!("missing parameter {index}")))?;
    meta_unpack(value)
}
