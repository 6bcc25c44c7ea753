//! Duplex byte channels under the wire protocol.
//!
//! A [`Transport`] is a pair of independent byte streams. Three
//! implementations: the stdio of a spawned child process (the ssh client
//! side), this process's own stdio (the server side), and in-memory queue
//! pipes for tests.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{Receiver, Sender, channel};

use crate::config::DATA_BLOCK_SIZE;
use crate::error::{CofferError, Result};

/// One end of a duplex byte channel.
pub trait Transport {
    /// Send bytes to the peer.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive the next available chunk. An empty chunk means the peer
    /// closed the channel.
    fn recv(&mut self) -> Result<Vec<u8>>;

    /// Release the channel after a clean protocol shutdown.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Transport over a spawned child process's stdin/stdout.
///
/// stderr is inherited so diagnostics from the remote end reach the user's
/// terminal directly.
pub struct ChildTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

impl ChildTransport {
    /// Spawn `command args...` and attach to its stdio.
    pub fn spawn(command: &str, args: &[&str]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| CofferError::io(command, e))?;
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CofferError::Protocol("child has no stdout".to_string()))?;
        Ok(Self {
            child,
            stdin,
            stdout,
        })
    }
}

impl Transport for ChildTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(CofferError::ConnectionClosed)?;
        stdin
            .write_all(data)
            .and_then(|()| stdin.flush())
            .map_err(|_| CofferError::ConnectionClosed)
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let mut block = vec![0u8; DATA_BLOCK_SIZE];
        let n = self
            .stdout
            .read(&mut block)
            .map_err(|_| CofferError::ConnectionClosed)?;
        block.truncate(n);
        Ok(block)
    }

    fn close(&mut self) -> Result<()> {
        // Dropping stdin signals EOF; the server exits after its close ack.
        self.stdin = None;
        self.child
            .wait()
            .map_err(|e| CofferError::io("<child>", e))?;
        Ok(())
    }
}

impl Drop for ChildTransport {
    fn drop(&mut self) {
        // Unfinished child, e.g. after an error unwind.
        if matches!(self.child.try_wait(), Ok(None)) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Transport over this process's own stdin/stdout (`_server_mode`).
pub struct StdioTransport;

impl Transport for StdioTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(data)
            .and_then(|()| stdout.flush())
            .map_err(|_| CofferError::ConnectionClosed)
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let mut block = vec![0u8; DATA_BLOCK_SIZE];
        let n = std::io::stdin()
            .lock()
            .read(&mut block)
            .map_err(|_| CofferError::ConnectionClosed)?;
        block.truncate(n);
        Ok(block)
    }
}

/// In-memory end of a [`pipe_pair`].
pub struct PipeTransport {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

/// Build two connected in-memory transports, one per peer. Dropping one end
/// closes the channel for the other.
pub fn pipe_pair() -> (PipeTransport, PipeTransport) {
    let (tx_a, rx_b) = channel();
    let (tx_b, rx_a) = channel();
    (
        PipeTransport { tx: tx_a, rx: rx_a },
        PipeTransport { tx: tx_b, rx: rx_b },
    )
}

impl Transport for PipeTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.tx
            .send(data.to_vec())
            .map_err(|_| CofferError::ConnectionClosed)
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        // Disconnected sender reads as peer-closed.
        Ok(self.rx.recv().unwrap_or_default())
    }
}
