//! Terminal transport for interactive sessions

use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use turtleprog_core::console::Transport;

/// Console transport on the process's stdin and stdout
///
/// A reader thread forwards stdin bytes. The terminal stays in line mode,
/// so line endings are dropped rather than sent as keystrokes.
pub struct StdioTransport {
    rx: Receiver<u8>,
    connected: bool,
}

impl StdioTransport {
    /// Start reading stdin
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for byte in io::stdin().lock().bytes() {
                let Ok(byte) = byte else { break };
                if byte == b'\n' || byte == b'\r' {
                    continue;
                }
                if tx.send(byte).is_err() {
                    break;
                }
            }
            log::debug!("stdin closed");
        });
        Self {
            rx,
            connected: true,
        }
    }
}

impl Transport for StdioTransport {
    fn service(&mut self) {
        if let Err(e) = io::stdout().flush() {
            log::warn!("stdout flush failed: {}", e);
        }
        thread::sleep(Duration::from_millis(1));
    }

    fn read_byte(&mut self) -> Option<u8> {
        match self.rx.try_recv() {
            Ok(byte) => Some(byte),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.connected = false;
                None
            }
        }
    }

    fn write(&mut self, data: &[u8]) {
        if let Err(e) = io::stdout().write_all(data) {
            log::warn!("stdout write failed: {}", e);
        }
    }

    fn connected(&self) -> bool {
        self.connected
    }
}
