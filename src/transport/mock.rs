//! Mock transport for testing

use super::Transport;
use crate::error::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock transport with scripted replies, keyed by opcode.
///
/// Clones share state, so a test can hold one handle for inspection while
/// the session owns another.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    replies: HashMap<u8, Vec<u8>>,
    sent: Vec<Vec<u8>>,
    pending: Option<u8>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the reply returned for an opcode, padded to the 8-byte packet.
    pub fn set_reply(&self, opcode: u8, reply: &[u8]) {
        let mut padded = reply.to_vec();
        padded.resize(8, 0);
        self.inner.lock().unwrap().replies.insert(opcode, padded);
    }

    /// Remove the scripted reply for an opcode, simulating a dead command.
    pub fn clear_reply(&self, opcode: u8) {
        self.inner.lock().unwrap().replies.remove(&opcode);
    }

    /// Frames delivered via `send_report`, in order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// First opcode byte of every frame sent, in order.
    pub fn sent_opcodes(&self) -> Vec<u8> {
        self.inner
            .lock()
            .unwrap()
            .sent
            .iter()
            .filter_map(|frame| frame.get(1).copied())
            .collect()
    }
}

impl Transport for MockTransport {
    fn send_report(&mut self, _report_id: u16, msg: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.pending = msg.get(1).copied();
        inner.sent.push(msg.to_vec());
        Ok(())
    }

    fn read_interrupt(&mut self, buf: &mut [u8]) -> Result<usize> {
        let inner = self.inner.lock().unwrap();
        let Some(opcode) = inner.pending else {
            return Ok(0);
        };
        match inner.replies.get(&opcode) {
            Some(reply) => {
                let n = reply.len().min(buf.len());
                buf[..n].copy_from_slice(&reply[..n]);
                Ok(n)
            }
            None => Ok(0),
        }
    }
}
