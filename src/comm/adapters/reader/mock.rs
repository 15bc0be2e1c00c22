//! Simulated block reader for offline runs and tests.
//!
//! Each block is scripted as bytes, a transport failure, or a read that never completes. Reads
//! are logged in order so tests can assert on sequencing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{BlockReader, ReadFuture, ReaderError, SessionFuture};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SimulatedBlock {
    Bytes(Vec<u8>),
    Fail(String),
    Hang,
}

#[derive(Debug)]
pub struct SimulatedReader {
    endpoint: String,
    blocks: Mutex<HashMap<u32, SimulatedBlock>>,
    connected: AtomicBool,
    connect_failures_left: AtomicUsize,
    connect_attempts: AtomicUsize,
    read_delay: Option<Duration>,
    slow_reads_left: AtomicUsize,
    slow_read_delay: Duration,
    read_log: Mutex<Vec<u32>>,
}

impl SimulatedReader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            blocks: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(false),
            connect_failures_left: AtomicUsize::new(0),
            connect_attempts: AtomicUsize::new(0),
            read_delay: None,
            slow_reads_left: AtomicUsize::new(0),
            slow_read_delay: Duration::ZERO,
            read_log: Mutex::new(Vec::new()),
        }
    }

    pub fn with_block(self, block_id: u32, bytes: Vec<u8>) -> Self {
        self.set_block(block_id, SimulatedBlock::Bytes(bytes));
        self
    }

    pub fn with_failing_block(self, block_id: u32, message: impl Into<String>) -> Self {
        self.set_block(block_id, SimulatedBlock::Fail(message.into()));
        self
    }

    pub fn with_hanging_block(self, block_id: u32) -> Self {
        self.set_block(block_id, SimulatedBlock::Hang);
        self
    }

    /// The first `count` connect attempts fail with a transport error.
    pub fn with_connect_failures(self, count: usize) -> Self {
        self.connect_failures_left.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// The first `count` reads take `delay`; later reads fall back to the regular read delay.
    pub fn with_slow_reads(mut self, count: usize, delay: Duration) -> Self {
        self.slow_reads_left.store(count, Ordering::SeqCst);
        self.slow_read_delay = delay;
        self
    }

    pub fn set_block(&self, block_id: u32, block: SimulatedBlock) {
        self.blocks.lock().insert(block_id, block);
    }

    pub fn read_log(&self) -> Vec<u32> {
        self.read_log.lock().clone()
    }

    pub fn reads_of(&self, block_id: u32) -> usize {
        self.read_log.lock().iter().filter(|id| **id == block_id).count()
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl BlockReader for SimulatedReader {
    fn endpoint(&self) -> String {
        format!("sim://{}", self.endpoint)
    }

    fn connect(&self) -> SessionFuture<'_> {
        Box::pin(async move {
            self.connect_attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .connect_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                log::debug!("[reader] endpoint={} simulated handshake failure", self.endpoint());
                return Err(ReaderError::Transport {
                    message: "simulated handshake failure".to_string(),
                });
            }
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }

    fn read(&self, block_id: u32, start_offset: u32, length: u32) -> ReadFuture<'_> {
        Box::pin(async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(ReaderError::NotConnected);
            }
            self.read_log.lock().push(block_id);

            let slow = self
                .slow_reads_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            let delay = if slow {
                Some(self.slow_read_delay)
            } else {
                self.read_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let block = self.blocks.lock().get(&block_id).cloned();
            match block {
                None => Err(ReaderError::BlockNotFound { block_id }),
                Some(SimulatedBlock::Fail(message)) => Err(ReaderError::Transport { message }),
                Some(SimulatedBlock::Hang) => std::future::pending().await,
                Some(SimulatedBlock::Bytes(bytes)) => {
                    let start = (start_offset as usize).min(bytes.len());
                    let end = start.saturating_add(length as usize).min(bytes.len());
                    Ok(bytes[start..end].to_vec())
                }
            }
        })
    }

    fn disconnect(&self) -> SessionFuture<'_> {
        Box::pin(async move {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }
}
