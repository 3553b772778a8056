//! In-memory transport and scheduler for driving the state machines in tests

use std::time::Duration;

use termhub_types::TransportError;

use crate::timer::{Scheduler, TimerId};
use crate::transport::{SocketId, Transport};

/// Records every call instead of touching the network
#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub opened: Vec<(SocketId, String)>,
    pub sent: Vec<(SocketId, String)>,
    pub closed: Vec<SocketId>,
    /// Make every `send` fail with `TransportError::Io`
    pub fail_sends: bool,
}

impl RecordingTransport {
    pub fn last_opened(&self) -> Option<SocketId> {
        self.opened.last().map(|(socket, _)| *socket)
    }

    /// Sockets opened and not yet closed
    pub fn live_sockets(&self) -> Vec<SocketId> {
        self.opened
            .iter()
            .map(|(socket, _)| *socket)
            .filter(|socket| !self.closed.contains(socket))
            .collect()
    }

    pub fn sent_frames(&self) -> Vec<&str> {
        self.sent.iter().map(|(_, frame)| frame.as_str()).collect()
    }
}

impl Transport for RecordingTransport {
    fn open(&mut self, socket: SocketId, url: &str) {
        self.opened.push((socket, url.to_string()));
    }

    fn send(&mut self, socket: SocketId, frame: &str) -> Result<(), TransportError> {
        if self.fail_sends {
            return Err(TransportError::Io("send refused".to_string()));
        }
        self.sent.push((socket, frame.to_string()));
        Ok(())
    }

    fn close(&mut self, socket: SocketId) {
        self.closed.push(socket);
    }
}

/// Timers that only fire when the test says so
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    pending: Vec<(TimerId, Duration)>,
    pub cancelled: Vec<TimerId>,
}

impl ManualScheduler {
    pub fn pending(&self) -> Vec<TimerId> {
        self.pending.iter().map(|(timer, _)| *timer).collect()
    }

    pub fn delay_of(&self, timer: TimerId) -> Option<Duration> {
        self.pending
            .iter()
            .find(|(id, _)| *id == timer)
            .map(|(_, delay)| *delay)
    }

    /// Remove and return the oldest pending timer
    pub fn fire_next(&mut self) -> Option<TimerId> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.remove(0).0)
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.next_id += 1;
        let timer = TimerId(self.next_id);
        self.pending.push((timer, delay));
        timer
    }

    fn cancel(&mut self, timer: TimerId) {
        self.pending.retain(|(id, _)| *id != timer);
        self.cancelled.push(timer);
    }
}
