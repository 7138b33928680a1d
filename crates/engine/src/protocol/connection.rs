use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::messages::{decode_inbound, Handshake, InboundMessage, OutboundMessage};
use crate::registry::EntityId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Text(String),
    Closed { reason: Option<String> },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport i/o failed: {0}")]
    Io(#[from] io::Error),
    #[error("transport is not connected")]
    NotConnected,
}

/// Duplex text channel to the workflow server. Implementations never block:
/// `poll_event` returns `None` when nothing is pending.
pub trait Transport {
    fn connect(&mut self) -> Result<(), TransportError>;
    fn poll_event(&mut self) -> Option<TransportEvent>;
    fn send_text(&mut self, text: &str) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub received: u64,
    pub dropped_inbound: u64,
    pub sent: u64,
    pub dropped_outbound: u64,
}

/// Connection lifecycle around a [`Transport`]. There is no reconnect: once
/// closed the session keeps its last state.
pub struct Connection {
    transport: Box<dyn Transport>,
    state: ConnectionState,
    handshake: Handshake,
    stats: ConnectionStats,
}

impl Connection {
    pub fn new(transport: Box<dyn Transport>, handshake: Handshake) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            handshake,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.state != ConnectionState::Disconnected {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        if let Err(err) = self.transport.connect() {
            warn!(error = %err, "connection_failed");
            self.state = ConnectionState::Closed;
            return Err(err);
        }
        Ok(())
    }

    /// Drains every pending transport event, appending decoded messages.
    pub fn poll(&mut self, inbound: &mut Vec<InboundMessage>) {
        while let Some(event) = self.transport.poll_event() {
            match event {
                TransportEvent::Opened => self.on_open(),
                TransportEvent::Text(_) if self.state == ConnectionState::Closed => {
                    self.stats.dropped_inbound = self.stats.dropped_inbound.saturating_add(1);
                }
                TransportEvent::Text(text) => {
                    self.stats.received = self.stats.received.saturating_add(1);
                    match decode_inbound(&text) {
                        Some(message) => inbound.push(message),
                        None => {
                            self.stats.dropped_inbound = self.stats.dropped_inbound.saturating_add(1);
                        }
                    }
                }
                TransportEvent::Closed { reason } => {
                    if self.state != ConnectionState::Closed {
                        warn!(reason = reason.as_deref().unwrap_or("none"), "connection_closed");
                    }
                    self.state = ConnectionState::Closed;
                }
            }
        }
    }

    fn on_open(&mut self) {
        if self.state == ConnectionState::Open {
            return;
        }
        self.state = ConnectionState::Open;
        match serde_json::to_string(&self.handshake) {
            Ok(text) => match self.transport.send_text(&text) {
                Ok(()) => info!(
                    timeout_ms = self.handshake.timeout,
                    included = ?self.handshake.included,
                    workflow_names = ?self.handshake.workflow_names,
                    "handshake_sent"
                ),
                Err(err) => warn!(error = %err, "handshake_send_failed"),
            },
            Err(err) => warn!(error = %err, "handshake_encode_failed"),
        }
    }

    /// Fire-and-forget. Nothing is queued while the connection is not open
    /// and failed sends are not retried.
    pub fn send(&mut self, message: &OutboundMessage) {
        if self.state != ConnectionState::Open {
            self.stats.dropped_outbound = self.stats.dropped_outbound.saturating_add(1);
            debug!(state = self.state.as_str(), "outbound_dropped_not_open");
            return;
        }
        let text = match message.to_text() {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "outbound_encode_failed");
                return;
            }
        };
        match self.transport.send_text(&text) {
            Ok(()) => self.stats.sent = self.stats.sent.saturating_add(1),
            Err(err) => {
                self.stats.dropped_outbound = self.stats.dropped_outbound.saturating_add(1);
                warn!(error = %err, "outbound_send_failed");
            }
        }
    }

    pub fn send_id(&mut self, id: EntityId) {
        self.send(&OutboundMessage::consumed(id));
    }
}

/// Messages produced during a tick, flushed to the connection at its end.
#[derive(Debug, Default)]
pub struct Outbox {
    pending: VecDeque<OutboundMessage>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_id(&mut self, id: EntityId) {
        self.pending.push_back(OutboundMessage::consumed(id));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = OutboundMessage> + '_ {
        self.pending.drain(..)
    }

    pub fn flush_into(&mut self, connection: &mut Connection) -> usize {
        let mut flushed = 0;
        while let Some(message) = self.pending.pop_front() {
            connection.send(&message);
            flushed += 1;
        }
        flushed
    }
}

#[derive(Debug, Default)]
struct LoopbackState {
    connect_calls: u32,
    incoming: VecDeque<TransportEvent>,
    sent: Vec<String>,
    fail_sends: bool,
}

/// In-process transport. The paired [`LoopbackHandle`] plays the server.
#[derive(Debug)]
pub struct LoopbackTransport {
    state: Rc<RefCell<LoopbackState>>,
}

#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    state: Rc<RefCell<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn pair() -> (LoopbackTransport, LoopbackHandle) {
        let state = Rc::new(RefCell::new(LoopbackState::default()));
        (
            LoopbackTransport {
                state: Rc::clone(&state),
            },
            LoopbackHandle { state },
        )
    }
}

impl Transport for LoopbackTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.state.borrow_mut().connect_calls += 1;
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.state.borrow_mut().incoming.pop_front()
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if state.fail_sends {
            return Err(TransportError::NotConnected);
        }
        state.sent.push(text.to_string());
        Ok(())
    }
}

impl LoopbackHandle {
    pub fn open(&self) {
        self.push(TransportEvent::Opened);
    }

    pub fn close(&self) {
        self.push(TransportEvent::Closed { reason: None });
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(TransportEvent::Text(text.into()));
    }

    pub fn push_json(&self, value: &serde_json::Value) {
        self.push_text(value.to_string());
    }

    pub fn push(&self, event: TransportEvent) {
        self.state.borrow_mut().incoming.push_back(event);
    }

    pub fn connect_calls(&self) -> u32 {
        self.state.borrow().connect_calls
    }

    pub fn sent(&self) -> Vec<String> {
        self.state.borrow().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.borrow_mut().fail_sends = fail;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn connection() -> (Connection, LoopbackHandle) {
        let (transport, handle) = LoopbackTransport::pair();
        let handshake = Handshake::new(Some(0.0), None, Some("Policy".to_string()));
        (Connection::new(Box::new(transport), handshake), handle)
    }

    #[test]
    fn handshake_is_sent_once_on_open() {
        let (mut connection, server) = connection();
        connection.connect().expect("connect");
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert_eq!(server.connect_calls(), 1);

        server.open();
        server.open();
        let mut inbound = Vec::new();
        connection.poll(&mut inbound);

        assert_eq!(connection.state(), ConnectionState::Open);
        let sent = server.sent();
        assert_eq!(sent.len(), 1);
        let handshake: Value = serde_json::from_str(&sent[0]).expect("json");
        assert_eq!(handshake, json!({ "timeout": 20000, "workflowNames": "Policy" }));
    }

    #[test]
    fn sends_before_open_are_dropped() {
        let (mut connection, server) = connection();
        connection.send_id(EntityId::from("a1"));
        assert!(server.sent().is_empty());
        assert_eq!(connection.stats().dropped_outbound, 1);
    }

    #[test]
    fn close_freezes_connection() {
        let (mut connection, server) = connection();
        connection.connect().expect("connect");
        server.open();
        server.close();
        server.push_text(r#"{"activityStarted":{"id":"late"}}"#);

        let mut inbound = Vec::new();
        connection.poll(&mut inbound);
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(inbound.is_empty());
        server.take_sent();

        connection.send_id(EntityId::from("a1"));
        assert!(server.sent().is_empty());
        // Closed is terminal; connect does not reopen.
        connection.connect().expect("noop");
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn undecodable_frames_are_counted_and_skipped() {
        let (mut connection, server) = connection();
        connection.connect().expect("connect");
        server.open();
        server.push_text("garbage{");
        server.push_text(r#"{"stageEntered":{"id":"s1"}}"#);

        let mut inbound = Vec::new();
        connection.poll(&mut inbound);
        assert_eq!(inbound.len(), 1);
        assert_eq!(connection.stats().received, 2);
        assert_eq!(connection.stats().dropped_inbound, 1);
    }

    #[test]
    fn failed_send_is_not_retried() {
        let (mut connection, server) = connection();
        connection.connect().expect("connect");
        server.open();
        let mut inbound = Vec::new();
        connection.poll(&mut inbound);
        server.take_sent();

        server.fail_sends(true);
        let mut outbox = Outbox::new();
        outbox.send_id(EntityId::from("a1"));
        assert_eq!(outbox.flush_into(&mut connection), 1);
        assert!(outbox.is_empty());

        server.fail_sends(false);
        outbox.flush_into(&mut connection);
        assert!(server.sent().is_empty());
        assert_eq!(connection.stats().dropped_outbound, 1);
    }
}
