use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use flowsim_engine::{Transport, TransportError, TransportEvent};
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_PENDING_OUTBOUND_BYTES: usize = 256 * 1024;

/// Newline-delimited JSON over a non-blocking TCP stream.
#[derive(Debug)]
pub(crate) struct TcpLineTransport {
    server_addr: String,
    stream: Option<TcpStream>,
    read_buf: Vec<u8>,
    events: VecDeque<TransportEvent>,
    outbound: OutboundQueue,
}

impl TcpLineTransport {
    pub(crate) fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            stream: None,
            read_buf: Vec::new(),
            events: VecDeque::new(),
            outbound: OutboundQueue::default(),
        }
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        self.server_addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no address for '{}'", self.server_addr),
            )
        })
    }

    fn close(&mut self, reason: String) {
        if self.stream.take().is_some() {
            self.outbound.clear();
            self.events.push_back(TransportEvent::Closed {
                reason: Some(reason),
            });
        }
    }

    fn read_available(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let mut lines = Vec::new();
        let mut closed_reason = None;
        let mut chunk = [0u8; 1024];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    closed_reason = Some("server closed the connection".to_string());
                    break;
                }
                Ok(bytes_read) => {
                    self.read_buf.extend_from_slice(&chunk[..bytes_read]);
                    drain_complete_lines(&mut self.read_buf, &mut lines);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(error = %err, "transport_read_failed");
                    closed_reason = Some(err.to_string());
                    break;
                }
            }
        }
        self.events
            .extend(lines.into_iter().map(TransportEvent::Text));
        if let Some(reason) = closed_reason {
            self.close(reason);
        }
    }

    fn flush_outbound(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        if let Err(err) = self.outbound.flush(|payload| stream.write(payload)) {
            warn!(error = %err, "transport_write_failed");
            self.close(err.to_string());
        }
    }
}

impl Transport for TcpLineTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = self.resolve()?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nonblocking(true)?;
        if let Err(err) = stream.set_nodelay(true) {
            warn!(error = %err, "transport_nodelay_failed");
        }
        info!(server = %addr, "transport_connected");
        self.stream = Some(stream);
        self.events.push_back(TransportEvent::Opened);
        Ok(())
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        if self.events.is_empty() {
            self.flush_outbound();
            self.read_available();
        }
        self.events.pop_front()
    }

    fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        if self.stream.is_none() {
            return Err(TransportError::NotConnected);
        }
        self.outbound.enqueue(text)?;
        self.flush_outbound();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct OutboundQueue {
    active: Option<(Vec<u8>, usize)>,
    queued: VecDeque<Vec<u8>>,
    queued_bytes: usize,
}

impl OutboundQueue {
    fn enqueue(&mut self, line: &str) -> io::Result<()> {
        let payload = encode_line_payload(line);
        if self.queued_bytes.saturating_add(payload.len()) > MAX_PENDING_OUTBOUND_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "outbound queue full",
            ));
        }
        self.queued_bytes += payload.len();
        self.queued.push_back(payload);
        Ok(())
    }

    fn clear(&mut self) {
        self.active = None;
        self.queued.clear();
        self.queued_bytes = 0;
    }

    fn is_empty(&self) -> bool {
        self.active.is_none() && self.queued.is_empty()
    }

    /// Writes until the sink would block. Partial writes keep their offset.
    fn flush<F>(&mut self, mut write_payload: F) -> io::Result<()>
    where
        F: FnMut(&[u8]) -> io::Result<usize>,
    {
        loop {
            let (payload, written) = match self.active.take() {
                Some(active) => active,
                None => {
                    let Some(payload) = self.queued.pop_front() else {
                        return Ok(());
                    };
                    self.queued_bytes = self.queued_bytes.saturating_sub(payload.len());
                    (payload, 0)
                }
            };

            match write_payload(&payload[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "transport_write_zero"));
                }
                Ok(bytes_written) => {
                    let written = written.saturating_add(bytes_written);
                    if written < payload.len() {
                        self.active = Some((payload, written));
                    } else {
                        debug!(bytes = payload.len(), "transport_line_sent");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.active = Some((payload, written));
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn drain_complete_lines(buffer: &mut Vec<u8>, out: &mut Vec<String>) {
    while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line_bytes = buffer.drain(..=newline_index).collect::<Vec<u8>>();
        line_bytes.pop();
        if line_bytes.last().copied() == Some(b'\r') {
            line_bytes.pop();
        }
        if line_bytes.is_empty() {
            continue;
        }

        match String::from_utf8(line_bytes) {
            Ok(line) => out.push(line),
            Err(err) => warn!(error = %err, "transport_invalid_utf8_line_dropped"),
        }
    }
}

fn encode_line_payload(line: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(line.len() + 1);
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');
    payload
}
