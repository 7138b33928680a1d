use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

pub const DEFAULT_PORT: u16 = 46100;
pub const DEFAULT_INTERVAL_MS: u64 = 250;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    pub port: u16,
    pub script: Option<String>,
    pub echo: bool,
    pub interval_ms: u64,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            script: None,
            echo: false,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// One compact JSON message.
    Send(String),
    Sleep(Duration),
}

/// Parses a feed script: one JSON message or `sleep <ms>` per line; blank
/// lines and `#` comments are skipped.
pub fn parse_script(content: &str) -> Result<Vec<ScriptStep>, String> {
    let mut steps = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line_no = index + 1;
        if let Some(raw_ms) = trimmed.strip_prefix("sleep ") {
            let ms = raw_ms.trim().parse::<u64>().map_err(|_| {
                format!("line {line_no}: invalid sleep '{raw_ms}' (expected milliseconds)")
            })?;
            steps.push(ScriptStep::Sleep(Duration::from_millis(ms)));
            continue;
        }
        let value = serde_json::from_str::<Value>(trimmed)
            .map_err(|error| format!("line {line_no}: invalid json: {error}"))?;
        if !value.is_object() {
            return Err(format!("line {line_no}: message must be a json object"));
        }
        steps.push(ScriptStep::Send(value.to_string()));
    }
    Ok(steps)
}

/// Tracks which ids were announced as activities or stages so client `{id}`
/// messages can be answered the way the workflow server would.
#[derive(Debug, Default)]
pub struct EchoBook {
    activities: HashSet<String>,
    stages: HashSet<String>,
}

impl EchoBook {
    pub fn observe_sent(&mut self, line: &str) {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return;
        };
        if let Some(id) = message_id(&value, "activity") {
            self.activities.insert(id);
        }
        if let Some(id) = message_id(&value, "stage") {
            self.stages.insert(id);
        }
    }

    /// Reply for one client line, if it names a known id. Each id is
    /// answered once.
    pub fn reply_for(&mut self, client_line: &str) -> Option<String> {
        let value = serde_json::from_str::<Value>(client_line).ok()?;
        let id = value.get("id")?.as_str()?.to_string();
        if self.activities.remove(&id) {
            return Some(json!({ "activityStarted": { "id": id } }).to_string());
        }
        if self.stages.remove(&id) {
            return Some(json!({ "stageEntered": { "id": id } }).to_string());
        }
        None
    }
}

fn message_id(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)?
        .get("id")?
        .as_str()
        .map(ToString::to_string)
}

/// Listener that serves one client at a time.
pub struct FeedServer {
    listener: TcpListener,
}

impl FeedServer {
    pub fn bind(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port)))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts one client, plays `steps`, and returns once it disconnects.
    pub fn serve_one<W: Write>(
        &self,
        steps: Vec<ScriptStep>,
        echo: bool,
        interval: Duration,
        out: &mut W,
    ) -> Result<(), String> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|error| format!("failed to accept client: {error}"))?;
        let _ = writeln!(out, "feed.client_connected peer:{peer}");
        let mut link = ClientLink::new(stream)?;
        let mut book = EchoBook::default();
        let mut steps = steps.into_iter();
        let mut next_step_at = Instant::now();
        let mut saw_handshake = false;

        loop {
            loop {
                match link.read_line()? {
                    LineRead::Line(line) => {
                        if saw_handshake {
                            let _ = writeln!(out, "client: {line}");
                        } else {
                            saw_handshake = true;
                            let _ = writeln!(out, "handshake: {line}");
                        }
                        if echo {
                            if let Some(reply) = book.reply_for(&line) {
                                link.send_line(&reply)?;
                                let _ = writeln!(out, "echo: {reply}");
                            }
                        }
                    }
                    LineRead::NoData => break,
                    LineRead::Disconnected => {
                        let _ = writeln!(out, "feed.client_disconnected");
                        return Ok(());
                    }
                }
            }

            if Instant::now() >= next_step_at {
                match steps.next() {
                    Some(ScriptStep::Send(line)) => {
                        link.send_line(&line)?;
                        book.observe_sent(&line);
                        let _ = writeln!(out, "sent: {line}");
                        next_step_at = Instant::now() + interval;
                    }
                    Some(ScriptStep::Sleep(duration)) => {
                        next_step_at = Instant::now() + duration;
                    }
                    None => next_step_at = Instant::now() + Duration::from_secs(3600),
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

pub fn serve<W: Write>(opts: &ServeOptions, out: &mut W) -> Result<(), String> {
    let steps = match &opts.script {
        Some(path) => {
            let content = fs::read_to_string(path)
                .map_err(|error| format!("failed to read script file '{path}': {error}"))?;
            parse_script(&content)?
        }
        None => Vec::new(),
    };
    let server = FeedServer::bind(opts.port)
        .map_err(|error| format!("failed to bind port {}: {error}", opts.port))?;
    let addr = server
        .local_addr()
        .map_err(|error| format!("failed to read bound address: {error}"))?;
    let _ = writeln!(out, "feed.listening {addr} steps:{}", steps.len());
    server.serve_one(
        steps,
        opts.echo,
        Duration::from_millis(opts.interval_ms),
        out,
    )
}

enum LineRead {
    Line(String),
    NoData,
    Disconnected,
}

struct ClientLink {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
    pending: String,
}

impl ClientLink {
    fn new(stream: TcpStream) -> Result<Self, String> {
        stream
            .set_read_timeout(Some(POLL_INTERVAL))
            .map_err(|error| format!("failed to set read timeout: {error}"))?;
        let reader = stream
            .try_clone()
            .map_err(|error| format!("failed to clone client stream: {error}"))?;
        Ok(Self {
            writer: stream,
            reader: BufReader::new(reader),
            pending: String::new(),
        })
    }

    /// Partial lines survive a timeout in `pending`.
    fn read_line(&mut self) -> Result<LineRead, String> {
        match self.reader.read_line(&mut self.pending) {
            Ok(0) => Ok(LineRead::Disconnected),
            Ok(_) if self.pending.ends_with('\n') => {
                let line = self.pending.trim_end_matches(['\r', '\n']).to_string();
                self.pending.clear();
                if line.is_empty() {
                    Ok(LineRead::NoData)
                } else {
                    Ok(LineRead::Line(line))
                }
            }
            Ok(_) => Ok(LineRead::NoData),
            Err(error)
                if error.kind() == io::ErrorKind::WouldBlock
                    || error.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(LineRead::NoData)
            }
            Err(error) if error.kind() == io::ErrorKind::ConnectionReset => {
                Ok(LineRead::Disconnected)
            }
            Err(error) => Err(format!("client read error: {error}")),
        }
    }

    fn send_line(&mut self, line: &str) -> Result<(), String> {
        self.writer
            .write_all(line.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush())
            .map_err(|error| format!("failed to send line: {error}"))
    }
}
