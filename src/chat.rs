//! Chat event sources.
//!
//! Every source speaks the same line protocol: one JSON object per line,
//! `{"sender": "...", "content": "...", "room": "..."}` with `room` optional.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::BufRead;
use std::net::SocketAddr;
use std::thread;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One chat message. Consumed exactly once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub sender: String,
    pub content: String,
}

impl ChatEvent {
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            content: content.into(),
        }
    }
}

pub type EventSender = UnboundedSender<ChatEvent>;

/// Something that delivers chat events until it runs dry.
#[async_trait]
pub trait ChatSource: Send {
    /// Forwards events in arrival order. Returning ends the session.
    async fn run(&mut self, events: EventSender) -> Result<()>;

    fn name(&self) -> &'static str;
}

#[derive(Deserialize)]
struct WireMessage {
    sender: String,
    content: String,
    #[serde(default)]
    room: Option<String>,
}

/// Keeps events for one room. Untagged events always pass.
#[derive(Debug, Clone, Default)]
pub struct RoomFilter(Option<String>);

impl RoomFilter {
    pub fn new(room: Option<String>) -> Self {
        Self(room)
    }

    pub fn accepts(&self, room: Option<&str>) -> bool {
        match (&self.0, room) {
            (Some(wanted), Some(room)) => wanted == room,
            _ => true,
        }
    }
}

/// Parses one wire line. `None` for blank, malformed or filtered lines.
pub fn parse_line(line: &str, filter: &RoomFilter) -> Option<ChatEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let message: WireMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, line, "skipping malformed chat line");
            return None;
        }
    };
    if !filter.accepts(message.room.as_deref()) {
        debug!(room = ?message.room, "skipping message for another room");
        return None;
    }
    Some(ChatEvent {
        sender: message.sender,
        content: message.content,
    })
}

/// Forwards every accepted line until EOF or until nobody is listening.
async fn forward_lines<R>(reader: R, filter: &RoomFilter, events: &EventSender) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut forwarded = 0;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| PipelineError::Source(e.to_string()))?
    {
        if let Some(event) = parse_line(&line, filter) {
            if events.send(event).is_err() {
                break;
            }
            forwarded += 1;
        }
    }
    Ok(forwarded)
}

/// Reads events from an async buffered reader.
pub struct LineSource<R> {
    reader: Option<R>,
    filter: RoomFilter,
}

impl<R> LineSource<R> {
    pub fn new(reader: R, filter: RoomFilter) -> Self {
        Self {
            reader: Some(reader),
            filter,
        }
    }
}

#[async_trait]
impl<R> ChatSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn run(&mut self, events: EventSender) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        let forwarded = forward_lines(reader, &self.filter, &events).await?;
        info!(forwarded, "chat input reached end of stream");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "lines"
    }
}

/// Reads events from a blocking reader on a detached thread; stdin in
/// production.
///
/// A blocking read cannot be cancelled, so it is kept off the runtime's
/// blocking pool: the runtime can shut down while the thread still waits for
/// its next line. Once `run` is dropped the thread exits after that line.
pub struct ThreadedLineSource<R> {
    reader: Option<R>,
    filter: RoomFilter,
}

impl<R> ThreadedLineSource<R> {
    pub fn new(reader: R, filter: RoomFilter) -> Self {
        Self {
            reader: Some(reader),
            filter,
        }
    }
}

impl ThreadedLineSource<std::io::BufReader<std::io::Stdin>> {
    pub fn stdin(filter: RoomFilter) -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), filter)
    }
}

#[async_trait]
impl<R> ChatSource for ThreadedLineSource<R>
where
    R: BufRead + Send + 'static,
{
    async fn run(&mut self, events: EventSender) -> Result<()> {
        let Some(reader) = self.reader.take() else {
            return Ok(());
        };
        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("chat-input".to_string())
            .spawn(move || {
                for line in reader.lines() {
                    let failed = line.is_err();
                    if line_tx.send(line).is_err() || failed {
                        break;
                    }
                }
            })
            .map_err(|e| PipelineError::Source(format!("could not start input thread: {}", e)))?;

        let mut forwarded = 0usize;
        while let Some(line) = line_rx.recv().await {
            let line = line.map_err(|e| PipelineError::Source(e.to_string()))?;
            if let Some(event) = parse_line(&line, &self.filter) {
                if events.send(event).is_err() {
                    break;
                }
                forwarded += 1;
            }
        }
        info!(forwarded, "chat input reached end of stream");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdin"
    }
}

/// Accepts chat relays over TCP; each connection streams wire lines.
pub struct TcpChatSource {
    listener: TcpListener,
    filter: RoomFilter,
}

impl TcpChatSource {
    pub async fn bind(addr: &str, filter: RoomFilter) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| PipelineError::Config(format!("could not bind {}: {}", addr, e)))?;
        Ok(Self { listener, filter })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| PipelineError::Source(e.to_string()))
    }
}

#[async_trait]
impl ChatSource for TcpChatSource {
    /// Connection readers live in a `JoinSet` owned by this future, so
    /// dropping or aborting `run` also drops every relay and its event sender.
    async fn run(&mut self, events: EventSender) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "chat listener ready");
        let mut relays = JoinSet::new();
        loop {
            tokio::select! {
                _ = events.closed() => return Ok(()),
                Some(joined) = relays.join_next(), if !relays.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "chat relay task failed");
                    }
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        info!(%peer, "chat relay connected");
                        let events = events.clone();
                        let filter = self.filter.clone();
                        relays.spawn(async move {
                            match forward_lines(BufReader::new(socket), &filter, &events).await {
                                Ok(forwarded) => info!(%peer, forwarded, "chat relay disconnected"),
                                Err(e) => warn!(%peer, error = %e, "chat relay failed"),
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}
