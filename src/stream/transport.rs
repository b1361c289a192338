//! Outgoing transports for stream sessions.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::io::{self, BufRead, Read, Write};

use super::session::StreamSession;

/// Frames a [`ChannelSink`] holds for a slow reader before giving up on it.
pub const DEFAULT_FRAME_BUFFER: usize = 256;

/// Response headers for an event stream.
pub const STREAM_HEADERS: &[(&str, &str)] = &[
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Headers", "Cache-Control"),
];

/// Destination for encoded event frames.
///
/// A session calls `send` once per event and `close` exactly once, during teardown.
pub trait EventSink: Send {
    /// Deliver one complete frame.
    fn send(&mut self, frame: &str) -> io::Result<()>;

    /// End the stream.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn send(&mut self, frame: &str) -> io::Result<()> {
        (**self).send(frame)
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }
}

/// Sink over any byte writer (socket, response body, buffer). Flushes after every frame.
pub struct WriterSink<W> {
    writer: W,
    closed: bool,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            closed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventSink for WriterSink<W> {
    fn send(&mut self, frame: &str) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream closed"));
        }
        self.writer.write_all(frame.as_bytes())?;
        self.writer.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        self.writer.flush()
    }
}

/// Sink that hands frames to another thread.
///
/// Sending fails once the receiving side is gone or has fallen `capacity`
/// frames behind; closing disconnects the receiver.
pub struct ChannelSink {
    tx: Option<Sender<String>>,
}

impl ChannelSink {
    /// Create a sink buffering up to [`DEFAULT_FRAME_BUFFER`] frames.
    pub fn channel() -> (Self, Receiver<String>) {
        Self::with_capacity(DEFAULT_FRAME_BUFFER)
    }

    /// Create a sink and the receiver its frames arrive on.
    pub fn with_capacity(capacity: usize) -> (Self, Receiver<String>) {
        let (tx, rx) = bounded(capacity);
        (Self { tx: Some(tx) }, rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&mut self, frame: &str) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stream closed"))?;

        tx.try_send(frame.to_string()).map_err(|e| match e {
            TrySendError::Full(_) => io::Error::new(io::ErrorKind::WouldBlock, "frame buffer full"),
            TrySendError::Disconnected(_) => {
                io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped")
            }
        })
    }

    fn close(&mut self) -> io::Result<()> {
        self.tx = None;
        Ok(())
    }
}

/// Byte stream over the frames of a [`ChannelSink`].
///
/// Reads block until a frame arrives and report end of stream once the sink is
/// closed. A reader may own the session feeding it; dropping the reader then
/// aborts that session, like a client hanging up.
pub struct FrameReader {
    // Dropped first, so the session sees a hang-up rather than a failed send.
    session: Option<StreamSession>,
    rx: Receiver<String>,
    buf: Vec<u8>,
    pos: usize,
}

impl FrameReader {
    pub fn new(rx: Receiver<String>) -> Self {
        Self {
            session: None,
            rx,
            buf: Vec::new(),
            pos: 0,
        }
    }

    /// Tie the lifetime of `session` to this reader.
    pub fn with_session(mut self, session: StreamSession) -> Self {
        self.session = Some(session);
        self
    }

    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }
}

impl Read for FrameReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for FrameReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.buf.len() {
            match self.rx.recv() {
                Ok(frame) => {
                    self.buf = frame.into_bytes();
                    self.pos = 0;
                }
                // Sink closed: end of stream.
                Err(_) => {
                    self.buf.clear();
                    self.pos = 0;
                }
            }
        }
        Ok(&self.buf[self.pos..])
    }

    fn consume(&mut self, amt: usize) {
        self.pos = (self.pos + amt).min(self.buf.len());
    }
}
