//! Ways for a client to open an event stream.

use crate::context::ServerContext;
use crate::types::Timestamp;
use std::fmt;
use std::io::{self, BufRead};
use std::sync::Arc;

/// A connected event stream.
pub type EventStream = Box<dyn BufRead + Send>;

/// Closes a stream from another thread, ending a blocked read.
pub type CancelHandle = Arc<dyn Fn() + Send + Sync>;

/// An open stream plus, when the transport supports it, a way to hang it up.
pub struct Connection {
    stream: EventStream,
    cancel: Option<CancelHandle>,
}

impl Connection {
    pub fn new(stream: EventStream) -> Self {
        Self {
            stream,
            cancel: None,
        }
    }

    /// Attach a hook that makes pending reads on the stream return end of stream.
    pub fn with_cancel<F>(mut self, cancel: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cancel = Some(Arc::new(cancel));
        self
    }

    pub(crate) fn into_parts(self) -> (EventStream, Option<CancelHandle>) {
        (self.stream, self.cancel)
    }
}

impl From<EventStream> for Connection {
    fn from(stream: EventStream) -> Self {
        Self::new(stream)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

/// Opens a fresh event stream.
///
/// `resume_hint` is the `lastUpdated` of the most recent document the client
/// received, if any. Without a cancel hook, stopping the client waits for the
/// stream to deliver its next event.
pub trait Connector: Send + 'static {
    fn connect(&mut self, resume_hint: Option<Timestamp>) -> io::Result<Connection>;
}

impl<F> Connector for F
where
    F: FnMut(Option<Timestamp>) -> io::Result<EventStream> + Send + 'static,
{
    fn connect(&mut self, resume_hint: Option<Timestamp>) -> io::Result<Connection> {
        self(resume_hint).map(Connection::new)
    }
}

/// Connects straight to a [`ServerContext`] in the same process.
#[derive(Clone)]
pub struct LocalConnector {
    context: Arc<ServerContext>,
}

impl LocalConnector {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }
}

impl Connector for LocalConnector {
    fn connect(&mut self, resume_hint: Option<Timestamp>) -> io::Result<Connection> {
        let reader = self
            .context
            .connect(resume_hint)
            .map_err(|e| io::Error::new(io::ErrorKind::ConnectionRefused, e))?;

        let abort = reader.session().map(|session| session.abort_handle());
        let connection = Connection::new(Box::new(reader));
        Ok(match abort {
            Some(abort) => connection.with_cancel(move || {
                abort.abort();
            }),
            None => connection,
        })
    }
}
