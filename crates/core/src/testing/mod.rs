//! Shared test doubles for the trait seams.
//!
//! Mock implementations of the event sink, genre provider, release
//! classifier and network transport, so reconciliation and session logic can
//! be exercised without sockets, subprocesses or provider accounts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::broadcast::{CanonicalEvent, EventSink, OutboundLine};
use crate::config::NetworkConfig;
use crate::enricher::{EnrichError, GenreQuery, GenreSource};
use crate::relparse::{ParsedRelease, ReleaseClassifier, RelparseError};
use crate::session::{Connection, IncomingLine, LineHandler, Transport, TransportError};

/// Event sink that records every published event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CanonicalEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CanonicalEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, event: CanonicalEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Genre provider with a fixed answer and a call counter.
pub struct MockGenreSource {
    genres: Option<Vec<String>>,
    fail: bool,
    calls: AtomicUsize,
}

impl MockGenreSource {
    /// Always answers with these genres.
    pub fn with_genres(genres: Vec<String>) -> Self {
        Self {
            genres: Some(genres),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers "no confident match".
    pub fn empty() -> Self {
        Self {
            genres: None,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always errors.
    pub fn failing() -> Self {
        Self {
            genres: None,
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenreSource for MockGenreSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn genres(&self, _query: &GenreQuery) -> Result<Option<Vec<String>>, EnrichError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EnrichError::Parse("mock provider failure".to_string()));
        }
        Ok(self.genres.clone())
    }

    fn request_counts(&self) -> (usize, usize) {
        let calls = self.calls();
        (calls, calls)
    }
}

/// Release classifier with a canned result and a call counter.
pub struct MockReleaseClassifier {
    result: Option<ParsedRelease>,
    calls: AtomicUsize,
}

impl MockReleaseClassifier {
    /// Always classifies successfully with this result.
    pub fn returning(parsed: ParsedRelease) -> Self {
        Self {
            result: Some(parsed),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails, as a crashed classifier command would.
    pub fn failing() -> Self {
        Self {
            result: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReleaseClassifier for MockReleaseClassifier {
    async fn classify(
        &self,
        _release: &str,
        _section: &str,
    ) -> Result<ParsedRelease, RelparseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.result {
            Some(parsed) => Ok(parsed.clone()),
            None => Err(RelparseError::NonZeroExit {
                status: "exit status: 1".to_string(),
                stderr: "mock classifier failure".to_string(),
            }),
        }
    }
}

enum Script {
    /// Deliver these lines, then close the connection.
    Lines(VecDeque<IncomingLine>),
    /// Deliver nothing and stay connected until the session is dropped.
    Open,
}

/// Transport serving pre-scripted connections in push order. Once the
/// scripts run out, every further connect fails.
pub struct MockTransport {
    scripts: Mutex<VecDeque<Script>>,
    connects: AtomicUsize,
    sent: Arc<Mutex<Vec<OutboundLine>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            connects: AtomicUsize::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push_session(&self, lines: Vec<IncomingLine>) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Lines(lines.into()));
    }

    pub fn push_open_session(&self) {
        self.scripts.lock().unwrap().push_back(Script::Open);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Every line sent through any scripted connection.
    pub fn sent(&self) -> Vec<OutboundLine> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        _network: &NetworkConfig,
    ) -> Result<Box<dyn Connection>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Lines(lines)) => Ok(Box::new(ScriptedConnection {
                lines,
                hold_open: false,
                sent: Arc::clone(&self.sent),
            })),
            Some(Script::Open) => Ok(Box::new(ScriptedConnection {
                lines: VecDeque::new(),
                hold_open: true,
                sent: Arc::clone(&self.sent),
            })),
            None => Err(TransportError::Connect(
                "no scripted session left".to_string(),
            )),
        }
    }
}

struct ScriptedConnection {
    lines: VecDeque<IncomingLine>,
    hold_open: bool,
    sent: Arc<Mutex<Vec<OutboundLine>>>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn next_line(&mut self) -> Result<Option<IncomingLine>, TransportError> {
        if let Some(line) = self.lines.pop_front() {
            return Ok(Some(line));
        }
        if self.hold_open {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    async fn send_line(&mut self, channel: &str, text: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(OutboundLine {
            channel: channel.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Line handler that records what it is given.
#[derive(Default)]
pub struct RecordingHandler {
    lines: Mutex<Vec<(String, IncomingLine)>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(String, IncomingLine)> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl LineHandler for RecordingHandler {
    async fn handle(&self, network: &str, line: IncomingLine) {
        self.lines
            .lock()
            .unwrap()
            .push((network.to_string(), line));
    }
}
