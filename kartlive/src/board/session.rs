//! Session controller
//!
//! A session follows one heat at a time. `start` subscribes to the heat's
//! push channel and fetches the scorecard once; afterwards every push
//! notification triggers another fetch, reconciled against the previous
//! snapshot. `stop` drops the subscription and all snapshot state.
//!
//! `SessionCore` holds the fetch/reconcile logic and is driven
//! synchronously. `Session` runs a `SessionCore` together with a `Link` on
//! a dedicated thread, and publishes the result as a `Board`.
//!
//! Note: everything that touches snapshots runs on the session thread, so
//! fetch-and-reconcile cycles never overlap.

use super::highlight::HighlightSchedule;
use super::reconcile::{self, AnnotatedRow};
use super::snapshot::{HeatError, HeatId, RacerId, Snapshot};
use crate::config::Settings;
use crate::feed::link::{self, Link, LinkStatus};
use crate::feed::scorecard::{FetchError, HttpScorecard, ScorecardSource};
use crate::feed::socket::{Connector, WsConnector};
use crate::feed::util;
use crate::timing::RaceTime;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crossbeam::channel;

pub const EVENT_QUEUE_SIZE: usize = 256;

pub struct SessionCore<S> {
    source: S,
    window: Duration,
    heat: Option<HeatId>,
    current: Option<Snapshot>,
    previous: Option<Snapshot>,
    rows: Vec<AnnotatedRow>,
    highlights: HighlightSchedule,
    updated_at: Option<SystemTime>,
}

impl<S: ScorecardSource> SessionCore<S> {
    pub fn new(source: S, window: Duration) -> SessionCore<S> {
        SessionCore {
            source,
            window,
            heat: None,
            current: None,
            previous: None,
            rows: Vec::new(),
            highlights: HighlightSchedule::new(),
            updated_at: None,
        }
    }

    /// Starts following `heat`, discarding state of any previous heat.
    pub fn begin(&mut self, heat: HeatId) {
        self.clear();
        self.heat = Some(heat);
    }

    pub fn clear(&mut self) {
        self.heat = None;
        self.current = None;
        self.previous = None;
        self.rows.clear();
        self.highlights.clear();
        self.updated_at = None;
    }

    pub fn heat(&self) -> Option<&HeatId> {
        self.heat.as_ref()
    }

    pub fn rows(&self) -> &[AnnotatedRow] {
        &self.rows
    }

    pub fn current(&self) -> Option<&Snapshot> {
        self.current.as_ref()
    }

    pub fn previous(&self) -> Option<&Snapshot> {
        self.previous.as_ref()
    }

    pub fn updated_at(&self) -> Option<SystemTime> {
        self.updated_at
    }

    /// Fetches the scorecard and reconciles it against the last one.
    ///
    /// On error nothing is modified: the rows, both snapshots and all
    /// pending highlights stay as they were. Without a heat this does
    /// nothing.
    pub fn refresh(&mut self, now: Instant) -> Result<&[AnnotatedRow], FetchError> {
        let heat = match &self.heat {
            Some(heat) => heat.clone(),
            None => return Ok(&self.rows),
        };
        let snapshot = self.source.fetch(&heat)?;
        let rows = reconcile::reconcile(&snapshot, self.current.as_ref(), now, self.window);

        // A row that did not change loses any highlight it still had.
        let present: HashSet<&RacerId> = rows.iter().map(|r| r.id()).collect();
        self.highlights.retain(|id| present.contains(id));
        for row in &rows {
            match row.highlight_expires_at {
                Some(at) => self.highlights.schedule(row.id().clone(), at),
                None => {
                    self.highlights.cancel(row.id());
                }
            }
        }

        self.previous = self.current.replace(snapshot);
        self.rows = rows;
        self.updated_at = Some(SystemTime::now());
        Ok(&self.rows)
    }

    /// Clears every highlight whose deadline has passed. Returns the number
    /// of racers affected.
    pub fn expire_highlights(&mut self, now: Instant) -> usize {
        let expired = self.highlights.expire(now);
        if expired.is_empty() {
            return 0;
        }
        let expired_set: HashSet<&RacerId> = expired.iter().collect();
        for row in self.rows.iter_mut() {
            if expired_set.contains(row.id()) {
                row.clear_highlight();
            }
        }
        expired.len()
    }

    pub fn next_highlight_deadline(&self) -> Option<Instant> {
        self.highlights.next_deadline()
    }
}

/// Race overview shown above the table.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub racers: usize,
    pub leader: Option<String>,
    pub best_lap: Option<RaceTime>,
}

/// Everything a display needs, as of the last update.
#[derive(Debug, Clone, Default)]
pub struct Board {
    pub heat: Option<HeatId>,
    pub status: LinkStatus,
    /// A reconnect is pending.
    pub reconnecting: bool,
    pub rows: Vec<AnnotatedRow>,
    pub updated_at: Option<SystemTime>,
}

impl Board {
    pub fn summary(&self) -> Summary {
        let leader = self
            .rows
            .iter()
            .find(|r| r.position() == Some(1))
            .map(|r| r.display_name());
        let best_lap = self
            .rows
            .iter()
            .filter_map(|r| r.best_lap)
            .filter(|t| t.is_reliable())
            .min_by(|a, b| a.ms.total_cmp(&b.ms));
        Summary {
            racers: self.rows.len(),
            leader,
            best_lap,
        }
    }
}

/// Status event sent by the session thread
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Status(LinkStatus),
    Started(HeatId),
    Stopped,
    Updated { rows: usize, changed: usize },
    FetchFailed(String),
    ConnectFailed(String),
    ReconnectScheduled { attempt: u32, delay: Duration },
    ReconnectGaveUp,
    MalformedData { racer: RacerId, fields: Vec<&'static str> },
    HighlightsExpired(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid heat: {0}")]
    Validation(#[from] HeatError),
    #[error("session thread has stopped")]
    Stopped,
}

enum Command {
    Start(HeatId),
    Stop,
}

struct EventQueue {
    dest: channel::Sender<SessionEvent>,
}

impl EventQueue {
    fn send(&self, event: SessionEvent) {
        // Dropped when the queue is full.
        let _ = self.dest.try_send(event);
    }
}

struct Controller<S> {
    core: SessionCore<S>,
    link: Link,
    pubsub_url: String,
    status: LinkStatus,
    reconnecting: bool,
    events: EventQueue,
    board: Arc<Mutex<Board>>,
}

impl<S: ScorecardSource> Controller<S> {
    fn publish(&self) {
        let mut board = match self.board.lock() {
            Ok(board) => board,
            Err(poisoned) => poisoned.into_inner(),
        };
        board.heat = self.core.heat().cloned();
        board.status = self.status;
        board.reconnecting = self.reconnecting;
        board.rows = self.core.rows().to_vec();
        board.updated_at = self.core.updated_at();
    }

    fn start(&mut self, heat: HeatId) {
        if self.core.heat().is_some() {
            self.link.disconnect();
        }
        tracing::debug!("starting heat {}", heat);
        self.core.begin(heat.clone());
        self.reconnecting = false;
        self.events.send(SessionEvent::Started(heat.clone()));
        self.link.connect(&util::channel_url(&self.pubsub_url, &heat));
        self.publish();
        self.refresh();
    }

    fn stop(&mut self) {
        tracing::debug!("stopping");
        self.link.disconnect();
        self.core.clear();
        self.reconnecting = false;
        self.events.send(SessionEvent::Stopped);
        self.publish();
    }

    fn refresh(&mut self) {
        if self.core.heat().is_none() {
            return;
        }
        match self.core.refresh(Instant::now()) {
            Ok(rows) => {
                let changed = rows.iter().filter(|r| r.changed).count();
                for row in rows.iter().filter(|r| !r.malformed.is_empty()) {
                    tracing::warn!("racer {}: malformed {:?}", row.id(), row.malformed);
                    self.events.send(SessionEvent::MalformedData {
                        racer: row.id().clone(),
                        fields: row.malformed.clone(),
                    });
                }
                self.events.send(SessionEvent::Updated {
                    rows: rows.len(),
                    changed,
                });
            }
            Err(e) => {
                tracing::warn!("scorecard fetch failed: {}", e);
                self.events.send(SessionEvent::FetchFailed(e.to_string()));
                return;
            }
        }
        self.publish();
    }

    fn set_status(&mut self, status: LinkStatus) {
        self.status = status;
        if status == LinkStatus::Connected {
            self.reconnecting = false;
        }
        self.events.send(SessionEvent::Status(status));
        self.publish();
    }

    /// Handles a link event. Returns true for a push notification.
    fn link_event(&mut self, event: link::Event) -> bool {
        use link::Event;
        match event {
            Event::Message(_) => return true,
            Event::Connecting(_) => self.set_status(LinkStatus::Connecting),
            Event::Connected => self.set_status(LinkStatus::Connected),
            Event::Disconnected => self.set_status(LinkStatus::Disconnected),
            Event::ConnectFailed(e) => self.events.send(SessionEvent::ConnectFailed(e)),
            Event::ReconnectScheduled { attempt, delay } => {
                self.reconnecting = true;
                self.events
                    .send(SessionEvent::ReconnectScheduled { attempt, delay });
                self.publish();
            }
            Event::ReconnectGaveUp => {
                self.reconnecting = false;
                self.events.send(SessionEvent::ReconnectGaveUp);
                self.publish();
            }
            Event::Exiting => {}
        }
        false
    }

    fn expire_highlights(&mut self) {
        let expired = self.core.expire_highlights(Instant::now());
        if expired > 0 {
            self.events.send(SessionEvent::HighlightsExpired(expired));
            self.publish();
        }
    }

    fn timeout(&self) -> Duration {
        match self.core.next_highlight_deadline() {
            Some(at) => {
                at.saturating_duration_since(Instant::now()) + Duration::from_millis(1)
            }
            None => Duration::from_secs(60),
        }
    }
}

fn run<S: ScorecardSource>(
    commands: channel::Receiver<Command>,
    link_events: channel::Receiver<link::Event>,
    mut controller: Controller<S>,
) {
    'session: loop {
        let timeout = controller.timeout();
        crossbeam::select! {
            recv(commands) -> cmd => match cmd {
                Ok(Command::Start(heat)) => controller.start(heat),
                Ok(Command::Stop) => controller.stop(),
                Err(_) => break 'session,
            },
            recv(link_events) -> event => match event {
                Ok(event) => {
                    if controller.link_event(event) {
                        // Coalesce everything already queued into one fetch.
                        for event in link_events.try_iter() {
                            controller.link_event(event);
                        }
                        controller.refresh();
                    }
                }
                Err(_) => break 'session,
            },
            default(timeout) => {},
        }
        controller.expire_highlights();
    }
    controller.link.disconnect();
}

/// Handle to a session thread. Dropping it ends the session.
pub struct Session {
    commands: channel::Sender<Command>,
    board: Arc<Mutex<Board>>,
    events: channel::Receiver<SessionEvent>,
}

impl Session {
    pub fn spawn<S, C>(settings: &Settings, source: S, connector: C) -> Session
    where
        S: ScorecardSource + Send + 'static,
        C: Connector,
    {
        let (link, link_events) = Link::new(connector, settings.reconnect_policy());
        let (command_sender, command_receiver) = channel::unbounded::<Command>();
        let (event_sender, event_receiver) = channel::bounded::<SessionEvent>(EVENT_QUEUE_SIZE);
        let board = Arc::new(Mutex::new(Board::default()));
        let controller = Controller {
            core: SessionCore::new(source, settings.highlight_window()),
            link,
            pubsub_url: settings.pubsub_url.clone(),
            status: LinkStatus::Disconnected,
            reconnecting: false,
            events: EventQueue { dest: event_sender },
            board: board.clone(),
        };
        thread::spawn(move || run(command_receiver, link_events, controller));
        Session {
            commands: command_sender,
            board,
            events: event_receiver,
        }
    }

    /// Session against the HTTP scorecard API and WebSocket push service
    /// named in `settings`.
    pub fn with_settings(settings: &Settings) -> Result<Session, FetchError> {
        let source = HttpScorecard::new(&settings.scorecard_url, settings.fetch_timeout())?;
        let connector = WsConnector {
            connect_timeout: settings.fetch_timeout(),
            ..WsConnector::default()
        };
        Ok(Session::spawn(settings, source, connector))
    }

    /// Starts following `heat`. The heat number is validated before
    /// anything touches the network.
    pub fn start(&self, heat: &str) -> Result<HeatId, SessionError> {
        let heat = HeatId::parse(heat)?;
        self.commands
            .send(Command::Start(heat.clone()))
            .map_err(|_| SessionError::Stopped)?;
        Ok(heat)
    }

    pub fn stop(&self) -> Result<(), SessionError> {
        self.commands
            .send(Command::Stop)
            .map_err(|_| SessionError::Stopped)
    }

    pub fn board(&self) -> Board {
        match self.board.lock() {
            Ok(board) => board.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn status(&self) -> LinkStatus {
        match self.board.lock() {
            Ok(board) => board.status,
            Err(poisoned) => poisoned.into_inner().status,
        }
    }

    pub fn events(&self) -> &channel::Receiver<SessionEvent> {
        &self.events
    }
}
