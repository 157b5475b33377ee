use super::link::{Command, Event, LinkStatus, ReconnectPolicy};
use super::socket::{self, Connector, FrameResult};

use std::time::{Duration, Instant};

use crossbeam::channel;

struct StatusQueue {
    dest: channel::Sender<Event>,
}

impl StatusQueue {
    fn send(&self, event: Event) {
        // The receiver going away is not an error for the link itself.
        let _ = self.dest.send(event);
    }
}

struct ActiveSocket<S> {
    _socket: S,
    frames: channel::Receiver<FrameResult>,
}

/// Connection state machine, owned by the link thread.
pub(super) struct LinkCore<C: Connector> {
    connector: C,
    policy: ReconnectPolicy,
    commands: channel::Receiver<Command>,
    status_queue: StatusQueue,

    /// Url to stay connected to. `None` after an explicit disconnect, or
    /// once the reconnect policy gave up.
    target: Option<String>,
    socket: Option<ActiveSocket<C::Socket>>,
    status: LinkStatus,

    /// The single pending reconnect, if any.
    reconnect_at: Option<Instant>,
    /// Reconnect attempts since the last successful open.
    attempts: u32,
}

impl<C: Connector> LinkCore<C> {
    pub fn new(
        connector: C,
        policy: ReconnectPolicy,
        commands: channel::Receiver<Command>,
        status_queue: channel::Sender<Event>,
    ) -> LinkCore<C> {
        LinkCore {
            connector,
            policy,
            commands,
            status_queue: StatusQueue { dest: status_queue },
            target: None,
            socket: None,
            status: LinkStatus::Disconnected,
            reconnect_at: None,
            attempts: 0,
        }
    }

    fn connect(&mut self, url: String, now: Instant) {
        self.reconnect_at = None;
        drop(self.socket.take());
        self.target = Some(url);
        self.attempts = 0;
        self.open(now);
    }

    fn open(&mut self, now: Instant) {
        let url = match &self.target {
            Some(url) => url.clone(),
            None => return,
        };
        self.status = LinkStatus::Connecting;
        self.status_queue.send(Event::Connecting(url.clone()));

        let (frame_sender, frames) = socket::frame_channel();
        match self.connector.open(&url, frame_sender) {
            Ok(s) => {
                tracing::debug!("connected to {}", url);
                self.socket = Some(ActiveSocket { _socket: s, frames });
                self.status = LinkStatus::Connected;
                self.reconnect_at = None;
                self.attempts = 0;
                self.status_queue.send(Event::Connected);
            }
            Err(e) => {
                tracing::warn!("failed to connect to {}: {}", url, e);
                self.status_queue.send(Event::ConnectFailed(e.to_string()));
                self.socket_closed(now);
            }
        }
    }

    fn disconnect(&mut self) {
        self.target = None;
        self.reconnect_at = None;
        self.attempts = 0;
        drop(self.socket.take());
        if self.status != LinkStatus::Disconnected {
            self.status = LinkStatus::Disconnected;
            self.status_queue.send(Event::Disconnected);
        }
    }

    /// Handles the loss of the socket, or a failed open.
    fn socket_closed(&mut self, now: Instant) {
        drop(self.socket.take());
        if self.status != LinkStatus::Disconnected {
            self.status = LinkStatus::Disconnected;
            self.status_queue.send(Event::Disconnected);
        }
        if self.target.is_none() || self.reconnect_at.is_some() {
            return;
        }
        let attempt = self.attempts + 1;
        match self.policy.delay_for(attempt) {
            Some(delay) => {
                tracing::debug!("reconnect attempt {} in {:?}", attempt, delay);
                self.reconnect_at = Some(now + delay);
                self.status_queue
                    .send(Event::ReconnectScheduled { attempt, delay });
            }
            None => {
                tracing::warn!("giving up after {} reconnect attempts", self.attempts);
                self.target = None;
                self.status_queue.send(Event::ReconnectGaveUp);
            }
        }
    }

    fn service_reconnect(&mut self, now: Instant) {
        if let Some(at) = self.reconnect_at {
            if now >= at {
                self.reconnect_at = None;
                self.attempts += 1;
                self.open(now);
            }
        }
    }

    fn service_socket(&mut self, now: Instant) {
        use channel::TryRecvError;

        let mut closed = false;
        if let Some(active) = &self.socket {
            loop {
                match active.frames.try_recv() {
                    Ok(Ok(frame)) => self.status_queue.send(Event::Message(frame)),
                    Ok(Err(e)) => {
                        tracing::debug!("socket error: {}", e);
                        closed = true;
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
        }
        if closed {
            self.socket_closed(now);
        }
    }

    fn handle(&mut self, command: Command, now: Instant) {
        match command {
            Command::Connect(url) => self.connect(url, now),
            Command::Disconnect => self.disconnect(),
        }
    }

    fn next_timeout(&self, now: Instant) -> Duration {
        match self.reconnect_at {
            Some(at) => at.saturating_duration_since(now) + Duration::from_millis(1),
            None => Duration::from_secs(60),
        }
    }

    pub fn run(&mut self) {
        use channel::TryRecvError;

        loop {
            self.service_reconnect(Instant::now());
            let timeout = self.next_timeout(Instant::now());

            let index = {
                let mut sel = channel::Select::new();
                sel.recv(&self.commands);
                if let Some(active) = &self.socket {
                    sel.recv(&active.frames);
                }
                match sel.ready_timeout(timeout) {
                    Ok(index) => index,
                    Err(channel::ReadyTimeoutError) => continue,
                }
            };

            if index == 0 {
                match self.commands.try_recv() {
                    Ok(command) => self.handle(command, Instant::now()),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => {
                        self.disconnect();
                        self.status_queue.send(Event::Exiting);
                        break;
                    }
                }
            } else {
                self.service_socket(Instant::now());
            }
        }
    }
}
