//! Push channel link
//!
//! A `Link` keeps one logical connection to a push channel and reconnects
//! it according to a `ReconnectPolicy` when it drops. Everything the link
//! sees is reported as an `Event` on the receiver returned by `Link::new`,
//! inbound frames included.
//!
//! Note: the link runs in a dedicated thread.

use super::link_core::LinkCore;
use super::socket::{Connector, Frame};

use std::thread;
use std::time::Duration;

use crossbeam::channel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkStatus {
    Connecting,
    Connected,
    #[default]
    Disconnected,
}

/// Status event sent by the link thread
#[derive(Debug)]
pub enum Event {
    Connecting(String),
    Connected,
    Disconnected,
    Message(Frame),
    ConnectFailed(String),
    ReconnectScheduled { attempt: u32, delay: Duration },
    ReconnectGaveUp,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Doubles the delay on every attempt, up to `max`.
    Exponential { max: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl ReconnectPolicy {
    /// Retry every 5 seconds, forever.
    pub fn continuous() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: None,
            delay: Duration::from_secs(5),
            backoff: Backoff::Fixed,
        }
    }

    /// Retry every 2 seconds, giving up after 5 attempts.
    pub fn capped() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: Some(5),
            delay: Duration::from_secs(2),
            backoff: Backoff::Fixed,
        }
    }

    /// Delay before reconnect attempt `attempt` (starting at 1), or `None`
    /// if the policy does not allow that many attempts.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt > max {
                return None;
            }
        }
        match self.backoff {
            Backoff::Fixed => Some(self.delay),
            Backoff::Exponential { max } => {
                let shift = attempt.saturating_sub(1).min(20);
                Some(std::cmp::min(self.delay.saturating_mul(1 << shift), max))
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> ReconnectPolicy {
        ReconnectPolicy::continuous()
    }
}

#[derive(Debug)]
pub(super) enum Command {
    Connect(String),
    Disconnect,
}

/// Handle to a link thread. Dropping it shuts the thread down.
pub struct Link {
    commands: channel::Sender<Command>,
}

impl Link {
    pub fn new<C: Connector>(
        connector: C,
        policy: ReconnectPolicy,
    ) -> (Link, channel::Receiver<Event>) {
        let (command_sender, command_receiver) = channel::unbounded::<Command>();
        let (event_sender, event_receiver) = channel::unbounded::<Event>();
        thread::spawn(move || {
            let mut core = LinkCore::new(connector, policy, command_receiver, event_sender);
            core.run();
        });
        (
            Link {
                commands: command_sender,
            },
            event_receiver,
        )
    }

    /// Connects to `url`, replacing any current connection or pending retry.
    pub fn connect(&self, url: &str) {
        if self.commands.send(Command::Connect(url.to_string())).is_err() {
            tracing::debug!("link thread gone, connect to {} ignored", url);
        }
    }

    /// Closes the connection and cancels any pending retry.
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }
}
