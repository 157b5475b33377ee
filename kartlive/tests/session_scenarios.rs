use kartlive::board::reconcile::{reconcile, Gap, PositionDelta, DEFAULT_HIGHLIGHT_WINDOW};
use kartlive::board::session::{SessionCore, SessionError, SessionEvent};
use kartlive::board::snapshot::{parse_snapshot, HeatId, RacerId, Snapshot};
use kartlive::config::Settings;
use kartlive::feed::link::{Event, Link, LinkStatus, ReconnectPolicy};
use kartlive::feed::scorecard::{FetchError, ScorecardSource};
use kartlive::feed::socket::{Connector, Frame, FrameResult, SocketError};
use kartlive::Session;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};

fn heat() -> HeatId {
    HeatId::parse("21").unwrap()
}

static LAP_FIVE: &str = r#"{"scorecardRows":[
    {"guestId":1,"position":1,"lapNum":5,"ambTime":60000,"firstName":"Ana","lastName":"Ruiz"},
    {"guestId":2,"position":2,"lapNum":5,"ambTime":61000,"nickname":"Bolt"}
]}"#;

static LAP_SIX: &str = r#"{"scorecardRows":[
    {"guestId":1,"position":2,"lapNum":6,"ambTime":72000,"firstName":"Ana","lastName":"Ruiz"},
    {"guestId":2,"position":1,"lapNum":6,"ambTime":70500,"nickname":"Bolt"}
]}"#;

#[test]
fn overtake_on_lap_six() {
    let previous = parse_snapshot(heat(), LAP_FIVE).unwrap();
    let current = parse_snapshot(heat(), LAP_SIX).unwrap();
    let now = Instant::now();
    let rows = reconcile(&current, Some(&previous), now, DEFAULT_HIGHLIGHT_WINDOW);

    assert_eq!(rows.len(), current.len());
    let positions: Vec<Option<u32>> = rows.iter().map(|r| r.position()).collect();
    assert_eq!(positions, vec![Some(1), Some(2)]);

    let bolt = &rows[0];
    let ana = &rows[1];
    assert_eq!(bolt.id(), &RacerId::from(2));
    assert_eq!(bolt.position_delta, PositionDelta::Improved);
    assert_eq!(ana.position_delta, PositionDelta::Dropped);
    assert!(bolt.changed && ana.changed);
    assert_eq!(bolt.gap, Gap::Leader);
    assert_eq!(ana.gap.display(), "+1.500");
    assert_eq!(ana.display_name(), "Ana Ruiz");
    assert!(ana.is_highlighted(now));
}

#[test]
fn unchanged_scorecard_sets_no_highlights() {
    let a = parse_snapshot(heat(), LAP_SIX).unwrap();
    let b = parse_snapshot(heat(), LAP_SIX).unwrap();
    let rows = reconcile(&b, Some(&a), Instant::now(), DEFAULT_HIGHLIGHT_WINDOW);
    assert!(rows.iter().all(|r| !r.changed));
    assert!(rows.iter().all(|r| r.highlight_expires_at.is_none()));
}

/// Replays canned responses, then repeats the last one.
struct Replay {
    replies: Mutex<VecDeque<Result<&'static str, u16>>>,
}

impl Replay {
    fn new(replies: Vec<Result<&'static str, u16>>) -> Replay {
        Replay {
            replies: Mutex::new(replies.into()),
        }
    }
}

impl ScorecardSource for Replay {
    fn fetch(&self, heat: &HeatId) -> Result<Snapshot, FetchError> {
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            *replies.front().unwrap()
        };
        match reply {
            Ok(body) => Ok(parse_snapshot(heat.clone(), body)?),
            Err(status) => Err(FetchError::Status(status)),
        }
    }
}

#[test]
fn stale_rows_survive_a_failed_fetch() {
    let mut core = SessionCore::new(
        Replay::new(vec![Ok(LAP_FIVE), Err(502), Ok(LAP_SIX)]),
        Duration::from_secs(3),
    );
    core.begin(heat());
    let t0 = Instant::now();
    core.refresh(t0).unwrap();
    let stale = core.rows().to_vec();

    assert!(matches!(core.refresh(t0), Err(FetchError::Status(502))));
    assert_eq!(core.rows(), stale.as_slice());
    assert!(core.previous().is_none());

    // The next success diffs against the last good snapshot.
    let rows = core.refresh(t0 + Duration::from_secs(1)).unwrap();
    assert_eq!(rows[0].position_delta, PositionDelta::Improved);
    assert_eq!(
        core.previous(),
        Some(&parse_snapshot(heat(), LAP_FIVE).unwrap())
    );
}

/// Connector whose connections are closed by dropping the stored sender.
#[derive(Clone, Default)]
struct FakeConnector {
    open: Arc<Mutex<Vec<Sender<FrameResult>>>>,
    attempts: Arc<Mutex<u32>>,
}

impl FakeConnector {
    fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }

    fn close_all(&self) {
        self.open.lock().unwrap().clear();
    }

    fn push(&self) -> bool {
        match self.open.lock().unwrap().last() {
            Some(s) => s.send(Ok(Frame(b"{}".to_vec()))).is_ok(),
            None => false,
        }
    }
}

impl Connector for FakeConnector {
    type Socket = ();

    fn open(&mut self, _url: &str, frames: Sender<FrameResult>) -> Result<(), SocketError> {
        *self.attempts.lock().unwrap() += 1;
        self.open.lock().unwrap().push(frames);
        Ok(())
    }
}

fn next_event(events: &Receiver<Event>) -> Event {
    events
        .recv_timeout(Duration::from_secs(5))
        .expect("no link event")
}

#[test]
fn disconnect_cancels_pending_reconnect() {
    let connector = FakeConnector::default();
    let policy = ReconnectPolicy {
        delay: Duration::from_millis(300),
        ..ReconnectPolicy::continuous()
    };
    let (link, events) = Link::new(connector.clone(), policy);
    link.connect("ws://test/ws?channel=race_21");
    assert!(matches!(next_event(&events), Event::Connecting(_)));
    assert!(matches!(next_event(&events), Event::Connected));

    connector.close_all();
    assert!(matches!(next_event(&events), Event::Disconnected));
    assert!(matches!(
        next_event(&events),
        Event::ReconnectScheduled { attempt: 1, .. }
    ));

    link.disconnect();
    thread::sleep(Duration::from_millis(700));
    assert_eq!(connector.attempts(), 1);
    assert!(events.try_iter().all(|e| !matches!(e, Event::Connecting(_))));

    drop(link);
    loop {
        if let Event::Exiting = next_event(&events) {
            break;
        }
    }
}

#[test]
fn reconnects_after_unexpected_close() {
    let connector = FakeConnector::default();
    let policy = ReconnectPolicy {
        delay: Duration::from_millis(50),
        ..ReconnectPolicy::capped()
    };
    let (link, events) = Link::new(connector.clone(), policy);
    link.connect("ws://test/ws");
    assert!(matches!(next_event(&events), Event::Connecting(_)));
    assert!(matches!(next_event(&events), Event::Connected));
    connector.close_all();
    let deadline = Instant::now() + Duration::from_secs(5);
    while connector.attempts() < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(connector.attempts(), 2);
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut reconnected = false;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(Event::Connected) => {
                reconnected = true;
                break;
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    assert!(reconnected);
}

fn wait_for<F: Fn(&SessionEvent) -> bool>(events: &Receiver<SessionEvent>, matches: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(e) if matches(&e) => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
    false
}

#[test]
fn session_follows_a_heat() {
    let connector = FakeConnector::default();
    let settings = Settings {
        pubsub_url: "ws://test/ws".to_string(),
        ..Settings::default()
    };
    let session = Session::spawn(
        &settings,
        Replay::new(vec![Ok(LAP_FIVE), Ok(LAP_SIX)]),
        connector.clone(),
    );

    assert!(matches!(session.start("  "), Err(SessionError::Validation(_))));
    assert_eq!(connector.attempts(), 0);

    assert_eq!(session.start("21").unwrap(), heat());
    assert!(wait_for(session.events(), |e| matches!(
        e,
        SessionEvent::Updated { rows: 2, changed: 2 }
    )));
    let board = session.board();
    assert_eq!(board.heat, Some(heat()));
    assert_eq!(board.summary().leader.as_deref(), Some("Ana Ruiz"));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !connector.push() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(wait_for(session.events(), |e| matches!(
        e,
        SessionEvent::Updated { rows: 2, changed: 2 }
    )));
    let board = session.board();
    assert_eq!(board.rows[0].id(), &RacerId::from(2));
    assert_eq!(board.rows[0].position_delta, PositionDelta::Improved);
    assert_eq!(board.status, LinkStatus::Connected);

    session.stop().unwrap();
    assert!(wait_for(session.events(), |e| matches!(
        e,
        SessionEvent::Stopped
    )));
    let board = session.board();
    assert!(board.rows.is_empty());
    assert_eq!(board.heat, None);
}

/// Counts fetches and holds the second one (the first push) until released.
struct HeldSecondFetch {
    calls: Arc<AtomicUsize>,
    entered: Sender<usize>,
    release: Receiver<()>,
}

impl ScorecardSource for HeldSecondFetch {
    fn fetch(&self, heat: &HeatId) -> Result<Snapshot, FetchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.entered.send(n);
        if n == 2 {
            let _ = self.release.recv_timeout(Duration::from_secs(5));
        }
        Ok(parse_snapshot(heat.clone(), LAP_FIVE)?)
    }
}

#[test]
fn pushes_during_a_fetch_coalesce_into_one() {
    let connector = FakeConnector::default();
    let calls = Arc::new(AtomicUsize::new(0));
    let (entered_tx, entered) = unbounded();
    let (release_tx, release_rx) = unbounded();
    let settings = Settings {
        pubsub_url: "ws://test/ws".to_string(),
        ..Settings::default()
    };
    let session = Session::spawn(
        &settings,
        HeldSecondFetch {
            calls: calls.clone(),
            entered: entered_tx,
            release: release_rx,
        },
        connector.clone(),
    );

    session.start("21").unwrap();
    assert_eq!(entered.recv_timeout(Duration::from_secs(5)), Ok(1));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !connector.push() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(entered.recv_timeout(Duration::from_secs(5)), Ok(2));

    // A burst while the fetch is held.
    for _ in 0..5 {
        assert!(connector.push());
    }
    thread::sleep(Duration::from_millis(300));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    release_tx.send(()).unwrap();
    assert_eq!(entered.recv_timeout(Duration::from_secs(5)), Ok(3));
    assert!(entered.recv_timeout(Duration::from_millis(500)).is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
