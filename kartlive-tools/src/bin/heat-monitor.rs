// heat-monitor
//
// Live leaderboard for one heat.
//
// Build: cargo run --release --bin heat-monitor -- [options] [heat_number]
// Keys:  type a heat number, Enter to connect / disconnect
//        Ctrl-D toggles the event log
// Quit:  q / Esc / Ctrl-C

use chrono::{DateTime, Local};
use crossbeam::channel;
use crossterm::style::{Attribute, Color, ResetColor, SetAttribute, SetForegroundColor};
use crossterm::{cursor, event, style, terminal, ExecutableCommand, QueueableCommand};
use kartlive::board::{Board, PositionDelta, SessionEvent};
use kartlive::feed::LinkStatus;
use kartlive::Session;
use kartlive_tools::{
    feed_opts, feed_parseopts, format_cells, row_cells, status_text, summary_text, table_header,
};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::{Duration, Instant, SystemTime};

#[derive(Debug)]
struct Cli {
    fps: u64,
    event_log_size: usize,
    event_log_shown: usize,
    show_log: bool,
    quiet: bool,
}

fn print_help_and_exit(opts: &getopts::Options, program: &str, code: i32) -> ! {
    let brief = format!(
        "Usage: {program} [options] [heat_number]\n\n\
         Live leaderboard for a go-kart heat."
    );
    let usage = opts.usage(&brief);
    eprintln!("{usage}");
    std::process::exit(code)
}

fn parse_cli() -> (kartlive::Settings, Option<String>, Cli) {
    let mut opts = feed_opts();
    opts.optflag("h", "help", "Show help");
    opts.optopt("", "fps", "UI refresh rate (default 10)", "n");
    opts.optopt(
        "",
        "event-log-size",
        "Events kept in the log (default 50)",
        "n",
    );
    opts.optopt(
        "",
        "event-log-shown",
        "Events shown in the log panel (default 8)",
        "n",
    );
    opts.optflag("l", "log", "Start with the event log open");
    opts.optflag("", "quiet", "Suppress footer hint");

    let args: Vec<String> = std::env::args().collect();
    let program = args
        .first()
        .cloned()
        .unwrap_or_else(|| "heat-monitor".into());
    let (matches, settings, heat) = match feed_parseopts(&opts, &args[1.min(args.len())..]) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            print_help_and_exit(&opts, &program, 2);
        }
    };
    if matches.opt_present("help") {
        print_help_and_exit(&opts, &program, 0);
    }

    let fps = matches
        .opt_str("fps")
        .as_deref()
        .unwrap_or("10")
        .parse()
        .unwrap_or(10);
    let event_log_size = matches
        .opt_str("event-log-size")
        .as_deref()
        .unwrap_or("50")
        .parse()
        .unwrap_or(50);
    let event_log_shown = matches
        .opt_str("event-log-shown")
        .as_deref()
        .unwrap_or("8")
        .parse()
        .unwrap_or(8);

    (
        settings,
        heat,
        Cli {
            fps,
            event_log_size,
            event_log_shown,
            show_log: matches.opt_present("log"),
            quiet: matches.opt_present("quiet"),
        },
    )
}

#[derive(Clone)]
struct LoggedEvent {
    timestamp: SystemTime,
    event: String,
    color: Color,
}

fn format_event(event: &SessionEvent) -> Option<(String, Color)> {
    Some(match event {
        SessionEvent::Status(LinkStatus::Connected) => ("CONNECTED".to_string(), Color::Green),
        SessionEvent::Status(LinkStatus::Connecting) => ("CONNECTING".to_string(), Color::Green),
        SessionEvent::Status(LinkStatus::Disconnected) => {
            ("DISCONNECTED".to_string(), Color::Yellow)
        }
        SessionEvent::Started(heat) => (format!("FOLLOWING HEAT #{}", heat), Color::Green),
        SessionEvent::Stopped => ("STOPPED".to_string(), Color::Yellow),
        SessionEvent::Updated { rows, changed } => (
            format!("SCORECARD: {} racers, {} changed", rows, changed),
            Color::White,
        ),
        SessionEvent::FetchFailed(e) => (format!("FETCH FAILED: {}", e), Color::Red),
        SessionEvent::ConnectFailed(e) => (format!("CONNECT FAILED: {}", e), Color::Red),
        SessionEvent::ReconnectScheduled { attempt, delay } => (
            format!("RECONNECT #{} in {:.1}s", attempt, delay.as_secs_f64()),
            Color::Yellow,
        ),
        SessionEvent::ReconnectGaveUp => ("GAVE UP RECONNECTING".to_string(), Color::Red),
        SessionEvent::MalformedData { racer, fields } => (
            format!("[{}] UNREADABLE: {}", racer, fields.join(", ")),
            Color::Yellow,
        ),
        SessionEvent::HighlightsExpired(_) => return None,
    })
}

fn status_color(board: &Board) -> Color {
    match board.status {
        LinkStatus::Connected => Color::Green,
        LinkStatus::Connecting => Color::Yellow,
        LinkStatus::Disconnected if board.reconnecting => Color::Yellow,
        LinkStatus::Disconnected => Color::Red,
    }
}

fn row_color(row: &kartlive::board::AnnotatedRow, now: Instant) -> Color {
    if row.is_highlighted(now) {
        return match row.position_delta {
            PositionDelta::Improved => Color::Green,
            PositionDelta::Dropped => Color::Red,
            PositionDelta::Unchanged => Color::Cyan,
        };
    }
    match row.position() {
        Some(1) => Color::Yellow,
        Some(2) => Color::Grey,
        Some(3) => Color::DarkYellow,
        _ => Color::White,
    }
}

struct Tui {
    stdout: io::Stdout,
}

impl Tui {
    fn setup() -> io::Result<Self> {
        let mut stdout = io::stdout();
        terminal::enable_raw_mode()?;
        stdout.execute(terminal::EnterAlternateScreen)?;
        stdout.execute(cursor::Hide)?;
        Ok(Self { stdout })
    }

    fn teardown(&mut self) {
        let _ = self.stdout.execute(cursor::Show);
        let _ = self.stdout.execute(terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
        let _ = self.stdout.flush();
    }

    fn draw(
        &mut self,
        board: &Board,
        input: &str,
        now: Instant,
        event_log: &VecDeque<LoggedEvent>,
        show_log: bool,
        cli: &Cli,
    ) -> io::Result<()> {
        self.stdout.queue(cursor::MoveTo(0, 0))?;
        self.stdout
            .queue(terminal::Clear(terminal::ClearType::All))?;

        // Header
        self.stdout.queue(SetAttribute(Attribute::Bold))?;
        self.stdout.queue(style::Print("heat-monitor  "))?;
        self.stdout.queue(SetForegroundColor(status_color(board)))?;
        self.stdout.queue(style::Print(status_text(board)))?;
        self.stdout.queue(ResetColor)?;
        self.stdout.queue(SetAttribute(Attribute::Reset))?;
        self.stdout.queue(cursor::MoveToNextLine(1))?;

        match &board.heat {
            Some(heat) => {
                let updated = match board.updated_at {
                    Some(t) => {
                        let t: DateTime<Local> = t.into();
                        t.format("%H:%M:%S").to_string()
                    }
                    None => "-".to_string(),
                };
                self.stdout.queue(style::Print(format!(
                    "Heat #{}   updated {}",
                    heat, updated
                )))?;
            }
            None => {
                self.stdout
                    .queue(style::Print(format!("Heat number: {}_", input)))?;
            }
        }
        self.stdout.queue(cursor::MoveToNextLine(1))?;
        self.stdout.queue(style::Print(summary_text(board)))?;
        self.stdout.queue(cursor::MoveToNextLine(2))?;

        // Table
        self.stdout.queue(SetAttribute(Attribute::Bold))?;
        self.stdout.queue(style::Print(table_header()))?;
        self.stdout.queue(SetAttribute(Attribute::Reset))?;
        self.stdout.queue(cursor::MoveToNextLine(1))?;

        if board.rows.is_empty() && board.heat.is_some() {
            self.stdout.queue(SetForegroundColor(Color::DarkGrey))?;
            self.stdout.queue(style::Print("Waiting for scorecard..."))?;
            self.stdout.queue(ResetColor)?;
            self.stdout.queue(cursor::MoveToNextLine(1))?;
        }
        for row in &board.rows {
            self.stdout.queue(SetForegroundColor(row_color(row, now)))?;
            if row.is_highlighted(now) {
                self.stdout.queue(SetAttribute(Attribute::Bold))?;
            }
            self.stdout
                .queue(style::Print(format_cells(&row_cells(row, now))))?;
            self.stdout.queue(SetAttribute(Attribute::Reset))?;
            self.stdout.queue(ResetColor)?;
            self.stdout.queue(cursor::MoveToNextLine(1))?;
        }

        // Event log section
        if show_log {
            self.stdout.queue(cursor::MoveToNextLine(1))?;
            self.stdout.queue(SetAttribute(Attribute::Bold))?;
            self.stdout.queue(style::Print(format!(
                "Recent Events ({} of {}):",
                event_log.len().min(cli.event_log_shown),
                event_log.len()
            )))?;
            self.stdout.queue(SetAttribute(Attribute::Reset))?;
            self.stdout.queue(cursor::MoveToNextLine(1))?;

            for logged in event_log.iter().take(cli.event_log_shown) {
                let datetime: DateTime<Local> = logged.timestamp.into();
                self.stdout.queue(SetForegroundColor(logged.color))?;
                self.stdout.queue(style::Print(format!(
                    "[{}] {}",
                    datetime.format("%H:%M:%S%.3f"),
                    logged.event
                )))?;
                self.stdout.queue(ResetColor)?;
                self.stdout.queue(cursor::MoveToNextLine(1))?;
            }
        }

        if !cli.quiet {
            self.stdout.queue(cursor::MoveToNextLine(1))?;
            self.stdout.queue(style::Print(
                "Enter: connect/disconnect   Ctrl-D: event log   q/Esc: quit",
            ))?;
        }

        self.stdout.flush()
    }
}

fn push_event(log: &mut VecDeque<LoggedEvent>, size: usize, event: String, color: Color) {
    log.push_front(LoggedEvent {
        timestamp: SystemTime::now(),
        event,
        color,
    });
    log.truncate(size);
}

fn main() {
    let (settings, initial_heat, cli) = parse_cli();

    let session = match Session::with_settings(&settings) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Failed to set up scorecard client: {}", e);
            std::process::exit(1);
        }
    };

    let mut tui = Tui::setup().expect("TUI setup failed");
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let mut t = Tui {
            stdout: io::stdout(),
        };
        t.teardown();
        original_hook(panic_info);
    }));

    let mut event_log = VecDeque::<LoggedEvent>::new();
    let mut show_log = cli.show_log;
    let mut input = String::new();
    let mut following = false;

    if let Some(heat) = initial_heat {
        match session.start(&heat) {
            Ok(_) => following = true,
            Err(e) => {
                input = heat;
                push_event(&mut event_log, cli.event_log_size, e.to_string(), Color::Red);
            }
        }
    }

    // Keyboard handler
    let (key_tx, key_rx) = channel::unbounded();
    std::thread::spawn(move || loop {
        if let Ok(ev) = event::read() {
            if key_tx.send(ev).is_err() {
                break;
            }
        }
    });

    // UI loop
    let frame = Duration::from_millis(1000 / cli.fps.max(1));
    let tick = channel::tick(frame);
    'main: loop {
        crossbeam::select! {
            recv(key_rx) -> ev => {
                if let Ok(event::Event::Key(k)) = ev {
                    use event::{KeyCode, KeyEventKind, KeyModifiers};
                    if k.kind == KeyEventKind::Release {
                        continue 'main;
                    }
                    let ctrl = k.modifiers.contains(KeyModifiers::CONTROL);
                    let quit = k.code == KeyCode::Char('q')
                             || k.code == KeyCode::Esc
                             || (k.code == KeyCode::Char('c') && ctrl);
                    if quit { break 'main; }

                    match k.code {
                        KeyCode::Char('d') if ctrl => show_log = !show_log,
                        KeyCode::Enter if following => {
                            if session.stop().is_err() {
                                break 'main;
                            }
                            following = false;
                        }
                        KeyCode::Enter => match session.start(&input) {
                            Ok(_) => following = true,
                            Err(e) => push_event(
                                &mut event_log,
                                cli.event_log_size,
                                e.to_string(),
                                Color::Red,
                            ),
                        },
                        KeyCode::Backspace if !following => {
                            input.pop();
                        }
                        KeyCode::Char(c) if !following && !ctrl && c.is_ascii_digit() => {
                            input.push(c);
                        }
                        _ => {}
                    }
                }
            }

            recv(session.events()) -> ev => {
                if let Ok(ev) = ev {
                    if let Some((text, color)) = format_event(&ev) {
                        push_event(&mut event_log, cli.event_log_size, text, color);
                    }
                }
            }

            recv(tick) -> _ => {
                let board = session.board();
                if tui
                    .draw(&board, &input, Instant::now(), &event_log, show_log, &cli)
                    .is_err()
                {
                    break 'main;
                }
            }
        }
    }

    tui.teardown();
}
