//! heat-log
//!
//! Follows a heat and logs connection and scorecard activity, one
//! timestamped line per event.

use kartlive::board::SessionEvent;
use kartlive::Session;
use kartlive_tools::{feed_opts, feed_parseopts, format_cells, row_cells, table_header};
use std::env;
use std::io;
use std::process::ExitCode;
use std::time::Instant;

macro_rules! log{
    ($tf:expr, $msg:expr)=>{
    {
        println!("{}{}", chrono::Local::now().format(&$tf), $msg);
    }
    };
    ($tf:expr, $f:expr,$($a:tt)*)=>{
    {
        log!($tf, format!($f, $($a)*));
    }
    };
}

fn main() -> ExitCode {
    let mut opts = feed_opts();
    opts.optflag("v", "", "Print the leaderboard after every update");
    opts.optopt("t", "", "Timestamp format (default '%T%.3f ')", "fmt");
    opts.optflag("h", "help", "Show help");

    let args: Vec<String> = env::args().collect();

    macro_rules! die{
        ($f:expr,$($a:tt)*)=>{
        {
            die!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            eprintln!("ERROR: {}", $msg);
            return ExitCode::FAILURE;
        }
        };
    }
    macro_rules! die_usage{
        ($f:expr,$($a:tt)*)=>{
        {
            die_usage!(format!($f, $($a)*));
        }
        };
        ($msg:expr)=>{
        {
            let usage = format!("Usage: {} [options] heat_number", &args[0]);
            die!("{}\n{}", $msg, opts.usage(&usage));
        }
        };
    }

    let (matches, settings, heat) = match feed_parseopts(&opts, &args[1..]) {
        Ok(parsed) => parsed,
        Err(e) => die_usage!("{}", e),
    };
    if matches.opt_present("h") {
        println!(
            "{}",
            opts.usage(&format!("Usage: {} [options] heat_number", &args[0]))
        );
        return ExitCode::SUCCESS;
    }
    let heat = match heat {
        Some(heat) => heat,
        None => die_usage!("need a heat number"),
    };
    let verbose = matches.opt_present("v");
    let tf = matches.opt_str("t").unwrap_or("%T%.3f ".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let session = match Session::with_settings(&settings) {
        Ok(session) => session,
        Err(e) => die!("Failed to set up scorecard client: {}", e),
    };
    let heat = match session.start(&heat) {
        Ok(heat) => heat,
        Err(e) => die_usage!("{}", e),
    };
    log!(tf, "Following heat {} via {}", heat, settings.pubsub_url);

    for event in session.events().iter() {
        match event {
            SessionEvent::Started(heat) => log!(tf, "Started heat {}", heat),
            SessionEvent::Stopped => log!(tf, "Stopped"),
            SessionEvent::Status(status) => log!(tf, "Push channel {:?}", status),
            SessionEvent::Updated { rows, changed } => {
                log!(tf, "Scorecard: {} racers, {} changed", rows, changed);
                if verbose {
                    let board = session.board();
                    let now = Instant::now();
                    println!("{}", table_header());
                    for row in &board.rows {
                        println!("{}", format_cells(&row_cells(row, now)));
                    }
                }
            }
            SessionEvent::FetchFailed(e) => log!(tf, "Scorecard fetch failed: {}", e),
            SessionEvent::ConnectFailed(e) => log!(tf, "Connection failed: {}", e),
            SessionEvent::ReconnectScheduled { attempt, delay } => {
                log!(tf, "Reconnect attempt {} in {:?}", attempt, delay)
            }
            SessionEvent::ReconnectGaveUp => {
                log!(tf, "Giving up reconnecting");
                return ExitCode::FAILURE;
            }
            SessionEvent::MalformedData { racer, fields } => {
                log!(tf, "Racer {}: unreadable {}", racer, fields.join(", "))
            }
            SessionEvent::HighlightsExpired(_) => {}
        }
    }
    ExitCode::SUCCESS
}
