use getopts::{Matches, Options};
use kartlive::board::{AnnotatedRow, Board, PositionDelta};
use kartlive::config::Settings;
use kartlive::feed::LinkStatus;
use kartlive::timing;

use std::time::Instant;

/// Options shared by every tool that follows a heat.
pub fn feed_opts() -> Options {
    let mut opts = Options::new();
    opts.optopt("c", "config", "YAML settings file", "path");
    opts.optopt("", "scorecard", "Scorecard API url", "url");
    opts.optopt("", "pubsub", "Push service url", "url");
    opts.optopt(
        "",
        "retries",
        "Reconnect attempts: a number, 'capped' (5 every 2s) or 'forever' (default)",
        "n",
    );
    opts.optopt(
        "",
        "retry-delay",
        "Delay between reconnect attempts (default 5000)",
        "ms",
    );
    opts.optopt(
        "",
        "max-retry-delay",
        "Back off exponentially up to this delay",
        "ms",
    );
    opts.optopt(
        "",
        "highlight-ms",
        "How long updated rows stay highlighted (default 3000)",
        "ms",
    );
    opts
}

fn ms_opt(matches: &Matches, name: &str) -> Result<Option<u64>, String> {
    match matches.opt_str(name) {
        Some(s) => match s.parse::<u64>() {
            Ok(ms) => Ok(Some(ms)),
            Err(_) => Err(format!("Invalid --{} '{}'", name, s)),
        },
        None => Ok(None),
    }
}

/// Applies command line flags on top of `settings`.
pub fn apply_flags(matches: &Matches, settings: &mut Settings) -> Result<(), String> {
    if let Some(url) = matches.opt_str("scorecard") {
        settings.scorecard_url = url;
    }
    if let Some(url) = matches.opt_str("pubsub") {
        settings.pubsub_url = url;
    }
    if let Some(retries) = matches.opt_str("retries") {
        settings.set_retries(&retries).map_err(|e| e.to_string())?;
    }
    if let Some(ms) = ms_opt(matches, "retry-delay")? {
        settings.reconnect.delay_ms = ms;
    }
    if let Some(ms) = ms_opt(matches, "max-retry-delay")? {
        settings.reconnect.max_delay_ms = Some(ms);
    }
    if let Some(ms) = ms_opt(matches, "highlight-ms")? {
        settings.highlight_ms = ms;
    }
    Ok(())
}

/// Parses `args` (program name excluded) and resolves settings from
/// defaults, the `-c` file, the environment and flags, in that order.
/// Returns the heat number if one was given.
pub fn feed_parseopts(
    opts: &Options,
    args: &[String],
) -> Result<(Matches, Settings, Option<String>), String> {
    let matches = opts.parse(args).map_err(|e| e.to_string())?;
    let mut settings = match matches.opt_str("c") {
        Some(path) => Settings::load(&path).map_err(|e| e.to_string())?,
        None => Settings::default(),
    };
    settings.apply_env().map_err(|e| e.to_string())?;
    apply_flags(&matches, &mut settings)?;
    let heat = match matches.free.len() {
        0 => None,
        1 => Some(matches.free[0].clone()),
        _ => return Err("Only a single heat number is supported".to_string()),
    };
    Ok((matches, settings, heat))
}

/// Display cells of one leaderboard row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCells {
    pub position: String,
    pub kart: String,
    pub name: String,
    pub lap: String,
    pub last: String,
    pub best: String,
    pub gap: String,
    pub average: String,
    pub marker: &'static str,
}

fn fit(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut s: String = text.chars().take(width.saturating_sub(1)).collect();
        s.push('…');
        s
    }
}

pub fn row_cells(row: &AnnotatedRow, now: Instant) -> RowCells {
    let mut name = row.display_name();
    if row.is_rookie() {
        name.push_str(" [ROOKIE]");
    }
    let marker = if row.is_highlighted(now) {
        match row.position_delta {
            PositionDelta::Improved => "▲",
            PositionDelta::Dropped => "▼",
            PositionDelta::Unchanged => "•",
        }
    } else {
        " "
    };
    let number = |n: Option<u32>| n.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
    RowCells {
        position: number(row.position()),
        kart: number(row.row.kart_id),
        name: fit(&name, 28),
        lap: number(row.row.lap_num),
        last: timing::format_time(row.last_lap.as_ref()),
        best: timing::format_time(row.best_lap.as_ref()),
        gap: row.gap.display(),
        average: timing::format_time(row.average_lap.as_ref()),
        marker,
    }
}

pub fn table_header() -> String {
    format!(
        "{:>3} {:1} {:>4}  {:<28}  {:>4}  {:>10}  {:>10}  {:>10}  {:>10}",
        "pos", "", "kart", "racer", "lap", "last", "best", "gap", "avg"
    )
}

pub fn format_cells(c: &RowCells) -> String {
    format!(
        "{:>3} {:1} {:>4}  {:<28}  {:>4}  {:>10}  {:>10}  {:>10}  {:>10}",
        c.position, c.marker, c.kart, c.name, c.lap, c.last, c.best, c.gap, c.average
    )
}

pub fn status_text(board: &Board) -> String {
    match board.status {
        LinkStatus::Connected => match &board.heat {
            Some(heat) => format!("Connected to Heat #{}", heat),
            None => "Connected".to_string(),
        },
        LinkStatus::Connecting => "Connecting...".to_string(),
        LinkStatus::Disconnected if board.reconnecting => "Reconnecting...".to_string(),
        LinkStatus::Disconnected => "Disconnected".to_string(),
    }
}

pub fn summary_text(board: &Board) -> String {
    let s = board.summary();
    format!(
        "Racers: {}   Leader: {}   Best lap: {}",
        s.racers,
        s.leader.as_deref().unwrap_or("-"),
        timing::format_time(s.best_lap.as_ref())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use kartlive::board::{reconcile, HeatId, RacerId, RawScoreRow, Snapshot};
    use kartlive::timing::RawTime;
    use std::time::Duration;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn flags_override_defaults() {
        let opts = feed_opts();
        let matches = opts
            .parse(args(&[
                "--retries",
                "capped",
                "--retry-delay",
                "750",
                "--highlight-ms",
                "2000",
                "--pubsub",
                "ws://localhost/ws",
            ]))
            .unwrap();
        let mut settings = Settings::default();
        apply_flags(&matches, &mut settings).unwrap();
        assert_eq!(settings.reconnect.max_attempts, Some(5));
        assert_eq!(settings.reconnect.delay_ms, 750);
        assert_eq!(settings.highlight_ms, 2000);
        assert_eq!(settings.pubsub_url, "ws://localhost/ws");

        let matches = opts.parse(args(&["--highlight-ms", "soon"])).unwrap();
        assert!(apply_flags(&matches, &mut settings).is_err());
    }

    #[test]
    fn heat_argument() {
        let opts = feed_opts();
        let (_, _, heat) = feed_parseopts(&opts, &args(&["123"])).unwrap();
        assert_eq!(heat.as_deref(), Some("123"));
        assert!(feed_parseopts(&opts, &args(&["1", "2"])).is_err());
    }

    #[test]
    fn cells() {
        let now = Instant::now();
        let previous = Snapshot::new(
            HeatId::parse("5").unwrap(),
            vec![RawScoreRow {
                guest_id: RacerId::from(1),
                position: Some(2),
                ..Default::default()
            }],
        );
        let current = Snapshot::new(
            HeatId::parse("5").unwrap(),
            vec![RawScoreRow {
                guest_id: RacerId::from(1),
                position: Some(1),
                kart_id: Some(12),
                nickname: Some("Speedy".to_string()),
                lap_num: Some(3),
                last_lap_time: Some(RawTime::from("0:31.250")),
                is_first_time: Some(true),
                ..Default::default()
            }],
        );
        let rows = reconcile(&current, Some(&previous), now, Duration::from_secs(3));
        let c = row_cells(&rows[0], now);
        assert_eq!(c.marker, "▲");
        assert_eq!(c.name, "Speedy [ROOKIE]");
        assert_eq!(c.kart, "12");
        assert_eq!(c.last, "31.250");
        assert_eq!(c.best, "-");
        assert_eq!(c.gap, "-");
        assert_eq!(row_cells(&rows[0], now + Duration::from_secs(3)).marker, " ");
        assert_eq!(
            format_cells(&c).chars().count(),
            table_header().chars().count()
        );
    }

    #[test]
    fn status_line() {
        let mut board = Board::default();
        assert_eq!(status_text(&board), "Disconnected");
        board.reconnecting = true;
        assert_eq!(status_text(&board), "Reconnecting...");
        board.status = LinkStatus::Connected;
        board.heat = Some(HeatId::parse("77").unwrap());
        assert_eq!(status_text(&board), "Connected to Heat #77");
        assert_eq!(
            summary_text(&Board::default()),
            "Racers: 0   Leader: -   Best lap: -"
        );
    }

    #[test]
    fn long_names_are_cut() {
        assert_eq!(fit("abc", 5), "abc");
        assert_eq!(fit("abcdefgh", 5), "abcd…");
    }
}
