//! Scorecard data as received from upstream.
//!
//! The scorecard service has gone through several row shapes over time
//! (camelCase, PascalCase and an older flat mock layout). `RawScoreRow`
//! accepts all of them and leaves every value unnormalized; interpretation
//! happens in `reconcile`.

use crate::timing::RawTime;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeatError {
    #[error("heat number is empty")]
    Empty,
    #[error("heat number contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Heat identifier, safe to embed unescaped in URLs and channel names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeatId(String);

impl HeatId {
    pub fn parse(text: &str) -> Result<HeatId, HeatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(HeatError::Empty);
        }
        if let Some(c) = text
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(HeatError::InvalidCharacter(c));
        }
        Ok(HeatId(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for HeatId {
    type Err = HeatError;
    fn from_str(s: &str) -> Result<HeatId, HeatError> {
        HeatId::parse(s)
    }
}

impl fmt::Display for HeatId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Racer identity. Upstream sends guest ids as numbers or strings; both
/// map to the same textual key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RacerId(pub String);

impl RacerId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RacerId {
    fn from(s: &str) -> RacerId {
        RacerId(s.to_string())
    }
}

impl From<u64> for RacerId {
    fn from(n: u64) -> RacerId {
        RacerId(n.to_string())
    }
}

impl fmt::Display for RacerId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for RacerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<RacerId, D::Error> {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => RacerId(s.trim().to_string()),
            Value::Number(n) => RacerId(n.to_string()),
            Value::Null => RacerId::default(),
            other => RacerId(other.to_string()),
        })
    }
}

/// One racer's line on the scorecard, unnormalized.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawScoreRow {
    #[serde(alias = "GuestId", alias = "id")]
    pub guest_id: RacerId,
    #[serde(alias = "KartId", alias = "kartNumber", deserialize_with = "count")]
    pub kart_id: Option<u32>,
    #[serde(alias = "FirstName", deserialize_with = "text")]
    pub first_name: String,
    #[serde(alias = "LastName", deserialize_with = "text")]
    pub last_name: String,
    #[serde(alias = "Nickname", deserialize_with = "opt_text")]
    pub nickname: Option<String>,
    /// Single-field name used by the legacy layout.
    #[serde(alias = "Name", deserialize_with = "opt_text")]
    pub name: Option<String>,
    #[serde(alias = "LapNum", alias = "currentLap", deserialize_with = "count")]
    pub lap_num: Option<u32>,
    #[serde(alias = "Position", deserialize_with = "count")]
    pub position: Option<u32>,
    #[serde(alias = "LTime", alias = "lTime", deserialize_with = "time")]
    pub last_lap_time: Option<RawTime>,
    #[serde(alias = "FastestLapTime", alias = "bestLapTime", deserialize_with = "time")]
    pub fastest_lap_time: Option<RawTime>,
    #[serde(alias = "AmbTime", alias = "totalTime", deserialize_with = "time")]
    pub amb_time: Option<RawTime>,
    #[serde(alias = "Gap", alias = "gapToLeader", deserialize_with = "time")]
    pub gap: Option<RawTime>,
    #[serde(alias = "AverageLapTime", deserialize_with = "time")]
    pub average_lap_time: Option<RawTime>,
    #[serde(alias = "TotalRaces", deserialize_with = "count")]
    pub total_races: Option<u32>,
    #[serde(alias = "IsFirstTime", deserialize_with = "flag")]
    pub is_first_time: Option<bool>,
}

impl RawScoreRow {
    /// Nickname if set, otherwise the full name.
    pub fn display_name(&self) -> String {
        if let Some(nick) = self.nickname.as_deref().map(str::trim) {
            if !nick.is_empty() {
                return nick.to_string();
            }
        }
        let full = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let full = full.trim();
        if !full.is_empty() {
            return full.to_string();
        }
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => "-".to_string(),
        }
    }
}

fn time<'de, D: Deserializer<'de>>(d: D) -> Result<Option<RawTime>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Null => None,
        Value::Number(n) => n.as_f64().map(RawTime::Number),
        Value::String(s) => Some(RawTime::Text(s)),
        // Kept so the row is reported as malformed rather than silently blank.
        other => Some(RawTime::Text(other.to_string())),
    })
}

fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    let n = match Value::deserialize(d)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(n.filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64)
        .map(|n| n as u32))
}

fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let s = text(d)?;
    if s.trim().is_empty() {
        Ok(None)
    } else {
        Ok(Some(s))
    }
}

fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Scorecard of one heat at one point in time, in upstream order.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub heat: HeatId,
    pub rows: Vec<RawScoreRow>,
}

impl Snapshot {
    pub fn new(heat: HeatId, rows: Vec<RawScoreRow>) -> Snapshot {
        Snapshot { heat, rows }
    }

    pub fn find(&self, id: &RacerId) -> Option<&RawScoreRow> {
        self.rows.iter().find(|r| r.guest_id == *id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Deserialize)]
struct Group {
    #[serde(rename = "scorecardRows", alias = "ScorecardRows", alias = "racers")]
    rows: Vec<RawScoreRow>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Body {
    Groups(Vec<Group>),
    Single(Group),
}

/// Parses a scorecard response body.
pub fn parse_snapshot(heat: HeatId, body: &str) -> Result<Snapshot, serde_json::Error> {
    let rows = match serde_json::from_str::<Body>(body)? {
        Body::Single(group) => group.rows,
        Body::Groups(groups) => groups.into_iter().flat_map(|g| g.rows).collect(),
    };
    Ok(Snapshot { heat, rows })
}
