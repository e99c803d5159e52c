//! Maps upstream team and game records onto fixed row shapes.
//!
//! Reads are defensive: a missing or mistyped field becomes `None`. The only
//! record that cannot be normalized is one with no usable `id`, since rows are
//! keyed on it.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;

/// Normalized team row; `raw` keeps the record verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamRow {
    pub id: i64,
    pub abbreviation: Option<String>,
    pub city: Option<String>,
    pub conference: Option<String>,
    pub division: Option<String>,
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub raw: Value,
}

/// Normalized game row; `raw` keeps the record verbatim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameRow {
    pub id: i64,
    pub game_day: Option<NaiveDate>,
    pub season: Option<i32>,
    pub status: Option<String>,
    pub postseason: Option<bool>,
    pub home_team_id: Option<i64>,
    pub visitor_team_id: Option<i64>,
    pub home_team_score: Option<i32>,
    pub visitor_team_score: Option<i32>,
    pub raw: Value,
}

/// The `data` array of an upstream response envelope.
pub fn extract_records(payload: &Value) -> &[Value] {
    payload
        .get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn normalize_team(raw: &Value) -> Option<TeamRow> {
    Some(TeamRow {
        id: int_field(raw, "id")?,
        abbreviation: str_field(raw, "abbreviation"),
        city: str_field(raw, "city"),
        conference: str_field(raw, "conference"),
        division: str_field(raw, "division"),
        name: str_field(raw, "name"),
        full_name: str_field(raw, "full_name"),
        raw: raw.clone(),
    })
}

pub fn normalize_game(raw: &Value) -> Option<GameRow> {
    Some(GameRow {
        id: int_field(raw, "id")?,
        game_day: parse_game_day(raw),
        season: small_int_field(raw, "season"),
        status: str_field(raw, "status"),
        postseason: raw.get("postseason").and_then(Value::as_bool),
        home_team_id: raw.get("home_team").and_then(|t| int_field(t, "id")),
        visitor_team_id: raw.get("visitor_team").and_then(|t| int_field(t, "id")),
        home_team_score: small_int_field(raw, "home_team_score"),
        visitor_team_score: small_int_field(raw, "visitor_team_score"),
        raw: raw.clone(),
    })
}

/// Calendar day of a game from its `date` field.
///
/// `"2024-03-01T19:00:00Z"` and `"2024-03-01"` both give 2024-03-01. Anything
/// that does not start with a valid `YYYY-MM-DD` gives `None`.
pub fn parse_game_day(raw: &Value) -> Option<NaiveDate> {
    let s = raw.get("date").and_then(Value::as_str)?.trim();
    if s.is_empty() {
        return None;
    }
    let s = s.replace('Z', "+00:00");
    let day = s.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn str_field(raw: &Value, key: &str) -> Option<String> {
    raw.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Integer field, also accepting numeric strings.
fn int_field(raw: &Value, key: &str) -> Option<i64> {
    match raw.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn small_int_field(raw: &Value, key: &str) -> Option<i32> {
    int_field(raw, key).and_then(|n| i32::try_from(n).ok())
}
