//! Relative-time parsing for the "3h •" style labels under a post's author.
//!
//! Two parsers live here. The short one only knows minutes/hours/days/weeks and
//! is what the legacy markup was read with. The extended one also understands
//! months and years plus long-form words ("3 hours ago"), and must test `mo`
//! before `m` or "3mo" would read as three minutes.

use regex::Regex;
use std::sync::OnceLock;

const HOURS_PER_WEEK: f64 = 168.0;
const HOURS_PER_MONTH: f64 = 730.0;
const HOURS_PER_YEAR: f64 = 8760.0;

fn short_form() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+)([mhdw])$").expect("static regex"))
}

fn extended_form() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(\d+)\s*([a-z]+)").expect("static regex"))
}

/// Drop a trailing bullet-separated suffix: "3h • Edited •" -> "3h".
fn leading_segment(text: &str) -> &str {
    text.split('•').next().unwrap_or("").trim()
}

/// Parse a short relative-time label (`^\d+[mhdw]$`) into hours.
///
/// Returns `None` for anything unrecognized and for promoted posts.
pub fn parse_time_string_to_hours(text: &str) -> Option<f64> {
    if text.to_lowercase().contains("promoted") {
        return None;
    }
    let caps = short_form().captures(leading_segment(text))?;
    let n: f64 = caps[1].parse().ok()?;
    match caps[2].to_ascii_lowercase().as_str() {
        "m" => Some(n / 60.0),
        "h" => Some(n),
        "d" => Some(n * 24.0),
        "w" => Some(n * HOURS_PER_WEEK),
        _ => None,
    }
}

/// Parse a relative-time label with month and year support.
///
/// Accepts short ("3mo", "2y", "45m") and long ("3 hours ago", "2 months") forms.
pub fn parse_time_to_hours(text: &str) -> Option<f64> {
    let lowered = text.to_lowercase();
    if lowered.contains("promoted") {
        return None;
    }
    let caps = extended_form().captures(leading_segment(&lowered))?;
    let n: f64 = caps[1].parse().ok()?;
    let unit = &caps[2];

    // Order matters: "mo" must win over "m".
    if unit.starts_with("mo") {
        Some(n * HOURS_PER_MONTH)
    } else if unit.starts_with('y') {
        Some(n * HOURS_PER_YEAR)
    } else if unit.starts_with('w') {
        Some(n * HOURS_PER_WEEK)
    } else if unit.starts_with('d') {
        Some(n * 24.0)
    } else if unit.starts_with('h') {
        Some(n)
    } else if unit.starts_with('m') {
        Some(n / 60.0)
    } else {
        None
    }
}
