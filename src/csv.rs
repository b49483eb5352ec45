use chrono::{Datelike, Local, NaiveDate};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ParsedCsv {
    pub headers: Vec<String>,
    pub rows: Vec<HashMap<String, String>>,
}

/// Best-effort CSV parsing: quoted fields with embedded commas and `""`
/// escapes are handled, an unterminated quote consumes to end of line, and
/// blank lines are skipped. Malformed input never produces an error.
pub fn parse_csv(text: &str) -> ParsedCsv {
    let lines: Vec<&str> = text
        .split(['\r', '\n'])
        .filter(|line| !line.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return ParsedCsv::default();
    }

    let headers = parse_csv_line(lines[0]);
    let rows = lines[1..]
        .iter()
        .map(|line| {
            let values = parse_csv_line(line);
            headers
                .iter()
                .enumerate()
                .map(|(i, header)| {
                    (
                        header.clone(),
                        values.get(i).cloned().unwrap_or_default(),
                    )
                })
                .collect()
        })
        .collect();

    ParsedCsv { headers, rows }
}

fn parse_csv_line(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '"' {
            if in_quotes && chars.get(i + 1) == Some(&'"') {
                current.push('"');
                i += 1;
            } else {
                in_quotes = !in_quotes;
            }
        } else if c == ',' && !in_quotes {
            result.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
        i += 1;
    }
    result.push(current.trim().to_string());
    result
}

/// Strips `$` and thousands separators; any non-numeric remainder yields 0.
pub fn parse_price(price: &str) -> f64 {
    let cleaned: String = price
        .chars()
        .filter(|c| *c != '$' && *c != ',')
        .collect();
    cleaned.trim().parse::<f64>().unwrap_or(0.0)
}

/// Normalizes `H:MM`, `H:MM AM/PM` and `H:MM:SS AM/PM` to 24-hour
/// `HH:MM:SS`. Empty or unparseable input defaults to midnight.
pub fn parse_time(time: &str) -> String {
    let cleaned = time.trim().to_ascii_uppercase();
    if cleaned.is_empty() {
        return "00:00:00".to_string();
    }

    let is_pm = cleaned.contains("PM");
    let is_am = cleaned.contains("AM");
    let time_part = cleaned.replace("AM", "").replace("PM", "");
    let time_part = time_part.trim();

    let mut parts = time_part.split(':');
    let mut hours: u32 = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(0);
    let minutes: u32 = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(0);
    let seconds: u32 = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .unwrap_or(0);

    if is_pm && hours < 12 {
        hours += 12;
    }
    if is_am && hours == 12 {
        hours = 0;
    }

    format!("{:02}:{:02}:{:02}", hours % 24, minutes % 60, seconds % 60)
}

/// Outputs `YYYY-MM-DD`, falling back to the current date when the input is
/// empty or unparseable. The lossy fallback mirrors the spreadsheet-era
/// behavior the import tolerates.
pub fn parse_date(date: &str) -> String {
    let trimmed = date.trim();
    if trimmed.is_empty() {
        return today().format("%Y-%m-%d").to_string();
    }

    const FORMATS: [&str; 6] = [
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%m/%d/%y",
        "%Y/%m/%d",
        "%B %d, %Y",
        "%b %d, %Y",
    ];
    for fmt in FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return d.format("%Y-%m-%d").to_string();
        }
    }

    today().format("%Y-%m-%d").to_string()
}

/// Splits a cell on newlines or commas, trimming and dropping empties.
/// Used for multi-program package id cells and multi-registration rows.
pub fn parse_multiple_values(value: &str) -> Vec<String> {
    value
        .split(['\n', ','])
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .collect()
}

/// Collapses case, whitespace, and punctuation variance so that
/// `"3.5 Advanced"` and `"3.5  Advanced "` compare equal. Only used for
/// registration-string matching, never for persisted names.
pub fn normalize_for_matching(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDateTime {
    pub date: Option<String>,
    pub start_time: String,
    pub end_time: String,
}

/// Extracts a `M/D` date and a `H:MM[am|pm] - H:MM[am|pm]` range from a
/// combined item label such as `"Wednesday 1/28 | 9:00am - 10:30am"`.
///
/// The year is inferred: if the naive current-year date is already in the
/// past, the date belongs to next year.
pub fn parse_date_time_from_item(item: &str) -> ItemDateTime {
    parse_date_time_from_item_at(item, today())
}

pub(crate) fn parse_date_time_from_item_at(item: &str, reference: NaiveDate) -> ItemDateTime {
    let tokens: Vec<&str> = item
        .split(|c: char| c.is_whitespace() || c == '|')
        .filter(|t| !t.is_empty())
        .collect();

    let mut date = None;
    for token in &tokens {
        if let Some((month, day)) = parse_month_day(token) {
            date = resolve_year(month, day, reference)
                .map(|d| d.format("%Y-%m-%d").to_string());
            if date.is_some() {
                break;
            }
        }
    }

    let mut times = tokens.iter().filter(|t| t.contains(':'));
    let start_time = times
        .next()
        .map(|t| parse_time(t))
        .unwrap_or_else(|| "00:00:00".to_string());
    let end_time = times
        .next()
        .map(|t| parse_time(t))
        .unwrap_or_else(|| "00:00:00".to_string());

    ItemDateTime {
        date,
        start_time,
        end_time,
    }
}

fn parse_month_day(token: &str) -> Option<(u32, u32)> {
    let (m, d) = token.split_once('/')?;
    let month: u32 = m.parse().ok()?;
    let day: u32 = d.parse().ok()?;
    if (1..=12).contains(&month) && (1..=31).contains(&day) {
        Some((month, day))
    } else {
        None
    }
}

fn resolve_year(month: u32, day: u32, reference: NaiveDate) -> Option<NaiveDate> {
    let this_year = NaiveDate::from_ymd_opt(reference.year(), month, day)?;
    if this_year < reference {
        NaiveDate::from_ymd_opt(reference.year() + 1, month, day)
    } else {
        Some(this_year)
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}
