use chrono::{Days, NaiveDate};

/// Extract the short level label used in generated names.
/// A numeric range ("Advanced (3.5-4.0)") wins, then a single number,
/// then the first word.
pub fn abbreviate_level(level_name: Option<&str>) -> String {
    let Some(name) = level_name else {
        return String::new();
    };
    if name.trim().is_empty() {
        return String::new();
    }

    if let Some(range) = find_number_range(name) {
        return range;
    }
    if let Some(single) = find_number(name, 0).map(|(n, _)| n) {
        return single;
    }

    name.split(|c: char| c.is_whitespace() || c == '(')
        .find(|w| !w.is_empty())
        .unwrap_or(name)
        .to_string()
}

fn find_number_range(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if let Some((first, mut j)) = find_number(text, i) {
            while chars.get(j).is_some_and(|c| c.is_whitespace()) {
                j += 1;
            }
            if chars.get(j) == Some(&'-') {
                j += 1;
                while chars.get(j).is_some_and(|c| c.is_whitespace()) {
                    j += 1;
                }
                if let Some((second, _)) = find_number_at(&chars, j) {
                    return Some(format!("{}-{}", first, second));
                }
            }
            i = j.max(i + 1);
        } else {
            break;
        }
    }
    None
}

/// First number (`\d+\.?\d*`) at or after byte-char index `from`.
/// Returns the number text and the index just past it.
fn find_number(text: &str, from: usize) -> Option<(String, usize)> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = from;
    while i < chars.len() {
        if chars[i].is_ascii_digit() {
            return find_number_at(&chars, i);
        }
        i += 1;
    }
    None
}

fn find_number_at(chars: &[char], start: usize) -> Option<(String, usize)> {
    if !chars.get(start).is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut out = String::new();
    let mut i = start;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        out.push(chars[i]);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        out.push('.');
        i += 1;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            out.push(chars[i]);
            i += 1;
        }
    }
    Some((out, i))
}

/// `HH:MM:SS` -> `h:mmam|pm` (e.g. "18:30:00" -> "6:30pm").
pub fn format_time_display(time: &str) -> String {
    let mut parts = time.split(':');
    let hours: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let minutes: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let period = if hours >= 12 { "pm" } else { "am" };
    let display_hour = match hours {
        0 => 12,
        h if h > 12 => h - 12,
        h => h,
    };
    format!("{}:{:02}{}", display_hour, minutes, period)
}

pub fn day_of_week_name(date: NaiveDate) -> String {
    date.format("%A").to_string()
}

fn month_day(date: NaiveDate) -> String {
    use chrono::Datelike;
    format!("{}/{}", date.month(), date.day())
}

/// `<Weekday> <M/D> | <start> - <end> (<abbreviated level>)`
/// e.g. "Monday 1/26 | 6:30pm - 8:00pm (2.0-3.0)".
pub fn format_program_name(
    date: NaiveDate,
    start_time: &str,
    end_time: &str,
    level_name: Option<&str>,
) -> String {
    let level_abbr = abbreviate_level(level_name);
    let level_part = if level_abbr.is_empty() {
        String::new()
    } else {
        format!(" ({})", level_abbr)
    };
    format!(
        "{} {} | {} - {}{}",
        day_of_week_name(date),
        month_day(date),
        format_time_display(start_time),
        format_time_display(end_time),
        level_part
    )
}

/// `<Weekday>s <N> Week <abbreviated level> <category> Package
/// (<M/D start> - <M/D end>; <start> - <end>)`
/// e.g. "Mondays 5 Week 2.0-3.0 Adult Clinics Package (1/26 - 2/23; 6:30pm - 8:00pm)".
pub fn format_package_name(
    start_date: NaiveDate,
    end_date: NaiveDate,
    number_of_weeks: usize,
    start_time: &str,
    end_time: &str,
    level_name: Option<&str>,
    category_name: Option<&str>,
) -> String {
    let level_abbr = abbreviate_level(level_name);
    let level_part = if level_abbr.is_empty() {
        String::new()
    } else {
        format!("{} ", level_abbr)
    };
    let category_part = match category_name {
        Some(c) if !c.trim().is_empty() => format!("{} ", c),
        _ => String::new(),
    };
    format!(
        "{}s {} Week {}{}Package ({} - {}; {} - {})",
        day_of_week_name(start_date),
        number_of_weeks,
        level_part,
        category_part,
        month_day(start_date),
        month_day(end_date),
        format_time_display(start_time),
        format_time_display(end_time)
    )
}

/// One program date per week starting at `start_date`.
pub fn generate_program_dates(start_date: NaiveDate, number_of_weeks: usize) -> Vec<NaiveDate> {
    (0..number_of_weeks)
        .filter_map(|i| start_date.checked_add_days(Days::new(7 * i as u64)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekSpan {
    pub start_week_index: usize,
    pub end_week_index: usize,
    pub weeks_count: usize,
}

/// Partition `total_weeks` into `number_of_packages` contiguous spans,
/// distributing the remainder to the earlier spans.
pub fn split_weeks_into_packages(total_weeks: usize, number_of_packages: usize) -> Vec<WeekSpan> {
    if number_of_packages == 0 {
        return Vec::new();
    }
    let base = total_weeks / number_of_packages;
    let remainder = total_weeks % number_of_packages;

    let mut spans = Vec::with_capacity(number_of_packages);
    let mut current = 0;
    for i in 0..number_of_packages {
        let weeks = base + usize::from(i < remainder);
        spans.push(WeekSpan {
            start_week_index: current,
            end_week_index: current + weeks.saturating_sub(1),
            weeks_count: weeks,
        });
        current += weeks;
    }
    spans
}

/// Explicit override wins; otherwise per-day price times the span length.
pub fn package_price(override_price: Option<f64>, per_day_price: f64, weeks: usize) -> f64 {
    override_price.unwrap_or(per_day_price * weeks as f64)
}

pub fn parse_iso_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn level_abbreviation_prefers_ranges() {
        assert_eq!(abbreviate_level(Some("Advanced (3.5-4.0)")), "3.5-4.0");
        assert_eq!(abbreviate_level(Some("2.0 - 3.0 Mixed")), "2.0-3.0");
        assert_eq!(abbreviate_level(Some("Level 3.5")), "3.5");
        assert_eq!(abbreviate_level(Some("Beginner")), "Beginner");
        assert_eq!(abbreviate_level(Some("Beginner (Intro)")), "Beginner");
        assert_eq!(abbreviate_level(None), "");
    }

    #[test]
    fn time_display_matches_clock_convention() {
        assert_eq!(format_time_display("18:30:00"), "6:30pm");
        assert_eq!(format_time_display("09:00:00"), "9:00am");
        assert_eq!(format_time_display("00:05:00"), "12:05am");
        assert_eq!(format_time_display("12:00:00"), "12:00pm");
    }

    #[test]
    fn program_name_layout() {
        let name = format_program_name(
            date(2025, 1, 26),
            "18:30:00",
            "20:00:00",
            Some("2.0-3.0 Mixed"),
        );
        assert_eq!(name, "Sunday 1/26 | 6:30pm - 8:00pm (2.0-3.0)");
    }

    #[test]
    fn package_name_layout() {
        let name = format_package_name(
            date(2025, 1, 27),
            date(2025, 2, 24),
            5,
            "18:30:00",
            "20:00:00",
            Some("2.0-3.0"),
            Some("Adult Clinics"),
        );
        assert_eq!(
            name,
            "Mondays 5 Week 2.0-3.0 Adult Clinics Package (1/27 - 2/24; 6:30pm - 8:00pm)"
        );
    }

    #[test]
    fn weekly_dates_are_seven_days_apart() {
        let dates = generate_program_dates(date(2025, 1, 27), 3);
        assert_eq!(
            dates,
            vec![date(2025, 1, 27), date(2025, 2, 3), date(2025, 2, 10)]
        );
    }

    #[test]
    fn five_weeks_across_two_packages_splits_three_two() {
        let spans = split_weeks_into_packages(5, 2);
        assert_eq!(
            spans,
            vec![
                WeekSpan {
                    start_week_index: 0,
                    end_week_index: 2,
                    weeks_count: 3
                },
                WeekSpan {
                    start_week_index: 3,
                    end_week_index: 4,
                    weeks_count: 2
                },
            ]
        );
    }

    #[test]
    fn split_covers_weeks_contiguously() {
        for (weeks, packages) in [(7usize, 3usize), (10, 4), (4, 4), (9, 2)] {
            let spans = split_weeks_into_packages(weeks, packages);
            let mut next = 0;
            for span in &spans {
                assert_eq!(span.start_week_index, next);
                assert_eq!(span.weeks_count, span.end_week_index - span.start_week_index + 1);
                next = span.end_week_index + 1;
            }
            assert_eq!(next, weeks);
        }
    }

    #[test]
    fn package_price_override_wins() {
        assert_eq!(package_price(Some(99.0), 30.0, 3), 99.0);
        assert_eq!(package_price(None, 30.0, 3), 90.0);
    }

    #[test]
    fn generated_name_date_round_trips_through_item_parsing() {
        let start = date(2025, 1, 27);
        let name = format_program_name(start, "18:30:00", "20:00:00", Some("3.5-4.0"));
        let parsed = crate::csv::parse_date_time_from_item_at(&name, start);
        assert_eq!(parsed.date.as_deref(), Some("2025-01-27"));
        assert_eq!(parsed.start_time, "18:30:00");
        assert_eq!(parsed.end_time, "20:00:00");
    }
}
