use crate::series::format_time_display;
use chrono::{Datelike, Days, NaiveDate};
use serde::Serialize;
use std::collections::HashMap;

/// One scheduled program joined with its registration count, as fetched for
/// the counter view.
#[derive(Debug, Clone)]
pub struct ProgramOccurrence {
    pub id: String,
    pub date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    pub max_registrations: i64,
    pub level_id: Option<String>,
    pub category_id: Option<String>,
    pub level_name: Option<String>,
    pub category_name: Option<String>,
    pub registration_count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeekCell {
    pub week_number: i64,
    pub date: String,
    pub count: i64,
    pub program_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesRow {
    pub series_key: String,
    pub day_of_week: u32,
    pub day_name: String,
    pub day_time: String,
    pub category: String,
    pub level: String,
    pub max_registrations: i64,
    pub week_data: Vec<WeekCell>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CounterTable {
    pub rows: Vec<SeriesRow>,
    pub week_count: i64,
    pub week_dates: Vec<String>,
}

/// Occupancy tier for a cell. Capacity is descriptive only, so a count
/// against a zero capacity still flags as full rather than erroring.
pub fn fill_tier(count: i64, max_registrations: i64) -> Option<&'static str> {
    if max_registrations <= 0 {
        return (count > 0).then_some("full");
    }
    let ratio = count as f64 / max_registrations as f64;
    if ratio >= 1.0 {
        Some("full")
    } else if ratio >= 0.75 {
        Some("high")
    } else if ratio >= 0.5 {
        Some("medium")
    } else {
        None
    }
}

fn monday_of_week(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

fn series_key(program: &ProgramOccurrence, day_of_week: u32) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        day_of_week,
        program.start_time,
        program.end_time,
        program.level_id.as_deref().unwrap_or("none"),
        program.category_id.as_deref().unwrap_or("none")
    )
}

/// Groups programs into recurring weekly series and indexes each series'
/// occurrences by week number. Week 1 starts at the Monday of the earliest
/// program across the whole result set, so week columns line up between
/// series. A series simply has no cell for a week with no program.
pub fn build_counter(programs: &[ProgramOccurrence]) -> CounterTable {
    if programs.is_empty() {
        return CounterTable::default();
    }

    let (Some(earliest), Some(latest)) = (
        programs.iter().map(|p| p.date).min(),
        programs.iter().map(|p| p.date).max(),
    ) else {
        return CounterTable::default();
    };
    let week1_start = monday_of_week(earliest);

    let week_count = (latest - week1_start).num_days() / 7 + 1;
    let week_dates: Vec<String> = (0..week_count)
        .filter_map(|i| week1_start.checked_add_days(Days::new(7 * i as u64)))
        .map(|d| d.format("%Y-%m-%d").to_string())
        .collect();

    let mut groups: HashMap<String, Vec<&ProgramOccurrence>> = HashMap::new();
    for program in programs {
        let day = program.date.weekday().number_from_monday();
        groups.entry(series_key(program, day)).or_default().push(program);
    }

    let mut rows: Vec<SeriesRow> = groups
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by_key(|p| p.date);
            let first = members[0];
            let day_of_week = first.date.weekday().number_from_monday();
            let day_name = first.date.format("%A").to_string();
            let day_time = format!(
                "{}s {} - {}",
                day_name,
                format_time_display(&first.start_time),
                format_time_display(&first.end_time)
            );

            let week_data = members
                .iter()
                .map(|p| WeekCell {
                    week_number: (p.date - week1_start).num_days() / 7 + 1,
                    date: p.date.format("%Y-%m-%d").to_string(),
                    count: p.registration_count,
                    program_id: p.id.clone(),
                    fill: fill_tier(p.registration_count, first.max_registrations),
                })
                .collect();

            SeriesRow {
                series_key: key,
                day_of_week,
                day_name,
                day_time,
                category: first
                    .category_name
                    .clone()
                    .unwrap_or_else(|| "—".to_string()),
                level: first.level_name.clone().unwrap_or_else(|| "—".to_string()),
                // Series are assumed capacity-homogeneous; the first program
                // speaks for the group. Not enforced.
                max_registrations: first.max_registrations,
                week_data,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.day_of_week
            .cmp(&b.day_of_week)
            .then_with(|| a.day_time.cmp(&b.day_time))
    });

    CounterTable {
        rows,
        week_count,
        week_dates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn occurrence(
        id: &str,
        date: &str,
        start: &str,
        max: i64,
        count: i64,
    ) -> ProgramOccurrence {
        ProgramOccurrence {
            id: id.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            start_time: start.to_string(),
            end_time: "20:00:00".to_string(),
            max_registrations: max,
            level_id: Some("lvl".to_string()),
            category_id: Some("cat".to_string()),
            level_name: Some("3.5-4.0".to_string()),
            category_name: Some("Adult Clinics".to_string()),
            registration_count: count,
        }
    }

    #[test]
    fn three_consecutive_mondays_form_one_series() {
        // 2025-01-06, 13, 20 are consecutive Mondays.
        let programs = vec![
            occurrence("p1", "2025-01-06", "18:30:00", 10, 5),
            occurrence("p2", "2025-01-13", "18:30:00", 10, 10),
            occurrence("p3", "2025-01-20", "18:30:00", 10, 0),
        ];
        let table = build_counter(&programs);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.week_count, 3);

        let row = &table.rows[0];
        assert_eq!(row.day_name, "Monday");
        assert_eq!(row.day_time, "Mondays 6:30pm - 8:00pm");
        assert_eq!(row.max_registrations, 10);

        let weeks: Vec<(i64, i64)> = row
            .week_data
            .iter()
            .map(|c| (c.week_number, c.count))
            .collect();
        assert_eq!(weeks, vec![(1, 5), (2, 10), (3, 0)]);
        assert_eq!(row.week_data[0].fill, Some("medium"));
        assert_eq!(row.week_data[1].fill, Some("full"));
        assert_eq!(row.week_data[2].fill, None);
    }

    #[test]
    fn missing_week_leaves_a_gap_in_week_numbers() {
        let programs = vec![
            occurrence("p1", "2025-01-06", "18:30:00", 10, 1),
            occurrence("p2", "2025-01-20", "18:30:00", 10, 2),
        ];
        let table = build_counter(&programs);
        assert_eq!(table.week_count, 3);
        let weeks: Vec<i64> = table.rows[0]
            .week_data
            .iter()
            .map(|c| c.week_number)
            .collect();
        assert_eq!(weeks, vec![1, 3]);
    }

    #[test]
    fn week_one_anchors_on_global_earliest_program() {
        // Wednesday series starts a week after the Monday series; its first
        // occurrence lands in week 2.
        let mut wed = occurrence("w1", "2025-01-15", "09:00:00", 8, 3);
        wed.level_id = Some("other".to_string());
        let programs = vec![occurrence("m1", "2025-01-06", "18:30:00", 10, 1), wed];
        let table = build_counter(&programs);
        assert_eq!(table.rows.len(), 2);
        let wed_row = table
            .rows
            .iter()
            .find(|r| r.day_name == "Wednesday")
            .unwrap();
        assert_eq!(wed_row.week_data[0].week_number, 2);
        assert_eq!(table.week_dates[0], "2025-01-06");
    }

    #[test]
    fn rows_sort_monday_first_then_by_label() {
        let sunday = occurrence("s1", "2025-01-12", "09:00:00", 10, 0);
        let monday_late = occurrence("m2", "2025-01-06", "19:00:00", 10, 0);
        let monday_early = occurrence("m1", "2025-01-06", "09:00:00", 10, 0);
        let table = build_counter(&[sunday, monday_late, monday_early]);
        let labels: Vec<&str> = table.rows.iter().map(|r| r.day_time.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "Mondays 7:00pm - 8:00pm",
                "Mondays 9:00am - 8:00pm",
                "Sundays 9:00am - 8:00pm"
            ]
        );
    }

    #[test]
    fn zero_capacity_flags_full_only_when_occupied() {
        assert_eq!(fill_tier(1, 0), Some("full"));
        assert_eq!(fill_tier(0, 0), None);
        assert_eq!(fill_tier(7, 10), Some("high"));
        assert_eq!(fill_tier(4, 10), None);
    }
}
