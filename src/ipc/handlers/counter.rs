use crate::counter::{build_counter, ProgramOccurrence};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::series;

fn date_bound(params: &serde_json::Value, key: &str) -> Result<Option<String>, ()> {
    match params.get(key).and_then(|v| v.as_str()) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => match series::parse_iso_date(s.trim()) {
            Some(d) => Ok(Some(d.format("%Y-%m-%d").to_string())),
            None => Err(()),
        },
    }
}

fn handle_counter_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Ok(start_date) = date_bound(&req.params, "startDate") else {
        return err(&req.id, "bad_params", "startDate must be YYYY-MM-DD", None);
    };
    let Ok(end_date) = date_bound(&req.params, "endDate") else {
        return err(&req.id, "bad_params", "endDate must be YYYY-MM-DD", None);
    };

    let mut sql = String::from(
        "SELECT p.id, p.date, p.start_time, p.end_time, p.max_registrations,
            p.level_id, p.category_id,
            (SELECT name FROM levels l WHERE l.id = p.level_id),
            (SELECT name FROM categories c WHERE c.id = p.category_id),
            (SELECT COUNT(*) FROM registrations r WHERE r.program_id = p.id)
         FROM programs p WHERE 1 = 1",
    );
    let mut bindings: Vec<String> = Vec::new();
    if let Some(start) = start_date {
        sql.push_str(" AND p.date >= ?");
        bindings.push(start);
    }
    if let Some(end) = end_date {
        sql.push_str(" AND p.date <= ?");
        bindings.push(end);
    }
    sql.push_str(" ORDER BY p.date");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map(rusqlite::params_from_iter(bindings.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
                row.get::<_, i64>(9)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Rows with an unparseable date cannot be placed on the week grid.
    let programs: Vec<ProgramOccurrence> = rows
        .into_iter()
        .filter_map(
            |(id, date, start_time, end_time, max, level_id, category_id, level_name, category_name, count)| {
                let date = series::parse_iso_date(&date)?;
                Some(ProgramOccurrence {
                    id,
                    date,
                    start_time,
                    end_time,
                    max_registrations: max,
                    level_id,
                    category_id,
                    level_name,
                    category_name,
                    registration_count: count,
                })
            },
        )
        .collect();

    let table = build_counter(&programs);
    match serde_json::to_value(&table) {
        Ok(value) => ok(&req.id, value),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "counter.get" => Some(handle_counter_get(state, req)),
        _ => None,
    }
}
