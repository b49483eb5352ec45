use crate::csv;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::series;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const PROGRAM_SELECT: &str = "SELECT
    p.id, p.name, p.date, p.start_time, p.end_time, p.price,
    p.max_registrations, p.level_id, p.category_id, p.location_id,
    p.season_id, p.original_id, p.created_at,
    (SELECT name FROM levels l WHERE l.id = p.level_id),
    (SELECT name FROM categories c WHERE c.id = p.category_id),
    (SELECT name FROM locations loc WHERE loc.id = p.location_id),
    (SELECT name FROM seasons s WHERE s.id = p.season_id)
 FROM programs p";

fn program_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let date: String = row.get(2)?;
    let start_time: String = row.get(3)?;
    let end_time: String = row.get(4)?;
    let price: f64 = row.get(5)?;
    let max_registrations: i64 = row.get(6)?;
    let level_id: Option<String> = row.get(7)?;
    let category_id: Option<String> = row.get(8)?;
    let location_id: Option<String> = row.get(9)?;
    let season_id: Option<String> = row.get(10)?;
    let original_id: Option<String> = row.get(11)?;
    let created_at: String = row.get(12)?;
    let level_name: Option<String> = row.get(13)?;
    let category_name: Option<String> = row.get(14)?;
    let location_name: Option<String> = row.get(15)?;
    let season_name: Option<String> = row.get(16)?;
    Ok(json!({
        "id": id,
        "name": name,
        "date": date,
        "startTime": start_time,
        "endTime": end_time,
        "price": price,
        "maxRegistrations": max_registrations,
        "levelId": level_id,
        "categoryId": category_id,
        "locationId": location_id,
        "seasonId": season_id,
        "originalId": original_id,
        "createdAt": created_at,
        "levelName": level_name,
        "categoryName": category_name,
        "locationName": location_name,
        "seasonName": season_name
    }))
}

fn opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn handle_programs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let sql = format!("{} ORDER BY p.date DESC, p.start_time", PROGRAM_SELECT);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], program_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(programs) => ok(&req.id, json!({ "programs": programs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_programs_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let program_id = match req.params.get("programId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing programId", None),
    };

    let sql = format!("{} WHERE p.id = ?", PROGRAM_SELECT);
    let row = conn.query_row(&sql, [&program_id], program_json).optional();

    match row {
        Ok(Some(program)) => ok(&req.id, json!({ "program": program })),
        Ok(None) => err(&req.id, "not_found", "program not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_programs_upcoming(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let limit = req
        .params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(10)
        .clamp(1, 100);

    let today = chrono::Local::now().format("%Y-%m-%d").to_string();
    let sql = format!(
        "{} WHERE p.date >= ? ORDER BY p.date, p.start_time LIMIT ?",
        PROGRAM_SELECT
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&today, limit), program_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(programs) => ok(&req.id, json!({ "programs": programs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct ProgramFields {
    name: String,
    date: String,
    start_time: String,
    end_time: String,
    price: f64,
    max_registrations: i64,
    level_id: Option<String>,
    category_id: Option<String>,
    location_id: Option<String>,
    season_id: Option<String>,
}

fn program_fields(params: &serde_json::Value) -> Result<ProgramFields, &'static str> {
    let name = opt_str(params, "name").ok_or("missing name")?;
    let date = opt_str(params, "date").ok_or("missing date")?;
    if series::parse_iso_date(&date).is_none() {
        return Err("date must be YYYY-MM-DD");
    }
    let start_time = csv::parse_time(&opt_str(params, "startTime").unwrap_or_default());
    let end_time = csv::parse_time(&opt_str(params, "endTime").unwrap_or_default());
    let price = params.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let max_registrations = params
        .get("maxRegistrations")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    Ok(ProgramFields {
        name,
        date,
        start_time,
        end_time,
        price,
        max_registrations,
        level_id: opt_str(params, "levelId"),
        category_id: opt_str(params, "categoryId"),
        location_id: opt_str(params, "locationId"),
        season_id: opt_str(params, "seasonId"),
    })
}

fn handle_programs_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let fields = match program_fields(&req.params) {
        Ok(f) => f,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let program_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO programs(id, name, date, start_time, end_time, price,
            max_registrations, level_id, category_id, location_id, season_id,
            original_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)",
        (
            &program_id,
            &fields.name,
            &fields.date,
            &fields.start_time,
            &fields.end_time,
            fields.price,
            fields.max_registrations,
            &fields.level_id,
            &fields.category_id,
            &fields.location_id,
            &fields.season_id,
            db::now_iso(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "programs" })),
        );
    }

    ok(&req.id, json!({ "programId": program_id }))
}

fn handle_programs_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let program_id = match req.params.get("programId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing programId", None),
    };
    let fields = match program_fields(&req.params) {
        Ok(f) => f,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    match conn.execute(
        "UPDATE programs SET name = ?, date = ?, start_time = ?, end_time = ?,
            price = ?, max_registrations = ?, level_id = ?, category_id = ?,
            location_id = ?, season_id = ?
         WHERE id = ?",
        (
            &fields.name,
            &fields.date,
            &fields.start_time,
            &fields.end_time,
            fields.price,
            fields.max_registrations,
            &fields.level_id,
            &fields.category_id,
            &fields.location_id,
            &fields.season_id,
            &program_id,
        ),
    ) {
        Ok(0) => err(&req.id, "not_found", "program not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "programs" })),
        ),
    }
}

pub(super) fn delete_program_cascading(
    conn: &Connection,
    program_id: &str,
) -> Result<(), (String, &'static str)> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| (e.to_string(), "db_tx_failed"))?;

    // Registrations and package links go first; no ON DELETE CASCADE.
    tx.execute(
        "DELETE FROM registrations WHERE program_id = ?",
        [program_id],
    )
    .map_err(|e| (e.to_string(), "db_delete_failed"))?;
    tx.execute(
        "DELETE FROM programs_packages WHERE program_id = ?",
        [program_id],
    )
    .map_err(|e| (e.to_string(), "db_delete_failed"))?;
    tx.execute("DELETE FROM programs WHERE id = ?", [program_id])
        .map_err(|e| (e.to_string(), "db_delete_failed"))?;

    tx.commit().map_err(|e| (e.to_string(), "db_commit_failed"))
}

fn handle_programs_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let program_id = match req.params.get("programId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing programId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM programs WHERE id = ?", [&program_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "program not found", None);
    }

    if let Err((message, code)) = delete_program_cascading(conn, &program_id) {
        return err(&req.id, code, message, None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_programs_packages(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let program_id = match req.params.get("programId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing programId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT pp.id, pkg.id, pkg.name, pkg.price
         FROM programs_packages pp
         JOIN packages pkg ON pkg.id = pp.package_id
         WHERE pp.program_id = ?
         ORDER BY pkg.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&program_id], |row| {
            let link_id: String = row.get(0)?;
            let package_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let price: f64 = row.get(3)?;
            Ok(json!({
                "linkId": link_id,
                "packageId": package_id,
                "name": name,
                "price": price
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(packages) => ok(&req.id, json!({ "packages": packages })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn lookup_name(conn: &Connection, table: &str, id: Option<&str>) -> Option<String> {
    let id = id?;
    conn.query_row(
        &format!("SELECT name FROM {} WHERE id = ?", table),
        [id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .ok()
    .flatten()
}

fn override_at(params: &serde_json::Value, key: &str, index: usize) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.get(index))
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Batch series creation: one program per week, partitioned into contiguous
/// packages. Inserts run sequentially (programs, then packages, then links)
/// with no wrapping transaction; an error partway through surfaces the
/// failure and leaves the earlier inserts in place.
fn handle_programs_create_with_packages(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let start_date = match opt_str(&req.params, "startDate")
        .as_deref()
        .and_then(series::parse_iso_date)
    {
        Some(d) => d,
        None => return err(&req.id, "bad_params", "missing/invalid startDate", None),
    };
    let number_of_weeks = match req.params.get("numberOfWeeks").and_then(|v| v.as_u64()) {
        Some(v) if v >= 1 && v <= 104 => v as usize,
        _ => return err(&req.id, "bad_params", "numberOfWeeks must be 1..=104", None),
    };
    let number_of_packages = match req.params.get("numberOfPackages").and_then(|v| v.as_u64()) {
        Some(v) if v >= 1 && v as usize <= number_of_weeks => v as usize,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "numberOfPackages must be 1..=numberOfWeeks",
                None,
            )
        }
    };

    let individual_day_price = req
        .params
        .get("individualDayPrice")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let package_per_day_price = req
        .params
        .get("packagePerDayPrice")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);
    let package_price_override = req
        .params
        .get("packagePriceOverride")
        .and_then(|v| v.as_f64());
    let max_registrations = req
        .params
        .get("maxRegistrations")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let start_time = csv::parse_time(&opt_str(&req.params, "startTime").unwrap_or_default());
    let end_time = csv::parse_time(&opt_str(&req.params, "endTime").unwrap_or_default());

    let level_id = opt_str(&req.params, "levelId");
    let category_id = opt_str(&req.params, "categoryId");
    let location_id = opt_str(&req.params, "locationId");
    let season_id = opt_str(&req.params, "seasonId");

    let level_name = lookup_name(conn, "levels", level_id.as_deref());
    let category_name = lookup_name(conn, "categories", category_id.as_deref());

    let dates = series::generate_program_dates(start_date, number_of_weeks);
    if dates.len() != number_of_weeks {
        return err(&req.id, "bad_params", "date range overflows calendar", None);
    }

    // Programs first: package links need their ids.
    let mut program_ids = Vec::with_capacity(number_of_weeks);
    for (i, date) in dates.iter().enumerate() {
        let name = override_at(&req.params, "programNameOverrides", i).unwrap_or_else(|| {
            series::format_program_name(*date, &start_time, &end_time, level_name.as_deref())
        });
        let program_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO programs(id, name, date, start_time, end_time, price,
                max_registrations, level_id, category_id, location_id, season_id,
                original_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)",
            (
                &program_id,
                &name,
                date.format("%Y-%m-%d").to_string(),
                &start_time,
                &end_time,
                individual_day_price,
                max_registrations,
                &level_id,
                &category_id,
                &location_id,
                &season_id,
                db::now_iso(),
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({
                    "table": "programs",
                    "week": i,
                    "programsCreated": program_ids.len()
                })),
            );
        }
        program_ids.push(program_id);
    }

    let spans = series::split_weeks_into_packages(number_of_weeks, number_of_packages);
    let mut package_ids = Vec::with_capacity(spans.len());
    let mut links_created = 0usize;

    for (i, span) in spans.iter().enumerate() {
        let span_start = dates[span.start_week_index];
        let span_end = dates[span.end_week_index];
        let price = series::package_price(
            package_price_override,
            package_per_day_price,
            span.weeks_count,
        );
        let name = override_at(&req.params, "packageNameOverrides", i).unwrap_or_else(|| {
            series::format_package_name(
                span_start,
                span_end,
                span.weeks_count,
                &start_time,
                &end_time,
                level_name.as_deref(),
                category_name.as_deref(),
            )
        });

        let package_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO packages(id, name, price, location_id, original_id, created_at)
             VALUES(?, ?, ?, ?, NULL, ?)",
            (&package_id, &name, price, &location_id, db::now_iso()),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({
                    "table": "packages",
                    "package": i,
                    "programsCreated": program_ids.len(),
                    "packagesCreated": package_ids.len(),
                    "linksCreated": links_created
                })),
            );
        }

        for program_id in &program_ids[span.start_week_index..=span.end_week_index] {
            let link_id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO programs_packages(id, program_id, package_id) VALUES(?, ?, ?)",
                (&link_id, program_id, &package_id),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({
                        "table": "programs_packages",
                        "programsCreated": program_ids.len(),
                        "packagesCreated": package_ids.len(),
                        "linksCreated": links_created
                    })),
                );
            }
            links_created += 1;
        }
        package_ids.push(package_id);
    }

    ok(
        &req.id,
        json!({
            "programIds": program_ids,
            "packageIds": package_ids,
            "programsCreated": program_ids.len(),
            "packagesCreated": package_ids.len(),
            "linksCreated": links_created
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programs.list" => Some(handle_programs_list(state, req)),
        "programs.get" => Some(handle_programs_get(state, req)),
        "programs.upcoming" => Some(handle_programs_upcoming(state, req)),
        "programs.create" => Some(handle_programs_create(state, req)),
        "programs.update" => Some(handle_programs_update(state, req)),
        "programs.delete" => Some(handle_programs_delete(state, req)),
        "programs.packages" => Some(handle_programs_packages(state, req)),
        "programs.createWithPackages" => Some(handle_programs_create_with_packages(state, req)),
        _ => None,
    }
}
