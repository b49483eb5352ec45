use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::programs::delete_program_cascading;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn package_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let price: f64 = row.get(2)?;
    let location_id: Option<String> = row.get(3)?;
    let original_id: Option<String> = row.get(4)?;
    let created_at: String = row.get(5)?;
    let location_name: Option<String> = row.get(6)?;
    let program_count: i64 = row.get(7)?;
    Ok(json!({
        "id": id,
        "name": name,
        "price": price,
        "locationId": location_id,
        "originalId": original_id,
        "createdAt": created_at,
        "locationName": location_name,
        "programCount": program_count
    }))
}

const PACKAGE_SELECT: &str = "SELECT
    pkg.id, pkg.name, pkg.price, pkg.location_id, pkg.original_id,
    pkg.created_at,
    (SELECT name FROM locations loc WHERE loc.id = pkg.location_id),
    (SELECT COUNT(*) FROM programs_packages pp WHERE pp.package_id = pkg.id)
 FROM packages pkg";

fn handle_packages_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let sql = format!("{} ORDER BY pkg.name", PACKAGE_SELECT);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], package_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(packages) => ok(&req.id, json!({ "packages": packages })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_packages_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let package_id = match req.params.get("packageId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing packageId", None),
    };

    let sql = format!("{} WHERE pkg.id = ?", PACKAGE_SELECT);
    let row = conn.query_row(&sql, [&package_id], package_json).optional();

    match row {
        Ok(Some(package)) => ok(&req.id, json!({ "package": package })),
        Ok(None) => err(&req.id, "not_found", "package not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_packages_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let price = req.params.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let location_id = req
        .params
        .get("locationId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

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
            Some(json!({ "table": "packages" })),
        );
    }

    ok(&req.id, json!({ "packageId": package_id }))
}

fn handle_packages_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let package_id = match req.params.get("packageId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing packageId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let price = req.params.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let location_id = req
        .params
        .get("locationId")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match conn.execute(
        "UPDATE packages SET name = ?, price = ?, location_id = ? WHERE id = ?",
        (&name, price, &location_id, &package_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "package not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "packages" })),
        ),
    }
}

fn delete_package_cascading(
    conn: &Connection,
    package_id: &str,
) -> Result<(), (String, &'static str)> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| (e.to_string(), "db_tx_failed"))?;

    // Registrations keep their program link; only the package reference
    // is cleared.
    tx.execute(
        "UPDATE registrations SET package_id = NULL WHERE package_id = ?",
        [package_id],
    )
    .map_err(|e| (e.to_string(), "db_update_failed"))?;
    tx.execute(
        "DELETE FROM programs_packages WHERE package_id = ?",
        [package_id],
    )
    .map_err(|e| (e.to_string(), "db_delete_failed"))?;
    tx.execute("DELETE FROM packages WHERE id = ?", [package_id])
        .map_err(|e| (e.to_string(), "db_delete_failed"))?;

    tx.commit().map_err(|e| (e.to_string(), "db_commit_failed"))
}

fn package_exists(
    conn: &Connection,
    package_id: &str,
) -> Result<bool, rusqlite::Error> {
    Ok(conn
        .query_row("SELECT 1 FROM packages WHERE id = ?", [package_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

fn handle_packages_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let package_id = match req.params.get("packageId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing packageId", None),
    };

    match package_exists(conn, &package_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "package not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    if let Err((message, code)) = delete_package_cascading(conn, &package_id) {
        return err(&req.id, code, message, None);
    }

    ok(&req.id, json!({ "ok": true }))
}

/// Deletes the package and then every program that was linked to it. The
/// two steps run back to back without a wrapping transaction; if a program
/// delete fails, the package is already gone.
fn handle_packages_delete_with_programs(
    state: &mut AppState,
    req: &Request,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let package_id = match req.params.get("packageId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing packageId", None),
    };

    match package_exists(conn, &package_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "package not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    // Capture linked program ids before the links are removed.
    let program_ids: Result<Vec<String>, _> = conn
        .prepare("SELECT program_id FROM programs_packages WHERE package_id = ?")
        .and_then(|mut stmt| {
            stmt.query_map([&package_id], |r| r.get::<_, String>(0))
                .and_then(|it| it.collect())
        });
    let program_ids = match program_ids {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    if let Err((message, code)) = delete_package_cascading(conn, &package_id) {
        return err(&req.id, code, message, None);
    }

    let mut programs_deleted = 0usize;
    for program_id in &program_ids {
        if let Err((message, code)) = delete_program_cascading(conn, program_id) {
            return err(
                &req.id,
                code,
                message,
                Some(json!({ "programsDeleted": programs_deleted })),
            );
        }
        programs_deleted += 1;
    }

    ok(&req.id, json!({ "ok": true, "programsDeleted": programs_deleted }))
}

fn handle_packages_programs(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let package_id = match req.params.get("packageId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing packageId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT pp.id, p.id, p.name, p.date, p.start_time, p.end_time
         FROM programs_packages pp
         JOIN programs p ON p.id = pp.program_id
         WHERE pp.package_id = ?
         ORDER BY p.date, p.start_time",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&package_id], |row| {
            let link_id: String = row.get(0)?;
            let program_id: String = row.get(1)?;
            let name: String = row.get(2)?;
            let date: String = row.get(3)?;
            let start_time: String = row.get(4)?;
            let end_time: String = row.get(5)?;
            Ok(json!({
                "linkId": link_id,
                "programId": program_id,
                "name": name,
                "date": date,
                "startTime": start_time,
                "endTime": end_time
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(programs) => ok(&req.id, json!({ "programs": programs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_packages_add_program(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let package_id = match req.params.get("packageId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing packageId", None),
    };
    let program_id = match req.params.get("programId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing programId", None),
    };

    let link_id = Uuid::new_v4().to_string();
    // UNIQUE(program_id, package_id) makes a duplicate link an insert error.
    match conn.execute(
        "INSERT INTO programs_packages(id, program_id, package_id) VALUES(?, ?, ?)",
        (&link_id, &program_id, &package_id),
    ) {
        Ok(_) => ok(&req.id, json!({ "linkId": link_id })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "programs_packages" })),
        ),
    }
}

fn handle_packages_remove_program(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let package_id = match req.params.get("packageId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing packageId", None),
    };
    let program_id = match req.params.get("programId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing programId", None),
    };

    match conn.execute(
        "DELETE FROM programs_packages WHERE package_id = ? AND program_id = ?",
        (&package_id, &program_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "link not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "programs_packages" })),
        ),
    }
}

fn handle_packages_players(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let package_id = match req.params.get("packageId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing packageId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT DISTINCT pl.id, pl.first_name, pl.last_name, pl.email
         FROM registrations r
         JOIN players pl ON pl.id = r.player_id
         WHERE r.package_id = ?
         ORDER BY pl.last_name, pl.first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&package_id], |row| {
            let id: String = row.get(0)?;
            let first_name: String = row.get(1)?;
            let last_name: String = row.get(2)?;
            let email: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "firstName": first_name,
                "lastName": last_name,
                "email": email
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(players) => ok(&req.id, json!({ "players": players })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "packages.list" => Some(handle_packages_list(state, req)),
        "packages.get" => Some(handle_packages_get(state, req)),
        "packages.create" => Some(handle_packages_create(state, req)),
        "packages.update" => Some(handle_packages_update(state, req)),
        "packages.delete" => Some(handle_packages_delete(state, req)),
        "packages.deleteWithPrograms" => Some(handle_packages_delete_with_programs(state, req)),
        "packages.programs" => Some(handle_packages_programs(state, req)),
        "packages.addProgram" => Some(handle_packages_add_program(state, req)),
        "packages.removeProgram" => Some(handle_packages_remove_program(state, req)),
        "packages.players" => Some(handle_packages_players(state, req)),
        _ => None,
    }
}
