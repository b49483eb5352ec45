use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

/// Levels, categories, locations and seasons share one flat shape, so one
/// handler serves all four. The table name is whitelisted, never
/// interpolated from raw input.
fn lookup_table(name: Option<&str>) -> Option<&'static str> {
    match name {
        Some("levels") => Some("levels"),
        Some("categories") => Some("categories"),
        Some("locations") => Some("locations"),
        Some("seasons") => Some("seasons"),
        _ => None,
    }
}

fn handle_reference_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(table) = lookup_table(req.params.get("table").and_then(|v| v.as_str())) else {
        return err(&req.id, "bad_params", "missing/unknown table", None);
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT id, name, created_at FROM {} ORDER BY name",
        table
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let created_at: String = row.get(2)?;
            Ok(json!({ "id": id, "name": name, "createdAt": created_at }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(items) => ok(&req.id, json!({ "items": items })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reference_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(table) = lookup_table(req.params.get("table").and_then(|v| v.as_str())) else {
        return err(&req.id, "bad_params", "missing/unknown table", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let item_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        &format!("INSERT INTO {}(id, name, created_at) VALUES(?, ?, ?)", table),
        (&item_id, &name, db::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": table })),
        );
    }

    ok(&req.id, json!({ "id": item_id, "name": name }))
}

fn handle_reference_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(table) = lookup_table(req.params.get("table").and_then(|v| v.as_str())) else {
        return err(&req.id, "bad_params", "missing/unknown table", None);
    };
    let item_id = match req.params.get("id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing id", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    match conn.execute(
        &format!("UPDATE {} SET name = ? WHERE id = ?", table),
        (&name, &item_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "item not found", None),
        Ok(_) => ok(&req.id, json!({ "id": item_id, "name": name })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": table })),
        ),
    }
}

fn handle_reference_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(table) = lookup_table(req.params.get("table").and_then(|v| v.as_str())) else {
        return err(&req.id, "bad_params", "missing/unknown table", None);
    };
    let item_id = match req.params.get("id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing id", None),
    };

    match conn.execute(&format!("DELETE FROM {} WHERE id = ?", table), [&item_id]) {
        Ok(0) => err(&req.id, "not_found", "item not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": table })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reference.list" => Some(handle_reference_list(state, req)),
        "reference.create" => Some(handle_reference_create(state, req)),
        "reference.update" => Some(handle_reference_update(state, req)),
        "reference.delete" => Some(handle_reference_delete(state, req)),
        _ => None,
    }
}
