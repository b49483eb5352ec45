use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn player_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let first_name: String = row.get(1)?;
    let last_name: String = row.get(2)?;
    let email: Option<String> = row.get(3)?;
    let phone: Option<String> = row.get(4)?;
    let credit: f64 = row.get(5)?;
    let created_at: String = row.get(6)?;
    Ok(json!({
        "id": id,
        "firstName": first_name,
        "lastName": last_name,
        "email": email,
        "phone": phone,
        "credit": credit,
        "createdAt": created_at
    }))
}

fn handle_players_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT id, first_name, last_name, email, phone, credit, created_at
         FROM players ORDER BY last_name, first_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], player_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(players) => ok(&req.id, json!({ "players": players })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_players_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let player_id = match req.params.get("playerId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing playerId", None),
    };

    let row = conn
        .query_row(
            "SELECT id, first_name, last_name, email, phone, credit, created_at
             FROM players WHERE id = ?",
            [&player_id],
            player_json,
        )
        .optional();

    match row {
        Ok(Some(player)) => ok(&req.id, json!({ "player": player })),
        Ok(None) => err(&req.id, "not_found", "player not found", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_players_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let phone = req
        .params
        .get("phone")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let player_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO players(id, first_name, last_name, email, phone, credit, created_at)
         VALUES(?, ?, ?, ?, ?, 0, ?)",
        (&player_id, &first_name, &last_name, &email, &phone, db::now_iso()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "players" })),
        );
    }

    ok(&req.id, json!({ "playerId": player_id }))
}

fn handle_players_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let player_id = match req.params.get("playerId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing playerId", None),
    };
    let first_name = match req.params.get("firstName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing firstName", None),
    };
    let last_name = match req.params.get("lastName").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing lastName", None),
    };
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let phone = req
        .params
        .get("phone")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match conn.execute(
        "UPDATE players SET first_name = ?, last_name = ?, email = ?, phone = ? WHERE id = ?",
        (&first_name, &last_name, &email, &phone, &player_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "player not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "players" })),
        ),
    }
}

fn handle_players_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let player_id = match req.params.get("playerId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing playerId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM players WHERE id = ?", [&player_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "player not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM registrations WHERE player_id = ?", [&player_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "registrations" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM players WHERE id = ?", [&player_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "players" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_players_issue_credit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let player_id = match req.params.get("playerId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing playerId", None),
    };
    let amount = match req.params.get("amount").and_then(|v| v.as_f64()) {
        Some(v) if v > 0.0 && v.is_finite() => v,
        _ => return err(&req.id, "bad_params", "amount must be > 0", None),
    };

    match conn.execute(
        "UPDATE players SET credit = credit + ? WHERE id = ?",
        (amount, &player_id),
    ) {
        Ok(0) => return err(&req.id, "not_found", "player not found", None),
        Ok(_) => {}
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "players" })),
            )
        }
    }

    let balance: Result<f64, _> = conn.query_row(
        "SELECT credit FROM players WHERE id = ?",
        [&player_id],
        |r| r.get(0),
    );
    match balance {
        Ok(credit) => ok(&req.id, json!({ "credit": credit })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "players.list" => Some(handle_players_list(state, req)),
        "players.get" => Some(handle_players_get(state, req)),
        "players.create" => Some(handle_players_create(state, req)),
        "players.update" => Some(handle_players_update(state, req)),
        "players.delete" => Some(handle_players_delete(state, req)),
        "players.issueCredit" => Some(handle_players_issue_credit(state, req)),
        _ => None,
    }
}
