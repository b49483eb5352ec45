use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const REGISTRATION_SELECT: &str = "SELECT
    r.id, r.player_id, r.program_id, r.package_id, r.created_at,
    pl.first_name, pl.last_name,
    (SELECT name FROM programs p WHERE p.id = r.program_id),
    (SELECT name FROM packages pkg WHERE pkg.id = r.package_id)
 FROM registrations r
 JOIN players pl ON pl.id = r.player_id";

fn registration_json(row: &rusqlite::Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let player_id: String = row.get(1)?;
    let program_id: Option<String> = row.get(2)?;
    let package_id: Option<String> = row.get(3)?;
    let created_at: String = row.get(4)?;
    let first_name: String = row.get(5)?;
    let last_name: String = row.get(6)?;
    let program_name: Option<String> = row.get(7)?;
    let package_name: Option<String> = row.get(8)?;
    Ok(json!({
        "id": id,
        "playerId": player_id,
        "programId": program_id,
        "packageId": package_id,
        "createdAt": created_at,
        "playerFirstName": first_name,
        "playerLastName": last_name,
        "programName": program_name,
        "packageName": package_name
    }))
}

fn handle_registrations_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let sql = format!("{} ORDER BY r.created_at DESC, r.id", REGISTRATION_SELECT);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], registration_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(registrations) => ok(&req.id, json!({ "registrations": registrations })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_registrations_for_player(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let player_id = match req.params.get("playerId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing playerId", None),
    };

    let sql = format!(
        "{} WHERE r.player_id = ? ORDER BY r.created_at DESC, r.id",
        REGISTRATION_SELECT
    );
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&player_id], registration_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(registrations) => ok(&req.id, json!({ "registrations": registrations })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct RegistrationInput {
    player_id: String,
    program_id: Option<String>,
    package_id: Option<String>,
}

fn registration_input(params: &serde_json::Value) -> Result<RegistrationInput, &'static str> {
    let player_id = params
        .get("playerId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or("missing playerId")?;
    let program_id = params
        .get("programId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.is_empty());
    let package_id = params
        .get("packageId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.is_empty());
    if program_id.is_none() && package_id.is_none() {
        return Err("registration needs a programId or packageId");
    }
    Ok(RegistrationInput {
        player_id,
        program_id,
        package_id,
    })
}

fn insert_registration(
    conn: &Connection,
    input: &RegistrationInput,
) -> Result<String, rusqlite::Error> {
    let registration_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO registrations(id, player_id, program_id, package_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &registration_id,
            &input.player_id,
            &input.program_id,
            &input.package_id,
            db::now_iso(),
        ),
    )?;
    Ok(registration_id)
}

fn handle_registrations_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let input = match registration_input(&req.params) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    match insert_registration(conn, &input) {
        Ok(registration_id) => ok(&req.id, json!({ "registrationId": registration_id })),
        Err(e) => err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "registrations" })),
        ),
    }
}

fn handle_registrations_create_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let items = match req.params.get("registrations").and_then(|v| v.as_array()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing registrations array", None),
    };

    let mut inputs = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        match registration_input(item) {
            Ok(v) => inputs.push(v),
            Err(m) => {
                return err(
                    &req.id,
                    "bad_params",
                    m,
                    Some(json!({ "index": i })),
                )
            }
        }
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut registration_ids = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.iter().enumerate() {
        match insert_registration(&tx, input) {
            Ok(id) => registration_ids.push(id),
            Err(e) => {
                let _ = tx.rollback();
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "registrations", "index": i })),
                );
            }
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "registrationIds": registration_ids,
            "created": registration_ids.len()
        }),
    )
}

/// Unregister, optionally crediting the player first. The credit and the
/// delete are two separate statements; if the delete fails after the credit
/// lands, the credit is not reversed.
fn handle_registrations_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let registration_id = match req.params.get("registrationId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing registrationId", None),
    };
    let credit_amount = match req.params.get("issueCredit") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_f64() {
            Some(n) if n > 0.0 && n.is_finite() => Some(n),
            _ => return err(&req.id, "bad_params", "issueCredit must be > 0", None),
        },
    };

    let player_id: Option<String> = match conn
        .query_row(
            "SELECT player_id FROM registrations WHERE id = ?",
            [&registration_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(player_id) = player_id else {
        return err(&req.id, "not_found", "registration not found", None);
    };

    if let Some(amount) = credit_amount {
        if let Err(e) = conn.execute(
            "UPDATE players SET credit = credit + ? WHERE id = ?",
            (amount, &player_id),
        ) {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "players" })),
            );
        }
    }

    match conn.execute("DELETE FROM registrations WHERE id = ?", [&registration_id]) {
        Ok(0) => err(&req.id, "not_found", "registration not found", None),
        Ok(_) => ok(
            &req.id,
            json!({ "ok": true, "creditIssued": credit_amount.unwrap_or(0.0) }),
        ),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "registrations" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "registrations.list" => Some(handle_registrations_list(state, req)),
        "registrations.forPlayer" => Some(handle_registrations_for_player(state, req)),
        "registrations.create" => Some(handle_registrations_create(state, req)),
        "registrations.createBatch" => Some(handle_registrations_create_batch(state, req)),
        "registrations.delete" => Some(handle_registrations_delete(state, req)),
        _ => None,
    }
}
