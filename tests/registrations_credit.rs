use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_clubd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn clubd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn raw_request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = raw_request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], true, "{}", value);
    value["result"].clone()
}

#[test]
fn unregister_with_credit_refunds_then_deletes() {
    let workspace = temp_dir("clubd-credit");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let player = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "players.create",
        json!({ "firstName": "Dana", "lastName": "Diaz", "email": "dana@example.com" }),
    );
    let program = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "programs.create",
        json!({
            "name": "Drop-in",
            "date": "2025-02-03",
            "startTime": "18:00",
            "endTime": "19:30",
            "price": 20.0,
        }),
    );

    let issued = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "players.issueCredit",
        json!({ "playerId": player["playerId"], "amount": 10.0 }),
    );
    assert_eq!(issued["credit"], 10.0);

    let registration = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "registrations.create",
        json!({ "playerId": player["playerId"], "programId": program["programId"] }),
    );

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "registrations.delete",
        json!({
            "registrationId": registration["registrationId"],
            "issueCredit": 20.0,
        }),
    );
    assert_eq!(deleted["creditIssued"], 20.0);

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "players.get",
        json!({ "playerId": player["playerId"] }),
    );
    assert_eq!(fetched["player"]["credit"], 30.0);

    let remaining = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "registrations.forPlayer",
        json!({ "playerId": player["playerId"] }),
    );
    assert_eq!(remaining["registrations"].as_array().unwrap().len(), 0);

    // Delete without credit leaves the balance alone.
    let registration = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "registrations.create",
        json!({ "playerId": player["playerId"], "programId": program["programId"] }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "registrations.delete",
        json!({ "registrationId": registration["registrationId"] }),
    );
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "players.get",
        json!({ "playerId": player["playerId"] }),
    );
    assert_eq!(fetched["player"]["credit"], 30.0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn batch_create_is_all_or_nothing() {
    let workspace = temp_dir("clubd-reg-batch");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let player = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "players.create",
        json!({ "firstName": "Eli", "lastName": "Estes" }),
    );
    let p1 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "programs.create",
        json!({ "name": "A", "date": "2025-02-03", "startTime": "9:00", "endTime": "10:00" }),
    );
    let p2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "programs.create",
        json!({ "name": "B", "date": "2025-02-10", "startTime": "9:00", "endTime": "10:00" }),
    );

    let batch = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "registrations.createBatch",
        json!({
            "registrations": [
                { "playerId": player["playerId"], "programId": p1["programId"] },
                { "playerId": player["playerId"], "programId": p2["programId"] },
            ]
        }),
    );
    assert_eq!(batch["created"], 2);

    // A row missing both targets rejects the whole batch before any insert.
    let bad = raw_request(
        &mut stdin,
        &mut reader,
        "6",
        "registrations.createBatch",
        json!({
            "registrations": [
                { "playerId": player["playerId"], "programId": p1["programId"] },
                { "playerId": player["playerId"] },
            ]
        }),
    );
    assert_eq!(bad["ok"], false);
    assert_eq!(bad["error"]["code"], "bad_params");
    assert_eq!(bad["error"]["details"]["index"], 1);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "registrations.list",
        json!({}),
    );
    assert_eq!(listed["registrations"].as_array().unwrap().len(), 2);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
