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

fn request_ok(
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
    assert_eq!(value["ok"], true, "{} failed: {}", method, value);
    value["result"].clone()
}

// The last two program rows are incomplete (id without a name, name without
// an id) and must not be imported.
const SCHEDULE_CSV: &str = "\
Id,Name,Price,Category,DayTime,Level
p1,Monday Night Clinic,$25.00,Adult Clinics,Monday 1/6 | 6:30pm - 8:00pm,3.5-4.0
p2,Monday Night Clinic Week 2,$25.00,Adult Clinics,Monday 1/13 | 6:30pm - 8:00pm,3.5-4.0
\"p1, p2\",January Package,\"$1,800.00\",,,
p3,,$10.00,Adult Clinics,Monday 1/20 | 6:30pm - 8:00pm,3.5-4.0
,Orphan Row,$10.00,Adult Clinics,Monday 1/20 | 6:30pm - 8:00pm,3.5-4.0
";

const RAW_MAPPING: &str = r#"{
    "programId": "Id",
    "name": "Name",
    "price": "Price",
    "category": "Category",
    "dayTime": "DayTime",
    "level": "Level"
}"#;

#[test]
fn schedule_import_splits_programs_and_packages() {
    let workspace = temp_dir("clubd-import-raw");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let location = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reference.create",
        json!({ "table": "locations", "name": "Main Courts" }),
    );

    let mapping: serde_json::Value = serde_json::from_str(RAW_MAPPING).unwrap();
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.rawData",
        json!({
            "csvText": SCHEDULE_CSV,
            "mapping": mapping,
            "locationId": location["id"],
        }),
    );
    assert_eq!(imported["programsCreated"], 2);
    assert_eq!(imported["packagesCreated"], 1);
    assert_eq!(imported["linksCreated"], 2);
    assert_eq!(imported["levelsCreated"], 1);
    assert_eq!(imported["categoriesCreated"], 1);

    let programs = request_ok(&mut stdin, &mut reader, "4", "programs.list", json!({}));
    let programs = programs["programs"].as_array().unwrap();
    assert_eq!(programs.len(), 2);
    for p in programs {
        assert_eq!(p["startTime"], "18:30:00");
        assert_eq!(p["endTime"], "20:00:00");
        assert_eq!(p["price"], 25.0);
        assert_eq!(p["levelName"], "3.5-4.0");
        assert_eq!(p["categoryName"], "Adult Clinics");
        assert_eq!(p["locationName"], "Main Courts");
    }

    let packages = request_ok(&mut stdin, &mut reader, "5", "packages.list", json!({}));
    assert_eq!(packages["packages"][0]["name"], "January Package");
    assert_eq!(packages["packages"][0]["price"], 1800.0);
    assert_eq!(packages["packages"][0]["programCount"], 2);

    // A re-import reuses the level and category created on the first pass.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "import.rawData",
        json!({
            "csvText": SCHEDULE_CSV,
            "mapping": serde_json::from_str::<serde_json::Value>(RAW_MAPPING).unwrap(),
            "locationId": location["id"],
        }),
    );
    assert_eq!(again["levelsCreated"], 0);
    assert_eq!(again["categoriesCreated"], 0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn capacity_import_updates_by_original_id() {
    let workspace = temp_dir("clubd-import-capacity");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mapping: serde_json::Value = serde_json::from_str(RAW_MAPPING).unwrap();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.rawData",
        json!({ "csvText": SCHEDULE_CSV, "mapping": mapping }),
    );

    let capacity_csv = "Id,Max\nP1,12\np2,8\nghost,4\nbadrow,\n";
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.capacity",
        json!({
            "csvText": capacity_csv,
            "mapping": { "id": "Id", "maxRegistrations": "Max" },
        }),
    );
    // Original-id match is case-insensitive; ghost and badrow are skipped.
    assert_eq!(updated["updated"], 2);
    assert_eq!(updated["skipped"], 2);

    let programs = request_ok(&mut stdin, &mut reader, "4", "programs.list", json!({}));
    let mut maxes: Vec<i64> = programs["programs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["maxRegistrations"].as_i64().unwrap())
        .collect();
    maxes.sort();
    assert_eq!(maxes, vec![8, 12]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn form_responses_match_packages_then_programs() {
    let workspace = temp_dir("clubd-import-forms");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let mapping: serde_json::Value = serde_json::from_str(RAW_MAPPING).unwrap();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.rawData",
        json!({ "csvText": SCHEDULE_CSV, "mapping": mapping }),
    );

    // Cara signs up with the package's external id; Dana has no last name
    // and must be dropped without a player or registration.
    let forms_csv = "\
First,Last,Email,Phone,Signups
Alice,Adams,alice@example.com,555-1111,JANUARY   PACKAGE!
Bob,Brown,bob@example.com,,Monday Night Clinic
Alice,Adams,ALICE@example.com,,\"Monday Night Clinic Week 2, Thursday Mystery Session\"
Cara,Chen,,,p1
Dana,,dana@example.com,,Monday Night Clinic
";
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.formResponses",
        json!({
            "csvText": forms_csv,
            "mapping": {
                "firstName": "First",
                "lastName": "Last",
                "email": "Email",
                "phone": "Phone",
                "registrations": "Signups"
            },
        }),
    );

    // Alice is deduplicated by case-insensitive email; Cara has no email
    // and always gets a fresh row; Dana's row is incomplete.
    assert_eq!(imported["playersCreated"], 3);
    // Each package match expands to both linked programs: 2 for Alice's
    // package name, 2 for Cara's package id, plus 2 program-name matches.
    assert_eq!(imported["registrationsCreated"], 6);
    let errors = imported["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0],
        "Unmatched registration: \"Thursday Mystery Session\" for Alice Adams"
    );

    let registrations = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "registrations.list",
        json!({}),
    );
    let registrations = registrations["registrations"].as_array().unwrap();
    assert_eq!(registrations.len(), 6);
    let with_package = registrations
        .iter()
        .filter(|r| r["packageId"].is_string())
        .count();
    assert_eq!(with_package, 4);
    // Every expanded package registration still points at a concrete program.
    assert!(registrations.iter().all(|r| r["programId"].is_string()));

    // "p1" resolves to the package carrying that id, not the p1 program,
    // so Cara lands in both weeks of the package.
    let cara: Vec<_> = registrations
        .iter()
        .filter(|r| r["playerFirstName"] == "Cara")
        .collect();
    assert_eq!(cara.len(), 2);
    assert!(cara.iter().all(|r| r["packageName"] == "January Package"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn oversized_upload_is_rejected() {
    let workspace = temp_dir("clubd-import-cap");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let mut csv_text = String::from("Id,Max\n");
    for i in 0..10_001 {
        csv_text.push_str(&format!("row{},1\n", i));
    }
    let payload = json!({
        "id": "2",
        "method": "import.capacity",
        "params": {
            "csvText": csv_text,
            "mapping": { "id": "Id", "maxRegistrations": "Max" },
        }
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(value["ok"], false);
    assert_eq!(value["error"]["code"], "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
