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

#[test]
fn create_with_packages_builds_series_and_contiguous_spans() {
    let workspace = temp_dir("clubd-series");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let level = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reference.create",
        json!({ "table": "levels", "name": "3.5-4.0" }),
    );
    let category = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reference.create",
        json!({ "table": "categories", "name": "Adult Clinics" }),
    );

    // 2025-01-06 is a Monday; five weeks split into two packages as 3 + 2.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "programs.createWithPackages",
        json!({
            "startDate": "2025-01-06",
            "numberOfWeeks": 5,
            "numberOfPackages": 2,
            "individualDayPrice": 25.0,
            "packagePerDayPrice": 20.0,
            "maxRegistrations": 8,
            "startTime": "6:30 PM",
            "endTime": "8:00 PM",
            "levelId": level["id"],
            "categoryId": category["id"],
        }),
    );
    assert_eq!(created["programsCreated"], 5);
    assert_eq!(created["packagesCreated"], 2);
    assert_eq!(created["linksCreated"], 5);

    let programs = request_ok(&mut stdin, &mut reader, "5", "programs.list", json!({}));
    let programs = programs["programs"].as_array().unwrap();
    assert_eq!(programs.len(), 5);
    // List is date-descending; the last entry is week one.
    let first = &programs[4];
    assert_eq!(first["name"], "Monday 1/6 | 6:30pm - 8:00pm (3.5-4.0)");
    assert_eq!(first["date"], "2025-01-06");
    assert_eq!(first["startTime"], "18:30:00");
    assert_eq!(first["endTime"], "20:00:00");
    assert_eq!(first["price"], 25.0);
    assert_eq!(first["maxRegistrations"], 8);
    assert_eq!(first["levelName"], "3.5-4.0");

    let packages = request_ok(&mut stdin, &mut reader, "6", "packages.list", json!({}));
    let packages = packages["packages"].as_array().unwrap();
    assert_eq!(packages.len(), 2);

    let three_week = packages
        .iter()
        .find(|p| p["name"].as_str().unwrap().contains("3 Week"))
        .expect("three week package");
    assert_eq!(
        three_week["name"],
        "Mondays 3 Week 3.5-4.0 Adult Clinics Package (1/6 - 1/20; 6:30pm - 8:00pm)"
    );
    assert_eq!(three_week["price"], 60.0);
    assert_eq!(three_week["programCount"], 3);

    let two_week = packages
        .iter()
        .find(|p| p["name"].as_str().unwrap().contains("2 Week"))
        .expect("two week package");
    assert_eq!(
        two_week["name"],
        "Mondays 2 Week 3.5-4.0 Adult Clinics Package (1/27 - 2/3; 6:30pm - 8:00pm)"
    );
    assert_eq!(two_week["price"], 40.0);
    assert_eq!(two_week["programCount"], 2);

    // Span programs are the calendar-contiguous ones.
    let linked = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "packages.programs",
        json!({ "packageId": three_week["id"] }),
    );
    let dates: Vec<&str> = linked["programs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["date"].as_str().unwrap())
        .collect();
    assert_eq!(dates, vec!["2025-01-06", "2025-01-13", "2025-01-20"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn name_overrides_and_price_override_win() {
    let workspace = temp_dir("clubd-series-overrides");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "programs.createWithPackages",
        json!({
            "startDate": "2025-03-05",
            "numberOfWeeks": 2,
            "numberOfPackages": 1,
            "individualDayPrice": 30.0,
            "packagePerDayPrice": 22.0,
            "packagePriceOverride": 99.0,
            "maxRegistrations": 6,
            "startTime": "9:00",
            "endTime": "10:30",
            "programNameOverrides": ["Opening Day", null],
            "packageNameOverrides": ["Spring Special"],
        }),
    );
    assert_eq!(created["programsCreated"], 2);

    let programs = request_ok(&mut stdin, &mut reader, "3", "programs.list", json!({}));
    let names: Vec<&str> = programs["programs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    // Date-descending: the generated week-two name, then the override.
    assert_eq!(names, vec!["Wednesday 3/12 | 9:00am - 10:30am", "Opening Day"]);

    let packages = request_ok(&mut stdin, &mut reader, "4", "packages.list", json!({}));
    assert_eq!(packages["packages"][0]["name"], "Spring Special");
    assert_eq!(packages["packages"][0]["price"], 99.0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
