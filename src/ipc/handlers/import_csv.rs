use crate::csv;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Upload guard. Imports run row by row against the embedded store, so one
/// oversized spreadsheet would hold the request loop for the whole pass.
const IMPORT_MAX_ROWS: usize = 10_000;

/// Operator-supplied column mapping, checked against the upload's headers
/// up front. A required field with no mapped column, or a mapped column
/// absent from the CSV, rejects the upload instead of silently reading
/// empty cells.
struct ColumnMap<'a> {
    fields: HashMap<&'static str, &'a str>,
}

impl<'a> ColumnMap<'a> {
    fn resolve(
        mapping: &'a serde_json::Value,
        headers: &[String],
        required: &[&'static str],
        optional: &[&'static str],
    ) -> Result<Self, String> {
        let mut fields = HashMap::new();
        for &field in required {
            let header = mapping
                .get(field)
                .and_then(|v| v.as_str())
                .ok_or_else(|| format!("mapping is missing required field: {}", field))?;
            if !headers.iter().any(|h| h == header) {
                return Err(format!(
                    "mapped column \"{}\" not found in upload headers",
                    header
                ));
            }
            fields.insert(field, header);
        }
        for &field in optional {
            if let Some(header) = mapping.get(field).and_then(|v| v.as_str()) {
                if headers.iter().any(|h| h == header) {
                    fields.insert(field, header);
                }
            }
        }
        Ok(Self { fields })
    }

    fn cell(&self, row: &HashMap<String, String>, field: &'static str) -> String {
        self.fields
            .get(field)
            .and_then(|header| row.get(*header))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

fn parse_upload<'a>(
    req: &'a Request,
) -> Result<(csv::ParsedCsv, &'a serde_json::Value), serde_json::Value> {
    let csv_text = match req.params.get("csvText").and_then(|v| v.as_str()) {
        Some(v) => v,
        None => return Err(err(&req.id, "bad_params", "missing csvText", None)),
    };
    let mapping = match req.params.get("mapping") {
        Some(v) if v.is_object() => v,
        _ => return Err(err(&req.id, "bad_params", "missing mapping", None)),
    };

    let parsed = csv::parse_csv(csv_text);
    if parsed.rows.len() > IMPORT_MAX_ROWS {
        return Err(err(
            &req.id,
            "bad_params",
            format!("upload exceeds {} rows", IMPORT_MAX_ROWS),
            Some(json!({ "rows": parsed.rows.len() })),
        ));
    }
    Ok((parsed, mapping))
}

/// Case-insensitive resolve-or-create against one of the lookup tables.
/// Seeded from the table up front so repeated rows hit the map, not the db.
struct LookupCache {
    table: &'static str,
    by_lower_name: HashMap<String, String>,
    created: usize,
}

impl LookupCache {
    fn load(conn: &Connection, table: &'static str) -> rusqlite::Result<Self> {
        let mut stmt = conn.prepare(&format!("SELECT id, name FROM {}", table))?;
        let by_lower_name = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let name: String = row.get(1)?;
                Ok((name.to_lowercase(), id))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self {
            table,
            by_lower_name,
            created: 0,
        })
    }

    fn resolve(&mut self, conn: &Connection, name: &str) -> rusqlite::Result<Option<String>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let key = name.to_lowercase();
        if let Some(id) = self.by_lower_name.get(&key) {
            return Ok(Some(id.clone()));
        }
        let id = Uuid::new_v4().to_string();
        conn.execute(
            &format!(
                "INSERT INTO {}(id, name, created_at) VALUES(?, ?, ?)",
                self.table
            ),
            (&id, name, db::now_iso()),
        )?;
        self.by_lower_name.insert(key, id.clone());
        self.created += 1;
        Ok(Some(id))
    }
}

/// A schedule row, typed after classification. A row whose id cell splits
/// into more than one token is a package referencing those program ids;
/// everything else is a single program. Either way the first token is the
/// row's own external id, so package registrations can later be matched by
/// it just like program registrations.
enum ScheduleRow {
    Program {
        original_id: String,
        name: String,
        price: f64,
        item: csv::ItemDateTime,
        level: String,
        category: String,
    },
    Package {
        original_id: String,
        name: String,
        price: f64,
        referenced_ids: Vec<String>,
    },
}

fn classify_schedule_row(row: &HashMap<String, String>, columns: &ColumnMap) -> Option<ScheduleRow> {
    let id_tokens = csv::parse_multiple_values(&columns.cell(row, "programId"));
    let name = columns.cell(row, "name");
    let original_id = id_tokens.first().cloned()?;
    if name.is_empty() {
        return None;
    }
    let price = csv::parse_price(&columns.cell(row, "price"));

    if id_tokens.len() > 1 {
        return Some(ScheduleRow::Package {
            original_id,
            name,
            price,
            referenced_ids: id_tokens,
        });
    }

    Some(ScheduleRow::Program {
        original_id,
        name,
        price,
        item: csv::parse_date_time_from_item(&columns.cell(row, "dayTime")),
        level: columns.cell(row, "level"),
        category: columns.cell(row, "category"),
    })
}

fn handle_import_raw_data(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (parsed, mapping) = match parse_upload(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let columns = match ColumnMap::resolve(
        mapping,
        &parsed.headers,
        &["programId", "name"],
        &["price", "category", "dayTime", "level"],
    ) {
        Ok(c) => c,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let location_id = req
        .params
        .get("locationId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.is_empty());
    let season_id = req
        .params
        .get("seasonId")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    let mut levels = match LookupCache::load(conn, "levels") {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut categories = match LookupCache::load(conn, "categories") {
        Ok(c) => c,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows: Vec<ScheduleRow> = parsed
        .rows
        .iter()
        .filter_map(|row| classify_schedule_row(row, &columns))
        .collect();

    let mut programs_created = 0usize;
    // original id (lowercased) -> new program id, for link resolution.
    let mut program_ids_by_original: HashMap<String, String> = HashMap::new();

    let progress = |programs: usize, packages: usize, links: usize| {
        json!({
            "programsCreated": programs,
            "packagesCreated": packages,
            "linksCreated": links
        })
    };

    // Programs first so package rows can link against them.
    for row in &rows {
        let ScheduleRow::Program {
            original_id,
            name,
            price,
            item,
            level,
            category,
        } = row
        else {
            continue;
        };

        let date = item.date.clone().unwrap_or_else(|| csv::parse_date(""));
        let level_id = match levels.resolve(conn, level) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "levels" })),
                )
            }
        };
        let category_id = match categories.resolve(conn, category) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "categories" })),
                )
            }
        };

        let program_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO programs(id, name, date, start_time, end_time, price,
                max_registrations, level_id, category_id, location_id, season_id,
                original_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?)",
            (
                &program_id,
                name,
                &date,
                &item.start_time,
                &item.end_time,
                price,
                &level_id,
                &category_id,
                &location_id,
                &season_id,
                original_id,
                db::now_iso(),
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(progress(programs_created, 0, 0)),
            );
        }
        program_ids_by_original.insert(original_id.to_lowercase(), program_id);
        programs_created += 1;
    }

    let mut packages_created = 0usize;
    let mut links_created = 0usize;
    for row in &rows {
        let ScheduleRow::Package {
            original_id,
            name,
            price,
            referenced_ids,
        } = row
        else {
            continue;
        };

        let package_id = Uuid::new_v4().to_string();
        if let Err(e) = conn.execute(
            "INSERT INTO packages(id, name, price, location_id, original_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &package_id,
                name,
                price,
                &location_id,
                original_id,
                db::now_iso(),
            ),
        ) {
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(progress(programs_created, packages_created, links_created)),
            );
        }
        packages_created += 1;

        for reference in referenced_ids {
            // References outside this upload are dropped without comment.
            let Some(program_id) = program_ids_by_original.get(&reference.to_lowercase()) else {
                continue;
            };
            let link_id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO programs_packages(id, program_id, package_id) VALUES(?, ?, ?)",
                (&link_id, program_id, &package_id),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(progress(programs_created, packages_created, links_created)),
                );
            }
            links_created += 1;
        }
    }

    ok(
        &req.id,
        json!({
            "programsCreated": programs_created,
            "packagesCreated": packages_created,
            "linksCreated": links_created,
            "levelsCreated": levels.created,
            "categoriesCreated": categories.created
        }),
    )
}

fn handle_import_capacity(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (parsed, mapping) = match parse_upload(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let columns = match ColumnMap::resolve(
        mapping,
        &parsed.headers,
        &["id", "maxRegistrations"],
        &[],
    ) {
        Ok(c) => c,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let mut updated = 0usize;
    let mut skipped = 0usize;
    for row in &parsed.rows {
        let original_id = columns.cell(row, "id");
        let max: Option<i64> = columns.cell(row, "maxRegistrations").parse().ok();
        let (Some(max), false) = (max, original_id.is_empty()) else {
            skipped += 1;
            continue;
        };

        match conn.execute(
            "UPDATE programs SET max_registrations = ? WHERE LOWER(original_id) = LOWER(?)",
            (max, &original_id),
        ) {
            Ok(0) => skipped += 1,
            Ok(_) => updated += 1,
            Err(e) => {
                return err(
                    &req.id,
                    "db_update_failed",
                    e.to_string(),
                    Some(json!({ "table": "programs", "updated": updated })),
                )
            }
        }
    }

    ok(&req.id, json!({ "updated": updated, "skipped": skipped }))
}

struct MatchIndex {
    package_by_norm_name: HashMap<String, String>,
    package_by_original: HashMap<String, String>,
    program_by_norm_name: HashMap<String, String>,
    program_by_original: HashMap<String, String>,
    package_programs: HashMap<String, Vec<String>>,
}

enum Match {
    Package(String),
    Program(String),
}

impl MatchIndex {
    fn load(conn: &Connection) -> rusqlite::Result<Self> {
        let mut package_by_norm_name = HashMap::new();
        let mut package_by_original = HashMap::new();
        let mut stmt = conn.prepare("SELECT id, name, original_id FROM packages")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        for row in rows {
            let (id, name, original_id) = row?;
            package_by_norm_name.insert(csv::normalize_for_matching(&name), id.clone());
            if let Some(orig) = original_id {
                package_by_original.insert(orig.to_lowercase(), id);
            }
        }

        let mut program_by_norm_name = HashMap::new();
        let mut program_by_original = HashMap::new();
        let mut stmt = conn.prepare("SELECT id, name, original_id FROM programs")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        for row in rows {
            let (id, name, original_id) = row?;
            program_by_norm_name.insert(csv::normalize_for_matching(&name), id.clone());
            if let Some(orig) = original_id {
                program_by_original.insert(orig.to_lowercase(), id);
            }
        }

        let mut package_programs: HashMap<String, Vec<String>> = HashMap::new();
        let mut stmt = conn.prepare("SELECT package_id, program_id FROM programs_packages")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (package_id, program_id) = row?;
            package_programs.entry(package_id).or_default().push(program_id);
        }

        Ok(Self {
            package_by_norm_name,
            package_by_original,
            program_by_norm_name,
            program_by_original,
            package_programs,
        })
    }

    /// Package matches beat program matches; names beat original ids.
    fn resolve(&self, text: &str) -> Option<Match> {
        let norm = csv::normalize_for_matching(text);
        let lower = text.trim().to_lowercase();
        if let Some(id) = self
            .package_by_norm_name
            .get(&norm)
            .or_else(|| self.package_by_original.get(&lower))
        {
            return Some(Match::Package(id.clone()));
        }
        if let Some(id) = self
            .program_by_norm_name
            .get(&norm)
            .or_else(|| self.program_by_original.get(&lower))
        {
            return Some(Match::Program(id.clone()));
        }
        None
    }
}

struct FormRow {
    first_name: String,
    last_name: String,
    email: String,
    phone: String,
    registrations: Vec<String>,
}

fn form_row(row: &HashMap<String, String>, columns: &ColumnMap) -> Option<FormRow> {
    // Both names are required; a half-filled row is noise, not a player.
    let first_name = columns.cell(row, "firstName");
    let last_name = columns.cell(row, "lastName");
    if first_name.is_empty() || last_name.is_empty() {
        return None;
    }
    Some(FormRow {
        first_name,
        last_name,
        email: columns.cell(row, "email"),
        phone: columns.cell(row, "phone"),
        registrations: csv::parse_multiple_values(&columns.cell(row, "registrations")),
    })
}

/// Sign-up form import: resolve or create each player, then turn every
/// registration string on the row into concrete program registrations.
fn handle_import_form_responses(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let (parsed, mapping) = match parse_upload(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let columns = match ColumnMap::resolve(
        mapping,
        &parsed.headers,
        &["firstName", "lastName", "registrations"],
        &["email", "phone"],
    ) {
        Ok(c) => c,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let index = match MatchIndex::load(conn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut players_by_email: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = match conn.prepare(
            "SELECT id, email FROM players WHERE email IS NOT NULL AND email != ''",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        });
        match rows.and_then(|it| it.collect::<Result<Vec<_>, _>>()) {
            Ok(pairs) => {
                for (id, email) in pairs {
                    players_by_email.insert(email.to_lowercase(), id);
                }
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let mut players_created = 0usize;
    let mut registrations_created = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for row in parsed.rows.iter().filter_map(|r| form_row(r, &columns)) {
        // Rows without an email always get a fresh player row.
        let player_id = match players_by_email.get(&row.email.to_lowercase()) {
            Some(id) if !row.email.is_empty() => id.clone(),
            _ => {
                let player_id = Uuid::new_v4().to_string();
                if let Err(e) = conn.execute(
                    "INSERT INTO players(id, first_name, last_name, email, phone, credit, created_at)
                     VALUES(?, ?, ?, ?, ?, 0, ?)",
                    (
                        &player_id,
                        &row.first_name,
                        &row.last_name,
                        if row.email.is_empty() { None } else { Some(&row.email) },
                        if row.phone.is_empty() { None } else { Some(&row.phone) },
                        db::now_iso(),
                    ),
                ) {
                    return err(
                        &req.id,
                        "db_insert_failed",
                        e.to_string(),
                        Some(json!({
                            "table": "players",
                            "playersCreated": players_created,
                            "registrationsCreated": registrations_created
                        })),
                    );
                }
                if !row.email.is_empty() {
                    players_by_email.insert(row.email.to_lowercase(), player_id.clone());
                }
                players_created += 1;
                player_id
            }
        };

        for text in &row.registrations {
            let targets: Vec<(Option<String>, Option<String>)> = match index.resolve(text) {
                Some(Match::Package(package_id)) => index
                    .package_programs
                    .get(&package_id)
                    .map(|program_ids| {
                        program_ids
                            .iter()
                            .map(|pid| (Some(pid.clone()), Some(package_id.clone())))
                            .collect()
                    })
                    .unwrap_or_default(),
                Some(Match::Program(program_id)) => vec![(Some(program_id), None)],
                None => {
                    errors.push(format!(
                        "Unmatched registration: \"{}\" for {} {}",
                        text, row.first_name, row.last_name
                    ));
                    continue;
                }
            };

            for (program_id, package_id) in targets {
                let registration_id = Uuid::new_v4().to_string();
                if let Err(e) = conn.execute(
                    "INSERT INTO registrations(id, player_id, program_id, package_id, created_at)
                     VALUES(?, ?, ?, ?, ?)",
                    (
                        &registration_id,
                        &player_id,
                        &program_id,
                        &package_id,
                        db::now_iso(),
                    ),
                ) {
                    return err(
                        &req.id,
                        "db_insert_failed",
                        e.to_string(),
                        Some(json!({
                            "table": "registrations",
                            "playersCreated": players_created,
                            "registrationsCreated": registrations_created
                        })),
                    );
                }
                registrations_created += 1;
            }
        }
    }

    ok(
        &req.id,
        json!({
            "playersCreated": players_created,
            "registrationsCreated": registrations_created,
            "errors": errors
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "import.rawData" => Some(handle_import_raw_data(state, req)),
        "import.capacity" => Some(handle_import_capacity(state, req)),
        "import.formResponses" => Some(handle_import_form_responses(state, req)),
        _ => None,
    }
}
