use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "club.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Flat name-keyed lookup tables referenced by programs/packages.
    for table in ["levels", "categories", "locations", "seasons"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}(
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    created_at TEXT NOT NULL
                )",
                table
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS players(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            credit REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_players_last_name ON players(last_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            max_registrations INTEGER NOT NULL DEFAULT 0,
            level_id TEXT,
            category_id TEXT,
            location_id TEXT,
            season_id TEXT,
            original_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(level_id) REFERENCES levels(id),
            FOREIGN KEY(category_id) REFERENCES categories(id),
            FOREIGN KEY(location_id) REFERENCES locations(id),
            FOREIGN KEY(season_id) REFERENCES seasons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programs_date ON programs(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programs_original ON programs(original_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS packages(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            price REAL NOT NULL DEFAULT 0,
            location_id TEXT,
            original_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(location_id) REFERENCES locations(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_packages_original ON packages(original_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs_packages(
            id TEXT PRIMARY KEY,
            program_id TEXT NOT NULL,
            package_id TEXT NOT NULL,
            FOREIGN KEY(program_id) REFERENCES programs(id),
            FOREIGN KEY(package_id) REFERENCES packages(id),
            UNIQUE(program_id, package_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programs_packages_program ON programs_packages(program_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_programs_packages_package ON programs_packages(package_id)",
        [],
    )?;

    // A registration may reference a program directly, a package directly,
    // or both when a package purchase expands into per-program rows.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS registrations(
            id TEXT PRIMARY KEY,
            player_id TEXT NOT NULL,
            program_id TEXT,
            package_id TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(player_id) REFERENCES players(id),
            FOREIGN KEY(program_id) REFERENCES programs(id),
            FOREIGN KEY(package_id) REFERENCES packages(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_player ON registrations(player_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_program ON registrations(program_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_registrations_package ON registrations(package_id)",
        [],
    )?;

    // Early workspaces predate spreadsheet import; add the original_id
    // columns if the tables were created without them.
    ensure_original_id(&conn, "programs")?;
    ensure_original_id(&conn, "packages")?;

    Ok(conn)
}

fn ensure_original_id(conn: &Connection, table: &str) -> anyhow::Result<()> {
    if table_has_column(conn, table, "original_id")? {
        return Ok(());
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN original_id TEXT", table),
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
