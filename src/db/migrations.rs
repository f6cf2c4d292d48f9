use rusqlite::{Connection, OptionalExtension};

/// Written to `meta.format`; anything else is not one of our index files.
pub const FORMAT_TAG: &str = "codegraph-index";
/// Bumped on any change to the tables below. Older or newer files are rebuilt, never migrated.
pub const FORMAT_VERSION: i64 = 2;

pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE files (
            path TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            size INTEGER NOT NULL,
            modified INTEGER NOT NULL,
            module TEXT NOT NULL,
            parse_error TEXT,
            imports TEXT NOT NULL
        );

        CREATE TABLE symbols (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            qualified_name TEXT NOT NULL,
            module TEXT NOT NULL,
            language TEXT NOT NULL,
            kind TEXT NOT NULL,
            is_async INTEGER NOT NULL,
            file TEXT NOT NULL,
            line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            parent_id TEXT,
            signature TEXT,
            docstring TEXT,
            parameters TEXT NOT NULL,
            decorators TEXT NOT NULL
        );

        CREATE INDEX idx_symbols_file ON symbols(file);

        CREATE TABLE edges (
            seq INTEGER PRIMARY KEY,
            caller_id TEXT NOT NULL,
            callee_id TEXT,
            callee_name TEXT NOT NULL,
            resolution TEXT NOT NULL,
            candidates TEXT NOT NULL,
            file TEXT NOT NULL,
            line INTEGER NOT NULL,
            col INTEGER NOT NULL
        );
        ",
    )
}

/// Checks the format tag and version before any payload is read.
pub fn check_format(conn: &Connection) -> Result<(), String> {
    let tag = meta_value(conn, "format")?;
    if tag.as_deref() != Some(FORMAT_TAG) {
        return Err(format!(
            "format tag is {}, expected {FORMAT_TAG}",
            tag.as_deref().unwrap_or("missing")
        ));
    }
    let version = meta_value(conn, "format_version")?
        .and_then(|value| value.parse::<i64>().ok())
        .ok_or_else(|| "format_version is missing".to_string())?;
    if version != FORMAT_VERSION {
        return Err(format!(
            "format_version is {version}, this build reads {FORMAT_VERSION}"
        ));
    }
    Ok(())
}

pub fn meta_value(conn: &Connection, key: &str) -> Result<Option<String>, String> {
    conn.query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
        row.get::<_, String>(0)
    })
    .optional()
    .map_err(|err| err.to_string())
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        [key, value],
    )?;
    Ok(())
}
