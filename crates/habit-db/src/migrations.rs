use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, habits)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                telegram_id INTEGER UNIQUE,
                created_at  TEXT NOT NULL DEFAULT (datetime('now')),
                is_active   INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE habits (
                id                  TEXT PRIMARY KEY,
                user_id             TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name                TEXT NOT NULL,
                reminder_time       TEXT NOT NULL,
                completion_count    INTEGER NOT NULL DEFAULT 0 CHECK (completion_count >= 0),
                streak              INTEGER NOT NULL DEFAULT 0 CHECK (streak >= 0),
                last_completed      TEXT,
                is_active           INTEGER NOT NULL DEFAULT 1,
                job_id              TEXT,
                created_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (habit indexes)");
        conn.execute_batch(
            "
            CREATE INDEX idx_habits_user ON habits(user_id, is_active);

            -- one active habit per name and user; inactive ones may repeat
            CREATE UNIQUE INDEX idx_habits_active_name
                ON habits(user_id, name) WHERE is_active = 1;

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
