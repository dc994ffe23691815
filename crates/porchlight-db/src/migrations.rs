use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id                 TEXT PRIMARY KEY,
            phone              TEXT UNIQUE,
            email              TEXT UNIQUE,
            display_name       TEXT NOT NULL,
            role               TEXT NOT NULL,
            volunteer_verified INTEGER NOT NULL DEFAULT 0,
            password_hash      TEXT,
            created_at         TEXT NOT NULL,
            updated_at         TEXT NOT NULL,
            version            INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS requests (
            id           TEXT PRIMARY KEY,
            elderly_id   TEXT NOT NULL REFERENCES users(id),
            title        TEXT NOT NULL,
            details      TEXT NOT NULL,
            status       TEXT NOT NULL,
            category     TEXT,
            location_lat REAL,
            location_lng REAL,
            address      TEXT,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            version      INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_requests_status
            ON requests(status, created_at);

        CREATE INDEX IF NOT EXISTS idx_requests_elderly
            ON requests(elderly_id);

        CREATE TABLE IF NOT EXISTS request_photos (
            id           TEXT PRIMARY KEY,
            request_id   TEXT NOT NULL REFERENCES requests(id) ON DELETE CASCADE,
            url          TEXT NOT NULL,
            content_type TEXT,
            position     INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_photos_request
            ON request_photos(request_id, position);

        -- At most one assignment per request.
        CREATE TABLE IF NOT EXISTS assignments (
            id           TEXT PRIMARY KEY,
            request_id   TEXT NOT NULL UNIQUE REFERENCES requests(id),
            volunteer_id TEXT NOT NULL REFERENCES users(id),
            accepted_at  TEXT,
            arrived_at   TEXT,
            completed_at TEXT,
            cancelled_at TEXT,
            created_at   TEXT NOT NULL,
            version      INTEGER NOT NULL DEFAULT 0
        );
        ",
    )?;

    info!("Database migrations complete");

    Ok(())
}
