use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS capsules (
            id          TEXT PRIMARY KEY,
            owner_id    TEXT NOT NULL,
            title       TEXT NOT NULL,
            category    TEXT NOT NULL DEFAULT '',
            year        INTEGER,
            release_at  TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            content_ref TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_links (
            capsule_id   TEXT NOT NULL REFERENCES capsules(id),
            group_id     TEXT NOT NULL,
            is_opened    INTEGER NOT NULL DEFAULT 0,
            opened_at    TEXT,
            scheduled_at TEXT NOT NULL,
            PRIMARY KEY (capsule_id, group_id)
        );

        CREATE INDEX IF NOT EXISTS idx_group_links_group
            ON group_links(group_id, is_opened);

        CREATE TABLE IF NOT EXISTS pending_reminders (
            capsule_id  TEXT PRIMARY KEY REFERENCES capsules(id),
            fire_at     TEXT NOT NULL,
            handle      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS group_members (
            group_id    TEXT NOT NULL,
            user_id     TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS content_grants (
            content_ref TEXT NOT NULL,
            group_id    TEXT NOT NULL,
            granted_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (content_ref, group_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
