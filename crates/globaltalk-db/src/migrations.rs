use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Account rows are owned by the external auth service; the core only
        -- mirrors the identity snapshot it receives on authenticate.
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY,
            email           TEXT NOT NULL,
            nickname        TEXT NOT NULL,
            profile_image   TEXT,
            age_group       INTEGER,
            gender          TEXT,
            reputation      REAL NOT NULL DEFAULT 36.5,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Append-only point ledger. Balance is always SUM(amount).
        CREATE TABLE IF NOT EXISTS points (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         INTEGER NOT NULL REFERENCES users(id),
            amount          INTEGER NOT NULL,
            kind            TEXT NOT NULL,
            reason          TEXT,
            reference_type  TEXT,
            reference_id    TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_points_user
            ON points(user_id, created_at);

        -- One row per completed session; the durable proof that settlement ran.
        CREATE TABLE IF NOT EXISTS call_history (
            call_id             TEXT PRIMARY KEY,
            host_user_id        INTEGER NOT NULL REFERENCES users(id),
            guest_user_id       INTEGER NOT NULL REFERENCES users(id),
            call_type           TEXT NOT NULL,
            language            TEXT NOT NULL,
            topic               TEXT NOT NULL,
            started_at          TEXT NOT NULL,
            ended_at            TEXT NOT NULL,
            duration_secs       INTEGER NOT NULL,
            host_earnings       INTEGER NOT NULL,
            guest_charge        INTEGER NOT NULL,
            host_exited_early   INTEGER NOT NULL,
            penalty_points      INTEGER NOT NULL,
            guest_grace         INTEGER NOT NULL,
            end_reason          TEXT NOT NULL,
            created_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_call_history_pair
            ON call_history(host_user_id, guest_user_id, created_at);

        CREATE TABLE IF NOT EXISTS ratings (
            rating_id       INTEGER PRIMARY KEY AUTOINCREMENT,
            call_id         TEXT NOT NULL REFERENCES call_history(call_id),
            rater_user_id   INTEGER NOT NULL REFERENCES users(id),
            rated_user_id   INTEGER NOT NULL REFERENCES users(id),
            rating_score    INTEGER NOT NULL,
            rating_comment  TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(call_id, rater_user_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
