use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (poll schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE member (
                id          INTEGER PRIMARY KEY,
                role        TEXT NOT NULL,
                age         INTEGER,
                gender      TEXT
            );

            CREATE TABLE poll (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                post_id             INTEGER NOT NULL UNIQUE,
                owner_id            INTEGER NOT NULL,
                title               TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'ONGOING'
                                    CHECK (status IN ('ONGOING', 'CLOSED')),
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL,
                closed_at           TEXT,
                reserved_close_at   TEXT
            );

            CREATE INDEX idx_poll_status ON poll(status);

            CREATE TABLE poll_option (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id     INTEGER NOT NULL REFERENCES poll(id) ON DELETE CASCADE,
                content     TEXT NOT NULL
            );

            CREATE INDEX idx_poll_option_poll ON poll_option(poll_id, id);

            CREATE TABLE poll_vote (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                poll_id     INTEGER NOT NULL REFERENCES poll(id) ON DELETE CASCADE,
                option_id   INTEGER NOT NULL REFERENCES poll_option(id) ON DELETE CASCADE,
                member_id   INTEGER NOT NULL,
                CONSTRAINT uk_poll_vote_member_poll UNIQUE (poll_id, member_id)
            );

            CREATE INDEX idx_poll_vote_option ON poll_vote(option_id);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
