/// Schema of the history database. The detector creates it; the API only reads.
///
/// One row per committed episode. `path` is the JPEG location relative to the
/// history directory, and the autoincrement id preserves commit order.
pub const HISTORY_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS history (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        seq             INTEGER NOT NULL,
        captured_at_ms  INTEGER NOT NULL,
        committed_at_ms INTEGER NOT NULL,
        score           INTEGER NOT NULL CHECK(score >= 0),
        path            TEXT    NOT NULL,
        width           INTEGER NOT NULL,
        height          INTEGER NOT NULL,
        size_bytes      INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_history_committed
        ON history(committed_at_ms);
";
