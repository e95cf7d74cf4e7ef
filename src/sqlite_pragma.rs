//! SQLite connection tuning shared by every connection the node opens

use rusqlite::Connection;
use std::time::Duration;

/// Apply node PRAGMAs: WAL journaling, NORMAL sync, enforced foreign keys
/// and a busy timeout so readers outside the node (sqlite3 shell, backups)
/// don't fail writers immediately.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    // journal_mode returns a row, so pragma_update is used rather than execute
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}
