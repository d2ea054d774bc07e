use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Result as SqlResult};

/// How long a statement waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite connection configured for the auction store
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) a database file
    pub fn new<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::configure(conn)
    }

    pub fn in_memory() -> SqlResult<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> SqlResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn })
    }

    /// File backing the connection; `None` for in-memory databases.
    pub fn path(&self) -> Option<&str> {
        self.conn.path().filter(|path| !path.is_empty())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}
