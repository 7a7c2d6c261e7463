//! Forma persistence: minimal SQLite state store for synthesized resources.
//! Keyed by resource address; keeps the last few states per address as history.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use forma_core::{SynthesizedState, VersionToken};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// States kept per address, newest first.
pub const HISTORY_DEPTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredState {
    pub address: String,
    pub type_name: String,
    pub ts: i64,
    pub state: SynthesizedState,
}

pub trait Store {
    fn put_state(&self, row: &StoredState) -> Result<()>;
    /// Newest first, at most `limit` (default [`HISTORY_DEPTH`]).
    fn history(&self, address: &str, limit: Option<usize>) -> Result<Vec<StoredState>>;
    /// Removes every row for the address; returns how many were removed.
    fn remove(&self, address: &str) -> Result<usize>;
    fn addresses(&self) -> Result<Vec<String>>;

    fn latest(&self, address: &str) -> Result<Option<StoredState>> {
        Ok(self.history(address, Some(1))?.into_iter().next())
    }
}

/// SQLite-backed store. Simple, synchronous.
pub struct SqliteStore {
    db: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("FORMA_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::init(db)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory().context("opening in-memory sqlite db")?)
    }

    fn init(db: rusqlite::Connection) -> Result<Self> {
        let started = std::time::Instant::now();
        db.execute(
            "CREATE TABLE IF NOT EXISTS resource_state (
                address     TEXT NOT NULL,
                type_name   TEXT NOT NULL,
                version     TEXT NOT NULL,
                api_version TEXT NOT NULL,
                kind        TEXT NOT NULL,
                ts          INTEGER NOT NULL,
                manifest    BLOB NOT NULL
            )",
            [],
        )
        .context("creating resource_state table")?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_resource_state_addr_ts ON resource_state(address, ts DESC)",
            [],
        )
        .ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: std::sync::Mutex::new(db) })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.db.lock().map_err(|_| anyhow!("state db mutex poisoned"))
    }
}

impl Store for SqliteStore {
    fn put_state(&self, row: &StoredState) -> Result<()> {
        let started = std::time::Instant::now();
        let mut db = self.conn()?;
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO resource_state(address, type_name, version, api_version, kind, ts, manifest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            (
                &row.address,
                &row.type_name,
                row.state.version.to_string(),
                &row.state.api_version,
                &row.state.kind,
                row.ts,
                maybe_compress(&row.state.manifest),
            ),
        )
        .with_context(|| format!("writing state for {}", row.address))?;
        // Keep latest HISTORY_DEPTH by ts per address (delete older rows by rowid)
        tx.execute(
            "DELETE FROM resource_state
             WHERE address = ?1
               AND rowid NOT IN (
                   SELECT rowid FROM resource_state WHERE address = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2
               )",
            (&row.address, HISTORY_DEPTH as i64),
        )?;
        tx.commit()?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        debug!(address = %row.address, version = %row.state.version, "state stored");
        Ok(())
    }

    fn history(&self, address: &str, limit: Option<usize>) -> Result<Vec<StoredState>> {
        let started = std::time::Instant::now();
        let cap = limit.unwrap_or(HISTORY_DEPTH);
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT type_name, version, api_version, kind, ts, manifest FROM resource_state
             WHERE address = ?1 ORDER BY ts DESC, rowid DESC LIMIT ?2",
        )?;
        let mut rows = stmt.query((address, cap as i64))?;
        let mut out: Vec<StoredState> = Vec::new();
        while let Some(row) = rows.next()? {
            let type_name: String = row.get(0)?;
            let version: String = row.get(1)?;
            let api_version: String = row.get(2)?;
            let kind: String = row.get(3)?;
            let ts: i64 = row.get(4)?;
            let manifest: Vec<u8> = row.get(5)?;
            let version: VersionToken = version
                .parse()
                .with_context(|| format!("corrupt version token {:?} for {}", version, address))?;
            out.push(StoredState {
                address: address.to_string(),
                type_name,
                ts,
                state: SynthesizedState { version, api_version, kind, manifest: maybe_decompress(&manifest) },
            });
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn remove(&self, address: &str) -> Result<usize> {
        let db = self.conn()?;
        let n = db
            .execute("DELETE FROM resource_state WHERE address = ?1", [address])
            .with_context(|| format!("removing state for {}", address))?;
        counter!("persist_remove_total", 1u64);
        Ok(n)
    }

    fn addresses(&self) -> Result<Vec<String>> {
        let db = self.conn()?;
        let mut stmt = db.prepare("SELECT DISTINCT address FROM resource_state ORDER BY address")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().context("listing addresses")
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".forma");
        ensure_dir(&p);
        p.push("state.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "forma-state.db".to_string()
}

/// Best effort; a failure is logged and surfaces again when the database is opened.
fn ensure_dir(dir: &std::path::Path) -> bool {
    match std::fs::create_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "cannot create state directory");
            false
        }
    }
}

/// Seconds since epoch.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn maybe_compress(text: &str) -> Vec<u8> {
    #[cfg(feature = "zstd")]
    {
        let lvl: i32 = std::env::var("FORMA_ZSTD_LEVEL").ok().and_then(|s| s.parse().ok()).unwrap_or(3);
        return zstd::encode_all(text.as_bytes(), lvl).unwrap_or_else(|_| text.as_bytes().to_vec());
    }
    #[cfg(not(feature = "zstd"))]
    text.as_bytes().to_vec()
}

pub fn maybe_decompress(blob: &[u8]) -> String {
    #[cfg(feature = "zstd")]
    {
        if let Ok(de) = zstd::decode_all(std::io::Cursor::new(blob)) {
            return String::from_utf8_lossy(&de).to_string();
        }
    }
    String::from_utf8_lossy(blob).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> String {
        let dir = std::env::temp_dir();
        let f = format!("forma-test-{}.db", std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos());
        dir.join(f).to_string_lossy().to_string()
    }

    fn row(address: &str, v: u64, ts: i64) -> StoredState {
        StoredState {
            address: address.to_string(),
            type_name: "k8s_example_com_thing_v1".to_string(),
            ts,
            state: SynthesizedState {
                version: VersionToken(v),
                api_version: "example.com/v1".to_string(),
                kind: "Thing".to_string(),
                manifest: format!("apiVersion: example.com/v1\nkind: Thing\nmetadata:\n  name: t{}\n", v),
            },
        }
    }

    #[test]
    fn put_get_rotate() {
        let path = temp_db();
        let s = SqliteStore::open(&path).unwrap();
        for i in 0..5u64 {
            s.put_state(&row("ns/a", 100 + i, i as i64)).unwrap();
        }
        let rows = s.history("ns/a", None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].state.version, VersionToken(104));
        assert_eq!(rows[1].state.version, VersionToken(103));
        assert_eq!(rows[2].state.version, VersionToken(102));
        assert_eq!(s.latest("ns/a").unwrap().unwrap(), row("ns/a", 104, 4));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn addresses_and_remove() {
        let s = SqliteStore::open_in_memory().unwrap();
        s.put_state(&row("b", 1, 1)).unwrap();
        s.put_state(&row("a", 2, 1)).unwrap();
        s.put_state(&row("a", 3, 2)).unwrap();
        assert_eq!(s.addresses().unwrap(), ["a", "b"]);
        assert_eq!(s.remove("a").unwrap(), 2);
        assert!(s.latest("a").unwrap().is_none());
        assert_eq!(s.addresses().unwrap(), ["b"]);
        assert_eq!(s.remove("missing").unwrap(), 0);
    }

    #[test]
    fn ensure_dir_reports_failures() {
        let file = temp_db();
        std::fs::write(&file, b"x").unwrap();
        let blocked = std::path::Path::new(&file).join("sub");
        assert!(!ensure_dir(&blocked));
        let ok = std::path::PathBuf::from(format!("{}-dir", file)).join("nested");
        assert!(ensure_dir(&ok));
        let _ = std::fs::remove_file(&file);
        let _ = std::fs::remove_dir_all(format!("{}-dir", file));
    }

    #[test]
    fn same_second_writes_keep_insertion_order() {
        let s = SqliteStore::open_in_memory().unwrap();
        s.put_state(&row("x", 10, 7)).unwrap();
        s.put_state(&row("x", 11, 7)).unwrap();
        assert_eq!(s.latest("x").unwrap().unwrap().state.version, VersionToken(11));
    }
}
