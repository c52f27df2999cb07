//! Durable Buffer (C2): embedded, crash-safe FIFO queue + dead-letter queue
//! for UERs pending uplink. Grounded on
//! `original_source/edge-agent/core/storage.py`'s SQLite `queue`/`dlq`
//! tables, re-expressed with `rusqlite` behind a `parking_lot::Mutex`
//! serializing all mutating access (§4.2, §5).

use comidf_uer::Uer;
use parking_lot::Mutex;
use rusqlite::Connection;

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("buffer storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("buffer entry is not valid UER json: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub struct DurableBuffer {
    conn: Mutex<Connection>,
}

impl DurableBuffer {
    pub fn open(path: &str) -> Result<Self, BufferError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uer TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_queue_created ON queue(created_at);
            CREATE TABLE IF NOT EXISTS dlq (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uer TEXT NOT NULL,
                reason TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, BufferError> {
        Self::open(":memory:")
    }

    /// Appends a UER to the queue. Returns once durably persisted.
    pub fn enqueue(&self, uer: &Uer) -> Result<(), BufferError> {
        let json = serde_json::to_string(uer)?;
        let conn = self.conn.lock();
        conn.execute("INSERT INTO queue (uer) VALUES (?1)", [json])?;
        Ok(())
    }

    /// Atomically reads and removes the `n` oldest rows. Either returns and
    /// removes a prefix entirely, or returns nothing — never a partial,
    /// re-orderable slice (§4.2 invariant).
    pub fn dequeue_batch(&self, n: usize) -> Result<Vec<Uer>, BufferError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let (ids, rows): (Vec<i64>, Vec<String>) = {
            let mut stmt = tx.prepare("SELECT id, uer FROM queue ORDER BY id ASC LIMIT ?1")?;
            let mapped = stmt.query_map([n as i64], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut ids = Vec::new();
            let mut rows = Vec::new();
            for r in mapped {
                let (id, uer) = r?;
                ids.push(id);
                rows.push(uer);
            }
            (ids, rows)
        };
        if !ids.is_empty() {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!("DELETE FROM queue WHERE id IN ({placeholders})");
            let params = rusqlite::params_from_iter(ids.iter());
            tx.execute(&sql, params)?;
        }
        tx.commit()?;
        rows.into_iter()
            .map(|s| Ok(serde_json::from_str(&s)?))
            .collect()
    }

    /// Appends to the dead-letter queue. Never touches `queue` — a record
    /// is never simultaneously present in both (§4.2 invariant).
    pub fn dead_letter(&self, uer: &Uer, reason: &str) -> Result<(), BufferError> {
        let json = serde_json::to_string(uer)?;
        let conn = self.conn.lock();
        conn.execute("INSERT INTO dlq (uer, reason) VALUES (?1, ?2)", [json, reason.to_string()])?;
        Ok(())
    }

    pub fn size(&self) -> Result<usize, BufferError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM queue", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn dlq_size(&self) -> Result<usize, BufferError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM dlq", [], |r| r.get(0))?;
        Ok(n as usize)
    }

    pub fn clear_dlq(&self) -> Result<(), BufferError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM dlq", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comidf_uer::{Normalizer, RawDetector, RawFeatures};

    fn sample_uer(tag: &str) -> Uer {
        let n = Normalizer::new("salt");
        n.normalize(
            tag,
            &RawFeatures::default(),
            &RawDetector {
                score: 0.5,
                conf: 0.5,
                model: None,
                entities: vec![],
                attck_hint: vec![],
            },
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn dequeue_returns_oldest_insertion_prefix() {
        let buf = DurableBuffer::in_memory().unwrap();
        let a = sample_uer("mqtt");
        let b = sample_uer("http");
        let c = sample_uer("coap");
        buf.enqueue(&a).unwrap();
        buf.enqueue(&b).unwrap();
        buf.enqueue(&c).unwrap();

        let batch = buf.dequeue_batch(2).unwrap();
        assert_eq!(batch, vec![a, b]);
        assert_eq!(buf.size().unwrap(), 1);
    }

    #[test]
    fn dequeue_empty_buffer_returns_nothing() {
        let buf = DurableBuffer::in_memory().unwrap();
        assert!(buf.dequeue_batch(10).unwrap().is_empty());
    }

    #[test]
    fn dead_letter_never_appears_in_queue() {
        let buf = DurableBuffer::in_memory().unwrap();
        let a = sample_uer("mqtt");
        buf.dead_letter(&a, "HTTP 422").unwrap();
        assert_eq!(buf.size().unwrap(), 0);
        assert_eq!(buf.dlq_size().unwrap(), 1);
    }

    #[test]
    fn fifo_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buf.sqlite3");
        let path_str = path.to_str().unwrap().to_string();

        let a = sample_uer("mqtt");
        let b = sample_uer("http");
        {
            let buf = DurableBuffer::open(&path_str).unwrap();
            buf.enqueue(&a).unwrap();
            buf.enqueue(&b).unwrap();
        }
        let buf = DurableBuffer::open(&path_str).unwrap();
        let batch = buf.dequeue_batch(10).unwrap();
        assert_eq!(batch, vec![a, b]);
    }

    #[test]
    fn clear_dlq_empties_it() {
        let buf = DurableBuffer::in_memory().unwrap();
        buf.dead_letter(&sample_uer("mqtt"), "bad").unwrap();
        buf.clear_dlq().unwrap();
        assert_eq!(buf.dlq_size().unwrap(), 0);
    }
}
