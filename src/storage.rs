//! Detection and alert persistence.
//!
//! The store is a shared collaborator written to by all workers, so the
//! trait takes `&self`; the SQLite implementation serializes access with a
//! mutex around its connection. Persistence failures are per-record: the
//! caller logs and moves on.

use anyhow::Result;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::detect::DetectionResult;
use crate::frame::epoch_millis;
use crate::stats::StatsSnapshot;

/// A throttled alert as persisted and reported.
#[derive(Clone, Debug)]
pub struct AlertRecord {
    pub source_name: String,
    pub epoch_ms: u64,
    pub violation_count: u32,
    pub face_count: u32,
    pub message: String,
}

pub trait RecordStore: Send + Sync {
    fn persist_detection(&self, result: &DetectionResult) -> Result<()>;
    fn persist_alert(&self, record: &AlertRecord) -> Result<()>;
    fn persist_metrics(&self, snapshot: &StatsSnapshot) -> Result<()>;
}

/// In-memory store for tests and camera-free smoke runs.
#[derive(Default)]
pub struct InMemoryRecordStore {
    detections: Mutex<Vec<DetectionResult>>,
    alerts: Mutex<Vec<AlertRecord>>,
    metrics: Mutex<Vec<StatsSnapshot>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detections(&self) -> Vec<DetectionResult> {
        self.detections.lock().expect("store lock").clone()
    }

    pub fn alerts(&self) -> Vec<AlertRecord> {
        self.alerts.lock().expect("store lock").clone()
    }

    pub fn detection_count(&self) -> usize {
        self.detections.lock().expect("store lock").len()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.lock().expect("store lock").len()
    }

    pub fn metrics_count(&self) -> usize {
        self.metrics.lock().expect("store lock").len()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn persist_detection(&self, result: &DetectionResult) -> Result<()> {
        self.detections.lock().expect("store lock").push(result.clone());
        Ok(())
    }

    fn persist_alert(&self, record: &AlertRecord) -> Result<()> {
        self.alerts.lock().expect("store lock").push(record.clone());
        Ok(())
    }

    fn persist_metrics(&self, snapshot: &StatsSnapshot) -> Result<()> {
        self.metrics.lock().expect("store lock").push(snapshot.clone());
        Ok(())
    }
}

/// SQLite-backed store. One connection, WAL mode, shared behind a mutex.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn.lock().expect("store lock");
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              source_name TEXT NOT NULL,
              captured_epoch_ms INTEGER NOT NULL,
              sequence_number INTEGER NOT NULL,
              face_count INTEGER NOT NULL,
              violation_count INTEGER NOT NULL,
              observations_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS alerts (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              source_name TEXT NOT NULL,
              epoch_ms INTEGER NOT NULL,
              violation_count INTEGER NOT NULL,
              face_count INTEGER NOT NULL,
              message TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS system_metrics (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              recorded_epoch_ms INTEGER NOT NULL,
              snapshot_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_source
              ON detections(source_name, captured_epoch_ms);
            CREATE INDEX IF NOT EXISTS idx_alerts_time ON alerts(epoch_ms);
            "#,
        )?;
        Ok(())
    }

    pub fn detection_count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("store lock");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Most recent alerts, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>> {
        let conn = self.conn.lock().expect("store lock");
        let mut stmt = conn.prepare(
            r#"
            SELECT source_name, epoch_ms, violation_count, face_count, message
            FROM alerts ORDER BY id DESC LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(AlertRecord {
                source_name: row.get(0)?,
                epoch_ms: row.get::<_, i64>(1)? as u64,
                violation_count: row.get::<_, i64>(2)? as u32,
                face_count: row.get::<_, i64>(3)? as u32,
                message: row.get(4)?,
            })
        })?;
        let mut alerts = Vec::new();
        for alert in rows {
            alerts.push(alert?);
        }
        Ok(alerts)
    }
}

impl RecordStore for SqliteRecordStore {
    fn persist_detection(&self, result: &DetectionResult) -> Result<()> {
        let observations_json = serde_json::to_string(&result.observations)?;
        let conn = self.conn.lock().expect("store lock");
        conn.execute(
            r#"
            INSERT INTO detections
              (source_name, captured_epoch_ms, sequence_number, face_count,
               violation_count, observations_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                result.source_name,
                result.captured_epoch_ms as i64,
                result.sequence_number as i64,
                result.face_count,
                result.violation_count,
                observations_json,
            ],
        )?;
        Ok(())
    }

    fn persist_alert(&self, record: &AlertRecord) -> Result<()> {
        let conn = self.conn.lock().expect("store lock");
        conn.execute(
            r#"
            INSERT INTO alerts (source_name, epoch_ms, violation_count, face_count, message)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                record.source_name,
                record.epoch_ms as i64,
                record.violation_count,
                record.face_count,
                record.message,
            ],
        )?;
        Ok(())
    }

    fn persist_metrics(&self, snapshot: &StatsSnapshot) -> Result<()> {
        let snapshot_json = serde_json::to_string(snapshot)?;
        let conn = self.conn.lock().expect("store lock");
        conn.execute(
            "INSERT INTO system_metrics (recorded_epoch_ms, snapshot_json) VALUES (?1, ?2)",
            params![epoch_millis() as i64, snapshot_json],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{FaceObservation, MaskLabel};

    fn detection(source: &str, seq: u64, violations: u32) -> DetectionResult {
        let observations = (0..violations)
            .map(|_| FaceObservation {
                x: 0,
                y: 0,
                width: 16,
                height: 16,
                confidence: 0.8,
                label: MaskLabel::Unmasked,
            })
            .collect::<Vec<_>>();
        DetectionResult {
            source_name: source.to_string(),
            captured_epoch_ms: 1_700_000_000_000 + seq,
            sequence_number: seq,
            face_count: violations,
            violation_count: violations,
            observations,
        }
    }

    #[test]
    fn sqlite_round_trips_detections_and_alerts() {
        let store = SqliteRecordStore::open_in_memory().expect("open");
        store
            .persist_detection(&detection("lobby", 1, 2))
            .expect("persist detection");
        store
            .persist_alert(&AlertRecord {
                source_name: "lobby".to_string(),
                epoch_ms: 1_700_000_000_001,
                violation_count: 2,
                face_count: 3,
                message: "lobby: 2 of 3 faces unmasked".to_string(),
            })
            .expect("persist alert");

        assert_eq!(store.detection_count().expect("count"), 1);
        let alerts = store.recent_alerts(10).expect("alerts");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].source_name, "lobby");
        assert_eq!(alerts[0].violation_count, 2);
    }

    #[test]
    fn recent_alerts_are_newest_first() {
        let store = SqliteRecordStore::open_in_memory().expect("open");
        for i in 0..3u32 {
            store
                .persist_alert(&AlertRecord {
                    source_name: format!("cam_{}", i),
                    epoch_ms: i as u64,
                    violation_count: 1,
                    face_count: 1,
                    message: format!("cam_{}: 1 of 1 faces unmasked", i),
                })
                .expect("persist");
        }
        let alerts = store.recent_alerts(2).expect("alerts");
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].source_name, "cam_2");
        assert_eq!(alerts[1].source_name, "cam_1");
    }

    #[test]
    fn in_memory_store_accumulates_records() {
        let store = InMemoryRecordStore::new();
        store
            .persist_detection(&detection("door", 1, 0))
            .expect("persist");
        store
            .persist_detection(&detection("door", 2, 1))
            .expect("persist");
        assert_eq!(store.detection_count(), 2);
        assert_eq!(store.alert_count(), 0);
        assert_eq!(store.detections()[1].violation_count, 1);
    }
}
