use std::path::PathBuf;

use rusqlite::{params, Connection};
use tracing::debug;

use crate::aggregate::Snapshot;

/// Append-only SQLite sink for published snapshots.
///
/// Every view of a snapshot lands as time-series rows stamped with the
/// snapshot timestamp, all inside one transaction, so a crash can never
/// leave a partially recorded snapshot behind. Each call opens its own
/// connection; no handle crosses the thread boundary, and concurrent
/// readers of the database only ever see committed snapshots.
pub struct SnapshotSink {
    path: PathBuf,
}

impl SnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Creates the four time-series tables if they do not exist yet
    pub fn ensure_schema(&self) -> rusqlite::Result<()> {
        let conn = self.open()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS gpu_availability (
                timestamp DATETIME,
                gpu_type TEXT,
                total INTEGER,
                used INTEGER,
                available INTEGER,
                true_available INTEGER,
                nodes_total INTEGER,
                nodes_healthy INTEGER
            );

            CREATE TABLE IF NOT EXISTS user_usage (
                timestamp DATETIME,
                user TEXT,
                gpu_type TEXT,
                gpu_count INTEGER,
                job_count INTEGER
            );

            CREATE TABLE IF NOT EXISTS queue_status (
                timestamp DATETIME,
                gpu_type TEXT,
                queued_jobs INTEGER,
                queued_gpus INTEGER,
                unique_users INTEGER
            );

            CREATE TABLE IF NOT EXISTS node_status (
                timestamp DATETIME,
                node_name TEXT,
                state TEXT,
                gpu_type TEXT,
                total_gpus INTEGER,
                used_gpus INTEGER
            );
            ",
        )
    }

    /// Appends one snapshot to all four series in a single transaction
    pub fn record(&self, snapshot: &Snapshot) -> rusqlite::Result<()> {
        let mut conn = self.open()?;
        let tx = conn.transaction()?;

        for row in &snapshot.availability {
            tx.execute(
                "INSERT INTO gpu_availability
                 (timestamp, gpu_type, total, used, available, true_available, nodes_total, nodes_healthy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    snapshot.timestamp,
                    row.gpu_type,
                    row.total as i64,
                    row.used as i64,
                    row.available as i64,
                    row.true_available as i64,
                    row.nodes_total as i64,
                    row.nodes_healthy as i64,
                ],
            )?;
        }

        for row in &snapshot.users {
            tx.execute(
                "INSERT INTO user_usage (timestamp, user, gpu_type, gpu_count, job_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    snapshot.timestamp,
                    row.user,
                    row.gpu_type,
                    row.gpu_count as i64,
                    row.job_count as i64,
                ],
            )?;
        }

        for row in &snapshot.queue {
            tx.execute(
                "INSERT INTO queue_status (timestamp, gpu_type, queued_jobs, queued_gpus, unique_users)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    snapshot.timestamp,
                    row.gpu_type,
                    row.queued_jobs as i64,
                    row.queued_gpus as i64,
                    row.unique_users as i64,
                ],
            )?;
        }

        for row in &snapshot.nodes {
            tx.execute(
                "INSERT INTO node_status (timestamp, node_name, state, gpu_type, total_gpus, used_gpus)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    snapshot.timestamp,
                    row.node,
                    row.state.to_string(),
                    row.gpu_type,
                    row.gpu_total as i64,
                    row.gpu_used as i64,
                ],
            )?;
        }

        tx.commit()?;
        debug!(path = %self.path.display(), "snapshot recorded");
        Ok(())
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;

        // WAL mode so external readers never block the append path
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::aggregate::{GpuAvailability, NodeStatus, QueueStatus, UserUsage};
    use crate::slurm::NodeState;

    fn sample(timestamp: chrono::DateTime<Utc>) -> Snapshot {
        Snapshot {
            timestamp,
            availability: vec![GpuAvailability {
                gpu_type: "a100".to_string(),
                total: 16,
                used: 8,
                available: 8,
                true_available: 6,
                nodes_total: 2,
                nodes_healthy: 1,
            }],
            nodes: vec![NodeStatus {
                node: "gpu01".to_string(),
                gpu_type: "a100".to_string(),
                state: NodeState::Mixed,
                gpu_total: 8,
                gpu_used: 4,
            }],
            users: vec![UserUsage {
                user: "alice".to_string(),
                gpu_type: "a100".to_string(),
                gpu_count: 4,
                job_count: 2,
            }],
            queue: vec![QueueStatus {
                gpu_type: "h100".to_string(),
                queued_jobs: 1,
                queued_gpus: 4,
                queued_gpu_hours: 4.0,
                unique_users: 1,
            }],
            warnings: Vec::new(),
        }
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn appends_one_row_set_per_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SnapshotSink::new(dir.path().join("monitor.db"));
        sink.ensure_schema().unwrap();

        let first = Utc::now();
        sink.record(&sample(first)).unwrap();
        sink.record(&sample(first + Duration::seconds(30))).unwrap();

        let conn = Connection::open(dir.path().join("monitor.db")).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM gpu_availability"), 2);
        assert_eq!(
            count(&conn, "SELECT COUNT(DISTINCT timestamp) FROM gpu_availability"),
            2
        );
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM user_usage"), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM queue_status"), 2);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM node_status"), 2);
    }

    #[test]
    fn schema_setup_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SnapshotSink::new(dir.path().join("monitor.db"));
        sink.ensure_schema().unwrap();
        sink.ensure_schema().unwrap();
        sink.record(&sample(Utc::now())).unwrap();
    }
}
