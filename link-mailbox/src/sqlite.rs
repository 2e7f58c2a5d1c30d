//! SQLite mailbox backend.
//!
//! Each session is one row holding the MessagePack-encoded record. Several
//! processes can share the same database file; every read-modify-write runs
//! in its own `BEGIN IMMEDIATE` transaction.

use crate::error::{MailboxError, MailboxResult};
use crate::record::{SessionPatch, SessionRecord, SweepReport};
use crate::Mailbox;
use async_trait::async_trait;
use link_types::constants::MESSAGE_EXPIRY;
use link_types::{now_ms, PeerId, SessionId, SignalEnvelope};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite-based mailbox.
///
/// Uses WAL mode so pollers do not block writers.
#[derive(Clone)]
pub struct SqliteMailbox {
    pool: SqlitePool,
    message_expiry: Duration,
}

impl SqliteMailbox {
    /// Open (or create) the mailbox database at `path`.
    pub async fn new(path: &Path, message_expiry: Duration) -> MailboxResult<Self> {
        let url = path.to_str().ok_or_else(|| MailboxError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let mailbox = Self {
            pool,
            message_expiry,
        };
        mailbox.run_migrations().await?;
        Ok(mailbox)
    }

    /// Create an in-memory mailbox (for testing).
    pub async fn in_memory() -> MailboxResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection that never recycles, or the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let mailbox = Self {
            pool,
            message_expiry: MESSAGE_EXPIRY,
        };
        mailbox.run_migrations().await?;
        Ok(mailbox)
    }

    async fn run_migrations(&self) -> MailboxResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                record BLOB NOT NULL,
                last_active INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_last_active ON sessions(last_active)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Take a connection and open a write transaction on it.
    ///
    /// `BEGIN IMMEDIATE` takes the write lock up front, so a competing writer
    /// waits on the busy timeout instead of failing when it upgrades.
    async fn begin_immediate(&self) -> MailboxResult<PoolConnection<Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(
        mut conn: PoolConnection<Sqlite>,
        result: MailboxResult<T>,
    ) -> MailboxResult<T> {
        match result {
            Ok(value) => {
                if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
                    conn.close_on_drop();
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    tracing::warn!(error = %rollback, "rollback failed, discarding connection");
                    conn.close_on_drop();
                }
                Err(e)
            }
        }
    }

    /// Load, mutate and store one record inside a write transaction.
    ///
    /// Returns `None` without writing when the session is absent.
    async fn modify<R, F>(&self, session_id: &SessionId, f: F) -> MailboxResult<Option<R>>
    where
        F: FnOnce(&mut SessionRecord) -> R + Send,
        R: Send,
    {
        let mut conn = self.begin_immediate().await?;
        let result = modify_record(&mut conn, session_id, f).await;
        Self::finish(conn, result).await
    }
}

async fn load_record(
    conn: &mut SqliteConnection,
    session_id: &str,
) -> MailboxResult<Option<SessionRecord>> {
    let row: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT record FROM sessions WHERE session_id = ?1")
            .bind(session_id)
            .fetch_optional(&mut *conn)
            .await?;
    match row {
        Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

async fn modify_record<R, F>(
    conn: &mut SqliteConnection,
    session_id: &SessionId,
    f: F,
) -> MailboxResult<Option<R>>
where
    F: FnOnce(&mut SessionRecord) -> R,
{
    let Some(mut record) = load_record(conn, session_id.as_str()).await? else {
        return Ok(None);
    };
    let out = f(&mut record);
    let encoded = rmp_serde::to_vec_named(&record)?;

    sqlx::query("UPDATE sessions SET record = ?1, last_active = ?2 WHERE session_id = ?3")
        .bind(encoded)
        .bind(record.last_active as i64)
        .bind(session_id.as_str())
        .execute(&mut *conn)
        .await?;
    Ok(Some(out))
}

async fn upsert_record(conn: &mut SqliteConnection, record: SessionRecord) -> MailboxResult<SessionRecord> {
    let record = match load_record(conn, record.session_id.as_str()).await? {
        Some(mut stored) => {
            stored.adopt(record);
            stored
        }
        None => record,
    };

    let encoded = rmp_serde::to_vec_named(&record)?;
    sqlx::query(
        r#"
        INSERT INTO sessions (session_id, record, last_active)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(session_id) DO UPDATE SET record = ?2, last_active = ?3
        "#,
    )
    .bind(record.session_id.as_str())
    .bind(encoded)
    .bind(record.last_active as i64)
    .execute(&mut *conn)
    .await?;
    Ok(record)
}

async fn sweep_records(
    conn: &mut SqliteConnection,
    now_ms: u64,
    message_expiry: Duration,
    session_expiry: Duration,
) -> MailboxResult<SweepReport> {
    let rows: Vec<(String, Vec<u8>)> = sqlx::query_as("SELECT session_id, record FROM sessions")
        .fetch_all(&mut *conn)
        .await?;

    let mut report = SweepReport::default();
    for (session_id, bytes) in rows {
        let mut record: SessionRecord = rmp_serde::from_slice(&bytes)?;
        let expired = record.expire_messages(now_ms, message_expiry);
        report.messages_expired += expired;

        if record.is_abandoned(now_ms, session_expiry) {
            sqlx::query("DELETE FROM sessions WHERE session_id = ?1")
                .bind(&session_id)
                .execute(&mut *conn)
                .await?;
            report.sessions_removed += 1;
        } else if expired > 0 {
            sqlx::query("UPDATE sessions SET record = ?1 WHERE session_id = ?2")
                .bind(rmp_serde::to_vec_named(&record)?)
                .bind(&session_id)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(report)
}

#[async_trait]
impl Mailbox for SqliteMailbox {
    async fn create_session(&self, record: SessionRecord) -> MailboxResult<()> {
        let mut conn = self.begin_immediate().await?;
        let result = upsert_record(&mut conn, record).await;
        let record = Self::finish(conn, result).await?;

        tracing::debug!(session = %record.session_id, host = %record.host_id, "session created");
        Ok(())
    }

    async fn get_session(&self, session_id: &SessionId) -> MailboxResult<Option<SessionRecord>> {
        let row: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT record FROM sessions WHERE session_id = ?1")
                .bind(session_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn update_session(
        &self,
        session_id: &SessionId,
        patch: SessionPatch,
    ) -> MailboxResult<bool> {
        let now = now_ms();
        Ok(self
            .modify(session_id, move |r| r.apply(patch, now))
            .await?
            .is_some())
    }

    async fn delete_session(&self, session_id: &SessionId) -> MailboxResult<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?1")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn add_signal(
        &self,
        session_id: &SessionId,
        envelope: SignalEnvelope,
    ) -> MailboxResult<u64> {
        let now = now_ms();
        let expiry = self.message_expiry;
        self.modify(session_id, move |r| r.push_signal(envelope, now, expiry))
            .await?
            .ok_or_else(|| MailboxError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    async fn signals_for(
        &self,
        session_id: &SessionId,
        receiver: &PeerId,
    ) -> MailboxResult<Vec<SignalEnvelope>> {
        Ok(self
            .get_session(session_id)
            .await?
            .map(|r| r.signals_for(receiver))
            .unwrap_or_default())
    }

    async fn remove_signal(&self, session_id: &SessionId, timestamp: u64) -> MailboxResult<bool> {
        Ok(self
            .modify(session_id, move |r| r.remove_signal(timestamp))
            .await?
            .unwrap_or(false))
    }

    async fn add_connected_peer(
        &self,
        session_id: &SessionId,
        peer: &PeerId,
    ) -> MailboxResult<bool> {
        let peer = peer.clone();
        Ok(self
            .modify(session_id, move |r| r.add_peer(&peer))
            .await?
            .unwrap_or(false))
    }

    async fn remove_connected_peer(
        &self,
        session_id: &SessionId,
        peer: &PeerId,
    ) -> MailboxResult<bool> {
        let peer = peer.clone();
        Ok(self
            .modify(session_id, move |r| r.remove_peer(&peer))
            .await?
            .unwrap_or(false))
    }

    async fn list_sessions(&self) -> MailboxResult<Vec<SessionId>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT session_id FROM sessions ORDER BY session_id")
            .fetch_all(&self.pool)
            .await?;
        ids.into_iter()
            .map(|id| SessionId::new(id).map_err(MailboxError::from))
            .collect()
    }

    async fn sweep(&self, now_ms: u64, session_expiry: Duration) -> MailboxResult<SweepReport> {
        let mut conn = self.begin_immediate().await?;
        let result = sweep_records(&mut conn, now_ms, self.message_expiry, session_expiry).await;
        Self::finish(conn, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_types::{IceCandidate, SessionDescription, SignalKind};

    fn id(s: &str) -> PeerId {
        PeerId::new(s).unwrap()
    }

    fn t1() -> SessionId {
        SessionId::new("T1").unwrap()
    }

    fn envelope(kind: SignalKind, ts: u64, data: serde_json::Value) -> SignalEnvelope {
        SignalEnvelope::new(kind, id("host"), Some(id("peer")), ts, data)
    }

    async fn with_session() -> SqliteMailbox {
        let mailbox = SqliteMailbox::in_memory().await.unwrap();
        mailbox
            .create_session(SessionRecord::new(t1(), id("host"), now_ms()))
            .await
            .unwrap();
        mailbox
    }

    #[tokio::test]
    async fn create_and_get() {
        let mailbox = with_session().await;
        let record = mailbox.get_session(&t1()).await.unwrap().unwrap();
        assert_eq!(record.host_id, id("host"));
        assert_eq!(mailbox.list_sessions().await.unwrap(), vec![t1()]);
    }

    #[tokio::test]
    async fn supersession_and_ordering() {
        let mailbox = with_session().await;
        let now = now_ms();
        let candidate = IceCandidate::new("candidate:1 1 udp 1 10.0.0.1 5000 typ host");
        mailbox
            .add_signal(&t1(), envelope(SignalKind::IceCandidate, now, candidate.to_value()))
            .await
            .unwrap();
        mailbox
            .add_signal(
                &t1(),
                envelope(SignalKind::Offer, now + 1, SessionDescription::offer("o1").to_value()),
            )
            .await
            .unwrap();
        mailbox
            .add_signal(
                &t1(),
                envelope(SignalKind::Offer, now + 2, SessionDescription::offer("o2").to_value()),
            )
            .await
            .unwrap();

        let signals = mailbox.signals_for(&t1(), &id("peer")).await.unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].kind, SignalKind::Offer);
        assert_eq!(signals[0].description().unwrap().sdp, "o2");
        assert_eq!(signals[1].candidate().unwrap(), candidate);
    }

    #[tokio::test]
    async fn missing_session_operations() {
        let mailbox = SqliteMailbox::in_memory().await.unwrap();
        assert!(!mailbox.update_session(&t1(), SessionPatch::ready()).await.unwrap());
        assert!(!mailbox.remove_signal(&t1(), 1).await.unwrap());
        assert!(!mailbox.add_connected_peer(&t1(), &id("peer")).await.unwrap());
        assert!(!mailbox.delete_session(&t1()).await.unwrap());
        assert!(matches!(
            mailbox
                .add_signal(&t1(), envelope(SignalKind::Ready, 1, serde_json::Value::Null))
                .await,
            Err(MailboxError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn peers_and_patch() {
        let mailbox = with_session().await;
        assert!(mailbox.add_connected_peer(&t1(), &id("peer")).await.unwrap());
        assert!(!mailbox.add_connected_peer(&t1(), &id("peer")).await.unwrap());
        assert!(mailbox.update_session(&t1(), SessionPatch::ready()).await.unwrap());

        let record = mailbox.get_session(&t1()).await.unwrap().unwrap();
        assert_eq!(record.connected_peers, vec![id("peer")]);
        assert!(record.metadata.ready_for_connections);

        assert!(mailbox.remove_connected_peer(&t1(), &id("peer")).await.unwrap());
    }

    #[tokio::test]
    async fn janitor_keeps_session_with_connected_peer() {
        let mailbox = SqliteMailbox::in_memory().await.unwrap();
        let idle = SessionRecord::new(t1(), id("host"), 0);
        let mut busy = SessionRecord::new(SessionId::new("T2").unwrap(), id("host"), 0);
        busy.add_peer(&id("peer"));
        mailbox.create_session(idle).await.unwrap();
        mailbox.create_session(busy).await.unwrap();

        let report = mailbox
            .sweep(2 * 3_600_000, Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(report.sessions_removed, 1);
        assert_eq!(
            mailbox.list_sessions().await.unwrap(),
            vec![SessionId::new("T2").unwrap()]
        );
    }

    #[tokio::test]
    async fn shared_file_between_mailboxes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peerlink.db");

        let host_side = SqliteMailbox::new(&path, MESSAGE_EXPIRY).await.unwrap();
        let peer_side = SqliteMailbox::new(&path, MESSAGE_EXPIRY).await.unwrap();

        host_side
            .create_session(SessionRecord::new(t1(), id("host"), now_ms()))
            .await
            .unwrap();
        host_side
            .add_signal(
                &t1(),
                envelope(SignalKind::Offer, now_ms(), SessionDescription::offer("o1").to_value()),
            )
            .await
            .unwrap();

        let signals = peer_side.signals_for(&t1(), &id("peer")).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert!(peer_side
            .remove_signal(&t1(), signals[0].timestamp)
            .await
            .unwrap());
        assert!(host_side.signals_for(&t1(), &id("peer")).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_on_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peerlink.db");

        let host_side = SqliteMailbox::new(&path, MESSAGE_EXPIRY).await.unwrap();
        let peer_side = SqliteMailbox::new(&path, MESSAGE_EXPIRY).await.unwrap();
        host_side
            .create_session(SessionRecord::new(t1(), id("host"), now_ms()))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for writer in 0..4u32 {
            let mailbox = if writer % 2 == 0 {
                host_side.clone()
            } else {
                peer_side.clone()
            };
            tasks.push(tokio::spawn(async move {
                for n in 0..50u32 {
                    let candidate = IceCandidate::new(format!(
                        "candidate:{writer}{n} 1 udp 1 10.0.{writer}.{n} 5000 typ host"
                    ));
                    mailbox
                        .add_signal(
                            &t1(),
                            envelope(SignalKind::IceCandidate, now_ms(), candidate.to_value()),
                        )
                        .await?;
                }
                Ok::<_, MailboxError>(())
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let record = peer_side.get_session(&t1()).await.unwrap().unwrap();
        assert_eq!(record.messages.len(), 200);
    }
}
