//! SQLite-backed [`DurableStream`].
//!
//! Entries live in `stream_entries`, each group's delivery cursor in
//! `stream_groups`, unacknowledged deliveries in `stream_pending` and
//! dead-lettered entries in `stream_parked`. All work runs on the blocking
//! pool. Appends and group creation are single statements; reads, acks and
//! parking span several statements and run in one `IMMEDIATE` transaction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use auditrail_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::entry::{EntryId, ParkedEntry, ReadCursor, StreamEntry};
use crate::error::StreamError;
use crate::DurableStream;

/// Appends made through another handle on the same database file do not
/// wake a blocked reader, so blocked reads re-check at this interval.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// A durable stream stored in SQLite.
///
/// Cloning is cheap; clones share the pool and wake each other's blocked
/// reads on append.
#[derive(Clone)]
pub struct SqliteStream {
    pool: DbPool,
    appended: Arc<Notify>,
}

impl SqliteStream {
    /// Wraps an already-migrated pool.
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            appended: Arc::new(Notify::new()),
        }
    }

    /// Opens (or creates) the database at `db_path` and applies pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns `StreamError::PoolInit`, `StreamError::Pool` or
    /// `StreamError::Migration` when the database cannot be prepared.
    pub fn open(db_path: &str, settings: DbRuntimeSettings) -> Result<Self, StreamError> {
        let pool = create_pool(db_path, settings)?;
        {
            let mut conn = pool.get()?;
            let applied = run_migrations(&mut conn)?;
            if applied > 0 {
                tracing::info!(count = applied, path = db_path, "applied stream migrations");
            }
        }
        Ok(Self::new(pool))
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn run<T, F>(&self, op: F) -> Result<T, StreamError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StreamError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            op(&mut *conn)
        })
        .await?
    }
}

#[async_trait]
impl DurableStream for SqliteStream {
    async fn append(
        &self,
        stream: &str,
        fields: HashMap<String, String>,
    ) -> Result<EntryId, StreamError> {
        let fields_json = serde_json::to_string(&fields)?;
        let stream = stream.to_string();
        let id = self
            .run(move |conn| append_entry(conn, &stream, &fields_json, now_millis()))
            .await?;
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group_if_absent(&self, stream: &str, group: &str) -> Result<bool, StreamError> {
        let (stream, group) = (stream.to_string(), group.to_string());
        let created = self
            .run(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO stream_groups (stream, group_name, last_delivered_seq, created_at)
                     VALUES (?1, ?2, 0, ?3)",
                    params![stream, group, now_millis()],
                )?;
                if changed == 1 {
                    tracing::info!(stream = %stream, group = %group, "created consumer group");
                }
                Ok(changed == 1)
            })
            .await?;
        Ok(created)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        cursor: ReadCursor,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, StreamError> {
        let deadline = block.map(|b| Instant::now() + b);

        loop {
            // Registered before reading so an append racing the read still wakes us.
            let appended = self.appended.notified();

            let (s, g, c) = (stream.to_string(), group.to_string(), consumer.to_string());
            let entries = self
                .run(move |conn| match cursor {
                    ReadCursor::NeverDelivered => read_new(conn, &s, &g, &c, count, now_millis()),
                    ReadCursor::Pending { min_idle } => {
                        read_pending(conn, &s, &g, &c, count, min_idle, now_millis())
                    }
                })
                .await?;

            let Some(deadline) = deadline else {
                return Ok(entries);
            };
            let now = Instant::now();
            if !entries.is_empty() || matches!(cursor, ReadCursor::Pending { .. }) || now >= deadline
            {
                return Ok(entries);
            }

            let wait = (deadline - now).min(IDLE_POLL);
            let _ = tokio::time::timeout(wait, appended).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize, StreamError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let (stream, group) = (stream.to_string(), group.to_string());
        let seqs: Vec<i64> = ids.iter().map(|id| id.seq).collect();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let mut acked = 0;
            for seq in seqs {
                acked += tx.execute(
                    "DELETE FROM stream_pending WHERE stream = ?1 AND group_name = ?2 AND seq = ?3",
                    params![stream, group, seq],
                )?;
            }
            tx.commit()?;
            Ok(acked)
        })
        .await
    }

    async fn park(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
        reason: &str,
    ) -> Result<bool, StreamError> {
        let (stream, group, reason) = (stream.to_string(), group.to_string(), reason.to_string());
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let pending: Option<(String, i64)> = tx
                .query_row(
                    "SELECT consumer, delivery_count FROM stream_pending
                     WHERE stream = ?1 AND group_name = ?2 AND seq = ?3",
                    params![stream, group, id.seq],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let Some((consumer, delivery_count)) = pending else {
                return Ok(false);
            };

            tx.execute(
                "INSERT OR REPLACE INTO stream_parked
                    (stream, group_name, seq, consumer, delivery_count, reason, parked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![stream, group, id.seq, consumer, delivery_count, reason, now_millis()],
            )?;
            tx.execute(
                "DELETE FROM stream_pending WHERE stream = ?1 AND group_name = ?2 AND seq = ?3",
                params![stream, group, id.seq],
            )?;
            tx.commit()?;

            tracing::warn!(
                stream = %stream,
                group = %group,
                entry_id = %id,
                delivery_count,
                reason = %reason,
                "parked stream entry"
            );
            Ok(true)
        })
        .await
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StreamError> {
        let (stream, group) = (stream.to_string(), group.to_string());
        self.run(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM stream_pending WHERE stream = ?1 AND group_name = ?2",
                params![stream, group],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn parked(&self, stream: &str, group: &str) -> Result<Vec<ParkedEntry>, StreamError> {
        let (stream, group) = (stream.to_string(), group.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT e.entry_id, e.fields_json, p.consumer, p.delivery_count, p.reason, p.parked_at
                 FROM stream_parked p JOIN stream_entries e ON e.seq = p.seq
                 WHERE p.stream = ?1 AND p.group_name = ?2
                 ORDER BY p.parked_at, p.seq",
            )?;
            let rows = stmt
                .query_map(params![stream, group], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u32>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut parked = Vec::with_capacity(rows.len());
            for (entry_id, fields_json, consumer, delivery_count, reason, parked_at) in rows {
                parked.push(ParkedEntry {
                    id: entry_id.parse()?,
                    fields: serde_json::from_str(&fields_json)?,
                    consumer,
                    delivery_count,
                    reason,
                    parked_at,
                });
            }
            Ok(parked)
        })
        .await
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn append_entry(
    conn: &Connection,
    stream: &str,
    fields_json: &str,
    now: i64,
) -> Result<EntryId, StreamError> {
    // Sequence assignment and insert happen in one statement so concurrent
    // appenders cannot observe the same MAX(seq).
    let (seq, millis) = conn.query_row(
        "INSERT INTO stream_entries (seq, stream, entry_id, fields_json, appended_at)
         SELECT next.seq, ?1, ?2 || '-' || next.seq, ?3, ?2
         FROM (SELECT COALESCE(MAX(seq), 0) + 1 AS seq FROM stream_entries) AS next
         RETURNING seq, appended_at",
        params![stream, now, fields_json],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
    )?;
    Ok(EntryId { millis, seq })
}

fn group_cursor(conn: &Connection, stream: &str, group: &str) -> Result<i64, StreamError> {
    conn.query_row(
        "SELECT last_delivered_seq FROM stream_groups WHERE stream = ?1 AND group_name = ?2",
        params![stream, group],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StreamError::UnknownGroup {
        stream: stream.to_string(),
        group: group.to_string(),
    })
}

fn decode_entry(
    entry_id: &str,
    fields_json: &str,
    delivery_count: u32,
) -> Result<StreamEntry, StreamError> {
    Ok(StreamEntry {
        id: entry_id.parse()?,
        fields: serde_json::from_str(fields_json)?,
        delivery_count,
    })
}

fn read_new(
    conn: &mut Connection,
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    now: i64,
) -> Result<Vec<StreamEntry>, StreamError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let last_delivered = group_cursor(&tx, stream, group)?;

    let rows: Vec<(i64, String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT seq, entry_id, fields_json FROM stream_entries
             WHERE stream = ?1 AND seq > ?2
             ORDER BY seq
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![stream, last_delivered, count as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let Some((max_seq, _, _)) = rows.last() else {
        return Ok(Vec::new());
    };

    for (seq, _, _) in &rows {
        tx.execute(
            "INSERT INTO stream_pending
                (stream, group_name, seq, consumer, delivery_count, last_delivered_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            params![stream, group, seq, consumer, now],
        )?;
    }
    tx.execute(
        "UPDATE stream_groups SET last_delivered_seq = ?3 WHERE stream = ?1 AND group_name = ?2",
        params![stream, group, max_seq],
    )?;
    tx.commit()?;

    rows.iter()
        .map(|(_, entry_id, fields_json)| decode_entry(entry_id, fields_json, 1))
        .collect()
}

fn read_pending(
    conn: &mut Connection,
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    min_idle: Duration,
    now: i64,
) -> Result<Vec<StreamEntry>, StreamError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    group_cursor(&tx, stream, group)?;

    let idle_before = now - min_idle.as_millis() as i64;
    let rows: Vec<(i64, String, String, u32)> = {
        let mut stmt = tx.prepare(
            "SELECT p.seq, e.entry_id, e.fields_json, p.delivery_count
             FROM stream_pending p JOIN stream_entries e ON e.seq = p.seq
             WHERE p.stream = ?1 AND p.group_name = ?2 AND p.consumer = ?3
               AND p.last_delivered_at <= ?4
             ORDER BY p.seq
             LIMIT ?5",
        )?;
        let rows = stmt
            .query_map(
                params![stream, group, consumer, idle_before, count as i64],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for (seq, _, _, _) in &rows {
        tx.execute(
            "UPDATE stream_pending
             SET delivery_count = delivery_count + 1, last_delivered_at = ?4
             WHERE stream = ?1 AND group_name = ?2 AND seq = ?3",
            params![stream, group, seq, now],
        )?;
    }
    tx.commit()?;

    rows.iter()
        .map(|(_, entry_id, fields_json, delivered)| {
            decode_entry(entry_id, fields_json, delivered + 1)
        })
        .collect()
}
