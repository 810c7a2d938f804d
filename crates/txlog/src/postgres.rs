use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventId, EventType, GlobalTxId, LocalTxId, Result, TxEvent, TxEventQuery, TxLogError,
    TxStatus, store::TxLogStore,
};

const EVENT_COLUMNS: &str = "id, event_type, global_tx_id, local_tx_id, parent_tx_id, \
     service_name, instance_id, timestamp, payload, compensation_method, confirm_method, \
     cancel_method, timeout_secs, retries, status";

/// PostgreSQL-backed transaction log store.
#[derive(Clone)]
pub struct PostgresTxLogStore {
    pool: PgPool,
}

impl PostgresTxLogStore {
    /// Creates a new PostgreSQL log store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_event(row: PgRow) -> Result<TxEvent> {
        let event_type_name: String = row.try_get("event_type")?;
        let event_type = EventType::parse_str(&event_type_name).ok_or_else(|| {
            TxLogError::InvalidEvent(format!("unknown event type: {event_type_name}"))
        })?;

        let status = match row.try_get::<Option<String>, _>("status")? {
            Some(name) => Some(TxStatus::parse_str(&name).ok_or_else(|| {
                TxLogError::InvalidEvent(format!("unknown tx status: {name}"))
            })?),
            None => None,
        };

        Ok(TxEvent {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type,
            global_tx_id: GlobalTxId::from_uuid(row.try_get::<Uuid, _>("global_tx_id")?),
            local_tx_id: row
                .try_get::<Option<Uuid>, _>("local_tx_id")?
                .map(LocalTxId::from_uuid),
            parent_tx_id: row
                .try_get::<Option<Uuid>, _>("parent_tx_id")?
                .map(LocalTxId::from_uuid),
            service_name: row.try_get("service_name")?,
            instance_id: row.try_get("instance_id")?,
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            compensation_method: row.try_get("compensation_method")?,
            confirm_method: row.try_get("confirm_method")?,
            cancel_method: row.try_get("cancel_method")?,
            timeout_secs: row
                .try_get::<Option<i64>, _>("timeout_secs")?
                .map(|secs| secs as u64),
            retries: row.try_get("retries")?,
            status,
        })
    }
}

#[async_trait]
impl TxLogStore for PostgresTxLogStore {
    async fn append(&self, event: TxEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO transaction_events (id, event_type, global_tx_id, local_tx_id,
                parent_tx_id, service_name, instance_id, timestamp, payload,
                compensation_method, confirm_method, cancel_method, timeout_secs, retries, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(event.event_id.as_uuid())
        .bind(event.event_type.as_str())
        .bind(event.global_tx_id.as_uuid())
        .bind(event.local_tx_id.map(|id| id.as_uuid()))
        .bind(event.parent_tx_id.map(|id| id.as_uuid()))
        .bind(&event.service_name)
        .bind(&event.instance_id)
        .bind(event.timestamp)
        .bind(&event.payload)
        .bind(&event.compensation_method)
        .bind(&event.confirm_method)
        .bind(&event.cancel_method)
        .bind(event.timeout_secs.map(|secs| secs as i64))
        .bind(event.retries)
        .bind(event.status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        metrics::counter!("txlog_events_appended_total").increment(1);
        Ok(())
    }

    async fn events_for(&self, global_tx_id: GlobalTxId) -> Result<Vec<TxEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM transaction_events WHERE global_tx_id = $1 ORDER BY seq ASC"
        ))
        .bind(global_tx_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn query_events(&self, query: TxEventQuery) -> Result<Vec<TxEvent>> {
        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM transaction_events WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.global_tx_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND global_tx_id = ${param_count}"));
        }
        if query.event_types.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ANY(${param_count})"));
        }
        if query.service_name.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND service_name = ${param_count}"));
        }
        if query.from_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp >= ${param_count}"));
        }
        if query.to_timestamp.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND timestamp <= ${param_count}"));
        }

        sql.push_str(" ORDER BY seq ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }
        if query.offset.is_some() {
            param_count += 1;
            sql.push_str(&format!(" OFFSET ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(id) = query.global_tx_id {
            sqlx_query = sqlx_query.bind(id.as_uuid());
        }
        if let Some(event_types) = query.event_types {
            let names: Vec<&str> = event_types.iter().map(|t| t.as_str()).collect();
            sqlx_query = sqlx_query.bind(
                names
                    .into_iter()
                    .map(String::from)
                    .collect::<Vec<String>>(),
            );
        }
        if let Some(service) = query.service_name {
            sqlx_query = sqlx_query.bind(service);
        }
        if let Some(from_ts) = query.from_timestamp {
            sqlx_query = sqlx_query.bind(from_ts);
        }
        if let Some(to_ts) = query.to_timestamp {
            sqlx_query = sqlx_query.bind(to_ts);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }
        if let Some(offset) = query.offset {
            sqlx_query = sqlx_query.bind(offset as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn global_tx_ids(&self) -> Result<Vec<GlobalTxId>> {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT global_tx_id FROM transaction_events
            GROUP BY global_tx_id
            ORDER BY MIN(seq) ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(GlobalTxId::from_uuid).collect())
    }

    async fn find_non_terminal(&self, before: DateTime<Utc>) -> Result<Vec<GlobalTxId>> {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT global_tx_id FROM transaction_events
            GROUP BY global_tx_id
            HAVING COUNT(*) FILTER (WHERE event_type IN ('SagaEnded', 'SagaSuspended')) = 0
               AND MIN(timestamp) < $1
            ORDER BY MIN(seq) ASC
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(GlobalTxId::from_uuid).collect())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> Result<Vec<GlobalTxId>> {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT global_tx_id FROM transaction_events
            GROUP BY global_tx_id
            HAVING COUNT(*) FILTER (WHERE event_type IN ('SagaEnded', 'SagaSuspended')) = 0
               AND MIN(timestamp + timeout_secs * interval '1 second')
                   FILTER (WHERE event_type IN ('SagaStarted', 'TccStarted')
                             AND timeout_secs IS NOT NULL) <= $1
            ORDER BY MIN(seq) ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(GlobalTxId::from_uuid).collect())
    }

    async fn delete_by_global_tx_id(&self, global_tx_id: GlobalTxId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM transaction_events WHERE global_tx_id = $1")
            .bind(global_tx_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
