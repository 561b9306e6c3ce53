//! Postgres-backed store.
//!
//! Every query filters on `org_id`, so a record of another organization is
//! never read or written. The two all-or-nothing operations are stored
//! functions, called once per operation:
//!
//! - `create_order_with_lines(org, customer, number, status, delivery_date, notes, ship_to, created_by, lines jsonb) -> uuid`
//! - `allocate_order_tier1(org, order, actor) -> jsonb` (a serialized [`Tier1Outcome`](nursery_inventory::Tier1Outcome))
//!
//! Multi-row writes (Tier-2 allocation, load transitions) run in one
//! transaction and are conditional on the version column of the row they
//! were planned against.
//!
//! ## Error mapping
//!
//! | SQLx error | Postgres code | `StoreError` | Scenario |
//! |---|---|---|---|
//! | Database | `23505` | `Conflict` | duplicate order number, idempotency key, or second active delivery item |
//! | Database | `P0001` | `Database` | `RAISE EXCEPTION` inside a stored function, message kept verbatim |
//! | Database | other | `Database` | any other constraint or SQL failure |
//! | RowNotFound, PoolClosed, Io, ... | n/a | `Storage` | connection or decoding failures |

mod allocation;
mod catalog;
mod dispatch;
mod orders;
mod outbox;

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::StoreError;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") => StoreError::Conflict(format!(
                "{operation}: {}",
                db_err.message()
            )),
            // Stored-function messages are user-facing.
            Some("P0001") => StoreError::Database(db_err.message().to_string()),
            _ => StoreError::Database(format!("database error in {operation}: {}", db_err.message())),
        },
        other => StoreError::Storage(format!("{operation}: {other}")),
    }
}

/// Versions are `u64` in the domain and `BIGINT` in the schema.
pub(crate) fn version_to_db(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

pub(crate) fn version_from_db(version: i64) -> u64 {
    u64::try_from(version).unwrap_or(0)
}

pub(crate) fn unknown_status(column: &str, value: &str) -> StoreError {
    StoreError::storage(format!("unknown {column} '{value}'"))
}
