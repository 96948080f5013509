use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Error as PoolError, Pool};
use diesel::result::Error as DieselError;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 2;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Builds the pool without opening a connection. A database that is down at
/// boot becomes usable as soon as it comes back; pending migrations are
/// applied by the first connection that opens.
pub fn init_pool_with_size(database_url: &str, max_size: u32) -> PgPool {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .max_size(max_size.max(1))
        .min_idle(Some(0))
        .connection_timeout(Duration::from_secs(10))
        .connection_customizer(Box::new(MigrateOnConnect::default()))
        .build_unchecked(manager)
}

/// Runs pending migrations on new connections until one run succeeds. A
/// failed run rejects the connection, so the pool retries on the next
/// checkout.
#[derive(Debug, Default)]
struct MigrateOnConnect {
    migrated: Mutex<bool>,
}

impl CustomizeConnection<PgConnection, PoolError> for MigrateOnConnect {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), PoolError> {
        let mut migrated = self.migrated.lock().unwrap_or_else(PoisonError::into_inner);
        if *migrated {
            return Ok(());
        }
        match conn.run_pending_migrations(MIGRATIONS) {
            Ok(applied) => {
                if !applied.is_empty() {
                    tracing::info!(count = applied.len(), "applied pending migrations");
                }
                *migrated = true;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "migrations failed; will retry on next connection");
                Err(PoolError::QueryError(DieselError::QueryBuilderError(err)))
            }
        }
    }
}
