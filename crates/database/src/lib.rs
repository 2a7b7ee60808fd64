use sqlx::postgres::PgPool;

pub mod error;
pub mod queries;
pub mod store;
pub mod value;
pub mod writer;

pub use error::DatabaseError;

/// Read-side database handle. All mutating statements go through the
/// [`writer::MessageProcessor`] instead, which owns its own connection.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Connects and brings the schema up to date. The migrations only use
    /// `CREATE ... IF NOT EXISTS`, so a schema maintained by an external
    /// migration tool is left alone.
    pub async fn connect(database_string: &str) -> Result<Self, DatabaseError> {
        let pool = PgPool::connect(database_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|why| DatabaseError::Other(Box::new(why)))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
