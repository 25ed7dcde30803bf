use std::future::Future;

use futures::stream::BoxStream;
use sqlx::SqlitePool;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::instrument;

pub mod product;

pub static MIGRATOR: Migrator = sqlx::migrate!();

/// Uniform CRUD over one entity type `T` keyed by `K`.
///
/// Implementors hold nothing but a handle to the storage engine, so calls
/// from independent tasks never serialize on the repository itself.
/// Consistency is whatever the engine's transactions provide.
pub trait GenericRepository<T, K>: Send + Sync {
    /// Key-less input accepted by [`GenericRepository::add`].
    type Draft: Send;

    fn get_by_id(&self, key: K) -> impl Future<Output = Result<T, RepositoryError>> + Send;

    /// Lazily streams every stored entity. Each call starts a fresh query.
    fn get_all(&self) -> BoxStream<'_, Result<T, RepositoryError>>;

    /// Validates and stores `draft`, returning it with its assigned key.
    fn add(&self, draft: Self::Draft) -> impl Future<Output = Result<T, RepositoryError>> + Send;

    fn update(&self, entity: T) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn delete(&self, key: K) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("No entity exists with the requested key")]
    NotFound,

    #[error("Entity failed validation: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage engine is unavailable")]
    TransportUnavailable(#[source] sqlx::Error),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => Self::NotFound,
            other => Self::TransportUnavailable(other),
        }
    }
}

#[derive(Debug, Clone)]
#[must_use]
pub struct Repository {
    pub products: product::ProductRepository,
}

impl Repository {
    pub const fn new(connection: SqlitePool) -> Self {
        let products = product::ProductRepository { connection };
        Self { products }
    }
}

/// Opens the storage pool and brings the schema up to date.
#[instrument(err(Debug))]
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    MIGRATOR
        .run(&pool)
        .await
        .inspect(|()| tracing::debug!("Database migrations applied"))?;

    Ok(pool)
}

/// Single-connection in-memory database; every connection to `sqlite::memory:`
/// is its own database, so the pool must never open a second one.
#[cfg(test)]
pub(crate) async fn in_memory() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    MIGRATOR.run(&pool).await.unwrap();
    pool
}
