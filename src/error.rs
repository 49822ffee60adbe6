use thiserror::Error;

/// Errors returned by the service kit factories and builders.
///
/// Setup failures are split by stage so callers can tell a bad connection
/// string apart from an unreachable server:
///
/// - `PostgresConfig` - the URL could not be parsed
/// - `PostgresPool` - the pool could not establish its first connection
/// - `PostgresPing` - the pool came up but the health query failed
#[derive(Error, Debug)]
pub enum KitError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("parsing postgres config: {0}")]
    PostgresConfig(#[source] sqlx::Error),

    #[error("creating postgres pool: {0}")]
    PostgresPool(#[source] sqlx::Error),

    #[error("pinging postgres: {0}")]
    PostgresPing(#[source] sqlx::Error),

    #[error("connecting to NATS: {0}")]
    Nats(#[from] async_nats::ConnectError),

    #[error("installing global logger: {0}")]
    Logger(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

/// Convenience type alias for Results with KitError.
pub type KitResult<T> = Result<T, KitError>;
