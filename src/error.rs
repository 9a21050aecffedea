use thiserror::Error;

/// Represents errors that can occur in the pool module.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool exhausted: {total} connections created (maxsize is {maxsize})")]
    Exhausted { total: u32, maxsize: u32 },
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Invalid pool configuration: {0}")]
    Configuration(String),
    #[error("Pool is closed")]
    Closed,
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Unsupported database type: {0}")]
    UnsupportedDatabaseType(String),
}

#[cfg(feature = "mysql")]
impl From<mysql_async::Error> for PoolError {
    fn from(e: mysql_async::Error) -> Self {
        PoolError::Connection(e.to_string())
    }
}
