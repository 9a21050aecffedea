pub mod error;
pub mod models;
pub mod pool;
pub mod pool_manager;
pub mod udbc;
#[cfg(feature = "mysql")]
pub mod udbc_mysql;
