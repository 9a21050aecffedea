use async_trait::async_trait;
use mysql_async::Opts;
use mysql_async::prelude::Queryable;

use crate::error::PoolError;
use crate::udbc::connector::Connector;

/// Opens MySQL connections for a pool via `mysql_async`.
pub struct MysqlConnector {
    opts: Opts,
}

impl MysqlConnector {
    pub fn new(url: impl AsRef<str>) -> Result<Self, PoolError> {
        let opts = Opts::from_url(url.as_ref())
            .map_err(|e| PoolError::InvalidDatabaseUrl(e.to_string()))?;
        Ok(Self { opts })
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    type Conn = mysql_async::Conn;

    async fn open(&self) -> Result<Self::Conn, PoolError> {
        Ok(mysql_async::Conn::new(self.opts.clone()).await?)
    }

    async fn is_usable(&self, conn: &mut Self::Conn) -> bool {
        conn.ping().await.is_ok()
    }

    async fn close(&self, conn: Self::Conn) {
        let _ = conn.disconnect().await;
    }
}
