use async_trait::async_trait;

use crate::error::PoolError;

/// Opens and closes raw database connections on behalf of a pool.
///
/// The connection type is opaque to the pool; everything that touches the
/// wire goes through this trait.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Send + 'static;

    /// Open a new raw connection to the database.
    async fn open(&self) -> Result<Self::Conn, PoolError>;

    /// Probe whether an idle connection is still alive before handing it out.
    async fn is_usable(&self, conn: &mut Self::Conn) -> bool;

    /// Close a connection. Close failures are swallowed; a connection being
    /// closed is already on its way out.
    async fn close(&self, conn: Self::Conn);
}
