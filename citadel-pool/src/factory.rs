//! Driver seam.

use async_trait::async_trait;
use citadel_tenancy::TenantPoolConfig;

/// Boxed error returned by drivers
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Opens and checks connections for a database driver.
///
/// The registry never talks to a database directly; wrap your driver's
/// connection type in an implementation of this trait.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open a new connection using the tenant's configuration
    async fn connect(&self, config: &TenantPoolConfig) -> Result<Self::Connection, BoxError>;

    /// Check an idle connection before handing it out
    async fn is_valid(&self, _conn: &mut Self::Connection) -> bool {
        true
    }

    /// Cheap synchronous check run when a lease is returned
    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
