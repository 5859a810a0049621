use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::entities::{address, cart_item, order, order_item, payment, product, user};
use crate::errors::ServiceError;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Establishes a connection pool using pool settings from the app config.
pub async fn establish_connection(config: &AppConfig) -> Result<DbPool, ServiceError> {
    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .connect_timeout(Duration::from_secs(config.db_connect_timeout_secs))
        .sqlx_logging(false);

    debug!(
        max_connections = config.db_max_connections,
        "connecting to database"
    );
    let pool = Database::connect(opt).await?;
    info!("database connection established");
    Ok(pool)
}

/// Creates the schema for all entities if missing. Idempotent; used on
/// startup when `auto_migrate` is set and by the test harness.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    macro_rules! create_table {
        ($entity:expr) => {{
            let mut stmt = schema.create_table_from_entity($entity);
            stmt.if_not_exists();
            db.execute(backend.build(&stmt)).await?;
        }};
    }

    create_table!(user::Entity);
    create_table!(address::Entity);
    create_table!(product::Entity);
    create_table!(cart_item::Entity);
    create_table!(order::Entity);
    create_table!(order_item::Entity);
    create_table!(payment::Entity);

    info!("database schema ensured");
    Ok(())
}
