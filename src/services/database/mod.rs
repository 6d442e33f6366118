// Database connectors, one per provider, selected through a registry
pub mod connector;
pub mod fetch_query;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod mysql;
pub mod postgresql;
#[cfg(feature = "mssql")]
pub mod sqlserver;

pub use connector::DatabaseConnector;
pub use fetch_query::{build_mongo_fetch, build_sql_fetch, MongoFindSpec, DEFAULT_DATASET_TABLE};
pub use mysql::MySqlConnector;
pub use postgresql::PostgresConnector;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::api::middleware::AppError;
use crate::models::DatabaseProvider;
use crate::services::ConnectionPoolManager;

/// Connectors keyed by provider
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<DatabaseProvider, Arc<dyn DatabaseConnector>>,
}

impl ConnectorRegistry {
    /// Registry with every connector compiled into this build
    pub fn with_defaults(pool_manager: Arc<ConnectionPoolManager>, query_timeout: Duration) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(PostgresConnector::new(pool_manager.clone(), query_timeout)));
        registry.register(Arc::new(MySqlConnector::new(pool_manager.clone(), query_timeout)));
        #[cfg(feature = "mssql")]
        registry.register(Arc::new(sqlserver::SqlServerConnector::new(pool_manager.clone(), query_timeout)));
        #[cfg(feature = "mongodb")]
        registry.register(Arc::new(mongo::MongoConnector::new(pool_manager.clone(), query_timeout)));

        tracing::info!("Registered database connectors: {:?}", registry.providers());
        registry
    }

    /// Add or replace the connector for its provider
    pub fn register(&mut self, connector: Arc<dyn DatabaseConnector>) {
        self.connectors.insert(connector.provider(), connector);
    }

    /// Connector for `provider`.
    ///
    /// A provider with no registered connector reports `DriverNotInstalled`
    /// with the cargo feature that would compile it in.
    pub fn get(&self, provider: DatabaseProvider) -> Result<Arc<dyn DatabaseConnector>, AppError> {
        self.connectors
            .get(&provider)
            .cloned()
            .ok_or_else(|| AppError::DriverNotInstalled {
                driver: provider.driver_name().to_string(),
                hint: match provider.cargo_feature() {
                    Some(feature) => format!(
                        "Support for {} is not compiled in. Rebuild with `--features {}`.",
                        provider, feature
                    ),
                    None => format!("No connector is registered for {}.", provider),
                },
            })
    }

    pub fn providers(&self) -> Vec<DatabaseProvider> {
        let mut providers: Vec<DatabaseProvider> = self.connectors.keys().copied().collect();
        providers.sort_by_key(|p| p.as_str());
        providers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConnectorRegistry {
        ConnectorRegistry::with_defaults(Arc::new(ConnectionPoolManager::new()), Duration::from_secs(5))
    }

    #[test]
    fn test_builtin_providers_are_registered() {
        let registry = registry();
        assert!(registry.get(DatabaseProvider::PostgreSQL).is_ok());
        assert_eq!(
            registry.get(DatabaseProvider::MySQL).unwrap().provider(),
            DatabaseProvider::MySQL
        );
    }

    #[cfg(not(feature = "mssql"))]
    #[test]
    fn test_missing_driver_names_feature() {
        match registry().get(DatabaseProvider::SqlServer) {
            Err(AppError::DriverNotInstalled { driver, hint }) => {
                assert_eq!(driver, "tiberius");
                assert!(hint.contains("--features mssql"));
            }
            other => panic!("expected DriverNotInstalled, got {:?}", other.map(|c| c.provider())),
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = ConnectorRegistry::default();
        assert!(registry.providers().is_empty());
        assert!(matches!(
            registry.get(DatabaseProvider::PostgreSQL),
            Err(AppError::DriverNotInstalled { .. })
        ));
    }
}
