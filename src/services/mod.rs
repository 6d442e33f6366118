pub mod api_source;
pub mod connection_pool;
pub mod data_profiler;
pub mod data_source_service;
pub mod database; // Connectors for PostgreSQL, MySQL, SQL Server and MongoDB
pub mod db_service;
pub mod file_parser;
pub mod file_store;
pub mod query_cache; // Query result cache with LRU and TTL
pub mod query_optimizer;
pub mod row_pipeline;
pub mod schema_detector;
pub mod secrets;
pub mod sql_builder;
pub mod type_inference;

pub use api_source::ApiClient;
pub use connection_pool::ConnectionPoolManager;
pub use data_source_service::DataSourceService;
pub use db_service::DbService;
pub use file_parser::FileParser;
pub use file_store::{FileStore, HttpBlobStore, LocalFileStore};
pub use query_cache::{CacheStats, QueryCache};
pub use query_optimizer::QueryOptimizer;
pub use secrets::SecretCipher;
pub use sql_builder::SqlBuilder;
