//! Database bootstrap and schema-sync infrastructure

pub mod init;
pub mod schema_sync;

pub use init::init_database_pool;
