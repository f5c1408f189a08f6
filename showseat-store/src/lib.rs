pub mod app_config;
pub mod database;
pub mod memory;
pub mod redis_repo;
pub mod reservation_repo;

pub use database::DbClient;
pub use memory::{MemoryLockStore, MemoryRecordStore};
pub use redis_repo::RedisLockStore;
pub use reservation_repo::PgRecordStore;
