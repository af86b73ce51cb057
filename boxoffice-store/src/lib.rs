pub mod app_config;
pub mod database;
pub mod events;
pub mod jobs;
pub mod ledger;
pub mod memory;
pub mod redis_repo;

pub use database::DbClient;
pub use events::{EventProducer, KafkaNotifier};
pub use jobs::RedisJobQueue;
pub use ledger::PgSeatLedger;
pub use memory::{MemoryJobQueue, MemoryLedger, MemoryLockService, RecordingNotifier};
pub use redis_repo::RedisClient;
