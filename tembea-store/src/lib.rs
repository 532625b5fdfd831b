pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod events;
pub mod inventory_repo;
pub mod memory;
pub mod payment_repo;
pub mod redis_repo;

pub use booking_repo::StoreBookingRepository;
pub use database::{DbClient, RetryPolicy};
pub use events::{EventProducer, KafkaNotifier};
pub use inventory_repo::StoreInventoryRepository;
pub use memory::MemoryStore;
pub use payment_repo::StorePaymentRepository;
pub use redis_repo::RedisClient;
