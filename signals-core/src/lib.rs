pub mod config;
pub mod context;
pub mod db;
pub mod deep_link;
pub mod error;
pub mod memory;
pub mod redis;
pub mod schema;
pub mod storage;
pub mod store;
pub mod types;

pub use config::Config;
pub use context::AppContext;
pub use db::{DbPool, PgStore};
pub use deep_link::{DeepLink, LinkTarget, Route};
pub use error::{ParseEnumError, StorageError, StoreError, UnknownHandlerType};
pub use memory::MemoryStore;
pub use redis::{RedisPool, RedisStorage};
pub use storage::{FileStorage, LocalStorage, MemoryStorage};
pub use store::{BackendStore, CounterField, EngagementTotals, EventFilter, InsertOutcome};
