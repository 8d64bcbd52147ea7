//! Store seams the server core depends on.
//!
//! The core never touches a backend directly: all persistence flows
//! through these traits so tests (and ephemeral deployments) can swap
//! the in-memory implementations in for the file-backed ones.

use crate::database::entities::{NewUser, Order, User};
use crate::utils::types::{OrderId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

pub mod entities;
pub mod file;
pub mod memory;
pub mod record;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("name is already taken")]
    DuplicateName,
    #[error("stored record is corrupt: {0}")]
    Corrupt(#[from] record::RecordError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handles for every store the server consumes
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub orders: Arc<dyn OrderStore>,
    pub bans: Arc<dyn BanList>,
    pub audit: Arc<dyn AuditLog>,
}

impl Stores {
    /// In-memory stores, used by tests and ephemeral runs
    pub fn in_memory() -> Stores {
        Stores {
            users: Arc::new(memory::MemoryUserStore::default()),
            orders: Arc::new(memory::MemoryOrderStore::default()),
            bans: Arc::new(memory::MemoryBanList::default()),
            audit: Arc::new(memory::MemoryAuditLog::default()),
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>>;

    /// Lookup by login name, case-insensitive
    async fn get_by_name(&self, login: &str) -> StoreResult<Option<User>>;

    /// Inserts a new account, assigning the next monotonic id
    async fn insert(&self, user: NewUser) -> StoreResult<User>;

    async fn update(&self, user: &User) -> StoreResult<()>;

    async fn iterate_all(&self) -> StoreResult<Vec<User>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_by_id(&self, id: OrderId) -> StoreResult<Option<Order>>;

    async fn get_by_name(&self, name: &str) -> StoreResult<Option<Order>>;

    /// Inserts a new order, assigning the next monotonic id
    async fn insert(&self, order: Order) -> StoreResult<Order>;

    async fn update(&self, order: &Order) -> StoreResult<()>;

    /// Marks the order's record slot unused; the id is never recycled
    async fn mark_unused(&self, id: OrderId) -> StoreResult<()>;

    async fn iterate_all(&self) -> StoreResult<Vec<Order>>;
}

#[async_trait]
pub trait BanList: Send + Sync {
    /// Whether the host-order address is barred from connecting
    async fn is_banned(&self, addr: u32) -> StoreResult<bool>;
}

/// One appended audit entry
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub time: DateTime<Utc>,
    pub kind: &'static str,
    pub detail: String,
}

impl AuditEvent {
    pub fn now(kind: &'static str, detail: String) -> AuditEvent {
        AuditEvent {
            time: Utc::now(),
            kind,
            detail,
        }
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, event: AuditEvent) -> StoreResult<()>;
}
