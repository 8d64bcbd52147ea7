//! In-memory store implementations.
//!
//! These back tests and ephemeral runs. They share the id-assignment
//! and uniqueness rules of the file stores so the seams behave the
//! same either way.

use crate::database::entities::order::UNUSED_ORDER_ID;
use crate::database::entities::{NewUser, Order, User};
use crate::database::{
    AuditEvent, AuditLog, BanList, OrderStore, StoreError, StoreResult, UserStore,
};
use crate::utils::types::{OrderId, UserId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<MemoryUsers>,
}

#[derive(Default)]
struct MemoryUsers {
    next_id: UserId,
    users: BTreeMap<UserId, User>,
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().users.get(&id).cloned())
    }

    async fn get_by_name(&self, login: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock();
        Ok(inner
            .users
            .values()
            .find(|user| user.login.eq_ignore_ascii_case(login))
            .cloned())
    }

    async fn insert(&self, user: NewUser) -> StoreResult<User> {
        let inner = &mut *self.inner.lock();
        if inner
            .users
            .values()
            .any(|existing| existing.login.eq_ignore_ascii_case(&user.login))
        {
            return Err(StoreError::DuplicateName);
        }
        inner.next_id += 1;
        let user = user.into_user(inner.next_id);
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let inner = &mut *self.inner.lock();
        match inner.users.get_mut(&user.id) {
            Some(slot) => {
                *slot = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn iterate_all(&self) -> StoreResult<Vec<User>> {
        Ok(self.inner.lock().users.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    inner: Mutex<MemoryOrders>,
}

#[derive(Default)]
struct MemoryOrders {
    next_id: OrderId,
    orders: BTreeMap<OrderId, Order>,
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get_by_id(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.inner.lock().orders.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> StoreResult<Option<Order>> {
        let inner = self.inner.lock();
        Ok(inner
            .orders
            .values()
            .find(|order| !order.is_unused() && order.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn insert(&self, mut order: Order) -> StoreResult<Order> {
        let inner = &mut *self.inner.lock();
        if inner
            .orders
            .values()
            .any(|existing| !existing.is_unused() && existing.name.eq_ignore_ascii_case(&order.name))
        {
            return Err(StoreError::DuplicateName);
        }
        inner.next_id += 1;
        order.id = inner.next_id;
        inner.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update(&self, order: &Order) -> StoreResult<()> {
        let inner = &mut *self.inner.lock();
        match inner.orders.get_mut(&order.id) {
            Some(slot) => {
                *slot = order.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn mark_unused(&self, id: OrderId) -> StoreResult<()> {
        let inner = &mut *self.inner.lock();
        match inner.orders.get_mut(&id) {
            Some(slot) => {
                slot.id = UNUSED_ORDER_ID;
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn iterate_all(&self) -> StoreResult<Vec<Order>> {
        Ok(self.inner.lock().orders.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct MemoryBanList {
    banned: Mutex<HashSet<u32>>,
}

impl MemoryBanList {
    pub fn ban(&self, addr: u32) {
        self.banned.lock().insert(addr);
    }
}

#[async_trait]
impl BanList for MemoryBanList {
    async fn is_banned(&self, addr: u32) -> StoreResult<bool> {
        Ok(self.banned.lock().contains(&addr))
    }
}

#[derive(Default)]
pub struct MemoryAuditLog {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, event: AuditEvent) -> StoreResult<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::database::entities::user::UserFlags;
    use crate::utils::hashing::PasswordScheme;

    fn new_user(login: &str) -> NewUser {
        NewUser {
            login: login.to_string(),
            display_name: login.to_string(),
            password_hash: String::new(),
            salt: Vec::new(),
            scheme: PasswordScheme::Bcrypt,
            flags: UserFlags::empty(),
        }
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let store = MemoryUserStore::default();
        let a = store.insert(new_user("a")).await.unwrap();
        let b = store.insert(new_user("b")).await.unwrap();
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn test_name_lookup_is_case_insensitive() {
        let store = MemoryUserStore::default();
        store.insert(new_user("Alice")).await.unwrap();
        assert!(store.get_by_name("aLiCe").await.unwrap().is_some());
        assert!(matches!(
            store.insert(new_user("ALICE")).await,
            Err(StoreError::DuplicateName)
        ));
    }
}
