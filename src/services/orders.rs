//! Order (clan) upkeep.
//!
//! Orders are created on demand by a founding user. An upkeep sweep
//! watches rosters: once an order has sat below the minimum
//! membership for the threshold duration it is marked unused. Ids are
//! never recycled and records never physically removed.

use crate::database::entities::order::{Order, MINIMUM_ORDER_MEMBERS};
use crate::database::entities::ScoreRecord;
use crate::database::{AuditEvent, AuditLog, OrderStore, StoreError, StoreResult, UserStore};
use crate::utils::types::{OrderId, UserId};
use chrono::Utc;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Interval between upkeep sweeps
pub const ORDER_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// How long an order may sit below the membership minimum
pub const BELOW_MINIMUM_GRACE_SECS: i64 = 14 * 24 * 60 * 60;

pub struct Orders {
    orders: Arc<dyn OrderStore>,
    users: Arc<dyn UserStore>,
    audit: Arc<dyn AuditLog>,
}

impl Orders {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        users: Arc<dyn UserStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Orders {
        Orders {
            orders,
            users,
            audit,
        }
    }

    /// Founds a new order with the founding user as leader and first
    /// member
    pub async fn create(
        &self,
        founder: UserId,
        name: String,
        contact_email: String,
        maintenance_password: String,
        member_password: String,
    ) -> StoreResult<Order> {
        let mut user = self
            .users
            .get_by_id(founder)
            .await?
            .ok_or(StoreError::NotFound)?;

        let order = self
            .orders
            .insert(Order {
                id: 0,
                name,
                leader: founder,
                founded: Utc::now().timestamp(),
                contact_email,
                maintenance_password,
                member_password,
                members: vec![founder],
                below_minimum_since: 0,
                unranked_score: ScoreRecord::default(),
                ranked_score: ScoreRecord::default(),
            })
            .await?;

        user.order = order.id;
        self.users.update(&user).await?;

        if let Err(err) = self
            .audit
            .append(AuditEvent::now(
                "order-created",
                format!("order={} leader={}", order.id, founder),
            ))
            .await
        {
            warn!("failed to audit creation of order {}: {}", order.id, err);
        }
        info!("order founded (OID: {}, leader: {})", order.id, founder);
        Ok(order)
    }

    /// Adds a member who presented the member password
    pub async fn join(
        &self,
        order_id: OrderId,
        user_id: UserId,
        member_password: &str,
    ) -> StoreResult<bool> {
        let mut order = self
            .orders
            .get_by_id(order_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if order.is_unused() || order.member_password != member_password {
            return Ok(false);
        }

        let mut user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        if !order.members.contains(&user_id) {
            order.members.push(user_id);
            if order.members.len() >= MINIMUM_ORDER_MEMBERS {
                order.below_minimum_since = 0;
            }
            self.orders.update(&order).await?;
        }
        user.order = order.id;
        self.users.update(&user).await?;
        Ok(true)
    }

    /// Removes a member from their order
    pub async fn leave(&self, user_id: UserId) -> StoreResult<()> {
        let mut user = self
            .users
            .get_by_id(user_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        if user.order == 0 {
            return Ok(());
        }

        if let Some(mut order) = self.orders.get_by_id(user.order).await? {
            order.members.retain(|member| *member != user_id);
            self.orders.update(&order).await?;
        }
        user.order = 0;
        self.users.update(&user).await?;
        Ok(())
    }

    /// One upkeep pass over every live order
    pub async fn sweep(&self) -> StoreResult<usize> {
        let now = Utc::now().timestamp();
        let mut retired = 0usize;

        for mut order in self.orders.iterate_all().await? {
            if order.is_unused() {
                continue;
            }

            if order.members.len() >= MINIMUM_ORDER_MEMBERS {
                if order.below_minimum_since != 0 {
                    order.below_minimum_since = 0;
                    self.orders.update(&order).await?;
                }
                continue;
            }

            if order.below_minimum_since == 0 {
                order.below_minimum_since = now;
                self.orders.update(&order).await?;
                continue;
            }

            if now - order.below_minimum_since >= BELOW_MINIMUM_GRACE_SECS {
                let order_id = order.id;
                self.orders.mark_unused(order_id).await?;
                retired += 1;
                if let Err(err) = self
                    .audit
                    .append(AuditEvent::now(
                        "order-retired",
                        format!("order={}", order_id),
                    ))
                    .await
                {
                    warn!("failed to audit retirement of order {}: {}", order_id, err);
                }
            }
        }

        if retired > 0 {
            info!("order sweep retired {} orders", retired);
        }
        Ok(retired)
    }
}

/// Background loop driving upkeep sweeps
pub async fn run_order_sweep(orders: Arc<Orders>) {
    let mut interval = tokio::time::interval(ORDER_SWEEP_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await;
    loop {
        interval.tick().await;
        if let Err(err) = orders.sweep().await {
            warn!("order sweep failed: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::database::entities::user::UserFlags;
    use crate::database::entities::NewUser;
    use crate::database::memory::{MemoryAuditLog, MemoryOrderStore, MemoryUserStore};
    use crate::utils::hashing::PasswordScheme;

    async fn service() -> (Orders, Arc<MemoryOrderStore>, Arc<MemoryUserStore>) {
        let order_store = Arc::new(MemoryOrderStore::default());
        let user_store = Arc::new(MemoryUserStore::default());
        let audit = Arc::new(MemoryAuditLog::default());
        (
            Orders::new(order_store.clone(), user_store.clone(), audit),
            order_store,
            user_store,
        )
    }

    async fn user(store: &MemoryUserStore, login: &str) -> UserId {
        store
            .insert(NewUser {
                login: login.to_string(),
                display_name: login.to_string(),
                password_hash: String::new(),
                salt: Vec::new(),
                scheme: PasswordScheme::Bcrypt,
                flags: UserFlags::empty(),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_create_and_join() {
        let (orders, _order_store, user_store) = service().await;
        let founder = user(&user_store, "founder").await;
        let joiner = user(&user_store, "joiner").await;

        let order = orders
            .create(
                founder,
                "The Wolves".to_string(),
                String::new(),
                "maint".to_string(),
                "secret".to_string(),
            )
            .await
            .unwrap();

        assert!(!orders.join(order.id, joiner, "wrong").await.unwrap());
        assert!(orders.join(order.id, joiner, "secret").await.unwrap());

        let joined = user_store.get_by_id(joiner).await.unwrap().unwrap();
        assert_eq!(joined.order, order.id);
    }

    #[tokio::test]
    async fn test_sweep_retires_underpopulated_orders() {
        let (orders, order_store, user_store) = service().await;
        let founder = user(&user_store, "founder").await;
        let order = orders
            .create(
                founder,
                "Lonely".to_string(),
                String::new(),
                "m".to_string(),
                "p".to_string(),
            )
            .await
            .unwrap();

        // First sweep stamps the grace period start
        assert_eq!(orders.sweep().await.unwrap(), 0);

        // Age the stamp past the grace period
        let mut stored = order_store.get_by_id(order.id).await.unwrap().unwrap();
        assert_ne!(stored.below_minimum_since, 0);
        stored.below_minimum_since -= BELOW_MINIMUM_GRACE_SECS + 1;
        order_store.update(&stored).await.unwrap();

        assert_eq!(orders.sweep().await.unwrap(), 1);
        let retired = order_store.get_by_id(order.id).await.unwrap().unwrap();
        assert!(retired.is_unused());
    }
}
