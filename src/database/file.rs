//! Fixed-record file store implementations.
//!
//! Each database is a flat file: the shared header followed by
//! fixed-size records. All records are cached in memory at open; the
//! file is the durable copy and every mutation writes through to the
//! record's slot before the cache is updated.

use crate::database::entities::order::{Order, ORDER_RECORD_SIZE, UNUSED_ORDER_ID};
use crate::database::entities::user::{User, USER_RECORD_SIZE};
use crate::database::entities::NewUser;
use crate::database::record::{read_db_header, write_db_header, DB_HEADER_SIZE};
use crate::database::{
    AuditEvent, AuditLog, BanList, OrderStore, StoreError, StoreResult, UserStore,
};
use crate::utils::types::{OrderId, UserId};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::info;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::SeekFrom;
use std::net::Ipv4Addr;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Byte offset of the record in the given slot
fn slot_offset(slot: u32, record_size: usize) -> u64 {
    DB_HEADER_SIZE as u64 + slot as u64 * record_size as u64
}

/// Opens (or creates) a record file, returning the handle and the raw
/// record payloads
async fn open_record_file(
    path: &Path,
    record_size: usize,
) -> StoreResult<(File, Vec<Bytes>)> {
    let existed = path.exists();
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
        .await?;

    if !existed {
        let mut header = BytesMut::new();
        write_db_header(&mut header, 0);
        file.write_all(&header).await?;
        file.flush().await?;
        return Ok((file, Vec::new()));
    }

    let mut contents = Vec::new();
    file.read_to_end(&mut contents).await?;
    let mut contents = Bytes::from(contents);
    let count = read_db_header(&mut contents)?;

    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if contents.len() < record_size {
            return Err(StoreError::Corrupt(
                crate::database::record::RecordError::Truncated,
            ));
        }
        records.push(contents.split_to(record_size));
    }

    Ok((file, records))
}

/// Rewrites the record in `slot` and, when the file grew, the header
/// record count
async fn write_record(
    file: &mut File,
    slot: u32,
    record: &[u8],
    record_size: usize,
    new_count: Option<u32>,
) -> StoreResult<()> {
    file.seek(SeekFrom::Start(slot_offset(slot, record_size)))
        .await?;
    file.write_all(record).await?;
    if let Some(count) = new_count {
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(&count.to_le_bytes()).await?;
    }
    file.flush().await?;
    Ok(())
}

struct UserFileInner {
    file: File,
    next_id: UserId,
    /// user id → record slot
    slots: HashMap<UserId, u32>,
    cache: BTreeMap<UserId, User>,
}

/// User database over a fixed-record file ('PLAY' records)
pub struct FileUserStore {
    inner: Mutex<UserFileInner>,
}

impl FileUserStore {
    pub async fn open(path: &Path) -> StoreResult<FileUserStore> {
        let (file, records) = open_record_file(path, USER_RECORD_SIZE).await?;

        let mut slots = HashMap::new();
        let mut cache = BTreeMap::new();
        let mut next_id = 0;
        for (slot, raw) in records.into_iter().enumerate() {
            let user = User::from_record(raw)?;
            next_id = next_id.max(user.id);
            slots.insert(user.id, slot as u32);
            cache.insert(user.id, user);
        }

        info!("loaded {} users from {}", cache.len(), path.display());

        Ok(FileUserStore {
            inner: Mutex::new(UserFileInner {
                file,
                next_id,
                slots,
                cache,
            }),
        })
    }
}

#[async_trait]
impl UserStore for FileUserStore {
    async fn get_by_id(&self, id: UserId) -> StoreResult<Option<User>> {
        Ok(self.inner.lock().await.cache.get(&id).cloned())
    }

    async fn get_by_name(&self, login: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .cache
            .values()
            .find(|user| user.login.eq_ignore_ascii_case(login))
            .cloned())
    }

    async fn insert(&self, user: NewUser) -> StoreResult<User> {
        let inner = &mut *self.inner.lock().await;
        if inner
            .cache
            .values()
            .any(|existing| existing.login.eq_ignore_ascii_case(&user.login))
        {
            return Err(StoreError::DuplicateName);
        }

        inner.next_id += 1;
        let user = user.into_user(inner.next_id);
        let slot = inner.slots.len() as u32;
        write_record(
            &mut inner.file,
            slot,
            &user.to_record(),
            USER_RECORD_SIZE,
            Some(slot + 1),
        )
        .await?;
        inner.slots.insert(user.id, slot);
        inner.cache.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: &User) -> StoreResult<()> {
        let inner = &mut *self.inner.lock().await;
        let slot = *inner.slots.get(&user.id).ok_or(StoreError::NotFound)?;
        write_record(
            &mut inner.file,
            slot,
            &user.to_record(),
            USER_RECORD_SIZE,
            None,
        )
        .await?;
        inner.cache.insert(user.id, user.clone());
        Ok(())
    }

    async fn iterate_all(&self) -> StoreResult<Vec<User>> {
        Ok(self.inner.lock().await.cache.values().cloned().collect())
    }
}

struct OrderFileInner {
    file: File,
    next_id: OrderId,
    /// slot-keyed by the id the order was created with, stable across
    /// mark_unused
    slots: HashMap<OrderId, u32>,
    cache: BTreeMap<OrderId, Order>,
}

/// Order database over a fixed-record file ('ORDR' records)
pub struct FileOrderStore {
    inner: Mutex<OrderFileInner>,
}

impl FileOrderStore {
    pub async fn open(path: &Path) -> StoreResult<FileOrderStore> {
        let (file, records) = open_record_file(path, ORDER_RECORD_SIZE).await?;

        let mut slots = HashMap::new();
        let mut cache = BTreeMap::new();
        let mut next_id = 0;
        for (slot, raw) in records.into_iter().enumerate() {
            let order = Order::from_record(raw)?;
            // Unused slots stay on disk; key them by their slot position
            // so the live map never collides with the sentinel id
            let key = if order.is_unused() {
                u32::MAX - slot as u32
            } else {
                order.id
            };
            if !order.is_unused() {
                next_id = next_id.max(order.id);
            }
            slots.insert(key, slot as u32);
            cache.insert(key, order);
        }

        info!("loaded {} orders from {}", cache.len(), path.display());

        Ok(FileOrderStore {
            inner: Mutex::new(OrderFileInner {
                file,
                next_id,
                slots,
                cache,
            }),
        })
    }
}

#[async_trait]
impl OrderStore for FileOrderStore {
    async fn get_by_id(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.inner.lock().await.cache.get(&id).cloned())
    }

    async fn get_by_name(&self, name: &str) -> StoreResult<Option<Order>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .cache
            .values()
            .find(|order| !order.is_unused() && order.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn insert(&self, mut order: Order) -> StoreResult<Order> {
        let inner = &mut *self.inner.lock().await;
        if inner
            .cache
            .values()
            .any(|existing| !existing.is_unused() && existing.name.eq_ignore_ascii_case(&order.name))
        {
            return Err(StoreError::DuplicateName);
        }

        inner.next_id += 1;
        order.id = inner.next_id;
        let slot = inner.slots.len() as u32;
        write_record(
            &mut inner.file,
            slot,
            &order.to_record(),
            ORDER_RECORD_SIZE,
            Some(slot + 1),
        )
        .await?;
        inner.slots.insert(order.id, slot);
        inner.cache.insert(order.id, order.clone());
        Ok(order)
    }

    async fn update(&self, order: &Order) -> StoreResult<()> {
        let inner = &mut *self.inner.lock().await;
        let slot = *inner.slots.get(&order.id).ok_or(StoreError::NotFound)?;
        write_record(
            &mut inner.file,
            slot,
            &order.to_record(),
            ORDER_RECORD_SIZE,
            None,
        )
        .await?;
        inner.cache.insert(order.id, order.clone());
        Ok(())
    }

    async fn mark_unused(&self, id: OrderId) -> StoreResult<()> {
        let inner = &mut *self.inner.lock().await;
        let slot = *inner.slots.get(&id).ok_or(StoreError::NotFound)?;
        let mut order = inner.cache.get(&id).ok_or(StoreError::NotFound)?.clone();
        order.id = UNUSED_ORDER_ID;
        write_record(
            &mut inner.file,
            slot,
            &order.to_record(),
            ORDER_RECORD_SIZE,
            None,
        )
        .await?;
        inner.cache.insert(id, order);
        Ok(())
    }

    async fn iterate_all(&self) -> StoreResult<Vec<Order>> {
        Ok(self.inner.lock().await.cache.values().cloned().collect())
    }
}

/// Ban list loaded from a text file: one dotted-quad address per line,
/// `#` comments and blank lines ignored
pub struct FileBanList {
    banned: HashSet<u32>,
}

impl FileBanList {
    pub async fn open(path: &Path) -> StoreResult<FileBanList> {
        let mut banned = HashSet::new();
        if path.exists() {
            let contents = tokio::fs::read_to_string(path).await?;
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match line.parse::<Ipv4Addr>() {
                    Ok(addr) => {
                        banned.insert(u32::from(addr));
                    }
                    Err(_) => {
                        log::warn!("ignoring unparseable ban list entry: {}", line);
                    }
                }
            }
        }
        info!("loaded {} banned addresses", banned.len());
        Ok(FileBanList { banned })
    }
}

#[async_trait]
impl BanList for FileBanList {
    async fn is_banned(&self, addr: u32) -> StoreResult<bool> {
        Ok(self.banned.contains(&addr))
    }
}

/// Append-only audit log file, one event per line
pub struct FileAuditLog {
    file: Mutex<File>,
}

impl FileAuditLog {
    pub async fn open(path: &Path) -> StoreResult<FileAuditLog> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(FileAuditLog {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl AuditLog for FileAuditLog {
    async fn append(&self, event: AuditEvent) -> StoreResult<()> {
        let line = format!(
            "{} {} {}\n",
            event.time.to_rfc3339(),
            event.kind,
            event.detail
        );
        let file = &mut *self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
