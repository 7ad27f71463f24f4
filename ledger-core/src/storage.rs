//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `users` - User records (key: user_id, big endian)
//! - `events` - Events with their activities, items and payer entries (key: event_id)
//! - `meta` - Id sequences
//!
//! Every gateway call writes one `WriteBatch`, so a mutation either lands
//! completely or not at all. Read-modify-write cycles are serialized by a
//! process-local write lock.

use crate::{
    config::Config,
    error::{Error, Result},
    gateway::{
        apply_activity_changes, apply_event_changes, apply_flag_update, materialize_activity,
        ActivityChanges, EventChanges, FlagUpdate, PersistenceGateway, Sequences,
    },
    store::Snapshot,
    types::{Activity, ActivityId, ActivityItem, Event, EventId, User, UserId},
    validation::{ActivityDraft, EventDraft, UserProfile},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Column family names
const CF_USERS: &str = "users";
const CF_EVENTS: &str = "events";
const CF_META: &str = "meta";

const KEY_SEQUENCES: &[u8] = b"sequences";

/// RocksDB-backed persistence gateway
pub struct RocksStorage {
    db: Arc<DB>,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for RocksStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStorage")
            .field("path", &self.db.path())
            .finish_non_exhaustive()
    }
}

impl RocksStorage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.storage.data_dir;
        let tuning = &config.storage.rocksdb;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(tuning.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(tuning.max_write_buffer_number);
        db_opts.set_max_background_jobs(tuning.max_background_jobs);

        if tuning.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_USERS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_EVENTS, Self::cf_options_records()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB");

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options_records() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let cf = self.cf_handle(cf)?;
        let mut records = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    fn put<T: Serialize>(&self, batch: &mut WriteBatch, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf_handle(cf)?;
        batch.put_cf(cf, key, bincode::serialize(value)?);
        Ok(())
    }

    fn sequences(&self) -> Result<Sequences> {
        Ok(self.get(CF_META, KEY_SEQUENCES)?.unwrap_or_default())
    }

    fn load_event(&self, id: EventId) -> Result<Event> {
        self.get(CF_EVENTS, &id.get().to_be_bytes())?
            .ok_or(Error::EventNotFound(id))
    }

    fn put_event(&self, batch: &mut WriteBatch, event: &Event) -> Result<()> {
        self.put(batch, CF_EVENTS, &event.id.get().to_be_bytes(), event)
    }

    fn put_user(&self, batch: &mut WriteBatch, user: &User) -> Result<()> {
        self.put(batch, CF_USERS, &user.id.get().to_be_bytes(), user)
    }

    fn put_sequences(&self, batch: &mut WriteBatch, seq: &Sequences) -> Result<()> {
        self.put(batch, CF_META, KEY_SEQUENCES, seq)
    }

    /// Read-modify-write of one event in a single batch
    fn modify_event<T>(
        &self,
        id: EventId,
        op: impl FnOnce(&mut Event, &mut Sequences) -> Result<T>,
    ) -> Result<T> {
        let _guard = self.write_lock.lock();
        let mut seq = self.sequences()?;
        let mut event = self.load_event(id)?;
        let result = op(&mut event, &mut seq)?;

        let mut batch = WriteBatch::default();
        self.put_event(&mut batch, &event)?;
        self.put_sequences(&mut batch, &seq)?;
        self.db.write(batch)?;
        Ok(result)
    }

    /// Approximate record counts, for diagnostics
    pub fn get_stats(&self) -> Result<StorageStats> {
        let users = self.approximate_count(self.cf_handle(CF_USERS)?)?;
        let events = self.approximate_count(self.cf_handle(CF_EVENTS)?)?;
        Ok(StorageStats { users, events })
    }

    fn approximate_count(&self, cf: &ColumnFamily) -> Result<u64> {
        Ok(self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0))
    }
}

#[async_trait]
impl PersistenceGateway for RocksStorage {
    async fn load_all(&self) -> Result<Snapshot> {
        let snapshot = Snapshot {
            users: self.scan(CF_USERS)?,
            events: self.scan(CF_EVENTS)?,
        };
        tracing::debug!(
            users = snapshot.users.len(),
            events = snapshot.events.len(),
            "Loaded ledger from RocksDB"
        );
        Ok(snapshot)
    }

    async fn create_user(&self, user: UserProfile) -> Result<User> {
        let _guard = self.write_lock.lock();
        let mut seq = self.sequences()?;
        let mut stored = User::new(seq.next_user(), user.display_name, user.email);
        stored.phone_number = user.phone_number;

        let mut batch = WriteBatch::default();
        self.put_user(&mut batch, &stored)?;
        self.put_sequences(&mut batch, &seq)?;
        self.db.write(batch)?;
        Ok(stored)
    }

    async fn save_users(&self, users: &[User]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut batch = WriteBatch::default();
        for user in users {
            if self.get::<User>(CF_USERS, &user.id.get().to_be_bytes())?.is_none() {
                return Err(Error::InvalidReference(user.id));
            }
            self.put_user(&mut batch, user)?;
        }
        self.db.write(batch)?;
        Ok(())
    }

    async fn create_event(&self, creator: UserId, draft: &EventDraft) -> Result<Event> {
        let _guard = self.write_lock.lock();
        let mut seq = self.sequences()?;
        let event = Event {
            id: seq.next_event(),
            name: draft.name.clone(),
            date: draft.date,
            creator,
            participants: draft.participants.clone(),
            activities: Vec::new(),
        };

        let mut batch = WriteBatch::default();
        self.put_event(&mut batch, &event)?;
        self.put_sequences(&mut batch, &seq)?;
        self.db.write(batch)?;
        Ok(event)
    }

    async fn update_event(&self, changes: &EventChanges) -> Result<()> {
        self.modify_event(changes.event_id, |event, _| {
            apply_event_changes(event, changes);
            Ok(())
        })
    }

    async fn delete_event(&self, event_id: EventId) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.load_event(event_id)?;
        let cf = self.cf_handle(CF_EVENTS)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(cf, event_id.get().to_be_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    async fn create_activity(
        &self,
        event_id: EventId,
        payee: UserId,
        draft: &ActivityDraft,
    ) -> Result<Activity> {
        self.modify_event(event_id, |event, seq| {
            let activity = materialize_activity(seq, event_id, payee, draft);
            event.activities.push(activity.clone());
            Ok(activity)
        })
    }

    async fn update_activity(&self, changes: &ActivityChanges) -> Result<Vec<ActivityItem>> {
        self.modify_event(changes.event_id, |event, seq| {
            let activity = event
                .activity_mut(changes.activity_id)
                .ok_or(Error::ActivityNotFound(changes.activity_id))?;
            Ok(apply_activity_changes(seq, activity, changes))
        })
    }

    async fn delete_activity(&self, event_id: EventId, activity_id: ActivityId) -> Result<()> {
        self.modify_event(event_id, |event, _| {
            let before = event.activities.len();
            event.activities.retain(|a| a.id != activity_id);
            if event.activities.len() == before {
                return Err(Error::ActivityNotFound(activity_id));
            }
            Ok(())
        })
    }

    async fn set_settlement_flag(&self, update: &FlagUpdate) -> Result<()> {
        self.modify_event(update.event_id, |event, _| {
            apply_flag_update(event, update);
            Ok(())
        })
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Approximate number of users
    pub users: u64,
    /// Approximate number of events
    pub events: u64,
}
