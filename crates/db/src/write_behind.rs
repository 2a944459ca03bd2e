// Copyright (C) 2025 AmbonMUD contributors. This program is free software:
// you can redistribute it and/or modify it under the terms of the GNU General
// Public License as published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Write-behind layer. `save` marks the record dirty and returns
//! immediately; a background worker drains the dirty set every flush
//! interval and writes each pending record serially. A failed write leaves
//! the id dirty for the next cycle.

use crate::repository::{PlayerRepository, RepositoryError};
use ambonmud_common::ids::{PlayerId, RoomId};
use ambonmud_common::model::PlayerRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Consecutive failures on the same record before escalating to ERROR.
const FAILURES_BEFORE_ERROR: u32 = 3;

pub struct WriteBehind {
    inner: Arc<dyn PlayerRepository>,
    dirty: Mutex<HashMap<PlayerId, PlayerRecord>>,
    /// Consecutive flush failures per record, for alarm escalation.
    failure_counts: Mutex<HashMap<PlayerId, u32>>,
}

impl WriteBehind {
    pub fn new(inner: Arc<dyn PlayerRepository>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            dirty: Mutex::new(HashMap::new()),
            failure_counts: Mutex::new(HashMap::new()),
        })
    }

    /// Marks the record dirty, keeping only the latest value per id.
    /// Never blocks on I/O.
    pub fn save(&self, record: PlayerRecord) {
        let mut dirty = self.dirty.lock().expect("dirty set poisoned");
        dirty.insert(record.id, record);
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.lock().expect("dirty set poisoned").len()
    }

    /// Swap-and-process: installs a fresh set before draining the old one so
    /// saves arriving mid-flush land in the next cycle.
    fn take_dirty(&self) -> HashMap<PlayerId, PlayerRecord> {
        let mut dirty = self.dirty.lock().expect("dirty set poisoned");
        std::mem::take(&mut *dirty)
    }

    /// Drains the dirty set once, writing serially. Returns the number of
    /// successful writes.
    pub async fn flush_now(&self) -> usize {
        let pending = self.take_dirty();
        if pending.is_empty() {
            return 0;
        }
        let mut written = 0;
        for (id, record) in pending {
            match self.inner.save(&record).await {
                Ok(()) => {
                    written += 1;
                    self.failure_counts
                        .lock()
                        .expect("failure counts poisoned")
                        .remove(&id);
                }
                Err(e) => {
                    let failures = {
                        let mut counts =
                            self.failure_counts.lock().expect("failure counts poisoned");
                        let n = counts.entry(id).or_insert(0);
                        *n += 1;
                        *n
                    };
                    if failures >= FAILURES_BEFORE_ERROR {
                        error!(player_id = %id, failures, error = %e, "player save failing repeatedly");
                    } else {
                        warn!(player_id = %id, error = %e, "player save failed, will retry");
                    }
                    // Leave the id dirty unless a newer value arrived while
                    // we were flushing.
                    let mut dirty = self.dirty.lock().expect("dirty set poisoned");
                    dirty.entry(id).or_insert(record);
                }
            }
        }
        debug!(written, "write-behind flush complete");
        written
    }

    /// Latest known value for a record: the dirty set wins over the store.
    pub async fn find_by_id(
        &self,
        id: PlayerId,
    ) -> Result<Option<PlayerRecord>, RepositoryError> {
        if let Some(record) = self
            .dirty
            .lock()
            .expect("dirty set poisoned")
            .get(&id)
            .cloned()
        {
            return Ok(Some(record));
        }
        self.inner.find_by_id(id).await
    }

    pub async fn find_by_name_lower(
        &self,
        name_lower: &str,
    ) -> Result<Option<PlayerRecord>, RepositoryError> {
        if let Some(record) = self
            .dirty
            .lock()
            .expect("dirty set poisoned")
            .values()
            .find(|r| r.name_lower() == name_lower)
            .cloned()
        {
            return Ok(Some(record));
        }
        self.inner.find_by_name_lower(name_lower).await
    }

    pub async fn create(
        &self,
        name: &str,
        start_room: RoomId,
        now_ms: u64,
    ) -> Result<PlayerRecord, RepositoryError> {
        // Creation is deliberately write-through: the name reservation must
        // be durable before the session binds to it.
        self.inner.create(name, start_room, now_ms).await
    }

    pub async fn delete(&self, id: PlayerId) -> Result<(), RepositoryError> {
        self.dirty.lock().expect("dirty set poisoned").remove(&id);
        self.inner.delete(id).await
    }
}

/// The background flush worker. Runs until the kill switch flips, then
/// performs one final drain so shutdown never loses acknowledged saves.
pub struct WriteBehindWorker {
    layer: Arc<WriteBehind>,
    flush_interval: Duration,
    kill_switch: Arc<AtomicBool>,
}

impl WriteBehindWorker {
    pub fn new(
        layer: Arc<WriteBehind>,
        flush_interval_ms: u64,
        kill_switch: Arc<AtomicBool>,
    ) -> Self {
        Self {
            layer,
            flush_interval: Duration::from_millis(flush_interval_ms),
            kill_switch,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.flush_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if self.kill_switch.load(Ordering::Relaxed) {
                break;
            }
            self.layer.flush_now().await;
        }
        let written = self.layer.flush_now().await;
        debug!(written, "write-behind worker exited after final flush");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    /// In-memory repository that can be told to fail saves, counting every
    /// underlying write.
    #[derive(Default)]
    struct FlakyRepo {
        records: Mutex<HashMap<PlayerId, PlayerRecord>>,
        save_count: AtomicUsize,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl PlayerRepository for FlakyRepo {
        async fn find_by_id(
            &self,
            id: PlayerId,
        ) -> Result<Option<PlayerRecord>, RepositoryError> {
            Ok(self.records.lock().unwrap().get(&id).cloned())
        }

        async fn find_by_name_lower(
            &self,
            name_lower: &str,
        ) -> Result<Option<PlayerRecord>, RepositoryError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .find(|r| r.name_lower() == name_lower)
                .cloned())
        }

        async fn create(
            &self,
            name: &str,
            start_room: RoomId,
            now_ms: u64,
        ) -> Result<PlayerRecord, RepositoryError> {
            let id = PlayerId(self.records.lock().unwrap().len() as u64 + 1);
            let record = crate::repository::new_record(id, name, start_room, now_ms);
            self.records.lock().unwrap().insert(id, record.clone());
            Ok(record)
        }

        async fn save(&self, record: &PlayerRecord) -> Result<(), RepositoryError> {
            self.save_count.fetch_add(1, Ordering::SeqCst);
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(RepositoryError::Io(std::io::Error::other("disk on fire")));
            }
            self.records
                .lock()
                .unwrap()
                .insert(record.id, record.clone());
            Ok(())
        }

        async fn delete(&self, id: PlayerId) -> Result<(), RepositoryError> {
            self.records.lock().unwrap().remove(&id);
            Ok(())
        }
    }

    fn record_with_hp(id: u64, hp: i32) -> PlayerRecord {
        let mut r = crate::repository::new_record(
            PlayerId(id),
            "brin",
            "midgaard:temple".parse().unwrap(),
            0,
        );
        r.hp = hp;
        r
    }

    #[tokio::test]
    async fn ten_saves_coalesce_to_one_write_with_last_value() {
        let repo = Arc::new(FlakyRepo::default());
        let layer = WriteBehind::new(repo.clone());

        for hp in 1..=10 {
            layer.save(record_with_hp(1, hp));
        }
        assert_eq!(layer.dirty_len(), 1);

        let written = layer.flush_now().await;
        assert_eq!(written, 1);
        assert_eq!(repo.save_count.load(Ordering::SeqCst), 1);
        let stored = repo.find_by_id(PlayerId(1)).await.unwrap().unwrap();
        assert_eq!(stored.hp, 10);
    }

    #[tokio::test]
    async fn failed_save_stays_dirty_and_retries() {
        let repo = Arc::new(FlakyRepo::default());
        let layer = WriteBehind::new(repo.clone());

        repo.fail_saves.store(true, Ordering::SeqCst);
        layer.save(record_with_hp(1, 7));
        assert_eq!(layer.flush_now().await, 0);
        assert_eq!(layer.dirty_len(), 1);

        repo.fail_saves.store(false, Ordering::SeqCst);
        assert_eq!(layer.flush_now().await, 1);
        assert_eq!(layer.dirty_len(), 0);
        let stored = repo.find_by_id(PlayerId(1)).await.unwrap().unwrap();
        assert_eq!(stored.hp, 7);
    }

    #[tokio::test]
    async fn newer_save_during_failure_wins_over_retry() {
        let repo = Arc::new(FlakyRepo::default());
        let layer = WriteBehind::new(repo.clone());

        repo.fail_saves.store(true, Ordering::SeqCst);
        layer.save(record_with_hp(1, 1));
        layer.flush_now().await;
        // The failed value is parked dirty; a newer save replaces it.
        layer.save(record_with_hp(1, 2));

        repo.fail_saves.store(false, Ordering::SeqCst);
        layer.flush_now().await;
        let stored = repo.find_by_id(PlayerId(1)).await.unwrap().unwrap();
        assert_eq!(stored.hp, 2);
    }

    #[tokio::test]
    async fn reads_see_dirty_values_before_flush() {
        let repo = Arc::new(FlakyRepo::default());
        let layer = WriteBehind::new(repo.clone());
        layer.save(record_with_hp(1, 42));
        let seen = layer.find_by_id(PlayerId(1)).await.unwrap().unwrap();
        assert_eq!(seen.hp, 42);
        assert_eq!(repo.save_count.load(Ordering::SeqCst), 0);
    }
}
