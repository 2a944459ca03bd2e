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

//! File backend: one YAML record per player under `root_dir`, named by a
//! slug of the player name. Writes are atomic: temp file in the same
//! directory, then rename. Name lookups scan the directory; acceptable at
//! small scale and bounded by operational alarms.

use crate::repository::{new_record, slugify_name, PlayerRepository, RepositoryError};
use ambonmud_common::ids::{PlayerId, RoomId};
use ambonmud_common::model::PlayerRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub struct FilePlayerRepository {
    root_dir: PathBuf,
    next_id: AtomicU64,
    /// Serializes create() so two sessions cannot race the same name.
    create_lock: Mutex<()>,
}

impl FilePlayerRepository {
    /// Opens (creating if needed) the record directory and seeds the id
    /// allocator from the highest id on disk.
    pub async fn open(root_dir: impl Into<PathBuf>) -> Result<Self, RepositoryError> {
        let root_dir = root_dir.into();
        tokio::fs::create_dir_all(&root_dir).await?;

        let mut max_id = 0u64;
        let mut entries = tokio::fs::read_dir(&root_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.path().extension().is_none_or(|e| e != "yaml") {
                continue;
            }
            if let Ok(record) = read_record(&entry.path()).await {
                max_id = max_id.max(record.id.0);
            }
        }
        debug!(root_dir = %root_dir.display(), max_id, "file player repository opened");

        Ok(Self {
            root_dir,
            next_id: AtomicU64::new(max_id + 1),
            create_lock: Mutex::new(()),
        })
    }

    fn path_for_name(&self, name: &str) -> PathBuf {
        self.root_dir.join(format!("{}.yaml", slugify_name(name)))
    }

    async fn write_atomic(&self, path: &Path, record: &PlayerRecord) -> Result<(), RepositoryError> {
        let yaml = serde_yaml::to_string(record)?;
        let tmp = self
            .root_dir
            .join(format!(".tmp-{}.yaml", Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, yaml.as_bytes()).await?;
        // Rename within the same directory is atomic on POSIX.
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn scan_for(
        &self,
        mut matches: impl FnMut(&PlayerRecord) -> bool,
    ) -> Result<Option<PlayerRecord>, RepositoryError> {
        let mut entries = tokio::fs::read_dir(&self.root_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "yaml") {
                continue;
            }
            if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(".tmp-"))
            {
                continue;
            }
            match read_record(&path).await {
                Ok(record) if matches(&record) => return Ok(Some(record)),
                Ok(_) => {}
                // A torn or foreign file should not take the whole scan down.
                Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        Ok(None)
    }
}

async fn read_record(path: &Path) -> Result<PlayerRecord, RepositoryError> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_yaml::from_str(&text)?)
}

#[async_trait]
impl PlayerRepository for FilePlayerRepository {
    async fn find_by_id(&self, id: PlayerId) -> Result<Option<PlayerRecord>, RepositoryError> {
        self.scan_for(|r| r.id == id).await
    }

    async fn find_by_name_lower(
        &self,
        name_lower: &str,
    ) -> Result<Option<PlayerRecord>, RepositoryError> {
        // Fast path: the slug file. The scan covers names whose slugs
        // collide or legacy renames.
        let path = self.path_for_name(name_lower);
        if let Ok(record) = read_record(&path).await {
            if record.name_lower() == name_lower {
                return Ok(Some(record));
            }
        }
        self.scan_for(|r| r.name_lower() == name_lower).await
    }

    async fn create(
        &self,
        name: &str,
        start_room: RoomId,
        now_ms: u64,
    ) -> Result<PlayerRecord, RepositoryError> {
        let _guard = self.create_lock.lock().await;
        if self.find_by_name_lower(&name.to_lowercase()).await?.is_some() {
            return Err(RepositoryError::NameTaken);
        }
        let id = PlayerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = new_record(id, name, start_room, now_ms);
        self.write_atomic(&self.path_for_name(name), &record).await?;
        Ok(record)
    }

    async fn save(&self, record: &PlayerRecord) -> Result<(), RepositoryError> {
        self.write_atomic(&self.path_for_name(&record.name), record)
            .await
    }

    async fn delete(&self, id: PlayerId) -> Result<(), RepositoryError> {
        let Some(record) = self.find_by_id(id).await? else {
            return Err(RepositoryError::NotFound(id));
        };
        tokio::fs::remove_file(self.path_for_name(&record.name)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn start_room() -> RoomId {
        "midgaard:temple".parse().unwrap()
    }

    #[tokio::test]
    async fn create_save_find_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FilePlayerRepository::open(dir.path()).await.unwrap();

        let mut record = repo.create("Brin", start_room(), 1_000).await.unwrap();
        record.hp = 5;
        record.xp_total = 99;
        repo.save(&record).await.unwrap();

        let by_id = repo.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(by_id, record);
        let by_name = repo.find_by_name("BRIN").await.unwrap().unwrap();
        assert_eq!(by_name.id, record.id);
    }

    #[tokio::test]
    async fn create_rejects_taken_name_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FilePlayerRepository::open(dir.path()).await.unwrap();

        repo.create("Brin", start_room(), 0).await.unwrap();
        let err = repo.create("bRiN", start_room(), 0).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NameTaken));
    }

    #[tokio::test]
    async fn ids_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let repo = FilePlayerRepository::open(dir.path()).await.unwrap();
            repo.create("One", start_room(), 0).await.unwrap();
            repo.create("Two", start_room(), 0).await.unwrap();
        }
        let repo = FilePlayerRepository::open(dir.path()).await.unwrap();
        let three = repo.create("Three", start_room(), 0).await.unwrap();
        assert_eq!(three.id, PlayerId(3));
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FilePlayerRepository::open(dir.path()).await.unwrap();
        let record = repo.create("Brin", start_room(), 0).await.unwrap();
        repo.save(&record).await.unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        while let Some(e) = entries.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec!["brin.yaml".to_string()]);
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FilePlayerRepository::open(dir.path()).await.unwrap();
        let record = repo.create("Brin", start_room(), 0).await.unwrap();
        repo.delete(record.id).await.unwrap();
        assert!(repo.find_by_id(record.id).await.unwrap().is_none());
    }
}
