use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const LISTS_FILE_NAME: &str = "subscription-lists.json";
pub const DEFAULT_LIST_ID: &str = "default";

/// Errors from the subscription lists file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access subscription lists at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Subscription lists at {path} are not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("List not found: {0}")]
    ListNotFound(String),
}

/// One channel subscription inside a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInList {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionList {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionInList>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionList {
    fn default_list(subscriptions: Vec<SubscriptionInList>) -> Self {
        let now = Utc::now();
        Self {
            id: DEFAULT_LIST_ID.to_string(),
            name: "Default".to_string(),
            subscriptions,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The whole lists document as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionListsData {
    pub lists: Vec<SubscriptionList>,
    #[serde(default = "default_list_id")]
    pub default_list_id: String,
}

fn default_list_id() -> String {
    DEFAULT_LIST_ID.to_string()
}

impl Default for SubscriptionListsData {
    fn default() -> Self {
        Self {
            lists: vec![SubscriptionList::default_list(Vec::new())],
            default_list_id: DEFAULT_LIST_ID.to_string(),
        }
    }
}

/// Older installs stored a flat array of subscriptions.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDocument {
    Lists(SubscriptionListsData),
    Legacy(Vec<SubscriptionInList>),
}

/// JSON-file store for subscription lists.
///
/// Every read-modify-write inside this process is serialized; a second
/// process writing the same file can still interleave (last write wins).
#[derive(Debug)]
pub struct SubscriptionStore {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl SubscriptionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Store backed by `subscription-lists.json` inside `data_dir`.
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(LISTS_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Reads the lists document.
    ///
    /// - Missing or whitespace-only file → a single empty default list
    /// - Legacy flat array → wrapped into the default list
    /// - Unreadable file or invalid JSON → error
    pub async fn read_lists(&self) -> Result<SubscriptionListsData, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No subscription lists file, using defaults");
                return Ok(SubscriptionListsData::default());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        if raw.trim().is_empty() {
            tracing::warn!(path = %self.path.display(), "Empty subscription lists file, using defaults");
            return Ok(SubscriptionListsData::default());
        }

        let document: StoredDocument =
            serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        Ok(match document {
            StoredDocument::Lists(data) => data,
            StoredDocument::Legacy(subscriptions) => {
                tracing::warn!(
                    path = %self.path.display(),
                    subscriptions = subscriptions.len(),
                    "Migrating subscription data from flat format"
                );
                SubscriptionListsData {
                    lists: vec![SubscriptionList::default_list(subscriptions)],
                    default_list_id: DEFAULT_LIST_ID.to_string(),
                }
            }
        })
    }

    /// Replaces the lists document on disk.
    pub async fn write_lists(&self, data: &SubscriptionListsData) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.write_unlocked(data).await
    }

    /// Write-to-temp-then-rename so readers never observe a partial file.
    async fn write_unlocked(&self, data: &SubscriptionListsData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let json = serde_json::to_string_pretty(data).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        // Randomized suffix: two processes writing at once must not share a temp file
        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let temp_path = self.path.with_extension(format!("tmp.{:016x}", suffix));

        if let Err(e) = tokio::fs::write(&temp_path, json).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(self.io_error(e));
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(self.io_error(e));
        }
        Ok(())
    }

    /// Channel ids across all lists, deduplicated, in first-seen order.
    pub async fn list_channel_ids(&self) -> Result<Vec<String>, StoreError> {
        let data = self.read_lists().await?;
        let mut seen = HashSet::new();
        Ok(data
            .lists
            .iter()
            .flat_map(|list| list.subscriptions.iter())
            .filter(|sub| seen.insert(sub.channel_id.clone()))
            .map(|sub| sub.channel_id.clone())
            .collect())
    }

    /// Overwrites the thumbnail of every subscription whose channel has a new
    /// avatar in `thumbnails`. Writes only if something changed and returns
    /// the number of entries updated.
    pub async fn update_subscription_thumbnails(
        &self,
        thumbnails: &HashMap<String, String>,
    ) -> Result<usize, StoreError> {
        if thumbnails.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut data = self.read_lists().await?;

        let mut changed = 0;
        for sub in data.lists.iter_mut().flat_map(|l| l.subscriptions.iter_mut()) {
            if let Some(url) = thumbnails.get(&sub.channel_id) {
                if sub.thumbnail.as_deref() != Some(url.as_str()) {
                    sub.thumbnail = Some(url.clone());
                    changed += 1;
                }
            }
        }

        if changed > 0 {
            self.write_unlocked(&data).await?;
        }
        Ok(changed)
    }

    /// Adds `subscription` to the list `list_id`.
    ///
    /// Returns `false` without writing if the list already holds that channel.
    pub async fn add_subscription(
        &self,
        list_id: &str,
        subscription: SubscriptionInList,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.read_lists().await?;

        let list = data
            .lists
            .iter_mut()
            .find(|l| l.id == list_id)
            .ok_or_else(|| StoreError::ListNotFound(list_id.to_string()))?;

        if list
            .subscriptions
            .iter()
            .any(|s| s.channel_id == subscription.channel_id)
        {
            return Ok(false);
        }

        list.subscriptions.push(subscription);
        list.updated_at = Utc::now();
        self.write_unlocked(&data).await?;
        Ok(true)
    }
}
