//! Persistence collaborator. Failures here are logged by callers and never
//! feed back into the retry state machine.

use crate::scrape::outcome::Classification;
use crate::scrape::parse::{ProfileStatus, Story};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Sink for scraped profile and story metadata.
pub trait ProfileStore: Send + Sync {
    fn save_profile<'a>(
        &'a self,
        username: &'a str,
        profile: &'a ProfileStatus,
    ) -> BoxFuture<'a, Result<()>>;

    /// Persists new stories, skipping ids seen before. Returns how many were
    /// actually saved.
    fn save_stories<'a>(
        &'a self,
        username: &'a str,
        stories: &'a [Story],
    ) -> BoxFuture<'a, Result<usize>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ProfileRecord {
    username: String,
    classification: Classification,
    profile_pic_url: Option<String>,
}

/// Default store: one directory per username under `root`, holding
/// `profile.json` and an accumulating `stories.json`.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn target_dir(&self, username: &str) -> PathBuf {
        self.root.join(username)
    }

    async fn read_existing_stories(path: &Path) -> Vec<Story> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

impl ProfileStore for JsonFileStore {
    fn save_profile<'a>(
        &'a self,
        username: &'a str,
        profile: &'a ProfileStatus,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let dir = self.target_dir(username);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;

            let record = ProfileRecord {
                username: username.to_string(),
                classification: profile.classification,
                profile_pic_url: profile.profile_pic_url.clone(),
            };
            let path = dir.join("profile.json");
            let raw = serde_json::to_string_pretty(&record)?;
            tokio::fs::write(&path, raw)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(())
        })
    }

    fn save_stories<'a>(
        &'a self,
        username: &'a str,
        stories: &'a [Story],
    ) -> BoxFuture<'a, Result<usize>> {
        Box::pin(async move {
            if stories.is_empty() {
                return Ok(0);
            }

            let dir = self.target_dir(username);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let path = dir.join("stories.json");

            let mut existing = Self::read_existing_stories(&path).await;
            let mut seen: HashSet<String> = existing
                .iter()
                .map(|story| story.story_id.clone())
                .collect();

            let mut saved = 0usize;
            for story in stories {
                if seen.insert(story.story_id.clone()) {
                    existing.push(story.clone());
                    saved += 1;
                }
            }

            if saved > 0 {
                let raw = serde_json::to_string_pretty(&existing)?;
                tokio::fs::write(&path, raw)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
            Ok(saved)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrape::parse::MediaType;

    fn story(id: &str) -> Story {
        Story {
            story_id: id.to_string(),
            media_url: format!("https://host/media.php?name=user_{id}"),
            media_type: MediaType::Image,
        }
    }

    #[tokio::test]
    async fn saves_profile_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let profile = ProfileStatus {
            classification: Classification::Public,
            transient_error: false,
            message: String::new(),
            profile_pic_url: Some("https://cdn.example/pic.jpg".into()),
        };
        store.save_profile("alice", &profile).await.unwrap();

        let raw = tokio::fs::read_to_string(dir.path().join("alice/profile.json"))
            .await
            .unwrap();
        let record: ProfileRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.username, "alice");
        assert_eq!(record.classification, Classification::Public);
    }

    #[tokio::test]
    async fn save_stories_dedups_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        let first = [story("1"), story("2")];
        assert_eq!(store.save_stories("alice", &first).await.unwrap(), 2);

        let second = [story("2"), story("3")];
        assert_eq!(store.save_stories("alice", &second).await.unwrap(), 1);

        let raw = tokio::fs::read_to_string(dir.path().join("alice/stories.json"))
            .await
            .unwrap();
        let stored: Vec<Story> = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn empty_story_list_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert_eq!(store.save_stories("alice", &[]).await.unwrap(), 0);
        assert!(!dir.path().join("alice").exists());
    }
}
