//! Checkpoint fetching from the Hugging Face Hub.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::{Api, ApiBuilder};
use hf_hub::Cache;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Repository files the worker never reads.
fn is_skippable(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower == ".gitattributes"
        || lower.ends_with(".md")
        || lower.ends_with(".png")
        || lower.ends_with(".jpg")
        || lower.ends_with(".gif")
}

/// Walk up from a downloaded file to the snapshot directory it lives in.
fn snapshot_root(file_path: &Path, rfilename: &str) -> Option<PathBuf> {
    let depth = rfilename.split('/').filter(|part| !part.is_empty()).count();
    let mut root = file_path;
    for _ in 0..depth {
        root = root.parent()?;
    }
    Some(root.to_path_buf())
}

pub struct HubFetcher {
    cache_dir: PathBuf,
}

impl HubFetcher {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn api(&self) -> Result<Api> {
        std::fs::create_dir_all(&self.cache_dir)?;
        let token = std::env::var("HF_TOKEN").ok().filter(|t| !t.trim().is_empty());
        ApiBuilder::new()
            .with_cache_dir(self.cache_dir.clone())
            .with_progress(false)
            .with_token(token)
            .build()
            .map_err(|e| Error::Worker(format!("Failed to create Hub client: {}", e)))
    }

    /// Snapshot directory of `repo_id` if it is already cached locally.
    pub fn cached_snapshot(&self, repo_id: &str) -> Option<PathBuf> {
        let cache = Cache::new(self.cache_dir.clone());
        let config = cache.model(repo_id.to_string()).get("config.json")?;
        snapshot_root(&config, "config.json")
    }

    /// Download every file of `repo_id` (skipping cached ones) and return the
    /// local snapshot directory. Blocks.
    pub fn fetch(&self, repo_id: &str) -> Result<PathBuf> {
        let api = self.api()?;
        let repo = api.model(repo_id.to_string());

        let info = match repo.info() {
            Ok(info) => info,
            Err(err) => {
                if let Some(snapshot) = self.cached_snapshot(repo_id) {
                    warn!(
                        "Hub unreachable for {} ({}), using cached snapshot {:?}",
                        repo_id, err, snapshot
                    );
                    return Ok(snapshot);
                }
                return Err(Error::Worker(format!(
                    "Failed to list files of {}: {}",
                    repo_id, err
                )));
            }
        };

        info!(
            "Fetching {} ({} files) into {:?}",
            repo_id,
            info.siblings.len(),
            self.cache_dir
        );

        let mut snapshot = None;
        for sibling in info.siblings.iter().filter(|s| !is_skippable(&s.rfilename)) {
            debug!("Fetching {}/{}", repo_id, sibling.rfilename);
            let path = repo.get(&sibling.rfilename).map_err(|e| {
                Error::Worker(format!(
                    "Failed to download {}/{}: {}",
                    repo_id, sibling.rfilename, e
                ))
            })?;
            if snapshot.is_none() {
                snapshot = snapshot_root(&path, &sibling.rfilename);
            }
        }

        snapshot.ok_or_else(|| Error::Worker(format!("repository {} has no files", repo_id)))
    }
}
