//! Model downloading and caching via hf-hub.

use crate::config::ModelConfig;
use crate::error::{Result, TalkError};
use hf_hub::api::sync::{Api, ApiBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Downloads model files into a local cache directory.
pub struct ModelManager {
    cache_dir: PathBuf,
}

impl ModelManager {
    /// Create a new model manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.cache_dir)?;
        info!("model cache directory: {}", config.cache_dir.display());

        Ok(Self {
            cache_dir: config.cache_dir.clone(),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn api(&self) -> Result<Api> {
        ApiBuilder::new()
            .with_cache_dir(self.cache_dir.clone())
            .build()
            .map_err(|e| TalkError::Model(format!("failed to create HF API: {e}")))
    }

    /// Cached path of `filename` in `repo_id`, without touching the network.
    pub fn cached_path(&self, repo_id: &str, filename: &str) -> Option<PathBuf> {
        hf_hub::Cache::new(self.cache_dir.clone())
            .model(repo_id.to_owned())
            .get(filename)
    }

    /// Path to a model file, downloading it first if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be downloaded.
    pub fn get_model_path(&self, repo_id: &str, filename: &str) -> Result<PathBuf> {
        if let Some(path) = self.cached_path(repo_id, filename) {
            debug!("{repo_id}/{filename} [cached]");
            return Ok(path);
        }

        info!("downloading {repo_id}/{filename}");
        self.api()?
            .model(repo_id.to_owned())
            .get(filename)
            .map_err(|e| TalkError::Model(format!("failed to download {filename} from {repo_id}: {e}")))
    }

    /// Fetch every file in `filenames` and return the snapshot directory holding them.
    ///
    /// # Errors
    ///
    /// Returns an error if any download fails.
    pub fn fetch_repo_files(&self, repo_id: &str, filenames: &[&str]) -> Result<PathBuf> {
        let mut dir = None;
        for filename in filenames {
            let path = self.get_model_path(repo_id, filename)?;
            if dir.is_none() {
                dir = path.parent().map(Path::to_path_buf);
            }
        }
        dir.ok_or_else(|| TalkError::Model(format!("could not determine repo directory for {repo_id}")))
    }
}
