/// Deterministic cache key layout under the engine's persistent path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLayout {
    persistent_path: String,
    project_name: String,
}

impl CacheLayout {
    pub fn new(persistent_path: impl Into<String>, project_name: impl Into<String>) -> Self {
        let mut persistent_path = persistent_path.into();
        while persistent_path.len() > 1 && persistent_path.ends_with('/') {
            persistent_path.pop();
        }
        Self {
            persistent_path,
            project_name: project_name.into(),
        }
    }

    /// Storage namespace shared by every key below.
    pub fn namespace(&self) -> &str {
        &self.persistent_path
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn project_hash_key(&self) -> String {
        format!("{}/.spx_cache_hash/{}", self.persistent_path, self.project_name)
    }

    pub fn project_data_key(&self) -> String {
        format!("{}/.spx_cache_data/{}", self.persistent_path, self.project_name)
    }

    pub fn engine_hash_key(&self, asset: &str) -> String {
        format!("{}/.spx_engine_hash/{asset}", self.persistent_path)
    }

    pub fn engine_data_key(&self, asset: &str) -> String {
        format!("{}/.spx_engine_data/{asset}", self.persistent_path)
    }

    /// Directory the project is installed into.
    pub fn install_path(&self) -> String {
        format!("{}/{}", self.persistent_path, self.project_name)
    }
}
