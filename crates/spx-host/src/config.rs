use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spx_bridge::BridgeConfig;
use spx_cache::{AssetOptions, CacheLayout};

use crate::HostError;

/// Host controller settings, usually loaded from the JSON the page hands over.
///
/// Every field has a default, so `{}` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    pub project_name: String,
    /// Runtime mode plays a prebuilt pack without the editor.
    #[serde(rename = "isRuntimeMode")]
    pub runtime_mode: bool,
    pub persistent_path: String,
    pub temp_zip_path: String,
    pub temp_game_path: String,
    pub pack_name: String,
    pub project_data_name: String,
    pub engine_asset: String,
    pub engine_res_asset: String,
    pub use_asset_cache: bool,
    /// Asset file name -> URL.
    pub asset_urls: HashMap<String, String>,
    /// Pause between starting the game and handing it the project data.
    pub broadcast_delay_ms: u64,
    /// How long `stop_game` waits for the engine to exit. `0` waits forever.
    pub quit_timeout_ms: u64,
    pub call_timeout_ms: u64,
    pub ready_timeout_ms: u64,
    /// tracing-subscriber `EnvFilter` syntax.
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            project_name: "Game".to_string(),
            runtime_mode: false,
            persistent_path: "/home/web_user".to_string(),
            temp_zip_path: "/tmp/preload.zip".to_string(),
            temp_game_path: "/home/spx_game_cache".to_string(),
            pack_name: "godot.editor.pck".to_string(),
            project_data_name: "project.data".to_string(),
            engine_asset: "godot.editor.wasm".to_string(),
            engine_res_asset: "engineres.zip".to_string(),
            use_asset_cache: false,
            asset_urls: HashMap::new(),
            broadcast_delay_ms: 1000,
            quit_timeout_ms: 10_000,
            call_timeout_ms: 10_000,
            ready_timeout_ms: 30_000,
            log_level: "info".to_string(),
        }
    }
}

fn millis(ms: u64) -> Option<Duration> {
    (ms != 0).then(|| Duration::from_millis(ms))
}

impl HostConfig {
    pub fn from_json(raw: &str) -> Result<Self, HostError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|err| HostError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), HostError> {
        if self.project_name.trim().is_empty() {
            return Err(HostError::Config("projectName must not be empty".into()));
        }
        if self.project_name.contains('/') {
            return Err(HostError::Config(format!(
                "projectName {:?} must not contain '/'",
                self.project_name
            )));
        }
        if !self.persistent_path.starts_with('/') {
            return Err(HostError::Config(format!(
                "persistentPath {:?} must be absolute",
                self.persistent_path
            )));
        }
        Ok(())
    }

    pub fn cache_layout(&self) -> CacheLayout {
        CacheLayout::new(self.persistent_path.as_str(), self.project_name.as_str())
    }

    pub fn asset_options(&self) -> AssetOptions {
        AssetOptions {
            use_asset_cache: self.use_asset_cache,
            engine_asset: self.engine_asset.clone(),
            asset_urls: self.asset_urls.clone(),
        }
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            call_timeout: millis(self.call_timeout_ms),
            ready_timeout: millis(self.ready_timeout_ms),
            ..BridgeConfig::default()
        }
    }

    pub fn broadcast_delay(&self) -> Duration {
        Duration::from_millis(self.broadcast_delay_ms)
    }

    pub fn quit_timeout(&self) -> Option<Duration> {
        millis(self.quit_timeout_ms)
    }

    pub fn install_path(&self) -> String {
        self.cache_layout().install_path()
    }

    /// Arguments for the one-off pass that unpacks the engine resources into a project.
    pub fn install_args(&self) -> Vec<String> {
        vec![
            "--project-manager".to_string(),
            "--single-window".to_string(),
            "--install_project_name".to_string(),
            self.project_name.clone(),
        ]
    }

    pub fn editor_args(&self) -> Vec<String> {
        vec![
            "--path".to_string(),
            self.install_path(),
            "--single-window".to_string(),
            "--editor".to_string(),
        ]
    }

    pub fn game_args(&self) -> Vec<String> {
        if self.runtime_mode {
            vec![
                "--main-pack".to_string(),
                format!("{}/{}", self.temp_game_path, self.pack_name),
                "--main-project-data".to_string(),
                format!("{}/{}", self.temp_game_path, self.project_data_name),
            ]
        } else {
            vec![
                "--path".to_string(),
                self.install_path(),
                "--editor-pid".to_string(),
                "0".to_string(),
                "res://main.tscn".to_string(),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let config = HostConfig::from_json("{}").unwrap();
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.install_path(), "/home/web_user/Game");
        assert_eq!(config.broadcast_delay(), Duration::from_secs(1));
    }

    #[test]
    fn camel_case_fields_are_read() {
        let config = HostConfig::from_json(
            r#"{
                "projectName": "Platformer",
                "isRuntimeMode": true,
                "useAssetCache": true,
                "assetUrls": { "godot.editor.wasm": "https://cdn.example/e.wasm" },
                "callTimeoutMs": 0
            }"#,
        )
        .unwrap();
        assert_eq!(config.project_name, "Platformer");
        assert!(config.runtime_mode);
        assert!(config.asset_options().use_asset_cache);
        assert_eq!(config.bridge_config().call_timeout, None);
        assert_eq!(
            config.game_args(),
            [
                "--main-pack",
                "/home/spx_game_cache/godot.editor.pck",
                "--main-project-data",
                "/home/spx_game_cache/project.data",
            ]
        );
    }

    #[test]
    fn editor_mode_game_runs_installed_project() {
        let config = HostConfig::default();
        assert_eq!(
            config.game_args(),
            ["--path", "/home/web_user/Game", "--editor-pid", "0", "res://main.tscn"]
        );
        assert_eq!(
            config.editor_args(),
            ["--path", "/home/web_user/Game", "--single-window", "--editor"]
        );
        assert_eq!(
            config.install_args(),
            ["--project-manager", "--single-window", "--install_project_name", "Game"]
        );
    }

    #[test]
    fn rejects_unusable_values() {
        assert!(matches!(
            HostConfig::from_json(r#"{ "projectName": "" }"#),
            Err(HostError::Config(_))
        ));
        assert!(matches!(
            HostConfig::from_json(r#"{ "persistentPath": "relative" }"#),
            Err(HostError::Config(_))
        ));
        assert!(matches!(
            HostConfig::from_json("[1, 2]"),
            Err(HostError::Config(_))
        ));
    }
}
