use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 配置文件根结构
///
/// ```toml
/// [registry]
/// uri = "etcd://127.0.0.1:2379?timeout=5s"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// 连接 URI，scheme 决定后端
    #[serde(default = "default_registry_uri")]
    pub uri: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            uri: default_registry_uri(),
        }
    }
}

fn default_registry_uri() -> String {
    "memory://".to_string()
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}
