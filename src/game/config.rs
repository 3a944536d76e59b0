use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Launch configuration persisted as `config.json` at the instance root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_java_path")]
    pub java_path: String,

    /// Initial JVM heap, passed as `-Xms`.
    #[serde(default = "default_heap")]
    pub min_ram: String,

    /// Maximum JVM heap, passed as `-Xmx`.
    #[serde(default = "default_heap")]
    pub max_ram: String,

    #[serde(default)]
    pub jvm_args: Vec<String>,

    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            java_path: default_java_path(),
            min_ram: default_heap(),
            max_ram: default_heap(),
            jvm_args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

fn default_java_path() -> String {
    "java".to_owned()
}

fn default_heap() -> String {
    "1G".to_owned()
}
