use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::providers::GenerationOptions;
use crate::services::persistence::KeyValueStore;

const CONFIG_KEY: &str = "assistant_config";

const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a helpful assistant embedded in an admin \
analytics dashboard. Answer concisely and prefer structured output: short titles, tables for \
tabular data, and bulleted or numbered lists.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub model: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub system_instruction: Option<String>,
    #[serde(default)]
    pub options: GenerationOptions,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            base_url: None,
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            options: GenerationOptions::default(),
        }
    }
}

pub struct ConfigService;

impl ConfigService {
    pub async fn load(kv: &dyn KeyValueStore) -> AssistantConfig {
        match kv.get(CONFIG_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_default(),
            _ => AssistantConfig::default(),
        }
    }

    pub async fn save(kv: &dyn KeyValueStore, config: &AssistantConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        kv.set(CONFIG_KEY, &json).await
    }
}
