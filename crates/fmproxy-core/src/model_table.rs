use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Request-format family a model belongs to. An unknown dialect tag read
/// from config falls back to OpenAI at load time (`Dialect::parse`), per
/// spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Openai,
    Anthropic,
    Gemini,
}

impl Dialect {
    pub fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "anthropic" => Dialect::Anthropic,
            "gemini" => Dialect::Gemini,
            "openai" => Dialect::Openai,
            _ => Dialect::Openai,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub deployment_id: String,
    #[serde(default = "default_dialect_tag")]
    pub dialect: String,
    #[serde(default)]
    pub supports_streaming: bool,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
}

fn default_dialect_tag() -> String {
    "openai".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

impl ModelConfig {
    pub fn dialect(&self) -> Dialect {
        Dialect::parse(&self.dialect)
    }
}

/// Model name → config. Loaded once at startup and immutable thereafter,
/// except that the deployment id a lookup returns may come from an
/// environment override that bypasses this table entirely (§4.2).
#[derive(Debug, Clone)]
pub struct ModelRouter {
    models: HashMap<String, ModelConfig>,
}

impl ModelRouter {
    pub fn new(configs: Vec<ModelConfig>) -> Self {
        let models = configs.into_iter().map(|c| (c.name.clone(), c)).collect();
        Self { models }
    }

    pub fn get(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelConfig> {
        self.models.values()
    }
}
