use std::path::Path;

use anyhow::{Context, Result};
use fmproxy_core::ModelConfig;
use serde::Deserialize;

/// On-disk shape of the models file (SPEC_FULL.md §6): a `models` array of
/// `ModelConfig` objects, read once at startup (out of core scope per
/// spec.md §1 but still this process's external collaborator).
#[derive(Debug, Deserialize)]
struct ModelsFile {
    models: Vec<ModelConfig>,
}

pub fn load(path: &str) -> Result<Vec<ModelConfig>> {
    let contents = std::fs::read_to_string(Path::new(path))
        .with_context(|| format!("read models file {path}"))?;
    let parsed: ModelsFile =
        serde_json::from_str(&contents).with_context(|| format!("parse models file {path}"))?;
    Ok(parsed.models)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_model_list() {
        let dir = std::env::temp_dir().join(format!("fmproxy-models-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("models.json");
        std::fs::write(
            &path,
            r#"{"models":[{"name":"gpt-5-nano","deployment_id":"dep-1","dialect":"openai","supports_streaming":true,"supports_vision":false,"default_max_tokens":4096}]}"#,
        )
        .unwrap();

        let models = load(path.to_str().unwrap()).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "gpt-5-nano");

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load("/nonexistent/path/models.json").is_err());
    }
}
