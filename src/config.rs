use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

const CONFIG_PATH_REL_HOME: &str = ".config/musebot/config.toml";

/// Bot configuration
#[derive(serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub general: General,
    pub inference: Inference,
    pub shadow: Shadow,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct General {
    pub discord_token: String,
    pub bot_owners: Vec<String>,
    pub command_prefix: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct Inference {
    /// Hosted image-generation endpoint the cycle posts prompts to.
    pub url: String,
    /// Used when no user prompts are active.
    pub default_prompt: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
pub struct Shadow {
    pub enabled: bool,
}

impl Config {
    fn config_path() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|p| p.join(CONFIG_PATH_REL_HOME))
            .ok_or(anyhow!("Could not find home directory"))
    }

    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            anyhow!(
                "Could not open configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).await.map_err(|e| {
            anyhow!(
                "Could not read configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let config: Config = toml::from_str(&contents).map_err(|e| {
            anyhow!(
                "Could not parse configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let contents = r#"
            [general]
            discord_token = "token"
            bot_owners = ["alice"]
            command_prefix = ";"

            [inference]
            url = "http://localhost:7860/infer"
            default_prompt = "an abstract landscape"

            [shadow]
            enabled = true
        "#;

        let config: Config = toml::from_str(contents).unwrap();
        assert_eq!(config.general.command_prefix, ";");
        assert_eq!(config.general.bot_owners, vec!["alice".to_string()]);
        assert_eq!(config.inference.default_prompt, "an abstract landscape");
        assert!(config.shadow.enabled);
    }
}
