use clap::Parser;
use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Parser)]
#[clap(
    name = "termchat",
    version = "0.1.0",
    about = "Chat with an AI model from the terminal. Type 'exit' to quit."
)]
pub struct Config {
    #[clap(
        long("api"),
        value_name = "URL",
        help = "The API endpoint base URL to use.",
        default_value = "https://api.openai.com"
    )]
    pub api: String,

    #[clap(
        long("key"),
        value_name = "API_KEY",
        help = "Sets the API key for remote endpoint; if absent, the envvar 'OPENAI_API_KEY' is checked",
        default_value = ""
    )]
    pub api_key: String,

    #[clap(
        long,
        value_name = "FILEPATH",
        help = "Loads environment variables from this file before looking up the API key [default: .env if present]"
    )]
    pub env_file: Option<PathBuf>,

    #[clap(
        long,
        value_name = "MODEL_ID",
        help = "Sets the model to use for generating completions with the API",
        default_value = "gpt-4"
    )]
    pub model_id: String,

    #[clap(
        short('n'),
        long,
        value_name = "INT",
        help = "Sets the maximum number of tokens to generate in each reply",
        default_value_t = 150
    )]
    pub max_tokens: u32,

    #[clap(
        long,
        value_name = "INT",
        help = "How many completions the API should generate; only the first is shown",
        default_value_t = 1
    )]
    pub samples: u32,

    #[clap(
        long,
        value_name = "F32",
        help = "Sets the temperature for sampling",
        default_value_t = 0.5
    )]
    pub temp: f32,

    #[clap(
        long,
        value_name = "F32",
        help = "Include only the top tokens whose probabilities add up to P when sampling"
    )]
    pub top_p: Option<f32>,

    #[clap(
        long,
        value_name = "INT",
        help = "The seed to use for the generation (determinism is not guaranteed)"
    )]
    pub seed: Option<i64>,

    #[clap(
        long,
        value_name = "BOOL",
        help = "Send only the latest prompt to the non-chat completion API, without conversation history",
        default_value_t = false
    )]
    pub plain: bool,
}

impl Config {
    /// Parses the command line, loads the dotenv file and resolves the API key.
    pub fn from_cli() -> Result<Self, ConfigError> {
        let config = Config::parse();
        config.load_env_file()?;
        config.resolve(env::var(API_KEY_VAR).ok())
    }

    fn load_env_file(&self) -> Result<(), ConfigError> {
        match &self.env_file {
            Some(path) => dotenvy::from_path(path)
                .map(|_| ())
                .map_err(|e| ConfigError::EnvFile {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }),
            None => match dotenvy::dotenv() {
                Ok(path) => {
                    tracing::debug!(path = %path.display(), "loaded environment file");
                    Ok(())
                }
                Err(e) if e.not_found() => Ok(()),
                Err(e) => Err(ConfigError::EnvFile {
                    path: ".env".to_string(),
                    reason: e.to_string(),
                }),
            },
        }
    }

    /// Falls back to `env_key` when no key was given on the command line and
    /// checks the generation parameters.
    pub fn resolve(mut self, env_key: Option<String>) -> Result<Self, ConfigError> {
        if self.api_key.trim().is_empty() {
            self.api_key = env_key
                .filter(|key| !key.trim().is_empty())
                .ok_or(ConfigError::MissingApiKey)?;
        }

        check_range("temperature", self.temp, 0.0, 2.0)?;
        if let Some(top_p) = self.top_p {
            check_range("top_p", top_p, 0.0, 1.0)?;
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::Zero { name: "max_tokens" });
        }
        if self.samples == 0 {
            return Err(ConfigError::Zero { name: "samples" });
        }

        Ok(self)
    }
}

fn check_range(name: &'static str, value: f32, min: f32, max: f32) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}
