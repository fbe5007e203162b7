//! Configuration management

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coerce::SynonymTable;
use crate::error::Error;
use crate::llm::groq::GROQ_API_URL;
use crate::provider::LaunchSpec;
use crate::Result;

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Completion service API key (falls back to `GROQ_API_KEY`)
    #[serde(default)]
    pub api_key: String,

    /// Base URL of the OpenAI-compatible completion endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used to build plans
    #[serde(default = "default_planner_model")]
    pub planner_model: String,

    #[serde(default = "default_planner_temperature")]
    pub planner_temperature: f32,

    #[serde(default = "default_planner_max_tokens")]
    pub planner_max_tokens: u32,

    /// Model used to phrase the final answer
    #[serde(default = "default_synthesis_model")]
    pub synthesis_model: String,

    #[serde(default = "default_synthesis_temperature")]
    pub synthesis_temperature: f32,

    #[serde(default = "default_synthesis_max_tokens")]
    pub synthesis_max_tokens: u32,

    /// Characters of each tool result shown to the synthesis model
    #[serde(default = "default_result_snippet_chars")]
    pub result_snippet_chars: usize,

    /// Timeout for completion calls and provider responses
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Tool providers, connected in this order
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderConfig>,

    /// Extra argument synonym tables, tried after the built-in ones
    #[serde(default)]
    pub synonyms: Vec<SynonymTable>,
}

/// Launch configuration for one tool provider process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment for the process; values may use `${VAR}` or `${VAR:-default}`
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// Resolve into a launch spec, expanding environment references.
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), expand_env_vars(v)))
                .collect(),
        }
    }
}

fn default_base_url() -> String {
    GROQ_API_URL.to_string()
}

fn default_planner_model() -> String {
    "deepseek-r1-distill-llama-70b".to_string()
}

fn default_planner_temperature() -> f32 {
    0.1
}

fn default_planner_max_tokens() -> u32 {
    2048
}

fn default_synthesis_model() -> String {
    "llama3-8b-8192".to_string()
}

fn default_synthesis_temperature() -> f32 {
    0.7
}

fn default_synthesis_max_tokens() -> u32 {
    1024
}

fn default_result_snippet_chars() -> usize {
    500
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            name: "filesystem".to_string(),
            command: "npx".to_string(),
            args: vec![
                "-y".to_string(),
                "@modelcontextprotocol/server-filesystem".to_string(),
                "/tmp".to_string(),
            ],
            env: BTreeMap::new(),
        },
        ProviderConfig {
            name: "brave-search".to_string(),
            command: "npx".to_string(),
            args: vec![
                "-y".to_string(),
                "@modelcontextprotocol/server-brave-search".to_string(),
            ],
            env: BTreeMap::from([(
                "BRAVE_API_KEY".to_string(),
                "${BRAVE_API_KEY}".to_string(),
            )]),
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            planner_model: default_planner_model(),
            planner_temperature: default_planner_temperature(),
            planner_max_tokens: default_planner_max_tokens(),
            synthesis_model: default_synthesis_model(),
            synthesis_temperature: default_synthesis_temperature(),
            synthesis_max_tokens: default_synthesis_max_tokens(),
            result_snippet_chars: default_result_snippet_chars(),
            request_timeout_secs: default_request_timeout_secs(),
            providers: default_providers(),
            synonyms: Vec::new(),
        }
    }
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Fill the API key from the environment when the file left it empty.
    pub fn apply_env(&mut self) {
        if self.api_key.is_empty() {
            if let Ok(key) = std::env::var(API_KEY_ENV) {
                self.api_key = key;
            }
        }
    }

    /// Check everything that must hold before any request is processed.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config(format!(
                "No API key configured. Set {API_KEY_ENV} or run 'orchestra init'."
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.providers.is_empty() {
            return Err(Error::Config("No tool providers configured".to_string()));
        }

        let mut seen = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() || provider.name.contains(':') {
                return Err(Error::Config(format!(
                    "Invalid provider name {:?}: must be non-empty and contain no ':'",
                    provider.name
                )));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate provider name: {}",
                    provider.name
                )));
            }
        }

        Ok(())
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references from the environment.
pub fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            match var_expr.split_once(":-") {
                Some((name, default)) => {
                    result.push_str(&std::env::var(name).unwrap_or_else(|_| default.to_string()))
                }
                None => result.push_str(&std::env::var(&var_expr).unwrap_or_default()),
            }
        } else {
            result.push(ch);
        }
    }
    result
}

/// Get the config directory path
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".orchestra")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Load configuration from `path`; a missing file yields the defaults.
pub fn load_from(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    } else {
        Config::default()
    };
    config.apply_env();
    Ok(config)
}

/// Save configuration to `path`
pub fn save_to(config: &Config, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Interactive setup wizard; writes the result to `path`.
pub fn init(path: &Path) -> Result<()> {
    use crate::ui;
    use inquire::{Confirm, Password, Text};

    ui::print_header("Setup Wizard", "Local");
    println!("  Let's get Orchestra configured.\n");

    let mut config = load_from(path)?;

    let key = Password::new("Enter your Groq API key (leave empty to use $GROQ_API_KEY):")
        .without_confirmation()
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    config.api_key = key;

    config.planner_model = Text::new("Planning model:")
        .with_default(&config.planner_model)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    config.synthesis_model = Text::new("Answer model:")
        .with_default(&config.synthesis_model)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;

    let names: Vec<&str> = config.providers.iter().map(|p| p.name.as_str()).collect();
    ui::print_step(&format!("Configured providers: {}", names.join(", ")));
    let keep = Confirm::new("Keep these providers?")
        .with_default(true)
        .prompt()
        .map_err(|e| Error::Config(format!("Prompt failed: {}", e)))?;
    if !keep {
        ui::print_step(&format!("Edit the providers list in {:?}", path));
    }

    ui::print_thinking("Saving configuration");
    save_to(&config, path)?;

    println!();
    ui::print_success("Setup complete! Run 'orchestra chat' to start.");
    Ok(())
}
