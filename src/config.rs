//! Declarative configuration for the fleet controller.
use regex::Regex;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
};
use strum_macros::AsRefStr;

use crate::error::ConfigError;

/// The set of model backends an agent may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ModelIdentifier {
    /// Anthropic Claude.
    Claude,
    /// Google Gemini.
    Gemini,
    /// OpenAI GPT-4.
    #[serde(rename = "gpt-4")]
    #[strum(serialize = "gpt-4")]
    Gpt4,
    /// OpenAI Codex.
    Codex,
    /// Generic OpenAI-compatible endpoint.
    #[serde(rename = "openai")]
    #[strum(serialize = "openai")]
    OpenAi,
}

impl ModelIdentifier {
    /// The wire string this identifier parses from / renders to.
    pub fn as_str(&self) -> &'static str {
        self.as_ref()
    }
}

/// Configuration for a single named agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Command line used to spawn the agent, e.g. `"python worker.py"`.
    #[serde(rename = "command")]
    pub command_line: String,
    /// The backend this agent talks to.
    #[serde(rename = "model")]
    pub model_identifier: ModelIdentifier,
    /// Ordered sequence of phase names the agent progresses through.
    pub phases: Vec<String>,
    /// Whether the health monitor should restart this agent automatically.
    #[serde(default = "default_autorestart")]
    pub autorestart: bool,
}

fn default_autorestart() -> bool {
    true
}

/// `[core]` settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CoreConfig {
    /// Filesystem path to the task database store.
    pub task_db_path: String,
}

/// `[services.mail]` settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    /// Command line used to start the mail service.
    pub start_command: String,
    /// Base URL the mail HTTP client talks to.
    pub url: String,
}

/// `[services]` settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    /// The auxiliary mail service.
    pub mail: MailConfig,
}

/// Top-level configuration, as parsed from the TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// `[core]` block.
    pub core: CoreConfig,
    /// `[services]` block.
    pub services: ServicesConfig,
    /// `[agents.<name>]` blocks. `BTreeMap` so reconciliation and display
    /// order are deterministic.
    pub agents: BTreeMap<String, AgentConfig>,
}

impl Config {
    /// Validates the invariants spec.md §3 requires beyond what serde's
    /// shape already enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core.task_db_path.trim().is_empty() {
            return Err(ConfigError::Invalid("core.task_db_path must not be empty".into()));
        }
        if self.services.mail.start_command.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "services.mail.start_command must not be empty".into(),
            ));
        }
        if !self.services.mail.url.starts_with("http://")
            && !self.services.mail.url.starts_with("https://")
        {
            return Err(ConfigError::Invalid(format!(
                "services.mail.url '{}' does not parse as an HTTP URL",
                self.services.mail.url
            )));
        }
        for (name, agent) in &self.agents {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("agent name must not be empty".into()));
            }
            if agent.command_line.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent '{name}' has an empty command_line"
                )));
            }
            if agent.phases.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "agent '{name}' must declare at least one phase"
                )));
            }
        }
        Ok(())
    }

    /// Names of agents declared in this config, in deterministic order.
    pub fn agent_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}

/// Expands `${VAR}` / `$VAR` references in `input`, following the same
/// regex-driven substitution the teacher's config loader used. An unresolved
/// variable is a hard startup error rather than a silent empty substitution.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("static regex is valid");
    let mut first_err = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                if first_err.is_none() {
                    first_err = Some(var_name.to_string());
                }
                String::new()
            }
        }
    });
    if let Some(missing) = first_err {
        return Err(ConfigError::MissingEnvVar(missing));
    }
    Ok(result.to_string())
}

/// Loads, expands, parses, and validates the config file at `path`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let expanded = expand_env_vars(&raw)?;
    let config: Config = toml::from_str(&expanded)?;
    config.validate()?;
    Ok(config)
}

/// Default config file path, matching the `pm3`-style sibling example's
/// convention of looking relative to the current directory first.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("fleet.toml")
}

/// Compares two agent configs for the Reload Engine's "changed" predicate:
/// true if `command_line`, `model_identifier`, or `phases` differ.
pub fn agent_changed(old: &AgentConfig, new: &AgentConfig) -> bool {
    old.command_line != new.command_line
        || old.model_identifier != new.model_identifier
        || old.phases != new.phases
}
