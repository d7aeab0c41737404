//! Runtime configuration.
//!
//! Layers, lowest to highest precedence: built-in defaults, environment
//! variables, an optional TOML file (`--config`), then CLI flags.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use coordination::workflow::{GuardrailConfig, Role, STEPS_PER_ROUND};
use serde::Deserialize;

pub const DEFAULT_LLM_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_STATE_DIR: &str = ".foundry-state";

/// Chat-completion endpoint used by every role.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmEndpoint {
    pub url: String,
    pub model: String,
    /// Sent as a bearer token when present. Local servers usually need none.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for LlmEndpoint {
    fn default() -> Self {
        Self {
            url: DEFAULT_LLM_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout_secs: 120,
            max_tokens: 2048,
        }
    }
}

/// Sampling temperature per role.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Temperatures {
    pub drafter: f32,
    pub safety_guardian: f32,
    pub clinical_critic: f32,
}

impl Default for Temperatures {
    fn default() -> Self {
        Self {
            drafter: 0.7,
            safety_guardian: 0.0,
            clinical_critic: 0.2,
        }
    }
}

impl Temperatures {
    pub fn for_role(&self, role: Role) -> f32 {
        match role {
            Role::Drafter => self.drafter,
            Role::SafetyGuardian => self.safety_guardian,
            Role::ClinicalCritic => self.clinical_critic,
            Role::Supervisor => 0.0,
        }
    }
}

/// Checkpoint backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local; nothing survives exit.
    Memory,
    /// One JSON checkpoint per thread under `state_dir`.
    #[default]
    File,
    /// RocksDB under `state_dir` (requires the `heavy-state` feature).
    Rocks,
}

impl StoreBackend {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            "rocks" | "rocksdb" => Ok(Self::Rocks),
            other => bail!("unknown store backend '{other}' (expected memory, file or rocks)"),
        }
    }
}

/// Top-level foundry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundryConfig {
    pub llm: LlmEndpoint,
    pub temperatures: Temperatures,
    pub guardrails: GuardrailConfig,
    pub store: StoreBackend,
    pub state_dir: PathBuf,
    /// JSONL run log. Disabled when `None`.
    pub telemetry_path: Option<PathBuf>,
}

impl Default for FoundryConfig {
    fn default() -> Self {
        Self {
            llm: LlmEndpoint::default(),
            temperatures: Temperatures::default(),
            guardrails: GuardrailConfig::default(),
            store: StoreBackend::default(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            telemetry_path: None,
        }
    }
}

impl FoundryConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by `lookup`, which stands in for the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("FOUNDRY_LLM_URL") {
            config.llm.url = url;
        }
        if let Some(model) = lookup("FOUNDRY_MODEL") {
            config.llm.model = model;
        }
        config.llm.api_key = lookup("FOUNDRY_API_KEY")
            .or_else(|| lookup("OPENAI_API_KEY"))
            .filter(|key| !key.trim().is_empty());
        if let Some(raw) = lookup("FOUNDRY_ORACLE_TIMEOUT_SECS") {
            config.llm.timeout_secs = parse_var("FOUNDRY_ORACLE_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = lookup("FOUNDRY_MAX_REVISIONS") {
            config.guardrails.max_revisions = parse_var("FOUNDRY_MAX_REVISIONS", &raw)?;
        }
        if let Some(raw) = lookup("FOUNDRY_STEP_BUDGET") {
            config.guardrails.step_budget = parse_var("FOUNDRY_STEP_BUDGET", &raw)?;
        }
        if let Some(raw) = lookup("FOUNDRY_STORE") {
            config.store = StoreBackend::parse(&raw).context("FOUNDRY_STORE")?;
        }
        if let Some(dir) = lookup("FOUNDRY_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("FOUNDRY_TELEMETRY_PATH") {
            config.telemetry_path = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    /// Environment config with the TOML file at `path` applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let file: ConfigFile = toml::from_str(&raw)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            config.apply_file(file);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn apply_file(&mut self, file: ConfigFile) {
        if let Some(llm) = file.llm {
            if let Some(url) = llm.url {
                self.llm.url = url;
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(key) = llm.api_key {
                self.llm.api_key = Some(key);
            }
            if let Some(secs) = llm.timeout_secs {
                self.llm.timeout_secs = secs;
            }
            if let Some(max) = llm.max_tokens {
                self.llm.max_tokens = max;
            }
        }
        if let Some(temps) = file.temperatures {
            self.temperatures = temps;
        }
        if let Some(guardrails) = file.guardrails {
            if let Some(max) = guardrails.max_revisions {
                self.guardrails.max_revisions = max;
            }
            if let Some(budget) = guardrails.step_budget {
                self.guardrails.step_budget = budget;
            }
        }
        if let Some(store) = file.store {
            self.store = store;
        }
        if let Some(dir) = file.state_dir {
            self.state_dir = dir;
        }
        if let Some(path) = file.telemetry_path {
            self.telemetry_path = Some(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.guardrails.max_revisions == 0 {
            bail!("max_revisions must be at least 1");
        }
        if self.guardrails.step_budget < STEPS_PER_ROUND {
            bail!(
                "step_budget must be at least {} (one Supervisor pass plus its worker), got {}",
                STEPS_PER_ROUND,
                self.guardrails.step_budget
            );
        }
        if self.llm.timeout_secs == 0 {
            bail!("oracle timeout must be at least 1 second");
        }
        for role in [Role::Drafter, Role::SafetyGuardian, Role::ClinicalCritic] {
            let t = self.temperatures.for_role(role);
            if !(0.0..=2.0).contains(&t) {
                bail!("temperature for {role} must be within 0.0..=2.0, got {t}");
            }
        }
        Ok(())
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{key}={raw:?} is not valid: {e}"))
}

/// TOML overlay. Every field is optional; absent fields keep their value.
///
/// ```toml
/// store = "file"
/// state_dir = "/var/lib/foundry"
///
/// [llm]
/// url = "http://localhost:8080/v1/chat/completions"
/// model = "qwen2.5-14b-instruct"
///
/// [guardrails]
/// max_revisions = 3
///
/// [temperatures]
/// drafter = 0.8
/// safety_guardian = 0.0
/// clinical_critic = 0.3
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub llm: Option<LlmSection>,
    pub temperatures: Option<Temperatures>,
    pub guardrails: Option<GuardrailSection>,
    pub store: Option<StoreBackend>,
    pub state_dir: Option<PathBuf>,
    pub telemetry_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmSection {
    pub url: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardrailSection {
    pub max_revisions: Option<u32>,
    pub step_budget: Option<u32>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = FoundryConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.guardrails.max_revisions, 5);
        assert_eq!(config.guardrails.step_budget, 24);
        assert_eq!(config.store, StoreBackend::File);
        assert!(config.llm.api_key.is_none());
        assert!(config.telemetry_path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let config = FoundryConfig::from_lookup(lookup(&[
            ("FOUNDRY_MODEL", "local-14b"),
            ("FOUNDRY_MAX_REVISIONS", "3"),
            ("FOUNDRY_STEP_BUDGET", " 10 "),
            ("OPENAI_API_KEY", "sk-test"),
            ("FOUNDRY_STORE", "memory"),
            ("FOUNDRY_TELEMETRY_PATH", "/tmp/runs.jsonl"),
        ]))
        .unwrap();
        assert_eq!(config.llm.model, "local-14b");
        assert_eq!(config.guardrails.max_revisions, 3);
        assert_eq!(config.guardrails.step_budget, 10);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(
            config.telemetry_path,
            Some(PathBuf::from("/tmp/runs.jsonl"))
        );
    }

    #[test]
    fn test_foundry_key_wins_over_openai_key() {
        let config = FoundryConfig::from_lookup(lookup(&[
            ("FOUNDRY_API_KEY", "foundry"),
            ("OPENAI_API_KEY", "openai"),
        ]))
        .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("foundry"));
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = FoundryConfig::from_lookup(lookup(&[("FOUNDRY_MAX_REVISIONS", "five")]))
            .unwrap_err();
        assert!(err.to_string().contains("FOUNDRY_MAX_REVISIONS"));
    }

    #[test]
    fn test_toml_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foundry.toml");
        std::fs::write(
            &path,
            r#"
store = "memory"

[llm]
model = "from-file"

[guardrails]
max_revisions = 2

[temperatures]
drafter = 0.9
safety_guardian = 0.0
clinical_critic = 0.1
"#,
        )
        .unwrap();

        let file: ConfigFile = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let mut config = FoundryConfig::default();
        config.apply_file(file);

        assert_eq!(config.llm.model, "from-file");
        assert_eq!(config.llm.url, DEFAULT_LLM_URL);
        assert_eq!(config.guardrails.max_revisions, 2);
        assert_eq!(config.guardrails.step_budget, 24);
        assert_eq!(config.store, StoreBackend::Memory);
        assert_eq!(config.temperatures.for_role(Role::Drafter), 0.9);
    }

    #[test]
    fn test_unknown_toml_key_is_rejected() {
        assert!(toml::from_str::<ConfigFile>("max_revision = 3").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = FoundryConfig::default();
        config.guardrails.max_revisions = 0;
        assert!(config.validate().is_err());

        let mut config = FoundryConfig::default();
        config.temperatures.drafter = 3.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_step_budget_must_fit_one_round() {
        let config = FoundryConfig::from_lookup(lookup(&[("FOUNDRY_STEP_BUDGET", "1")])).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("step_budget must be at least 2"));

        let mut config = FoundryConfig::default();
        config.guardrails.step_budget = 2;
        config.validate().unwrap();
    }
}
