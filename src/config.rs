//! Recon gateway configuration: deserialization and validation.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::cli::profiles::Service;
use crate::error::ReconError;

/// Environment variable overriding `execution.default_timeout_secs`.
pub const TIMEOUT_ENV_VAR: &str = "RECON_TIMEOUT_SECS";

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` if the value is not a
/// valid env-var reference.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Resolve a map of env-var references to their actual values.
///
/// Unknown variables resolve to the empty string (same as shell `${UNSET-}`).
pub fn resolve_env_vars(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.iter()
        .map(|(k, v)| {
            let resolved = match parse_env_ref(v) {
                Some(var_name) => std::env::var(var_name).unwrap_or_default(),
                None => v.clone(), // rejected by validate()
            };
            (k.clone(), resolved)
        })
        .collect()
}

/// Top-level recon configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReconConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Per-tool overrides keyed by service name (`[tools.nmap]`).
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,
}

/// Process-wide execution knobs, threaded into every request's runner call.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Used when a caller omits a process-level `timeout`; clamped into the
    /// service's documented bounds.
    pub default_timeout_secs: Option<u64>,
    /// Ceiling applied to every derived process deadline.
    pub max_timeout_secs: Option<u64>,
    /// Grace window between SIGTERM and SIGKILL on timeout.
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    /// Per-stream capture cap in bytes. 0 means uncapped.
    #[serde(default)]
    pub max_output_bytes: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: None,
            max_timeout_secs: None,
            kill_grace_ms: default_kill_grace_ms(),
            max_output_bytes: 0,
        }
    }
}

/// Overrides for one wrapped tool.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Executable path overriding the PATH lookup of the default binary name.
    pub binary: Option<String>,
    /// Env var references (`${VAR}`), resolved at spawn time.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

fn default_kill_grace_ms() -> u64 {
    2000
}

impl ReconConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: ReconConfig = toml::from_str(content)
            .map_err(|e| ReconError::InvalidConfig("toml".to_string(), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, apply environment overrides and validate a config file.
    pub async fn load(path: &Path) -> crate::Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ReconError::ConfigIo(path.display().to_string(), e.to_string()))?;
        let mut config: ReconConfig = toml::from_str(&content).map_err(|e| {
            ReconError::InvalidConfig(path.display().to_string(), e.to_string())
        })?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RECON_TIMEOUT_SECS` if set.
    pub fn apply_env_overrides(&mut self) -> crate::Result<()> {
        if let Ok(raw) = std::env::var(TIMEOUT_ENV_VAR) {
            let secs = raw.trim().parse::<u64>().map_err(|_| {
                ReconError::InvalidConfig(
                    TIMEOUT_ENV_VAR.to_string(),
                    format!("expected a whole number of seconds, got '{}'", raw),
                )
            })?;
            self.execution.default_timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// Validate the config, failing fast on misconfigurations before serving.
    pub fn validate(&self) -> crate::Result<()> {
        let exec = &self.execution;
        if exec.kill_grace_ms == 0 {
            return Err(ReconError::InvalidConfig(
                "execution".to_string(),
                "kill_grace_ms must be > 0".to_string(),
            ));
        }
        if exec.max_timeout_secs == Some(0) {
            return Err(ReconError::InvalidConfig(
                "execution".to_string(),
                "max_timeout_secs must be > 0".to_string(),
            ));
        }
        if exec.default_timeout_secs == Some(0) {
            return Err(ReconError::InvalidConfig(
                "execution".to_string(),
                "default_timeout_secs must be > 0".to_string(),
            ));
        }
        if let (Some(default), Some(max)) = (exec.default_timeout_secs, exec.max_timeout_secs) {
            if default > max {
                return Err(ReconError::InvalidConfig(
                    "execution".to_string(),
                    format!(
                        "default_timeout_secs ({}) exceeds max_timeout_secs ({})",
                        default, max
                    ),
                ));
            }
        }

        for (name, tool) in &self.tools {
            let section = format!("tools.{}", name);
            if Service::from_name(name).is_none() {
                return Err(ReconError::InvalidConfig(
                    section,
                    format!(
                        "unknown service. Known services: {}",
                        Service::names().join(", ")
                    ),
                ));
            }

            if !tool.enabled {
                continue;
            }

            if tool.binary.as_deref().is_some_and(|b| b.trim().is_empty()) {
                return Err(ReconError::InvalidConfig(
                    section,
                    "binary must not be empty".to_string(),
                ));
            }

            for (key, value) in &tool.env {
                if parse_env_ref(value).is_none() {
                    return Err(ReconError::InvalidConfig(
                        section,
                        format!(
                            "env value for key '{}' must be a ${{VAR}} reference, got '{}'",
                            key, value
                        ),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Overrides for a service, if configured.
    pub fn tool(&self, service: Service) -> Option<&ToolConfig> {
        self.tools.get(service.name())
    }

    /// Whether a service is exposed. Services without a section are enabled.
    pub fn is_enabled(&self, service: Service) -> bool {
        self.tool(service).is_none_or(|t| t.enabled)
    }

    /// Grace window between SIGTERM and SIGKILL.
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.execution.kill_grace_ms)
    }

    /// Capture cap per stream, if any.
    pub fn output_cap(&self) -> Option<usize> {
        match self.execution.max_output_bytes {
            0 => None,
            n => Some(n),
        }
    }

    /// Apply the configured ceiling to a service's derived deadline.
    pub fn cap_deadline(&self, deadline: Duration) -> Duration {
        match self.execution.max_timeout_secs {
            Some(max) => deadline.min(Duration::from_secs(max)),
            None => deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_toml(toml_str: &str) -> ReconConfig {
        toml::from_str(toml_str).expect("valid TOML")
    }

    #[test]
    fn test_parse_env_ref() {
        assert_eq!(parse_env_ref("${FOO}"), Some("FOO"));
        assert_eq!(parse_env_ref("${WPSCAN_API_TOKEN}"), Some("WPSCAN_API_TOKEN"));
        assert_eq!(parse_env_ref("$FOO"), None);
        assert_eq!(parse_env_ref("literal"), None);
        assert_eq!(parse_env_ref("${"), None);
    }

    #[test]
    fn test_resolve_env_vars() {
        // SAFETY: test-only, no concurrent threads depend on this env var.
        unsafe { std::env::set_var("RECON_CONFIG_TEST_VAR", "resolved_value") };
        let mut env = HashMap::new();
        env.insert("KEY".to_string(), "${RECON_CONFIG_TEST_VAR}".to_string());
        let resolved = resolve_env_vars(&env);
        assert_eq!(resolved.get("KEY").unwrap(), "resolved_value");
        // SAFETY: test-only cleanup.
        unsafe { std::env::remove_var("RECON_CONFIG_TEST_VAR") };
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_toml("");
        assert!(config.validate().is_ok());
        assert_eq!(config.execution.kill_grace_ms, 2000);
        assert_eq!(config.output_cap(), None);
        assert!(config.is_enabled(Service::Nmap));
        assert_eq!(
            config.cap_deadline(Duration::from_secs(1800)),
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn test_full_config() {
        let config = parse_toml(
            r#"
            [execution]
            default_timeout_secs = 120
            max_timeout_secs = 900
            kill_grace_ms = 500
            max_output_bytes = 4096

            [tools.wpscan]
            binary = "/opt/wpscan/bin/wpscan"
            env = { WPSCAN_API_TOKEN = "${WPSCAN_API_TOKEN}" }

            [tools.nikto]
            enabled = false
            "#,
        );
        assert!(config.validate().is_ok());
        assert_eq!(config.kill_grace(), Duration::from_millis(500));
        assert_eq!(config.output_cap(), Some(4096));
        assert!(!config.is_enabled(Service::Nikto));
        assert!(config.is_enabled(Service::Wpscan));
        assert_eq!(
            config.tool(Service::Wpscan).and_then(|t| t.binary.as_deref()),
            Some("/opt/wpscan/bin/wpscan")
        );
        assert_eq!(
            config.cap_deadline(Duration::from_secs(1800)),
            Duration::from_secs(900)
        );
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let config = parse_toml(
            r#"
            [tools.traceroute]
            binary = "traceroute"
            "#,
        );
        let result = config.validate();
        assert!(
            matches!(result, Err(ReconError::InvalidConfig(section, msg)) if section == "tools.traceroute" && msg.contains("unknown service"))
        );
    }

    #[test]
    fn test_literal_env_value_rejected() {
        let config = parse_toml(
            r#"
            [tools.wpscan]
            env = { WPSCAN_API_TOKEN = "abc123" }
            "#,
        );
        let result = config.validate();
        assert!(
            matches!(result, Err(ReconError::InvalidConfig(section, msg)) if section == "tools.wpscan" && msg.contains("${VAR}"))
        );
    }

    #[test]
    fn test_disabled_tool_skips_validation() {
        let config = parse_toml(
            r#"
            [tools.nmap]
            enabled = false
            binary = ""
            "#,
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_exceeding_ceiling_rejected() {
        let config = parse_toml(
            r#"
            [execution]
            default_timeout_secs = 600
            max_timeout_secs = 60
            "#,
        );
        assert!(matches!(
            config.validate(),
            Err(ReconError::InvalidConfig(section, _)) if section == "execution"
        ));
    }

    #[test]
    fn test_zero_grace_rejected() {
        let config = parse_toml(
            r#"
            [execution]
            kill_grace_ms = 0
            "#,
        );
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recon.toml");
        std::fs::write(
            &path,
            r#"
            [execution]
            max_timeout_secs = 300

            [tools.httpx]
            binary = "/usr/local/bin/httpx"
            "#,
        )
        .unwrap();

        let config = ReconConfig::load(&path).await.unwrap();
        assert_eq!(config.execution.max_timeout_secs, Some(300));
        assert_eq!(
            config.tool(Service::Httpx).and_then(|t| t.binary.as_deref()),
            Some("/usr/local/bin/httpx")
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let result = ReconConfig::load(&path).await;
        assert!(matches!(result, Err(ReconError::ConfigIo(_, _))));
    }

    #[test]
    fn test_from_toml_str_reports_syntax_errors() {
        let result = ReconConfig::from_toml_str("[execution\nkill_grace_ms = 1");
        assert!(matches!(result, Err(ReconError::InvalidConfig(section, _)) if section == "toml"));
    }
}
