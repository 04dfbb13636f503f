//! ReconRegistry — the single entry point for service invocations.
//!
//! The registry owns the validated configuration and one [`ProcessRunner`],
//! resolves a service name to its [`ServiceProfile`], and drives the
//! validate → build → run → parse pipeline. Every request that names a known,
//! enabled service produces exactly one [`ServiceResponse`]; the only errors
//! surfaced to the transport are unknown or disabled service names.

use std::sync::Arc;

use chrono::Utc;
use rmcp::model::Tool;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::cli::harness::{Outcome, ProcessRunner};
use crate::cli::params::{Arguments, Constraint, to_json_schema, validate};
use crate::cli::profiles::{
    CurlProfile, DnsProfile, HttpxProfile, NbtscanProfile, NiktoProfile, NmapProfile, PingProfile,
    Service, ServiceProfile, WhoisProfile, WpscanProfile,
};
use crate::config::{ReconConfig, resolve_env_vars};
use crate::error::{Failure, ReconError, ValidationError};
use crate::response::ServiceResponse;

/// Request key selecting the JSON (true) or plain-text (false) rendering.
pub const AS_JSON: &str = "AsJson";

/// Remove `AsJson` from a raw argument map and return its value.
///
/// Missing or unreadable values fall back to JSON.
pub fn take_as_json(arguments: &mut Map<String, Value>) -> bool {
    match arguments.remove(AS_JSON) {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_i64() != Some(0),
        Some(Value::String(s)) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "false" | "no" | "n" | "off" | "0"
        ),
        _ => true,
    }
}

/// Service gateway: dispatches requests to the nine wrapped tools.
pub struct ReconRegistry {
    config: ReconConfig,
    runner: ProcessRunner,
    /// Root cancellation token. Cancelling it terminates every running tool.
    cancel: CancellationToken,
}

impl ReconRegistry {
    /// Build a registry from config. Fails fast on an invalid config.
    pub fn new(config: ReconConfig) -> crate::Result<Self> {
        config.validate()?;
        let runner = ProcessRunner::new(config.kill_grace(), config.output_cap());
        for service in Service::ALL {
            if !config.is_enabled(service) {
                tracing::debug!(service = %service, "skipping disabled service");
            }
        }
        Ok(Self {
            config,
            runner,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    /// Enabled services in catalog order.
    pub fn services(&self) -> Vec<Service> {
        Service::ALL
            .into_iter()
            .filter(|s| self.config.is_enabled(*s))
            .collect()
    }

    /// One MCP tool per enabled service, schema generated from its parameter table.
    pub fn tools(&self) -> Vec<Tool> {
        self.services()
            .into_iter()
            .map(|service| {
                let mut schema = to_json_schema(service.params());
                schema["properties"][AS_JSON] = serde_json::json!({
                    "type": "boolean",
                    "description": "Return the response envelope as JSON (true) or plain text (false)",
                    "default": true,
                });
                Tool {
                    name: service.name().into(),
                    title: None,
                    description: Some(service.description().into()),
                    input_schema: Arc::new(schema.as_object().cloned().unwrap_or_default()),
                    output_schema: None,
                    annotations: None,
                    icons: None,
                    meta: None,
                }
            })
            .collect()
    }

    /// Run one request against a service by name.
    ///
    /// `AsJson` is stripped before validation. Validation, launch and timeout
    /// failures are all reported inside the returned envelope.
    pub async fn dispatch(
        &self,
        name: &str,
        mut arguments: Map<String, Value>,
    ) -> crate::Result<ServiceResponse> {
        let service =
            Service::from_name(name).ok_or_else(|| ReconError::UnknownService(name.to_string()))?;
        if !self.config.is_enabled(service) {
            return Err(ReconError::ServiceDisabled(service.name().to_string()));
        }
        arguments.remove(AS_JSON);

        let response = match service {
            Service::Ping => self.execute::<PingProfile>(arguments).await,
            Service::Dns => self.execute::<DnsProfile>(arguments).await,
            Service::Whois => self.execute::<WhoisProfile>(arguments).await,
            Service::Curl => self.execute::<CurlProfile>(arguments).await,
            Service::Nmap => self.execute::<NmapProfile>(arguments).await,
            Service::Nikto => self.execute::<NiktoProfile>(arguments).await,
            Service::Wpscan => self.execute::<WpscanProfile>(arguments).await,
            Service::Httpx => self.execute::<HttpxProfile>(arguments).await,
            Service::Nbtscan => self.execute::<NbtscanProfile>(arguments).await,
        };
        Ok(response)
    }

    async fn execute<P: ServiceProfile>(&self, mut raw: Map<String, Value>) -> ServiceResponse {
        let service = P::SERVICE;
        let started = Utc::now();
        self.apply_default_timeout(service, &mut raw);

        let (arguments, args) = match validated::<P>(&raw) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::debug!(service = %service, error = %e, "request rejected");
                let target = raw_target(service, &raw);
                return ServiceResponse::rejected(
                    service,
                    target,
                    redact::<P>(raw),
                    started,
                    &Failure::from(e),
                );
            }
        };

        let tool = self.config.tool(service);
        let env = tool.map(|t| resolve_env_vars(&t.env)).unwrap_or_default();
        let mut command = P::command(&args, &env);
        if let Some(binary) = tool.and_then(|t| t.binary.as_deref()) {
            command = command.with_program(binary);
        }
        let deadline = self.config.cap_deadline(P::deadline(&args));

        let execution = self.runner.run(&command, deadline, &env, &self.cancel).await;
        if execution.truncated {
            tracing::warn!(service = %service, "tool output truncated at capture cap");
        }

        let structured_output = if execution.produced_output() {
            structure(service, &P::parse(&execution.stdout, &execution.stderr, &args))
        } else {
            Map::new()
        };

        let failure = match &execution.outcome {
            Outcome::TimedOut(after) => Some(Failure::Timeout { after: *after }),
            Outcome::NotFound => {
                tracing::warn!(service = %service, binary = %command.program(), "tool binary not found");
                Some(Failure::ToolMissing {
                    binary: command.program().to_string(),
                    hint: service.install_hint(),
                })
            }
            Outcome::LaunchFailed(message) => Some(Failure::Launch {
                binary: command.program().to_string(),
                message: message.clone(),
            }),
            Outcome::Exited(_) | Outcome::Signaled(_) | Outcome::Cancelled => None,
        };
        let cancelled = execution.outcome == Outcome::Cancelled;

        let mut response = ServiceResponse::from_execution(
            service,
            P::target(&args),
            redact::<P>(arguments.into_map()),
            command.display(),
            execution,
            structured_output,
            failure.as_ref(),
        );
        if cancelled {
            response.add_error("Command cancelled: gateway is shutting down", None);
        }
        response
    }

    /// Fill in the configured default timeout for services whose `timeout`
    /// is the process deadline, clamped into the parameter's bounds.
    fn apply_default_timeout(&self, service: Service, raw: &mut Map<String, Value>) {
        let Some(default) = self.config.execution.default_timeout_secs else {
            return;
        };
        if !service.timeout_is_deadline() {
            return;
        }
        let omitted = match raw.get("timeout") {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if !omitted {
            return;
        }
        let secs = match service.params().iter().find(|p| p.name == "timeout") {
            Some(spec) => match spec.constraint {
                Constraint::IntRange(min, max) => (default as i64).clamp(min, max),
                _ => default as i64,
            },
            None => return,
        };
        raw.insert("timeout".to_string(), Value::from(secs));
    }

    /// Token observed by every tool run; cancel it to shut down.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Terminate all running tools. Later requests fail fast with RC 130.
    pub fn shutdown(&self) {
        tracing::info!("ReconRegistry shutting down running tools");
        self.cancel.cancel();
    }
}

fn validated<P: ServiceProfile>(
    raw: &Map<String, Value>,
) -> Result<(Arguments, P::Args), ValidationError> {
    let arguments = validate(P::SERVICE.params(), raw)?;
    let args = arguments.decode::<P::Args>()?;
    Ok((arguments, args))
}

/// Best-effort target for an envelope whose arguments failed validation.
fn raw_target(service: Service, raw: &Map<String, Value>) -> String {
    match raw.get(service.target_param()) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(","),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn redact<P: ServiceProfile>(mut arguments: Map<String, Value>) -> Map<String, Value> {
    for name in P::redacted_arguments() {
        if let Some(value) = arguments.get_mut(*name) {
            *value = Value::String("***".to_string());
        }
    }
    arguments
}

fn structure<R: Serialize>(service: Service, report: &R) -> Map<String, Value> {
    match serde_json::to_value(report) {
        Ok(Value::Object(map)) => {
            if map.values().all(is_blank) {
                tracing::debug!(service = %service, "parser found nothing in tool output");
            }
            map
        }
        Ok(_) => Map::new(),
        Err(e) => {
            tracing::warn!(service = %service, error = %e, "failed to encode structured output");
            Map::new()
        }
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::harness::RC_CANCELLED;
    use crate::error::{RC_TIMEOUT, RC_TOOL_MISSING, RC_VALIDATION};
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn registry(toml: &str) -> ReconRegistry {
        ReconRegistry::new(ReconConfig::from_toml_str(toml).unwrap()).unwrap()
    }

    #[test]
    fn test_take_as_json() {
        let mut raw = args(json!({ "host": "h", "AsJson": "false" }));
        assert!(!take_as_json(&mut raw));
        assert!(!raw.contains_key(AS_JSON));

        let mut raw = args(json!({ "AsJson": 0 }));
        assert!(!take_as_json(&mut raw));
        assert!(take_as_json(&mut args(json!({ "AsJson": true }))));
        assert!(take_as_json(&mut args(json!({}))));
    }

    #[test]
    fn test_tools_follow_enabled_services() {
        let registry = registry(
            r#"
            [tools.nikto]
            enabled = false
            "#,
        );
        let tools = registry.tools();
        assert_eq!(tools.len(), 8);
        assert!(tools.iter().all(|t| t.name != "nikto"));

        let nmap = tools.iter().find(|t| t.name == "nmap").unwrap();
        let props = nmap.input_schema["properties"].as_object().unwrap();
        assert!(props.contains_key("scan_type"));
        assert_eq!(props[AS_JSON]["default"], true);
        assert_eq!(nmap.input_schema["required"], json!(["target"]));
    }

    #[tokio::test]
    async fn test_unknown_and_disabled_services() {
        let registry = registry("[tools.wpscan]\nenabled = false\n");
        let err = registry.dispatch("traceroute", Map::new()).await.unwrap_err();
        assert!(matches!(err, ReconError::UnknownService(name) if name == "traceroute"));
        let err = registry.dispatch("wpscan", Map::new()).await.unwrap_err();
        assert!(matches!(err, ReconError::ServiceDisabled(name) if name == "wpscan"));
    }

    #[tokio::test]
    async fn test_missing_target_rejected_for_every_service() {
        let registry = registry("");
        for service in Service::ALL {
            let response = registry
                .dispatch(service.name(), args(json!({ "AsJson": true })))
                .await
                .unwrap();
            assert_eq!(response.service, service);
            assert_eq!(response.return_code, RC_VALIDATION, "{}", service);
            assert_eq!(
                response.raw_error,
                format!("{} parameter is required", service.target_param())
            );
            assert!(response.raw_command.is_empty());
            assert!(response.structured_output.is_empty());
            assert!(!response.arguments.contains_key(AS_JSON));
            assert!(response.process_time_ms >= 0);
        }
    }

    #[tokio::test]
    async fn test_out_of_range_rejected_with_target() {
        let registry = registry("");
        let response = registry
            .dispatch("ping", args(json!({ "host": "example.com", "count": 500 })))
            .await
            .unwrap();
        assert_eq!(response.target, "example.com");
        assert_eq!(response.return_code, RC_VALIDATION);
        assert_eq!(response.raw_error, "count must be between 1 and 99");
    }

    #[tokio::test]
    async fn test_missing_binary_reports_install_hint() {
        let registry = registry(
            r#"
            [tools.ping]
            binary = "/nonexistent/recon-test/ping"
            "#,
        );
        let response = registry
            .dispatch("ping", args(json!({ "host": "invalid.invalid", "count": 1 })))
            .await
            .unwrap();
        assert_eq!(response.return_code, RC_TOOL_MISSING);
        assert!(response.raw_error.contains("sudo apt-get install iputils-ping"));
        assert!(response.raw_command.starts_with("/nonexistent/recon-test/ping"));
        assert!(response.structured_output.is_empty());
        assert!(!response.is_successful());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_is_parsed() {
        // `echo` stands in for dig and echoes the query back.
        let registry = registry("[tools.dns]\nbinary = \"echo\"\n");
        let response = registry
            .dispatch("dns", args(json!({ "host": "example.com", "record_types": "a" })))
            .await
            .unwrap();
        assert_eq!(response.return_code, 0);
        assert!(response.is_successful());
        assert_eq!(response.target, "example.com");
        assert_eq!(
            response.raw_command,
            "echo +noall +answer +time=5 +tries=1 example.com A"
        );
        assert_eq!(response.raw_output.trim(), "+noall +answer +time=5 +tries=1 example.com A");
        assert_eq!(response.arguments["record_types"], json!(["A"]));
        assert_eq!(response.structured_output["host"], "example.com");
        assert!(response.process_end_time >= response.process_start_time);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        // `yes` ignores dig's arguments and never exits on its own.
        let registry = registry(
            r#"
            [execution]
            max_timeout_secs = 1
            kill_grace_ms = 200
            max_output_bytes = 4096

            [tools.dns]
            binary = "yes"
            "#,
        );
        let response = registry
            .dispatch("dns", args(json!({ "host": "example.com" })))
            .await
            .unwrap();
        assert_eq!(response.return_code, RC_TIMEOUT);
        assert!(response.raw_error.contains("Command timed out after 1 seconds"));
        assert!(!response.raw_output.is_empty());
        assert!(response.raw_output.ends_with("[output truncated at 4096 bytes]"));
        assert!(response.process_time_ms >= 1000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_default_timeout_clamped_and_secret_redacted() {
        // SAFETY: test-only, no other test reads this variable.
        unsafe { std::env::set_var("RECON_REGISTRY_TEST_TOKEN", "s3cr3t") };
        let registry = registry(
            r#"
            [execution]
            default_timeout_secs = 5000
            max_timeout_secs = 6000

            [tools.wpscan]
            binary = "true"
            env = { WPSCAN_API_TOKEN = "${RECON_REGISTRY_TEST_TOKEN}" }

            [tools.nmap]
            binary = "true"
            "#,
        );

        let response = registry
            .dispatch("nmap", args(json!({ "target": "127.0.0.1" })))
            .await
            .unwrap();
        assert_eq!(response.arguments["timeout"], 1800);

        let response = registry
            .dispatch("wpscan", args(json!({ "url": "example.com" })))
            .await
            .unwrap();
        assert_eq!(response.arguments["timeout"], 1800);
        assert!(response.raw_command.contains("--api-token ***"));
        assert!(!response.raw_command.contains("s3cr3t"));

        let response = registry
            .dispatch("wpscan", args(json!({ "url": "example.com", "api_token": "abc123" })))
            .await
            .unwrap();
        assert_eq!(response.arguments["api_token"], "***");
        assert!(!response.raw_command.contains("abc123"));
        // SAFETY: test-only cleanup.
        unsafe { std::env::remove_var("RECON_REGISTRY_TEST_TOKEN") };
    }

    #[tokio::test]
    async fn test_explicit_timeout_not_replaced() {
        let registry = registry(
            r#"
            [execution]
            default_timeout_secs = 90

            [tools.curl]
            binary = "/nonexistent/recon-test/curl"
            "#,
        );
        let response = registry
            .dispatch("curl", args(json!({ "url": "https://example.com", "timeout": 7 })))
            .await
            .unwrap();
        assert_eq!(response.arguments["timeout"], 7);

        let response = registry
            .dispatch("curl", args(json!({ "url": "https://example.com" })))
            .await
            .unwrap();
        assert_eq!(response.arguments["timeout"], 90);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_cancels_requests() {
        let registry = registry("[tools.dns]\nbinary = \"yes\"\n[execution]\nmax_output_bytes = 1024\n");
        registry.shutdown();
        let response = registry
            .dispatch("dns", args(json!({ "host": "example.com" })))
            .await
            .unwrap();
        assert_eq!(response.return_code, RC_CANCELLED);
        assert!(response.raw_error.contains("shutting down"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_concurrent_dispatch() {
        let registry = registry("[tools.dns]\nbinary = \"echo\"\n");
        let hosts = ["a.example", "b.example", "c.example", "d.example"];
        let responses = futures::future::join_all(
            hosts
                .iter()
                .map(|h| registry.dispatch("dns", args(json!({ "host": h })))),
        )
        .await;
        for (host, response) in hosts.iter().zip(responses) {
            let response = response.unwrap();
            assert_eq!(response.return_code, 0);
            assert_eq!(response.target, *host);
            assert!(response.raw_output.contains(host));
        }
    }

    #[cfg(feature = "integration-tests")]
    mod integration {
        use super::*;

        #[tokio::test]
        async fn test_real_ping_loopback() {
            let registry = registry("");
            let response = registry
                .dispatch("ping", args(json!({ "host": "127.0.0.1", "count": 2, "interval": 0.2 })))
                .await
                .unwrap();
            assert_eq!(response.return_code, 0, "{}", response.raw_error);
            let stats = &response.structured_output["statistics"];
            assert_eq!(stats["packets_transmitted"], 2);
            assert_eq!(stats["packets_received"], 2);
        }
    }
}
