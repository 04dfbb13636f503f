//! WordPress scanning via `wpscan`.
//!
//! wpscan emits a single JSON document on stdout (`--format json`); the
//! parser walks it as an untyped value so missing or renamed keys degrade to
//! absent fields instead of a decode failure.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Service, ServiceProfile};
use crate::cli::command::CommandLine;
use crate::cli::params::{ParamDefault, ParamSpec, TOKEN_RE, lowercase};

pub const OPTIONS: &[&str] = &["basic", "plugins", "themes", "users", "vulns", "full", "passive"];

/// Configured environment variable used when no `api_token` is given.
pub const API_TOKEN_ENV: &str = "WPSCAN_API_TOKEN";

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::string("url", "WordPress site URL (http:// is assumed without a scheme)")
        .required()
        .normalize(with_scheme)
        .pattern(&TOKEN_RE),
    ParamSpec::string("options", "Scan preset")
        .one_of(OPTIONS)
        .normalize(lowercase)
        .default(ParamDefault::Str("basic")),
    ParamSpec::string("api_token", "WPScan vulnerability database API token").pattern(&TOKEN_RE),
    ParamSpec::boolean("force", "Do not check whether the target runs WordPress"),
    ParamSpec::boolean("random_user_agent", "Use a random User-Agent"),
    ParamSpec::integer("timeout", "Deadline in seconds")
        .range(60, 1800)
        .default(ParamDefault::Int(300)),
];

fn with_scheme(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    }
}

fn preset(options: &str) -> &'static [&'static str] {
    match options {
        "plugins" => &["--enumerate", "p", "--plugins-detection", "aggressive"],
        "themes" => &["--enumerate", "t", "--themes-detection", "aggressive"],
        "users" => &["--enumerate", "u"],
        "vulns" => &["--enumerate", "vp,vt", "--plugins-detection", "aggressive"],
        "full" => &[
            "--enumerate",
            "ap,at,tt,cb,dbe,u,m",
            "--plugins-detection",
            "aggressive",
        ],
        "passive" => &["--enumerate", "p,t,u", "--plugins-detection", "passive"],
        _ => &["--enumerate", "p,t,u", "--plugins-detection", "mixed"],
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WpscanArgs {
    pub url: String,
    pub options: String,
    pub api_token: Option<String>,
    pub force: bool,
    pub random_user_agent: bool,
    pub timeout: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct WpscanReport {
    pub target_info: TargetInfo,
    pub interesting_findings: Vec<InterestingFinding>,
    pub plugins: BTreeMap<String, Component>,
    pub themes: BTreeMap<String, Component>,
    pub main_theme: Option<Component>,
    pub users: BTreeMap<String, WpUser>,
    pub vulnerabilities: VulnerabilityCounts,
    pub core_vulnerabilities: Vec<WpVulnerability>,
    pub config_backups: Vec<Exposure>,
    pub db_exports: Vec<Exposure>,
    pub scan_stats: ScanStats,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct TargetInfo {
    pub target_url: String,
    pub effective_url: Option<String>,
    pub cms_detected: bool,
    pub cms_version: Option<String>,
    pub cms_version_status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InterestingFinding {
    pub title: String,
    pub url: Option<String>,
    pub found_by: Option<String>,
    pub confidence: i64,
    pub interesting_entries: Vec<String>,
}

/// A plugin or theme.
#[derive(Debug, Serialize)]
pub struct Component {
    pub name: String,
    pub version: Option<String>,
    pub version_confidence: i64,
    pub location: Option<String>,
    pub last_updated: Option<String>,
    pub outdated: bool,
    pub found_by: Option<String>,
    pub vulnerabilities: Vec<WpVulnerability>,
}

#[derive(Debug, Serialize)]
pub struct WpVulnerability {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub fixed_in: Option<String>,
    pub references: Value,
}

#[derive(Debug, Serialize)]
pub struct WpUser {
    pub username: String,
    pub id: Option<i64>,
    pub found_by: Option<String>,
    pub confidence: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct VulnerabilityCounts {
    pub total_count: usize,
    pub plugin_vulnerabilities: usize,
    pub theme_vulnerabilities: usize,
    pub core_vulnerabilities: usize,
}

#[derive(Debug, Serialize)]
pub struct Exposure {
    pub url: Option<String>,
    pub found_by: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanStats {
    pub requests_done: u64,
    pub elapsed_seconds: f64,
    /// wpscan's abort message, present only when the scan was aborted.
    pub scan_aborted: Option<String>,
}

pub struct WpscanProfile;

impl ServiceProfile for WpscanProfile {
    type Args = WpscanArgs;
    type Report = WpscanReport;

    const SERVICE: Service = Service::Wpscan;

    fn target(args: &WpscanArgs) -> String {
        args.url.clone()
    }

    fn command(args: &WpscanArgs, env: &HashMap<String, String>) -> CommandLine {
        let mut cmd = CommandLine::new(Service::Wpscan.binary())
            .opt("--url", &args.url)
            .args(preset(&args.options).iter().copied());
        let token = args
            .api_token
            .as_deref()
            .or_else(|| env.get(API_TOKEN_ENV).map(String::as_str))
            .filter(|t| !t.is_empty());
        if let Some(token) = token {
            cmd = cmd.secret_opt("--api-token", token);
        }
        cmd.flag_if("--force", args.force)
            .flag_if("--random-user-agent", args.random_user_agent)
            .opt("--format", "json")
            .arg("--no-banner")
    }

    fn deadline(args: &WpscanArgs) -> Duration {
        Duration::from_secs(args.timeout)
    }

    fn parse(stdout: &str, _stderr: &str, args: &WpscanArgs) -> WpscanReport {
        let mut report = WpscanReport {
            target_info: TargetInfo {
                target_url: args.url.clone(),
                ..Default::default()
            },
            ..Default::default()
        };
        if stdout.trim().is_empty() {
            report.errors.push("Empty WPScan output".to_string());
            return report;
        }
        let data = match parse_document(stdout) {
            Ok(data) => data,
            Err(e) => {
                report.errors.push(format!("JSON parsing error: {}", e));
                return report;
            }
        };

        if let Some(url) = text(&data, "target_url") {
            report.target_info.target_url = url;
        }
        report.target_info.effective_url = text(&data, "effective_url");
        if let Some(version) = data.get("version").filter(|v| v.is_object()) {
            report.target_info.cms_detected = true;
            report.target_info.cms_version = text(version, "number");
            report.target_info.cms_version_status = text(version, "status");
            report.core_vulnerabilities = vulnerabilities(version);
        }

        report.interesting_findings = array(&data, "interesting_findings")
            .map(|f| InterestingFinding {
                title: text(f, "to_s").unwrap_or_default(),
                url: text(f, "url"),
                found_by: text(f, "found_by"),
                confidence: f.get("confidence").and_then(Value::as_i64).unwrap_or_default(),
                interesting_entries: array(f, "interesting_entries")
                    .filter_map(|e| e.as_str().map(str::to_string))
                    .collect(),
            })
            .collect();

        report.plugins = components(&data, "plugins");
        report.themes = components(&data, "themes");
        report.main_theme = data
            .get("main_theme")
            .filter(|t| t.is_object())
            .map(|t| component(&text(t, "slug").unwrap_or_default(), t));

        if let Some(users) = data.get("users").and_then(Value::as_object) {
            report.users = users
                .iter()
                .map(|(name, info)| {
                    let user = WpUser {
                        username: text(info, "username").unwrap_or_else(|| name.clone()),
                        id: info.get("id").and_then(Value::as_i64),
                        found_by: text(info, "found_by"),
                        confidence: info.get("confidence").and_then(Value::as_i64).unwrap_or_default(),
                    };
                    (name.clone(), user)
                })
                .collect();
        }

        report.config_backups = exposures(&data, "config_backups");
        report.db_exports = exposures(&data, "db_exports");

        report.scan_stats.requests_done = data
            .get("requests_done")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        report.scan_stats.elapsed_seconds = data
            .get("elapsed")
            .and_then(Value::as_f64)
            .unwrap_or_default();
        report.scan_stats.scan_aborted = text(&data, "scan_aborted");
        if let Some(reason) = &report.scan_stats.scan_aborted {
            report.errors.push(reason.clone());
        }

        let counts = &mut report.vulnerabilities;
        counts.plugin_vulnerabilities = report.plugins.values().map(|p| p.vulnerabilities.len()).sum();
        counts.theme_vulnerabilities = report
            .themes
            .values()
            .chain(report.main_theme.as_ref())
            .map(|t| t.vulnerabilities.len())
            .sum();
        counts.core_vulnerabilities = report.core_vulnerabilities.len();
        counts.total_count =
            counts.plugin_vulnerabilities + counts.theme_vulnerabilities + counts.core_vulnerabilities;
        report
    }

    fn redacted_arguments() -> &'static [&'static str] {
        &["api_token"]
    }
}

/// Parse the JSON document, skipping any text printed around it.
fn parse_document(stdout: &str) -> Result<Value, serde_json::Error> {
    let trimmed = stdout.trim();
    match serde_json::from_str(trimmed) {
        Ok(value) => Ok(value),
        Err(e) => match (trimmed.find('{'), trimmed.rfind('}')) {
            (Some(start), Some(end)) if start < end => serde_json::from_str(&trimmed[start..=end]),
            _ => Err(e),
        },
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn array<'a>(value: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn vulnerabilities(value: &Value) -> Vec<WpVulnerability> {
    array(value, "vulnerabilities")
        .map(|v| WpVulnerability {
            title: text(v, "title").unwrap_or_default(),
            kind: text(v, "type"),
            fixed_in: text(v, "fixed_in"),
            references: v.get("references").cloned().unwrap_or(Value::Null),
        })
        .collect()
}

fn component(name: &str, info: &Value) -> Component {
    let version = info.get("version").filter(|v| v.is_object());
    Component {
        name: name.to_string(),
        version: version.and_then(|v| text(v, "number")),
        version_confidence: version
            .and_then(|v| v.get("confidence"))
            .and_then(Value::as_i64)
            .unwrap_or_default(),
        location: text(info, "location"),
        last_updated: text(info, "last_updated"),
        outdated: info.get("outdated").and_then(Value::as_bool).unwrap_or_default(),
        found_by: text(info, "found_by"),
        vulnerabilities: vulnerabilities(info),
    }
}

fn components(data: &Value, key: &str) -> BTreeMap<String, Component> {
    data.get(key)
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(name, info)| (name.clone(), component(name, info)))
                .collect()
        })
        .unwrap_or_default()
}

fn exposures(data: &Value, key: &str) -> Vec<Exposure> {
    match data.get(key) {
        // wpscan keys these by URL
        Some(Value::Object(map)) => map
            .iter()
            .map(|(url, info)| Exposure {
                url: Some(url.clone()),
                found_by: text(info, "found_by"),
            })
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| Exposure {
                url: text(item, "url"),
                found_by: text(item, "found_by"),
            })
            .collect(),
        _ => Vec::new(),
    }
}
