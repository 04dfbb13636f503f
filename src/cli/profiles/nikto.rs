//! Web server scanning via `nikto`.
//!
//! Nikto writes findings to both streams, so the parser reads stdout and
//! stderr together. Findings are `+ ...` lines classified by keyword; OSVDB
//! entries additionally get a keyword-derived severity.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Service, ServiceProfile};
use crate::cli::command::CommandLine;
use crate::cli::params::{Delimiter, HOST_RE, ParamDefault, ParamSpec, TOKEN_RE, lowercase};

pub const SCAN_TYPES: &[&str] = &[
    "basic",
    "ssl",
    "cgi",
    "files",
    "misconfig",
    "disclosure",
    "comprehensive",
    "fast",
];

const DEFAULT_REQUEST_TIMEOUT: u64 = 10;

static TUNING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9abcx]$").expect("valid regex"));

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::string("target", "Target URL or hostname").required().pattern(&TOKEN_RE),
    ParamSpec::string("scan_type", "Scan preset")
        .one_of(SCAN_TYPES)
        .normalize(lowercase)
        .default(ParamDefault::Str("basic")),
    ParamSpec::integer("port", "Port to scan").range(1, 65535),
    ParamSpec::boolean("ssl", "Force SSL (automatic for https:// targets and port 443)"),
    ParamSpec::integer("timeout", "Per-request timeout in seconds (default 10, 5 for the fast preset)")
        .range(5, 300),
    ParamSpec::list("tuning", Delimiter::Comma, "Tuning codes, e.g. 1,2,3").pattern(&TUNING_RE),
    ParamSpec::string("plugins", "Plugins to run").pattern(&TOKEN_RE),
    ParamSpec::string("vhost", "Virtual host for the Host header").pattern(&HOST_RE),
];

/// Preset flags plus the tuning and request timeout a preset implies.
struct Preset {
    flags: &'static [&'static str],
    tuning: Option<&'static str>,
    timeout: Option<u64>,
}

fn preset(scan_type: &str) -> Preset {
    let (flags, tuning, timeout): (&[&str], _, _) = match scan_type {
        "ssl" => (&["-ssl"], None, None),
        "cgi" => (&["-C", "all"], None, None),
        "files" => (&[], Some("1"), None),
        "misconfig" => (&[], Some("2"), None),
        "disclosure" => (&[], Some("3"), None),
        "comprehensive" => (&[], Some("123456789"), None),
        "fast" => (&[], None, Some(5)),
        _ => (&[], None, None),
    };
    Preset {
        flags,
        tuning,
        timeout,
    }
}

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Nikto v([\d.]+)").expect("valid regex"));

static TARGET_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+ Target (IP|Hostname|Port):\s+(\S+)").expect("valid regex")
});

static SERVER_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\S+)/([0-9.]+)").expect("valid regex"));

static POWERED_BY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)x-powered-by(?: header)?:\s*([^,]+?)\.?$").expect("valid regex")
});

static METHODS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Allowed HTTP Methods:\s*([A-Z, ]+)").expect("valid regex"));

static OSVDB_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"OSVDB-(\d+)").expect("valid regex"));

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(/[^:]*)").expect("valid regex"));

static TOTALS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+(?:requests|items checked):\s+(\d+)\s+error\(s\)\s+and\s+(\d+)\s+item\(s\)")
        .expect("valid regex")
});

#[derive(Debug, Clone, Deserialize)]
pub struct NiktoArgs {
    pub target: String,
    pub scan_type: String,
    pub port: Option<u16>,
    pub ssl: bool,
    pub timeout: Option<u64>,
    #[serde(default)]
    pub tuning: Vec<String>,
    pub plugins: Option<String>,
    pub vhost: Option<String>,
}

impl NiktoArgs {
    /// Request timeout passed to nikto: explicit, then preset, then default.
    pub fn request_timeout(&self) -> u64 {
        self.timeout
            .or(preset(&self.scan_type).timeout)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }

    fn use_ssl(&self) -> bool {
        self.ssl
            || self.scan_type == "ssl"
            || self.target.starts_with("https://")
            || self.port == Some(443)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct NiktoReport {
    pub target: String,
    pub scan_type: String,
    pub scan_info: ScanInfo,
    pub server_info: ServerInfo,
    pub findings: Findings,
    pub statistics: Statistics,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanInfo {
    pub nikto_version: Option<String>,
    pub target_ip: Option<String>,
    pub target_hostname: Option<String>,
    pub target_port: Option<u16>,
    pub ssl_enabled: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ServerInfo {
    pub server_banner: Option<String>,
    pub server_version: Option<String>,
    pub powered_by: Option<String>,
    pub allowed_methods: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct Findings {
    pub total_items_checked: u64,
    pub vulnerabilities: Vec<NiktoFinding>,
    pub information_disclosures: Vec<String>,
    pub misconfigurations: Vec<String>,
    pub interesting_files: Vec<String>,
    pub cookies: Vec<String>,
    pub headers: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct NiktoFinding {
    pub severity: Severity,
    pub osvdb_id: Option<String>,
    pub path: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    fn classify(lower: &str) -> Self {
        let any = |words: &[&str]| words.iter().any(|w| lower.contains(w));
        if any(&["critical", "exploit", "remote code", "sql injection"]) {
            Severity::Critical
        } else if any(&["high", "dangerous", "privilege"]) {
            Severity::High
        } else if any(&["authentication", "bypass", "disclosure"]) {
            Severity::Medium
        } else if any(&["information", "banner", "version"]) {
            Severity::Low
        } else {
            Severity::Info
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Statistics {
    pub total_requests: u64,
    pub items_found: usize,
    pub reported_errors: u64,
    pub severity_breakdown: SeverityBreakdown,
}

#[derive(Debug, Default, Serialize)]
pub struct SeverityBreakdown {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
}

impl SeverityBreakdown {
    fn count(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
            Severity::Info => self.info += 1,
        }
    }
}

pub struct NiktoProfile;

impl ServiceProfile for NiktoProfile {
    type Args = NiktoArgs;
    type Report = NiktoReport;

    const SERVICE: Service = Service::Nikto;

    fn target(args: &NiktoArgs) -> String {
        args.target.clone()
    }

    fn command(args: &NiktoArgs, _env: &HashMap<String, String>) -> CommandLine {
        let preset = preset(&args.scan_type);
        let tuning = if args.tuning.is_empty() {
            preset.tuning.map(str::to_string)
        } else {
            Some(args.tuning.concat())
        };
        CommandLine::new(Service::Nikto.binary())
            .opt("-h", &args.target)
            .args(preset.flags.iter().copied().filter(|f| *f != "-ssl"))
            .flag_if("-ssl", args.use_ssl())
            .opt_if("-port", args.port.map(|p| p.to_string()))
            .opt("-timeout", args.request_timeout().to_string())
            .opt_if("-Tuning", tuning)
            .opt_if("-Plugins", args.plugins.as_deref())
            .opt_if("-vhost", args.vhost.as_deref())
            .opt("-Format", "txt")
    }

    fn deadline(args: &NiktoArgs) -> Duration {
        Duration::from_secs(args.request_timeout() + 60)
    }

    fn parse(stdout: &str, stderr: &str, args: &NiktoArgs) -> NiktoReport {
        let mut report = NiktoReport {
            target: args.target.clone(),
            scan_type: args.scan_type.clone(),
            ..Default::default()
        };
        report.scan_info.ssl_enabled = args.use_ssl();

        let combined = format!("{}\n{}", stdout, stderr);
        if combined.trim().is_empty() {
            report.errors.push("Empty nikto output".to_string());
            return report;
        }

        for line in combined.lines().map(str::trim).filter(|l| !l.is_empty()) {
            parse_scan_info(line, &mut report);
            if let Some(caps) = TOTALS_RE.captures(line) {
                report.statistics.total_requests = caps[1].parse().unwrap_or_default();
                report.findings.total_items_checked = report.statistics.total_requests;
                report.statistics.reported_errors = caps[2].parse().unwrap_or_default();
                continue;
            }
            if line.starts_with('+') {
                classify_finding(line, &mut report);
            }
            let lower = line.to_ascii_lowercase();
            if ["error", "failed", "timeout", "unable", "cannot"]
                .iter()
                .any(|k| lower.contains(k))
            {
                report.errors.push(line.to_string());
            }
        }

        let findings = &report.findings;
        report.statistics.items_found = findings.vulnerabilities.len()
            + findings.information_disclosures.len()
            + findings.misconfigurations.len()
            + findings.interesting_files.len();
        report
    }
}

fn parse_scan_info(line: &str, report: &mut NiktoReport) {
    let info = &mut report.scan_info;
    let server = &mut report.server_info;

    if let Some(caps) = VERSION_RE.captures(line) {
        info.nikto_version = Some(caps[1].to_string());
    }
    if let Some(caps) = TARGET_FIELD_RE.captures(line) {
        let value = caps[2].to_string();
        match &caps[1] {
            "IP" => info.target_ip = Some(value),
            "Hostname" => info.target_hostname = Some(value),
            _ => info.target_port = value.parse().ok(),
        }
    }
    if line.contains("SSL Info:") || line.contains("https://") {
        info.ssl_enabled = true;
    }
    if let Some(value) = line.strip_prefix("+ Start Time:") {
        info.start_time = Some(value.trim().to_string());
    }
    if let Some(value) = line.strip_prefix("+ End Time:") {
        info.end_time = Some(value.trim().to_string());
    }
    if let Some(banner) = line.strip_prefix("+ Server:") {
        let banner = banner.trim();
        server.server_banner = Some(banner.to_string());
        server.server_version = SERVER_VERSION_RE
            .captures(banner)
            .map(|c| format!("{} {}", &c[1], &c[2]));
    }
    if let Some(caps) = POWERED_BY_RE.captures(line) {
        server.powered_by = Some(caps[1].trim().to_string());
    }
    if let Some(caps) = METHODS_RE.captures(line) {
        server.allowed_methods = caps[1]
            .split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();
    }
}

/// Sort one `+ ...` line into the first matching finding bucket.
fn classify_finding(line: &str, report: &mut NiktoReport) {
    let lower = line.to_ascii_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    let findings = &mut report.findings;

    if let Some(caps) = OSVDB_RE.captures(line) {
        let severity = Severity::classify(&lower);
        report.statistics.severity_breakdown.count(severity);
        findings.vulnerabilities.push(NiktoFinding {
            severity,
            osvdb_id: Some(caps[1].to_string()),
            path: PATH_RE.captures(line).map(|c| c[1].trim().to_string()),
            description: line.to_string(),
        });
    } else if has(&["cookie"]) {
        findings.cookies.push(line.to_string());
    } else if has(&["header", "x-", "server:"]) {
        findings.headers.push(line.to_string());
    } else if has(&["file", "directory", "backup", "config"]) {
        findings.interesting_files.push(line.to_string());
    } else if has(&["misconfigur", "default"]) {
        findings.misconfigurations.push(line.to_string());
    } else if has(&["disclosure", "information", "reveals"]) {
        findings.information_disclosures.push(line.to_string());
    }
}
