//! Port and service scanning via `nmap`.
//!
//! Each `scan_type` preset is split into the port selection it implies and
//! the remaining flags, so an explicit `ports` argument can replace the
//! former without disturbing the latter.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Service, ServiceProfile};
use crate::cli::command::CommandLine;
use crate::cli::params::{Delimiter, PORTS_RE, ParamDefault, ParamSpec, lowercase};

pub const SCAN_TYPES: &[&str] = &["fast", "service", "stealth", "rdp", "aggressive", "vuln", "udp"];

/// Host, address, CIDR block or range. Never starts with `-`.
pub static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9\[][A-Za-z0-9.\-:_/\[\]%,*]*$").expect("valid regex")
});

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.*][A-Za-z0-9_.*\-]*$").expect("valid regex"));

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::list("target", Delimiter::Whitespace, "Hosts, addresses or networks to scan")
        .required()
        .pattern(&TARGET_RE),
    ParamSpec::string("scan_type", "Scan preset")
        .one_of(SCAN_TYPES)
        .normalize(lowercase)
        .default(ParamDefault::Str("fast")),
    ParamSpec::string("ports", "Ports to scan, e.g. 22,80,443 or 1-1024 (replaces the preset's port selection)")
        .pattern(&PORTS_RE),
    ParamSpec::list("scripts", Delimiter::Comma, "Additional NSE scripts").pattern(&SCRIPT_RE),
    ParamSpec::integer("timeout", "Deadline in seconds")
        .range(30, 1800)
        .default(ParamDefault::Int(240)),
];

/// Flags implied by a `scan_type`.
struct Preset {
    ports: &'static [&'static str],
    flags: &'static [&'static str],
    scripts: &'static [&'static str],
}

fn preset(scan_type: &str) -> Preset {
    let (ports, flags, scripts): (&[&str], &[&str], &[&str]) = match scan_type {
        "service" => (&["--top-ports", "20"], &["-sV"], &[]),
        "stealth" => (&[], &["-sS", "-Pn"], &[]),
        "rdp" => (&["-p", "3389"], &[], &["rdp-*"]),
        "aggressive" => (&[], &["-A", "-T4"], &[]),
        "vuln" => (&[], &["-Pn"], &["vuln"]),
        "udp" => (&[], &["-sU"], &[]),
        _ => (&["-F"], &["-Pn"], &[]),
    };
    Preset {
        ports,
        flags,
        scripts,
    }
}

static REPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Nmap scan report for (.+)$").expect("valid regex"));

static LATENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([0-9.]+)s latency\)").expect("valid regex"));

static PORT_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)/([a-z]+)\s+(\S+)\s+(\S+)(?:\s+(.*))?$").expect("valid regex")
});

static NOT_SHOWN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Not shown:\s+(\d+)").expect("valid regex"));

static DONE_HOSTS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) IP address(?:es)? \((\d+) hosts? up\)").expect("valid regex")
});

static DONE_TIME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"scanned in ([0-9.]+) seconds").expect("valid regex"));

static CVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bCVE-\d{4}-\d{4,}\b").expect("valid regex"));

#[derive(Debug, Clone, Deserialize)]
pub struct NmapArgs {
    pub target: Vec<String>,
    pub scan_type: String,
    pub ports: Option<String>,
    #[serde(default)]
    pub scripts: Vec<String>,
    pub timeout: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct NmapReport {
    pub target: String,
    pub scan_type: String,
    pub scan_stats: ScanStats,
    pub hosts: Vec<NmapHost>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ScanStats {
    pub hosts_up: u32,
    pub hosts_down: u32,
    pub hosts_total: u32,
    pub ports_scanned: u32,
    pub open_ports: u32,
    pub scan_time_secs: Option<f64>,
}

#[derive(Debug, Default, Serialize)]
pub struct NmapHost {
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub status: String,
    pub latency_secs: Option<f64>,
    pub ports: Vec<PortEntry>,
    pub os_info: OsInfo,
    pub scripts: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PortEntry {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    pub service: String,
    pub version: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct OsInfo {
    pub details: Option<String>,
    pub running: Option<String>,
    pub cpe: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Vulnerability {
    pub host: Option<String>,
    pub description: String,
    pub cves: Vec<String>,
}

pub struct NmapProfile;

impl ServiceProfile for NmapProfile {
    type Args = NmapArgs;
    type Report = NmapReport;

    const SERVICE: Service = Service::Nmap;

    fn target(args: &NmapArgs) -> String {
        args.target.join(" ")
    }

    fn command(args: &NmapArgs, _env: &HashMap<String, String>) -> CommandLine {
        let preset = preset(&args.scan_type);
        let mut cmd = CommandLine::new(Service::Nmap.binary()).args(preset.flags.iter().copied());
        cmd = match &args.ports {
            Some(ports) => cmd.opt("-p", ports),
            None => cmd.args(preset.ports.iter().copied()),
        };
        let scripts: Vec<&str> = preset
            .scripts
            .iter()
            .copied()
            .chain(args.scripts.iter().map(String::as_str))
            .collect();
        if !scripts.is_empty() {
            cmd = cmd.opt("--script", scripts.join(","));
        }
        cmd.args(&args.target)
    }

    fn deadline(args: &NmapArgs) -> Duration {
        Duration::from_secs(args.timeout)
    }

    fn parse(stdout: &str, _stderr: &str, args: &NmapArgs) -> NmapReport {
        let mut report = NmapReport {
            target: Self::target(args),
            scan_type: args.scan_type.clone(),
            ..Default::default()
        };
        if stdout.trim().is_empty() {
            report.errors.push("Empty nmap output".to_string());
            return report;
        }

        let mut not_shown = 0u32;
        let mut in_port_section = false;

        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(caps) = REPORT_RE.captures(line) {
                report.hosts.push(host_from_report(&caps[1]));
                report.scan_stats.hosts_total += 1;
                in_port_section = false;
                continue;
            }

            if line.starts_with("Host is") {
                if let Some(host) = report.hosts.last_mut() {
                    if line.contains("up") {
                        host.status = "up".to_string();
                        host.latency_secs = LATENCY_RE
                            .captures(line)
                            .and_then(|c| c[1].parse().ok());
                        report.scan_stats.hosts_up += 1;
                    } else if line.contains("down") {
                        host.status = "down".to_string();
                        report.scan_stats.hosts_down += 1;
                    }
                }
            } else if line.contains("PORT") && line.contains("STATE") && line.contains("SERVICE") {
                in_port_section = true;
            } else if let Some(caps) = NOT_SHOWN_RE.captures(line) {
                not_shown += caps[1].parse::<u32>().unwrap_or_default();
            } else if in_port_section && PORT_LINE_RE.is_match(line) {
                let (Some(host), Some(caps)) = (report.hosts.last_mut(), PORT_LINE_RE.captures(line))
                else {
                    continue;
                };
                let Ok(port) = caps[1].parse::<u16>() else {
                    continue;
                };
                host.ports.push(PortEntry {
                    port,
                    protocol: caps[2].to_string(),
                    state: caps[3].to_string(),
                    service: caps[4].to_string(),
                    version: caps
                        .get(5)
                        .map(|m| m.as_str().trim().to_string())
                        .filter(|v| !v.is_empty()),
                });
            } else if let Some(value) = line.strip_prefix("OS details:") {
                if let Some(host) = report.hosts.last_mut() {
                    host.os_info.details = Some(value.trim().to_string());
                }
            } else if let Some(value) = line.strip_prefix("Running:") {
                if let Some(host) = report.hosts.last_mut() {
                    host.os_info.running = Some(value.trim().to_string());
                }
            } else if let Some(value) = line.strip_prefix("OS CPE:") {
                if let Some(host) = report.hosts.last_mut() {
                    host.os_info.cpe = Some(value.trim().to_string());
                }
            } else if line.starts_with('|') && !report.hosts.is_empty() {
                let script_line = line.trim_start_matches(['|', '_', ' ']).trim();
                if script_line.is_empty() {
                    continue;
                }
                let lower = script_line.to_ascii_lowercase();
                if ["cve-", "vulnerability", "vulnerable", "exploit"]
                    .iter()
                    .any(|k| lower.contains(k))
                {
                    let host = report.hosts.last().and_then(|h| h.ip.clone().or(h.hostname.clone()));
                    report.vulnerabilities.push(Vulnerability {
                        host,
                        description: script_line.to_string(),
                        cves: CVE_RE
                            .find_iter(script_line)
                            .map(|m| m.as_str().to_ascii_uppercase())
                            .collect(),
                    });
                }
                if let Some(host) = report.hosts.last_mut() {
                    host.scripts.push(script_line.to_string());
                }
            } else if line.contains("Nmap done:") {
                if let Some(caps) = DONE_TIME_RE.captures(line) {
                    report.scan_stats.scan_time_secs = caps[1].parse().ok();
                }
                if let Some(caps) = DONE_HOSTS_RE.captures(line) {
                    let total: u32 = caps[1].parse().unwrap_or_default();
                    let up: u32 = caps[2].parse().unwrap_or_default();
                    report.scan_stats.hosts_total = total;
                    report.scan_stats.hosts_up = up;
                    report.scan_stats.hosts_down = total.saturating_sub(up);
                }
            } else {
                let lower = line.to_ascii_lowercase();
                if ["error", "failed", "warning", "cannot", "unable"]
                    .iter()
                    .any(|k| lower.contains(k))
                {
                    report.errors.push(line.to_string());
                }
            }
        }

        let listed: u32 = report.hosts.iter().map(|h| h.ports.len() as u32).sum();
        report.scan_stats.ports_scanned = listed + not_shown;
        report.scan_stats.open_ports = report
            .hosts
            .iter()
            .flat_map(|h| &h.ports)
            .filter(|p| p.state == "open")
            .count() as u32;
        report
    }
}

/// Split `hostname (ip)` or a bare address/hostname.
fn host_from_report(info: &str) -> NmapHost {
    let (hostname, ip) = match info.split_once('(') {
        Some((name, rest)) if rest.ends_with(')') => (
            Some(name.trim().to_string()),
            Some(rest.trim_end_matches(')').trim().to_string()),
        ),
        _ if info.parse::<IpAddr>().is_ok() => (None, Some(info.to_string())),
        _ => (Some(info.to_string()), None),
    };
    NmapHost {
        ip,
        hostname,
        status: "unknown".to_string(),
        ..Default::default()
    }
}
