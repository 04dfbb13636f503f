//! HTTP probing via ProjectDiscovery's `httpx`.
//!
//! Output is one JSON object per probed URL (`-j`). Plain
//! `url [code] [length] [title]` lines from older builds are accepted too.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Service, ServiceProfile};
use crate::cli::command::CommandLine;
use crate::cli::params::{Delimiter, PORTS_RE, ParamDefault, ParamSpec, TOKEN_RE, lowercase, uppercase};

pub const OPTIONS: &[&str] = &["basic", "detailed", "headers", "hashes", "comprehensive"];

pub const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

const DEADLINE: Duration = Duration::from_secs(300);

static PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^/\S*$").expect("valid regex"));

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::list("targets", Delimiter::Comma, "Hosts or URLs to probe")
        .required()
        .pattern(&TOKEN_RE),
    ParamSpec::string("options", "Probe preset")
        .one_of(OPTIONS)
        .normalize(lowercase)
        .default(ParamDefault::Str("basic")),
    ParamSpec::string("ports", "Ports to probe")
        .pattern(&PORTS_RE)
        .default(ParamDefault::Str("80,443,8080,8443")),
    ParamSpec::list("paths", Delimiter::Comma, "Paths to request, e.g. /admin").pattern(&PATH_RE),
    ParamSpec::string("method", "HTTP method")
        .one_of(METHODS)
        .normalize(uppercase)
        .default(ParamDefault::Str("GET")),
    ParamSpec::integer("timeout", "Per-request timeout in seconds")
        .range(5, 120)
        .default(ParamDefault::Int(10)),
    ParamSpec::integer("threads", "Concurrent probes")
        .range(1, 100)
        .default(ParamDefault::Int(50)),
    ParamSpec::integer("rate_limit", "Requests per second")
        .range(1, 1000)
        .default(ParamDefault::Int(150)),
    ParamSpec::integer("retries", "Retries per request")
        .range(0, 5)
        .default(ParamDefault::Int(2)),
];

const BASIC: &[&str] = &["-status-code", "-content-length", "-title"];
const DETAILED: &[&str] = &["-tech-detect", "-web-server", "-response-time"];
const HASHES: &[&str] = &["-hash", "md5,sha256,simhash"];

fn preset(options: &str) -> Vec<&'static str> {
    let extra: &[&[&str]] = match options {
        "detailed" => &[DETAILED],
        "headers" => &[&["-include-response-header"]],
        "hashes" => &[HASHES],
        "comprehensive" => &[
            DETAILED,
            HASHES,
            &["-jarm", "-location", "-include-response-header"],
        ],
        _ => &[],
    };
    BASIC.iter().chain(extra.iter().flat_map(|e| e.iter())).copied().collect()
}

static PLAIN_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+\[(\d{3})\](?:\s+\[(\d+)\])?(?:\s+\[([^\]]*)\])?").expect("valid regex")
});

#[derive(Debug, Clone, Deserialize)]
pub struct HttpxArgs {
    pub targets: Vec<String>,
    pub options: String,
    pub ports: String,
    #[serde(default)]
    pub paths: Vec<String>,
    pub method: String,
    pub timeout: u64,
    pub threads: u32,
    pub rate_limit: u32,
    pub retries: u32,
}

#[derive(Debug, Default, Serialize)]
pub struct HttpxReport {
    pub discovered_hosts: Vec<ProbeResult>,
    pub statistics: HttpxStatistics,
    pub hosts_by_status: BTreeMap<String, Vec<String>>,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub host: Option<String>,
    pub port: Option<String>,
    pub scheme: Option<String>,
    pub path: Option<String>,
    pub status_code: Option<u16>,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub web_server: Option<String>,
    pub technologies: Vec<String>,
    pub response_time: Option<String>,
    pub method: Option<String>,
    pub location: Option<String>,
    pub hash: Option<Hashes>,
    pub headers: Map<String, Value>,
    pub jarm: Option<String>,
    pub a_records: Vec<String>,
    pub cnames: Vec<String>,
    pub cdn: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct Hashes {
    pub body_md5: Option<String>,
    pub body_sha256: Option<String>,
    pub body_simhash: Option<String>,
    pub header_md5: Option<String>,
    pub header_sha256: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct HttpxStatistics {
    pub total_hosts: usize,
    pub responsive_hosts: usize,
    pub unique_status_codes: Vec<u16>,
    pub technologies_found: Vec<String>,
    pub web_servers_found: Vec<String>,
}

pub struct HttpxProfile;

impl ServiceProfile for HttpxProfile {
    type Args = HttpxArgs;
    type Report = HttpxReport;

    const SERVICE: Service = Service::Httpx;

    fn target(args: &HttpxArgs) -> String {
        args.targets.join(",")
    }

    fn command(args: &HttpxArgs, _env: &HashMap<String, String>) -> CommandLine {
        let paths = (!args.paths.is_empty()).then(|| args.paths.join(","));
        CommandLine::new(Service::Httpx.binary())
            .opt("-u", args.targets.join(","))
            .args(preset(&args.options))
            .opt("-ports", &args.ports)
            .opt_if("-path", paths)
            .opt("-method", &args.method)
            .opt("-timeout", args.timeout.to_string())
            .opt("-threads", args.threads.to_string())
            .opt("-rate-limit", args.rate_limit.to_string())
            .opt("-retries", args.retries.to_string())
            .args(["-j", "-silent", "-no-color"])
    }

    fn deadline(_args: &HttpxArgs) -> Duration {
        DEADLINE
    }

    fn parse(stdout: &str, _stderr: &str, _args: &HttpxArgs) -> HttpxReport {
        let mut report = HttpxReport::default();
        if stdout.trim().is_empty() {
            report.errors.push("Empty httpx output".to_string());
            return report;
        }

        for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match serde_json::from_str::<Value>(line) {
                Ok(data @ Value::Object(_)) => report.discovered_hosts.push(probe_from_json(&data)),
                _ => match PLAIN_LINE_RE.captures(line) {
                    Some(caps) => report.discovered_hosts.push(ProbeResult {
                        url: caps[1].to_string(),
                        status_code: caps[2].parse().ok(),
                        content_length: caps.get(3).and_then(|m| m.as_str().parse().ok()),
                        title: caps.get(4).map(|m| m.as_str().to_string()),
                        ..Default::default()
                    }),
                    None => {
                        let snippet: String = line.chars().take(100).collect();
                        report.errors.push(format!("Unparseable line: {}", snippet));
                    }
                },
            }
        }

        let mut codes = BTreeSet::new();
        let mut technologies = BTreeSet::new();
        let mut servers = BTreeSet::new();
        for host in &report.discovered_hosts {
            if let Some(code) = host.status_code {
                codes.insert(code);
                report
                    .hosts_by_status
                    .entry(code.to_string())
                    .or_default()
                    .push(host.url.clone());
            }
            technologies.extend(host.technologies.iter().cloned());
            servers.extend(host.web_server.iter().cloned());
        }

        report.statistics = HttpxStatistics {
            total_hosts: report.discovered_hosts.len(),
            responsive_hosts: report
                .discovered_hosts
                .iter()
                .filter(|h| h.status_code.is_some())
                .count(),
            unique_status_codes: codes.into_iter().collect(),
            technologies_found: technologies.into_iter().collect(),
            web_servers_found: servers.into_iter().collect(),
        };
        report
    }
}

/// String form of a scalar field; httpx emits ports as strings or numbers.
fn scalar(data: &Value, key: &str) -> Option<String> {
    match data.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn strings(data: &Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn probe_from_json(data: &Value) -> ProbeResult {
    let hash = data.get("hash").filter(|h| h.is_object()).map(|h| Hashes {
        body_md5: scalar(h, "body_md5"),
        body_sha256: scalar(h, "body_sha256"),
        body_simhash: scalar(h, "body_simhash"),
        header_md5: scalar(h, "header_md5"),
        header_sha256: scalar(h, "header_sha256"),
    });
    let headers = ["header", "headers"]
        .iter()
        .find_map(|k| data.get(*k).and_then(Value::as_object))
        .cloned()
        .unwrap_or_default();
    let cdn = scalar(data, "cdn_name").or_else(|| {
        data.get("cdn")
            .and_then(Value::as_bool)
            .filter(|b| *b)
            .map(|_| "unknown".to_string())
    });

    ProbeResult {
        url: scalar(data, "url").unwrap_or_default(),
        host: scalar(data, "host"),
        port: scalar(data, "port"),
        scheme: scalar(data, "scheme"),
        path: scalar(data, "path"),
        status_code: data
            .get("status_code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok()),
        content_length: data.get("content_length").and_then(Value::as_u64),
        content_type: scalar(data, "content_type"),
        title: scalar(data, "title"),
        web_server: scalar(data, "webserver"),
        technologies: strings(data, "tech"),
        response_time: scalar(data, "response_time").or_else(|| scalar(data, "time")),
        method: scalar(data, "method"),
        location: scalar(data, "location"),
        hash,
        headers,
        jarm: scalar(data, "jarm"),
        a_records: strings(data, "a"),
        cnames: strings(data, "cname"),
        cdn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::params::validate;
    use serde_json::json;

    fn decode(value: Value) -> HttpxArgs {
        let raw: Map<String, Value> = value.as_object().cloned().unwrap();
        validate(PARAMS, &raw).unwrap().decode().unwrap()
    }

    #[test]
    fn test_basic_command() {
        let args = decode(json!({ "targets": "example.com, scanme.nmap.org" }));
        let cmd = HttpxProfile::command(&args, &HashMap::new());
        assert_eq!(
            cmd.display(),
            "httpx -u example.com,scanme.nmap.org -status-code -content-length -title \
             -ports 80,443,8080,8443 -method GET -timeout 10 -threads 50 -rate-limit 150 \
             -retries 2 -j -silent -no-color"
        );
        assert_eq!(HttpxProfile::target(&args), "example.com,scanme.nmap.org");
        assert_eq!(HttpxProfile::deadline(&args), Duration::from_secs(300));
    }

    #[test]
    fn test_comprehensive_preset() {
        let args = decode(json!({
            "targets": ["https://example.com"],
            "options": "comprehensive",
            "paths": "/admin,/login",
        }));
        let cmd = HttpxProfile::command(&args, &HashMap::new());
        let display = cmd.display();
        for flag in [
            "-tech-detect",
            "-web-server",
            "-response-time",
            "-hash md5,sha256,simhash",
            "-jarm",
            "-location",
            "-include-response-header",
            "-path /admin,/login",
        ] {
            assert!(display.contains(flag), "missing {} in {}", flag, display);
        }
    }

    #[test]
    fn test_parse_json_lines() {
        let stdout = [
            json!({
                "url": "https://example.com",
                "host": "93.184.216.34",
                "port": "443",
                "scheme": "https",
                "path": "/",
                "status_code": 200,
                "content_length": 1256,
                "content_type": "text/html",
                "title": "Example Domain",
                "webserver": "ECAcc (nyd/D184)",
                "tech": ["Azure CDN"],
                "time": "120.5ms",
                "method": "GET",
                "hash": { "body_md5": "84238dfc8092e5d9c0dac8ef93371a07" },
                "a": ["93.184.216.34"],
                "cdn": false
            })
            .to_string(),
            json!({
                "url": "http://scanme.nmap.org",
                "port": 80,
                "status_code": 200,
                "webserver": "Apache/2.4.7 (Ubuntu)",
                "tech": ["Apache HTTP Server:2.4.7", "Ubuntu"]
            })
            .to_string(),
            json!({ "url": "http://example.com:8080", "status_code": 301, "location": "https://example.com/" })
                .to_string(),
        ]
        .join("\n");

        let report = HttpxProfile::parse(&stdout, "", &decode(json!({ "targets": "x" })));
        assert_eq!(report.discovered_hosts.len(), 3);
        let first = &report.discovered_hosts[0];
        assert_eq!(first.port.as_deref(), Some("443"));
        assert_eq!(first.response_time.as_deref(), Some("120.5ms"));
        assert_eq!(
            first.hash.as_ref().and_then(|h| h.body_md5.as_deref()),
            Some("84238dfc8092e5d9c0dac8ef93371a07")
        );
        assert_eq!(first.cdn, None);
        assert_eq!(report.discovered_hosts[1].port.as_deref(), Some("80"));

        let stats = &report.statistics;
        assert_eq!(stats.total_hosts, 3);
        assert_eq!(stats.responsive_hosts, 3);
        assert_eq!(stats.unique_status_codes, vec![200, 301]);
        assert_eq!(
            stats.technologies_found,
            vec!["Apache HTTP Server:2.4.7", "Azure CDN", "Ubuntu"]
        );
        assert_eq!(stats.web_servers_found.len(), 2);
        assert_eq!(
            report.hosts_by_status["200"],
            vec!["https://example.com", "http://scanme.nmap.org"]
        );
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_parse_plain_lines_and_garbage() {
        let stdout = "https://example.com [200] [1256] [Example Domain]\nhttp://example.org [404]\nnot a result\n";
        let report = HttpxProfile::parse(stdout, "", &decode(json!({ "targets": "x" })));
        assert_eq!(report.discovered_hosts.len(), 2);
        assert_eq!(report.discovered_hosts[0].title.as_deref(), Some("Example Domain"));
        assert_eq!(report.discovered_hosts[0].content_length, Some(1256));
        assert_eq!(report.discovered_hosts[1].status_code, Some(404));
        assert_eq!(report.errors.len(), 1);

        let report = HttpxProfile::parse("", "", &decode(json!({ "targets": "x" })));
        assert_eq!(report.errors, vec!["Empty httpx output"]);
    }

    #[test]
    fn test_bounds() {
        let raw = json!({ "targets": "x", "threads": 0 }).as_object().cloned().unwrap();
        assert_eq!(validate(PARAMS, &raw).unwrap_err().to_string(), "threads must be between 1 and 100");
        let raw = json!({ "targets": "x", "retries": 6 }).as_object().cloned().unwrap();
        assert_eq!(validate(PARAMS, &raw).unwrap_err().param(), "retries");
        let raw = json!({ "targets": "x", "paths": "admin" }).as_object().cloned().unwrap();
        assert_eq!(validate(PARAMS, &raw).unwrap_err().param(), "paths");
    }
}
