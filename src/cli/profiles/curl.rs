//! HTTP requests via `curl`.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Service, ServiceProfile};
use crate::cli::command::CommandLine;
use crate::cli::params::{Delimiter, ParamDefault, ParamSpec, TOKEN_RE, uppercase};

pub const METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::string("url", "Target URL").required().pattern(&TOKEN_RE),
    ParamSpec::string("method", "HTTP method")
        .one_of(METHODS)
        .normalize(uppercase)
        .default(ParamDefault::Str("GET")),
    ParamSpec::list("headers", Delimiter::Semicolon, "Extra request headers, e.g. Accept: */*")
        .pattern(&HEADER_RE),
    ParamSpec::string("data", "Request body (sent for POST, PUT and PATCH only)"),
    ParamSpec::boolean("follow_redirects", "Follow redirects"),
    ParamSpec::boolean("verbose", "Verbose output (response headers on stderr)"),
    ParamSpec::boolean("insecure", "Skip TLS certificate verification"),
    ParamSpec::boolean("headers_only", "Fetch headers only (HEAD request)"),
    ParamSpec::string("user_agent", "Custom User-Agent header"),
    ParamSpec::integer("timeout", "Deadline in seconds")
        .range(1, 300)
        .default(ParamDefault::Int(30)),
];

/// `Name: value`. A leading `@` would make curl read headers from a local file.
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9!#$%&'*+.^_`|~\-]+:[^\r\n]*$").expect("valid regex")
});

static STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^HTTP/(\d(?:\.\d)?)\s+(\d{3})(?:\s+(.*))?$").expect("valid regex")
});

#[derive(Debug, Clone, Deserialize)]
pub struct CurlArgs {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Vec<String>,
    pub data: Option<String>,
    pub follow_redirects: bool,
    pub verbose: bool,
    pub insecure: bool,
    pub headers_only: bool,
    pub user_agent: Option<String>,
    pub timeout: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct CurlReport {
    pub url: String,
    pub http_version: Option<String>,
    pub status_code: Option<u16>,
    pub reason: Option<String>,
    /// Headers of the final response, names lowercased.
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub server: Option<String>,
    pub redirects: usize,
    pub body_bytes: usize,
    pub errors: Vec<String>,
}

pub struct CurlProfile;

impl ServiceProfile for CurlProfile {
    type Args = CurlArgs;
    type Report = CurlReport;

    const SERVICE: Service = Service::Curl;

    fn target(args: &CurlArgs) -> String {
        args.url.clone()
    }

    fn command(args: &CurlArgs, _env: &HashMap<String, String>) -> CommandLine {
        let mut cmd = CommandLine::new(Service::Curl.binary())
            .arg("-sS")
            .flag_if("-I", args.headers_only)
            .flag_if("-L", args.follow_redirects)
            .flag_if("-v", args.verbose)
            .flag_if("-k", args.insecure);
        if args.method != "GET" {
            cmd = cmd.opt("-X", &args.method);
        }
        for header in &args.headers {
            cmd = cmd.opt("-H", header);
        }
        if let Some(agent) = &args.user_agent {
            cmd = cmd.opt("-H", format!("User-Agent: {}", agent));
        }
        if matches!(args.method.as_str(), "POST" | "PUT" | "PATCH") {
            // `-d @file` uploads a local file; `--data-raw` sends the value as is.
            cmd = cmd.opt_if("--data-raw", args.data.as_deref());
        }
        cmd.opt("--max-time", args.timeout.to_string()).arg(&args.url)
    }

    fn deadline(args: &CurlArgs) -> Duration {
        Duration::from_secs(args.timeout)
    }

    fn parse(stdout: &str, stderr: &str, args: &CurlArgs) -> CurlReport {
        let mut report = CurlReport {
            url: args.url.clone(),
            ..Default::default()
        };

        // `-I` prints headers on stdout; `-v` echoes them on stderr prefixed with `< `.
        let header_lines: Vec<&str> = if args.headers_only {
            stdout.lines().collect()
        } else {
            stderr.lines().filter_map(|l| l.strip_prefix("< ")).collect()
        };

        let mut responses = 0usize;
        for line in header_lines {
            let line = line.trim_end_matches('\r');
            if let Some(caps) = STATUS_RE.captures(line) {
                responses += 1;
                report.headers.clear();
                report.http_version = Some(caps[1].to_string());
                report.status_code = caps[2].parse().ok();
                report.reason = caps
                    .get(3)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|r| !r.is_empty());
            } else if responses > 0 {
                if let Some((name, value)) = line.split_once(':') {
                    report
                        .headers
                        .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
                }
            }
        }

        report.redirects = responses.saturating_sub(1);
        report.content_type = report.headers.get("content-type").cloned();
        report.content_length = report
            .headers
            .get("content-length")
            .and_then(|v| v.parse().ok());
        report.server = report.headers.get("server").cloned();
        report.body_bytes = if args.headers_only { 0 } else { stdout.len() };
        report.errors = stderr
            .lines()
            .filter(|l| l.starts_with("curl: "))
            .map(|l| l.trim().to_string())
            .collect();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::params::validate;
    use crate::error::ValidationError;
    use serde_json::{Map, Value, json};

    fn decode(value: Value) -> CurlArgs {
        let raw: Map<String, Value> = value.as_object().cloned().unwrap();
        validate(PARAMS, &raw).unwrap().decode().unwrap()
    }

    #[test]
    fn test_default_command() {
        let args = decode(json!({ "url": "https://example.com" }));
        let cmd = CurlProfile::command(&args, &HashMap::new());
        assert_eq!(cmd.display(), "curl -sS --max-time 30 https://example.com");
    }

    #[test]
    fn test_full_command_order() {
        let args = decode(json!({
            "url": "https://example.com/api",
            "method": "post",
            "headers": "Accept: application/json; X-Trace: 1",
            "data": "{\"a\":1}",
            "follow_redirects": true,
            "insecure": "yes",
            "user_agent": "recon/1.0",
            "timeout": 10,
        }));
        let cmd = CurlProfile::command(&args, &HashMap::new());
        assert_eq!(
            cmd.arguments(),
            [
                "-sS",
                "-L",
                "-k",
                "-X",
                "POST",
                "-H",
                "Accept: application/json",
                "-H",
                "X-Trace: 1",
                "-H",
                "User-Agent: recon/1.0",
                "--data-raw",
                "{\"a\":1}",
                "--max-time",
                "10",
                "https://example.com/api",
            ]
        );
    }

    #[test]
    fn test_data_dropped_for_get() {
        let args = decode(json!({ "url": "https://example.com", "data": "x=1" }));
        let cmd = CurlProfile::command(&args, &HashMap::new());
        assert!(!cmd.arguments().iter().any(|a| a == "--data-raw"));
    }

    #[test]
    fn test_at_prefixed_body_is_sent_literally() {
        let args = decode(json!({
            "url": "https://example.com",
            "method": "POST",
            "data": "@/etc/passwd",
        }));
        let cmd = CurlProfile::command(&args, &HashMap::new());
        let argv = cmd.arguments();
        assert!(!argv.iter().any(|a| a == "-d"));
        let pos = argv.iter().position(|a| a == "--data-raw").unwrap();
        assert_eq!(argv[pos + 1], "@/etc/passwd");
    }

    #[test]
    fn test_header_file_reference_rejected() {
        let raw: Map<String, Value> = json!({
            "url": "https://example.com",
            "headers": "Accept: */*; @/etc/shadow",
        })
        .as_object()
        .cloned()
        .unwrap();
        let err = validate(PARAMS, &raw).unwrap_err();
        assert_eq!(err.param(), "headers");
        assert!(matches!(err, ValidationError::PatternMismatch { ref value, .. } if value == "@/etc/shadow"));

        let raw: Map<String, Value> = json!({
            "url": "https://example.com",
            "headers": ["NoColonHere"],
        })
        .as_object()
        .cloned()
        .unwrap();
        assert!(validate(PARAMS, &raw).is_err());
    }

    #[test]
    fn test_metacharacters_stay_single_tokens() {
        let args = decode(json!({
            "url": "https://example.com",
            "headers": "X-Evil: $(touch /tmp/pwned) && rm -rf /",
            "user_agent": "ua`id`; rm -rf /",
        }));
        let cmd = CurlProfile::command(&args, &HashMap::new());
        let argv = cmd.arguments();
        assert!(argv.contains(&"X-Evil: $(touch /tmp/pwned) && rm -rf /".to_string()));
        assert!(argv.contains(&"User-Agent: ua`id`; rm -rf /".to_string()));
        assert_eq!(argv.len(), 8);
    }

    #[test]
    fn test_parse_head_output_with_redirect() {
        let args = decode(json!({ "url": "http://example.com", "headers_only": true }));
        let stdout = "HTTP/1.1 301 Moved Permanently\r\nLocation: https://example.com/\r\n\r\nHTTP/2 200\r\ncontent-type: text/html; charset=UTF-8\r\ncontent-length: 1256\r\nserver: ECAcc (nyd/D184)\r\n\r\n";
        let report = CurlProfile::parse(stdout, "", &args);
        assert_eq!(report.http_version.as_deref(), Some("2"));
        assert_eq!(report.status_code, Some(200));
        assert_eq!(report.reason, None);
        assert_eq!(report.redirects, 1);
        assert_eq!(report.content_type.as_deref(), Some("text/html; charset=UTF-8"));
        assert_eq!(report.content_length, Some(1256));
        assert_eq!(report.server.as_deref(), Some("ECAcc (nyd/D184)"));
        assert!(!report.headers.contains_key("location"));
        assert_eq!(report.body_bytes, 0);
    }

    #[test]
    fn test_parse_verbose_stderr() {
        let args = decode(json!({ "url": "https://example.com", "verbose": true }));
        let stderr = "\
*   Trying 93.184.216.34:443...
> GET / HTTP/1.1
> Host: example.com
>
< HTTP/1.1 404 Not Found
< Content-Type: text/plain
< Content-Length: 9
<
";
        let report = CurlProfile::parse("not found", stderr, &args);
        assert_eq!(report.status_code, Some(404));
        assert_eq!(report.reason.as_deref(), Some("Not Found"));
        assert_eq!(report.headers.get("content-type").map(String::as_str), Some("text/plain"));
        assert_eq!(report.body_bytes, 9);
        assert_eq!(report.redirects, 0);
    }

    #[test]
    fn test_parse_connection_error() {
        let args = decode(json!({ "url": "https://nonexistent.invalid" }));
        let report = CurlProfile::parse("", "curl: (6) Could not resolve host: nonexistent.invalid\n", &args);
        assert_eq!(report.status_code, None);
        assert_eq!(report.errors, vec!["curl: (6) Could not resolve host: nonexistent.invalid"]);
    }

    #[test]
    fn test_rejects_bad_input() {
        let raw = json!({ "url": "-o /etc/passwd" }).as_object().cloned().unwrap();
        assert_eq!(validate(PARAMS, &raw).unwrap_err().param(), "url");
        let raw = json!({ "url": "https://x", "method": "TRACE" }).as_object().cloned().unwrap();
        assert_eq!(validate(PARAMS, &raw).unwrap_err().param(), "method");
    }
}
