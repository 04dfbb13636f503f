//! DNS record lookups via `dig`.
//!
//! One `dig` process answers every requested record type. The parser reads
//! dig's answer section and also the block form
//! (`A records for host:` followed by indented values).

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Service, ServiceProfile};
use crate::cli::command::CommandLine;
use crate::cli::params::{Delimiter, HOST_RE, ParamDefault, ParamSpec, uppercase};

pub const RECORD_TYPES: &[&str] = &[
    "A", "AAAA", "CNAME", "MX", "NS", "PTR", "SOA", "SRV", "TXT", "CAA",
];

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::string("host", "Domain name (or IP address for PTR) to query")
        .required()
        .pattern(&HOST_RE),
    ParamSpec::list("record_types", Delimiter::Comma, "Record types to query")
        .one_of(RECORD_TYPES)
        .normalize(uppercase)
        .default(ParamDefault::Str("A,TXT")),
    ParamSpec::integer("timeout", "Per-query timeout in seconds")
        .range(1, 30)
        .default(ParamDefault::Int(5)),
];

static BLOCK_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([A-Za-z]+)\s+records\s+for\s+(\S+?):\s*(.*)$").expect("valid regex")
});

static ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+(\d+)\s+(?:IN|CH|HS)\s+([A-Z0-9]+)\s+(.+)$").expect("valid regex")
});

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("valid regex"));

#[derive(Debug, Clone, Deserialize)]
pub struct DnsArgs {
    pub host: String,
    pub record_types: Vec<String>,
    pub timeout: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct DnsReport {
    pub host: String,
    pub records: BTreeMap<String, Vec<String>>,
    pub summary: DnsSummary,
    /// Legacy flattened view of the A records.
    pub ip_addresses: Vec<String>,
    /// Legacy SPF heuristic: first `include:` of the first `v=spf1` TXT record.
    pub email_host: Option<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct DnsSummary {
    pub total_record_types: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    pub has_ip_addresses: bool,
    pub has_mail_records: bool,
    pub has_txt_records: bool,
}

pub struct DnsProfile;

impl ServiceProfile for DnsProfile {
    type Args = DnsArgs;
    type Report = DnsReport;

    const SERVICE: Service = Service::Dns;

    fn target(args: &DnsArgs) -> String {
        args.host.clone()
    }

    fn command(args: &DnsArgs, _env: &HashMap<String, String>) -> CommandLine {
        let mut cmd = CommandLine::new(Service::Dns.binary())
            .arg("+noall")
            .arg("+answer")
            .arg(format!("+time={}", args.timeout))
            .arg("+tries=1");
        for record_type in unique_types(args) {
            cmd = if record_type == "PTR" {
                cmd.opt("-x", &args.host)
            } else {
                cmd.arg(&args.host).arg(record_type)
            };
        }
        cmd
    }

    fn deadline(args: &DnsArgs) -> Duration {
        let queries = unique_types(args).len().max(1) as u64;
        Duration::from_secs(args.timeout * queries + 5)
    }

    fn parse(stdout: &str, stderr: &str, args: &DnsArgs) -> DnsReport {
        let mut records: BTreeMap<String, Vec<String>> = unique_types(args)
            .into_iter()
            .map(|t| (t.to_ascii_uppercase(), Vec::new()))
            .collect();
        let mut errors = Vec::new();
        let mut query_errors = 0usize;
        let mut current: Option<String> = None;

        for line in stdout.lines() {
            if let Some(caps) = BLOCK_HEADER_RE.captures(line) {
                let record_type = caps[1].to_ascii_uppercase();
                let rest = caps[3].trim();
                let values = records.entry(record_type.clone()).or_default();
                if !rest.is_empty() && !rest.eq_ignore_ascii_case("No records found") {
                    values.push(rest.to_string());
                }
                current = Some(record_type);
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                current = None;
                continue;
            }
            if trimmed.starts_with(";;") {
                if trimmed.contains("timed out") || trimmed.contains("error") {
                    errors.push(trimmed.trim_start_matches(';').trim().to_string());
                    query_errors += 1;
                }
                current = None;
                continue;
            }
            if trimmed.starts_with(';') {
                continue;
            }

            if line.starts_with(char::is_whitespace) {
                if let Some(record_type) = &current {
                    records
                        .entry(record_type.clone())
                        .or_default()
                        .push(trimmed.to_string());
                    continue;
                }
            }

            if let Some(caps) = ANSWER_RE.captures(trimmed) {
                current = None;
                let record_type = &caps[3];
                if let Some(values) = records.get_mut(record_type) {
                    values.push(clean_rdata(record_type, &caps[4]));
                }
            }
        }

        for line in stderr.lines().map(str::trim).filter(|l| !l.is_empty()) {
            errors.push(line.to_string());
            query_errors += 1;
        }

        let non_empty = |t: &str| records.get(t).is_some_and(|v| !v.is_empty());
        let ip_addresses = records.get("A").cloned().unwrap_or_default();
        let email_host = records.get("TXT").and_then(|txt| spf_include(txt));

        // An empty answer (NOERROR/NODATA or NXDOMAIN) is a completed query.
        // Only as many empty types as dig reported errors count as failed.
        let empty = records.values().filter(|v| v.is_empty()).count();
        let failed_queries = empty.min(query_errors);
        let summary = DnsSummary {
            total_record_types: records.len(),
            successful_queries: records.len() - failed_queries,
            failed_queries,
            has_ip_addresses: non_empty("A") || non_empty("AAAA"),
            has_mail_records: non_empty("MX") || email_host.is_some(),
            has_txt_records: non_empty("TXT"),
        };

        DnsReport {
            host: args.host.clone(),
            records,
            summary,
            ip_addresses,
            email_host,
            errors,
        }
    }
}

/// Requested record types, first occurrence of each, in request order.
fn unique_types(args: &DnsArgs) -> Vec<&str> {
    let mut seen = Vec::with_capacity(args.record_types.len());
    for record_type in &args.record_types {
        if !seen.contains(&record_type.as_str()) {
            seen.push(record_type.as_str());
        }
    }
    seen
}

/// Normalize one answer's rdata: strip the trailing root dot on names and
/// join the quoted character-strings of TXT records.
fn clean_rdata(record_type: &str, rdata: &str) -> String {
    let rdata = rdata.trim();
    match record_type {
        "TXT" | "SPF" => {
            let parts: Vec<&str> = QUOTED_RE
                .captures_iter(rdata)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            if parts.is_empty() {
                rdata.to_string()
            } else {
                parts.concat().replace("\\\"", "\"")
            }
        }
        "A" | "AAAA" => rdata.to_string(),
        _ => rdata.trim_end_matches('.').to_string(),
    }
}

/// First `include:` target of the first SPF policy among TXT values.
fn spf_include(txt: &[String]) -> Option<String> {
    txt.iter()
        .find(|v| v.contains("v=spf1"))
        .and_then(|spf| {
            spf.split_whitespace()
                .find_map(|token| token.strip_prefix("include:"))
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::params::validate;
    use serde_json::{Map, Value, json};

    fn args(types: &[&str]) -> DnsArgs {
        DnsArgs {
            host: "google.com".to_string(),
            record_types: types.iter().map(|t| t.to_string()).collect(),
            timeout: 5,
        }
    }

    fn raw(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_block_format() {
        let output = "A records for google.com:\n  172.217.12.142\nTXT records for google.com:\n  v=spf1 include:_spf.google.com ~all\n";
        let report = DnsProfile::parse(output, "", &args(&["A", "TXT"]));
        assert_eq!(report.records["A"], vec!["172.217.12.142"]);
        assert!(
            report.records["TXT"]
                .iter()
                .any(|v| v.contains("v=spf1 include:_spf.google.com"))
        );
        assert!(report.summary.has_ip_addresses);
        assert!(report.summary.has_mail_records);
        assert!(report.summary.has_txt_records);
        assert_eq!(report.summary.successful_queries, 2);
        assert_eq!(report.summary.failed_queries, 0);
        assert_eq!(report.ip_addresses, vec!["172.217.12.142"]);
        assert_eq!(report.email_host.as_deref(), Some("_spf.google.com"));
    }

    #[test]
    fn test_parse_block_no_records() {
        let output = "A records for example.invalid: No records found\nMX records for example.invalid: No records found\n";
        let report = DnsProfile::parse(output, "", &args(&["A", "MX"]));
        assert!(report.records["A"].is_empty());
        assert!(report.records["MX"].is_empty());
        assert_eq!(report.summary.successful_queries, 2);
        assert_eq!(report.summary.failed_queries, 0);
        assert!(!report.summary.has_ip_addresses);
        assert!(!report.summary.has_mail_records);
        assert!(report.email_host.is_none());
    }

    #[test]
    fn test_parse_dig_answers() {
        let output = "\
google.com.\t\t300\tIN\tA\t172.217.12.142
google.com.\t\t3600\tIN\tTXT\t\"v=spf1 include:_spf.google.com ~all\"
google.com.\t\t3600\tIN\tTXT\t\"google-site-verification=\" \"abc123\"
google.com.\t\t300\tIN\tMX\t10 smtp.google.com.
";
        let report = DnsProfile::parse(output, "", &args(&["A", "TXT", "MX"]));
        assert_eq!(report.records["A"], vec!["172.217.12.142"]);
        assert_eq!(
            report.records["TXT"],
            vec![
                "v=spf1 include:_spf.google.com ~all",
                "google-site-verification=abc123"
            ]
        );
        assert_eq!(report.records["MX"], vec!["10 smtp.google.com"]);
        assert!(report.summary.has_mail_records);
        assert_eq!(report.summary.total_record_types, 3);
    }

    #[test]
    fn test_unrequested_types_ignored() {
        let output = "\
www.example.com.\t60\tIN\tCNAME\texample.com.
example.com.\t60\tIN\tA\t93.184.216.34
";
        let report = DnsProfile::parse(output, "", &args(&["A"]));
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records["A"], vec!["93.184.216.34"]);
    }

    #[test]
    fn test_errors_collected() {
        let output = ";; communications error to 8.8.8.8#53: timed out\n";
        let report = DnsProfile::parse(output, "dig: couldn't get address for 'x'\n", &args(&["A"]));
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.summary.failed_queries, 1);
        assert_eq!(report.summary.successful_queries, 0);
    }

    #[test]
    fn test_failed_queries_limited_to_reported_errors() {
        let output = "\
example.com.\t300\tIN\tA\t93.184.216.34
;; connection timed out; no servers could be reached
";
        let report = DnsProfile::parse(output, "", &args(&["A", "MX", "TXT"]));
        assert_eq!(report.summary.total_record_types, 3);
        assert_eq!(report.summary.successful_queries, 2);
        assert_eq!(report.summary.failed_queries, 1);
    }

    #[test]
    fn test_repeated_types_queried_once() {
        let args: DnsArgs = validate(
            PARAMS,
            &raw(json!({ "host": "example.com", "record_types": "A,mx,a,MX" })),
        )
        .unwrap()
        .decode()
        .unwrap();
        let cmd = DnsProfile::command(&args, &HashMap::new());
        assert_eq!(
            cmd.display(),
            "dig +noall +answer +time=5 +tries=1 example.com A example.com MX"
        );
        assert_eq!(DnsProfile::deadline(&args), Duration::from_secs(15));

        let report = DnsProfile::parse("", "", &args);
        assert_eq!(report.summary.total_record_types, 2);
        assert_eq!(report.summary.successful_queries, 2);
        assert_eq!(report.summary.failed_queries, 0);
    }

    #[test]
    fn test_command_one_query_per_type() {
        let args: DnsArgs = validate(
            PARAMS,
            &raw(json!({ "host": "example.com", "record_types": "a,mx,ptr" })),
        )
        .unwrap()
        .decode()
        .unwrap();
        assert_eq!(args.record_types, vec!["A", "MX", "PTR"]);
        let cmd = DnsProfile::command(&args, &HashMap::new());
        assert_eq!(
            cmd.display(),
            "dig +noall +answer +time=5 +tries=1 example.com A example.com MX -x example.com"
        );
        assert_eq!(DnsProfile::deadline(&args), Duration::from_secs(20));
    }

    #[test]
    fn test_default_types_and_bounds() {
        let args: DnsArgs = validate(PARAMS, &raw(json!({ "host": "example.com" })))
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(args.record_types, vec!["A", "TXT"]);
        let err = validate(PARAMS, &raw(json!({ "host": "example.com", "timeout": 31 }))).unwrap_err();
        assert_eq!(err.to_string(), "timeout must be between 1 and 30");
        let err = validate(PARAMS, &raw(json!({ "host": "example.com", "record_types": "A,BOGUS" })))
            .unwrap_err();
        assert_eq!(err.param(), "record_types");
    }
}
