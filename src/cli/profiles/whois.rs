//! Domain registration lookup via `whois`.
//!
//! Registries format their responses differently, so the parser classifies
//! each `Key: value` line by keyword rather than by exact field name.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Service, ServiceProfile};
use crate::cli::command::CommandLine;
use crate::cli::params::{Delimiter, HOST_RE, ParamDefault, ParamSpec};

pub const OPTIONS: &[&str] = &[
    "-R", "-a", "-t", "-H", "-I", "-v", "-r", "-B", "-G", "-b", "-c", "-x",
];

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::string("domain", "Domain name to look up (scheme and path are ignored)")
        .required()
        .normalize(bare_domain)
        .pattern(&HOST_RE),
    ParamSpec::list("options", Delimiter::Whitespace, "Extra whois flags, e.g. -H")
        .one_of(OPTIONS),
    ParamSpec::string("server", "Specific whois server to query").pattern(&HOST_RE),
    ParamSpec::integer("timeout", "Deadline in seconds")
        .range(1, 120)
        .default(ParamDefault::Int(30)),
];

static URL_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+https?://\S+").expect("valid regex"));

static PAREN_SUFFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\([^)]*\)").expect("valid regex"));

/// Strip a URL scheme and anything after the host.
fn bare_domain(raw: &str) -> String {
    let rest = raw
        .strip_prefix("https://")
        .or_else(|| raw.strip_prefix("http://"))
        .unwrap_or(raw);
    rest.split('/').next().unwrap_or_default().trim().to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhoisArgs {
    pub domain: String,
    #[serde(default)]
    pub options: Vec<String>,
    pub server: Option<String>,
    pub timeout: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct WhoisReport {
    pub domain: String,
    pub registrar_info: RegistrarInfo,
    pub registration_info: RegistrationInfo,
    pub registrant_info: Registrant,
    pub admin_contact: Contact,
    pub tech_contact: Contact,
    pub name_servers: Vec<String>,
    pub dnssec: Option<String>,
    pub summary: WhoisSummary,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RegistrarInfo {
    pub registrar: Option<String>,
    pub registrar_url: Option<String>,
    pub abuse_email: Option<String>,
    pub abuse_phone: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct RegistrationInfo {
    pub creation_date: Option<String>,
    pub expiration_date: Option<String>,
    pub updated_date: Option<String>,
    pub status: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct Registrant {
    pub name: Option<String>,
    pub organization: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct Contact {
    pub name: Option<String>,
    pub organization: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct WhoisSummary {
    pub domain_age_days: Option<i64>,
    pub days_until_expiry: Option<i64>,
    pub is_available: bool,
}

pub struct WhoisProfile;

impl ServiceProfile for WhoisProfile {
    type Args = WhoisArgs;
    type Report = WhoisReport;

    const SERVICE: Service = Service::Whois;

    fn target(args: &WhoisArgs) -> String {
        args.domain.clone()
    }

    fn command(args: &WhoisArgs, _env: &HashMap<String, String>) -> CommandLine {
        CommandLine::new(Service::Whois.binary())
            .args(&args.options)
            .opt_if("-h", args.server.as_deref())
            .arg(&args.domain)
    }

    fn deadline(args: &WhoisArgs) -> Duration {
        Duration::from_secs(args.timeout)
    }

    fn parse(stdout: &str, _stderr: &str, args: &WhoisArgs) -> WhoisReport {
        parse_with_clock(stdout, &args.domain, Utc::now())
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Value after the first colon with trailing URLs and parentheticals removed.
fn value_after_colon(line: &str) -> Option<String> {
    let (_, value) = line.split_once(':')?;
    let value = URL_SUFFIX_RE.replace_all(value.trim(), "");
    let value = PAREN_SUFFIX_RE.replace_all(&value, "");
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn push_unique(list: &mut Vec<String>, value: Option<String>) {
    if let Some(value) = value {
        if !list.contains(&value) {
            list.push(value);
        }
    }
}

/// Parse whois text, computing ages relative to `now`.
pub fn parse_with_clock(text: &str, domain: &str, now: DateTime<Utc>) -> WhoisReport {
    let mut report = WhoisReport {
        domain: domain.to_ascii_uppercase(),
        ..Default::default()
    };
    if text.trim().is_empty() {
        report.errors.push("Empty WHOIS response".to_string());
        return report;
    }

    for line in text.lines().map(str::trim) {
        if line.is_empty()
            || line.starts_with('%')
            || line.starts_with('#')
            || line.starts_with(">>>")
            || line.starts_with("NOTICE:")
        {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        let value = || value_after_colon(line);

        if contains_any(&lower, &["no match", "not found", "no entries found", "no data found"]) {
            report.summary.is_available = true;
        } else if contains_any(
            &lower,
            &["registrar:", "registrar organization:", "sponsoring registrar:"],
        ) {
            report.registrar_info.registrar = value();
        } else if lower.contains("registrar url:") {
            report.registrar_info.registrar_url = value();
        } else if lower.contains("registrar abuse contact email:") {
            report.registrar_info.abuse_email = value();
        } else if lower.contains("registrar abuse contact phone:") {
            report.registrar_info.abuse_phone = value();
        } else if contains_any(
            &lower,
            &["creation date:", "created:", "created on:", "domain registration date:"],
        ) {
            report.registration_info.creation_date = value();
        } else if lower.contains("expir") {
            if lower.contains("date") {
                report.registration_info.expiration_date = value();
            }
        } else if contains_any(&lower, &["updated date:", "last updated:", "modified:"]) {
            report.registration_info.updated_date = value();
        } else if lower.contains("status:") {
            push_unique(&mut report.registration_info.status, value());
        } else if contains_any(&lower, &["registrant name:", "registrant:"]) {
            report.registrant_info.name = value();
        } else if contains_any(&lower, &["registrant organization:", "registrant org:"]) {
            report.registrant_info.organization = value();
        } else if lower.contains("registrant email:") {
            report.registrant_info.email = value();
        } else if lower.contains("registrant phone:") {
            report.registrant_info.phone = value();
        } else if lower.contains("registrant country:") {
            report.registrant_info.country = value();
        } else if let Some(field) = contact_field(&lower, "admin", "administrative") {
            field.assign(&mut report.admin_contact, value());
        } else if let Some(field) = contact_field(&lower, "tech", "technical") {
            field.assign(&mut report.tech_contact, value());
        } else if contains_any(&lower, &["name server:", "nserver:", "nameserver:"]) {
            push_unique(&mut report.name_servers, value());
        } else if lower.contains("dnssec:") {
            report.dnssec = value();
        }
    }

    if let Some(created) = report.registration_info.creation_date.as_deref() {
        report.summary.domain_age_days = parse_date(created).map(|d| (now.naive_utc() - d).num_days());
    }
    if let Some(expires) = report.registration_info.expiration_date.as_deref() {
        report.summary.days_until_expiry =
            parse_date(expires).map(|d| (d - now.naive_utc()).num_days());
    }
    report
}

#[derive(Clone, Copy)]
enum ContactField {
    Name,
    Organization,
    Email,
    Phone,
}

impl ContactField {
    fn assign(self, contact: &mut Contact, value: Option<String>) {
        match self {
            ContactField::Name => contact.name = value,
            ContactField::Organization => contact.organization = value,
            ContactField::Email => contact.email = value,
            ContactField::Phone => contact.phone = value,
        }
    }
}

/// Match `<short> name:` or `<long> contact name:` style keys.
fn contact_field(lower: &str, short: &str, long: &str) -> Option<ContactField> {
    [
        ("name:", ContactField::Name),
        ("organization:", ContactField::Organization),
        ("email:", ContactField::Email),
        ("phone:", ContactField::Phone),
    ]
    .into_iter()
    .find(|(suffix, _)| {
        lower.contains(&format!("{} {}", short, suffix))
            || lower.contains(&format!("{} contact {}", long, suffix))
    })
    .map(|(_, field)| field)
}

/// Parse the first space-separated token of a whois date.
fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let token = raw.split(' ').next()?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(token, fmt).ok())
        .or_else(|| {
            ["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d", "%d.%m.%Y"]
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
