//! Built-in service profiles.
//!
//! The catalog is closed: [`Service`] enumerates every wrapped tool, and each
//! variant is backed by a [`ServiceProfile`] implementation holding that tool's
//! parameter table, typed argument record, command builder and output parser.
//! Adding a tool means adding a variant, and the compiler points at every
//! dispatch site that must learn about it.

mod curl;
mod dns;
mod httpx;
mod nbtscan;
mod nikto;
mod nmap;
mod ping;
mod whois;
mod wpscan;

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cli::command::CommandLine;
use crate::cli::params::ParamSpec;

pub use curl::{CurlArgs, CurlProfile, CurlReport};
pub use dns::{DnsArgs, DnsProfile, DnsReport};
pub use httpx::{HttpxArgs, HttpxProfile, HttpxReport};
pub use nbtscan::{NbtscanArgs, NbtscanProfile, NbtscanReport};
pub use nikto::{NiktoArgs, NiktoProfile, NiktoReport};
pub use nmap::{NmapArgs, NmapProfile, NmapReport};
pub use ping::{PingArgs, PingProfile, PingReport};
pub use whois::{WhoisArgs, WhoisProfile, WhoisReport};
pub use wpscan::{WpscanArgs, WpscanProfile, WpscanReport};

/// One wrapped command-line tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    Ping,
    Dns,
    Whois,
    Curl,
    Nmap,
    Nikto,
    Wpscan,
    Httpx,
    Nbtscan,
}

impl Service {
    pub const ALL: [Service; 9] = [
        Service::Ping,
        Service::Dns,
        Service::Whois,
        Service::Curl,
        Service::Nmap,
        Service::Nikto,
        Service::Wpscan,
        Service::Httpx,
        Service::Nbtscan,
    ];

    /// Service identifier used in requests and config sections.
    pub fn name(self) -> &'static str {
        match self {
            Service::Ping => "ping",
            Service::Dns => "dns",
            Service::Whois => "whois",
            Service::Curl => "curl",
            Service::Nmap => "nmap",
            Service::Nikto => "nikto",
            Service::Wpscan => "wpscan",
            Service::Httpx => "httpx",
            Service::Nbtscan => "nbtscan",
        }
    }

    /// Resolve a service by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    /// All service names in catalog order.
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|s| s.name()).collect()
    }

    /// Default executable name resolved on PATH.
    pub fn binary(self) -> &'static str {
        match self {
            Service::Dns => "dig",
            other => other.name(),
        }
    }

    /// Installation command surfaced when the binary is missing.
    pub fn install_hint(self) -> &'static str {
        match self {
            Service::Ping => "sudo apt-get install iputils-ping",
            Service::Dns => "sudo apt-get install dnsutils",
            Service::Whois => "sudo apt-get install whois",
            Service::Curl => "sudo apt-get install curl",
            Service::Nmap => "sudo apt-get install nmap",
            Service::Nikto => "sudo apt-get install nikto",
            Service::Wpscan => "gem install wpscan",
            Service::Httpx => "go install -v github.com/projectdiscovery/httpx/cmd/httpx@latest",
            Service::Nbtscan => "sudo apt-get install nbtscan",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Service::Ping => "Send ICMP echo requests to a host and report packet loss and round-trip times.",
            Service::Dns => "Query DNS records (A, AAAA, MX, NS, TXT, ...) for a host.",
            Service::Whois => "Look up domain registration details: registrar, dates, contacts, name servers.",
            Service::Curl => "Make an HTTP request and report the status line, headers and body.",
            Service::Nmap => "Scan a host for open ports and services using a named scan preset.",
            Service::Nikto => "Scan a web server for known vulnerabilities and misconfigurations.",
            Service::Wpscan => "Enumerate WordPress core, plugins, themes, users and known vulnerabilities.",
            Service::Httpx => "Probe web targets for status codes, titles, technologies and fingerprints.",
            Service::Nbtscan => "Scan an IP range for NetBIOS names, workgroups and domains.",
        }
    }

    /// Ordered parameter table.
    pub fn params(self) -> &'static [ParamSpec] {
        match self {
            Service::Ping => ping::PARAMS,
            Service::Dns => dns::PARAMS,
            Service::Whois => whois::PARAMS,
            Service::Curl => curl::PARAMS,
            Service::Nmap => nmap::PARAMS,
            Service::Nikto => nikto::PARAMS,
            Service::Wpscan => wpscan::PARAMS,
            Service::Httpx => httpx::PARAMS,
            Service::Nbtscan => nbtscan::PARAMS,
        }
    }

    /// Name of the parameter holding the primary subject.
    pub fn target_param(self) -> &'static str {
        match self {
            Service::Ping | Service::Dns => "host",
            Service::Whois => "domain",
            Service::Curl | Service::Wpscan => "url",
            Service::Httpx => "targets",
            Service::Nmap | Service::Nikto | Service::Nbtscan => "target",
        }
    }

    /// Whether the `timeout` parameter is the process deadline itself, so a
    /// configured default may stand in when the caller omits it.
    pub fn timeout_is_deadline(self) -> bool {
        matches!(
            self,
            Service::Ping | Service::Whois | Service::Curl | Service::Nmap | Service::Wpscan
        )
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-tool behavior behind a [`Service`] variant.
///
/// Implementations are stateless; everything they need arrives as arguments,
/// so command building and parsing are pure and testable without the binary.
pub trait ServiceProfile {
    /// Typed argument record decoded from validated arguments.
    type Args: DeserializeOwned;
    /// Structured output produced by the parser.
    type Report: Serialize;

    const SERVICE: Service;

    /// Primary subject recorded in the envelope's `target`.
    fn target(args: &Self::Args) -> String;

    /// Build the command line. `env` is the tool's resolved configured
    /// environment, available for defaults such as API tokens.
    fn command(args: &Self::Args, env: &HashMap<String, String>) -> CommandLine;

    /// Wall-clock deadline for the process.
    fn deadline(args: &Self::Args) -> Duration;

    /// Parse raw output. Must tolerate empty and malformed input.
    fn parse(stdout: &str, stderr: &str, args: &Self::Args) -> Self::Report;

    /// Argument names whose values are masked in the envelope.
    fn redacted_arguments() -> &'static [&'static str] {
        &[]
    }
}
