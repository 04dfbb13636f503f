//! NetBIOS name scanning via `nbtscan`.

use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Service, ServiceProfile};
use crate::cli::command::CommandLine;
use crate::cli::params::{ParamDefault, ParamSpec, lowercase};

pub const OPTIONS: &[&str] = &["basic", "verbose", "script", "hosts", "lmhosts"];

const DEADLINE: Duration = Duration::from_secs(60);

/// Single IPv4 address, last-octet range (`10.0.0.1-20`) or CIDR block.
pub static TARGET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}(?:\.\d{1,3}){3}(?:/\d{1,2}|-\d{1,3})?$").expect("valid regex")
});

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::string("target", "IP address, range (192.168.1.1-254) or CIDR subnet (192.168.1.0/24)")
        .required()
        .pattern(&TARGET_RE),
    ParamSpec::string("options", "Output preset")
        .one_of(OPTIONS)
        .normalize(lowercase)
        .default(ParamDefault::Str("basic")),
    ParamSpec::integer("timeout", "Response timeout in milliseconds")
        .range(100, 30000)
        .default(ParamDefault::Int(1000)),
    ParamSpec::boolean("verbose", "Print every NetBIOS name a host reports"),
    ParamSpec::integer("retransmits", "Number of retransmits").range(0, 10),
    ParamSpec::boolean("use_local_port", "Send from local port 137"),
];

fn preset(options: &str) -> &'static [&'static str] {
    match options {
        "verbose" => &["-v"],
        "script" => &["-v", "-s", ":"],
        "hosts" => &["-e"],
        "lmhosts" => &["-l"],
        _ => &[],
    }
}

/// `192.168.1.10   FILESRV<20>   UNIQUE`
static COLUMN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.\d+\.\d+\.\d+)\s+([^\s<]+)<([0-9A-Fa-f]{2})>\s+(.+)$").expect("valid regex")
});

/// `192.168.1.10:FILESRV<20>:UNIQUE`
static SEPARATED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.\d+\.\d+\.\d+)\s*:\s*([^<:]+?)\s*<([0-9A-Fa-f]{2})>\s*:\s*(\S+)").expect("valid regex")
});

/// Default summary row: `ip  name  <server>  user  mac`.
static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.\d+\.\d+\.\d+)\s+(\S+)\s+(.*?)\s*([0-9A-Fa-f]{2}(?:[:-][0-9A-Fa-f]{2}){5})$")
        .expect("valid regex")
});

static TABLE_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"NetBIOS Name Table for Host (\d+\.\d+\.\d+\.\d+)").expect("valid regex")
});

static TABLE_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^\s<]+)\s*<([0-9A-Fa-f]{2})>\s+(\S+)").expect("valid regex")
});

static ADAPTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Adapter address:\s*([0-9A-Fa-f]{2}(?:[:-][0-9A-Fa-f]{2}){5})").expect("valid regex")
});

const ERROR_KEYWORDS: &[&str] = &["error", "failed", "timeout", "unable"];

/// Description of a NetBIOS name suffix.
pub fn name_type(suffix: &str) -> String {
    let known = match suffix.to_ascii_uppercase().as_str() {
        "00" => "Workstation Service",
        "01" => "Messenger Service",
        "03" => "Messenger Service (User)",
        "06" => "RAS Server Service",
        "1B" => "Domain Master Browser",
        "1C" => "Domain Controllers",
        "1D" => "Master Browser",
        "1E" => "Browser Service Elections",
        "20" => "File Server Service",
        "21" => "RAS Client Service",
        "22" => "Microsoft Exchange Interchange",
        "23" => "Microsoft Exchange Store",
        "24" => "Microsoft Exchange Directory",
        "30" => "Modem Sharing Server Service",
        "31" => "Modem Sharing Client Service",
        "43" => "SMS Clients Remote Control",
        "44" => "SMS Administrators Remote Control Tool",
        "45" => "SMS Clients Remote Chat",
        "46" => "SMS Clients Remote Transfer",
        "4C" | "52" => "DEC Pathworks TCPIP",
        "6A" => "Microsoft Exchange IMC",
        "87" => "Microsoft Exchange MTA",
        "BE" => "Network Monitor Agent",
        "BF" => "Network Monitor Application",
        _ => return format!("Unknown Service (0x{})", suffix),
    };
    known.to_string()
}

/// Number of addresses covered by a target expression.
///
/// Returns `None` for expressions that do not describe a valid range.
pub fn hosts_in_target(target: &str) -> Option<u64> {
    if let Some((addr, prefix)) = target.split_once('/') {
        addr.parse::<Ipv4Addr>().ok()?;
        let prefix: u32 = prefix.parse().ok().filter(|p| *p <= 32)?;
        return Some(1u64 << (32 - prefix));
    }
    if let Some((start, end)) = target.split_once('-') {
        start.parse::<Ipv4Addr>().ok()?;
        let first: u64 = start.rsplit('.').next()?.parse().ok()?;
        let last: u64 = end.parse().ok()?;
        return last.checked_sub(first).map(|d| d + 1);
    }
    target.parse::<Ipv4Addr>().ok().map(|_| 1)
}

#[derive(Debug, Clone, Deserialize)]
pub struct NbtscanArgs {
    pub target: String,
    pub options: String,
    pub timeout: u64,
    pub verbose: bool,
    pub retransmits: Option<u32>,
    pub use_local_port: bool,
}

#[derive(Debug, Default, Serialize)]
pub struct NbtscanReport {
    pub target_range: String,
    pub discovered_hosts: Vec<NbtHost>,
    pub statistics: NbtStatistics,
    pub netbios_names: NameIndex,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct NbtHost {
    pub ip_address: String,
    pub netbios_names: Vec<NetbiosName>,
    pub computer_name: Option<String>,
    pub domain: Option<String>,
    pub workgroup: Option<String>,
    pub mac_address: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NetbiosName {
    pub name: String,
    pub suffix: String,
    pub service_type: String,
    pub name_type: String,
}

#[derive(Debug, Default, Serialize)]
pub struct NbtStatistics {
    pub total_hosts_scanned: u64,
    pub responsive_hosts: usize,
    pub total_netbios_names: usize,
    pub unique_domains: Vec<String>,
    pub unique_workgroups: Vec<String>,
}

/// Names grouped by what their suffix says about the host.
#[derive(Debug, Default, Serialize)]
pub struct NameIndex {
    pub computers: Vec<NameRef>,
    pub domains: Vec<NameRef>,
    pub services: Vec<NameRef>,
    pub users: Vec<NameRef>,
}

#[derive(Debug, Serialize)]
pub struct NameRef {
    pub ip: String,
    pub name: String,
    pub suffix: String,
}

pub struct NbtscanProfile;

impl ServiceProfile for NbtscanProfile {
    type Args = NbtscanArgs;
    type Report = NbtscanReport;

    const SERVICE: Service = Service::Nbtscan;

    fn target(args: &NbtscanArgs) -> String {
        args.target.clone()
    }

    fn command(args: &NbtscanArgs, _env: &HashMap<String, String>) -> CommandLine {
        let flags = preset(&args.options);
        CommandLine::new(Service::Nbtscan.binary())
            .args(flags.iter().copied())
            .flag_if("-v", args.verbose && !flags.contains(&"-v"))
            .opt("-t", args.timeout.to_string())
            .opt_if("-m", args.retransmits.filter(|n| *n > 0).map(|n| n.to_string()))
            .flag_if("-r", args.use_local_port)
            .arg("-q")
            .arg(&args.target)
    }

    fn deadline(_args: &NbtscanArgs) -> Duration {
        DEADLINE
    }

    fn parse(stdout: &str, stderr: &str, args: &NbtscanArgs) -> NbtscanReport {
        let mut scan = Scan {
            report: NbtscanReport {
                target_range: args.target.clone(),
                ..Default::default()
            },
            domains: BTreeSet::new(),
            workgroups: BTreeSet::new(),
        };

        if stdout.trim().is_empty() && stderr.trim().is_empty() {
            scan.report.errors.push("Empty nbtscan output".to_string());
        }

        let mut table_host: Option<String> = None;
        for line in stdout.lines().chain(stderr.lines()).map(str::trim) {
            if line.is_empty() || line.starts_with("Doing NBT name scan") || line.contains("IP address") {
                continue;
            }

            if let Some(caps) = COLUMN_RE.captures(line).or_else(|| SEPARATED_RE.captures(line)) {
                scan.record(&caps[1], caps[2].trim(), &caps[3], caps[4].trim());
            } else if let Some(caps) = TABLE_HEADER_RE.captures(line) {
                table_host = Some(caps[1].to_string());
                scan.host_mut(&caps[1]);
            } else if let Some(caps) = ADAPTER_RE.captures(line) {
                if let Some(ip) = &table_host {
                    scan.host_mut(ip).mac_address = Some(caps[1].to_string());
                }
            } else if let Some(caps) = SUMMARY_RE.captures(line) {
                let ip = caps[1].to_string();
                let name = caps[2].to_string();
                let host = scan.host_mut(&ip);
                host.mac_address = Some(caps[4].to_string());
                if name != "<unknown>" {
                    host.computer_name = Some(name.clone());
                    scan.report.netbios_names.computers.push(NameRef {
                        ip,
                        name,
                        suffix: "00".to_string(),
                    });
                }
            } else if let (Some(ip), Some(caps)) = (table_host.clone(), TABLE_ROW_RE.captures(line)) {
                scan.record(&ip, &caps[1], &caps[2], &caps[3]);
            }

            let lower = line.to_ascii_lowercase();
            if ERROR_KEYWORDS.iter().any(|k| lower.contains(k)) {
                scan.report.errors.push(line.to_string());
            }
        }

        let mut report = scan.report;
        report.statistics.responsive_hosts = report.discovered_hosts.len();
        report.statistics.total_hosts_scanned =
            hosts_in_target(&args.target).unwrap_or(report.discovered_hosts.len() as u64);
        report.statistics.unique_domains = scan.domains.into_iter().collect();
        report.statistics.unique_workgroups = scan.workgroups.into_iter().collect();
        report
    }
}

struct Scan {
    report: NbtscanReport,
    domains: BTreeSet<String>,
    workgroups: BTreeSet<String>,
}

impl Scan {
    fn host_mut(&mut self, ip: &str) -> &mut NbtHost {
        let hosts = &mut self.report.discovered_hosts;
        let idx = match hosts.iter().position(|h| h.ip_address == ip) {
            Some(idx) => idx,
            None => {
                hosts.push(NbtHost {
                    ip_address: ip.to_string(),
                    ..Default::default()
                });
                hosts.len() - 1
            }
        };
        &mut hosts[idx]
    }

    fn record(&mut self, ip: &str, name: &str, suffix: &str, service_type: &str) {
        let suffix = suffix.to_ascii_uppercase();
        let group = service_type.eq_ignore_ascii_case("GROUP");
        let entry = NameRef {
            ip: ip.to_string(),
            name: name.to_string(),
            suffix: suffix.clone(),
        };

        let host = self.host_mut(ip);
        host.netbios_names.push(NetbiosName {
            name: name.to_string(),
            suffix: suffix.clone(),
            service_type: service_type.to_string(),
            name_type: name_type(&suffix),
        });
        match suffix.as_str() {
            "00" if group => host.workgroup = Some(name.to_string()),
            "00" => host.computer_name = Some(name.to_string()),
            "1C" => host.domain = Some(name.to_string()),
            _ => {}
        }
        self.report.statistics.total_netbios_names += 1;

        let index = &mut self.report.netbios_names;
        match suffix.as_str() {
            "00" if group => {
                self.workgroups.insert(name.to_string());
            }
            "00" => index.computers.push(entry),
            "1C" => {
                self.domains.insert(name.to_string());
                index.domains.push(entry);
            }
            "20" => index.services.push(entry),
            "03" => index.users.push(entry),
            _ => {}
        }
    }
}
