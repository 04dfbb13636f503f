//! ICMP echo via the system `ping` binary.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Service, ServiceProfile};
use crate::cli::command::CommandLine;
use crate::cli::params::{HOST_RE, ParamDefault, ParamSpec};

pub static PARAMS: &[ParamSpec] = &[
    ParamSpec::string("host", "Hostname or IP address to ping")
        .required()
        .pattern(&HOST_RE),
    ParamSpec::integer("count", "Number of echo requests to send")
        .range(1, 99)
        .default(ParamDefault::Int(5)),
    ParamSpec::float("interval", "Seconds between echo requests")
        .float_range(0.01, 5.0)
        .default(ParamDefault::Float(1.0)),
    ParamSpec::integer("packet_size", "Payload size in bytes")
        .range(1, 65524)
        .default(ParamDefault::Int(56)),
    ParamSpec::integer("timeout", "Overall deadline in seconds")
        .range(1, 300)
        .default(ParamDefault::Int(60)),
];

static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"PING\s+(\S+)\s+\(([^)]+)\)[:\s]+(\d+)(?:\((\d+)\))?\s+(?:data\s+)?bytes")
        .expect("valid regex")
});

static REPLY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+)\s+bytes\s+from\s+([^:]+):\s+(?:icmp_)?seq=(\d+)\s+ttl=(\d+)\s+time[=<]\s*([0-9.]+)\s*ms",
    )
    .expect("valid regex")
});

static ICMP_ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"From\s+([^:\s]+)(?:\s+\([^)]*\))?:?\s+icmp_seq=(\d+)\s+(.+)").expect("valid regex")
});

static STATS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+)\s+packets\s+transmitted,\s+(\d+)\s+(?:packets\s+)?received(?:,\s+\+(\d+)\s+errors)?(?:,\s+\+\d+\s+duplicates)?,\s+([0-9.]+)%\s+packet\s+loss(?:,\s+time\s+(\d+)\s*ms)?",
    )
    .expect("valid regex")
});

static RTT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s+=\s+([0-9.]+)/([0-9.]+)/([0-9.]+)/([0-9.]+)\s+ms",
    )
    .expect("valid regex")
});

#[derive(Debug, Clone, Deserialize)]
pub struct PingArgs {
    pub host: String,
    pub count: u32,
    pub interval: f64,
    pub packet_size: u32,
    pub timeout: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct PingReport {
    pub host: Option<String>,
    pub ip: Option<String>,
    pub bytes: Option<u32>,
    pub ttl: Option<u32>,
    pub packets: Vec<PingReply>,
    pub errors: Vec<IcmpError>,
    pub statistics: Option<PingStatistics>,
}

#[derive(Debug, Serialize)]
pub struct PingReply {
    pub seq: u32,
    pub bytes: u32,
    pub from: String,
    pub ttl: u32,
    pub time_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct IcmpError {
    pub seq: u32,
    pub from: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct PingStatistics {
    pub packets_transmitted: u32,
    pub packets_received: u32,
    pub errors: u32,
    pub packet_loss_percent: f64,
    pub time_ms: Option<u64>,
    pub rtt: Option<RoundTrip>,
}

#[derive(Debug, Serialize)]
pub struct RoundTrip {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
    pub mdev: f64,
}

pub struct PingProfile;

impl ServiceProfile for PingProfile {
    type Args = PingArgs;
    type Report = PingReport;

    const SERVICE: Service = Service::Ping;

    fn target(args: &PingArgs) -> String {
        args.host.clone()
    }

    fn command(args: &PingArgs, _env: &HashMap<String, String>) -> CommandLine {
        CommandLine::new(Service::Ping.binary())
            .opt("-c", args.count.to_string())
            .opt("-i", args.interval.to_string())
            .opt("-s", args.packet_size.to_string())
            .arg(&args.host)
    }

    fn deadline(args: &PingArgs) -> Duration {
        Duration::from_secs(args.timeout)
    }

    fn parse(stdout: &str, _stderr: &str, _args: &PingArgs) -> PingReport {
        let mut report = PingReport::default();
        let mut rtt = None;
        let mut stats = None;

        for line in stdout.lines() {
            if let Some(caps) = HEADER_RE.captures(line) {
                report.host = Some(caps[1].to_string());
                report.ip = Some(caps[2].to_string());
                report.bytes = caps[3].parse().ok();
            } else if let Some(caps) = REPLY_RE.captures(line) {
                let (Ok(bytes), Ok(seq), Ok(ttl), Ok(time_ms)) = (
                    caps[1].parse::<u32>(),
                    caps[3].parse::<u32>(),
                    caps[4].parse::<u32>(),
                    caps[5].parse::<f64>(),
                ) else {
                    continue;
                };
                report.ttl.get_or_insert(ttl);
                report.packets.push(PingReply {
                    seq,
                    bytes,
                    from: caps[2].trim().to_string(),
                    ttl,
                    time_ms,
                });
            } else if let Some(caps) = ICMP_ERROR_RE.captures(line) {
                report.errors.push(IcmpError {
                    seq: caps[2].parse().unwrap_or_default(),
                    from: caps[1].to_string(),
                    message: caps[3].trim().to_string(),
                });
            } else if let Some(caps) = STATS_RE.captures(line) {
                stats = Some(PingStatistics {
                    packets_transmitted: caps[1].parse().unwrap_or_default(),
                    packets_received: caps[2].parse().unwrap_or_default(),
                    errors: caps
                        .get(3)
                        .and_then(|m| m.as_str().parse().ok())
                        .unwrap_or_default(),
                    packet_loss_percent: caps[4].parse().unwrap_or_default(),
                    time_ms: caps.get(5).and_then(|m| m.as_str().parse().ok()),
                    rtt: None,
                });
            } else if let Some(caps) = RTT_RE.captures(line) {
                rtt = Some(RoundTrip {
                    min: caps[1].parse().unwrap_or_default(),
                    avg: caps[2].parse().unwrap_or_default(),
                    max: caps[3].parse().unwrap_or_default(),
                    mdev: caps[4].parse().unwrap_or_default(),
                });
            }
        }

        report.packets.sort_by_key(|p| p.seq);
        report.statistics = stats.map(|mut s| {
            s.rtt = rtt;
            s
        });
        report
    }
}
