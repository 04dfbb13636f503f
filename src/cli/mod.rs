//! CLI tool modules: wraps recon binaries as validated, time-bounded services.
//!
//! Each wrapped tool is executed via structured args (never a shell). A
//! request flows through [`params`] (validation), a profile's command
//! builder ([`command`]), the process runner ([`harness`]) and the profile's
//! output parser ([`profiles`]).

pub mod command;
pub mod harness;
pub mod params;
pub mod profiles;

pub use command::CommandLine;
pub use harness::{Execution, Outcome, ProcessRunner};
pub use params::{Arguments, ParamSpec, validate};
pub use profiles::{Service, ServiceProfile};
