//! Nimbus Recon — reconnaissance tool gateway.
//! Wraps nine network scanning binaries behind one validated, time-bounded
//! request pipeline and a uniform response envelope, served over MCP.

pub mod cli;
pub mod config;
pub mod error;
pub mod registry;
pub mod response;
pub mod standalone;

pub use cli::command::CommandLine;
pub use cli::harness::{Execution, Outcome, ProcessRunner};
pub use cli::params::{Arguments, ParamSpec, validate};
pub use cli::profiles::{Service, ServiceProfile};
pub use config::{ExecutionConfig, ReconConfig, ToolConfig, parse_env_ref, resolve_env_vars};
pub use error::{Failure, ReconError, Result, ValidationError};
pub use registry::{AS_JSON, ReconRegistry, take_as_json};
pub use response::ServiceResponse;
pub use standalone::server::ReconMcpServer;
