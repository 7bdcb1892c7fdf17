//! stateprobe-core: value model for stateful API conformance testing
//!
//! Cases, HTTP exchanges, failures and checks, plus the grouping of failed
//! checks into reproducible defects and the serialized report format.

pub mod case;
pub mod check;
pub mod code_sample;
pub mod config;
pub mod failure;
pub mod grouping;
pub mod http;
pub mod report;
pub mod sanitize;

pub use case::{Case, CaseFingerprint, GenerationMode, OperationRef};
pub use check::{Check, Status};
pub use config::{
    CassetteConfig, CassetteFormat, ChecksConfig, Config, ConfigError, EngineConfig,
    FiltersConfig, OutputConfig,
};
pub use failure::{Failure, FailureKind};
pub use grouping::group_failures_by_code_sample;
pub use http::{Headers, Request, Response};
pub use report::{SerializedCase, SerializedCheck, SerializedRequest, SerializedResponse};
