// stress-core/src/lib.rs
// Stressor harness, MWC generator and stressor catalogue

pub mod config;
pub mod config_validation;
pub mod context;
pub mod controller;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod mwc;
pub mod provider;
pub mod report;
pub mod shared;
pub mod status;
pub mod stressors;
pub mod supervisor;
pub mod system;

mod integration_tests;

pub use config::{InstanceMode, RunConfig, StressorOptions, StressorSpec};
pub use config_validation::{ConfigValidator, ValidationReport, ValidationSeverity};
pub use context::{InstanceParams, StressContext};
pub use controller::{Controller, StopHandle};
pub use error::{ErrorClass, ErrorRecovery, RecoveryStrategy, Result, StressError};
pub use harness::{execute, Step, Stressor, StressorClass, Workload};
pub use metrics::{Metric, Metrics, MetricsSink, Reduction};
pub use mwc::Mwc;
pub use provider::{Provider, ProviderSet};
pub use report::{RunReport, StressorSummary};
pub use shared::{SharedRegion, StressState};
pub use status::ExitStatus;
