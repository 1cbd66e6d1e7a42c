// stress-core/src/config_validation.rs
// Configuration validation against the host's resources

use crate::config::RunConfig;
use crate::error::*;
use crate::system;
use std::fmt;
use tracing::{debug, info, warn};

/// Instances per online CPU above which the run is mostly scheduler noise
const MAX_INSTANCES_PER_CPU: u64 = 4;

/// Configuration validator with named rules
pub struct ConfigValidator {
    system_constraints: SystemConstraints,
    known_stressors: Vec<&'static str>,
    validation_rules: Vec<ValidationRule>,
}

/// Host resources detected at runtime
#[derive(Debug, Clone)]
pub struct SystemConstraints {
    pub total_memory_mb: u64,
    pub available_memory_mb: u64,
    pub cpu_cores: u64,
    pub page_size: u64,
    pub kernel_release: String,
    pub is_root: bool,
}

impl SystemConstraints {
    pub fn detect() -> Self {
        let total_memory_mb = system::phys_mem_bytes() / (1024 * 1024);
        let available_memory_mb = system::available_mem_bytes()
            .map(|b| b / (1024 * 1024))
            .unwrap_or(total_memory_mb / 2);
        Self {
            total_memory_mb,
            available_memory_mb,
            cpu_cores: system::online_cpus() as u64,
            page_size: system::page_size() as u64,
            kernel_release: system::kernel_release(),
            is_root: system::is_root(),
        }
    }
}

/// Configuration validation rule
#[derive(Debug, Clone)]
pub struct ValidationRule {
    pub name: &'static str,
    pub description: &'static str,
    pub validator: fn(&RunConfig, &SystemConstraints, &[&str]) -> ValidationResult,
    pub severity: ValidationSeverity,
}

/// Result of one rule
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub field: &'static str,
    pub message: String,
    pub suggested_value: Option<ConfigValue>,
}

impl ValidationResult {
    fn ok(field: &'static str) -> Self {
        Self {
            is_valid: true,
            field,
            message: String::new(),
            suggested_value: None,
        }
    }

    fn invalid(field: &'static str, message: String) -> Self {
        Self {
            is_valid: false,
            field,
            message,
            suggested_value: None,
        }
    }

    fn suggest(mut self, value: ConfigValue) -> Self {
        self.suggested_value = Some(value);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    U64(u64),
    USize(usize),
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::U64(v) => write!(f, "{}", v),
            ConfigValue::USize(v) => write!(f, "{}", v),
        }
    }
}

/// Validation severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub suggestions: Vec<ConfigSuggestion>,
}

impl ValidationReport {
    /// First Error-or-worse issue as a configuration error
    pub fn into_result(self) -> Result<()> {
        match self
            .issues
            .into_iter()
            .find(|i| i.severity >= ValidationSeverity::Error)
        {
            Some(issue) => Err(StressError::Config {
                field: issue.field.to_string(),
                message: issue.message,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub rule_name: &'static str,
    pub severity: ValidationSeverity,
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ConfigSuggestion {
    pub field: &'static str,
    pub suggested_value: ConfigValue,
    pub reason: String,
}

impl ConfigValidator {
    pub fn new(known_stressors: Vec<&'static str>) -> Self {
        Self::with_constraints(SystemConstraints::detect(), known_stressors)
    }

    pub fn with_constraints(system_constraints: SystemConstraints, known_stressors: Vec<&'static str>) -> Self {
        let validation_rules = Self::create_validation_rules();
        debug!(
            "config validator: {} rules, constraints {:?}",
            validation_rules.len(),
            system_constraints
        );
        Self {
            system_constraints,
            known_stressors,
            validation_rules,
        }
    }

    pub fn validate(&self, config: &RunConfig) -> ValidationReport {
        let mut issues = Vec::new();
        let mut suggestions = Vec::new();

        for rule in &self.validation_rules {
            let result = (rule.validator)(config, &self.system_constraints, &self.known_stressors);

            if !result.is_valid {
                match rule.severity {
                    ValidationSeverity::Info => info!("{}: {}", rule.name, result.message),
                    ValidationSeverity::Warning => warn!("{}: {}", rule.name, result.message),
                    _ => debug!("{}: {}", rule.name, result.message),
                }
                issues.push(ValidationIssue {
                    rule_name: rule.name,
                    severity: rule.severity,
                    field: result.field,
                    message: result.message.clone(),
                });
            }

            if let Some(suggested_value) = result.suggested_value {
                info!("suggested {} = {}", result.field, suggested_value);
                suggestions.push(ConfigSuggestion {
                    field: result.field,
                    suggested_value,
                    reason: result.message,
                });
            }
        }

        let is_valid = issues.iter().all(|i| i.severity < ValidationSeverity::Error);
        ValidationReport {
            is_valid,
            issues,
            suggestions,
        }
    }

    /// Copy of `config` with every suggestion applied
    pub fn apply_suggestions(&self, config: &RunConfig, report: &ValidationReport) -> RunConfig {
        let mut tuned = config.clone();
        for suggestion in &report.suggestions {
            match (suggestion.field, &suggestion.suggested_value) {
                ("options.mmap_bytes", ConfigValue::USize(v)) => tuned.options.mmap_bytes = *v,
                ("failure_threshold", ConfigValue::U64(v)) => tuned.failure_threshold = *v,
                _ => {}
            }
        }
        tuned
    }

    fn create_validation_rules() -> Vec<ValidationRule> {
        vec![
            ValidationRule {
                name: "stressors_present",
                description: "At least one stressor must be selected",
                validator: |config, _, _| {
                    if config.stressors.is_empty() {
                        ValidationResult::invalid("stressors", "no stressors selected".to_string())
                    } else {
                        ValidationResult::ok("stressors")
                    }
                },
                severity: ValidationSeverity::Error,
            },
            ValidationRule {
                name: "stressors_known",
                description: "Every stressor name must exist",
                validator: |config, _, known| {
                    match config.stressors.iter().find(|s| !known.iter().any(|k| *k == s.name)) {
                        Some(s) => ValidationResult::invalid(
                            "stressors",
                            format!("unknown stressor '{}', available: {}", s.name, known.join(", ")),
                        ),
                        None => ValidationResult::ok("stressors"),
                    }
                },
                severity: ValidationSeverity::Error,
            },
            ValidationRule {
                name: "instance_count",
                description: "Each stressor needs at least one instance",
                validator: |config, _, _| match config.stressors.iter().find(|s| s.instances == 0) {
                    Some(s) => ValidationResult::invalid(
                        "stressors.instances",
                        format!("stressor '{}' has zero instances", s.name),
                    ),
                    None => ValidationResult::ok("stressors.instances"),
                },
                severity: ValidationSeverity::Error,
            },
            ValidationRule {
                name: "run_bounded",
                description: "A run needs a timeout or an op bound on every stressor",
                validator: |config, _, _| {
                    let unbounded = config.stressors.iter().find(|s| s.ops == 0);
                    match (config.timeout_secs, unbounded) {
                        (None, Some(s)) => ValidationResult::invalid(
                            "timeout",
                            format!("no timeout and stressor '{}' has no op bound, the run would never end", s.name),
                        ),
                        (Some(0), _) => ValidationResult::invalid("timeout", "timeout must be at least 1 second".to_string()),
                        _ => ValidationResult::ok("timeout"),
                    }
                },
                severity: ValidationSeverity::Error,
            },
            ValidationRule {
                name: "instances_vs_cpus",
                description: "Instance count should stay within a small multiple of the CPU count",
                validator: |config, constraints, _| {
                    let limit = constraints.cpu_cores.max(1) * MAX_INSTANCES_PER_CPU;
                    let total = config.total_instances();
                    if total > limit {
                        ValidationResult::invalid(
                            "stressors.instances",
                            format!("{} instances on {} CPUs, expect heavy scheduler contention", total, constraints.cpu_cores),
                        )
                    } else {
                        ValidationResult::ok("stressors.instances")
                    }
                },
                severity: ValidationSeverity::Warning,
            },
            ValidationRule {
                name: "mmap_vs_memory",
                description: "Anonymous mappings should fit in half of the available memory",
                validator: |config, constraints, _| {
                    let mmap_instances: u64 = config
                        .stressors
                        .iter()
                        .filter(|s| s.name == "mmap")
                        .map(|s| s.instances as u64)
                        .sum();
                    if mmap_instances == 0 {
                        return ValidationResult::ok("options.mmap_bytes");
                    }
                    let budget = constraints.available_memory_mb * 1024 * 1024 / 2;
                    let wanted = config.options.mmap_bytes as u64 * mmap_instances;
                    if wanted > budget {
                        let per_instance = (budget / mmap_instances / constraints.page_size.max(1))
                            * constraints.page_size.max(1);
                        ValidationResult::invalid(
                            "options.mmap_bytes",
                            format!(
                                "{} mmap instances of {} bytes exceed half of the {} MB available",
                                mmap_instances, config.options.mmap_bytes, constraints.available_memory_mb
                            ),
                        )
                        .suggest(ConfigValue::USize(per_instance.max(constraints.page_size) as usize))
                    } else {
                        ValidationResult::ok("options.mmap_bytes")
                    }
                },
                severity: ValidationSeverity::Warning,
            },
            ValidationRule {
                name: "failure_threshold",
                description: "A zero failure threshold never stops a failure storm",
                validator: |config, _, _| {
                    if config.failure_threshold == 0 {
                        ValidationResult::invalid(
                            "failure_threshold",
                            "failure threshold disabled, a failing stressor will log until the timeout".to_string(),
                        )
                        .suggest(ConfigValue::U64(crate::config::DEFAULT_FAILURE_THRESHOLD))
                    } else {
                        ValidationResult::ok("failure_threshold")
                    }
                },
                severity: ValidationSeverity::Warning,
            },
            ValidationRule {
                name: "privileges",
                description: "Some stressors exercise more paths as root",
                validator: |_, constraints, _| {
                    if constraints.is_root {
                        ValidationResult::invalid("mode", "running as root, stressors may touch privileged paths".to_string())
                    } else {
                        ValidationResult::ok("mode")
                    }
                },
                severity: ValidationSeverity::Info,
            },
        ]
    }
}
