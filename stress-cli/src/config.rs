// stress-cli/src/config.rs
// Effective run configuration: optional TOML file plus command line overrides

use anyhow::{Context, Result};
use clap::ArgMatches;
use stress_core::config::{parse_seed, InstanceMode, RunConfig, StressorSpec};
use stress_core::config_validation::ConfigValidator;
use stress_core::stressors;
use tracing::{debug, info};

/// Build the run configuration from parsed arguments
pub fn resolve(matches: &ArgMatches) -> Result<RunConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => RunConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => RunConfig::default(),
    };

    if let Some(names) = matches.get_many::<String>("stressor") {
        config.stressors = names
            .map(|s| s.parse::<StressorSpec>())
            .collect::<stress_core::Result<Vec<_>>>()
            .context("parsing --stressor")?;
    }

    if let Some(ops) = matches.get_one::<u64>("ops") {
        for spec in &mut config.stressors {
            spec.ops = *ops;
        }
    }

    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.timeout_secs = (*timeout > 0).then_some(*timeout);
    }

    if let Some(mode) = matches.get_one::<String>("mode") {
        config.mode = mode.parse::<InstanceMode>().context("parsing --mode")?;
    }

    if let Some(seed) = matches.get_one::<String>("seed") {
        config.seed = Some(parse_seed(seed).context("parsing --seed")?);
    }

    if matches.get_flag("no-rand-seed") {
        config.no_rand_seed = true;
    }
    if matches.get_flag("verify") {
        config.verify = true;
    }
    if let Some(path) = matches.get_one::<String>("json") {
        config.json_report = Some(path.into());
    }

    debug!("effective configuration: {:?}", config);
    Ok(config)
}

/// Rewrite `config` with every suggestion the validator makes for this host
pub fn apply_suggestions(config: RunConfig) -> RunConfig {
    let validator = ConfigValidator::new(stressors::names());
    let report = validator.validate(&config);
    if report.suggestions.is_empty() {
        return config;
    }
    for suggestion in &report.suggestions {
        info!("using {} = {}: {}", suggestion.field, suggestion.suggested_value, suggestion.reason);
    }
    validator.apply_suggestions(&config, &report)
}
