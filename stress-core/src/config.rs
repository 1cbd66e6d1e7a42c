// stress-core/src/config.rs
// Run configuration: which stressors, how many, for how long

use crate::error::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Global failure count after which every instance is stopped
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub stressors: Vec<StressorSpec>,
    /// Seconds; `None` runs until every stressor reaches its op bound
    #[serde(rename = "timeout")]
    pub timeout_secs: Option<u64>,
    pub mode: InstanceMode,
    /// Explicit `[w, z]` generator seed
    pub seed: Option<[u32; 2]>,
    pub no_rand_seed: bool,
    pub verify: bool,
    pub failure_threshold: u64,
    pub json_report: Option<PathBuf>,
    pub options: StressorOptions,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stressors: Vec::new(),
            timeout_secs: Some(60),
            mode: InstanceMode::Process,
            seed: None,
            no_rand_seed: false,
            verify: false,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            json_report: None,
            options: StressorOptions::default(),
        }
    }
}

impl RunConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| StressError::io(&format!("read {}", path.display()), e))?;
        let config = Self::from_toml_str(&content)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn total_instances(&self) -> u64 {
        self.stressors.iter().map(|s| s.instances as u64).sum()
    }
}

/// One `name[:instances]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StressorSpec {
    pub name: String,
    #[serde(default = "default_instances")]
    pub instances: u32,
    /// Bogo-op bound per instance, 0 for unbounded
    #[serde(default)]
    pub ops: u64,
}

fn default_instances() -> u32 {
    1
}

impl StressorSpec {
    pub fn new(name: impl Into<String>, instances: u32) -> Self {
        Self {
            name: name.into(),
            instances,
            ops: 0,
        }
    }
}

impl FromStr for StressorSpec {
    type Err = StressError;

    fn from_str(s: &str) -> Result<Self> {
        let (name, instances) = match s.split_once(':') {
            Some((name, count)) => {
                let instances = count.trim().parse::<u32>().map_err(|_| StressError::Config {
                    field: "stressor".to_string(),
                    message: format!("invalid instance count '{}' in '{}'", count, s),
                })?;
                (name, instances)
            }
            None => (s, 1),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(StressError::Config {
                field: "stressor".to_string(),
                message: format!("missing stressor name in '{}'", s),
            });
        }
        Ok(Self::new(name, instances))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceMode {
    /// One forked child per instance
    Process,
    /// One thread per instance in this process
    Thread,
}

impl fmt::Display for InstanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceMode::Process => f.write_str("process"),
            InstanceMode::Thread => f.write_str("thread"),
        }
    }
}

impl FromStr for InstanceMode {
    type Err = StressError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "process" | "fork" => Ok(InstanceMode::Process),
            "thread" | "threads" => Ok(InstanceMode::Thread),
            other => Err(StressError::Config {
                field: "mode".to_string(),
                message: format!("unknown mode '{}', expected process or thread", other),
            }),
        }
    }
}

/// Stressor tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StressorOptions {
    /// Upper bound on one anonymous mapping
    pub mmap_bytes: usize,
    pub dirent_files: usize,
    pub fork_children: u32,
    /// Points drawn per cpu op
    pub cpu_samples: u32,
}

impl Default for StressorOptions {
    fn default() -> Self {
        Self {
            mmap_bytes: 4 * 1024 * 1024,
            dirent_files: 256,
            fork_children: 8,
            cpu_samples: 16 * 1024,
        }
    }
}

/// Parse `W,Z` seed pairs as given on the command line
pub fn parse_seed(s: &str) -> Result<[u32; 2]> {
    let invalid = || StressError::Config {
        field: "seed".to_string(),
        message: format!("expected W,Z with two 32 bit integers, got '{}'", s),
    };
    let (w, z) = s.split_once(',').ok_or_else(invalid)?;
    let w = w.trim().parse::<u32>().map_err(|_| invalid())?;
    let z = z.trim().parse::<u32>().map_err(|_| invalid())?;
    Ok([w, z])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert!(config.stressors.is_empty());
        assert_eq!(config.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.mode, InstanceMode::Process);
        assert_eq!(config.failure_threshold, DEFAULT_FAILURE_THRESHOLD);
    }

    #[test]
    fn test_toml_roundtrip_fields() {
        let config = RunConfig::from_toml_str(
            r#"
            timeout = 5
            mode = "thread"
            seed = [1, 2]
            verify = true

            [[stressors]]
            name = "cpu"
            instances = 2
            ops = 100

            [[stressors]]
            name = "full"

            [options]
            dirent_files = 16
            "#,
        )
        .unwrap();

        assert_eq!(config.timeout_secs, Some(5));
        assert_eq!(config.mode, InstanceMode::Thread);
        assert_eq!(config.seed, Some([1, 2]));
        assert!(config.verify);
        assert_eq!(config.stressors.len(), 2);
        assert_eq!(config.stressors[0].ops, 100);
        assert_eq!(config.stressors[1].instances, 1);
        assert_eq!(config.total_instances(), 3);
        assert_eq!(config.options.dirent_files, 16);
        assert_eq!(config.options.fork_children, 8);
    }

    #[test]
    fn test_bad_toml_is_serialization_error() {
        let err = RunConfig::from_toml_str("mode = 3").unwrap_err();
        assert!(matches!(err, StressError::Serialization { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "timeout = 1\n[[stressors]]\nname = \"fork\"").unwrap();
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.stressors[0].name, "fork");

        assert!(RunConfig::load("/nonexistent/sysstress.toml").is_err());
    }

    #[test]
    fn test_stressor_spec_parse() {
        assert_eq!("cpu".parse::<StressorSpec>().unwrap(), StressorSpec::new("cpu", 1));
        assert_eq!("mmap:4".parse::<StressorSpec>().unwrap(), StressorSpec::new("mmap", 4));
        assert!("mmap:x".parse::<StressorSpec>().is_err());
        assert!(":2".parse::<StressorSpec>().is_err());
    }

    #[test]
    fn test_mode_and_seed_parse() {
        assert_eq!("Thread".parse::<InstanceMode>().unwrap(), InstanceMode::Thread);
        assert!("green".parse::<InstanceMode>().is_err());
        assert_eq!(parse_seed("12345, 67890").unwrap(), [12345, 67890]);
        assert!(parse_seed("12345").is_err());
        assert!(parse_seed("1,-2").is_err());
    }
}
