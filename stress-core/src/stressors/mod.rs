// stress-core/src/stressors/mod.rs
// Stressor catalogue

mod cpu;
mod dirent;
mod fork;
mod full;
mod mmap;
mod sigsegv;

pub use cpu::Cpu;
pub use dirent::Dirent;
pub use fork::Fork;
pub use full::Full;
pub use mmap::Mmap;
pub use sigsegv::Sigsegv;

use crate::error::*;
use crate::harness::Stressor;

/// Every built-in stressor, in listing order
pub fn registry() -> Vec<Box<dyn Stressor>> {
    vec![
        Box::new(Cpu),
        Box::new(Dirent),
        Box::new(Fork),
        Box::new(Full),
        Box::new(Mmap),
        Box::new(Sigsegv),
    ]
}

pub fn names() -> Vec<&'static str> {
    registry().iter().map(|s| s.name()).collect()
}

pub fn find(name: &str) -> Result<Box<dyn Stressor>> {
    registry()
        .into_iter()
        .find(|s| s.name() == name)
        .ok_or_else(|| StressError::UnknownStressor(name.to_string()))
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::config::StressorOptions;
    use crate::context::{InstanceParams, StressContext};
    use crate::harness::{execute, Stressor};
    use crate::shared::SharedRegion;
    use crate::status::ExitStatus;

    /// Run `stressor` for `ops` bogo ops on a private region
    pub fn run_bounded(stressor: &dyn Stressor, ops: u64, options: StressorOptions) -> (ExitStatus, u64, SharedRegion) {
        let region = SharedRegion::new(1).unwrap();
        let params = InstanceParams {
            stressor: stressor.name(),
            instance: 0,
            instances: 1,
            max_ops: ops,
            verify: true,
            failure_threshold: 0,
            check_interrupt: false,
        };
        let (status, bogo) = {
            let mut ctx = StressContext::new(params, &region, 0, &options);
            let status = execute(stressor, &mut ctx);
            (status, ctx.bogo_get())
        };
        (status, bogo, region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_names_unique() {
        let names = names();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
        assert!(names.contains(&"cpu"));
    }

    #[test]
    fn test_find() {
        assert_eq!(find("mmap").unwrap().name(), "mmap");
        assert!(matches!(find("nope"), Err(StressError::UnknownStressor(_))));
    }
}
