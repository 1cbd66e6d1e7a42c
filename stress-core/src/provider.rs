// stress-core/src/provider.rs
// Alternative implementations of one facility, tried in randomized order

use crate::error::*;
use crate::mwc::Mwc;
use tracing::{debug, info};

/// One way of performing an operation, e.g. `getdents64` vs `readdir`
pub trait Provider<I: ?Sized, O>: Send {
    fn name(&self) -> &'static str;

    /// Cheap static availability check, consulted once at construction
    fn available(&self) -> bool {
        true
    }

    fn call(&self, input: &I) -> Result<O>;
}

/// Ordered list of providers with permanent removal of unavailable ones
pub struct ProviderSet<I: ?Sized, O> {
    providers: Vec<Box<dyn Provider<I, O>>>,
}

impl<I: ?Sized, O> ProviderSet<I, O> {
    pub fn new(providers: Vec<Box<dyn Provider<I, O>>>) -> Self {
        let providers: Vec<_> = providers
            .into_iter()
            .filter(|p| {
                let ok = p.available();
                if !ok {
                    debug!("provider {} not available", p.name());
                }
                ok
            })
            .collect();
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Invoke a randomly chosen provider. Providers failing with an
    /// environment-absent error are dropped for good and the next one is
    /// tried; any other error is returned to the caller.
    pub fn call(&mut self, mwc: &mut Mwc, input: &I) -> Result<(&'static str, O)> {
        while !self.providers.is_empty() {
            let idx = mwc.pick(self.providers.len());
            let provider = &self.providers[idx];
            match provider.call(input) {
                Ok(out) => return Ok((provider.name(), out)),
                Err(e) if e.error_class() == ErrorClass::EnvironmentAbsent => {
                    info!("provider {} unavailable ({}), removing it", provider.name(), e);
                    self.providers.remove(idx);
                }
                Err(e) => return Err(e),
            }
        }
        Err(StressError::unavailable("provider", "no implementation left"))
    }
}
