use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{CoreError, Result};

pub use smbd_diagnostics::Diagnostics;

type Factory = Box<dyn Fn() -> Arc<dyn Diagnostics> + Send + Sync>;

/// Maps symbolic sink names to factory closures built once at startup.
/// Unknown names are a `CoreError`, not a silent no-op sink.
#[derive(Default)]
pub struct DiagnosticsRegistry {
    factories: HashMap<String, Factory>,
}

impl DiagnosticsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Arc<dyn Diagnostics> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn build(&self, name: &str) -> Result<Arc<dyn Diagnostics>> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| CoreError::UnknownDiagnosticsSink(name.to_string()))
    }
}

/// A sink that just forwards to `log::debug!`, registered under `"log"`
/// by [`DiagnosticsRegistry::with_defaults`].
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn record(&self, message: &str) {
        log::debug!(target: "smbd::diagnostics", "{message}");
    }
}

impl DiagnosticsRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("log", || Arc::new(LogDiagnostics));
        registry
    }
}
