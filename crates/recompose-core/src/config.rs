use serde::{Deserialize, Serialize};

use crate::{Error, Result, Size};

/// Runtime tunables.
///
/// Parsed from JSON with camelCase keys, e.g. `{ "maxCascadeIterations": 8 }`.
/// Missing keys keep their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// Caps same-turn re-invalidation passes before an
    /// [`Error::UnboundedInvalidation`] diagnostic is raised.
    pub max_cascade_iterations: usize,
    /// Stale reads and unknown cells panic when set; otherwise they are logged
    /// and the committed value is returned untracked.
    pub strict_reads: bool,
    /// Worker threads of the shared effect pool, used when no tokio runtime is
    /// current at construction time. Only the first runtime to start the pool
    /// decides its size.
    pub effect_worker_threads: usize,
    /// Bounds handed to outermost layout scopes.
    pub viewport: Size,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_cascade_iterations: 100,
            strict_reads: cfg!(debug_assertions),
            effect_worker_threads: 2,
            viewport: Size {
                width: 1280.0,
                height: 800.0,
            },
        }
    }
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: RuntimeConfig =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cascade_iterations == 0 {
            return Err(Error::Config(
                "maxCascadeIterations must be at least 1".into(),
            ));
        }
        if self.effect_worker_threads == 0 {
            return Err(Error::Config(
                "effectWorkerThreads must be at least 1".into(),
            ));
        }
        if !(self.viewport.width >= 0.0 && self.viewport.height >= 0.0) {
            return Err(Error::Config("viewport must be non-negative".into()));
        }
        Ok(())
    }

    pub fn with_max_cascade_iterations(mut self, n: usize) -> Self {
        self.max_cascade_iterations = n;
        self
    }

    pub fn with_strict_reads(mut self, strict: bool) -> Self {
        self.strict_reads = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_json() {
        let cfg = RuntimeConfig::from_json(r#"{ "maxCascadeIterations": 8 }"#).unwrap();
        assert_eq!(cfg.max_cascade_iterations, 8);
        assert_eq!(cfg.effect_worker_threads, 2);
        assert_eq!(cfg.viewport.width, 1280.0);
    }

    #[test]
    fn rejects_zero_cap() {
        let err = RuntimeConfig::from_json(r#"{ "maxCascadeIterations": 0 }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            RuntimeConfig::from_json("{ nope"),
            Err(Error::Config(_))
        ));
    }
}
