//! Environment variable access behind a trait, so configuration can be
//! resolved from a fake environment in tests.

use std::env::VarError;

/// Read-only view of process environment variables.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, VarError>;
}

/// Delegates to `std::env`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    #[inline]
    fn var(&self, key: &str) -> Result<String, VarError> {
        std::env::var(key)
    }
}

/// Environment backed by a map; never touches the process environment.
///
/// Guarded by a `Mutex` so it can be shared with multi-threaded tokio tests.
#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
pub struct InMemoryEnv {
    vars: std::sync::Mutex<std::collections::HashMap<String, String>>,
}

#[cfg(any(test, feature = "test-support"))]
impl InMemoryEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.lock().unwrap().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.vars.lock().unwrap().remove(key);
    }
}

#[cfg(any(test, feature = "test-support"))]
impl ReadEnv for InMemoryEnv {
    fn var(&self, key: &str) -> Result<String, VarError> {
        self.vars
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or(VarError::NotPresent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_env_matches_std() {
        assert_eq!(SystemEnv.var("PATH").is_ok(), std::env::var("PATH").is_ok());
    }

    #[test]
    fn in_memory_env_set_get_remove() {
        let env = InMemoryEnv::new();
        env.set("NATSGATE_TEST", "1");
        assert_eq!(env.var("NATSGATE_TEST").unwrap(), "1");

        env.remove("NATSGATE_TEST");
        assert!(matches!(env.var("NATSGATE_TEST"), Err(VarError::NotPresent)));
    }
}
