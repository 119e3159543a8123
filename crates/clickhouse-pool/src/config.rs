//! Pool configuration.

use crate::error::PoolError;

/// Default minimum pool size.
pub const DEFAULT_MINSIZE: usize = 1;
/// Default maximum pool size.
pub const DEFAULT_MAXSIZE: usize = 10;

/// Size bounds for a [`Pool`](crate::Pool).
///
/// `minsize` connections are created eagerly when the pool opens;
/// the pool grows on demand up to `maxsize` and never beyond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of connections created at pool open.
    pub minsize: usize,
    /// Hard ceiling on live connections.
    pub maxsize: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            minsize: DEFAULT_MINSIZE,
            maxsize: DEFAULT_MAXSIZE,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with default sizes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum pool size.
    #[must_use]
    pub fn minsize(mut self, minsize: usize) -> Self {
        self.minsize = minsize;
        self
    }

    /// Set the maximum pool size.
    #[must_use]
    pub fn maxsize(mut self, maxsize: usize) -> Self {
        self.maxsize = maxsize;
        self
    }

    /// Reject impossible size combinations.
    ///
    /// # Errors
    ///
    /// [`PoolError::Config`] when `maxsize` is zero or `minsize`
    /// exceeds `maxsize`.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.maxsize == 0 {
            return Err(PoolError::Config(
                "maxsize is expected to be greater than zero".to_string(),
            ));
        }
        if self.minsize > self.maxsize {
            return Err(PoolError::Config(
                "minsize is greater than maxsize".to_string(),
            ));
        }
        Ok(())
    }
}
