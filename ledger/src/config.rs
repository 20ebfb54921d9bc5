//! Ledger configuration.

use std::time::Duration;

use depot_common::{DepotError, Result};

use crate::movement::Page;

/// Retry and pagination settings of the ledger facade.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Retries of a movement after a transient failure.
    pub max_tx_retries: u32,
    /// Backoff step; the n-th retry waits n steps.
    pub retry_backoff: Duration,
    /// Page size used when a listing names none.
    pub default_page_size: u32,
    /// Largest page a listing may ask for.
    pub max_page_size: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_tx_retries: 3,
            retry_backoff: Duration::from_millis(50),
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(retries) = std::env::var("DEPOT_MAX_TX_RETRIES") {
            if let Ok(retries) = retries.parse() {
                config.max_tx_retries = retries;
            }
        }

        if let Ok(backoff) = std::env::var("DEPOT_RETRY_BACKOFF_MS") {
            if let Ok(ms) = backoff.parse() {
                config.retry_backoff = Duration::from_millis(ms);
            }
        }

        if let Ok(size) = std::env::var("DEPOT_DEFAULT_PAGE_SIZE") {
            if let Ok(size) = size.parse() {
                config.default_page_size = size;
            }
        }

        if let Ok(size) = std::env::var("DEPOT_MAX_PAGE_SIZE") {
            if let Ok(size) = size.parse() {
                config.max_page_size = size;
            }
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_page_size == 0 {
            return Err("Max page size cannot be 0".to_string());
        }

        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err("Default page size must be between 1 and the max page size".to_string());
        }

        Ok(())
    }

    /// Resolve listing parameters into a page.
    pub fn page(&self, limit: Option<u32>, offset: Option<u32>) -> Result<Page> {
        let limit = limit.unwrap_or(self.default_page_size);
        if limit == 0 || limit > self.max_page_size {
            return Err(DepotError::InvalidPage(format!(
                "limit must be between 1 and {}, got {limit}",
                self.max_page_size
            )));
        }

        Ok(Page {
            limit,
            offset: offset.unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page(None, None).unwrap(), Page { limit: 50, offset: 0 });
    }

    #[test]
    fn test_invalid_config() {
        let mut config = LedgerConfig::default();
        config.default_page_size = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_page_bounds() {
        let config = LedgerConfig::default();
        assert!(matches!(config.page(Some(0), None), Err(DepotError::InvalidPage(_))));
        assert!(matches!(config.page(Some(501), None), Err(DepotError::InvalidPage(_))));
        assert_eq!(config.page(Some(500), Some(20)).unwrap(), Page { limit: 500, offset: 20 });
    }
}
