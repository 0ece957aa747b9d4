//! Utility module for avfeed
//!
//! This module provides common utilities used throughout the crate:
//! - Error handling with custom error types
//! - Configuration management
//! - Small formatting helpers

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{Config, FilterConfig, OutputConfig, OverlayConfig, PipelineConfig, SourceConfig};
pub use error::{AvFeedError, Result};

/// Initialize the application configuration
///
/// Loads defaults, the system and user configuration files and `AVFEED_*`
/// environment overrides, then validates the result.
pub fn load_config() -> Result<Config> {
    Config::load()
}

/// Format a position in whole seconds as "HH:MM:SS"
///
/// Negative positions clamp to zero. Hours are not wrapped, so very long
/// sources print more than two hour digits.
pub fn format_timestamp(total_secs: i64) -> String {
    let total_secs = total_secs.max(0);
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "00:00:00");
        assert_eq!(format_timestamp(59), "00:00:59");
        assert_eq!(format_timestamp(60), "00:01:00");
        assert_eq!(format_timestamp(3599), "00:59:59");
        assert_eq!(format_timestamp(3600), "01:00:00");
        assert_eq!(format_timestamp(7325), "02:02:05");
        assert_eq!(format_timestamp(-5), "00:00:00");
    }
}
