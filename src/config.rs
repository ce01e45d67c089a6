use serde::{Deserialize, Serialize};

use crate::error::RunError;

/// Default number of bytes a relay pipe keeps in memory before spilling
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 128 * 1024;

/// Default capacity of the queue between line scanning and line aggregation
pub const DEFAULT_LINE_CHANNEL_CAPACITY: usize = 64;

/// Buffering configuration for a single command output.
///
/// Passed explicitly to [`Command::config`](crate::Command::config); there is
/// no process-wide knob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Bytes held in memory by a relay pipe. Anything written beyond this
    /// while the reader lags behind goes to an anonymous temp file.
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,

    /// Lines queued between the scanning task and the aggregating task
    #[serde(default = "default_line_channel_capacity")]
    pub line_channel_capacity: usize,
}

fn default_max_buffer_size() -> usize {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_line_channel_capacity() -> usize {
    DEFAULT_LINE_CHANNEL_CAPACITY
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            line_channel_capacity: DEFAULT_LINE_CHANNEL_CAPACITY,
        }
    }
}

impl OutputConfig {
    pub fn with_max_buffer_size(mut self, bytes: usize) -> Self {
        self.max_buffer_size = bytes;
        self
    }

    pub fn with_line_channel_capacity(mut self, lines: usize) -> Self {
        self.line_channel_capacity = lines;
        self
    }

    pub fn validate(&self) -> Result<(), RunError> {
        if self.max_buffer_size == 0 {
            return Err(RunError::Build(
                "max_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.line_channel_capacity == 0 {
            return Err(RunError::Build(
                "line_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OutputConfig::default();
        assert_eq!(config.max_buffer_size, 128 * 1024);
        assert_eq!(config.line_channel_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: OutputConfig = serde_json::from_str(r#"{"max_buffer_size": 1024}"#).unwrap();
        assert_eq!(config.max_buffer_size, 1024);
        assert_eq!(config.line_channel_capacity, DEFAULT_LINE_CHANNEL_CAPACITY);
    }

    #[test]
    fn test_validate_rejects_zero() {
        let err = OutputConfig::default()
            .with_max_buffer_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, RunError::Build(_)));

        let err = OutputConfig::default()
            .with_line_channel_capacity(0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("line_channel_capacity"));
    }
}
