//! Server options.
//!
//! [`Opt`] is built in code or loaded from a TOML file. Every field has a
//! default, so a file only lists what it changes:
//!
//! ```toml
//! addr = "0.0.0.0:9000"
//! header_length = 4
//! byte_order = "big"
//! max_packet_size = 6000
//! idle_timeout_secs = 120
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FramewireError, Result};
use crate::protocol::{ByteOrder, LengthCodec};
use crate::writer::{WriterConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITE_TIMEOUT};

/// Default dispatch tasks in flight per connection.
pub const DEFAULT_MAX_CONCURRENT_DISPATCH: usize = 256;

/// Options shared by every connection of a server.
#[derive(Debug, Clone, Deserialize)]
pub struct Opt {
    /// Listen address.
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Length header width in bytes: 1, 2, 4 or 8.
    #[serde(default = "default_header_length")]
    pub header_length: u8,
    /// Byte order of the length header and protocol id.
    #[serde(default)]
    pub byte_order: ByteOrder,
    /// Maximum body length (protocol id + payload) in either direction.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// Idle read timeout in seconds; re-armed before every header and body read.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Deadline for one socket write, in seconds.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Outbound queue capacity per connection.
    #[serde(default = "default_write_queue_capacity")]
    pub write_queue_capacity: usize,
    /// Dispatch tasks in flight per connection; 0 means unbounded.
    #[serde(default = "default_max_concurrent_dispatch")]
    pub max_concurrent_dispatch: usize,
}

impl Default for Opt {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            header_length: default_header_length(),
            byte_order: ByteOrder::default(),
            max_packet_size: default_max_packet_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
            write_timeout_secs: default_write_timeout_secs(),
            write_queue_capacity: default_write_queue_capacity(),
            max_concurrent_dispatch: default_max_concurrent_dispatch(),
        }
    }
}

fn default_addr() -> String {
    "0.0.0.0:9000".to_string()
}

fn default_header_length() -> u8 {
    4
}

fn default_max_packet_size() -> usize {
    6000
}

fn default_idle_timeout_secs() -> u64 {
    120
}

fn default_write_timeout_secs() -> u64 {
    DEFAULT_WRITE_TIMEOUT.as_secs()
}

fn default_write_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_max_concurrent_dispatch() -> usize {
    DEFAULT_MAX_CONCURRENT_DISPATCH
}

impl Opt {
    /// Parse options from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| FramewireError::Config(e.to_string()))
    }

    /// Load options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            FramewireError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Check the options before serving.
    ///
    /// # Errors
    ///
    /// `InvalidHeaderLength` for a header width other than 1, 2, 4 or 8;
    /// `Config` for a zero idle timeout, write timeout or queue capacity.
    pub fn validate(&self) -> Result<()> {
        self.codec()?;
        if self.idle_timeout_secs == 0 {
            return Err(FramewireError::Config("idle_timeout_secs must be > 0".into()));
        }
        if self.write_timeout_secs == 0 {
            return Err(FramewireError::Config("write_timeout_secs must be > 0".into()));
        }
        if self.write_queue_capacity == 0 {
            return Err(FramewireError::Config("write_queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Build the length codec for these options.
    pub fn codec(&self) -> Result<LengthCodec> {
        LengthCodec::new(self.header_length, self.byte_order)
    }

    /// Largest body accepted or sent: the configured maximum, capped by
    /// what the header width can express.
    pub fn max_body(&self, codec: &LengthCodec) -> usize {
        let cap = usize::try_from(codec.max_length()).unwrap_or(usize::MAX);
        self.max_packet_size.min(cap)
    }

    /// Idle read timeout.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Per-write deadline.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub(crate) fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            queue_capacity: self.write_queue_capacity,
            write_timeout: self.write_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_opt() {
        let opt = Opt::default();
        assert_eq!(opt.addr, "0.0.0.0:9000");
        assert_eq!(opt.header_length, 4);
        assert_eq!(opt.byte_order, ByteOrder::Big);
        assert_eq!(opt.max_packet_size, 6000);
        assert_eq!(opt.idle_timeout(), Duration::from_secs(120));
        assert_eq!(opt.write_timeout(), Duration::from_secs(15));
        assert_eq!(opt.write_queue_capacity, 4096);
        assert!(opt.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let opt = Opt::from_toml_str(
            r#"
            addr = "127.0.0.1:7000"
            header_length = 2
            byte_order = "little"
            "#,
        )
        .unwrap();

        assert_eq!(opt.addr, "127.0.0.1:7000");
        assert_eq!(opt.header_length, 2);
        assert_eq!(opt.byte_order, ByteOrder::Little);
        assert_eq!(opt.max_packet_size, 6000);
        assert_eq!(opt.idle_timeout_secs, 120);
    }

    #[test]
    fn test_parse_empty_toml_is_default() {
        let opt = Opt::from_toml_str("").unwrap();
        assert_eq!(opt.header_length, 4);
        assert_eq!(opt.max_concurrent_dispatch, DEFAULT_MAX_CONCURRENT_DISPATCH);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = Opt::from_toml_str("header_length = \"four\"").unwrap_err();
        assert!(matches!(err, FramewireError::Config(_)));
    }

    #[test]
    fn test_validate_header_length() {
        let opt = Opt {
            header_length: 3,
            ..Opt::default()
        };
        assert!(matches!(
            opt.validate(),
            Err(FramewireError::InvalidHeaderLength(3))
        ));
    }

    #[test]
    fn test_validate_zero_values() {
        let opt = Opt {
            write_queue_capacity: 0,
            ..Opt::default()
        };
        assert!(opt.validate().is_err());

        let opt = Opt {
            idle_timeout_secs: 0,
            ..Opt::default()
        };
        assert!(opt.validate().is_err());
    }

    #[test]
    fn test_max_body_capped_by_header_width() {
        let opt = Opt {
            header_length: 1,
            max_packet_size: 6000,
            ..Opt::default()
        };
        let codec = opt.codec().unwrap();
        assert_eq!(opt.max_body(&codec), 255);

        let opt = Opt::default();
        assert_eq!(opt.max_body(&opt.codec().unwrap()), 6000);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Opt::load("/nonexistent/framewire.toml").unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
