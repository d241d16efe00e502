//! Copying job configuration.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Default size of each of the two transfer buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 2 * 1024 * 1024;

/// Smallest accepted transfer buffer.
pub const MIN_BUFFER_SIZE: usize = 4096;

/// Whether sources are kept or removed after transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    #[default]
    Copy,
    Move,
}

/// What to do when a file already exists at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExistBehavior {
    /// Ask the resolver for every collision.
    #[default]
    Ask,
    SkipAll,
    OverwriteAll,
    /// Overwrite only when the destination is older than the source.
    OverwriteOlder,
    AppendAll,
    /// Write under an automatically chosen free name.
    KeepBoth,
}

/// When to verify written data against a checksum of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChecksumVerification {
    #[default]
    Never,
    WhenMoves,
    Always,
}

/// Configuration snapshot taken when a copying job starts.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct CopyingOptions {
    /// Copy or move.
    #[builder(default)]
    #[serde(default)]
    pub mode: TransferMode,

    /// Default collision policy.
    #[builder(default)]
    #[serde(default)]
    pub exist_behavior: ExistBehavior,

    /// Post-copy checksum verification.
    #[builder(default)]
    #[serde(default)]
    pub verification: ChecksumVerification,

    /// Copy extended attributes.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub copy_xattrs: bool,

    /// Copy modification times.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub copy_file_times: bool,

    /// Copy unix permission bits.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub copy_unix_permissions: bool,

    /// Allow unlinking destination entries (overwriting, dropping partial files).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub allow_destination_unlink: bool,

    /// Dock into an existing same-named directory instead of reporting a collision.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub merge_directories: bool,

    /// Size of each of the two transfer buffers.
    #[builder(default = "DEFAULT_BUFFER_SIZE")]
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Compare total size with free space on the destination before copying.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub check_free_space: bool,
}

fn default_true() -> bool {
    true
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl CopyingOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.buffer_size {
            if size < MIN_BUFFER_SIZE {
                return Err(format!(
                    "Buffer size must be at least {MIN_BUFFER_SIZE} bytes"
                ));
            }
        }
        Ok(())
    }
}

impl CopyingOptions {
    /// Create a new options builder.
    pub fn builder() -> CopyingOptionsBuilder {
        CopyingOptionsBuilder::default()
    }

    /// Default options for a copy.
    pub fn copy() -> Self {
        Self::default()
    }

    /// Default options for a move.
    pub fn move_items() -> Self {
        Self {
            mode: TransferMode::Move,
            ..Self::default()
        }
    }

    pub fn is_move(&self) -> bool {
        self.mode == TransferMode::Move
    }

    /// Check if written files need a checksum expectation.
    pub fn should_verify(&self) -> bool {
        match self.verification {
            ChecksumVerification::Never => false,
            ChecksumVerification::WhenMoves => self.is_move(),
            ChecksumVerification::Always => true,
        }
    }

    /// Buffer size clamped to the accepted minimum.
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(MIN_BUFFER_SIZE)
    }
}

impl Default for CopyingOptions {
    fn default() -> Self {
        Self {
            mode: TransferMode::Copy,
            exist_behavior: ExistBehavior::Ask,
            verification: ChecksumVerification::Never,
            copy_xattrs: true,
            copy_file_times: true,
            copy_unix_permissions: true,
            allow_destination_unlink: true,
            merge_directories: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            check_free_space: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_builder() {
        let options = CopyingOptions::builder()
            .mode(TransferMode::Move)
            .verification(ChecksumVerification::WhenMoves)
            .buffer_size(8192usize)
            .build()
            .unwrap();

        assert!(options.is_move());
        assert!(options.should_verify());
        assert_eq!(options.buffer_size, 8192);
        assert!(options.copy_xattrs);
    }

    #[test]
    fn test_builder_rejects_tiny_buffer() {
        let result = CopyingOptions::builder().buffer_size(16usize).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_verification_policy() {
        let mut options = CopyingOptions::copy();
        assert!(!options.should_verify());

        options.verification = ChecksumVerification::WhenMoves;
        assert!(!options.should_verify());

        options.verification = ChecksumVerification::Always;
        assert!(options.should_verify());
    }

    #[test]
    fn test_serde_defaults() {
        let options: CopyingOptions = serde_json::from_str(r#"{"mode":"move"}"#).unwrap();
        assert!(options.is_move());
        assert_eq!(options.buffer_size, DEFAULT_BUFFER_SIZE);
        assert!(options.merge_directories);
        assert_eq!(options.exist_behavior, ExistBehavior::Ask);
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!("overwrite_older".parse::<ExistBehavior>().unwrap(), ExistBehavior::OverwriteOlder);
        assert_eq!(TransferMode::Move.to_string(), "move");
    }
}
