use thiserror::Error;

/// Main error type for the split-compositor library
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("Input error: {0}")]
    Input(#[from] InputError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Render engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Loudness normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Audio processing error: {0}")]
    Audio(#[from] AudioError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

/// Asset and plan input errors
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Asset file not found: {path}")]
    AssetNotFound { path: String },

    #[error("Invalid metadata for asset '{asset_id}': {details}")]
    InvalidMetadata { asset_id: String, details: String },

    #[error("Duplicate asset id in catalog: {asset_id}")]
    DuplicateAsset { asset_id: String },

    #[error("Failed to probe {path}: {reason}")]
    ProbeFailed { path: String, reason: String },

    #[error("Unknown layout template: {layout}")]
    UnknownLayout { layout: String },

    #[error("Layout changed since '{pair_id}' was paired: {details}")]
    LayoutMismatch { pair_id: String, details: String },
}

/// Manifest and ledger errors
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Failed to parse manifest {path}: {reason}")]
    ParseFailed { path: String, reason: String },

    #[error("Failed to write manifest {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("Manifest is locked by another process: {path}")]
    Locked { path: String },

    #[error("Pair id already present in manifest: {pair_id}")]
    DuplicatePair { pair_id: String },

    #[error("Asset already consumed by an earlier pair: {asset_id}")]
    AssetAlreadyUsed { asset_id: String },

    #[error("No manifest entry for pair: {pair_id}")]
    EntryNotFound { pair_id: String },

    #[error("Invalid status transition for {pair_id}: {from} -> {to}")]
    InvalidTransition {
        pair_id: String,
        from: String,
        to: String,
    },
}

/// Failures reported by a render engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Render engine not available: {engine}")]
    NotAvailable { engine: String },

    #[error("Render timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    #[error("Transient render failure: {reason}")]
    Retryable { reason: String },

    #[error("Permanent render failure: {reason}")]
    Permanent { reason: String },
}

impl EngineError {
    pub fn retryable<S: Into<String>>(reason: S) -> Self {
        Self::Retryable { reason: reason.into() }
    }

    pub fn permanent<S: Into<String>>(reason: S) -> Self {
        Self::Permanent { reason: reason.into() }
    }

    /// Timeouts, transient I/O and resource exhaustion may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Retryable { .. })
    }
}

/// Loudness measurement errors
#[derive(Error, Debug)]
pub enum NormalizationError {
    #[error("Loudness measurement failed for {path}: {reason}")]
    MeasurementFailed { path: String, reason: String },

    #[error("Audio tracks cannot be mixed: {details}")]
    IncompatibleTracks { details: String },
}

/// Audio decoding errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Failed to load audio from: {path}")]
    LoadFailed { path: String },

    #[error("Unsupported audio format: {format}")]
    UnsupportedFormat { format: String },

    #[error("No audio track in: {path}")]
    NoAudioTrack { path: String },

    #[error("Invalid audio parameters: {details}")]
    InvalidParameters { details: String },
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration file: {path}")]
    ParseFailed { path: String },

    #[error("Invalid configuration value: {key} = {value}")]
    InvalidValue { key: String, value: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },
}

/// Convenience type alias for Results using CompositorError
pub type Result<T> = std::result::Result<T, CompositorError>;

impl CompositorError {
    /// Create a generic error with a custom message
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// Check if this error is recoverable (can be retried)
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::Engine(e) => e.is_retryable(),
            Self::Normalization(NormalizationError::MeasurementFailed { .. }) => true,
            Self::Manifest(ManifestError::Locked { .. }) => true,
            _ => false,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Input(InputError::AssetNotFound { path }) => {
                format!("Could not find clip '{}'. Check the catalog or manifest paths.", path)
            }
            Self::Manifest(ManifestError::Locked { path }) => {
                format!(
                    "Manifest '{}' is in use by another running process. Wait for it to finish.",
                    path
                )
            }
            Self::Engine(EngineError::NotAvailable { engine }) => {
                format!("Render engine '{}' is not installed or not on PATH.", engine)
            }
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!("Configuration file '{}' not found.", path)
            }
            _ => self.to_string(),
        }
    }
}
