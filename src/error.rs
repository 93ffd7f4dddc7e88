//! Error handling for the fleet controller.
use thiserror::Error;

/// Errors raised by the process manager.
#[derive(Debug, Error)]
pub enum ProcessManagerError {
    /// A live record already exists for this name.
    #[error("process '{name}' is already running (pid {pid})")]
    AlreadyRunning {
        /// Agent name.
        name: String,
        /// The pid of the existing live record.
        pid: i32,
    },

    /// The OS refused to spawn the child.
    #[error("failed to spawn process '{name}': {source}")]
    SpawnFailed {
        /// Agent name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The process record could not be persisted after spawning.
    #[error("failed to record process '{name}': {source}")]
    IORecordFailed {
        /// Agent name.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// `Stop` was called against a pid that is no longer alive.
    #[error("process {pid} is already gone")]
    ProcessGone {
        /// The pid that was targeted.
        pid: i32,
    },

    /// Signaling the process group was rejected by the OS.
    #[error("permission denied signaling process group for pid {pid}")]
    SignalRejected {
        /// The pid that was targeted.
        pid: i32,
    },

    /// No record exists for the requested name.
    #[error("no process record for '{0}'")]
    NotFound(String),

    /// A generic filesystem error, always carrying the offending path.
    #[error("I/O error at {path}: {source}")]
    IOFailed {
        /// The path that failed.
        path: std::path::PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A record on disk did not parse as valid JSON.
    #[error("malformed process record at {path}: {source}")]
    RecordCorrupt {
        /// The path of the malformed record.
        path: std::path::PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A bounded wait elapsed before the expected condition was observed.
    #[error("timed out waiting for '{0}'")]
    Timeout(String),

    /// One or more `StopAll` targets failed; the set continues regardless.
    #[error("failed to stop: {0:?}")]
    AggregateStopFailed(Vec<(String, String)>),
}

/// Errors raised loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadFailed {
        /// The path that failed to read.
        path: std::path::PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The config file's TOML was malformed.
    #[error("invalid config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    /// A referenced environment variable is not set.
    #[error("missing environment variable '{0}' referenced in config")]
    MissingEnvVar(String),

    /// Schema validation failed after parsing.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised by the secrets envelope.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// The `age` or `age-keygen` binary was not found on `PATH`.
    #[error("required external tool '{0}' was not found on PATH")]
    ExternalToolMissing(&'static str),

    /// The crypto binary rejected the input (bad key, corrupt ciphertext, …).
    #[error("decryption failed for {path}: {detail}")]
    DecryptFailed {
        /// The encrypted file that failed to decrypt.
        path: std::path::PathBuf,
        /// Stderr captured from the crypto binary.
        detail: String,
    },

    /// The crypto binary rejected encryption of the input.
    #[error("encryption failed for {path}: {detail}")]
    EncryptFailed {
        /// The plaintext file that failed to encrypt.
        path: std::path::PathBuf,
        /// Stderr captured from the crypto binary.
        detail: String,
    },

    /// A required secret key was absent or empty.
    #[error("missing required secret key(s): {0:?}")]
    MissingKeys(Vec<String>),

    /// A filesystem operation on secrets/keys failed.
    #[error("I/O error at {path}: {source}")]
    IOFailed {
        /// The path that failed.
        path: std::path::PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the configuration reload engine.
#[derive(Debug, Error)]
pub enum ReloadError {
    /// The new config failed to parse or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The process manager rejected a reconciliation action.
    #[error(transparent)]
    Process(#[from] ProcessManagerError),

    /// The file watcher itself failed (e.g. inode no longer exists).
    #[error("config watcher error: {0}")]
    WatchFailed(String),
}

/// Errors raised by the task DB / mail service client implementations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP request failed outright (connection refused, DNS, etc.).
    #[error("request to {0} failed: {1}")]
    RequestFailed(String, String),

    /// The per-call timeout elapsed.
    #[error("request to {0} timed out")]
    Timeout(String),

    /// The response body did not parse as the expected shape.
    #[error("malformed response from {0}: {1}")]
    MalformedResponse(String, String),

    /// A filesystem-backed client failed to read or write its store.
    #[error("I/O error at {path}: {source}")]
    IOFailed {
        /// The path that failed.
        path: std::path::PathBuf,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// A structured `{Error, Reason, Solution}` block rendered at CLI boundaries.
#[derive(Debug)]
pub struct ErrorReport {
    /// One-line statement of what failed.
    pub error: String,
    /// Why it failed.
    pub reason: String,
    /// A concrete next command or action to try.
    pub solution: String,
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        writeln!(f, "Reason: {}", self.reason)?;
        write!(f, "Solution: {}", self.solution)
    }
}

impl ErrorReport {
    /// Builds a report from parts.
    pub fn new(
        error: impl Into<String>,
        reason: impl Into<String>,
        solution: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            reason: reason.into(),
            solution: solution.into(),
        }
    }
}
