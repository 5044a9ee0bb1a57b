use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error returned by collaborators (tools and LLM providers), with variants
/// designed around what the caller can do about them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    /// Bad input or tool logic error. Don't retry, fix the call.
    #[error("invalid: {0}")]
    Invalid(String),
    /// Connection, DNS or socket failure. Retrying might help.
    #[error("network error: {0}")]
    Network(String),
    /// The remote side asked us to slow down.
    #[error("rate limited: {0}")]
    RateLimit(String),
    /// The call did not finish in time.
    #[error("timeout: {0}")]
    Timeout(String),
    /// The tool ran and reported failure.
    #[error("failed: {0}")]
    Failed(String),
    /// Everything else. Inspect the message for details.
    #[error("{0}")]
    Other(String),
}

impl StepError {
    /// Create an [`Invalid`](StepError::Invalid) error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        StepError::Invalid(msg.into())
    }

    /// Create a [`Network`](StepError::Network) error.
    pub fn network(msg: impl Into<String>) -> Self {
        StepError::Network(msg.into())
    }

    /// Create a [`RateLimit`](StepError::RateLimit) error.
    pub fn rate_limit(msg: impl Into<String>) -> Self {
        StepError::RateLimit(msg.into())
    }

    /// Create a [`Timeout`](StepError::Timeout) error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        StepError::Timeout(msg.into())
    }

    /// Create a [`Failed`](StepError::Failed) error.
    pub fn failed(msg: impl Into<String>) -> Self {
        StepError::Failed(msg.into())
    }

    /// Create an [`Other`](StepError::Other) error.
    pub fn other(msg: impl Into<String>) -> Self {
        StepError::Other(msg.into())
    }

    /// Whether the default retry policy treats this error as transient:
    /// network and rate-limit failures, and anything mentioning a timeout.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimit(_) | Self::Timeout(_) => true,
            other => other.to_string().contains("timeout"),
        }
    }

    /// Prefix the message while keeping the error kind intact.
    pub fn context(self, label: &str) -> Self {
        match self {
            Self::Invalid(msg) => Self::Invalid(format!("{label}: {msg}")),
            Self::Network(msg) => Self::Network(format!("{label}: {msg}")),
            Self::RateLimit(msg) => Self::RateLimit(format!("{label}: {msg}")),
            Self::Timeout(msg) => Self::Timeout(format!("{label}: {msg}")),
            Self::Failed(msg) => Self::Failed(format!("{label}: {msg}")),
            Self::Other(msg) => Self::Other(format!("{label}: {msg}")),
        }
    }
}

impl From<ureq::Error> for StepError {
    fn from(e: ureq::Error) -> Self {
        match &e {
            ureq::Error::StatusCode(429) => StepError::RateLimit("HTTP status 429".into()),
            ureq::Error::StatusCode(code) => StepError::Other(format!("HTTP status {code}")),
            ureq::Error::Timeout(_) => StepError::Timeout(e.to_string()),
            ureq::Error::HostNotFound | ureq::Error::ConnectionFailed | ureq::Error::Io(_) => {
                StepError::Network(e.to_string())
            }
            _ => StepError::Other(e.to_string()),
        }
    }
}

impl From<std::io::Error> for StepError {
    fn from(e: std::io::Error) -> Self {
        StepError::Other(e.to_string())
    }
}

/// Errors surfaced by agents, chains, workflows and registries.
///
/// Collaborator failures pass through unchanged as [`Error::Step`]; the rest
/// are configuration or decision errors that are never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Step(#[from] StepError),

    #[error("Tool {0} not found")]
    ToolNotFound(String),

    #[error("Tool with name {0} is already registered")]
    DuplicateTool(String),

    #[error("Provider {0} not found")]
    ProviderNotFound(String),

    #[error("Provider {0} is already registered")]
    DuplicateProvider(String),

    #[error("Failed to parse tool decision: {0}")]
    DecisionParse(String),

    #[error("Step must have either tool or prompt")]
    MalformedStep { step: String },

    #[error("Workflow has cycles")]
    Cycle,

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("edge references undeclared node: {0}")]
    UnknownNode(String),

    #[error("no agent configured for node: {0}")]
    MissingAgent(String),

    #[error("Invalid tool configuration: {0}")]
    InvalidToolConfig(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// The collaborator error behind this one, if any.
    pub fn as_step(&self) -> Option<&StepError> {
        match self {
            Self::Step(err) => Some(err),
            _ => None,
        }
    }
}
