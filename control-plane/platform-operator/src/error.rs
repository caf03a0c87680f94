use platform_models::ModelError;
use platform_models::semver::SemVerError;

/// Coarse classification deciding retry cadence and log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Needs a corrected resource edit; never retried automatically.
    UserInput,
    /// Expected to clear up on its own.
    Transient,
    /// Optimistic-concurrency loss against another writer.
    Conflict,
    /// Retried, but only a human can fix it.
    Configuration,
    /// Retrying cannot succeed.
    Fatal,
}

#[derive(thiserror::Error, Debug)]
pub enum OperatorError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("kubernetes api error: {0}")]
    Kube(#[source] kube::Error),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Version(#[from] SemVerError),

    #[error("module {0} has no version in the catalog")]
    MissingCatalogVersion(String),

    #[error(
        "{kind} \"{name}\" must be created in the \"{namespace}\" namespace before installing"
    )]
    MissingResource {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("malformed resource: {0}")]
    Malformed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("status updater is not running")]
    UpdaterStopped,
}

impl From<kube::Error> for OperatorError {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) if resp.code == 409 => {
                OperatorError::Conflict(resp.message.clone())
            }
            kube::Error::Api(resp) if resp.code == 404 => {
                OperatorError::NotFound(resp.message.clone())
            }
            _ => OperatorError::Kube(e),
        }
    }
}

impl From<ModelError> for OperatorError {
    fn from(e: ModelError) -> Self {
        OperatorError::Configuration(e.to_string())
    }
}

impl OperatorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OperatorError::Conflict(_) => ErrorKind::Conflict,
            OperatorError::Validation(_) | OperatorError::Version(_) => {
                ErrorKind::UserInput
            }
            OperatorError::MissingCatalogVersion(_)
            | OperatorError::MissingResource { .. }
            | OperatorError::Configuration(_) => ErrorKind::Configuration,
            OperatorError::Malformed(_) => ErrorKind::Fatal,
            OperatorError::NotFound(_)
            | OperatorError::Kube(_)
            | OperatorError::Serialization(_)
            | OperatorError::UpdaterStopped => ErrorKind::Transient,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::NotFound(_))
    }

    /// Whether a later pass may succeed without anyone editing anything.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Transient | ErrorKind::Conflict | ErrorKind::Configuration
        )
    }
}
