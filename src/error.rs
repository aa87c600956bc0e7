#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Job submission rejected: {0}")]
    Submission(String),

    #[error("Job status query failed: {0}")]
    StatusQuery(String),

    #[error("Artifact query failed: {0}")]
    ArtifactQuery(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Artifact is not valid structured data: {0}")]
    ArtifactParse(String),

    #[error("Config dependency error: {0}")]
    ConfigDependency(String),

    #[error("Cross-workspace resolution failed: {0}")]
    CrossWorkspaceResolution(String),

    #[error("Cluster API error{}: {message}", .status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    ClusterApi { status: Option<u16>, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Job not submitted: {0}")]
    NotSubmitted(String),
}

impl AppError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Config(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(format!("YAML error: {}", err))
    }
}

impl From<kube::Error> for AppError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => {
                AppError::NotFound(response.message)
            }
            kube::Error::Api(response) => AppError::ClusterApi {
                status: Some(response.code),
                message: response.message,
            },
            other => AppError::ClusterApi {
                status: None,
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
