#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry API error: {0}")]
    ApiError(String),

    #[error("image not found upstream")]
    NotFound,

    #[error("rate limited by registry")]
    RateLimited,

    #[error("invalid or missing registry credentials")]
    InvalidCredentials,

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("could not parse registry response: {0}")]
    ParseError(String),
}
