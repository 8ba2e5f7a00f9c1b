use derive_more::From;

use crate::k8s::resource_error::ResourceError;

pub type Result<T> = core::result::Result<T, Error>;

/// Errors raised by crate plumbing that sits outside the fleet dispatch boundary
/// (configuration, client construction, the `fleetctl` binary).
#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Kube(kube::Error),

    #[from]
    Infer(kube::config::InferConfigError),

    #[from]
    Url(url::ParseError),

    #[from]
    Http(reqwest::Error),

    #[from]
    Resource(ResourceError),

    #[from]
    Io(std::io::Error),

    /// Custom error message
    Custom(String),
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Resource(e) => write!(fmt, "{e}"),
            Self::Custom(msg) => write!(fmt, "{msg}"),
            other => write!(fmt, "{other:?}"),
        }
    }
}

impl std::error::Error for Error {}
