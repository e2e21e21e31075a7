use thiserror::Error;

/// Port an rsync daemon listens on when the URI names none.
pub const DEFAULT_PORT: u16 = 873;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("Not an rsync:// URI: {0}")]
    Scheme(String),

    #[error("Missing host in {0}")]
    MissingHost(String),

    #[error("Missing module in {0}")]
    MissingModule(String),
}

/// The parts of `rsync://host[:port]/module/path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsyncUri {
    /// `host:port`, ready for `TcpStream::connect`
    pub address: String,
    pub module: String,
    /// Request path inside the module, always starting with `/`
    pub path: String,
}

pub fn split_uri(uri: &str) -> Result<RsyncUri, UriError> {
    let rest = uri
        .strip_prefix("rsync://")
        .ok_or_else(|| UriError::Scheme(uri.to_string()))?;

    let (host, rest) = rest.split_once('/').unwrap_or((rest, ""));
    if host.is_empty() {
        return Err(UriError::MissingHost(uri.to_string()));
    }
    let has_port = if host.starts_with('[') {
        host.contains("]:")
    } else {
        host.contains(':')
    };
    let address = if has_port {
        host.to_string()
    } else {
        format!("{host}:{DEFAULT_PORT}")
    };

    let (module, path) = match rest.split_once('/') {
        Some((module, path)) => (module, format!("/{path}")),
        None => (rest, "/".to_string()),
    };
    if module.is_empty() {
        return Err(UriError::MissingModule(uri.to_string()));
    }

    Ok(RsyncUri {
        address,
        module: module.to_string(),
        path,
    })
}
