//! `git://` URL parsing.

use std::fmt;
use thiserror::Error;
use ::url::{ParseError, Url};

/// Port `git daemon` listens on.
pub const DEFAULT_PORT: u16 = 9418;

const SCHEME: &str = "git";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("unsupported URL {0:?}: only git:// is supported")]
    Scheme(String),

    #[error("missing host in {0:?}")]
    MissingHost(String),

    #[error("missing repository path in {0:?}")]
    MissingPath(String),

    #[error("invalid port in {0:?}")]
    Port(String),

    #[error("invalid URL {url:?}: {source}")]
    Invalid {
        url: String,
        #[source]
        source: ParseError,
    },
}

/// Address of a repository served by `git daemon`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    pub host: String,
    pub port: u16,
    /// Repository path, starting with `/`.
    pub path: String,
}

impl GitUrl {
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let parsed = Url::parse(url).map_err(|e| match e {
            ParseError::EmptyHost => UrlError::MissingHost(url.to_string()),
            ParseError::InvalidPort => UrlError::Port(url.to_string()),
            source => UrlError::Invalid {
                url: url.to_string(),
                source,
            },
        })?;
        if parsed.scheme() != SCHEME {
            return Err(UrlError::Scheme(url.to_string()));
        }

        let host = match parsed.host_str() {
            Some(host) if !host.is_empty() => host,
            _ => return Err(UrlError::MissingHost(url.to_string())),
        };
        let path = parsed.path();
        if path.len() < 2 || !path.starts_with('/') {
            return Err(UrlError::MissingPath(url.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            path: path.to_string(),
        })
    }

    /// Value of the `host=` parameter sent to the daemon.
    pub fn host_param(&self) -> String {
        if self.port == DEFAULT_PORT {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `host:port` for connecting.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for GitUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}://{}{}", self.host_param(), self.path)
    }
}
