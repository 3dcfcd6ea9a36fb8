//! URL parsing and formatting.

use std::fmt;

use crate::error::{Error, Result};

/// Parsed http/https URL.
///
/// Only the pieces the client needs: scheme, host, port (defaulted from
/// the scheme when absent), path (defaults to `/`) and the raw query
/// string. Formatting elides the port when it matches the scheme default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub query: String,
}

impl Url {
    /// Parse an absolute http or https URL. Anything else is `InvalidUrl`.
    pub fn parse(input: &str) -> Result<Self> {
        let parsed = url::Url::parse(input).map_err(|_| Error::InvalidUrl(input.to_string()))?;

        let scheme = parsed.scheme().to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(Error::InvalidUrl(input.to_string()));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| Error::InvalidUrl(input.to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or_else(|| default_port(&scheme));
        let path = if parsed.path().is_empty() {
            "/".to_string()
        } else {
            parsed.path().to_string()
        };
        let query = parsed.query().unwrap_or("").to_string();

        Ok(Self {
            scheme,
            host,
            port,
            path,
            query,
        })
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    /// Whether the port is the scheme default (and elided on the wire).
    pub fn is_default_port(&self) -> bool {
        self.port == default_port(&self.scheme)
    }

    /// Host header value: `host`, or `host:port` for non-default ports.
    pub fn host_header(&self) -> String {
        if self.is_default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Origin-form request target: `path` or `path?query`.
    pub fn request_target(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }
}

fn default_port(scheme: &str) -> u16 {
    if scheme == "https" {
        443
    } else {
        80
    }
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.host)?;
        if !self.is_default_port() {
            write!(f, ":{}", self.port)?;
        }
        write!(f, "{}", self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_https_defaults() {
        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(url.scheme, "https");
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 443);
        assert_eq!(url.path, "/");
        assert_eq!(url.query, "");
        assert_eq!(url.to_string(), "https://example.com/");
    }

    #[test]
    fn test_parse_explicit_port_and_query() {
        let url = Url::parse("http://host:8080/a?b=1").unwrap();
        assert_eq!(url.scheme, "http");
        assert_eq!(url.host, "host");
        assert_eq!(url.port, 8080);
        assert_eq!(url.path, "/a");
        assert_eq!(url.query, "b=1");
    }

    #[test]
    fn test_display_roundtrip() {
        for input in [
            "http://host:8080/a?b=1",
            "https://example.com/",
            "http://example.com/path/to?x=1&y=2",
        ] {
            let url = Url::parse(input).unwrap();
            assert_eq!(url.to_string(), input);
        }
    }

    #[test]
    fn test_default_port_elided() {
        let url = Url::parse("https://example.com:443/x").unwrap();
        assert_eq!(url.to_string(), "https://example.com/x");
        assert_eq!(url.host_header(), "example.com");

        let url = Url::parse("http://example.com:8080/x").unwrap();
        assert_eq!(url.host_header(), "example.com:8080");
    }

    #[test]
    fn test_request_target() {
        let url = Url::parse("http://h/a/b?q=1").unwrap();
        assert_eq!(url.request_target(), "/a/b?q=1");

        let url = Url::parse("http://h").unwrap();
        assert_eq!(url.request_target(), "/");
    }

    #[test]
    fn test_invalid_urls() {
        assert!(Url::parse("example.com").is_err());
        assert!(Url::parse("ftp://example.com/file").is_err());
        assert!(Url::parse("").is_err());
        assert!(Url::parse("http://").is_err());
    }
}
