use crate::error::Error;

/// URL scheme accepted by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain-text HTTP, default port 80.
    Http,
    /// HTTP over TLS, default port 443.
    Https,
}

impl Scheme {
    /// The port used when the URL does not carry one.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// A parsed `http` or `https` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    /// The URL's scheme.
    pub scheme: Scheme,
    /// Host name or address, never empty.
    pub host: String,
    /// Explicit port, or the scheme default.
    pub port: u16,
    /// Absolute path, `/` when the URL has none.
    pub path: String,
    /// Query string without the leading `?`, if present.
    pub query: Option<String>,
    /// The input as given, for error reporting.
    raw: String,
}

impl Url {
    /// Parses `input`, accepting only `http` and `https` schemes, requiring
    /// a host, and rejecting ports outside `(0, 65535]`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid(input, "missing scheme"))?;

        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            _ => return Err(invalid(input, "unsupported scheme")),
        };

        let (authority, tail) = match rest.find(['/', '?']) {
            Some(at) => (&rest[..at], &rest[at..]),
            None => (rest, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port: u32 = port.parse().map_err(|_| invalid(input, "invalid port"))?;
                if port == 0 || port > u16::MAX as u32 {
                    return Err(invalid(input, "port out of range"));
                }
                (host, port as u16)
            }
            None => (authority, scheme.default_port()),
        };

        if host.is_empty() {
            return Err(invalid(input, "missing host"));
        }

        let (path, query) = match tail.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (tail, None),
        };
        let path = if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        };

        Ok(Url {
            scheme,
            host: host.to_string(),
            port,
            path,
            query,
            raw: input.to_string(),
        })
    }

    /// The request target for the request line: path plus query.
    pub fn request_target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// The `Host` header value: the host, with the port appended when it is
    /// not the scheme default.
    pub fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// The URL as originally given.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn invalid(url: &str, reason: &str) -> Error {
    Error::bug(format!("invalid URL {url:?}: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_url_gets_scheme_defaults() {
        let url = Url::parse("http://example.com").unwrap();
        assert_eq!(url.scheme, Scheme::Http);
        assert_eq!(url.host, "example.com");
        assert_eq!(url.port, 80);
        assert_eq!(url.path, "/");
        assert_eq!(url.query, None);
        assert_eq!(url.request_target(), "/");
        assert_eq!(url.host_header(), "example.com");
    }

    #[test]
    fn https_default_port_is_443() {
        let url = Url::parse("https://example.com/x").unwrap();
        assert_eq!(url.scheme, Scheme::Https);
        assert_eq!(url.port, 443);
    }

    #[test]
    fn explicit_port_path_and_query() {
        let url = Url::parse("HTTP://example.com:8080/a/b?q=1&r=2").unwrap();
        assert_eq!(url.port, 8080);
        assert_eq!(url.path, "/a/b");
        assert_eq!(url.query.as_deref(), Some("q=1&r=2"));
        assert_eq!(url.request_target(), "/a/b?q=1&r=2");
        assert_eq!(url.host_header(), "example.com:8080");
    }

    #[test]
    fn query_without_path() {
        let url = Url::parse("http://example.com?q=1").unwrap();
        assert_eq!(url.path, "/");
        assert_eq!(url.request_target(), "/?q=1");
    }

    #[test]
    fn rejects_bad_inputs() {
        for input in [
            "example.com",
            "ftp://example.com",
            "http://",
            "http://:8080/x",
            "http://example.com:0/",
            "http://example.com:65536/",
            "http://example.com:notaport/",
        ] {
            assert!(
                matches!(Url::parse(input), Err(Error::CallerBug(_))),
                "accepted {input:?}"
            );
        }
    }

    #[test]
    fn port_65535_is_the_upper_bound() {
        let url = Url::parse("http://example.com:65535/").unwrap();
        assert_eq!(url.port, 65535);
    }
}
