//! Socket URL construction

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use termhub_types::DEFAULT_WS_PREFIX;

/// Characters left untouched when a token is placed in the query string
const TOKEN_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Turns a relative endpoint such as `terminal/pty0` into a full socket URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResolver {
    host: String,
    secure: bool,
    prefix: String,
    token: Option<String>,
}

impl EndpointResolver {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
            prefix: DEFAULT_WS_PREFIX.to_string(),
            token: None,
        }
    }

    /// Derive host and scheme from the origin of the page or server being served,
    /// `https://` origins get `wss://` sockets
    pub fn from_origin(origin: &str) -> Self {
        let (secure, rest) = if let Some(rest) = origin.strip_prefix("https://") {
            (true, rest)
        } else if let Some(rest) = origin.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = origin.strip_prefix("http://") {
            (false, rest)
        } else if let Some(rest) = origin.strip_prefix("ws://") {
            (false, rest)
        } else {
            (false, origin)
        };
        let host = rest.split('/').next().unwrap_or_default();
        Self::new(host, secure)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    /// `{scheme}://{host}/{prefix}/{endpoint}/`, always with exactly one trailing slash
    pub fn resolve(&self, endpoint: &str) -> String {
        let mut url = format!("{}://{}/", self.scheme(), self.host);
        for segment in [self.prefix.as_str(), endpoint] {
            let segment = segment.trim_matches('/');
            if !segment.is_empty() {
                url.push_str(segment);
                url.push('/');
            }
        }
        if let Some(token) = &self.token {
            url.push_str("?token=");
            url.extend(utf8_percent_encode(token, TOKEN_ENCODE_SET));
        }
        url
    }
}
