//! The HTTP/1.1 head data model the parser fills and the forwarder/injection
//! transform rewrite. Bodies are never buffered into this struct — only
//! status line/headers; body bytes flow directly from source to sink.

use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};

/// How a message body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Length(u64),
    Chunked,
    Close,
}

/// A request's target, kept in whichever form the client actually sent it
/// (origin-form, absolute-form, or authority-form for CONNECT) rather than
/// forced through `http::Uri`, which cannot represent authority-form.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub raw_target: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl RequestHead {
    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Absolute-form target parsed as a URI. `None` for origin-form and
    /// authority-form (CONNECT) targets.
    pub fn target_uri(&self) -> Option<Uri> {
        if self.is_connect() || self.raw_target.starts_with('/') {
            return None;
        }
        self.raw_target.parse().ok()
    }

    /// Host for a remote request (absolute-form) or CONNECT (authority-form).
    pub fn host(&self) -> Option<&str> {
        if self.is_connect() {
            return self.raw_target.rsplit_once(':').map(|(h, _)| h);
        }
        if let Some(rest) = self
            .raw_target
            .strip_prefix("http://")
            .or_else(|| self.raw_target.strip_prefix("https://"))
        {
            let authority = rest.split(['/', '?']).next().unwrap_or(rest);
            return authority.rsplit_once(':').map(|(h, _)| h).or(Some(authority));
        }
        self.header_str("host")
            .map(|h| h.rsplit_once(':').map(|(h, _)| h).unwrap_or(h))
    }

    /// Port from the target authority, the `Host` header, or the scheme
    /// default.
    pub fn port(&self) -> Option<u16> {
        if self.is_connect() {
            return self
                .raw_target
                .rsplit_once(':')
                .and_then(|(_, p)| p.parse().ok());
        }
        if let Some(rest) = self
            .raw_target
            .strip_prefix("http://")
            .or_else(|| self.raw_target.strip_prefix("https://"))
        {
            let authority = rest.split(['/', '?']).next().unwrap_or(rest);
            if let Some((_, port)) = authority.rsplit_once(':') {
                if let Ok(p) = port.parse() {
                    return Some(p);
                }
            }
            return Some(if self.raw_target.starts_with("https://") {
                443
            } else {
                80
            });
        }
        if let Some(host_hdr) = self.header_str("host") {
            if let Some((_, port)) = host_hdr.rsplit_once(':') {
                if let Ok(p) = port.parse() {
                    return Some(p);
                }
            }
        }
        Some(80)
    }

    pub fn scheme(&self) -> &str {
        if self.raw_target.starts_with("https://") {
            "https"
        } else {
            "http"
        }
    }

    /// Determine the *incoming* framing for the request body (used only for
    /// the rare request methods carrying a body, e.g. POST/PUT).
    pub fn request_framing(&self) -> Framing {
        framing_from_headers(&self.headers, true)
    }

    pub fn keep_alive(&self) -> bool {
        connection_keep_alive(&self.headers, self.version)
    }
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn incoming_framing(&self, request_method: &Method) -> Framing {
        if request_method == Method::HEAD {
            return Framing::Length(0);
        }
        if matches!(
            self.status.as_u16(),
            100..=199 | 204 | 304
        ) {
            return Framing::Length(0);
        }
        framing_from_headers(&self.headers, false)
    }

    pub fn keep_alive(&self) -> bool {
        connection_keep_alive(&self.headers, self.version)
    }

    pub fn remove(&mut self, name: &str) {
        self.headers.remove(name);
    }

    pub fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn append(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }
}

/// The framing an outgoing head declares, independent of how the
/// corresponding incoming body was actually read. Used by the forwarder to
/// decide how to re-frame a response after `head_xform` has run.
pub fn declared_framing(headers: &HeaderMap) -> Framing {
    framing_from_headers(headers, false)
}

fn framing_from_headers(headers: &HeaderMap, is_request: bool) -> Framing {
    if let Some(te) = headers.get(http::header::TRANSFER_ENCODING) {
        if te
            .to_str()
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
        {
            return Framing::Chunked;
        }
    }
    if let Some(cl) = headers.get(http::header::CONTENT_LENGTH) {
        if let Ok(n) = cl.to_str().unwrap_or("").trim().parse::<u64>() {
            return Framing::Length(n);
        }
    }
    if is_request {
        Framing::Length(0)
    } else {
        Framing::Close
    }
}

/// HTTP/1.0 defaults to close; HTTP/1.1 defaults to keep-alive unless
/// `Connection: close` is present. Grounded on
/// `connection_persistence::is_conn_keepalive` (HTTP/2 branch dropped: this
/// injector never speaks H2).
fn connection_keep_alive(headers: &HeaderMap, version: Version) -> bool {
    let connection_close = headers
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("close"))
        .unwrap_or(false);
    if connection_close {
        return false;
    }
    match version {
        Version::HTTP_10 => headers
            .get(http::header::CONNECTION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains("keep-alive"))
            .unwrap_or(false),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn http11_defaults_keepalive() {
        assert!(connection_keep_alive(&headers(&[]), Version::HTTP_11));
    }

    #[test]
    fn http11_connection_close_disables_keepalive() {
        assert!(!connection_keep_alive(
            &headers(&[("connection", "close")]),
            Version::HTTP_11
        ));
    }

    #[test]
    fn http10_requires_explicit_keepalive() {
        assert!(!connection_keep_alive(&headers(&[]), Version::HTTP_10));
        assert!(connection_keep_alive(
            &headers(&[("connection", "keep-alive")]),
            Version::HTTP_10
        ));
    }

    #[test]
    fn transfer_encoding_chunked_wins_over_content_length() {
        let h = headers(&[
            ("transfer-encoding", "chunked"),
            ("content-length", "5"),
        ]);
        assert_eq!(framing_from_headers(&h, false), Framing::Chunked);
    }
}
