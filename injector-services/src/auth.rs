//! HTTP Basic authentication gate for remote requests, checked before any
//! dial happens (never poison an origin connection with an unauthenticated
//! request).

use base64::Engine as _;

use injector_core::config::Credential;

use crate::http::RequestHead;

pub fn is_authorized(request: &RequestHead, credentials: &[Credential]) -> bool {
    if credentials.is_empty() {
        return true;
    }
    let Some(header) = request.header_str("proxy-authorization") else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((user, pass)) = decoded.split_once(':') else {
        return false;
    };
    credentials.iter().any(|c| c.user == user && c.pass == pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, Method, Version};

    fn request_with_auth(value: Option<&str>) -> RequestHead {
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert("proxy-authorization", HeaderValue::from_str(v).unwrap());
        }
        RequestHead {
            method: Method::GET,
            raw_target: "http://example/".to_string(),
            version: Version::HTTP_11,
            headers,
        }
    }

    fn creds() -> Vec<Credential> {
        vec![Credential {
            user: "alice".to_string(),
            pass: "secret".to_string(),
        }]
    }

    #[test]
    fn no_configured_credentials_means_open() {
        assert!(is_authorized(&request_with_auth(None), &[]));
    }

    #[test]
    fn missing_header_is_rejected_when_credentials_configured() {
        assert!(!is_authorized(&request_with_auth(None), &creds()));
    }

    #[test]
    fn correct_credentials_are_accepted() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("alice:secret");
        let header = format!("Basic {encoded}");
        assert!(is_authorized(&request_with_auth(Some(&header)), &creds()));
    }

    #[test]
    fn wrong_password_is_rejected() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("alice:wrong");
        let header = format!("Basic {encoded}");
        assert!(!is_authorized(&request_with_auth(Some(&header)), &creds()));
    }
}
