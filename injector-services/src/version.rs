//! Version negotiation (§4.H): compares a request's `X-Ouinet-Version`
//! against the supported version, without opening an origin connection.

use crate::http::RequestHead;
use crate::injection::SUPPORTED_VERSION;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionOutcome {
    /// No `X-Ouinet-Version` header: plain-proxy mode, not a mismatch.
    PlainProxy,
    /// Matches `SUPPORTED_VERSION`: injection mode.
    Supported,
    TooLow,
    TooHigh,
}

impl VersionOutcome {
    /// The `X-Ouinet-HTTP-Status` discriminator value for a 400 response.
    pub fn discriminator(self) -> Option<&'static str> {
        match self {
            VersionOutcome::TooLow => Some("version-too-low"),
            VersionOutcome::TooHigh => Some("version-too-high"),
            VersionOutcome::PlainProxy | VersionOutcome::Supported => None,
        }
    }
}

pub fn negotiate(request: &RequestHead) -> VersionOutcome {
    let Some(raw) = request.header_str("x-ouinet-version") else {
        return VersionOutcome::PlainProxy;
    };
    // A version that fails to parse is treated as too-low, per §4.H.
    let Ok(v) = raw.trim().parse::<u32>() else {
        return VersionOutcome::TooLow;
    };
    match v.cmp(&SUPPORTED_VERSION) {
        std::cmp::Ordering::Equal => VersionOutcome::Supported,
        std::cmp::Ordering::Less => VersionOutcome::TooLow,
        std::cmp::Ordering::Greater => VersionOutcome::TooHigh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue, Method, Version};

    fn request_with_version(value: Option<&str>) -> RequestHead {
        let mut headers = HeaderMap::new();
        if let Some(v) = value {
            headers.insert("x-ouinet-version", HeaderValue::from_str(v).unwrap());
        }
        RequestHead {
            method: Method::GET,
            raw_target: "http://example/".to_string(),
            version: Version::HTTP_11,
            headers,
        }
    }

    #[test]
    fn missing_header_is_plain_proxy() {
        assert_eq!(negotiate(&request_with_version(None)), VersionOutcome::PlainProxy);
    }

    #[test]
    fn matching_version_is_supported() {
        assert_eq!(negotiate(&request_with_version(Some("6"))), VersionOutcome::Supported);
    }

    #[test]
    fn lower_version_is_too_low() {
        assert_eq!(negotiate(&request_with_version(Some("1"))), VersionOutcome::TooLow);
    }

    #[test]
    fn higher_version_is_too_high() {
        assert_eq!(negotiate(&request_with_version(Some("9"))), VersionOutcome::TooHigh);
    }

    #[test]
    fn unparseable_version_is_too_low() {
        assert_eq!(negotiate(&request_with_version(Some("not-a-number"))), VersionOutcome::TooLow);
    }
}
