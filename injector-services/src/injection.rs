//! Injection transform: rewrites a response head into injection mode,
//! accumulates a running body hash, and produces the signed trailer. Plain
//! proxying does none of this — it only strips Ouinet-internal fields (see
//! `strip_ouinet_fields`), which injection mode also uses on the *incoming*
//! head before rewriting it.

use base64::Engine as _;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use sha2::{Digest as _, Sha256};
use uuid::Uuid;

use injector_core::signing::InjectorKey;

use crate::http::ResponseHead;

pub const SUPPORTED_VERSION: u32 = 6;

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Strips hop-by-hop fields and any existing `X-Ouinet-*` fields an
/// untrusted intermediary might have injected, so the injector's own
/// assertions are never ambiguous with ones it didn't make.
pub fn strip_ouinet_fields(headers: &mut HeaderMap) {
    let ouinet: Vec<HeaderName> = headers
        .keys()
        .filter(|n| n.as_str().to_ascii_lowercase().starts_with("x-ouinet-"))
        .cloned()
        .collect();
    for name in ouinet {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Per-injected-response state: constructed once a head is decided to be
/// injectable, consumed when the trailer is written.
pub struct InjectionContext {
    key: InjectorKey,
    insert_id: Uuid,
    created: u64,
    hasher: Sha256,
    data_size: u64,
    canonical_head: Vec<u8>,
}

impl InjectionContext {
    /// Rewrites `head` into injection mode and returns the context needed
    /// to finish the job at end-of-body. `unix_now` and `insert_id` are
    /// passed in rather than sampled internally so the transform stays a
    /// pure function of its inputs (testable, and reproducible for the
    /// idempotence law in the testable-properties section).
    pub fn start(
        key: InjectorKey,
        mut head: ResponseHead,
        normalized_uri: &str,
        unix_now: u64,
        insert_id: Uuid,
    ) -> (ResponseHead, Self) {
        strip_ouinet_fields(&mut head.headers);
        head.headers.remove(http::header::CONTENT_LENGTH);
        head.headers
            .insert(http::header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));

        head.headers.insert(
            header("x-ouinet-version"),
            HeaderValue::from_str(&SUPPORTED_VERSION.to_string()).expect("decimal is valid header value"),
        );
        head.headers.insert(
            header("x-ouinet-uri"),
            HeaderValue::from_str(normalized_uri).unwrap_or_else(|_| HeaderValue::from_static("")),
        );
        head.headers.insert(
            header("x-ouinet-injection"),
            HeaderValue::from_str(&format!("id={insert_id},ts={unix_now}"))
                .expect("uuid and decimal timestamp are valid header values"),
        );

        let canonical_head = canonicalize(
            head.status,
            &[
                ("x-ouinet-version", head.headers.get("x-ouinet-version").unwrap()),
                ("x-ouinet-uri", head.headers.get("x-ouinet-uri").unwrap()),
                ("x-ouinet-injection", head.headers.get("x-ouinet-injection").unwrap()),
            ],
        );

        let sig0 = key.sign(&canonical_head);
        let sig0_value = format_signature(&key, unix_now, &["(response-status)", "x-ouinet-version", "x-ouinet-uri", "x-ouinet-injection"], &sig0.to_bytes());
        head.headers
            .insert(header("x-ouinet-sig0"), HeaderValue::from_str(&sig0_value).expect("signature header is ascii"));
        head.headers.insert(
            http::header::TRAILER,
            HeaderValue::from_static("Digest, X-Ouinet-Data-Size, X-Ouinet-Sig1"),
        );

        (
            head,
            Self {
                key,
                insert_id,
                created: unix_now,
                hasher: Sha256::new(),
                data_size: 0,
                canonical_head,
            },
        )
    }

    /// Feeds `chunk` into the running digest. Called by the forwarder's
    /// `data_xform` hook on every body chunk, in order, before reframing.
    pub fn update_hash(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.data_size += chunk.len() as u64;
    }

    /// Produces the trailer fields once the body has ended.
    pub fn finish(self) -> HeaderMap {
        let digest = self.hasher.finalize();
        let digest_b64 = base64::engine::general_purpose::STANDARD.encode(digest);
        let digest_value = format!("SHA-256={digest_b64}");
        let size_value = self.data_size.to_string();

        let mut signed = self.canonical_head;
        signed.extend_from_slice(format!("digest: {digest_value}\r\n").as_bytes());
        signed.extend_from_slice(format!("x-ouinet-data-size: {size_value}\r\n").as_bytes());
        let sig1 = self.key.sign(&signed);
        let sig1_value = format_signature(
            &self.key,
            self.created,
            &["(response-status)", "x-ouinet-version", "x-ouinet-uri", "x-ouinet-injection", "digest", "x-ouinet-data-size"],
            &sig1.to_bytes(),
        );

        let mut trailer = HeaderMap::new();
        trailer.insert(header("digest"), HeaderValue::from_str(&digest_value).unwrap());
        trailer.insert(header("x-ouinet-data-size"), HeaderValue::from_str(&size_value).unwrap());
        trailer.insert(header("x-ouinet-sig1"), HeaderValue::from_str(&sig1_value).unwrap());
        trailer
    }
}

fn header(name: &'static str) -> HeaderName {
    HeaderName::from_static(name)
}

/// `lowercased-name: value\r\n` for each field, prefixed by the
/// `(response-status): <code>\r\n` pseudo-field.
fn canonicalize(status: StatusCode, fields: &[(&str, &HeaderValue)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("(response-status): {}\r\n", status.as_u16()).as_bytes());
    for (name, value) in fields {
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn format_signature(key: &InjectorKey, created: u64, headers: &[&str], signature: &[u8]) -> String {
    format!(
        "keyId=\"{}\",algorithm=\"hs2019\",created={},headers=\"{}\",signature=\"{}\"",
        key.key_id(),
        created,
        headers.join(" "),
        base64::engine::general_purpose::STANDARD.encode(signature),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_head() -> ResponseHead {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_LENGTH, HeaderValue::from_static("5"));
        ResponseHead {
            status: StatusCode::OK,
            version: http::Version::HTTP_11,
            headers,
        }
    }

    #[test]
    fn start_strips_content_length_and_forces_chunked() {
        let key = InjectorKey::generate();
        let (head, _ctx) = InjectionContext::start(
            key,
            sample_head(),
            "http://example/",
            1_700_000_000,
            Uuid::nil(),
        );
        assert!(!head.headers.contains_key(http::header::CONTENT_LENGTH));
        assert_eq!(head.headers.get(http::header::TRANSFER_ENCODING).unwrap(), "chunked");
        assert_eq!(head.headers.get("x-ouinet-version").unwrap(), "6");
    }

    #[test]
    fn digest_matches_sha256_of_observed_bytes() {
        let key = InjectorKey::generate();
        let (_head, mut ctx) = InjectionContext::start(key, sample_head(), "http://example/", 0, Uuid::nil());
        ctx.update_hash(b"hello");
        let trailer = ctx.finish();
        assert_eq!(
            trailer.get("digest").unwrap(),
            "SHA-256=LPJNul+wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ="
        );
        assert_eq!(trailer.get("x-ouinet-data-size").unwrap(), "5");
    }

    #[test]
    fn sig1_verifies_against_emitted_material() {
        use ed25519_dalek::Verifier;
        let key = InjectorKey::generate();
        let verifying_key = key.verifying_key();
        let (head, mut ctx) = InjectionContext::start(key, sample_head(), "http://example/", 42, Uuid::nil());
        ctx.update_hash(b"hello");
        let canonical_before_trailer = canonicalize(
            head.status,
            &[
                ("x-ouinet-version", head.headers.get("x-ouinet-version").unwrap()),
                ("x-ouinet-uri", head.headers.get("x-ouinet-uri").unwrap()),
                ("x-ouinet-injection", head.headers.get("x-ouinet-injection").unwrap()),
            ],
        );
        let trailer = ctx.finish();
        let mut signed = canonical_before_trailer;
        signed.extend_from_slice(format!("digest: {}\r\n", trailer.get("digest").unwrap().to_str().unwrap()).as_bytes());
        signed.extend_from_slice(
            format!(
                "x-ouinet-data-size: {}\r\n",
                trailer.get("x-ouinet-data-size").unwrap().to_str().unwrap()
            )
            .as_bytes(),
        );
        let sig1_header = trailer.get("x-ouinet-sig1").unwrap().to_str().unwrap();
        let sig_b64 = sig1_header
            .split("signature=\"")
            .nth(1)
            .and_then(|s| s.strip_suffix('"'))
            .unwrap();
        let sig_bytes = base64::engine::general_purpose::STANDARD.decode(sig_b64).unwrap();
        let sig_array: [u8; 64] = sig_bytes.try_into().unwrap();
        let signature = ed25519_dalek::Signature::from_bytes(&sig_array);
        assert!(verifying_key.verify(&signed, &signature).is_ok());
    }

    #[test]
    fn identical_inputs_produce_identical_signatures() {
        let key = InjectorKey::generate();
        let (head_a, mut ctx_a) =
            InjectionContext::start(key.clone(), sample_head(), "http://example/", 99, Uuid::nil());
        let (head_b, mut ctx_b) =
            InjectionContext::start(key, sample_head(), "http://example/", 99, Uuid::nil());
        ctx_a.update_hash(b"hello");
        ctx_b.update_hash(b"hello");
        assert_eq!(
            head_a.headers.get("x-ouinet-sig0"),
            head_b.headers.get("x-ouinet-sig0")
        );
        let trailer_a = ctx_a.finish();
        let trailer_b = ctx_b.finish();
        assert_eq!(
            trailer_a.get("x-ouinet-sig1"),
            trailer_b.get("x-ouinet-sig1")
        );
    }
}
