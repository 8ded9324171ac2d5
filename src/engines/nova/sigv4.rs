//! Minimal AWS Signature Version 4 signer for the Bedrock WebSocket
//! upgrade request.
//!
//! Signs the upgrade the same way any SigV4-authenticated AWS HTTP request
//! is signed, using the `GET` request's canonical form (no body) and the
//! `bedrock` service — but as a presigned query string rather than an
//! `Authorization` header, since a WebSocket upgrade can't carry a header
//! past the initial 101 response on every client.

use sha2::{Digest, Sha256};

pub struct Credentials<'a> {
    pub access_key_id: &'a str,
    pub secret_access_key: &'a str,
    pub session_token: Option<&'a str>,
    pub region: &'a str,
}

const SERVICE: &str = "bedrock";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Sign `host`+`path` for a `GET` upgrade request, returning the full
/// query string (including `X-Amz-Signature`) to append to the URL.
pub fn presign_websocket_url(
    host: &str,
    path: &str,
    creds: &Credentials<'_>,
    timestamp: &str, // "YYYYMMDDTHHMMSSZ", caller-supplied (no wall-clock inside this module)
) -> String {
    let date = &timestamp[0..8];
    let credential_scope = format!("{date}/{}/{SERVICE}/aws4_request", creds.region);
    let credential = format!("{}/{credential_scope}", creds.access_key_id);

    let mut query_params: Vec<(String, String)> = vec![
        ("X-Amz-Algorithm".into(), ALGORITHM.into()),
        ("X-Amz-Credential".into(), credential),
        ("X-Amz-Date".into(), timestamp.into()),
        ("X-Amz-Expires".into(), "300".into()),
        ("X-Amz-SignedHeaders".into(), "host".into()),
    ];
    if let Some(token) = creds.session_token {
        query_params.push(("X-Amz-Security-Token".into(), token.into()));
    }
    query_params.sort();

    let canonical_query = canonical_query_string(&query_params);
    let canonical_headers = format!("host:{host}\n");
    let payload_hash = hex_sha256(b"");

    let canonical_request = format!(
        "GET\n{path}\n{canonical_query}\n{canonical_headers}\nhost\n{payload_hash}"
    );

    let string_to_sign = format!(
        "{ALGORITHM}\n{timestamp}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(creds.secret_access_key, date, creds.region);
    let signature = hex_hmac(&signing_key, string_to_sign.as_bytes());

    format!("{canonical_query}&X-Amz-Signature={signature}")
}

fn canonical_query_string(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", url_encode(k), url_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    use hmac::{Hmac, Mac};
    let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presigned_url_carries_expected_query_keys() {
        let creds = Credentials {
            access_key_id: "AKIDEXAMPLE",
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            session_token: None,
            region: "us-east-1",
        };
        let query = presign_websocket_url(
            "bedrock-runtime.us-east-1.amazonaws.com",
            "/model/amazon.nova-sonic-v1:0/converse-stream",
            &creds,
            "20260101T000000Z",
        );
        assert!(query.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(query.contains("X-Amz-Credential=AKIDEXAMPLE"));
        assert!(query.contains("X-Amz-Signature="));
    }

    #[test]
    fn session_token_is_included_when_present() {
        let creds = Credentials {
            access_key_id: "AKIDEXAMPLE",
            secret_access_key: "secret",
            session_token: Some("tok123"),
            region: "us-west-2",
        };
        let query = presign_websocket_url("host", "/path", &creds, "20260101T000000Z");
        assert!(query.contains("X-Amz-Security-Token=tok123"));
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let creds = Credentials {
            access_key_id: "AKID",
            secret_access_key: "secret",
            session_token: None,
            region: "us-east-1",
        };
        let a = presign_websocket_url("host", "/path", &creds, "20260101T000000Z");
        let b = presign_websocket_url("host", "/path", &creds, "20260101T000000Z");
        assert_eq!(a, b);
    }
}
