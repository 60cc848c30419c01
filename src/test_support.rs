//! Shared fixtures for unit tests.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::jwks::JwksCache;
use crate::verifier::Claims;

pub const RSA_PRIMARY_PEM: &str = include_str!("../tests/fixtures/rsa_primary.pem");
pub const RSA_ROTATED_PEM: &str = include_str!("../tests/fixtures/rsa_rotated.pem");
pub const EC_P256_PEM: &str = include_str!("../tests/fixtures/ec_p256.pem");
const JWKS_FIXTURE: &str = include_str!("../tests/fixtures/jwks.json");

/// Fixture key set restricted to the given key ids.
pub fn jwks_json(kids: &[&str]) -> Value {
    let all: Value = serde_json::from_str(JWKS_FIXTURE).unwrap();
    let keys: Vec<Value> = all["keys"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|k| kids.contains(&k["kid"].as_str().unwrap()))
        .cloned()
        .collect();
    serde_json::json!({ "keys": keys })
}

/// Cache loaded once from a throwaway JWKS server. Refresh is far away.
pub async fn cache_with_keys(kids: &[&str]) -> Arc<JwksCache> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(kids)))
        .mount(&server)
        .await;

    let cache = JwksCache::initialize(
        format!("{}/jwks", server.uri()),
        Duration::from_secs(3600),
        reqwest::Client::new(),
    )
    .await
    .unwrap();
    Arc::new(cache)
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

/// Sign claims with a PEM private key under the given key id.
pub fn sign(alg: Algorithm, kid: &str, pem: &str, claims: &Claims) -> String {
    let key = match alg {
        Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem.as_bytes()).unwrap(),
        _ => EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
    };
    let mut header = Header::new(alg);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &key).unwrap()
}

/// Swap the payload of a signed token while keeping its signature.
pub fn tamper_payload(token: &str, claims: &Claims) -> String {
    let mut parts = token.split('.');
    let header = parts.next().unwrap();
    let _ = parts.next();
    let signature = parts.next().unwrap();
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap());
    format!("{header}.{payload}.{signature}")
}
