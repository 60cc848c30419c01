#![allow(dead_code)]

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use jwt_exchange_proxy::Args;

pub const RSA_PRIMARY_PEM: &str = include_str!("../fixtures/rsa_primary.pem");
pub const RSA_ROTATED_PEM: &str = include_str!("../fixtures/rsa_rotated.pem");
pub const JWKS: &str = include_str!("../fixtures/jwks.json");
pub const SECRET: &str = "integration-secret";

pub fn jwks_body(kids: &[&str]) -> Value {
    let all: Value = serde_json::from_str(JWKS).unwrap();
    let keys: Vec<Value> = all["keys"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|k| kids.contains(&k["kid"].as_str().unwrap()))
        .cloned()
        .collect();
    serde_json::json!({ "keys": keys })
}

pub async fn jwks_server(kids: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/jwks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_body(kids)))
        .mount(&server)
        .await;
    server
}

pub fn jwks_url(server: &MockServer) -> String {
    format!("{}/.well-known/jwks.json", server.uri())
}

/// Backend that answers 200 to anything.
pub async fn backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(wiremock::matchers::any())
        .respond_with(ResponseTemplate::new(200).set_body_string("backend ok"))
        .mount(&server)
        .await;
    server
}

pub fn args(target: &str, jwks: &str, extra: &[&str]) -> Args {
    use clap::Parser;
    let mut argv = vec![
        "jwt-exchange-proxy",
        "--target-url",
        target,
        "--jwt-secret",
        SECRET,
        "--jwks-url",
        jwks,
    ];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
}

pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn external_token(kid: &str, pem: &str, claims: Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
    )
    .unwrap()
}

/// Claims of an internal token, checked against the shared secret.
pub fn internal_claims(token: &str) -> Map<String, Value> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;
    decode::<Map<String, Value>>(
        token,
        &DecodingKey::from_secret(SECRET.as_bytes()),
        &validation,
    )
    .unwrap()
    .claims
}
