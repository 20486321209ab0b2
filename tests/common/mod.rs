//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{json, Value};
use torii::auth::AuthRequest;
use torii::gate::{SessionError, SessionManager};
use torii::session::{Authenticated, Identity};

pub const SIGNING_KEY_PEM: &str = include_str!("../fixtures/rsa_signing_key.pem");
pub const SIGNING_KEY_N: &str = include_str!("../fixtures/rsa_signing_key.n");
pub const OTHER_KEY_PEM: &str = include_str!("../fixtures/rsa_other_key.pem");
pub const OTHER_KEY_N: &str = include_str!("../fixtures/rsa_other_key.n");

pub const JWKS_PATH: &str = "/.well-known/jwks.json";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn hs256_token(secret: &str, claims: &Value) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

pub fn rs256_token(pem: &str, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    encode(
        &header,
        claims,
        &EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap(),
    )
    .unwrap()
}

/// JWKS document with one RS256 signing key per `(kid, modulus)`
pub fn jwks_body(keys: &[(&str, &str)]) -> Value {
    let keys: Vec<Value> = keys
        .iter()
        .map(|(kid, n)| {
            json!({
                "kty": "RSA",
                "kid": kid,
                "use": "sig",
                "alg": "RS256",
                "n": n.trim(),
                "e": "AQAB"
            })
        })
        .collect();
    json!({ "keys": keys })
}

pub fn bearer_request(token: &str) -> AuthRequest {
    AuthRequest::new().with_header("Authorization", &format!("Bearer {}", token))
}

/// Session manager that remembers every call
#[derive(Default)]
pub struct RecordingSessionManager {
    pub established: Mutex<Vec<(Identity, Authenticated)>>,
}

impl RecordingSessionManager {
    pub fn count(&self) -> usize {
        self.established.lock().len()
    }
}

#[async_trait]
impl SessionManager for RecordingSessionManager {
    async fn establish(
        &self,
        identity: &Identity,
        decision: &Authenticated,
    ) -> Result<(), SessionError> {
        self.established
            .lock()
            .push((identity.clone(), decision.clone()));
        Ok(())
    }
}
