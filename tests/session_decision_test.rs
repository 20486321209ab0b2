//! Session Decision Engine Integration Tests

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use torii::auth::TokenClaims;
use torii::config::GateSettings;
use torii::session::{
    Authenticated, Credential, DecisionEngine, Identity, IdentityError, IdentityStore,
    MemoryIdentityStore, RejectReason, SessionDecision,
};

/// Store whose backend is down
struct OfflineStore;

#[async_trait]
impl IdentityStore for OfflineStore {
    async fn find_by_email(&self, _email: &str) -> Result<Option<Identity>, IdentityError> {
        Err(IdentityError::Unavailable("connection refused".into()))
    }

    async fn create(
        &self,
        _email: &str,
        _credential: &Credential,
    ) -> Result<Identity, IdentityError> {
        Err(IdentityError::Unavailable("connection refused".into()))
    }

    async fn set_role(&self, _identity: &Identity, _role: &str) -> Result<(), IdentityError> {
        Err(IdentityError::Unavailable("connection refused".into()))
    }
}

fn claims(value: serde_json::Value) -> TokenClaims {
    serde_json::from_value(value).unwrap()
}

fn offline_engine() -> DecisionEngine {
    DecisionEngine::from_settings(&GateSettings::shared_secret("s"), Arc::new(OfflineStore))
}

fn engine() -> (DecisionEngine, Arc<MemoryIdentityStore>) {
    let store = Arc::new(MemoryIdentityStore::new());
    let engine = DecisionEngine::from_settings(&GateSettings::shared_secret("s"), store.clone());
    (engine, store)
}

#[tokio::test]
async fn test_decide_twice_does_not_duplicate_identity() {
    let (engine, store) = engine();
    let claims = claims(json!({"email": "a@x.com", "role": "Author"}));

    let first = engine.decide(&claims, None).await;
    let second = engine.decide(&claims, None).await;

    let expected_first = SessionDecision::Authenticate(Authenticated {
        identity_key: "a@x.com".into(),
        role: Some("author".into()),
        is_new_identity: true,
    });
    let expected_second = SessionDecision::Authenticate(Authenticated {
        identity_key: "a@x.com".into(),
        role: Some("author".into()),
        is_new_identity: false,
    });
    assert_eq!(first, expected_first);
    assert_eq!(second, expected_second);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_concurrent_first_sign_ins_create_one_identity() {
    let (engine, store) = engine();
    let engine = Arc::new(engine);

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .decide(&claims(json!({"email": "a@x.com"})), None)
                    .await
            })
        })
        .collect();

    for task in tasks {
        let decision = task.await.unwrap();
        assert_eq!(decision.label(), "authenticate");
    }
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_existing_session_wins_over_everything() {
    let engine = offline_engine();

    // Neither the missing email nor the broken store matter
    let decision = engine.decide(&claims(json!({})), Some("a@x.com")).await;
    assert_eq!(decision, SessionDecision::AlreadyAuthenticated);
}

#[tokio::test]
async fn test_missing_email_checked_before_store() {
    let engine = offline_engine();

    let decision = engine.decide(&claims(json!({"sub": "42"})), None).await;
    assert_eq!(
        decision,
        SessionDecision::Reject {
            reason: RejectReason::MissingEmailClaim
        }
    );
}

#[tokio::test]
async fn test_store_outage_rejected() {
    let engine = offline_engine();

    let decision = engine.decide(&claims(json!({"email": "a@x.com"})), None).await;
    assert_eq!(
        decision,
        SessionDecision::Reject {
            reason: RejectReason::IdentityStoreUnavailable
        }
    );
}

#[tokio::test]
async fn test_engine_does_not_apply_roles() {
    let (engine, store) = engine();
    store.insert("a@x.com", Some("subscriber"));

    engine
        .decide(&claims(json!({"email": "a@x.com", "role": "editor"})), None)
        .await;

    let identity = store.find_by_email("a@x.com").await.unwrap().unwrap();
    assert_eq!(identity.role.as_deref(), Some("subscriber"));
}

#[tokio::test]
async fn test_passthrough_claims_are_kept() {
    let claims = claims(json!({"email": "a@x.com", "sub": "42", "groups": ["a", "b"]}));
    assert_eq!(claims.subject(), Some("42"));
    assert_eq!(claims.extra["groups"], json!(["a", "b"]));
}
