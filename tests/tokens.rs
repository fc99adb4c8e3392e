mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fareledger::clock::SystemClock;
use fareledger::error::{EngineError, ProviderError};
use fareledger::models::{AccountType, BankConnection, Id, Provider};
use fareledger::secrets::TokenCipher;
use fareledger::storage::{MemoryStorage, Storage};
use fareledger::tokens::TokenManager;
use secrecy::{ExposeSecret, SecretString};

use support::*;

fn secret(value: &str) -> SecretString {
    SecretString::new(value.to_string().into())
}

async fn linked_connection(
    storage: &MemoryStorage,
    cipher: &dyn TokenCipher,
    provider: Provider,
) -> BankConnection {
    let connection = BankConnection::new(
        Id::from_string("driver-1"),
        provider,
        "001-1",
        AccountType::Savings,
        Utc::now(),
        cipher.encrypt(&secret("old-access")).unwrap(),
        cipher.encrypt(&secret("old-refresh")).unwrap(),
    );
    storage.save_connection(&connection).await.unwrap();
    connection
}

#[tokio::test]
async fn refresh_persists_the_new_pair() {
    let storage = Arc::new(MemoryStorage::new());
    let cipher = cipher();
    let manager = TokenManager::new(storage.clone(), cipher.clone(), Arc::new(SystemClock));
    let provider = ScriptedProvider::new(Provider::Dbs);
    provider.set_refresh_grant(ScriptedGrant {
        access_token: "fresh-access".to_string(),
        refresh_token: Some("rotated-refresh".to_string()),
        expires_in: 3600,
    });

    let mut connection = linked_connection(&storage, cipher.as_ref(), Provider::Dbs).await;
    let token = manager.valid_token(&mut connection, &provider).await.unwrap();
    assert_eq!(token.expose_secret(), "fresh-access");
    assert_eq!(provider.refresh_calls(), 1);

    // The stored row carries the rotated pair, not just the in-memory copy.
    let stored = storage
        .get_connection(&connection.owner_id, &connection.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        cipher
            .decrypt(&stored.refresh_token)
            .unwrap()
            .expose_secret(),
        "rotated-refresh"
    );
    assert_eq!(
        cipher.decrypt(&stored.access_token).unwrap().expose_secret(),
        "fresh-access"
    );
}

#[tokio::test]
async fn grant_without_rotation_keeps_the_stored_refresh_token() {
    let storage = Arc::new(MemoryStorage::new());
    let cipher = cipher();
    let manager = TokenManager::new(storage.clone(), cipher.clone(), Arc::new(SystemClock));
    let provider = ScriptedProvider::new(Provider::Uob);
    provider.set_refresh_grant(ScriptedGrant {
        access_token: "fresh-access".to_string(),
        refresh_token: None,
        expires_in: 3600,
    });

    let mut connection = linked_connection(&storage, cipher.as_ref(), Provider::Uob).await;
    manager.valid_token(&mut connection, &provider).await.unwrap();

    assert_eq!(
        cipher
            .decrypt(&connection.refresh_token)
            .unwrap()
            .expose_secret(),
        "old-refresh"
    );
}

#[tokio::test]
async fn concurrent_callers_trigger_at_most_one_refresh() {
    let storage = Arc::new(MemoryStorage::new());
    let cipher = cipher();
    let manager = Arc::new(TokenManager::new(
        storage.clone(),
        cipher.clone(),
        Arc::new(SystemClock),
    ));
    let provider = Arc::new(ScriptedProvider::new(Provider::Dbs));
    provider.set_refresh_delay(Duration::from_millis(50));

    let connection = linked_connection(&storage, cipher.as_ref(), Provider::Dbs).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = manager.clone();
        let provider = provider.clone();
        let mut connection = connection.clone();
        handles.push(tokio::spawn(async move {
            manager
                .valid_token(&mut connection, provider.as_ref())
                .await
                .unwrap()
        }));
    }
    for handle in handles {
        let token = handle.await.unwrap();
        assert_eq!(token.expose_secret(), "access-dbs");
    }

    assert_eq!(provider.refresh_calls(), 1);
}

#[tokio::test]
async fn expired_grants_surface_as_reauth_required() {
    let storage = Arc::new(MemoryStorage::new());
    let cipher = cipher();
    let manager = TokenManager::new(storage.clone(), cipher.clone(), Arc::new(SystemClock));
    let provider = ScriptedProvider::new(Provider::Ocbc);
    provider.fail_refresh_with(ProviderError::AuthExpired);

    let mut connection = linked_connection(&storage, cipher.as_ref(), Provider::Ocbc).await;
    let err = manager
        .valid_token(&mut connection, &provider)
        .await
        .unwrap_err();
    match err {
        EngineError::Provider(provider_err) => assert!(provider_err.requires_reauth()),
        other => panic!("unexpected error: {other:?}"),
    }
}
