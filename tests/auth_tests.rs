// Identity provider tests
// Registration, sign in and sign out against the local account store

mod common;
use common::setup_logging;

use flashchat::backend::{AuthError, IdentityProvider};
use flashchat::LocalIdentityProvider;

#[tokio::test]
async fn test_register_signs_in() {
    setup_logging();
    let auth = LocalIdentityProvider::in_memory();
    assert_eq!(auth.current_identity(), None);

    let identity = auth.create_account("a@x.com", "secret1").await.unwrap();
    assert_eq!(identity, "a@x.com");
    assert_eq!(auth.current_identity().as_deref(), Some("a@x.com"));
}

#[tokio::test]
async fn test_sign_out_then_sign_in() {
    setup_logging();
    let auth = LocalIdentityProvider::in_memory();
    auth.create_account("a@x.com", "secret1").await.unwrap();

    auth.sign_out().unwrap();
    assert_eq!(auth.current_identity(), None);
    assert_eq!(auth.sign_out(), Err(AuthError::NotSignedIn));

    let identity = auth.sign_in("A@X.com ", "secret1").await.unwrap();
    assert_eq!(identity, "a@x.com");
    assert_eq!(auth.current_identity().as_deref(), Some("a@x.com"));
}

#[tokio::test]
async fn test_sign_in_failures() {
    setup_logging();
    let auth = LocalIdentityProvider::in_memory();
    auth.create_account("a@x.com", "secret1").await.unwrap();
    auth.sign_out().unwrap();

    assert_eq!(
        auth.sign_in("a@x.com", "wrong-password").await,
        Err(AuthError::WrongPassword)
    );
    assert_eq!(
        auth.sign_in("nobody@x.com", "secret1").await,
        Err(AuthError::UserNotFound("nobody@x.com".to_string()))
    );
    assert!(matches!(
        auth.sign_in("not-an-email", "secret1").await,
        Err(AuthError::InvalidEmail(_))
    ));
    // A failed attempt leaves nobody signed in
    assert_eq!(auth.current_identity(), None);
}

#[tokio::test]
async fn test_registration_failures() {
    setup_logging();
    let auth = LocalIdentityProvider::in_memory();
    auth.create_account("a@x.com", "secret1").await.unwrap();

    assert_eq!(
        auth.create_account("A@x.com", "another1").await,
        Err(AuthError::EmailAlreadyInUse("a@x.com".to_string()))
    );
    assert_eq!(
        auth.create_account("b@x.com", "12345").await,
        Err(AuthError::WeakPassword)
    );
    assert!(matches!(
        auth.create_account("b@", "secret1").await,
        Err(AuthError::InvalidEmail(_))
    ));
}

#[tokio::test]
async fn test_accounts_survive_reopen() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");

    {
        let auth = LocalIdentityProvider::open(&path).unwrap();
        auth.create_account("a@x.com", "secret1").await.unwrap();
    }

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(!contents.contains("secret1"), "Password stored in clear text");

    let reopened = LocalIdentityProvider::open(&path).unwrap();
    // Sessions are not persisted
    assert_eq!(reopened.current_identity(), None);
    assert_eq!(reopened.sign_in("a@x.com", "secret1").await.unwrap(), "a@x.com");
}

#[tokio::test]
async fn test_providers_sharing_a_file_see_each_others_accounts() {
    setup_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("accounts.json");

    let first = LocalIdentityProvider::open(&path).unwrap();
    let second = LocalIdentityProvider::open(&path).unwrap();

    first.create_account("a@x.com", "secret1").await.unwrap();
    assert_eq!(second.sign_in("a@x.com", "secret1").await.unwrap(), "a@x.com");

    // Registering through the second provider keeps the first one's account
    second.create_account("b@x.com", "secret2").await.unwrap();
    assert_eq!(
        first.create_account("B@x.com", "secret3").await,
        Err(AuthError::EmailAlreadyInUse("b@x.com".to_string()))
    );

    let reopened = LocalIdentityProvider::open(&path).unwrap();
    assert_eq!(reopened.sign_in("a@x.com", "secret1").await.unwrap(), "a@x.com");
    assert_eq!(reopened.sign_in("b@x.com", "secret2").await.unwrap(), "b@x.com");
}
