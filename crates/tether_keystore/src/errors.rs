use thiserror::Error;

pub type KeystoreResult<T> = Result<T, KeystoreError>;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("key generation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("key encoding failed: {0}")]
    Pkcs8(#[from] rsa::pkcs8::Error),

    #[error("public key encoding failed: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),

    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}
