//! Signed, time-bounded bearer tokens.
//!
//! A token is `base64url(bincode(SignedToken))`, where the signature is an
//! Ed25519 signature by the server key over `bincode(TokenClaims)`.
//! Verification is stateless: there is no revocation list, so a leaked
//! token stays valid until `exp`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bincode::Options;
use chrono::{Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{
    DEFAULT_ACCESS_TOKEN_TTL_SECS, DEFAULT_REFRESH_TOKEN_TTL_SECS, KDF_CONTEXT_TOKEN_KEY,
};
use crate::error::TokenError;
use crate::identity::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub kind: TokenKind,
    /// Issued-at (Unix seconds).
    pub iat: i64,
    /// Expiration (Unix seconds).
    pub exp: i64,
}

impl TokenClaims {
    pub fn identity(&self) -> Identity {
        Identity::new(self.id, self.username.clone(), self.email.clone())
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.exp
    }
}

/// Upper bound on a decoded token; claims are a handful of short strings.
const MAX_TOKEN_BYTES: u64 = 2048;

fn codec() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_TOKEN_BYTES)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignedToken {
    claims: TokenClaims,
    signature: Vec<u8>,
}

/// How long each kind of token lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TOKEN_TTL_SECS),
        }
    }
}

/// Issues and verifies access and refresh tokens with one server key.
#[derive(Clone)]
pub struct TokenService {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    policy: TokenPolicy,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("verifying_key", &self.verifying_key)
            .field("policy", &self.policy)
            .finish()
    }
}

impl TokenService {
    pub fn new(signing_key: SigningKey, policy: TokenPolicy) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            policy,
        }
    }

    /// Build from a raw 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8; 32], policy: TokenPolicy) -> Self {
        Self::new(SigningKey::from_bytes(seed), policy)
    }

    /// Stretch an arbitrary secret string into a signing key using BLAKE3.
    pub fn from_passphrase(secret: &str, policy: TokenPolicy) -> Self {
        let seed = blake3::derive_key(KDF_CONTEXT_TOKEN_KEY, secret.as_bytes());
        Self::from_seed(&seed, policy)
    }

    /// Fresh random key. Tokens die with the process.
    pub fn ephemeral(policy: TokenPolicy) -> Self {
        Self::new(SigningKey::generate(&mut OsRng), policy)
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    pub fn issue_access_token(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue(identity, TokenKind::Access, self.policy.access_ttl)
    }

    pub fn issue_refresh_token(&self, identity: &Identity) -> Result<String, TokenError> {
        self.issue(identity, TokenKind::Refresh, self.policy.refresh_ttl)
    }

    fn issue(
        &self,
        identity: &Identity,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            id: identity.id,
            username: identity.username.clone(),
            email: identity.email.clone(),
            kind,
            iat: now,
            exp: now + ttl.num_seconds(),
        };

        let payload = codec()
            .serialize(&claims)
            .map_err(|e| TokenError::Serialization(e.to_string()))?;
        let signature = self.signing_key.sign(&payload);

        let token = SignedToken {
            claims,
            signature: signature.to_bytes().to_vec(),
        };
        let bytes = codec()
            .serialize(&token)
            .map_err(|e| TokenError::Serialization(e.to_string()))?;

        Ok(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Decode a token, check its signature, then its expiry.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| TokenError::Malformed)?;
        let signed: SignedToken = codec()
            .deserialize(&bytes)
            .map_err(|_| TokenError::Malformed)?;

        let payload = codec()
            .serialize(&signed.claims)
            .map_err(|_| TokenError::Malformed)?;
        let signature =
            Signature::from_slice(&signed.signature).map_err(|_| TokenError::InvalidSignature)?;
        self.verifying_key
            .verify(&payload, &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        if signed.claims.is_expired() {
            return Err(TokenError::Expired);
        }

        Ok(signed.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity::new(Uuid::new_v4(), "alice", "alice@example.com")
    }

    #[test]
    fn test_access_token_roundtrip() {
        let service = TokenService::ephemeral(TokenPolicy::default());
        let identity = alice();

        let token = service.issue_access_token(&identity).unwrap();
        let claims = service.verify(&token).expect("verify should pass");

        assert_eq!(claims.identity(), identity);
        assert_eq!(claims.kind, TokenKind::Access);
        assert_eq!(claims.exp - claims.iat, DEFAULT_ACCESS_TOKEN_TTL_SECS);
    }

    #[test]
    fn test_refresh_token_has_long_ttl() {
        let service = TokenService::ephemeral(TokenPolicy::default());
        let token = service.issue_refresh_token(&alice()).unwrap();
        let claims = service.verify(&token).unwrap();

        assert_eq!(claims.kind, TokenKind::Refresh);
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn test_expired_token_rejected() {
        let policy = TokenPolicy {
            access_ttl: Duration::zero(),
            refresh_ttl: Duration::days(7),
        };
        let service = TokenService::ephemeral(policy);
        let token = service.issue_access_token(&alice()).unwrap();

        assert_eq!(service.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn test_wrong_key_rejected() {
        let issuer = TokenService::ephemeral(TokenPolicy::default());
        let other = TokenService::ephemeral(TokenPolicy::default());
        let token = issuer.issue_access_token(&alice()).unwrap();

        assert_eq!(other.verify(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_tampered_claims_rejected() {
        let service = TokenService::ephemeral(TokenPolicy::default());
        let token = service.issue_access_token(&alice()).unwrap();

        let bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let mut signed: SignedToken = codec().deserialize(&bytes).unwrap();
        signed.claims.username = "mallory".to_string();
        let forged = URL_SAFE_NO_PAD.encode(codec().serialize(&signed).unwrap());

        assert_eq!(service.verify(&forged), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let service = TokenService::ephemeral(TokenPolicy::default());
        assert_eq!(service.verify("not a token"), Err(TokenError::Malformed));
        assert_eq!(service.verify(""), Err(TokenError::Malformed));
    }

    #[test]
    fn test_passphrase_key_is_deterministic() {
        let a = TokenService::from_passphrase("correct horse", TokenPolicy::default());
        let b = TokenService::from_passphrase("correct horse", TokenPolicy::default());
        let token = a.issue_access_token(&alice()).unwrap();

        assert!(b.verify(&token).is_ok());
    }
}
