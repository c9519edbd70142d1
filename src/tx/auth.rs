//! User authorization check
//!
//! The user signs the canonical digest of `(to, data, value, nonce)` as an
//! EIP-191 personal message:
//!
//! ```text
//! digest = keccak256(to[20] || keccak256(data)[32] || value[32 BE] || nonce[32 BE])
//! ```
//!
//! A missing nonce is encoded as zero. Nothing is sponsored unless the
//! recovered signer equals `user_address`.

use super::types::TransactionRequest;
use crate::error::AuthError;

use ethers::types::{RecoveryMessage, Signature, U256};
use sha3::{Digest, Keccak256};
use tracing::debug;

/// A request whose user signature has been verified.
///
/// Only `AuthorizationValidator::validate` can produce one, and envelope
/// construction requires one.
#[derive(Debug, Clone)]
pub struct AuthorizedRequest {
    request: TransactionRequest,
    signature: Signature,
}

impl AuthorizedRequest {
    pub fn request(&self) -> &TransactionRequest {
        &self.request
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// Canonical digest the user signs
pub fn authorization_digest(request: &TransactionRequest) -> [u8; 32] {
    let mut word = [0u8; 32];
    let mut hasher = Keccak256::new();

    hasher.update(request.to.as_bytes());
    hasher.update(Keccak256::digest(request.data.as_ref()));

    request.value_or_zero().to_big_endian(&mut word);
    hasher.update(word);

    U256::from(request.nonce.unwrap_or_default()).to_big_endian(&mut word);
    hasher.update(word);

    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AuthorizationValidator;

impl AuthorizationValidator {
    pub fn new() -> Self {
        Self
    }

    /// Verify that `signature` was produced by `request.user_address` over
    /// this exact request.
    pub fn validate(
        &self,
        request: &TransactionRequest,
        signature: &[u8],
    ) -> Result<AuthorizedRequest, AuthError> {
        let signature = Signature::try_from(signature).map_err(|e| {
            debug!("Malformed user signature: {}", e);
            crate::metrics::record_auth_rejected();
            AuthError::InvalidSignature
        })?;

        let digest = authorization_digest(request);
        let signer = signature
            .recover(RecoveryMessage::Data(digest.to_vec()))
            .map_err(|e| {
                debug!("Signer recovery failed: {}", e);
                crate::metrics::record_auth_rejected();
                AuthError::InvalidSignature
            })?;

        if signer != request.user_address {
            debug!(
                "Signature from {:?} does not match user {:?}",
                signer, request.user_address
            );
            crate::metrics::record_auth_rejected();
            return Err(AuthError::InvalidSignature);
        }

        Ok(AuthorizedRequest {
            request: request.clone(),
            signature,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ethers::core::rand::thread_rng;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::{Address, Bytes};

    pub(crate) fn user_request(user: Address, nonce: Option<u64>) -> TransactionRequest {
        TransactionRequest {
            to: Address::repeat_byte(0x42),
            data: Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb, 0x01]),
            value: Some(U256::from(7u64)),
            gas_limit: None,
            user_address: user,
            nonce,
        }
    }

    pub(crate) async fn sign(wallet: &LocalWallet, request: &TransactionRequest) -> Vec<u8> {
        wallet
            .sign_message(authorization_digest(request))
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn accepts_signature_from_user() {
        let wallet = LocalWallet::new(&mut thread_rng());
        let request = user_request(wallet.address(), Some(3));
        let signature = sign(&wallet, &request).await;

        let authorized = AuthorizationValidator::new()
            .validate(&request, &signature)
            .unwrap();
        assert_eq!(authorized.request(), &request);
    }

    #[tokio::test]
    async fn rejects_signature_from_anyone_else() {
        let validator = AuthorizationValidator::new();
        for _ in 0..8 {
            let user = LocalWallet::new(&mut thread_rng());
            let attacker = LocalWallet::new(&mut thread_rng());
            let request = user_request(user.address(), Some(1));
            let signature = sign(&attacker, &request).await;

            assert_eq!(
                validator.validate(&request, &signature).unwrap_err(),
                AuthError::InvalidSignature
            );
        }
    }

    #[tokio::test]
    async fn rejects_tampered_payload() {
        let wallet = LocalWallet::new(&mut thread_rng());
        let request = user_request(wallet.address(), Some(3));
        let signature = sign(&wallet, &request).await;
        let validator = AuthorizationValidator::new();

        let mut tampered = request.clone();
        tampered.data = Bytes::from(vec![0xff]);
        assert!(validator.validate(&tampered, &signature).is_err());

        let mut tampered = request.clone();
        tampered.value = Some(U256::from(8u64));
        assert!(validator.validate(&tampered, &signature).is_err());

        assert!(validator.validate(&request.with_nonce(4), &signature).is_err());

        let mut tampered = request;
        tampered.to = Address::repeat_byte(0x43);
        assert!(validator.validate(&tampered, &signature).is_err());
    }

    #[test]
    fn rejects_malformed_signature() {
        let request = user_request(Address::repeat_byte(1), None);
        let validator = AuthorizationValidator::new();

        assert_eq!(
            validator.validate(&request, &[0u8; 10]).unwrap_err(),
            AuthError::InvalidSignature
        );
        assert_eq!(
            validator.validate(&request, &[0u8; 65]).unwrap_err(),
            AuthError::InvalidSignature
        );
    }

    #[test]
    fn every_rejection_is_counted() {
        let request = user_request(Address::repeat_byte(1), None);
        let validator = AuthorizationValidator::new();
        let rejected = || crate::metrics::AUTH_REJECTED.with_label_values(&[]).get();

        // Malformed length
        let before = rejected();
        assert!(validator.validate(&request, &[0u8; 10]).is_err());
        assert!(rejected() >= before + 1.0);

        // Well-formed length, unrecoverable point
        let before = rejected();
        assert!(validator.validate(&request, &[0u8; 65]).is_err());
        assert!(rejected() >= before + 1.0);
    }

    #[test]
    fn digest_treats_missing_nonce_as_zero() {
        let user = Address::repeat_byte(1);
        assert_eq!(
            authorization_digest(&user_request(user, None)),
            authorization_digest(&user_request(user, Some(0)))
        );
        assert_ne!(
            authorization_digest(&user_request(user, Some(0))),
            authorization_digest(&user_request(user, Some(1)))
        );
    }
}
