//! Fee-delegated envelope construction
//!
//! Envelopes use the Kaia `FeeDelegatedSmartContractExecutionWithRatio`
//! layout (type `0x32`):
//!
//! ```text
//! fee payer signs: keccak256(rlp([rlp([type, nonce, gasPrice, gas, to, value, from, input, feeRatio]),
//!                                 feePayer, chainId, 0, 0]))
//! raw:             type || rlp([nonce, gasPrice, gas, to, value, from, input, feeRatio,
//!                               [[v, r, s]], feePayer, [[v, r, s]]])
//! ```
//!
//! The sender slot carries the user's authorization signature as-is: an
//! EIP-191 personal signature over the relay digest with `v` of 27/28, not a
//! Kaia sender signature over the transaction's sigRLP. Nodes that verify the
//! sender signature against sigRLP will refuse these envelopes; the fee-payer
//! half follows the Kaia format.

use super::auth::AuthorizedRequest;
use crate::config::FeePayerConfig;
use crate::error::{AuthError, RelayError, RelayResult};
use crate::gas::GasEstimate;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::keccak256;
use ethers::utils::rlp::RlpStream;
use tracing::debug;

/// Kaia fee-delegated contract execution with a fee ratio
pub const TX_TYPE_FEE_DELEGATED_WITH_RATIO: u8 = 0x32;

/// The user transaction before any signature is attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
    pub from: Address,
    pub data: Bytes,
    pub chain_id: u64,
}

/// The user transaction together with the user's authorization signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: BaseTransaction,
    pub signature: Signature,
}

/// Dual-signed envelope, ready for broadcast.
///
/// Not `Clone`; the submitter takes it by value for exactly one broadcast.
#[derive(Debug)]
pub struct FeeDelegationEnvelope {
    pub user_tx: SignedTransaction,
    pub fee_payer: Address,
    pub fee_payer_signature: Signature,
    pub fee_ratio: u8,
}

impl FeeDelegationEnvelope {
    pub fn sender(&self) -> Address {
        self.user_tx.tx.from
    }

    pub fn nonce(&self) -> u64 {
        self.user_tx.tx.nonce
    }

    pub fn fee_payer_signature_bytes(&self) -> Vec<u8> {
        self.fee_payer_signature.to_vec()
    }

    /// Digest the fee payer signs
    pub fn fee_payer_sig_hash(&self) -> H256 {
        fee_payer_sig_hash(&self.user_tx.tx, self.fee_ratio, self.fee_payer)
    }

    /// Typed raw transaction for `*_sendRawTransaction`
    pub fn rlp_encoded(&self) -> Bytes {
        let tx = &self.user_tx.tx;
        let mut stream = RlpStream::new_list(11);
        append_tx_fields(&mut stream, tx, self.fee_ratio);
        append_signatures(&mut stream, &self.user_tx.signature);
        stream.append(&self.fee_payer);
        append_signatures(&mut stream, &self.fee_payer_signature);

        let mut raw = vec![TX_TYPE_FEE_DELEGATED_WITH_RATIO];
        raw.extend_from_slice(&stream.out());
        raw.into()
    }
}

fn append_tx_fields(stream: &mut RlpStream, tx: &BaseTransaction, fee_ratio: u8) {
    stream.append(&tx.nonce);
    stream.append(&tx.gas_price);
    stream.append(&tx.gas_limit);
    stream.append(&tx.to);
    stream.append(&tx.value);
    stream.append(&tx.from);
    stream.append(&tx.data.to_vec());
    stream.append(&fee_ratio);
}

fn append_signatures(stream: &mut RlpStream, signature: &Signature) {
    stream.begin_list(1);
    stream.begin_list(3);
    stream.append(&signature.v);
    stream.append(&signature.r);
    stream.append(&signature.s);
}

fn fee_payer_sig_hash(tx: &BaseTransaction, fee_ratio: u8, fee_payer: Address) -> H256 {
    let mut inner = RlpStream::new_list(9);
    inner.append(&TX_TYPE_FEE_DELEGATED_WITH_RATIO);
    append_tx_fields(&mut inner, tx, fee_ratio);

    let mut outer = RlpStream::new_list(5);
    outer.append_raw(&inner.out(), 1);
    outer.append(&fee_payer);
    outer.append(&tx.chain_id);
    outer.append(&0u8);
    outer.append(&0u8);

    H256::from(keccak256(outer.out()))
}

/// Wraps authorized user transactions with the fee payer's signature
pub struct FeeDelegationBuilder {
    wallet: LocalWallet,
    fee_ratio: u8,
}

impl FeeDelegationBuilder {
    pub fn new(wallet: LocalWallet, fee_ratio: u8) -> RelayResult<Self> {
        if fee_ratio > 100 {
            return Err(RelayError::Config(format!(
                "fee ratio {} outside 0..=100",
                fee_ratio
            )));
        }
        Ok(Self { wallet, fee_ratio })
    }

    /// Load the fee-payer key from the configured environment variable
    pub fn from_env(config: &FeePayerConfig) -> RelayResult<Self> {
        let key = std::env::var(&config.private_key_env).map_err(|_| {
            RelayError::Config(format!(
                "No fee payer key configured. Set {}",
                config.private_key_env
            ))
        })?;

        // The parse error never echoes the key itself
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|_| RelayError::Config("Invalid fee payer private key".to_string()))?;

        Self::new(wallet, config.fee_ratio)
    }

    pub fn fee_payer(&self) -> Address {
        self.wallet.address()
    }

    pub fn fee_ratio(&self) -> u8 {
        self.fee_ratio
    }

    /// Assemble and fee-payer-sign the envelope for an authorized request.
    ///
    /// `nonce` must be the nonce the user authorized.
    pub fn build(
        &self,
        authorized: &AuthorizedRequest,
        estimate: &GasEstimate,
        nonce: u64,
        chain_id: u64,
    ) -> RelayResult<FeeDelegationEnvelope> {
        let request = authorized.request();
        if request.nonce != Some(nonce) {
            return Err(AuthError::NonceMismatch {
                authorized: request.nonce,
                requested: nonce,
            }
            .into());
        }

        let tx = BaseTransaction {
            nonce,
            gas_price: estimate.gas_price,
            gas_limit: estimate.gas_limit,
            to: request.to,
            value: request.value_or_zero(),
            from: request.user_address,
            data: request.data.clone(),
            chain_id,
        };

        let fee_payer = self.fee_payer();
        let sig_hash = fee_payer_sig_hash(&tx, self.fee_ratio, fee_payer);
        let mut fee_payer_signature = self
            .wallet
            .sign_hash(sig_hash)
            .map_err(|e| RelayError::Signing(e.to_string()))?;
        // EIP-155 style recovery id, as the fee-delegation format expects
        fee_payer_signature.v = chain_id
            .checked_mul(2)
            .and_then(|v| v.checked_add(35 + fee_payer_signature.v.saturating_sub(27)))
            .ok_or_else(|| {
                RelayError::Config(format!("chain id {} too large for a recovery id", chain_id))
            })?;

        debug!(
            "Built fee-delegated envelope for {:?} nonce {} (fee payer {:?})",
            tx.from, nonce, fee_payer
        );

        Ok(FeeDelegationEnvelope {
            user_tx: SignedTransaction {
                tx,
                signature: *authorized.signature(),
            },
            fee_payer,
            fee_payer_signature,
            fee_ratio: self.fee_ratio,
        })
    }
}
