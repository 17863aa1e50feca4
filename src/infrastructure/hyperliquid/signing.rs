//! Structured-data signing for exchange actions.
//!
//! The venue authenticates an action by hashing its MessagePack encoding
//! together with the nonce, then verifying an EIP-712 signature over a
//! phantom `Agent` struct whose `connectionId` is that hash. The signing key
//! lives in process memory only; it is never persisted or logged.

use alloy::primitives::{Address, keccak256};
use alloy::signers::SignerSync;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::{SolStruct, eip712_domain};
use anyhow::{Context, Result};
use serde::Serialize;

use super::types::WireSignature;

sol! {
    struct Agent {
        string source;
        bytes32 connectionId;
    }
}

pub struct ActionSigner {
    signer: PrivateKeySigner,
    is_testnet: bool,
}

impl ActionSigner {
    pub fn new(private_key_hex: &str, is_testnet: bool) -> Result<Self> {
        let signer: PrivateKeySigner = private_key_hex
            .trim_start_matches("0x")
            .parse()
            .context("Invalid exchange signing key")?;
        Ok(Self { signer, is_testnet })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Sign one action for submission with the given nonce (wall-clock ms).
    pub fn sign_action<A: Serialize>(&self, action: &A, nonce: u64) -> Result<WireSignature> {
        let mut payload =
            rmp_serde::to_vec_named(action).context("Failed to msgpack-encode action")?;
        payload.extend_from_slice(&nonce.to_be_bytes());
        // Trailing flag byte: 0x00 = signing for our own account, no vault.
        payload.push(0x00);

        let connection_id = keccak256(&payload);

        let agent = Agent {
            source: if self.is_testnet { "b" } else { "a" }.to_string(),
            connectionId: connection_id,
        };

        let domain = eip712_domain! {
            name: "Exchange",
            version: "1",
            chain_id: 1337,
            verifying_contract: Address::ZERO,
        };

        let digest = agent.eip712_signing_hash(&domain);
        let signature = self
            .signer
            .sign_hash_sync(&digest)
            .context("Failed to sign action digest")?;

        // 65-byte r||s||v encoding, v already in 27/28 notation.
        let bytes = signature.as_bytes();
        Ok(WireSignature {
            r: format!("0x{}", hex::encode(&bytes[0..32])),
            s: format!("0x{}", hex::encode(&bytes[32..64])),
            v: bytes[64] as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::hyperliquid::types::{Action, CancelWire};

    // Throwaway test key, not a real account.
    const TEST_KEY: &str = "0x0123456789012345678901234567890123456789012345678901234567890123";

    fn cancel_action() -> Action {
        Action::Cancel {
            cancels: vec![CancelWire { a: 0, o: 42 }],
        }
    }

    #[test]
    fn signing_is_deterministic_for_equal_inputs() {
        let signer = ActionSigner::new(TEST_KEY, false).unwrap();
        let a = signer.sign_action(&cancel_action(), 1_700_000_000_000).unwrap();
        let b = signer.sign_action(&cancel_action(), 1_700_000_000_000).unwrap();
        assert_eq!(a.r, b.r);
        assert_eq!(a.s, b.s);
        assert_eq!(a.v, b.v);
    }

    #[test]
    fn nonce_changes_the_signature() {
        let signer = ActionSigner::new(TEST_KEY, false).unwrap();
        let a = signer.sign_action(&cancel_action(), 1_700_000_000_000).unwrap();
        let b = signer.sign_action(&cancel_action(), 1_700_000_000_001).unwrap();
        assert_ne!((a.r, a.s), (b.r, b.s));
    }

    #[test]
    fn testnet_source_changes_the_signature() {
        let mainnet = ActionSigner::new(TEST_KEY, false).unwrap();
        let testnet = ActionSigner::new(TEST_KEY, true).unwrap();
        let a = mainnet.sign_action(&cancel_action(), 1_700_000_000_000).unwrap();
        let b = testnet.sign_action(&cancel_action(), 1_700_000_000_000).unwrap();
        assert_ne!((a.r, a.s), (b.r, b.s));
    }

    #[test]
    fn signature_components_are_hex_encoded() {
        let signer = ActionSigner::new(TEST_KEY, false).unwrap();
        let sig = signer.sign_action(&cancel_action(), 1).unwrap();
        assert!(sig.r.starts_with("0x") && sig.r.len() == 66);
        assert!(sig.s.starts_with("0x") && sig.s.len() == 66);
        assert!(sig.v == 27 || sig.v == 28);
    }
}
