//! Deployment fingerprints.
//!
//! A fingerprint captures the inputs that define a deployment: the contract
//! type and the resolved constructor arguments. It is stored in every ledger
//! record so a rerun can notice that the declared inputs drifted from what is
//! on-chain. Drift is only reported; redeploying stays an explicit decision.

use sha2::{Digest, Sha256};

use crate::types::{ResolvedValue, encode_params};

/// Computes the SHA-256 fingerprint of a deployment, hex encoded.
///
/// Arguments are hashed in their ABI encoding, so two declarations that
/// encode to the same calldata share a fingerprint.
pub fn compute(contract: &str, args: &[ResolvedValue]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(contract.as_bytes());
    hasher.update([0u8]);
    hasher.update(encode_params(args));
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::{Address, U256};

    fn args() -> Vec<ResolvedValue> {
        vec![
            ResolvedValue::Address(Address::repeat_byte(0xaa)),
            ResolvedValue::String("Cryptex Meme Index".to_string()),
            ResolvedValue::Uint(U256::from(18)),
        ]
    }

    #[test]
    fn test_fingerprint_determinism() {
        let first = compute("SetToken", &args());
        let second = compute("SetToken", &args());

        assert_eq!(first, second, "Fingerprint should be deterministic");
        assert_eq!(first.len(), 64, "SHA-256 fingerprint should be 64 hex characters");
    }

    #[test]
    fn test_fingerprint_changes_with_contract() {
        assert_ne!(
            compute("SetToken", &args()),
            compute("MockERC20", &args()),
            "Fingerprint should change when the contract type changes"
        );
    }

    #[test]
    fn test_fingerprint_changes_with_args() {
        let mut changed = args();
        changed[2] = ResolvedValue::Uint(U256::from(6));

        assert_ne!(
            compute("SetToken", &args()),
            compute("SetToken", &changed),
            "Fingerprint should change when an argument changes"
        );
    }

    #[test]
    fn test_fingerprint_changes_with_argument_order() {
        let mut reordered = args();
        reordered.swap(0, 2);

        assert_ne!(compute("SetToken", &args()), compute("SetToken", &reordered));
    }
}
