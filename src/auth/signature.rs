// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EIP-191 personal-message signature recovery.

use alloy::primitives::{Address, Signature};

use crate::error::{ServiceError, ServiceResult};

/// Length of an `r || s || v` signature in bytes.
const SIGNATURE_LEN: usize = 65;

/// Recover the address that produced `signature_hex` over `message`.
///
/// The message is hashed with the `"\x19Ethereum Signed Message:\n" + len`
/// prefix, the same way wallets sign with `personal_sign`. Both `v = 27/28`
/// and `v = 0/1` encodings are accepted; EIP-155 style values are not.
pub fn recover_signer(message: &str, signature_hex: &str) -> ServiceResult<Address> {
    let raw = alloy::hex::decode(signature_hex.trim())
        .map_err(|e| ServiceError::InvalidSignature(format!("not hex: {e}")))?;

    if raw.len() != SIGNATURE_LEN {
        return Err(ServiceError::InvalidSignature(format!(
            "expected {SIGNATURE_LEN} bytes, got {}",
            raw.len()
        )));
    }

    let v = raw[SIGNATURE_LEN - 1];
    if !matches!(v, 0 | 1 | 27 | 28) {
        return Err(ServiceError::InvalidSignature(format!(
            "unsupported recovery id {v}"
        )));
    }

    let signature = Signature::from_raw(&raw)
        .map_err(|e| ServiceError::InvalidSignature(e.to_string()))?;

    signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|e| ServiceError::InvalidSignature(e.to_string()))
}

/// Case-insensitive comparison of a recovered signer with a stored address.
pub fn signer_matches(recovered: &Address, stored: &str) -> bool {
    format!("{recovered:#x}").eq_ignore_ascii_case(stored.trim())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};
    use std::str::FromStr;

    /// Well-known development key (anvil account #0).
    pub(crate) const TEST_KEY: &str =
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    pub(crate) fn test_signer() -> PrivateKeySigner {
        PrivateKeySigner::from_str(TEST_KEY).unwrap()
    }

    pub(crate) fn sign(signer: &PrivateKeySigner, message: &str) -> String {
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
        alloy::hex::encode_prefixed(signature.as_bytes())
    }

    #[test]
    fn recovers_signing_address() {
        let signer = test_signer();
        let sig = sign(&signer, "nonce-123");
        let recovered = recover_signer("nonce-123", &sig).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn different_message_recovers_different_address() {
        let signer = test_signer();
        let sig = sign(&signer, "nonce-123");
        let recovered = recover_signer("nonce-456", &sig).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn accepts_unprefixed_hex() {
        let signer = test_signer();
        let sig = sign(&signer, "hello");
        let bare = sig.trim_start_matches("0x");
        assert_eq!(recover_signer("hello", bare).unwrap(), signer.address());
    }

    #[test]
    fn malformed_signatures_are_rejected() {
        assert!(matches!(
            recover_signer("m", "0xzz"),
            Err(ServiceError::InvalidSignature(_))
        ));
        assert!(matches!(
            recover_signer("m", "0xdeadbeef"),
            Err(ServiceError::InvalidSignature(_))
        ));

        // Right length, invalid recovery id
        let mut raw = vec![1u8; 65];
        raw[64] = 99;
        assert!(matches!(
            recover_signer("m", &alloy::hex::encode(raw)),
            Err(ServiceError::InvalidSignature(_))
        ));
    }

    #[test]
    fn only_personal_sign_recovery_ids_are_accepted() {
        let signer = test_signer();
        let mut raw = alloy::hex::decode(sign(&signer, "hello")).unwrap();

        for v in [0u8, 1, 27, 28] {
            raw[64] = v;
            assert!(recover_signer("hello", &alloy::hex::encode(&raw)).is_ok());
        }
        for v in [2u8, 26, 29, 35, 36, 99] {
            raw[64] = v;
            assert!(matches!(
                recover_signer("hello", &alloy::hex::encode(&raw)),
                Err(ServiceError::InvalidSignature(_))
            ));
        }
    }

    #[test]
    fn signer_match_ignores_case() {
        let address = test_signer().address();
        let upper = format!("{address:#x}").to_uppercase().replacen("0X", "0x", 1);
        assert!(signer_matches(&address, &upper));
        assert!(signer_matches(&address, &address.to_string()));
        assert!(!signer_matches(&address, "0x0000000000000000000000000000000000000001"));
    }
}
