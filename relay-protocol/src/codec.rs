//! # Descriptor Codec
//!
//! Symmetric protection of the descriptor while it travels from the trusted
//! backend to the relay, under a single 256-bit key shared out-of-band.
//!
//! ## Wire Format
//!
//! ```text
//! <hex(iv)>:<hex(ciphertext)>
//! ```
//!
//! - `iv`: 16 random bytes, fresh for every call to [`encode`]
//! - `ciphertext`: AES-256-CBC with PKCS#7 padding
//!
//! There is no authentication tag. A modified ciphertext either fails to
//! unpad or decrypts to garbage that the validator rejects, but neither is
//! guaranteed; the key must stay secret.

use crate::error::{DescriptorError, DescriptorResult, KeyError};
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::str::FromStr;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Length of the initialization vector in bytes (one AES block).
pub const IV_LEN: usize = 16;

/// Length of the shared secret in bytes.
pub const KEY_LEN: usize = 32;

const BLOCK_LEN: usize = 16;
const SEPARATOR: char = ':';

/// The shared 256-bit secret, loaded once at startup from its hex form.
#[derive(Clone, PartialEq, Eq)]
pub struct DescriptorKey([u8; KEY_LEN]);

impl DescriptorKey {
    /// Parses a 64-character hex string into a key.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(s.trim()).map_err(|_| KeyError::InvalidHex)?;
        let key: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidLength(bytes.len()))?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a random key (for provisioning and tests).
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for DescriptorKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for DescriptorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DescriptorKey(<redacted>)")
    }
}

/// Encrypts `plaintext` under `key` and returns the wire string.
pub fn encode(plaintext: &[u8], key: &DescriptorKey) -> String {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    // Key and IV lengths are fixed by the types above.
    let ciphertext = Aes256CbcEnc::new(key.as_bytes().into(), iv.as_slice().into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    format!("{}{}{}", hex::encode(iv), SEPARATOR, hex::encode(ciphertext))
}

/// Decrypts a wire string produced by [`encode`].
///
/// Shape problems (separator, hex, IV length) are reported as
/// [`DescriptorError::MalformedPayload`]; everything the cipher rejects is
/// [`DescriptorError::DecryptionFailure`].
pub fn decode(wire: &str, key: &DescriptorKey) -> DescriptorResult<Vec<u8>> {
    let (iv_hex, ct_hex) = wire
        .split_once(SEPARATOR)
        .ok_or_else(|| DescriptorError::MalformedPayload("missing ':' separator".into()))?;

    if iv_hex.is_empty() {
        return Err(DescriptorError::MalformedPayload("missing iv".into()));
    }
    if ct_hex.is_empty() {
        return Err(DescriptorError::MalformedPayload("missing ciphertext".into()));
    }

    let iv = hex::decode(iv_hex)
        .map_err(|e| DescriptorError::MalformedPayload(format!("iv is not hex: {e}")))?;
    if iv.len() != IV_LEN {
        return Err(DescriptorError::MalformedPayload(format!(
            "iv must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }

    let ciphertext = hex::decode(ct_hex)
        .map_err(|e| DescriptorError::MalformedPayload(format!("ciphertext is not hex: {e}")))?;
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(DescriptorError::DecryptionFailure(format!(
            "ciphertext length {} is not a multiple of the block size",
            ciphertext.len()
        )));
    }

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| DescriptorError::DecryptionFailure(format!("invalid key: {e}")))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| DescriptorError::DecryptionFailure("invalid padding".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> DescriptorKey {
        DescriptorKey::from_bytes([7u8; KEY_LEN])
    }

    #[test]
    fn decode_reverses_encode() {
        let key = key();
        for plaintext in [&b""[..], b"x", b"exactly sixteen!", br#"{"guestId":1}"#] {
            let wire = encode(plaintext, &key);
            assert_eq!(decode(&wire, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn encode_uses_a_fresh_iv_each_time() {
        let key = key();
        let a = encode(b"same input", &key);
        let b = encode(b"same input", &key);
        assert_ne!(a, b);
        assert_ne!(a.split_once(':').unwrap().0, b.split_once(':').unwrap().0);
    }

    #[test]
    fn wire_string_is_lowercase_hex_iv_and_ciphertext() {
        let wire = encode(b"hello", &key());
        let (iv, ct) = wire.split_once(':').unwrap();
        assert_eq!(iv.len(), IV_LEN * 2);
        assert_eq!(ct.len(), BLOCK_LEN * 2);
        assert!(wire
            .chars()
            .all(|c| c == ':' || c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn missing_separator_is_malformed() {
        let err = decode("not-a-valid-payload", &key()).unwrap_err();
        assert!(matches!(err, DescriptorError::MalformedPayload(_)));
    }

    #[test]
    fn empty_halves_are_malformed() {
        let wire = encode(b"hello", &key());
        let (iv, ct) = wire.split_once(':').unwrap();
        for bad in [format!(":{ct}"), format!("{iv}:"), ":".to_string()] {
            assert!(matches!(
                decode(&bad, &key()),
                Err(DescriptorError::MalformedPayload(_))
            ));
        }
    }

    #[test]
    fn non_hex_is_malformed() {
        let wire = encode(b"hello", &key());
        let (iv, ct) = wire.split_once(':').unwrap();
        let bad_iv = format!("zz{}:{ct}", &iv[2..]);
        let bad_ct = format!("{iv}:{}zz", &ct[..ct.len() - 2]);
        let odd_ct = format!("{iv}:{}", &ct[..ct.len() - 1]);
        for bad in [bad_iv, bad_ct, odd_ct] {
            assert!(matches!(
                decode(&bad, &key()),
                Err(DescriptorError::MalformedPayload(_))
            ));
        }
    }

    #[test]
    fn wrong_iv_length_is_malformed() {
        let wire = encode(b"hello", &key());
        let (iv, ct) = wire.split_once(':').unwrap();
        let short = format!("{}:{ct}", &iv[..30]);
        assert!(matches!(
            decode(&short, &key()),
            Err(DescriptorError::MalformedPayload(_))
        ));
    }

    #[test]
    fn partial_block_fails_decryption() {
        let wire = encode(b"hello", &key());
        let (iv, ct) = wire.split_once(':').unwrap();
        let truncated = format!("{iv}:{}", &ct[..ct.len() - 2]);
        assert!(matches!(
            decode(&truncated, &key()),
            Err(DescriptorError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn wrong_key_never_yields_the_plaintext() {
        let plaintext = br#"{"guestId":1000,"guestType":"qemu"}"#;
        let wire = encode(plaintext, &key());
        let other = DescriptorKey::from_bytes([8u8; KEY_LEN]);
        match decode(&wire, &other) {
            Err(DescriptorError::DecryptionFailure(_)) => {}
            Ok(garbage) => assert_ne!(garbage, plaintext),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn flipped_ciphertext_is_rejected() {
        let descriptor = crate::ConnectionDescriptor {
            guest_id: 1000,
            guest_type: crate::GuestType::Qemu,
            host: "pve01.example.com".into(),
            node: "pve01".into(),
            auth_ticket: "PVEAPIToken=root@pam!relay=secret".into(),
            console_ticket: "PVEVNC:ticket".into(),
            port: 5900,
        };
        let key = key();
        let wire = encode(descriptor.to_json().as_bytes(), &key);
        assert_eq!(crate::open(&wire, &key).unwrap(), descriptor);

        let (iv, ct) = wire.split_once(':').unwrap();
        // First, middle and last block of the ciphertext.
        for pos in [0, ct.len() / 2, ct.len() - 1] {
            let mut tampered: Vec<u8> = ct.bytes().collect();
            tampered[pos] = if tampered[pos] == b'0' { b'f' } else { b'0' };
            let tampered = format!("{iv}:{}", String::from_utf8(tampered).unwrap());
            assert!(
                crate::open(&tampered, &key).is_err(),
                "tampered hex digit {pos} was accepted"
            );
        }
    }

    #[test]
    fn key_from_hex_checks_shape() {
        let hex_key = "ab".repeat(KEY_LEN);
        assert_eq!(DescriptorKey::from_hex(&hex_key).unwrap().to_hex(), hex_key);
        assert_eq!(
            DescriptorKey::from_hex("abcd"),
            Err(KeyError::InvalidLength(2))
        );
        assert_eq!(
            DescriptorKey::from_hex(&"zz".repeat(KEY_LEN)),
            Err(KeyError::InvalidHex)
        );
        assert_eq!("".parse::<DescriptorKey>(), Err(KeyError::InvalidLength(0)));
    }

    #[test]
    fn key_debug_is_redacted() {
        let key = DescriptorKey::from_hex(&"ab".repeat(KEY_LEN)).unwrap();
        assert!(!format!("{key:?}").contains("abab"));
    }
}
