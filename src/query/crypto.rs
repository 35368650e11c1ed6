//! Decryption backing the `decrypt`/`stripDecrypt` operators.
//!
//! The reference implementation these operators were distilled from
//! never decrypted anything — it decoded base64 and handed the bytes
//! back unchanged. That placeholder lineage is still the default here:
//! when `TICKET_DECRYPT_KEY` is unset the operator degrades to the
//! same base64-decode-and-pass-through behavior. Setting the key
//! upgrades it to real AES-CBC/PKCS7 decryption, which the payload is
//! assumed to be framed as (`base64(iv[16] || ciphertext)`).
//!
//! `TICKET_DECRYPT_KEY` itself is hex- or base64-encoded (hex is tried
//! first); the decoded byte length selects AES-128/192/256.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::warn;
use once_cell::sync::Lazy;
use std::env;
use std::sync::Once;

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_LEN: usize = 16;

static DECRYPT_KEY: Lazy<Option<Vec<u8>>> = Lazy::new(|| {
    let raw = env::var("TICKET_DECRYPT_KEY").ok().filter(|k| !k.is_empty())?;
    match decode_key(&raw) {
        Some(key) => Some(key),
        None => {
            warn!(
                "TICKET_DECRYPT_KEY is set but is not valid hex or base64 for a 16/24/32 byte key; \
                 decrypt/stripDecrypt will only base64-decode"
            );
            None
        }
    }
});

static WARN_ONCE: Once = Once::new();

/// Decodes `raw` as hex first, then base64, accepting whichever
/// produces one of the three AES key lengths.
fn decode_key(raw: &str) -> Option<Vec<u8>> {
    if let Some(bytes) = decode_hex(raw) {
        if is_valid_key_length(bytes.len()) {
            return Some(bytes);
        }
    }
    if let Ok(bytes) = BASE64.decode(raw) {
        if is_valid_key_length(bytes.len()) {
            return Some(bytes);
        }
    }
    None
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).ok())
        .collect()
}

fn is_valid_key_length(len: usize) -> bool {
    matches!(len, 16 | 24 | 32)
}

/// Decodes `input` (assumed base64) and, if a key is configured,
/// decrypts it with AES-CBC/PKCS7. Without a key it returns the
/// decoded bytes unchanged, matching the legacy placeholder.
///
/// Malformed base64 or a ciphertext too short to carry an IV returns
/// the original string untouched rather than erroring the whole row —
/// `decrypt` is a best-effort display transform, not a correctness
/// boundary.
pub fn decrypt(input: &str) -> String {
    let Ok(raw) = BASE64.decode(input) else {
        return input.to_string();
    };

    match DECRYPT_KEY.as_deref() {
        None => {
            WARN_ONCE.call_once(|| {
                warn!(
                    "TICKET_DECRYPT_KEY is not set; decrypt/stripDecrypt will only base64-decode"
                );
            });
            String::from_utf8_lossy(&raw).into_owned()
        }
        Some(key) => decrypt_aes_cbc(&raw, key).unwrap_or(input.to_string()),
    }
}

fn decrypt_aes_cbc(raw: &[u8], key: &[u8]) -> Option<String> {
    if raw.len() <= IV_LEN {
        return None;
    }
    let (iv, ciphertext) = raw.split_at(IV_LEN);
    let mut buf = ciphertext.to_vec();

    let plaintext: &[u8] = match key.len() {
        16 => Aes128CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .ok()?,
        24 => Aes192CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .ok()?,
        32 => Aes256CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .ok()?,
        _ => return None,
    };

    Some(String::from_utf8_lossy(plaintext).into_owned())
}
