use core::fmt;

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Length of the truncated HMAC-SHA1-96 trailer on authenticated packets.
pub(crate) const INTEGRITY_TRAILER_LEN: usize = 12;

/// A minimal secret container that zeroizes its contents on drop.
///
/// Used for stored passwords and the optional BMC key (Kg); never printed via `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn to_key_sha1(&self) -> [u8; 20] {
        normalize_key_sha1(self.expose())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Keys negotiated at the end of the RAKP exchange.
///
/// `k1` signs packets, `aes_key` (first 16 bytes of `k2`) encrypts payloads.
#[derive(Clone)]
pub(crate) struct SessionKeys {
    pub(crate) sik: [u8; 20],
    pub(crate) k1: [u8; 20],
    pub(crate) k2: [u8; 20],
    pub(crate) aes_key: [u8; 16],
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKeys(<secret>)")
    }
}

impl Drop for SessionKeys {
    fn drop(&mut self) {
        self.sik.zeroize();
        self.k1.zeroize();
        self.k2.zeroize();
        self.aes_key.zeroize();
    }
}

pub(crate) type HmacSha1 = Hmac<Sha1>;

/// Normalize a secret (password/Kg) into a fixed 20-byte key for SHA1-based RAKP.
///
/// IPMI implementations treat the user key as a fixed-size array where the
/// provided secret is truncated and the remainder is zero-padded.
pub(crate) fn normalize_key_sha1(secret: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    let n = secret.len().min(out.len());
    out[..n].copy_from_slice(&secret[..n]);
    out
}

pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// HMAC-SHA1 over the concatenation of `parts`.
pub(crate) fn hmac_sha1_parts(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 20]> {
    let mut mac =
        <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| Error::Crypto("invalid HMAC key"))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

pub(crate) fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<[u8; 20]> {
    hmac_sha1_parts(key, &[data])
}

/// First 96 bits of an HMAC-SHA1 value.
pub(crate) fn truncate_96(full: &[u8; 20]) -> [u8; 12] {
    let mut out = [0u8; INTEGRITY_TRAILER_LEN];
    out.copy_from_slice(&full[..INTEGRITY_TRAILER_LEN]);
    out
}

/// HMAC-SHA1-96: the first 12 bytes of HMAC-SHA1.
pub(crate) fn hmac_sha1_truncated_12(key: &[u8], data: &[u8]) -> Result<[u8; 12]> {
    Ok(truncate_96(&hmac_sha1(key, data)?))
}

/// `K1 = HMAC(SIK, 0x01 * 20)`, `K2 = HMAC(SIK, 0x02 * 20)`.
pub(crate) fn derive_k1_k2_sha1(sik: &[u8; 20]) -> Result<([u8; 20], [u8; 20])> {
    Ok((hmac_sha1(sik, &[0x01; 20])?, hmac_sha1(sik, &[0x02; 20])?))
}

pub(crate) fn derive_aes_key_from_k2(k2: &[u8; 20]) -> [u8; 16] {
    let mut key = [0u8; 16];
    key.copy_from_slice(&k2[..16]);
    key
}

/// Compute the Session Integrity Key (`HMAC(Kg, Rm | Rc | Role | ULen | UName)`)
/// and everything derived from it.
pub(crate) fn derive_keys(
    kg: &[u8; 20],
    console_random: &[u8; 16],
    bmc_random: &[u8; 16],
    role: u8,
    username: &[u8],
) -> Result<SessionKeys> {
    let sik = hmac_sha1_parts(
        kg,
        &[
            console_random,
            bmc_random,
            &[role, username.len() as u8],
            username,
        ],
    )?;
    let (k1, k2) = derive_k1_k2_sha1(&sik)?;
    Ok(SessionKeys {
        sik,
        k1,
        k2,
        aes_key: derive_aes_key_from_k2(&k2),
    })
}

/// Check the HMAC-SHA1-96 trailer of a complete RMCP+ datagram.
///
/// The authenticated range runs from the auth type byte (offset 4) up to the
/// trailer; the last 12 bytes are the truncated MAC.
pub(crate) fn verify_integrity(raw: &[u8], k1: &[u8; 20]) -> bool {
    let Some(tag_start) = raw.len().checked_sub(INTEGRITY_TRAILER_LEN).filter(|&n| n >= 4) else {
        return false;
    };
    hmac_sha1_truncated_12(k1, &raw[4..tag_start])
        .is_ok_and(|expected| ct_eq(&expected, &raw[tag_start..]))
}

/// Encrypt an IPMI payload with AES-CBC-128 under a fresh random IV.
///
/// The confidentiality trailer is `[1, 2, .., pad_len, pad_len]` so that the
/// plaintext ends on a block boundary.
pub(crate) fn encrypt_payload(payload: &[u8], aes_key: &[u8; 16]) -> Result<([u8; 16], Vec<u8>)> {
    let mut iv = [0u8; 16];
    rand::rng().fill_bytes(&mut iv);
    let ciphertext = encrypt_payload_with_iv(payload, aes_key, &iv)?;
    Ok((iv, ciphertext))
}

pub(crate) fn encrypt_payload_with_iv(
    payload: &[u8],
    aes_key: &[u8; 16],
    iv: &[u8; 16],
) -> Result<Vec<u8>> {
    let pad_len = (16 - (payload.len() + 1) % 16) % 16;

    let mut plaintext = payload.to_vec();
    plaintext.extend(1..=pad_len as u8);
    plaintext.push(pad_len as u8);

    aes128_cbc_encrypt(aes_key, iv, &plaintext)
}

/// Decrypt an AES-CBC-128 payload and strip the confidentiality trailer.
///
/// Pad bytes are checked, not just skipped: anything but `1, 2, ..` is an error.
pub(crate) fn decrypt_payload(
    iv: &[u8; 16],
    ciphertext: &[u8],
    aes_key: &[u8; 16],
) -> Result<Vec<u8>> {
    if ciphertext.is_empty() {
        return Err(Error::Crypto("empty AES-CBC ciphertext"));
    }
    let mut plaintext = aes128_cbc_decrypt(aes_key, iv, ciphertext)?;

    let Some((&pad_len, body)) = plaintext.split_last() else {
        return Err(Error::Crypto("missing confidentiality pad length"));
    };
    let pad_len = pad_len as usize;
    let Some(trailer_start) = body.len().checked_sub(pad_len) else {
        return Err(Error::Crypto("invalid confidentiality pad length"));
    };
    if !body[trailer_start..]
        .iter()
        .zip(1u8..)
        .all(|(&b, expected)| b == expected)
    {
        return Err(Error::Crypto("invalid confidentiality pad bytes"));
    }

    plaintext.truncate(trailer_start);
    Ok(plaintext)
}

/// IPMI two's complement checksum: the byte that makes the sum of `bytes` zero.
pub(crate) fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

fn aes128(key: &[u8; 16]) -> Result<Aes128> {
    Aes128::new_from_slice(key).map_err(|_| Error::Crypto("invalid AES-128 key"))
}

/// AES-128-CBC encryption without padding; `plaintext` must be whole blocks.
pub(crate) fn aes128_cbc_encrypt(
    key: &[u8; 16],
    iv: &[u8; 16],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    if !plaintext.len().is_multiple_of(16) {
        return Err(Error::Crypto(
            "AES-CBC plaintext length must be a multiple of 16",
        ));
    }
    let cipher = aes128(key)?;

    let mut out = Vec::with_capacity(plaintext.len());
    let mut chain = GenericArray::clone_from_slice(iv);
    for block in plaintext.chunks_exact(16) {
        chain.iter_mut().zip(block).for_each(|(c, p)| *c ^= p);
        cipher.encrypt_block(&mut chain);
        out.extend_from_slice(&chain);
    }
    Ok(out)
}

/// AES-128-CBC decryption without padding; `ciphertext` must be whole blocks.
pub(crate) fn aes128_cbc_decrypt(
    key: &[u8; 16],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    if !ciphertext.len().is_multiple_of(16) {
        return Err(Error::Crypto(
            "AES-CBC ciphertext length must be a multiple of 16",
        ));
    }
    let cipher = aes128(key)?;

    let mut out = Vec::with_capacity(ciphertext.len());
    let mut previous: &[u8] = iv;
    for block in ciphertext.chunks_exact(16) {
        let mut plain = GenericArray::clone_from_slice(block);
        cipher.decrypt_block(&mut plain);
        out.extend(plain.iter().zip(previous).map(|(p, c)| p ^ c));
        previous = block;
    }
    Ok(out)
}
