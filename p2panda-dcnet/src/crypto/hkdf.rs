// SPDX-License-Identifier: MIT OR Apache-2.0

//! HKDF-SHA256 key derivation, used to turn raw Diffie-Hellman output into per-round pad seeds.
//!
//! <https://www.rfc-editor.org/rfc/rfc5869>
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;

pub fn hkdf<const N: usize>(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; N], HkdfError> {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; N];
    hk.expand(info, &mut okm)
        .map_err(|_| HkdfError::InvalidLength(N))?;
    Ok(okm)
}

#[derive(Debug, Error)]
pub enum HkdfError {
    #[error("can not derive {0} bytes of key material")]
    InvalidLength(usize),
}
