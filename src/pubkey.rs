//! Encoding an RSA public key in the ADB format: modulus and Montgomery
//! parameters as little-endian 32-bit-limb arrays, base64-encoded, matching
//! the upstream `adbkey.pub` byte layout so existing device trust lists
//! keep working.

use crate::error::AdbError;
use base64::Engine;
use byteorder::{WriteBytesExt, LE};
use num_bigint_dig::traits::ModInverse;
use num_bigint_dig::{BigUint as DigBigUint, IntoBigInt};
use num_traits::ToPrimitive;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use std::io::{Cursor, Write};

const RSA_KEY_SIZE_WORDS: u32 = 64;
const RSA_KEY_SIZE_BYTES: usize = 256;
const ANDROID_PUBKEY_EXPONENT: u32 = 65537;

/// The ADB-format encoding of an RSA public key.
#[derive(Debug, Eq, PartialEq)]
pub struct AndroidPublicKey {
    modulus_size_words: u32,
    /// Montgomery parameter: -1 / n[0] mod 2^32
    n0inv: u32,
    modulus: [u8; RSA_KEY_SIZE_BYTES],
    /// Montgomery parameter R^2 mod n
    rr: [u8; RSA_KEY_SIZE_BYTES],
    exponent: u32,
}

fn to_dig(value: &rsa::BigUint) -> DigBigUint {
    DigBigUint::from_bytes_le(&value.to_bytes_le())
}

impl AndroidPublicKey {
    pub fn new(public: &RsaPublicKey) -> Result<Self, AdbError> {
        let n = to_dig(public.n());
        let n_bytes = n.to_bytes_le();
        if n_bytes.len() > RSA_KEY_SIZE_BYTES {
            return Err(AdbError::KeyStore(
                "RSA key is not 2048-bit, cannot encode in ADB format".into(),
            ));
        }
        let mut modulus = [0u8; RSA_KEY_SIZE_BYTES];
        modulus[..n_bytes.len()].copy_from_slice(&n_bytes);

        let r32 = DigBigUint::from(1u8) << 32;
        let n0inv = (&n % &r32)
            .mod_inverse(&r32)
            .ok_or_else(|| AdbError::KeyStore("modulus has no inverse mod 2^32".into()))?;
        let n0inv = r32.into_bigint().unwrap() - n0inv;
        let n0inv = n0inv
            .to_u32()
            .ok_or_else(|| AdbError::KeyStore("n0inv did not fit in u32".into()))?;

        let r = DigBigUint::from(1u8) << (RSA_KEY_SIZE_BYTES * 8);
        let rr = (&r * &r) % &n;
        let rr_bytes = rr.to_bytes_le();
        let mut rr = [0u8; RSA_KEY_SIZE_BYTES];
        rr[..rr_bytes.len()].copy_from_slice(&rr_bytes);

        let exponent = public
            .e()
            .to_u32()
            .filter(|e| *e == ANDROID_PUBKEY_EXPONENT)
            .ok_or_else(|| AdbError::KeyStore("RSA exponent must be 65537".into()))?;

        Ok(Self {
            modulus_size_words: RSA_KEY_SIZE_WORDS,
            n0inv,
            modulus,
            rr,
            exponent,
        })
    }

    /// Encodes as `base64(struct) + "\0"`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 4 + RSA_KEY_SIZE_BYTES * 2 + 4);
        let mut c = Cursor::new(&mut buf);
        c.write_u32::<LE>(self.modulus_size_words).unwrap();
        c.write_u32::<LE>(self.n0inv).unwrap();
        c.write_all(&self.modulus).unwrap();
        c.write_all(&self.rr).unwrap();
        c.write_u32::<LE>(self.exponent).unwrap();
        let mut blob = base64::engine::general_purpose::STANDARD.encode(&buf).into_bytes();
        blob.push(0);
        blob
    }

    #[cfg(test)]
    pub fn decode(encoded: &str) -> Result<Self, AdbError> {
        use byteorder::ReadBytesExt;
        use std::io::Read;
        let buf = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| AdbError::KeyStore(e.to_string()))?;
        let mut c = Cursor::new(buf);
        let modulus_size_words = c.read_u32::<LE>()?;
        let n0inv = c.read_u32::<LE>()?;
        let mut modulus = [0u8; RSA_KEY_SIZE_BYTES];
        c.read_exact(&mut modulus)?;
        let mut rr = [0u8; RSA_KEY_SIZE_BYTES];
        c.read_exact(&mut rr)?;
        let exponent = c.read_u32::<LE>()?;
        Ok(Self {
            modulus_size_words,
            n0inv,
            modulus,
            rr,
            exponent,
        })
    }
}
