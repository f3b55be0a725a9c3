//! 2FA password-update KDF (§4.2 `update_2fa`, §9 "SRP password update").
//!
//! Bit-exact per the contract: `x = PBKDF2-HMAC-SHA512(SHA-256(SHA-256(pw)),
//! salt, 100 000 iters, 64 bytes)`, `v = g^x mod p` with `g=2` and the RFC
//! 5054 2048-bit group, `v` left-padded to 256 bytes. Any deviation breaks
//! auth against a real session, so nothing here is "simplified" relative to
//! the contract even though it looks like a handful of lines.

use hmac::Hmac;
use num_bigint::BigUint;
use sha2::{Digest, Sha256, Sha512};

const PBKDF2_ITERATIONS: u32 = 100_000;
const X_LEN: usize = 64;
pub const VERIFIER_LEN: usize = 256;

/// RFC 5054 2048-bit group prime (hex), the same constant `grammers-crypto`
/// uses for MTProto's SRP exchange.
const PRIME_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

fn sha256_twice(password: &str) -> [u8; 32] {
    let first = Sha256::digest(password.as_bytes());
    let second = Sha256::digest(first);
    second.into()
}

/// Derives `x` (as an unsigned big integer) from a password and salt.
pub fn derive_x(password: &str, salt: &[u8]) -> BigUint {
    let hashed_password = sha256_twice(password);
    let mut x_bytes = [0u8; X_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha512>>(&hashed_password, salt, PBKDF2_ITERATIONS, &mut x_bytes)
        .expect("64-byte output is a valid PBKDF2-HMAC-SHA512 length");
    BigUint::from_bytes_be(&x_bytes)
}

fn group_prime() -> BigUint {
    BigUint::parse_bytes(PRIME_HEX.as_bytes(), 16).expect("RFC 5054 constant parses as hex")
}

/// Computes `v = g^x mod p` and left-pads it to [`VERIFIER_LEN`] bytes.
pub fn derive_verifier(password: &str, salt: &[u8]) -> Vec<u8> {
    let x = derive_x(password, salt);
    let g = BigUint::from(2u32);
    let p = group_prime();
    let v = g.modpow(&x, &p);

    let raw = v.to_bytes_be();
    let mut padded = vec![0u8; VERIFIER_LEN];
    let offset = VERIFIER_LEN.saturating_sub(raw.len());
    padded[offset..].copy_from_slice(&raw[raw.len().saturating_sub(VERIFIER_LEN)..]);
    padded
}
