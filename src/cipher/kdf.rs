//! OpenSSL-compatible `EVP_BytesToKey` key derivation.
//!
//! Classic Shadowsocks stream ciphers derive their key from the tunnel
//! password with the same iterated-MD5 construction OpenSSL's `EVP_BytesToKey`
//! uses with a null salt: `D_1 = MD5(password)`, `D_i = MD5(D_{i-1} || password)`,
//! key = `D_1 || D_2 || ...` truncated to `key_len`.

/// Derive `key_len` bytes of key material from a password.
pub fn evp_bytes_to_key(password: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut input = Vec::with_capacity(prev.len() + password.len());
        input.extend_from_slice(&prev);
        input.extend_from_slice(password);
        let digest = md5::compute(&input);
        prev = digest.0.to_vec();
        key.extend_from_slice(&prev);
    }

    key.truncate(key_len);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_deterministic_key() {
        let a = evp_bytes_to_key(b"hunter2", 32);
        let b = evp_bytes_to_key(b"hunter2", 32);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn different_passwords_diverge() {
        let a = evp_bytes_to_key(b"hunter2", 16);
        let b = evp_bytes_to_key(b"hunter3", 16);
        assert_ne!(a, b);
    }

    #[test]
    fn longer_keys_extend_the_same_prefix_digests() {
        let short = evp_bytes_to_key(b"password", 16);
        let long = evp_bytes_to_key(b"password", 32);
        assert_eq!(&long[..16], &short[..]);
    }
}
