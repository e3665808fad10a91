//! Cipher factory: turns a (method, password) tunnel credential into a
//! [`Cipher`] capable of producing independent per-connection encryptors and
//! decryptors, the way the upstream framing in [`crate::tunnel`] needs.

use crate::cipher::kdf::evp_bytes_to_key;
use crate::util::{BridgeError, Result};
use aes::{Aes128, Aes192, Aes256};
use chacha20::ChaCha20;
use cipher::{KeyIvInit, StreamCipher};
use rc4::Rc4;

type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;
type Aes192CfbEnc = cfb_mode::Encryptor<Aes192>;
type Aes192CfbDec = cfb_mode::Decryptor<Aes192>;
type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// Any stream cipher that can transform a buffer of bytes in place, in
/// either direction. Encryption and decryption are the same operation for
/// every method this factory supports (XOR against a derived keystream, or
/// CFB's self-synchronizing feedback), so a single trait covers both roles.
pub trait KeystreamCipher: Send {
    fn apply(&mut self, data: &mut [u8]);
}

impl<T: StreamCipher + Send> KeystreamCipher for T {
    fn apply(&mut self, data: &mut [u8]) {
        self.apply_keystream(data);
    }
}

/// Cipher method tags accepted by tunnel configuration strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMethod {
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Chacha20Ietf,
    Rc4Md5,
}

impl CipherMethod {
    /// Parse a method tag, tolerating the legacy Shadowsocks OTA `-auth`
    /// suffix by reducing it to the base method for dispatch purposes. The
    /// caller is responsible for preserving the original string on the wire.
    pub fn parse(raw: &str) -> Result<Self> {
        let base = raw.strip_suffix("-auth").unwrap_or(raw);
        match base {
            "aes-128-cfb" => Ok(Self::Aes128Cfb),
            "aes-192-cfb" => Ok(Self::Aes192Cfb),
            "aes-256-cfb" => Ok(Self::Aes256Cfb),
            "chacha20-ietf" => Ok(Self::Chacha20Ietf),
            "rc4-md5" => Ok(Self::Rc4Md5),
            other => Err(BridgeError::UnsupportedMethod(other.to_string())),
        }
    }

    fn key_len(self) -> usize {
        match self {
            Self::Aes128Cfb => 16,
            Self::Aes192Cfb => 24,
            Self::Aes256Cfb => 32,
            Self::Chacha20Ietf => 32,
            Self::Rc4Md5 => 16,
        }
    }

    fn iv_len(self) -> usize {
        match self {
            Self::Aes128Cfb | Self::Aes192Cfb | Self::Aes256Cfb | Self::Rc4Md5 => 16,
            Self::Chacha20Ietf => 12,
        }
    }
}

/// A derived cipher key for one tunnel credential. Cheap to clone; cloning
/// shares key material but carries no IV or keystream-position state, so
/// every connection must derive its own encryptor/decryptor from a fresh IV.
#[derive(Clone)]
pub struct Cipher {
    method: CipherMethod,
    key: Vec<u8>,
}

impl Cipher {
    /// Derive a new cipher from a method tag and UTF-8 password.
    pub fn new(method_tag: &str, password: &[u8]) -> Result<Self> {
        let method = CipherMethod::parse(method_tag)?;
        let key = evp_bytes_to_key(password, method.key_len());
        Ok(Self { method, key })
    }

    pub fn method(&self) -> CipherMethod {
        self.method
    }

    pub fn iv_len(&self) -> usize {
        self.method.iv_len()
    }

    /// Generate a fresh, unpredictable IV for one connection direction.
    pub fn generate_iv(&self) -> Vec<u8> {
        let len = self.iv_len();
        (0..len).map(|_| rand::random::<u8>()).collect()
    }

    /// Build an encryptor bound to the given IV.
    pub fn encryptor(&self, iv: &[u8]) -> Box<dyn KeystreamCipher> {
        self.stream(iv, true)
    }

    /// Build a decryptor bound to the given IV.
    pub fn decryptor(&self, iv: &[u8]) -> Box<dyn KeystreamCipher> {
        self.stream(iv, false)
    }

    fn stream(&self, iv: &[u8], encrypt: bool) -> Box<dyn KeystreamCipher> {
        match self.method {
            CipherMethod::Aes128Cfb => {
                if encrypt {
                    Box::new(Aes128CfbEnc::new(self.key.as_slice().into(), iv.into()))
                } else {
                    Box::new(Aes128CfbDec::new(self.key.as_slice().into(), iv.into()))
                }
            }
            CipherMethod::Aes192Cfb => {
                if encrypt {
                    Box::new(Aes192CfbEnc::new(self.key.as_slice().into(), iv.into()))
                } else {
                    Box::new(Aes192CfbDec::new(self.key.as_slice().into(), iv.into()))
                }
            }
            CipherMethod::Aes256Cfb => {
                if encrypt {
                    Box::new(Aes256CfbEnc::new(self.key.as_slice().into(), iv.into()))
                } else {
                    Box::new(Aes256CfbDec::new(self.key.as_slice().into(), iv.into()))
                }
            }
            CipherMethod::Chacha20Ietf => {
                Box::new(ChaCha20::new(self.key.as_slice().into(), iv.into()))
            }
            CipherMethod::Rc4Md5 => {
                // Classic Shadowsocks rc4-md5: the per-connection RC4 key is
                // MD5(derived_key || iv), not the derived key directly.
                let mut input = Vec::with_capacity(self.key.len() + iv.len());
                input.extend_from_slice(&self.key);
                input.extend_from_slice(iv);
                let rc4_key = md5::compute(&input).0;
                Box::new(Rc4::new(&rc4_key.into()))
            }
        }
    }
}
