//! Cryptography for the login encryption exchange.
//!
//! The proxy generates one RSA keypair at startup and challenges online clients with a verify
//! token. Once the client's encryption response checks out, the connection derives AES-CFB8
//! stream ciphers from the shared secret and flips its [`EncryptedStream`] from pass-through to
//! encrypting, covering both directions for the rest of the connection.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut};
use cfb8::cipher::KeyIvInit;
use num_bigint::BigInt;
use portal_packets::VerifyToken;
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// The bit length of the generated RSA keypair. The vanilla server uses 1024-bit keys as well;
/// the key only protects a short-lived shared secret.
const RSA_KEY_BITS: usize = 1024;

/// The internal error type for all errors related to the login cryptography.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("rsa operation failed: {0}")]
    IllegalRsa(#[from] rsa::Error),

    #[error("could not encode the public key: {0}")]
    EncodingFailed(#[from] rsa::pkcs8::spki::Error),

    #[error("failed to retrieve randomness: {0}")]
    UnavailableRandom(#[from] rand::Error),

    #[error("invalid cipher key length: {0}")]
    InvalidCipherLength(#[from] cfb8::cipher::InvalidLength),

    #[error("invalid verification token received: {actual:?} (expected: {expected:?})")]
    InvalidVerifyToken {
        expected: VerifyToken,
        actual: Vec<u8>,
    },
}

pub fn generate_keypair() -> Result<(RsaPrivateKey, RsaPublicKey), Error> {
    // retrieve a new mutable instance of an OS RNG
    let mut rng = OsRng;

    // generate the corresponding key pair
    let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?;
    let public_key = RsaPublicKey::from(&private_key);

    Ok((private_key, public_key))
}

pub fn encode_public_key(key: &RsaPublicKey) -> Result<Vec<u8>, Error> {
    let encoded = key.to_public_key_der()?;

    Ok(encoded.to_vec())
}

pub fn decrypt(key: &RsaPrivateKey, value: &[u8]) -> Result<Vec<u8>, Error> {
    Ok(key.decrypt(Pkcs1v15Encrypt, value)?)
}

pub fn generate_token() -> Result<VerifyToken, Error> {
    // retrieve a new mutable instance of an OS RNG
    let mut rng = OsRng;

    // populate the random bytes
    let mut data = [0u8; 32];
    rng.try_fill_bytes(&mut data)?;

    Ok(data)
}

pub fn verify_token(expected: VerifyToken, actual: &[u8]) -> Result<(), Error> {
    if expected != actual {
        return Err(Error::InvalidVerifyToken {
            expected,
            actual: actual.to_vec(),
        });
    }

    Ok(())
}

/// Creates the "server hash" the session service expects for a join verification.
pub fn server_hash(server_id: &str, shared_secret: &[u8], encoded_public: &[u8]) -> String {
    // create a new hasher instance
    let mut hasher = Sha1::new();

    // server id
    hasher.update(server_id.as_bytes());
    // shared secret
    hasher.update(shared_secret);
    // encoded public key
    hasher.update(encoded_public);

    // take the digest and convert it to Minecraft's format
    BigInt::from_signed_bytes_be(&hasher.finalize()).to_str_radix(16)
}

type Aes128Cfb8Enc = cfb8::Encryptor<aes::Aes128>;
type Aes128Cfb8Dec = cfb8::Decryptor<aes::Aes128>;

/// A socket wrapper that carries the connection's encryption state.
///
/// Every connection starts as a transparent pass-through. After a successful encryption exchange
/// the shared secret is handed to [`enable_encryption`](Self::enable_encryption), and from then on
/// written bytes pass the AES-CFB8 encryptor and read bytes the matching decryptor. The protocol
/// keys both directions with the same secret (the secret doubles as IV), and CFB8 works byte by
/// byte, which is what makes encrypting the already-read slice in place sound.
pub struct EncryptedStream<S> {
    inner: S,
    write_cipher: Option<Aes128Cfb8Enc>,
    read_cipher: Option<Aes128Cfb8Dec>,
}

impl<S> EncryptedStream<S> {
    /// Wraps a socket with encryption not (yet) enabled.
    pub fn plain(inner: S) -> Self {
        Self {
            inner,
            write_cipher: None,
            read_cipher: None,
        }
    }

    /// Derives the ciphers for both directions from the shared secret and enables them.
    ///
    /// Everything written or read after this call is encrypted; bytes already exchanged are not
    /// touched. The secret must be a valid AES-128 key (16 bytes).
    pub fn enable_encryption(&mut self, shared_secret: &[u8]) -> Result<(), Error> {
        self.write_cipher = Some(Aes128Cfb8Enc::new_from_slices(shared_secret, shared_secret)?);
        self.read_cipher = Some(Aes128Cfb8Dec::new_from_slices(shared_secret, shared_secret)?);

        Ok(())
    }

    pub fn is_encrypted(&self) -> bool {
        self.write_cipher.is_some()
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for EncryptedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, std::io::Error>> {
        let this = self.get_mut();

        match &mut this.write_cipher {
            None => Pin::new(&mut this.inner).poll_write(cx, buf),
            Some(cipher) => {
                let mut ciphertext = buf.to_vec();
                for byte in &mut ciphertext {
                    cipher.encrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(
                        byte,
                    )));
                }
                Pin::new(&mut this.inner).poll_write(cx, &ciphertext)
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), std::io::Error>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for EncryptedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        let already_filled = buf.filled().len();
        let result = Pin::new(&mut this.inner).poll_read(cx, buf);

        // only the bytes this poll produced may be decrypted, and only on success
        if let (Poll::Ready(Ok(())), Some(cipher)) = (&result, &mut this.read_cipher) {
            for byte in &mut buf.filled_mut()[already_filled..] {
                cipher.decrypt_block_mut(GenericArray::from_mut_slice(std::slice::from_mut(byte)));
            }
        }

        result
    }
}
