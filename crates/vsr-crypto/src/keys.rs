//! RSA keypair handling for the handshake: 2048-bit keys, OAEP/SHA-256 wrapping,
//! PSS/SHA-256 signing.

use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};

use crate::error::SessionError;

pub const RSA_KEY_BITS: usize = 2048;

/// An RSA keypair used for the handshake and for signing coordinator payloads.
pub struct Keypair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl Keypair {
    /// Generate a fresh 2048-bit RSA keypair.
    pub fn generate() -> Result<Self, SessionError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)?;
        let public_key = RsaPublicKey::from(&private_key);
        Ok(Self {
            private_key,
            public_key,
        })
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Export the public key as a PEM string, sent in the handshake.
    pub fn public_key_pem(&self) -> Result<String, SessionError> {
        self.public_key
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .map_err(|e| SessionError::Pkcs8(e.to_string()))
    }

    /// Decrypt a symmetric key/payload wrapped with this keypair's public key.
    pub fn decrypt_oaep(&self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        self.private_key
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(SessionError::from)
    }

    /// Sign an arbitrary payload with PSS/SHA-256.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let mut rng = rand::thread_rng();
        let signature = signing_key.sign_with_rng(&mut rng, message);
        signature.to_vec()
    }
}

/// Parse a PEM-encoded RSA public key received from a peer.
pub fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, SessionError> {
    RsaPublicKey::from_public_key_pem(pem).map_err(|e| SessionError::Pkcs8(e.to_string()))
}

/// Encrypt `plaintext` with a peer's public key, OAEP/SHA-256 padding. Used to wrap
/// the 256-bit symmetric session key for transport in `server_hello`.
pub fn encrypt_oaep(public_key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext)
        .map_err(SessionError::from)
}

/// Verify a PSS/SHA-256 signature against a peer's public key.
pub fn verify(public_key: &RsaPublicKey, message: &[u8], signature: &[u8]) -> Result<(), SessionError> {
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let signature = Signature::try_from(signature).map_err(|e| SessionError::Signature(e.to_string()))?;
    verifying_key
        .verify(message, &signature)
        .map_err(|e| SessionError::Signature(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oaep_round_trips_through_a_keypair() {
        let keypair = Keypair::generate().unwrap();
        let plaintext = b"0123456789abcdef0123456789abcdef";
        let ciphertext = encrypt_oaep(keypair.public_key(), plaintext).unwrap();
        let recovered = keypair.decrypt_oaep(&ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn pss_signature_verifies_against_public_key() {
        let keypair = Keypair::generate().unwrap();
        let message = b"hello worker fleet";
        let signature = keypair.sign(message);
        verify(keypair.public_key(), message, &signature).unwrap();
    }

    #[test]
    fn pss_signature_rejects_tampered_message() {
        let keypair = Keypair::generate().unwrap();
        let signature = keypair.sign(b"original message");
        assert!(verify(keypair.public_key(), b"tampered message", &signature).is_err());
    }

    #[test]
    fn public_key_pem_round_trips() {
        let keypair = Keypair::generate().unwrap();
        let pem = keypair.public_key_pem().unwrap();
        let parsed = parse_public_key_pem(&pem).unwrap();
        assert_eq!(parsed, *keypair.public_key());
    }
}
