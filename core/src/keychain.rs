// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Derived secp256k1 signing nodes
//!
//! A [Node] is returned by the platform [Driver][crate::engine::Driver] for each
//! derivation path the engine needs. Private key material is held only for the
//! lifetime of the node and zeroized on drop, so nodes should be derived
//! immediately before use and dropped immediately after.

use heapless::Vec;
use secp256k1::{
    ecdsa, schnorr, Keypair, Message, PublicKey, Scalar, Secp256k1, SecretKey, XOnlyPublicKey,
};
use zeroize::Zeroize;

use crate::{apdu::request::MAX_SIGNATURE_LEN, engine::Error, hash};

/// Compressed secp256k1 public key
pub type PublicKeyBytes = [u8; 33];

/// Derived secp256k1 key node
pub struct Node {
    secret: [u8; 32],
    public: PublicKeyBytes,
}

impl Node {
    /// Create a node from a raw private key
    pub fn new(secret: [u8; 32]) -> Result<Self, Error> {
        let secp = Secp256k1::signing_only();

        let mut sk = SecretKey::from_slice(&secret).map_err(|_| Error::SignError)?;
        let public = PublicKey::from_secret_key(&secp, &sk).serialize();
        sk.non_secure_erase();

        Ok(Self { secret, public })
    }

    /// Compressed public key for this node
    pub fn public_key(&self) -> &PublicKeyBytes {
        &self.public
    }

    /// HASH160 of the compressed public key
    pub fn pubkey_hash(&self, decred: bool) -> [u8; 20] {
        hash::hash160(&self.public, decred)
    }

    /// Sign a 32-byte digest with ECDSA (RFC6979, low-S), returning the DER encoded signature
    #[cfg_attr(feature = "noinline", inline(never))]
    pub fn sign_ecdsa(&self, digest: &[u8; 32]) -> Result<Vec<u8, MAX_SIGNATURE_LEN>, Error> {
        let secp = Secp256k1::signing_only();

        let mut sk = SecretKey::from_slice(&self.secret).map_err(|_| Error::SignError)?;
        let sig = secp.sign_ecdsa(&Message::from_digest(*digest), &sk);
        sk.non_secure_erase();

        Vec::from_slice(&sig.serialize_der()).map_err(|_| Error::SignError)
    }

    /// BIP-0086 tweaked output key, used in P2TR script pubkeys
    pub fn taproot_output_key(&self) -> Result<[u8; 32], Error> {
        let secp = Secp256k1::new();

        let keypair = self.tweaked_keypair(&secp)?;
        let (x, _parity) = keypair.x_only_public_key();

        Ok(x.serialize())
    }

    /// Sign a 32-byte digest with BIP-0340 Schnorr using the BIP-0086 tweaked key
    #[cfg_attr(feature = "noinline", inline(never))]
    pub fn sign_taproot(&self, digest: &[u8; 32], aux_rand: &[u8; 32]) -> Result<[u8; 64], Error> {
        let secp = Secp256k1::new();

        let mut keypair = self.tweaked_keypair(&secp)?;
        let sig: schnorr::Signature =
            secp.sign_schnorr_with_aux_rand(&Message::from_digest(*digest), &keypair, aux_rand);
        keypair.non_secure_erase();

        Ok(*sig.as_ref())
    }

    fn tweaked_keypair<C: secp256k1::Signing + secp256k1::Verification>(
        &self,
        secp: &Secp256k1<C>,
    ) -> Result<Keypair, Error> {
        let keypair = Keypair::from_seckey_slice(secp, &self.secret).map_err(|_| Error::SignError)?;

        // Key-path only spends commit to an empty script tree
        let (internal, _parity) = keypair.x_only_public_key();
        let tweak = hash::tagged_hash("TapTweak", &internal.serialize());
        let tweak = Scalar::from_be_bytes(tweak).map_err(|_| Error::SignError)?;

        keypair
            .add_xonly_tweak(secp, &tweak)
            .map_err(|_| Error::SignError)
    }
}

/// Verify a DER encoded ECDSA signature over `digest` for a serialized public key
pub fn verify_ecdsa(pubkey: &[u8], digest: &[u8; 32], der: &[u8]) -> Result<(), Error> {
    let secp = Secp256k1::verification_only();

    let pk = PublicKey::from_slice(pubkey).map_err(|_| Error::InvalidSignature)?;
    let sig = ecdsa::Signature::from_der(der).map_err(|_| Error::InvalidSignature)?;

    secp.verify_ecdsa(&Message::from_digest(*digest), &sig, &pk)
        .map_err(|_| Error::InvalidSignature)
}

/// Verify a BIP-0340 Schnorr signature over `digest` for an x-only output key
pub fn verify_schnorr(output_key: &[u8], digest: &[u8; 32], sig: &[u8]) -> Result<(), Error> {
    let secp = Secp256k1::verification_only();

    let pk = XOnlyPublicKey::from_slice(output_key).map_err(|_| Error::InvalidSignature)?;
    let sig = schnorr::Signature::from_slice(sig).map_err(|_| Error::InvalidSignature)?;

    secp.verify_schnorr(&sig, &Message::from_digest(*digest), &pk)
        .map_err(|_| Error::InvalidSignature)
}

impl Drop for Node {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Node {{ public: ")?;
        for b in &self.public {
            write!(f, "{b:02x}")?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const KEY: [u8; 32] = [
        0x0c, 0x28, 0xfc, 0xa3, 0x86, 0xc7, 0xa2, 0x27, 0x60, 0x0b, 0x2f, 0xe5, 0x0b, 0x7c, 0xae,
        0x11, 0xec, 0x86, 0xd3, 0xbf, 0x1f, 0xbe, 0x47, 0x1b, 0xe8, 0x98, 0x27, 0xe1, 0x9d, 0x72,
        0xaa, 0x1d,
    ];

    #[test]
    fn public_key() {
        let n = Node::new(KEY).unwrap();

        assert_eq!(
            hex::encode(n.public_key()),
            "02d0de0aaeaefad02b8bdc8a01a1b8b11c696bd3d66a2c5f10780d95b7df42645c"
        );
    }

    #[test]
    fn invalid_key() {
        assert!(Node::new([0u8; 32]).is_err());
        assert!(Node::new([0xff; 32]).is_err());
    }

    #[test]
    fn ecdsa_verifies() {
        let n = Node::new(KEY).unwrap();
        let digest = hash::sha256d(b"utxo signer");

        let sig = n.sign_ecdsa(&digest).unwrap();

        let secp = Secp256k1::verification_only();
        let sig = ecdsa::Signature::from_der(&sig).unwrap();
        let pk = PublicKey::from_slice(n.public_key()).unwrap();

        secp.verify_ecdsa(&Message::from_digest(digest), &sig, &pk)
            .expect("signature verification failed");
    }

    #[test]
    fn verify_helpers() {
        let n = Node::new(KEY).unwrap();
        let digest = hash::sha256d(b"utxo signer");

        let sig = n.sign_ecdsa(&digest).unwrap();
        assert_eq!(verify_ecdsa(n.public_key(), &digest, &sig), Ok(()));

        let other = hash::sha256d(b"other");
        assert_eq!(
            verify_ecdsa(n.public_key(), &other, &sig),
            Err(Error::InvalidSignature)
        );
        assert_eq!(
            verify_ecdsa(n.public_key(), &digest, &sig[1..]),
            Err(Error::InvalidSignature)
        );

        let sig = n.sign_taproot(&digest, &[0x22; 32]).unwrap();
        let output_key = n.taproot_output_key().unwrap();
        assert_eq!(verify_schnorr(&output_key, &digest, &sig), Ok(()));
        assert_eq!(
            verify_schnorr(&output_key, &other, &sig),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn taproot_verifies() {
        let n = Node::new(KEY).unwrap();
        let digest = hash::tagged_hash("TapSighash", b"utxo signer");

        let sig = n.sign_taproot(&digest, &[0x11; 32]).unwrap();
        let output_key = n.taproot_output_key().unwrap();

        let secp = Secp256k1::verification_only();
        let sig = schnorr::Signature::from_slice(&sig).unwrap();
        let pk = XOnlyPublicKey::from_slice(&output_key).unwrap();

        secp.verify_schnorr(&sig, &Message::from_digest(digest), &pk)
            .expect("signature verification failed");
    }
}
