// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Hash contexts and the streaming digest [Accumulator]
//!
//! Signature hashing requires a number of named digests (prevouts, amounts, sequences,
//! outputs...) to be computed over the same streamed transaction elements. The
//! [Accumulator] holds these as [Slot]s, each of which may be written only until it is
//! finalized, and finalized only once.

use blake_hash::{Blake256, Digest as _};
use ripemd::Ripemd160;
use sha2::{Digest as _, Sha256};

use crate::{engine::Error, writer::Writer};

/// Hash algorithm / running context
#[derive(Clone)]
pub enum Context {
    /// SHA-256, optionally double-hashed on finalization
    Sha256 { inner: Sha256, double: bool },
    /// BLAKE-256 (Decred)
    Blake256(Blake256),
    /// Personalised BLAKE2b-256 (Zcash)
    Blake2b(blake2b_simd::State),
}

impl Context {
    /// Single SHA-256 context
    pub fn sha256() -> Self {
        Self::Sha256 {
            inner: Sha256::new(),
            double: false,
        }
    }

    /// Double SHA-256 context
    pub fn sha256d() -> Self {
        Self::Sha256 {
            inner: Sha256::new(),
            double: true,
        }
    }

    /// BLAKE-256 context
    pub fn blake256() -> Self {
        Self::Blake256(Blake256::new())
    }

    /// BLAKE2b-256 context with the provided (up to 16-byte) personalisation
    pub fn blake2b(personal: &[u8]) -> Self {
        Self::Blake2b(
            blake2b_simd::Params::new()
                .hash_length(32)
                .personal(personal)
                .to_state(),
        )
    }

    /// BIP-0340 tagged SHA-256 context
    pub fn tagged(tag: &str) -> Self {
        let t: [u8; 32] = Sha256::digest(tag.as_bytes()).into();
        let inner = Sha256::new().chain_update(t).chain_update(t);
        Self::Sha256 {
            inner,
            double: false,
        }
    }

    /// Append data to the running hash
    pub fn update(&mut self, d: &[u8]) {
        match self {
            Self::Sha256 { inner, .. } => sha2::Digest::update(inner, d),
            Self::Blake256(h) => blake_hash::Digest::update(h, d),
            Self::Blake2b(s) => {
                s.update(d);
            }
        }
    }

    /// Consume the context, returning the 32-byte digest
    pub fn finalize(self) -> [u8; 32] {
        let mut out = [0u8; 32];

        match self {
            Self::Sha256 { inner, double } => {
                let h = inner.finalize();
                match double {
                    true => out.copy_from_slice(&Sha256::digest(h)),
                    false => out.copy_from_slice(&h),
                }
            }
            Self::Blake256(h) => out.copy_from_slice(&h.finalize()),
            Self::Blake2b(s) => out.copy_from_slice(s.finalize().as_bytes()),
        }

        out
    }
}

impl Writer for Context {
    fn write(&mut self, d: &[u8]) -> Result<(), Error> {
        self.update(d);
        Ok(())
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Sha256 { double, .. } => write!(f, "Sha256 {{ double: {double} }}"),
            Self::Blake256(_) => write!(f, "Blake256"),
            Self::Blake2b(_) => write!(f, "Blake2b"),
        }
    }
}

pub fn sha256(d: &[u8]) -> [u8; 32] {
    Sha256::digest(d).into()
}

pub fn sha256d(d: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(d)).into()
}

pub fn blake256(d: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Blake256::digest(d));
    out
}

pub fn blake256d(d: &[u8]) -> [u8; 32] {
    blake256(&blake256(d))
}

/// RIPEMD160(SHA256(d)), or RIPEMD160(BLAKE256(d)) for Decred
pub fn hash160(d: &[u8], decred: bool) -> [u8; 20] {
    let h = match decred {
        true => blake256(d),
        false => sha256(d),
    };
    Ripemd160::digest(h).into()
}

/// BIP-0340 tagged hash
pub fn tagged_hash(tag: &str, d: &[u8]) -> [u8; 32] {
    let mut c = Context::tagged(tag);
    c.update(d);
    c.finalize()
}

/// Named digest slots held by the [Accumulator]
#[derive(Copy, Clone, PartialEq, Debug)]
#[repr(usize)]
pub enum Slot {
    /// Outpoints of all inputs
    Prevouts = 0,
    /// Amounts of all inputs
    Amounts = 1,
    /// Script pubkeys of all inputs
    ScriptPubkeys = 2,
    /// Sequences of all inputs
    Sequences = 3,
    /// All outputs
    Outputs = 4,
    /// Transaction prefix (Decred)
    Prefix = 5,
}

const NUM_SLOTS: usize = 6;

#[derive(Clone, Debug, Default)]
enum Entry {
    #[default]
    Closed,
    Open(Context),
    Finalized,
}

/// Streaming digest accumulator, a set of named hash contexts that may each be
/// written in order until finalized
#[derive(Clone, Debug, Default)]
pub struct Accumulator {
    slots: [Entry; NUM_SLOTS],
}

impl Accumulator {
    /// Create a new accumulator with all slots closed
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or re-open) a slot with the provided context
    pub fn open(&mut self, slot: Slot, ctx: Context) {
        self.slots[slot as usize] = Entry::Open(ctx);
    }

    /// Append data to an open slot
    pub fn write(&mut self, slot: Slot, d: &[u8]) -> Result<(), Error> {
        match &mut self.slots[slot as usize] {
            Entry::Open(c) => {
                c.update(d);
                Ok(())
            }
            Entry::Finalized => Err(Error::DigestFinalized),
            Entry::Closed => Err(Error::InvalidState),
        }
    }

    /// Finalize a slot, returning its digest. A slot may only be finalized once.
    pub fn finalize(&mut self, slot: Slot) -> Result<[u8; 32], Error> {
        match core::mem::replace(&mut self.slots[slot as usize], Entry::Finalized) {
            Entry::Open(c) => Ok(c.finalize()),
            Entry::Finalized => Err(Error::DigestFinalized),
            Entry::Closed => {
                self.slots[slot as usize] = Entry::Closed;
                Err(Error::InvalidState)
            }
        }
    }

    /// Fetch a [Writer] for the provided slot
    pub fn writer(&mut self, slot: Slot) -> SlotWriter<'_> {
        SlotWriter { acc: self, slot }
    }
}

/// [Writer] adaptor over an [Accumulator] slot
pub struct SlotWriter<'a> {
    acc: &'a mut Accumulator,
    slot: Slot,
}

impl<'a> Writer for SlotWriter<'a> {
    fn write(&mut self, d: &[u8]) -> Result<(), Error> {
        self.acc.write(self.slot, d)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_digests() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            hex::encode(sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
        // BLAKE-256 of the empty string
        assert_eq!(
            hex::encode(blake256(b"")),
            "716f6e863f744b9ac22c97ec7b76ea5f5908bc5b2f67c61510bfc4751384ea7a"
        );
    }

    #[test]
    fn tagged_matches_definition() {
        let t = sha256(b"TapTweak");
        let mut pre = [0u8; 96];
        pre[..32].copy_from_slice(&t);
        pre[32..64].copy_from_slice(&t);
        pre[64..].copy_from_slice(&[0x5a; 32]);

        assert_eq!(tagged_hash("TapTweak", &[0x5a; 32]), sha256(&pre));
    }

    #[test]
    fn context_streams_match_oneshot() {
        let mut c = Context::sha256d();
        c.update(b"hello ");
        c.update(b"world");
        assert_eq!(c.finalize(), sha256d(b"hello world"));

        let mut c = Context::blake256();
        c.update(b"hello ");
        c.update(b"world");
        assert_eq!(c.finalize(), blake256(b"hello world"));
    }

    #[test]
    fn finalize_once() {
        let mut a = Accumulator::new();

        // Closed slots can not be written or finalized
        assert_eq!(a.write(Slot::Outputs, b"x"), Err(Error::InvalidState));
        assert_eq!(a.finalize(Slot::Outputs), Err(Error::InvalidState));

        a.open(Slot::Outputs, Context::sha256());
        a.write(Slot::Outputs, b"abc").unwrap();

        assert_eq!(a.finalize(Slot::Outputs), Ok(sha256(b"abc")));

        // Second finalize and late writes are rejected
        assert_eq!(a.finalize(Slot::Outputs), Err(Error::DigestFinalized));
        assert_eq!(a.write(Slot::Outputs, b"d"), Err(Error::DigestFinalized));
    }

    #[test]
    fn slots_are_independent() {
        let mut a = Accumulator::new();
        a.open(Slot::Prevouts, Context::sha256());
        a.open(Slot::Sequences, Context::sha256());

        a.writer(Slot::Prevouts).write(b"one").unwrap();
        a.writer(Slot::Sequences).write(b"two").unwrap();

        assert_eq!(a.finalize(Slot::Sequences), Ok(sha256(b"two")));
        assert_eq!(a.finalize(Slot::Prevouts), Ok(sha256(b"one")));
    }
}
