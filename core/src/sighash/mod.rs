// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction signature hashing
//!
//! Inputs and outputs are fed to a [SigHasher] as they are streamed from the host.
//! Once every declared element has been added the hasher is [sealed][SigHasher::seal],
//! fixing the shared mid-state digests, after which per-input signature digests
//! may be computed in any order.
//!
//! Legacy (pre-segwit) digests commit to a modified copy of the whole transaction for
//! each input and so can not be built from mid-states, these are computed with a
//! [LegacyHasher] over a dedicated re-stream of the transaction.

use crate::{
    apdu::input::TxInput,
    coins::CoinInfo,
    engine::Error,
    serializer::TxHeader,
};

mod bitcoin;
pub use bitcoin::Bip143;

mod decred;
pub use decred::DecredHasher;

mod legacy;
pub use legacy::LegacyHasher;

mod zcash;
pub use zcash::{Zip243, Zip244};

/// Per-input context for signature digest computation
#[derive(Clone, PartialEq, Debug)]
pub struct SigInput<'a> {
    /// Index of the input being signed
    pub index: u32,
    /// Previous transaction hash (display order)
    pub prev_hash: &'a [u8; 32],
    pub prev_index: u32,
    pub amount: u64,
    pub sequence: u32,
    /// Script code committed to by the signature (BIP-0143 / ZIP-0243 script code,
    /// or the signed output script for Decred)
    pub script_code: &'a [u8],
    /// Script pubkey of the output being spent
    pub script_pubkey: &'a [u8],
    /// Signature hash type
    pub sighash_type: u32,
    /// Compute a BIP-0341 key path digest
    pub taproot: bool,
}

/// Tracks elements added against the count declared in the transaction header
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct Counter {
    declared: u32,
    added: u32,
}

impl Counter {
    pub const fn new(declared: u32) -> Self {
        Self { declared, added: 0 }
    }

    /// Count an added element, returning its index
    pub fn add(&mut self) -> Result<u32, Error> {
        if self.added >= self.declared {
            return Err(Error::CountMismatch);
        }

        let i = self.added;
        self.added += 1;
        Ok(i)
    }

    /// Number of elements declared
    pub fn declared(&self) -> u32 {
        self.declared
    }

    /// Number of elements added
    pub fn added(&self) -> u32 {
        self.added
    }

    /// Check whether every declared element has been added
    pub fn is_complete(&self) -> bool {
        self.added == self.declared
    }
}

/// Streaming signature hasher
pub trait SigHasher {
    /// Add a transaction input, with the script pubkey of the output it spends
    fn add_input(&mut self, txi: &TxInput, script_pubkey: &[u8]) -> Result<(), Error>;

    /// Add a transaction output
    fn add_output(&mut self, amount: u64, script_pubkey: &[u8]) -> Result<(), Error>;

    /// Finalize shared mid-states, all declared inputs and outputs must have been added
    fn seal(&mut self) -> Result<(), Error>;

    /// Check whether the hasher has been sealed
    fn is_sealed(&self) -> bool;

    /// Compute the signature digest for an input, returns [Error::DigestNotReady]
    /// prior to [SigHasher::seal]
    fn signature_digest(&self, i: &SigInput) -> Result<[u8; 32], Error>;
}

/// Coin family signature hasher
#[derive(Clone, Debug)]
pub enum Hasher {
    /// Bitcoin family BIP-0143 / BIP-0341 mid-states
    Bitcoin(Bip143),
    /// Zcash Sapling
    Zip243(Zip243),
    /// Zcash NU5
    Zip244(Zip244),
    /// Decred prefix / witness
    Decred(DecredHasher),
}

impl Hasher {
    /// Select a hasher for the provided coin and transaction header
    pub fn new(coin: &CoinInfo, h: &TxHeader) -> Result<Self, Error> {
        if coin.decred {
            return Ok(Self::Decred(DecredHasher::new(h)));
        }

        if coin.overwintered {
            return match h.version {
                4 => Ok(Self::Zip243(Zip243::new(h))),
                5 => Ok(Self::Zip244(Zip244::new(h))),
                _ => Err(Error::UnsupportedVersion),
            };
        }

        Ok(Self::Bitcoin(Bip143::new(h)))
    }

    fn inner(&self) -> &dyn SigHasher {
        match self {
            Self::Bitcoin(h) => h,
            Self::Zip243(h) => h,
            Self::Zip244(h) => h,
            Self::Decred(h) => h,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SigHasher {
        match self {
            Self::Bitcoin(h) => h,
            Self::Zip243(h) => h,
            Self::Zip244(h) => h,
            Self::Decred(h) => h,
        }
    }
}

impl SigHasher for Hasher {
    fn add_input(&mut self, txi: &TxInput, script_pubkey: &[u8]) -> Result<(), Error> {
        self.inner_mut().add_input(txi, script_pubkey)
    }

    fn add_output(&mut self, amount: u64, script_pubkey: &[u8]) -> Result<(), Error> {
        self.inner_mut().add_output(amount, script_pubkey)
    }

    fn seal(&mut self) -> Result<(), Error> {
        self.inner_mut().seal()
    }

    fn is_sealed(&self) -> bool {
        self.inner().is_sealed()
    }

    fn signature_digest(&self, i: &SigInput) -> Result<[u8; 32], Error> {
        self.inner().signature_digest(i)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coins::{BCASH, BITCOIN, DECRED, ZCASH};

    #[test]
    fn counters() {
        let mut c = Counter::new(2);
        assert!(!c.is_complete());

        assert_eq!(c.add(), Ok(0));
        assert_eq!(c.add(), Ok(1));
        assert!(c.is_complete());

        assert_eq!(c.add(), Err(Error::CountMismatch));
        assert_eq!(c.added(), 2);
    }

    #[test]
    fn select_hasher() {
        let h = TxHeader {
            version: 2,
            inputs_count: 1,
            outputs_count: 1,
            ..Default::default()
        };

        assert!(matches!(Hasher::new(&BITCOIN, &h), Ok(Hasher::Bitcoin(_))));
        assert!(matches!(Hasher::new(&BCASH, &h), Ok(Hasher::Bitcoin(_))));
        assert!(matches!(Hasher::new(&DECRED, &h), Ok(Hasher::Decred(_))));

        let z = |version| TxHeader {
            version,
            version_group_id: Some(0),
            ..h.clone()
        };

        assert!(matches!(Hasher::new(&ZCASH, &z(4)), Ok(Hasher::Zip243(_))));
        assert!(matches!(Hasher::new(&ZCASH, &z(5)), Ok(Hasher::Zip244(_))));
        assert!(matches!(
            Hasher::new(&ZCASH, &z(3)),
            Err(Error::UnsupportedVersion)
        ));
    }
}
