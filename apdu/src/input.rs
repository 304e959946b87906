// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction input APDUs

use bitflags::bitflags;
use encdec::{Decode, Encode};
use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter, EnumString};

use crate::{
    encdec_bitflags,
    helpers::{bytes_len, Decoder, Encoder},
    ApduError, ApduStatic, Instruction, Path, SIGNER_APDU_CLA,
};

/// Compressed secp256k1 public key length
pub const PUBKEY_LEN: usize = 33;

/// Maximum number of multisig cosigners
pub const MAX_MULTISIG_KEYS: usize = 15;

/// Input script types
#[derive(
    Copy, Clone, PartialEq, Debug, Default, EnumString, Display, EnumIter, TryFromPrimitive,
)]
#[repr(u8)]
pub enum InputScriptType {
    /// Standard P2PKH address
    #[default]
    SpendAddress = 0,
    /// P2SH multisig address
    SpendMultisig = 1,
    /// Reserved for external inputs (coinjoin / preauthorised)
    External = 2,
    /// Native segwit (P2WPKH / P2WSH)
    SpendWitness = 3,
    /// Segwit wrapped in P2SH (P2SH-P2WPKH / P2SH-P2WSH)
    SpendP2shWitness = 4,
    /// Taproot key-path spend
    SpendTaproot = 5,
}

impl InputScriptType {
    /// Check whether this script type is spent using a witness
    pub fn is_segwit(&self) -> bool {
        matches!(
            self,
            Self::SpendWitness | Self::SpendP2shWitness | Self::SpendTaproot
        )
    }
}

bitflags! {
    /// Optional [`TxInput`] fields
    #[derive(Default)]
    pub struct TxInputFlags: u8 {
        const HAS_MULTISIG = 1 << 0;
        const HAS_SCRIPT_PUBKEY = 1 << 1;
        const HAS_SCRIPT_SIG = 1 << 2;
        const HAS_WITNESS = 1 << 3;
        const HAS_DECRED_TREE = 1 << 4;
        const HAS_ORIG = 1 << 5;
    }
}

encdec_bitflags!(TxInputFlags);

/// Multisig descriptor, an ordered set of cosigner public keys with
/// a signing threshold and any signatures collected so far.
///
/// Signatures are stored as a sequence of `u8` length prefixed DER
/// signatures (without hash type), one per public key, where a zero
/// length indicates the cosigner has not yet signed.
#[derive(Clone, PartialEq, Debug)]
pub struct Multisig<'a> {
    /// Signature threshold
    pub m: u8,
    /// Concatenated compressed public keys
    pub pubkeys: &'a [u8],
    /// Encoded signatures
    pub signatures: &'a [u8],
}

impl<'a> Multisig<'a> {
    /// Create a new multisig descriptor
    pub fn new(m: u8, pubkeys: &'a [u8], signatures: &'a [u8]) -> Self {
        Self {
            m,
            pubkeys,
            signatures,
        }
    }

    /// Number of cosigners
    pub fn n(&self) -> usize {
        self.pubkeys.len() / PUBKEY_LEN
    }

    /// Iterate over cosigner public keys
    pub fn pubkeys(&self) -> impl Iterator<Item = &'a [u8]> {
        self.pubkeys.chunks_exact(PUBKEY_LEN)
    }

    /// Fetch the existing signature for cosigner `index`, if any
    pub fn signature(&self, index: usize) -> Option<&'a [u8]> {
        let mut offset = 0;
        for i in 0..self.n() {
            let l = *self.signatures.get(offset)? as usize;
            let s = self.signatures.get(offset + 1..offset + 1 + l)?;
            if i == index {
                return (!s.is_empty()).then_some(s);
            }
            offset += 1 + l;
        }
        None
    }

    fn encode_len(&self) -> usize {
        4 + self.pubkeys.len() + self.signatures.len()
    }
}

/// Transaction input, sent in response to a `TXINPUT` request.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     FLAGS     |  SCRIPT_TYPE  |  DECRED_TREE  |   PATH_LEN    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          PREV_INDEX                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           SEQUENCE                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        AMOUNT (u64)                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                 PREV_HASH (32-byte, display order)            /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                  ADDRESS_N (PATH_LEN * u32)                   /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /        SCRIPT_PUBKEY / SCRIPT_SIG / WITNESS (u16 len, opt)    /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |   MULTISIG_M  |   MULTISIG_N  |         SIGNATURES_LEN        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /          PUBKEYS (N * 33) / SIGNATURES (opt, multisig)        /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       ORIG_INDEX (opt)                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /            ORIG_HASH (32-byte, display order, opt)            /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TxInput<'a> {
    /// Derivation path for internal inputs
    pub address_n: Path,
    /// Previous transaction hash (display / big-endian order)
    pub prev_hash: [u8; 32],
    /// Previous output index
    pub prev_index: u32,
    /// Amount spent (satoshis)
    pub amount: u64,
    /// Input script type
    pub script_type: InputScriptType,
    /// Sequence number
    pub sequence: u32,
    /// Multisig descriptor
    pub multisig: Option<Multisig<'a>>,
    /// Script pubkey for external inputs
    pub script_pubkey: Option<&'a [u8]>,
    /// Script sig for external inputs
    pub script_sig: Option<&'a [u8]>,
    /// Serialized witness for external inputs
    pub witness: Option<&'a [u8]>,
    /// Decred input tree
    pub decred_tree: Option<u8>,
    /// Hash of the transaction this one replaces
    pub orig_hash: Option<[u8; 32]>,
    /// Index of this input in the replaced transaction
    pub orig_index: u32,
}

impl<'a> TxInput<'a> {
    /// Create an internal input spending the provided outpoint
    pub fn new(
        address_n: &[u32],
        prev_hash: [u8; 32],
        prev_index: u32,
        amount: u64,
        script_type: InputScriptType,
    ) -> Self {
        Self {
            address_n: Path::from_slice(address_n).unwrap_or_default(),
            prev_hash,
            prev_index,
            amount,
            script_type,
            sequence: 0xffff_ffff,
            ..Default::default()
        }
    }

    fn flags(&self) -> TxInputFlags {
        let mut f = TxInputFlags::empty();
        f.set(TxInputFlags::HAS_MULTISIG, self.multisig.is_some());
        f.set(TxInputFlags::HAS_SCRIPT_PUBKEY, self.script_pubkey.is_some());
        f.set(TxInputFlags::HAS_SCRIPT_SIG, self.script_sig.is_some());
        f.set(TxInputFlags::HAS_WITNESS, self.witness.is_some());
        f.set(TxInputFlags::HAS_DECRED_TREE, self.decred_tree.is_some());
        f.set(TxInputFlags::HAS_ORIG, self.orig_hash.is_some());
        f
    }

    /// Compute hash of [TxInput] object
    pub fn hash(&self) -> [u8; 32] {
        crate::digest::digest_tx_input(self)
    }
}

impl<'a> ApduStatic for TxInput<'a> {
    const CLA: u8 = SIGNER_APDU_CLA;
    const INS: u8 = Instruction::TxAckInput as u8;
}

impl<'a> Encode for TxInput<'a> {
    type Error = ApduError;

    /// Encode a [`TxInput`] APDU into the provided buffer
    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let mut e = Encoder::new(buff);

        e.u8(self.flags().bits())?;
        e.u8(self.script_type as u8)?;
        e.u8(self.decred_tree.unwrap_or(0))?;
        e.u8(self.address_n.len() as u8)?;

        e.u32(self.prev_index)?;
        e.u32(self.sequence)?;
        e.u64(self.amount)?;
        e.raw(&self.prev_hash)?;
        e.path(&self.address_n)?;

        for d in [self.script_pubkey, self.script_sig, self.witness]
            .into_iter()
            .flatten()
        {
            e.bytes(d)?;
        }

        if let Some(m) = &self.multisig {
            if m.pubkeys.len() % PUBKEY_LEN != 0 || m.n() > MAX_MULTISIG_KEYS {
                return Err(ApduError::InvalidLength);
            }
            e.u8(m.m)?;
            e.u8(m.n() as u8)?;
            e.bytes(m.signatures)?;
            e.raw(m.pubkeys)?;
        }

        if let Some(h) = &self.orig_hash {
            e.u32(self.orig_index)?;
            e.raw(h)?;
        }

        Ok(e.index())
    }

    fn encode_len(&self) -> Result<usize, ApduError> {
        let mut n = 4 + 4 + 4 + 8 + 32 + self.address_n.len() * 4;

        for d in [self.script_pubkey, self.script_sig, self.witness]
            .into_iter()
            .flatten()
        {
            n += bytes_len(d);
        }

        if let Some(m) = &self.multisig {
            n += m.encode_len();
        }

        if self.orig_hash.is_some() {
            n += 4 + 32;
        }

        Ok(n)
    }
}

impl<'a> Decode<'a> for TxInput<'a> {
    type Output = Self;
    type Error = ApduError;

    /// Decode a [`TxInput`] APDU from the provided buffer
    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut d = Decoder::new(buff);

        let flags = TxInputFlags::from_bits_truncate(d.u8()?);
        let script_type =
            InputScriptType::try_from(d.u8()?).map_err(|_| ApduError::InvalidEncoding)?;
        let decred_tree = d.u8()?;
        let path_len = d.u8()? as usize;

        let prev_index = d.u32()?;
        let sequence = d.u32()?;
        let amount = d.u64()?;
        let prev_hash = d.array::<32>()?;
        let address_n = d.path(path_len)?;

        let mut opt_bytes = |f: TxInputFlags| -> Result<Option<&'a [u8]>, ApduError> {
            match flags.contains(f) {
                true => d.bytes().map(Some),
                false => Ok(None),
            }
        };

        let script_pubkey = opt_bytes(TxInputFlags::HAS_SCRIPT_PUBKEY)?;
        let script_sig = opt_bytes(TxInputFlags::HAS_SCRIPT_SIG)?;
        let witness = opt_bytes(TxInputFlags::HAS_WITNESS)?;

        let multisig = match flags.contains(TxInputFlags::HAS_MULTISIG) {
            true => {
                let m = d.u8()?;
                let n = d.u8()? as usize;
                if n > MAX_MULTISIG_KEYS {
                    return Err(ApduError::InvalidLength);
                }
                let signatures = d.bytes()?;
                let pubkeys = d.raw(n * PUBKEY_LEN)?;
                Some(Multisig {
                    m,
                    pubkeys,
                    signatures,
                })
            }
            false => None,
        };

        let (orig_hash, orig_index) = match flags.contains(TxInputFlags::HAS_ORIG) {
            true => {
                let i = d.u32()?;
                (Some(d.array::<32>()?), i)
            }
            false => (None, 0),
        };

        Ok((
            Self {
                address_n,
                prev_hash,
                prev_index,
                amount,
                script_type,
                sequence,
                multisig,
                script_pubkey,
                script_sig,
                witness,
                decred_tree: flags
                    .contains(TxInputFlags::HAS_DECRED_TREE)
                    .then_some(decred_tree),
                orig_hash,
                orig_index,
            },
            d.index(),
        ))
    }
}
