// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signing session initialisation APDU

use bitflags::bitflags;
use encdec::{Decode, Encode};

use crate::{
    encdec_bitflags,
    helpers::{Decoder, Encoder},
    ApduError, ApduStatic, Instruction, SIGNER_APDU_CLA,
};

/// Maximum coin name length
pub const MAX_COIN_NAME_LEN: usize = 32;

bitflags! {
    /// Optional [`SignTx`] fields
    #[derive(Default)]
    pub struct SignTxFlags: u8 {
        /// Expiry height is set
        const HAS_EXPIRY = 1 << 0;
        /// Version group id is set (overwintered coins)
        const HAS_VERSION_GROUP_ID = 1 << 1;
        /// Consensus branch id is set (overwintered coins)
        const HAS_BRANCH_ID = 1 << 2;
    }
}

encdec_bitflags!(SignTxFlags);

/// Start a signing session for the provided coin and transaction header.
///
/// The device replies with the first [`TxRequest`][crate::request::TxRequest].
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     FLAGS     |   NAME_LEN    |           RESERVED            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            VERSION                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           LOCK_TIME                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         INPUTS_COUNT                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         OUTPUTS_COUNT                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 EXPIRY (zero if flag not set)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            VERSION_GROUP_ID (zero if flag not set)            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               BRANCH_ID (zero if flag not set)                |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                      COIN_NAME (NAME_LEN)                     /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct SignTx<'a> {
    /// Coin name, used to select coin parameters
    pub coin_name: &'a str,
    /// Transaction version
    pub version: u32,
    /// Transaction lock time
    pub lock_time: u32,
    /// Number of inputs
    pub inputs_count: u32,
    /// Number of outputs
    pub outputs_count: u32,
    /// Expiry height (Decred, overwintered coins)
    pub expiry: Option<u32>,
    /// Version group id (overwintered coins)
    pub version_group_id: Option<u32>,
    /// Consensus branch id (overwintered coins)
    pub branch_id: Option<u32>,
}

impl<'a> SignTx<'a> {
    /// Create a new [`SignTx`] request without coin-specific extensions
    pub fn new(
        coin_name: &'a str,
        version: u32,
        lock_time: u32,
        inputs_count: u32,
        outputs_count: u32,
    ) -> Self {
        Self {
            coin_name,
            version,
            lock_time,
            inputs_count,
            outputs_count,
            expiry: None,
            version_group_id: None,
            branch_id: None,
        }
    }

    /// Set the expiry height
    pub fn with_expiry(mut self, expiry: u32) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Set overwinter fields (version group and consensus branch)
    pub fn with_overwinter(mut self, version_group_id: u32, branch_id: u32) -> Self {
        self.version_group_id = Some(version_group_id);
        self.branch_id = Some(branch_id);
        self
    }

    fn flags(&self) -> SignTxFlags {
        let mut f = SignTxFlags::empty();
        f.set(SignTxFlags::HAS_EXPIRY, self.expiry.is_some());
        f.set(
            SignTxFlags::HAS_VERSION_GROUP_ID,
            self.version_group_id.is_some(),
        );
        f.set(SignTxFlags::HAS_BRANCH_ID, self.branch_id.is_some());
        f
    }

    /// Compute hash of [SignTx] object
    pub fn hash(&self) -> [u8; 32] {
        crate::digest::digest_sign_tx(self)
    }
}

impl<'a> ApduStatic for SignTx<'a> {
    const CLA: u8 = SIGNER_APDU_CLA;
    const INS: u8 = Instruction::SignTx as u8;
}

impl<'a> Encode for SignTx<'a> {
    type Error = ApduError;

    /// Encode a [`SignTx`] APDU into the provided buffer
    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let name = self.coin_name.as_bytes();
        if name.len() > MAX_COIN_NAME_LEN {
            return Err(ApduError::InvalidLength);
        }

        let mut e = Encoder::new(buff);

        e.u8(self.flags().bits())?;
        e.u8(name.len() as u8)?;
        e.reserved(2)?;

        e.u32(self.version)?;
        e.u32(self.lock_time)?;
        e.u32(self.inputs_count)?;
        e.u32(self.outputs_count)?;
        e.u32(self.expiry.unwrap_or(0))?;
        e.u32(self.version_group_id.unwrap_or(0))?;
        e.u32(self.branch_id.unwrap_or(0))?;

        e.raw(name)?;

        Ok(e.index())
    }

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(4 + 7 * 4 + self.coin_name.len())
    }
}

impl<'a> Decode<'a> for SignTx<'a> {
    type Output = Self;
    type Error = ApduError;

    /// Decode a [`SignTx`] APDU from the provided buffer
    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut d = Decoder::new(buff);

        let flags = SignTxFlags::from_bits_truncate(d.u8()?);
        let name_len = d.u8()? as usize;
        d.skip(2)?;

        if name_len > MAX_COIN_NAME_LEN {
            return Err(ApduError::InvalidLength);
        }

        let version = d.u32()?;
        let lock_time = d.u32()?;
        let inputs_count = d.u32()?;
        let outputs_count = d.u32()?;
        let expiry = d.u32()?;
        let version_group_id = d.u32()?;
        let branch_id = d.u32()?;

        let coin_name = d.str(name_len)?;

        Ok((
            Self {
                coin_name,
                version,
                lock_time,
                inputs_count,
                outputs_count,
                expiry: flags.contains(SignTxFlags::HAS_EXPIRY).then_some(expiry),
                version_group_id: flags
                    .contains(SignTxFlags::HAS_VERSION_GROUP_ID)
                    .then_some(version_group_id),
                branch_id: flags.contains(SignTxFlags::HAS_BRANCH_ID).then_some(branch_id),
            },
            d.index(),
        ))
    }
}
