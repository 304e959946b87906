// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Previous transaction APDUs, used to verify the amounts claimed by
//! transaction inputs.

use bitflags::bitflags;
use encdec::{Decode, DecodeOwned, Encode};

use crate::{
    encdec_bitflags,
    helpers::{bytes_len, Decoder, Encoder},
    ApduError, ApduStatic, Instruction, SIGNER_APDU_CLA,
};

/// Maximum extra data chunk length
pub const MAX_EXTRA_DATA_CHUNK: usize = 1024;

bitflags! {
    /// Optional [`PrevTx`] fields
    #[derive(Default)]
    pub struct PrevTxFlags: u8 {
        const HAS_EXPIRY = 1 << 0;
        const HAS_VERSION_GROUP_ID = 1 << 1;
        const HAS_BRANCH_ID = 1 << 2;
    }
}

encdec_bitflags!(PrevTxFlags);

/// Previous transaction metadata, sent in response to a `TXMETA` request.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     FLAGS     |                    RESERVED                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                            VERSION                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           LOCK_TIME                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         INPUTS_COUNT                          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         OUTPUTS_COUNT                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        EXTRA_DATA_LEN                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 EXPIRY (zero if flag not set)                 |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |            VERSION_GROUP_ID (zero if flag not set)            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               BRANCH_ID (zero if flag not set)                |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PrevTx {
    pub version: u32,
    pub lock_time: u32,
    pub inputs_count: u32,
    pub outputs_count: u32,
    /// Length of trailing coin-specific data (Zcash joinsplits etc.)
    pub extra_data_len: u32,
    pub expiry: Option<u32>,
    pub version_group_id: Option<u32>,
    pub branch_id: Option<u32>,
}

impl PrevTx {
    /// Create previous transaction metadata without coin-specific extensions
    pub fn new(version: u32, lock_time: u32, inputs_count: u32, outputs_count: u32) -> Self {
        Self {
            version,
            lock_time,
            inputs_count,
            outputs_count,
            ..Default::default()
        }
    }

    fn flags(&self) -> PrevTxFlags {
        let mut f = PrevTxFlags::empty();
        f.set(PrevTxFlags::HAS_EXPIRY, self.expiry.is_some());
        f.set(
            PrevTxFlags::HAS_VERSION_GROUP_ID,
            self.version_group_id.is_some(),
        );
        f.set(PrevTxFlags::HAS_BRANCH_ID, self.branch_id.is_some());
        f
    }

    /// Compute hash of [PrevTx] object
    pub fn hash(&self) -> [u8; 32] {
        crate::digest::digest_prev_meta(self)
    }
}

impl ApduStatic for PrevTx {
    const CLA: u8 = SIGNER_APDU_CLA;
    const INS: u8 = Instruction::TxAckPrevMeta as u8;
}

impl Encode for PrevTx {
    type Error = ApduError;

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let mut e = Encoder::new(buff);

        e.u8(self.flags().bits())?;
        e.reserved(3)?;

        e.u32(self.version)?;
        e.u32(self.lock_time)?;
        e.u32(self.inputs_count)?;
        e.u32(self.outputs_count)?;
        e.u32(self.extra_data_len)?;
        e.u32(self.expiry.unwrap_or(0))?;
        e.u32(self.version_group_id.unwrap_or(0))?;
        e.u32(self.branch_id.unwrap_or(0))?;

        Ok(e.index())
    }

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(4 + 8 * 4)
    }
}

impl DecodeOwned for PrevTx {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self, usize), ApduError> {
        let mut d = Decoder::new(buff);

        let flags = PrevTxFlags::from_bits_truncate(d.u8()?);
        d.skip(3)?;

        let version = d.u32()?;
        let lock_time = d.u32()?;
        let inputs_count = d.u32()?;
        let outputs_count = d.u32()?;
        let extra_data_len = d.u32()?;
        let expiry = d.u32()?;
        let version_group_id = d.u32()?;
        let branch_id = d.u32()?;

        Ok((
            Self {
                version,
                lock_time,
                inputs_count,
                outputs_count,
                extra_data_len,
                expiry: flags.contains(PrevTxFlags::HAS_EXPIRY).then_some(expiry),
                version_group_id: flags
                    .contains(PrevTxFlags::HAS_VERSION_GROUP_ID)
                    .then_some(version_group_id),
                branch_id: flags.contains(PrevTxFlags::HAS_BRANCH_ID).then_some(branch_id),
            },
            d.index(),
        ))
    }
}

/// Previous transaction input, sent in response to a `TXINPUT` request
/// carrying a `tx_hash`.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  HAS_TREE     |  DECRED_TREE  |        SCRIPT_SIG_LEN         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                          PREV_INDEX                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           SEQUENCE                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                 PREV_HASH (32-byte, display order)            /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                   SCRIPT_SIG (SCRIPT_SIG_LEN)                 /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PrevInput<'a> {
    pub prev_hash: [u8; 32],
    pub prev_index: u32,
    pub script_sig: &'a [u8],
    pub sequence: u32,
    pub decred_tree: Option<u8>,
}

impl<'a> PrevInput<'a> {
    pub fn new(prev_hash: [u8; 32], prev_index: u32, script_sig: &'a [u8], sequence: u32) -> Self {
        Self {
            prev_hash,
            prev_index,
            script_sig,
            sequence,
            decred_tree: None,
        }
    }

    /// Compute hash of [PrevInput] object
    pub fn hash(&self) -> [u8; 32] {
        crate::digest::digest_prev_input(self)
    }
}

impl<'a> ApduStatic for PrevInput<'a> {
    const CLA: u8 = SIGNER_APDU_CLA;
    const INS: u8 = Instruction::TxAckPrevInput as u8;
}

impl<'a> Encode for PrevInput<'a> {
    type Error = ApduError;

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        if self.script_sig.len() > u16::MAX as usize {
            return Err(ApduError::InvalidLength);
        }

        let mut e = Encoder::new(buff);

        e.u8(self.decred_tree.is_some() as u8)?;
        e.u8(self.decred_tree.unwrap_or(0))?;
        e.u16(self.script_sig.len() as u16)?;
        e.u32(self.prev_index)?;
        e.u32(self.sequence)?;
        e.raw(&self.prev_hash)?;
        e.raw(self.script_sig)?;

        Ok(e.index())
    }

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(4 + 4 + 4 + 32 + self.script_sig.len())
    }
}

impl<'a> Decode<'a> for PrevInput<'a> {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut d = Decoder::new(buff);

        let has_tree = d.u8()? != 0;
        let decred_tree = d.u8()?;
        let script_len = d.u16()? as usize;
        let prev_index = d.u32()?;
        let sequence = d.u32()?;
        let prev_hash = d.array::<32>()?;
        let script_sig = d.raw(script_len)?;

        Ok((
            Self {
                prev_hash,
                prev_index,
                script_sig,
                sequence,
                decred_tree: has_tree.then_some(decred_tree),
            },
            d.index(),
        ))
    }
}

/// Previous transaction output, sent in response to a `TXOUTPUT` request
/// carrying a `tx_hash`.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  HAS_VERSION  |   RESERVED    |     DECRED_SCRIPT_VERSION     |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        AMOUNT (u64)                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                 SCRIPT_PUBKEY (u16 len prefixed)              /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PrevOutput<'a> {
    pub amount: u64,
    pub script_pubkey: &'a [u8],
    pub decred_script_version: Option<u16>,
}

impl<'a> PrevOutput<'a> {
    pub fn new(amount: u64, script_pubkey: &'a [u8]) -> Self {
        Self {
            amount,
            script_pubkey,
            decred_script_version: None,
        }
    }

    /// Compute hash of [PrevOutput] object
    pub fn hash(&self) -> [u8; 32] {
        crate::digest::digest_prev_output(self)
    }
}

impl<'a> ApduStatic for PrevOutput<'a> {
    const CLA: u8 = SIGNER_APDU_CLA;
    const INS: u8 = Instruction::TxAckPrevOutput as u8;
}

impl<'a> Encode for PrevOutput<'a> {
    type Error = ApduError;

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let mut e = Encoder::new(buff);

        e.u8(self.decred_script_version.is_some() as u8)?;
        e.reserved(1)?;
        e.u16(self.decred_script_version.unwrap_or(0))?;
        e.u64(self.amount)?;
        e.bytes(self.script_pubkey)?;

        Ok(e.index())
    }

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(4 + 8 + bytes_len(self.script_pubkey))
    }
}

impl<'a> Decode<'a> for PrevOutput<'a> {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut d = Decoder::new(buff);

        let has_version = d.u8()? != 0;
        d.skip(1)?;
        let version = d.u16()?;
        let amount = d.u64()?;
        let script_pubkey = d.bytes()?;

        Ok((
            Self {
                amount,
                script_pubkey,
                decred_script_version: has_version.then_some(version),
            },
            d.index(),
        ))
    }
}

/// Chunk of previous transaction extra data, sent in response to a
/// `TXEXTRADATA` request.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           CHUNK_LEN           |           RESERVED            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                        CHUNK (CHUNK_LEN)                      /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug, Default)]
pub struct PrevExtraData<'a> {
    pub chunk: &'a [u8],
}

impl<'a> PrevExtraData<'a> {
    pub fn new(chunk: &'a [u8]) -> Self {
        Self { chunk }
    }

    /// Compute hash of [PrevExtraData] object
    pub fn hash(&self) -> [u8; 32] {
        crate::digest::digest_prev_extra_data(self.chunk)
    }
}

impl<'a> ApduStatic for PrevExtraData<'a> {
    const CLA: u8 = SIGNER_APDU_CLA;
    const INS: u8 = Instruction::TxAckPrevExtraData as u8;
}

impl<'a> Encode for PrevExtraData<'a> {
    type Error = ApduError;

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        if self.chunk.len() > MAX_EXTRA_DATA_CHUNK {
            return Err(ApduError::InvalidLength);
        }

        let mut e = Encoder::new(buff);
        e.u16(self.chunk.len() as u16)?;
        e.reserved(2)?;
        e.raw(self.chunk)?;

        Ok(e.index())
    }

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(4 + self.chunk.len())
    }
}

impl<'a> Decode<'a> for PrevExtraData<'a> {
    type Output = Self;
    type Error = ApduError;

    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut d = Decoder::new(buff);

        let n = d.u16()? as usize;
        if n > MAX_EXTRA_DATA_CHUNK {
            return Err(ApduError::InvalidLength);
        }
        d.skip(2)?;
        let chunk = d.raw(n)?;

        Ok((Self { chunk }, d.index()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::encode_decode_apdu;

    #[test]
    fn encode_decode_prev_tx() {
        let tests = &[
            PrevTx::new(1, 0, 2, 1),
            PrevTx {
                expiry: Some(0),
                version_group_id: Some(0x892F2085),
                extra_data_len: 1200,
                ..PrevTx::new(4, 0, 1, 2)
            },
        ];

        for t in tests {
            let mut buff = [0u8; 64];
            assert_eq!(encode_decode_apdu(&mut buff, t), 36);
        }
    }

    #[test]
    fn encode_decode_prev_input_output() {
        let script_sig = [0x16, 0x00, 0x14, 0xd1, 0x6b];
        let mut buff = [0u8; 128];
        encode_decode_apdu(
            &mut buff,
            &PrevInput::new([0x20; 32], 0, &script_sig, 0xffffffff),
        );

        let mut buff = [0u8; 128];
        encode_decode_apdu(
            &mut buff,
            &PrevInput {
                decred_tree: Some(0),
                ..PrevInput::new([0xc1; 32], 1, &[], 0xffffffff)
            },
        );

        let script_pubkey = [0x00, 0x14, 0x00, 0x99];
        let mut buff = [0u8; 128];
        encode_decode_apdu(&mut buff, &PrevOutput::new(12300000, &script_pubkey));

        let mut buff = [0u8; 128];
        encode_decode_apdu(
            &mut buff,
            &PrevOutput {
                decred_script_version: Some(0),
                ..PrevOutput::new(390000, &script_pubkey)
            },
        );
    }

    #[test]
    fn encode_decode_extra_data() {
        let chunk = [0xa5u8; 200];
        let mut buff = [0u8; 256];
        assert_eq!(
            encode_decode_apdu(&mut buff, &PrevExtraData::new(&chunk)),
            204
        );
    }
}
