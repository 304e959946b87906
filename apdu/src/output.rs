// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction output APDUs

use bitflags::bitflags;
use encdec::{Decode, Encode};
use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter, EnumString};

use crate::{
    encdec_bitflags,
    helpers::{bytes_len, Decoder, Encoder},
    ApduError, ApduStatic, Instruction, Path, SIGNER_APDU_CLA,
};

/// Maximum address string length
pub const MAX_ADDRESS_LEN: usize = 128;

/// Output script types
#[derive(
    Copy, Clone, PartialEq, Debug, Default, EnumString, Display, EnumIter, TryFromPrimitive,
)]
#[repr(u8)]
pub enum OutputScriptType {
    /// Pay to the provided address (script type derived from the address)
    #[default]
    PayToAddress = 0,
    /// Pay to a script hash
    PayToScriptHash = 1,
    /// Pay to a native segwit address / change
    PayToWitness = 2,
    /// Pay to segwit wrapped in P2SH address / change
    PayToP2shWitness = 3,
    /// Data output
    PayToOpReturn = 4,
    /// Pay to a taproot address / change
    PayToTaproot = 5,
}

bitflags! {
    /// Optional [`TxOutput`] fields
    #[derive(Default)]
    pub struct TxOutputFlags: u8 {
        const HAS_ADDRESS = 1 << 0;
        const HAS_OP_RETURN_DATA = 1 << 1;
        const HAS_ORIG = 1 << 2;
    }
}

encdec_bitflags!(TxOutputFlags);

/// Transaction output, sent in response to a `TXOUTPUT` request.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     FLAGS     |  SCRIPT_TYPE  |   PATH_LEN    |  ADDRESS_LEN  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        AMOUNT (u64)                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                  ADDRESS_N (PATH_LEN * u32)                   /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                     ADDRESS (ADDRESS_LEN)                     /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /               OP_RETURN_DATA (u16 len, optional)              /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    ORIG_INDEX (optional)                      |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /         ORIG_HASH (32-byte, display order, optional)          /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TxOutput<'a> {
    /// Destination address
    pub address: Option<&'a str>,
    /// Derivation path for change outputs
    pub address_n: Path,
    /// Amount (satoshis)
    pub amount: u64,
    /// Output script type
    pub script_type: OutputScriptType,
    /// Data for `PayToOpReturn` outputs
    pub op_return_data: Option<&'a [u8]>,
    /// Hash of the transaction this one replaces
    pub orig_hash: Option<[u8; 32]>,
    /// Index of this output in the replaced transaction
    pub orig_index: u32,
}

impl<'a> TxOutput<'a> {
    /// Create an output paying to an address
    pub fn to_address(address: &'a str, amount: u64) -> Self {
        Self {
            address: Some(address),
            amount,
            ..Default::default()
        }
    }

    /// Create an output paying to a wallet derivation path
    pub fn to_path(address_n: &[u32], amount: u64, script_type: OutputScriptType) -> Self {
        Self {
            address_n: Path::from_slice(address_n).unwrap_or_default(),
            amount,
            script_type,
            ..Default::default()
        }
    }

    /// Create an `OP_RETURN` data output
    pub fn op_return(data: &'a [u8]) -> Self {
        Self {
            script_type: OutputScriptType::PayToOpReturn,
            op_return_data: Some(data),
            ..Default::default()
        }
    }

    fn flags(&self) -> TxOutputFlags {
        let mut f = TxOutputFlags::empty();
        f.set(TxOutputFlags::HAS_ADDRESS, self.address.is_some());
        f.set(
            TxOutputFlags::HAS_OP_RETURN_DATA,
            self.op_return_data.is_some(),
        );
        f.set(TxOutputFlags::HAS_ORIG, self.orig_hash.is_some());
        f
    }

    /// Compute hash of [TxOutput] object
    pub fn hash(&self) -> [u8; 32] {
        crate::digest::digest_tx_output(self)
    }
}

impl<'a> ApduStatic for TxOutput<'a> {
    const CLA: u8 = SIGNER_APDU_CLA;
    const INS: u8 = Instruction::TxAckOutput as u8;
}

impl<'a> Encode for TxOutput<'a> {
    type Error = ApduError;

    /// Encode a [`TxOutput`] APDU into the provided buffer
    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let address = self.address.unwrap_or("").as_bytes();
        if address.len() > MAX_ADDRESS_LEN {
            return Err(ApduError::InvalidLength);
        }

        let mut e = Encoder::new(buff);

        e.u8(self.flags().bits())?;
        e.u8(self.script_type as u8)?;
        e.u8(self.address_n.len() as u8)?;
        e.u8(address.len() as u8)?;

        e.u64(self.amount)?;
        e.path(&self.address_n)?;
        e.raw(address)?;

        if let Some(d) = self.op_return_data {
            e.bytes(d)?;
        }

        if let Some(h) = &self.orig_hash {
            e.u32(self.orig_index)?;
            e.raw(h)?;
        }

        Ok(e.index())
    }

    fn encode_len(&self) -> Result<usize, ApduError> {
        let mut n = 4 + 8 + self.address_n.len() * 4;
        n += self.address.map(|a| a.len()).unwrap_or(0);
        n += self.op_return_data.map(bytes_len).unwrap_or(0);
        if self.orig_hash.is_some() {
            n += 4 + 32;
        }
        Ok(n)
    }
}

impl<'a> Decode<'a> for TxOutput<'a> {
    type Output = Self;
    type Error = ApduError;

    /// Decode a [`TxOutput`] APDU from the provided buffer
    fn decode(buff: &'a [u8]) -> Result<(Self, usize), ApduError> {
        let mut d = Decoder::new(buff);

        let flags = TxOutputFlags::from_bits_truncate(d.u8()?);
        let script_type =
            OutputScriptType::try_from(d.u8()?).map_err(|_| ApduError::InvalidEncoding)?;
        let path_len = d.u8()? as usize;
        let address_len = d.u8()? as usize;

        let amount = d.u64()?;
        let address_n = d.path(path_len)?;
        let address = d.str(address_len)?;

        let op_return_data = match flags.contains(TxOutputFlags::HAS_OP_RETURN_DATA) {
            true => Some(d.bytes()?),
            false => None,
        };

        let (orig_hash, orig_index) = match flags.contains(TxOutputFlags::HAS_ORIG) {
            true => {
                let i = d.u32()?;
                (Some(d.array::<32>()?), i)
            }
            false => (None, 0),
        };

        Ok((
            Self {
                address: flags.contains(TxOutputFlags::HAS_ADDRESS).then_some(address),
                address_n,
                amount,
                script_type,
                op_return_data,
                orig_hash,
                orig_index,
            },
            d.index(),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::encode_decode_apdu;

    #[test]
    fn encode_decode_tx_output() {
        let tests = &[
            TxOutput::to_address("tb1q694ccp5qcc0udmfwgp692u2s2hjpq5h407urtu", 7289000),
            TxOutput::to_path(
                &[0x8000_0031, 0x8000_0001, 0x8000_0000, 1, 0],
                5000000,
                OutputScriptType::PayToP2shWitness,
            ),
            TxOutput::op_return(b"test of the op_return data"),
            TxOutput {
                orig_hash: Some([0x66; 32]),
                orig_index: 1,
                ..TxOutput::to_address("mhRx1CeVfaayqRwq5zgRQmD7W5aWBfD5mC", 90_000)
            },
        ];

        for t in tests {
            let mut buff = [0u8; 256];
            encode_decode_apdu(&mut buff, t);
        }
    }
}
