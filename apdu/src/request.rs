// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction request APDUs, returned by the device to ask the host for
//! the next slice of transaction data and to deliver serialized output.

use bitflags::bitflags;
use encdec::{DecodeOwned, Encode};
use heapless::Vec;
use num_enum::TryFromPrimitive;
use strum::{Display, EnumIter, EnumString, EnumVariantNames};

use crate::{
    encdec_bitflags,
    helpers::{Decoder, Encoder},
    ApduError,
};

/// Maximum signature length (DER ECDSA or 64-byte schnorr)
pub const MAX_SIGNATURE_LEN: usize = 73;

/// Maximum serialized transaction chunk length
pub const MAX_SERIALIZED_LEN: usize = 2048;

/// Kind of data requested from the host
#[derive(
    Copy, Clone, PartialEq, Debug, EnumString, Display, EnumVariantNames, EnumIter, TryFromPrimitive,
)]
#[repr(u8)]
pub enum RequestType {
    /// Request an input (of the signed or a previous transaction)
    TxInput = 0,
    /// Request an output (of the signed or a previous transaction)
    TxOutput = 1,
    /// Request previous transaction metadata
    TxMeta = 2,
    /// Signing complete, no further data required
    TxFinished = 3,
    /// Request a chunk of previous transaction extra data
    TxExtraData = 4,
    /// Request an input of the transaction being replaced
    TxOrigInput = 5,
    /// Request an output of the transaction being replaced
    TxOrigOutput = 6,
}

bitflags! {
    /// Optional [`TxRequest`] fields
    #[derive(Default)]
    pub struct TxRequestFlags: u8 {
        const HAS_TX_HASH = 1 << 0;
        const HAS_EXTRA_DATA = 1 << 1;
        const HAS_SIGNATURE = 1 << 2;
    }
}

encdec_bitflags!(TxRequestFlags);

/// Request details, identifying the element the host must send next
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TxRequestDetails {
    /// Index of the requested input / output
    pub request_index: u32,
    /// Previous transaction hash, when the request refers to a previous transaction
    pub tx_hash: Option<[u8; 32]>,
    /// Extra data window `(offset, len)` for `TXEXTRADATA` requests
    pub extra_data: Option<(u32, u32)>,
}

/// Serialized data produced since the previous request
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TxRequestSerialized {
    /// Input index the signature belongs to
    pub signature_index: u32,
    /// Signature bytes (without hash type)
    pub signature: Vec<u8, MAX_SIGNATURE_LEN>,
    /// Serialized transaction chunk
    pub serialized_tx: Vec<u8, MAX_SERIALIZED_LEN>,
}

impl TxRequestSerialized {
    /// Check whether any serialized data or signature is attached
    pub fn is_empty(&self) -> bool {
        self.signature.is_empty() && self.serialized_tx.is_empty()
    }
}

/// Transaction request, returned by the device in response to
/// [`SignTx`][crate::sign_tx::SignTx], `TxAck*` and
/// [`TxPoll`][crate::control::TxPoll] messages.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  REQUEST_TYPE |     FLAGS     |    SIG_LEN    |   RESERVED    |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         REQUEST_INDEX                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        SIGNATURE_INDEX                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                       EXTRA_DATA_OFFSET                       |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        EXTRA_DATA_LEN                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |        SERIALIZED_LEN         |           RESERVED            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                TX_HASH (32-byte, if flag set)                 /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                      SIGNATURE (SIG_LEN)                      /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// /                  SERIALIZED_TX (SERIALIZED_LEN)               /
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug)]
pub struct TxRequest {
    pub request_type: RequestType,
    pub details: TxRequestDetails,
    pub serialized: TxRequestSerialized,
}

impl TxRequest {
    fn new(request_type: RequestType, details: TxRequestDetails) -> Self {
        Self {
            request_type,
            details,
            serialized: TxRequestSerialized::default(),
        }
    }

    /// Request input `index` of the signed transaction
    pub fn input(index: u32) -> Self {
        Self::new(
            RequestType::TxInput,
            TxRequestDetails {
                request_index: index,
                ..Default::default()
            },
        )
    }

    /// Request output `index` of the signed transaction
    pub fn output(index: u32) -> Self {
        Self::new(
            RequestType::TxOutput,
            TxRequestDetails {
                request_index: index,
                ..Default::default()
            },
        )
    }

    /// Request metadata for previous transaction `tx_hash`
    pub fn prev_meta(tx_hash: [u8; 32]) -> Self {
        Self::new(
            RequestType::TxMeta,
            TxRequestDetails {
                tx_hash: Some(tx_hash),
                ..Default::default()
            },
        )
    }

    /// Request input `index` of previous transaction `tx_hash`
    pub fn prev_input(index: u32, tx_hash: [u8; 32]) -> Self {
        Self::new(
            RequestType::TxInput,
            TxRequestDetails {
                request_index: index,
                tx_hash: Some(tx_hash),
                ..Default::default()
            },
        )
    }

    /// Request output `index` of previous transaction `tx_hash`
    pub fn prev_output(index: u32, tx_hash: [u8; 32]) -> Self {
        Self::new(
            RequestType::TxOutput,
            TxRequestDetails {
                request_index: index,
                tx_hash: Some(tx_hash),
                ..Default::default()
            },
        )
    }

    /// Request `len` bytes of previous transaction extra data from `offset`
    pub fn prev_extra_data(tx_hash: [u8; 32], offset: u32, len: u32) -> Self {
        Self::new(
            RequestType::TxExtraData,
            TxRequestDetails {
                request_index: 0,
                tx_hash: Some(tx_hash),
                extra_data: Some((offset, len)),
            },
        )
    }

    /// Request input `index` of original transaction `tx_hash`
    pub fn orig_input(index: u32, tx_hash: [u8; 32]) -> Self {
        Self::new(
            RequestType::TxOrigInput,
            TxRequestDetails {
                request_index: index,
                tx_hash: Some(tx_hash),
                ..Default::default()
            },
        )
    }

    /// Request output `index` of original transaction `tx_hash`
    pub fn orig_output(index: u32, tx_hash: [u8; 32]) -> Self {
        Self::new(
            RequestType::TxOrigOutput,
            TxRequestDetails {
                request_index: index,
                tx_hash: Some(tx_hash),
                ..Default::default()
            },
        )
    }

    /// Signing complete
    pub fn finished() -> Self {
        Self::new(RequestType::TxFinished, TxRequestDetails::default())
    }

    /// Check whether this request refers to a previous transaction
    pub fn is_prev(&self) -> bool {
        self.details.tx_hash.is_some() && !self.is_orig()
    }

    /// Check whether this request refers to the transaction being replaced,
    /// answered with full [TxInput][crate::input::TxInput] /
    /// [TxOutput][crate::output::TxOutput] elements
    pub fn is_orig(&self) -> bool {
        matches!(
            self.request_type,
            RequestType::TxOrigInput | RequestType::TxOrigOutput
        )
    }

    fn flags(&self) -> TxRequestFlags {
        let mut f = TxRequestFlags::empty();
        f.set(TxRequestFlags::HAS_TX_HASH, self.details.tx_hash.is_some());
        f.set(
            TxRequestFlags::HAS_EXTRA_DATA,
            self.details.extra_data.is_some(),
        );
        f.set(
            TxRequestFlags::HAS_SIGNATURE,
            !self.serialized.signature.is_empty(),
        );
        f
    }
}

impl Encode for TxRequest {
    type Error = ApduError;

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        let mut e = Encoder::new(buff);
        let (offset, len) = self.details.extra_data.unwrap_or((0, 0));

        e.u8(self.request_type as u8)?;
        e.u8(self.flags().bits())?;
        e.u8(self.serialized.signature.len() as u8)?;
        e.reserved(1)?;

        e.u32(self.details.request_index)?;
        e.u32(self.serialized.signature_index)?;
        e.u32(offset)?;
        e.u32(len)?;

        e.u16(self.serialized.serialized_tx.len() as u16)?;
        e.reserved(2)?;

        if let Some(h) = &self.details.tx_hash {
            e.raw(h)?;
        }
        e.raw(&self.serialized.signature)?;
        e.raw(&self.serialized.serialized_tx)?;

        Ok(e.index())
    }

    fn encode_len(&self) -> Result<usize, ApduError> {
        let mut n = 4 + 4 * 4 + 4;
        if self.details.tx_hash.is_some() {
            n += 32;
        }
        Ok(n + self.serialized.signature.len() + self.serialized.serialized_tx.len())
    }
}

impl DecodeOwned for TxRequest {
    type Output = Self;
    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self, usize), ApduError> {
        let mut d = Decoder::new(buff);

        let request_type =
            RequestType::try_from(d.u8()?).map_err(|_| ApduError::InvalidEncoding)?;
        let flags = TxRequestFlags::from_bits_truncate(d.u8()?);
        let sig_len = d.u8()? as usize;
        d.skip(1)?;

        let request_index = d.u32()?;
        let signature_index = d.u32()?;
        let offset = d.u32()?;
        let len = d.u32()?;

        let serialized_len = d.u16()? as usize;
        d.skip(2)?;

        let tx_hash = match flags.contains(TxRequestFlags::HAS_TX_HASH) {
            true => Some(d.array::<32>()?),
            false => None,
        };

        let signature =
            Vec::from_slice(d.raw(sig_len)?).map_err(|_| ApduError::InvalidLength)?;
        let serialized_tx =
            Vec::from_slice(d.raw(serialized_len)?).map_err(|_| ApduError::InvalidLength)?;

        Ok((
            Self {
                request_type,
                details: TxRequestDetails {
                    request_index,
                    tx_hash,
                    extra_data: flags
                        .contains(TxRequestFlags::HAS_EXTRA_DATA)
                        .then_some((offset, len)),
                },
                serialized: TxRequestSerialized {
                    signature_index,
                    signature,
                    serialized_tx,
                },
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
    fn encode_decode_tx_request() {
        let mut with_data = TxRequest::output(1);
        with_data.serialized.signature_index = 2;
        with_data
            .serialized
            .signature
            .extend_from_slice(&[0x30, 0x44, 0x02, 0x20])
            .unwrap();
        with_data
            .serialized
            .serialized_tx
            .extend_from_slice(&[0x01, 0x00, 0x00, 0x00, 0x01])
            .unwrap();

        let tests = &[
            TxRequest::input(0),
            TxRequest::prev_meta([0xab; 32]),
            TxRequest::prev_input(3, [0x01; 32]),
            TxRequest::prev_output(1, [0x02; 32]),
            TxRequest::prev_extra_data([0x03; 32], 1024, 176),
            TxRequest::orig_input(2, [0x04; 32]),
            TxRequest::orig_output(0, [0x05; 32]),
            TxRequest::finished(),
            with_data,
        ];

        for t in tests {
            let mut buff = [0u8; 256];
            encode_decode_apdu(&mut buff, t);
        }
    }

    #[test]
    fn prev_requests_carry_hash() {
        assert!(!TxRequest::input(0).is_prev());
        assert!(TxRequest::prev_input(0, [0u8; 32]).is_prev());
        assert!(TxRequest::prev_meta([0u8; 32]).is_prev());

        let o = TxRequest::orig_input(1, [0u8; 32]);
        assert!(o.is_orig());
        assert!(!o.is_prev());
        assert!(!TxRequest::prev_output(1, [0u8; 32]).is_orig());
    }
}
