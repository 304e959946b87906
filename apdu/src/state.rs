// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Signing session state APDUs
//!

use encdec::{Decode, DecodeOwned, Encode};
use ledger_proto::ApduError;
use num_enum::TryFromPrimitive;
use rand_core::{CryptoRng, RngCore};
use sha2::{Digest as _, Sha512_256};
use strum::{Display, EnumIter, EnumString, EnumVariantNames};

/// Signer state enumeration
/// used in [`TxInfo`] to communicate signing progress
#[derive(
    Copy, Clone, PartialEq, Debug, EnumString, Display, EnumVariantNames, EnumIter, TryFromPrimitive,
)]
#[repr(u8)]
pub enum TxState {
    /// Idle, no signing session
    Init = 0x00,
    /// Pass 1, verifying inputs and confirming outputs and fee
    ComputeFee = 0x10,
    /// Pass 2, re-streaming inputs to build signature mid-states
    ComputeDigests = 0x20,
    /// Pass 3, signing inputs and serializing the transaction
    SignAndSerialize = 0x30,
    /// Awaiting user confirmation
    Pending = 0x40,
    /// Signing complete
    Finished = 0x50,
    /// Session cancelled by the user or host
    Aborted = 0x51,
    /// Session failed
    Error = 0xFF,
}

impl Encode for TxState {
    type Error = ApduError;

    fn encode_len(&self) -> Result<usize, ApduError> {
        Ok(1)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        buff[0] = *self as u8;
        Ok(1)
    }
}

impl DecodeOwned for TxState {
    type Output = Self;

    type Error = ApduError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), ApduError> {
        if buff.is_empty() {
            return Err(ApduError::InvalidLength);
        }

        match Self::try_from(buff[0]) {
            Ok(v) => Ok((v, 1)),
            Err(_) => Err(ApduError::InvalidEncoding),
        }
    }
}

/// Session digest, a running digest over requests applied to the
/// signer, used to detect desync between the host and hardware wallet.
#[derive(Clone, PartialEq, Encode)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Create a new (empty) state digest
    pub const fn new() -> Self {
        Self([0u8; 32])
    }

    /// Reset state digest from random seed
    #[inline(never)]
    pub fn from_random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut b = [0u8; 32];
        rng.fill_bytes(&mut b);

        let r = Sha512_256::new().chain_update(b).finalize();
        b.copy_from_slice(r.as_ref());

        Self(b)
    }

    /// Update session digest with a new mutating request
    #[inline(never)]
    pub fn update(&mut self, evt: &[u8; 32]) -> &Self {
        // Build and update digest
        let mut d = Sha512_256::new();

        // Prior state
        d.update(self.0);

        // New event
        d.update(evt);

        // Write to internal state
        self.0.copy_from_slice(d.finalize().as_ref());

        self
    }
}

/// Debug format [Digest] as hex
impl core::fmt::Debug for Digest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in &self.0[..] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Display [Digest] as hex
impl core::fmt::Display for Digest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in &self.0[..] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Decode [Digest] into owned array
impl DecodeOwned for Digest {
    type Output = Digest;

    type Error = encdec::Error;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), Self::Error> {
        if buff.len() < 32 {
            return Err(encdec::Error::Length);
        }

        let mut d = [0u8; 32];
        d.copy_from_slice(&buff[..32]);
        Ok((Self(d), 32))
    }
}

/// Session information response APDU.
///
/// Returned alone while the signer is pending, cancelled or failed, and as a
/// header before each [`TxRequest`][crate::request::TxRequest] otherwise.
/// `VALUE` carries signing progress (0..=100), or the number of outstanding
/// prompts while pending.
///
/// ## Encoding:
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    TX_STATE   |             VALUE             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// |                         SESSION_DIGEST                        |
/// |                    32-byte rolling checksum                   |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
#[encdec(error = "ApduError")]
pub struct TxInfo {
    /// Current signer state
    pub state: TxState,
    /// Value associated with current state
    pub value: u16,
    /// Session digest
    pub digest: Digest,
}
