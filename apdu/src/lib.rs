// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Protocol / APDU definitions for UTXO transaction signing
//!
//! This module provides a protocol specification and reference implementation for communication
//! between an untrusted host and a hardware wallet signing Bitcoin-family (Bitcoin, Litecoin,
//! Bcash), Zcash and Decred transactions.
//!
//! Signing is a half-duplex exchange: the host opens a session with [`SignTx`][sign_tx::SignTx],
//! the device responds with a [`TxRequest`][request::TxRequest] describing the next slice of
//! transaction data it requires, and the host answers each request with the matching `TxAck*`
//! message until a `TXFINISHED` request is received.
//!
//! Encodings are intended to be _roughly_ equivalent to packed c structures while maintaining
//! 32-bit field alignment to reduce the need for unaligned access on constrained platforms.
//! All field encodings are little-endian, variable length fields are length-prefixed
//! and follow the fixed-size portion of each message.
//!

#![no_std]

pub use ledger_proto::{ApduError, ApduReq, ApduStatic};

pub mod control;
pub mod digest;
pub mod input;
pub mod output;
pub mod prelude;
pub mod prev;
pub mod request;
pub mod sign_tx;
pub mod state;

mod helpers;
pub use helpers::{Path, MAX_PATH_DEPTH};

/// Signer APDU Class
pub const SIGNER_APDU_CLA: u8 = 0xb1;

/// Signer protocol version
pub const SIGNER_PROTO_VERSION: u8 = 0x01;

/// Signer APDU instruction codes
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(u8)]
pub enum Instruction {
    /// Start a signing session
    SignTx = 0x20,

    /// Poll for the outstanding request (or pending state)
    TxPoll = 0x21,

    /// Cancel the active signing session
    TxCancel = 0x22,

    /// Acknowledge a `TXINPUT` request
    TxAckInput = 0x30,

    /// Acknowledge a `TXOUTPUT` request
    TxAckOutput = 0x31,

    /// Acknowledge a `TXMETA` request for a previous transaction
    TxAckPrevMeta = 0x40,

    /// Acknowledge a `TXINPUT` request for a previous transaction
    TxAckPrevInput = 0x41,

    /// Acknowledge a `TXOUTPUT` request for a previous transaction
    TxAckPrevOutput = 0x42,

    /// Acknowledge a `TXEXTRADATA` request for a previous transaction
    TxAckPrevExtraData = 0x43,
}

/// Helper macro for encoding `bitflags` types
#[macro_export]
macro_rules! encdec_bitflags {
    ($b:ty) => {
        impl encdec::Encode for $b {
            type Error = ApduError;

            fn encode(&self, buff: &mut [u8]) -> Result<usize, Self::Error> {
                let bits: u8 = self.bits();
                encdec::Encode::encode(&bits, buff).map_err(|e| e.into())
            }

            fn encode_len(&self) -> Result<usize, Self::Error> {
                let bits: u8 = self.bits();
                encdec::Encode::encode_len(&bits).map_err(|e| e.into())
            }
        }

        impl encdec::DecodeOwned for $b {
            type Output = $b;
            type Error = ApduError;

            fn decode_owned(buff: &[u8]) -> Result<(Self, usize), Self::Error> {
                if buff.is_empty() {
                    return Err(ApduError::InvalidLength);
                }
                let v = <$b>::from_bits_truncate(buff[0]);
                Ok((v, 1))
            }
        }
    };
}

#[cfg(test)]
pub(crate) mod test {
    use core::fmt::Debug;

    use encdec::EncDec;

    use super::*;

    /// Maximum encoded length for test objects
    pub const MAX_TEST_LEN: usize = 1024;

    /// Helper for APDU encode / decode tests
    pub fn encode_decode_apdu<'a, A: EncDec<'a, ApduError> + PartialEq + Debug>(
        buff: &'a mut [u8],
        apdu: &A,
    ) -> usize {
        // Encode APDU
        let n = apdu.encode(buff).expect("encode failed");

        // Ensure encoded data fits test buffer
        assert!(
            n < MAX_TEST_LEN,
            "encoded length {n} exceeds maximum {MAX_TEST_LEN}"
        );

        // Check encoded length matches expected length
        let expected_n = apdu.encode_len().expect("get length failed");
        assert_eq!(n, expected_n, "encode length mismatch");

        // Decode APDU
        let (decoded, decoded_n) = A::decode(&buff[..n]).expect("decode failed");

        // Check decoded object and length match
        assert_eq!(apdu, &decoded);
        assert_eq!(expected_n, decoded_n);

        // Return length, useful for rough confirmation of packing expectations
        n
    }
}
