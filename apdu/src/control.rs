// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Session control APDUs

use encdec::{Decode, Encode};

use crate::{ApduError, ApduStatic, Instruction, SIGNER_APDU_CLA};

/// Poll the signer for the outstanding [`TxRequest`][crate::request::TxRequest]
/// (0 length APDU).
///
/// Used to retrieve the request withheld while the user resolves
/// confirmation prompts, or to re-fetch a request lost in transit.
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
#[encdec(error = "ApduError")]
pub struct TxPoll;

impl ApduStatic for TxPoll {
    const CLA: u8 = SIGNER_APDU_CLA;
    const INS: u8 = Instruction::TxPoll as u8;
}

/// Cancel the active signing session (0 length APDU)
#[derive(Clone, PartialEq, Debug, Encode, Decode)]
#[encdec(error = "ApduError")]
pub struct TxCancel;

impl ApduStatic for TxCancel {
    const CLA: u8 = SIGNER_APDU_CLA;
    const INS: u8 = Instruction::TxCancel as u8;
}
