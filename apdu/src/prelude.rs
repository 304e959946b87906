// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Prelude to simplify downstream use of APDU objects
//!

pub use crate::{
    control::{TxCancel, TxPoll},
    input::{InputScriptType, Multisig, TxInput, TxInputFlags},
    output::{OutputScriptType, TxOutput, TxOutputFlags},
    prev::{PrevExtraData, PrevInput, PrevOutput, PrevTx, PrevTxFlags},
    request::{RequestType, TxRequest, TxRequestDetails, TxRequestSerialized},
    sign_tx::{SignTx, SignTxFlags},
    state::{Digest, TxInfo, TxState},
    Instruction, Path,
};
