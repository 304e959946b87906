// Copyright (c) 2022-2023 The MobileCoin Foundation

//! UTXO hardware wallet signing core
//!
//! This provides a common [Engine][engine] supporting streaming transaction signing for
//! Bitcoin-family (Bitcoin, Litecoin, Bcash), Zcash and Decred coins on hardware wallets.
//!
//! Interactions with the [Engine][engine] are performed via [Event][engine::Event]s and
//! [Output][engine::Output]s, see [utxo_signer_apdu] for APDU objects and wire encodings.
//!
//! ## Operations
//!
//! Transactions are never held in memory as a whole. The engine instead requests each
//! element as it is required, verifying, hashing and serializing it before requesting
//! the next, with the following passes:
//!
//! 1. Issue [`SignTx`][utxo_signer_apdu::sign_tx::SignTx] with the coin name and transaction
//!    header to start a signing session
//! 2. Compute fee: each input is requested, sanitised and fingerprinted, then each output
//!    is requested and confirmed by the user. The final fee and total are confirmed
//!    before continuing. Inputs and outputs carrying an `orig_hash` replace an earlier
//!    transaction, which is streamed alongside (via `TXMETA` / `TXORIGINPUT` /
//!    `TXORIGOUTPUT`) and its txid and signature checked before the fee change is confirmed.
//! 3. Compute digests: each input is re-requested and the previous transaction it spends
//!    streamed (via `TXMETA` / `TXINPUT` / `TXOUTPUT` / `TXEXTRADATA` with a `tx_hash`)
//!    to verify the claimed amount. Every input is verified, including taproot and
//!    ZIP-0244 inputs whose signatures also commit to amounts.
//! 4. Sign and serialize: inputs and outputs are requested once more, each owned input
//!    is signed and the serialized transaction returned in chunks attached to each
//!    [`TxRequest`][utxo_signer_apdu::request::TxRequest].
//! 5. The final request is `TXFINISHED`, carrying the remaining serialized bytes.
//!
//! Each response carries a [`TxInfo`][utxo_signer_apdu::state::TxInfo] header with the
//! current [signer state][utxo_signer_apdu::state::TxState] and a
//! [`TxDigest`][engine::TxDigest] computed over the requests applied to the session.
//! While user confirmation is pending the engine reports
//! [`TxState::Pending`][utxo_signer_apdu::state::TxState::Pending] and the host should
//! issue [`TxPoll`][utxo_signer_apdu::control::TxPoll] until the next request is released.
//!

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub use utxo_signer_apdu::{self as apdu};

pub mod address;

pub mod coins;

pub mod engine;

pub mod hash;

pub mod helpers;

pub mod keychain;

pub mod paths;

pub mod scripts;

pub mod serializer;

pub mod sighash;

pub mod writer;
