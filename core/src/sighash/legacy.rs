// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Legacy (pre-segwit) signature hashing
//!
//! The signed preimage is a copy of the transaction with every input script
//! emptied except that of the input being signed, followed by the hash type.
//! The host re-streams the whole transaction for each legacy input.

use super::Counter;
use crate::{
    apdu::input::TxInput,
    coins::CoinInfo,
    engine::Error,
    hash::Context,
    serializer::{write_tx_input, write_tx_output, TxHeader},
    writer::{write_u32, write_varint},
};

/// Legacy signature hasher for a single input
#[derive(Clone, Debug)]
pub struct LegacyHasher {
    ctx: Context,
    inputs: Counter,
    outputs: Counter,
}

impl LegacyHasher {
    /// Start a legacy preimage, writing the header and input count
    pub fn new(coin: &CoinInfo, h: &TxHeader) -> Result<Self, Error> {
        let mut ctx = match coin.sign_hash_double {
            true => Context::sha256d(),
            false => Context::sha256(),
        };

        write_u32(&mut ctx, h.version)?;
        write_varint(&mut ctx, h.inputs_count as u64)?;

        Ok(Self {
            ctx,
            inputs: Counter::new(h.inputs_count),
            outputs: Counter::new(h.outputs_count),
        })
    }

    /// Add an input, `script` is the previous output script for the signed
    /// input and empty for all others
    pub fn add_input(&mut self, coin: &CoinInfo, txi: &TxInput, script: &[u8]) -> Result<(), Error> {
        self.inputs.add()?;

        write_tx_input(
            &mut self.ctx,
            coin,
            &txi.prev_hash,
            txi.prev_index,
            script,
            txi.sequence,
            txi.decred_tree,
        )?;

        if self.inputs.is_complete() {
            write_varint(&mut self.ctx, self.outputs.declared() as u64)?;
        }

        Ok(())
    }

    /// Add an output, all inputs must have been added
    pub fn add_output(&mut self, coin: &CoinInfo, amount: u64, script_pubkey: &[u8]) -> Result<(), Error> {
        if !self.inputs.is_complete() {
            return Err(Error::CountMismatch);
        }
        self.outputs.add()?;

        write_tx_output(&mut self.ctx, coin, amount, script_pubkey, 0)
    }

    /// Complete the preimage with lock time and hash type, returning the signature digest
    pub fn finish(mut self, lock_time: u32, sighash_type: u32) -> Result<[u8; 32], Error> {
        if !self.inputs.is_complete() || !self.outputs.is_complete() {
            return Err(Error::DigestNotReady);
        }

        write_u32(&mut self.ctx, lock_time)?;
        write_u32(&mut self.ctx, sighash_type)?;

        Ok(self.ctx.finalize())
    }
}
