// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Previous transaction verification
//!
//! Input amounts supplied by the host are only trusted once the transaction
//! they spend has been re-streamed and its hash recomputed, binding the
//! claimed amount (and script, for external inputs) to the outpoint.

use crate::{
    apdu::prev::{PrevInput, PrevOutput, PrevTx, MAX_EXTRA_DATA_CHUNK},
    coins::CoinInfo,
    hash::{self, Context},
    serializer::{write_prev_tx_footer, write_tx_header, write_tx_input, write_tx_output, TxHeader},
    sighash::Counter,
    writer::{write_varint, Writer},
};

use super::{sanitize::check_prev_header, Error, PrevTxState};

/// Streaming previous transaction verifier
#[derive(Clone, Debug)]
pub struct PrevTxVerifier {
    coin_decred: bool,
    header: TxHeader,
    ctx: Context,

    prev_index: u32,
    inputs: Counter,
    outputs: Counter,

    extra_data_len: u32,
    extra_data_offset: u32,

    /// Referenced output amount and script hash
    spent: Option<(u64, [u8; 32])>,
}

impl PrevTxVerifier {
    /// Start verification of a previous transaction, `prev_index` is the output
    /// spent by the input being verified
    pub fn new(coin: &CoinInfo, meta: &PrevTx, prev_index: u32) -> Result<Self, Error> {
        let header = check_prev_header(coin, meta)?;

        if header.inputs_count == 0 || header.outputs_count == 0 {
            return Err(Error::InvalidCount);
        }
        if prev_index >= header.outputs_count {
            return Err(Error::PrevIndexOutOfRange);
        }

        // Decred transaction ids cover the prefix only, hashed once
        let mut ctx = match coin.decred {
            true => Context::blake256(),
            false => Context::sha256d(),
        };

        write_tx_header(&mut ctx, coin, &header, false)?;
        write_varint(&mut ctx, header.inputs_count as u64)?;

        Ok(Self {
            coin_decred: coin.decred,
            inputs: Counter::new(header.inputs_count),
            outputs: Counter::new(header.outputs_count),
            extra_data_len: meta.extra_data_len,
            extra_data_offset: 0,
            header,
            ctx,
            prev_index,
            spent: None,
        })
    }

    /// Next element required to complete verification
    pub fn next_state(&self) -> Option<PrevTxState> {
        if !self.inputs.is_complete() {
            return Some(PrevTxState::Input(self.inputs.added()));
        }
        if !self.outputs.is_complete() {
            return Some(PrevTxState::Output(self.outputs.added()));
        }
        if self.extra_data_offset < self.extra_data_len {
            return Some(PrevTxState::ExtraData(self.extra_data_offset));
        }
        None
    }

    /// Length of the next extra data chunk
    pub fn extra_data_chunk_len(&self) -> u32 {
        (self.extra_data_len - self.extra_data_offset).min(MAX_EXTRA_DATA_CHUNK as u32)
    }

    /// Add a previous transaction input
    pub fn add_input(&mut self, coin: &CoinInfo, txi: &PrevInput) -> Result<(), Error> {
        if txi.decred_tree.is_some() && !coin.decred {
            return Err(Error::UnexpectedField);
        }

        self.inputs.add()?;

        write_tx_input(
            &mut self.ctx,
            coin,
            &txi.prev_hash,
            txi.prev_index,
            txi.script_sig,
            txi.sequence,
            txi.decred_tree,
        )?;

        if self.inputs.is_complete() {
            write_varint(&mut self.ctx, self.header.outputs_count as u64)?;
        }

        Ok(())
    }

    /// Add a previous transaction output
    pub fn add_output(&mut self, coin: &CoinInfo, txo: &PrevOutput) -> Result<(), Error> {
        if !self.inputs.is_complete() {
            return Err(Error::CountMismatch);
        }

        let script_version = match (coin.decred, txo.decred_script_version) {
            (true, v) => v.unwrap_or(0),
            (false, None) => 0,
            (false, Some(_)) => return Err(Error::UnexpectedField),
        };

        let index = self.outputs.add()?;

        if index == self.prev_index {
            if script_version != 0 {
                return Err(Error::ScriptVersion);
            }
            self.spent = Some((txo.amount, hash::sha256(txo.script_pubkey)));
        }

        write_tx_output(
            &mut self.ctx,
            coin,
            txo.amount,
            txo.script_pubkey,
            script_version,
        )?;

        if self.outputs.is_complete() {
            write_prev_tx_footer(&mut self.ctx, coin, &self.header)?;
        }

        Ok(())
    }

    /// Add a chunk of previous transaction extra data
    pub fn add_extra_data(&mut self, chunk: &[u8]) -> Result<(), Error> {
        if !self.outputs.is_complete() || self.extra_data_offset >= self.extra_data_len {
            return Err(Error::UnexpectedEvent);
        }
        if chunk.len() != self.extra_data_chunk_len() as usize {
            return Err(Error::InvalidLength);
        }

        self.ctx.write(chunk)?;
        self.extra_data_offset += chunk.len() as u32;

        Ok(())
    }

    /// Finalise verification, checking the recomputed hash against `prev_hash`
    /// and returning the referenced output amount and script hash
    pub fn finish(self, prev_hash: &[u8; 32]) -> Result<(u64, [u8; 32]), Error> {
        if self.next_state().is_some() {
            return Err(Error::CountMismatch);
        }

        let mut digest = self.ctx.finalize();
        digest.reverse();

        if &digest != prev_hash {
            #[cfg(feature = "log")]
            log::warn!(
                "prev tx hash mismatch (decred: {}): {:02x?}",
                self.coin_decred,
                digest
            );

            return Err(Error::PrevHashMismatch);
        }

        self.spent.ok_or(Error::PrevIndexOutOfRange)
    }
}
