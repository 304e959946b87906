// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Bitcoin family BIP-0143 (segwit v0) and BIP-0341 (taproot) signature hashing

use super::{Counter, SigHasher, SigInput};
use crate::{
    apdu::input::TxInput,
    engine::Error,
    hash::{self, Accumulator, Context, Slot},
    serializer::{write_outpoint, TxHeader},
    writer::{write_prefixed, write_u32, write_u64, write_u8, Writer},
};

/// Mid-state slots, single SHA-256 over each element set
const SLOTS: [Slot; 5] = [
    Slot::Prevouts,
    Slot::Amounts,
    Slot::ScriptPubkeys,
    Slot::Sequences,
    Slot::Outputs,
];

/// Shared digests, fixed once all inputs and outputs are added
#[derive(Clone, PartialEq, Debug)]
struct MidState {
    prevouts: [u8; 32],
    amounts: [u8; 32],
    script_pubkeys: [u8; 32],
    sequences: [u8; 32],
    outputs: [u8; 32],
}

/// BIP-0143 / BIP-0341 mid-state hasher
#[derive(Clone, Debug)]
pub struct Bip143 {
    version: u32,
    lock_time: u32,
    inputs: Counter,
    outputs: Counter,
    acc: Accumulator,
    mid: Option<MidState>,
}

impl Bip143 {
    pub fn new(h: &TxHeader) -> Self {
        let mut acc = Accumulator::new();
        for s in SLOTS {
            acc.open(s, Context::sha256());
        }

        Self {
            version: h.version,
            lock_time: h.lock_time,
            inputs: Counter::new(h.inputs_count),
            outputs: Counter::new(h.outputs_count),
            acc,
            mid: None,
        }
    }

    /// BIP-0143 digest, mid-states are double hashed here
    fn bip143_digest(&self, m: &MidState, i: &SigInput) -> Result<[u8; 32], Error> {
        let mut c = Context::sha256d();

        write_u32(&mut c, self.version)?;
        c.write(&hash::sha256(&m.prevouts))?;
        c.write(&hash::sha256(&m.sequences))?;
        write_outpoint(&mut c, i.prev_hash, i.prev_index)?;
        write_prefixed(&mut c, i.script_code)?;
        write_u64(&mut c, i.amount)?;
        write_u32(&mut c, i.sequence)?;
        c.write(&hash::sha256(&m.outputs))?;
        write_u32(&mut c, self.lock_time)?;
        write_u32(&mut c, i.sighash_type)?;

        Ok(c.finalize())
    }

    /// BIP-0341 key path digest (`SIGHASH_DEFAULT` / `SIGHASH_ALL`, no annex)
    fn bip341_digest(&self, m: &MidState, i: &SigInput) -> Result<[u8; 32], Error> {
        let mut c = Context::tagged("TapSighash");

        // Epoch
        write_u8(&mut c, 0x00)?;
        write_u8(&mut c, i.sighash_type as u8)?;
        write_u32(&mut c, self.version)?;
        write_u32(&mut c, self.lock_time)?;

        c.write(&m.prevouts)?;
        c.write(&m.amounts)?;
        c.write(&m.script_pubkeys)?;
        c.write(&m.sequences)?;
        c.write(&m.outputs)?;

        // Spend type, key path without annex
        write_u8(&mut c, 0x00)?;
        write_u32(&mut c, i.index)?;

        Ok(c.finalize())
    }
}

impl SigHasher for Bip143 {
    fn add_input(&mut self, txi: &TxInput, script_pubkey: &[u8]) -> Result<(), Error> {
        self.inputs.add()?;

        write_outpoint(
            &mut self.acc.writer(Slot::Prevouts),
            &txi.prev_hash,
            txi.prev_index,
        )?;
        write_u64(&mut self.acc.writer(Slot::Amounts), txi.amount)?;
        write_prefixed(&mut self.acc.writer(Slot::ScriptPubkeys), script_pubkey)?;
        write_u32(&mut self.acc.writer(Slot::Sequences), txi.sequence)?;

        Ok(())
    }

    fn add_output(&mut self, amount: u64, script_pubkey: &[u8]) -> Result<(), Error> {
        self.outputs.add()?;

        let mut w = self.acc.writer(Slot::Outputs);
        write_u64(&mut w, amount)?;
        write_prefixed(&mut w, script_pubkey)
    }

    fn seal(&mut self) -> Result<(), Error> {
        if !self.inputs.is_complete() || !self.outputs.is_complete() {
            return Err(Error::CountMismatch);
        }

        self.mid = Some(MidState {
            prevouts: self.acc.finalize(Slot::Prevouts)?,
            amounts: self.acc.finalize(Slot::Amounts)?,
            script_pubkeys: self.acc.finalize(Slot::ScriptPubkeys)?,
            sequences: self.acc.finalize(Slot::Sequences)?,
            outputs: self.acc.finalize(Slot::Outputs)?,
        });

        Ok(())
    }

    fn is_sealed(&self) -> bool {
        self.mid.is_some()
    }

    fn signature_digest(&self, i: &SigInput) -> Result<[u8; 32], Error> {
        let m = self.mid.as_ref().ok_or(Error::DigestNotReady)?;

        match i.taproot {
            true => self.bip341_digest(m, i),
            false => self.bip143_digest(m, i),
        }
    }
}
