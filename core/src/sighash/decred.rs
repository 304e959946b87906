// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Decred signature hashing
//!
//! The transaction prefix (inputs without scripts, outputs, lock time and expiry)
//! is hashed once, each signature then commits to the prefix and a witness
//! digest carrying only the signed input's script.

use super::{Counter, SigHasher, SigInput};
use crate::{
    apdu::input::TxInput,
    engine::Error,
    hash::{Accumulator, Context, Slot},
    serializer::{
        write_outpoint, TxHeader, DECRED_SCRIPT_VERSION, DECRED_SERIALIZE_NO_WITNESS,
        DECRED_SERIALIZE_WITNESS_SIGNING,
    },
    writer::{write_prefixed, write_u16, write_u32, write_u64, write_u8, write_varint, Writer},
};

/// Decred prefix hasher
#[derive(Clone, Debug)]
pub struct DecredHasher {
    header: TxHeader,
    inputs: Counter,
    outputs: Counter,
    acc: Accumulator,
    prefix: Option<[u8; 32]>,
}

impl DecredHasher {
    pub fn new(h: &TxHeader) -> Self {
        let mut acc = Accumulator::new();
        acc.open(Slot::Prefix, Context::blake256());

        let mut s = Self {
            header: h.clone(),
            inputs: Counter::new(h.inputs_count),
            outputs: Counter::new(h.outputs_count),
            acc,
            prefix: None,
        };

        // Writes to a freshly opened slot can not fail
        let mut w = s.acc.writer(Slot::Prefix);
        let _ = write_u32(&mut w, h.version | DECRED_SERIALIZE_NO_WITNESS);
        let _ = write_varint(&mut w, h.inputs_count as u64);

        s
    }

    fn witness_digest(&self, i: &SigInput) -> Result<[u8; 32], Error> {
        let mut c = Context::blake256();

        write_u32(&mut c, self.header.version | DECRED_SERIALIZE_WITNESS_SIGNING)?;
        write_varint(&mut c, self.header.inputs_count as u64)?;

        for n in 0..self.header.inputs_count {
            match n == i.index {
                true => write_prefixed(&mut c, i.script_code)?,
                false => write_varint(&mut c, 0)?,
            }
        }

        Ok(c.finalize())
    }
}

impl SigHasher for DecredHasher {
    fn add_input(&mut self, txi: &TxInput, _script_pubkey: &[u8]) -> Result<(), Error> {
        self.inputs.add()?;

        let mut w = self.acc.writer(Slot::Prefix);
        write_outpoint(&mut w, &txi.prev_hash, txi.prev_index)?;
        write_u8(&mut w, txi.decred_tree.unwrap_or(0))?;
        write_u32(&mut w, txi.sequence)?;

        if self.inputs.is_complete() {
            write_varint(&mut w, self.outputs.declared() as u64)?;
        }

        Ok(())
    }

    fn add_output(&mut self, amount: u64, script_pubkey: &[u8]) -> Result<(), Error> {
        if !self.inputs.is_complete() {
            return Err(Error::CountMismatch);
        }
        self.outputs.add()?;

        let mut w = self.acc.writer(Slot::Prefix);
        write_u64(&mut w, amount)?;
        write_u16(&mut w, DECRED_SCRIPT_VERSION)?;
        write_prefixed(&mut w, script_pubkey)
    }

    fn seal(&mut self) -> Result<(), Error> {
        if !self.inputs.is_complete() || !self.outputs.is_complete() {
            return Err(Error::CountMismatch);
        }

        let mut w = self.acc.writer(Slot::Prefix);
        write_u32(&mut w, self.header.lock_time)?;
        write_u32(&mut w, self.header.expiry)?;

        self.prefix = Some(self.acc.finalize(Slot::Prefix)?);

        Ok(())
    }

    fn is_sealed(&self) -> bool {
        self.prefix.is_some()
    }

    fn signature_digest(&self, i: &SigInput) -> Result<[u8; 32], Error> {
        let prefix = self.prefix.as_ref().ok_or(Error::DigestNotReady)?;

        let mut c = Context::blake256();
        write_u32(&mut c, i.sighash_type)?;
        c.write(prefix)?;
        c.write(&self.witness_digest(i)?)?;

        Ok(c.finalize())
    }
}
