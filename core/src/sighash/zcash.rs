// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Zcash ZIP-0243 (Sapling) and ZIP-0244 (NU5) transparent signature hashing
//!
//! Only transparent inputs and outputs are supported, shielded bundles are always empty.

use super::{Counter, SigHasher, SigInput};
use crate::{
    apdu::input::TxInput,
    engine::Error,
    hash::{Accumulator, Context, Slot},
    serializer::{write_outpoint, TxHeader, OVERWINTERED},
    writer::{write_prefixed, write_u32, write_u64, write_u8, Writer},
};

/// Build a personalised BLAKE2b context with the consensus branch appended
fn branch_personal(prefix: &[u8; 12], branch_id: u32) -> Context {
    let mut p = [0u8; 16];
    p[..12].copy_from_slice(prefix);
    p[12..].copy_from_slice(&branch_id.to_le_bytes());
    Context::blake2b(&p)
}

fn blake2b(personal: &[u8], d: &[u8]) -> [u8; 32] {
    let mut c = Context::blake2b(personal);
    c.update(d);
    c.finalize()
}

/// ZIP-0243 signature hasher
#[derive(Clone, Debug)]
pub struct Zip243 {
    header: TxHeader,
    inputs: Counter,
    outputs: Counter,
    acc: Accumulator,
    /// prevouts, sequences, outputs
    mid: Option<[[u8; 32]; 3]>,
}

impl Zip243 {
    pub fn new(h: &TxHeader) -> Self {
        let mut acc = Accumulator::new();
        acc.open(Slot::Prevouts, Context::blake2b(b"ZcashPrevoutHash"));
        acc.open(Slot::Sequences, Context::blake2b(b"ZcashSequencHash"));
        acc.open(Slot::Outputs, Context::blake2b(b"ZcashOutputsHash"));

        Self {
            header: h.clone(),
            inputs: Counter::new(h.inputs_count),
            outputs: Counter::new(h.outputs_count),
            acc,
            mid: None,
        }
    }
}

impl SigHasher for Zip243 {
    fn add_input(&mut self, txi: &TxInput, _script_pubkey: &[u8]) -> Result<(), Error> {
        self.inputs.add()?;

        write_outpoint(
            &mut self.acc.writer(Slot::Prevouts),
            &txi.prev_hash,
            txi.prev_index,
        )?;
        write_u32(&mut self.acc.writer(Slot::Sequences), txi.sequence)
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

        self.mid = Some([
            self.acc.finalize(Slot::Prevouts)?,
            self.acc.finalize(Slot::Sequences)?,
            self.acc.finalize(Slot::Outputs)?,
        ]);

        Ok(())
    }

    fn is_sealed(&self) -> bool {
        self.mid.is_some()
    }

    fn signature_digest(&self, i: &SigInput) -> Result<[u8; 32], Error> {
        let [prevouts, sequences, outputs] = self.mid.as_ref().ok_or(Error::DigestNotReady)?;
        let h = &self.header;

        let mut c = branch_personal(b"ZcashSigHash", h.branch_id);

        write_u32(&mut c, h.version | OVERWINTERED)?;
        write_u32(&mut c, h.version_group_id.unwrap_or(0))?;
        c.write(prevouts)?;
        c.write(sequences)?;
        c.write(outputs)?;

        // Empty joinsplits, shielded spends and shielded outputs
        c.write(&[0u8; 32])?;
        c.write(&[0u8; 32])?;
        c.write(&[0u8; 32])?;

        write_u32(&mut c, h.lock_time)?;
        write_u32(&mut c, h.expiry)?;
        // Value balance
        write_u64(&mut c, 0)?;
        write_u32(&mut c, i.sighash_type)?;

        write_outpoint(&mut c, i.prev_hash, i.prev_index)?;
        write_prefixed(&mut c, i.script_code)?;
        write_u64(&mut c, i.amount)?;
        write_u32(&mut c, i.sequence)?;

        Ok(c.finalize())
    }
}

#[derive(Clone, PartialEq, Debug)]
struct Zip244MidState {
    prevouts: [u8; 32],
    amounts: [u8; 32],
    script_pubkeys: [u8; 32],
    sequences: [u8; 32],
    outputs: [u8; 32],
}

/// ZIP-0244 signature hasher
#[derive(Clone, Debug)]
pub struct Zip244 {
    header: TxHeader,
    inputs: Counter,
    outputs: Counter,
    acc: Accumulator,
    mid: Option<Zip244MidState>,
}

impl Zip244 {
    pub fn new(h: &TxHeader) -> Self {
        let mut acc = Accumulator::new();
        acc.open(Slot::Prevouts, Context::blake2b(b"ZTxIdPrevoutHash"));
        acc.open(Slot::Amounts, Context::blake2b(b"ZTxTrAmountsHash"));
        acc.open(Slot::ScriptPubkeys, Context::blake2b(b"ZTxTrScriptsHash"));
        acc.open(Slot::Sequences, Context::blake2b(b"ZTxIdSequencHash"));
        acc.open(Slot::Outputs, Context::blake2b(b"ZTxIdOutputsHash"));

        Self {
            header: h.clone(),
            inputs: Counter::new(h.inputs_count),
            outputs: Counter::new(h.outputs_count),
            acc,
            mid: None,
        }
    }

    fn header_digest(&self) -> Result<[u8; 32], Error> {
        let h = &self.header;
        let mut c = Context::blake2b(b"ZTxIdHeadersHash");

        write_u32(&mut c, h.version | OVERWINTERED)?;
        write_u32(&mut c, h.version_group_id.unwrap_or(0))?;
        write_u32(&mut c, h.branch_id)?;
        write_u32(&mut c, h.lock_time)?;
        write_u32(&mut c, h.expiry)?;

        Ok(c.finalize())
    }

    /// Combine header and transparent digests with the empty shielded bundles
    fn tx_digest(&self, transparent: &[u8; 32]) -> Result<[u8; 32], Error> {
        let mut c = branch_personal(b"ZcashTxHash_", self.header.branch_id);

        c.write(&self.header_digest()?)?;
        c.write(transparent)?;
        c.write(&blake2b(b"ZTxIdSaplingHash", &[]))?;
        c.write(&blake2b(b"ZTxIdOrchardHash", &[]))?;

        Ok(c.finalize())
    }

    /// Transaction id digest (natural byte order, reversed for display)
    pub fn txid(&self) -> Result<[u8; 32], Error> {
        let m = self.mid.as_ref().ok_or(Error::DigestNotReady)?;

        let mut c = Context::blake2b(b"ZTxIdTranspaHash");
        c.write(&m.prevouts)?;
        c.write(&m.sequences)?;
        c.write(&m.outputs)?;

        self.tx_digest(&c.finalize())
    }
}

impl SigHasher for Zip244 {
    fn add_input(&mut self, txi: &TxInput, script_pubkey: &[u8]) -> Result<(), Error> {
        self.inputs.add()?;

        write_outpoint(
            &mut self.acc.writer(Slot::Prevouts),
            &txi.prev_hash,
            txi.prev_index,
        )?;
        write_u64(&mut self.acc.writer(Slot::Amounts), txi.amount)?;
        write_prefixed(&mut self.acc.writer(Slot::ScriptPubkeys), script_pubkey)?;
        write_u32(&mut self.acc.writer(Slot::Sequences), txi.sequence)
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

        self.mid = Some(Zip244MidState {
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

        // Signed input
        let mut txin = Context::blake2b(b"Zcash___TxInHash");
        write_outpoint(&mut txin, i.prev_hash, i.prev_index)?;
        write_u64(&mut txin, i.amount)?;
        write_prefixed(&mut txin, i.script_pubkey)?;
        write_u32(&mut txin, i.sequence)?;

        let mut c = Context::blake2b(b"ZTxIdTranspaHash");
        write_u8(&mut c, i.sighash_type as u8)?;
        c.write(&m.prevouts)?;
        c.write(&m.amounts)?;
        c.write(&m.script_pubkeys)?;
        c.write(&m.sequences)?;
        c.write(&m.outputs)?;
        c.write(&txin.finalize())?;

        self.tx_digest(&c.finalize())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::apdu::input::InputScriptType;

    fn h32(s: &str) -> [u8; 32] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    #[test]
    fn zip243_digest() {
        let h = TxHeader {
            version: 4,
            inputs_count: 1,
            outputs_count: 2,
            version_group_id: Some(0x892f2085),
            branch_id: 0x76b809bb,
            ..Default::default()
        };
        let script = hex::decode("76a91405aab5342166f8594baf17a7d9bef5d56744332788ac").unwrap();

        let txi = TxInput::new(
            &[],
            h32("f2c0f4081171bf73d3b07c9f818b5c9aaa063b4b7837c82c4dcfd93836a0072c"),
            1,
            9_924_260,
            InputScriptType::SpendAddress,
        );

        let mut z = Zip243::new(&h);
        z.add_input(&txi, &script).unwrap();
        z.add_output(1_000_000, &script).unwrap();
        z.add_output(8_923_260, &script).unwrap();
        z.seal().unwrap();

        let digest = z
            .signature_digest(&SigInput {
                index: 0,
                prev_hash: &txi.prev_hash,
                prev_index: 1,
                amount: txi.amount,
                sequence: txi.sequence,
                script_code: &script,
                script_pubkey: &script,
                sighash_type: 1,
                taproot: false,
            })
            .unwrap();

        assert_eq!(
            hex::encode(digest),
            "047da0d9932545770fc570122c4451b53fadad219650008e5026162e957a46f9"
        );
    }

    fn zip244_v5() -> (Zip244, TxInput<'static>) {
        let h = TxHeader {
            version: 5,
            inputs_count: 1,
            outputs_count: 1,
            version_group_id: Some(0x26a7270a),
            branch_id: 0xc2d6d0b4,
            ..Default::default()
        };

        let txi = TxInput::new(
            &[],
            h32("f9231f2d6cdcd86b4892c95a5d2045bacd81f4060e8127073456fbb7b7b51568"),
            0,
            4_154_120,
            InputScriptType::SpendAddress,
        );

        let mut z = Zip244::new(&h);
        z.add_input(
            &txi,
            &hex::decode("76a9141215d421cb8cec1dea62cbd9e4e07c01520d873f88ac").unwrap(),
        )
        .unwrap();
        z.add_output(
            4_134_720,
            &hex::decode("76a914a579388225827d9f2fe9014add644487808c695d88ac").unwrap(),
        )
        .unwrap();
        z.seal().unwrap();

        (z, txi)
    }

    #[test]
    fn zip244_txid() {
        let (z, _) = zip244_v5();

        let mut txid = z.txid().unwrap();
        txid.reverse();

        assert_eq!(
            hex::encode(txid),
            "c5309bd6a18f6bf374918b1c96e872af02e80d678c53d37547de03048ace79bf"
        );
    }

    #[test]
    fn zip244_signature_digest() {
        let (z, txi) = zip244_v5();
        let script = hex::decode("76a9141215d421cb8cec1dea62cbd9e4e07c01520d873f88ac").unwrap();

        let digest = z
            .signature_digest(&SigInput {
                index: 0,
                prev_hash: &txi.prev_hash,
                prev_index: 0,
                amount: txi.amount,
                sequence: txi.sequence,
                script_code: &script,
                script_pubkey: &script,
                sighash_type: 1,
                taproot: false,
            })
            .unwrap();

        assert_eq!(
            hex::encode(digest),
            "9ba8a0ec0ca247722339cd133c2c45fe0cf33ae8b233fd0a87f8f02207b6796d"
        );
    }

    #[test]
    fn empty_bundle_digests() {
        assert_eq!(
            hex::encode(blake2b(b"ZcashPrevoutHash", &[])),
            "d53a633bbecf82fe9e9484d8a0e727c73bb9e68c96e72dec30144f6a84afa136"
        );
        assert_eq!(
            hex::encode(blake2b(b"ZTxIdSaplingHash", &[])),
            "6f2fc8f98feafd94e74a0df4bed74391ee0b5a69945e4ced8ca8a095206f00ae"
        );
        assert_eq!(
            hex::encode(blake2b(b"ZTxIdOrchardHash", &[])),
            "9fbe4ed13b0c08e671c11a3407d84e1117cd45028a2eee1b9feae78b48a6e2c1"
        );
    }
}
