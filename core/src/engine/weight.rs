// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction weight estimation, used to bound the fee rate prior to signing.
//!
//! Signature sizes are not known until pass 3 so inputs are estimated using
//! worst case DER signatures (72 bytes) and compressed public keys.

use crate::{
    apdu::input::{InputScriptType, TxInput},
    writer::{op_push_len, varint_len},
};

const TXSIZE_HEADER: u64 = 4;
const TXSIZE_FOOTER: u64 = 4;
/// Outpoint (36) and sequence (4)
const TXSIZE_INPUT: u64 = 40;
/// Amount
const TXSIZE_OUTPUT: u64 = 8;
const TXSIZE_PUBKEY: u64 = 33;
const TXSIZE_DER_SIGNATURE: u64 = 72;
const TXSIZE_SCHNORR_SIGNATURE: u64 = 64;
/// `OP_m`, `OP_n` and `OP_CHECKMULTISIG`
const TXSIZE_MULTISIGSCRIPT: u64 = 3;
/// `0x16 0x00 0x14 <h160>` nested script signature
const TXSIZE_WITNESSPKHASH: u64 = 22;
/// `0x22 0x00 0x20 <sha256>` nested script signature
const TXSIZE_WITNESSSCRIPT: u64 = 34;
/// Segwit marker and flag
const TXSIZE_SEGWIT_OVERHEAD: u64 = 2;

/// Non-witness bytes count four weight units
const WITNESS_SCALE_FACTOR: u64 = 4;

#[inline]
fn varint(n: u64) -> u64 {
    varint_len(n) as u64
}

/// Streaming transaction weight calculator
#[derive(Clone, PartialEq, Debug)]
pub struct WeightCalculator {
    inputs: u32,
    outputs: u32,
    segwit_inputs: u32,
    counter: u64,
}

impl Default for WeightCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightCalculator {
    pub const fn new() -> Self {
        Self {
            inputs: 0,
            outputs: 0,
            segwit_inputs: 0,
            counter: WITNESS_SCALE_FACTOR * (TXSIZE_HEADER + TXSIZE_FOOTER),
        }
    }

    /// Account for a transaction input
    pub fn add_input(&mut self, txi: &TxInput) {
        self.inputs += 1;
        self.counter += WITNESS_SCALE_FACTOR * TXSIZE_INPUT;

        let segwit = txi.script_type.is_segwit();

        let script_size = match (&txi.multisig, txi.script_type) {
            (Some(m), _) => {
                let mut n = TXSIZE_MULTISIGSCRIPT + m.n() as u64 * (1 + TXSIZE_PUBKEY);
                n += match segwit {
                    true => varint(n),
                    false => op_push_len(n as usize) as u64,
                };
                1 + m.m as u64 * (1 + TXSIZE_DER_SIGNATURE) + n
            }
            (None, InputScriptType::SpendTaproot) => 1 + TXSIZE_SCHNORR_SIGNATURE,
            _ => 1 + TXSIZE_DER_SIGNATURE + 1 + TXSIZE_PUBKEY,
        };

        match txi.script_type {
            InputScriptType::External => {
                let script_sig = txi.script_sig.map(|s| s.len()).unwrap_or(0) as u64;
                let witness = txi.witness.map(|w| w.len()).unwrap_or(0) as u64;

                self.counter += WITNESS_SCALE_FACTOR * (varint(script_sig) + script_sig);

                match witness {
                    0 => self.counter += 1,
                    n => {
                        self.segwit_inputs += 1;
                        self.counter += n;
                    }
                }
            }
            InputScriptType::SpendP2shWitness
            | InputScriptType::SpendWitness
            | InputScriptType::SpendTaproot => {
                self.segwit_inputs += 1;

                self.counter += match (txi.script_type, &txi.multisig) {
                    (InputScriptType::SpendP2shWitness, Some(_)) => {
                        WITNESS_SCALE_FACTOR * (2 + TXSIZE_WITNESSSCRIPT)
                    }
                    (InputScriptType::SpendP2shWitness, None) => {
                        WITNESS_SCALE_FACTOR * (2 + TXSIZE_WITNESSPKHASH)
                    }
                    // Empty script signature
                    _ => WITNESS_SCALE_FACTOR,
                };

                // Witness stack item count and items, discounted
                self.counter += 1 + script_size;
            }
            InputScriptType::SpendAddress | InputScriptType::SpendMultisig => {
                self.counter += WITNESS_SCALE_FACTOR * (varint(script_size) + script_size);
            }
        }
    }

    /// Account for a transaction output
    pub fn add_output(&mut self, script_pubkey: &[u8]) {
        let n = script_pubkey.len() as u64;

        self.outputs += 1;
        self.counter += WITNESS_SCALE_FACTOR * (TXSIZE_OUTPUT + varint(n) + n);
    }

    /// Estimated transaction weight
    pub fn weight(&self) -> u64 {
        let mut total = self.counter;

        total += WITNESS_SCALE_FACTOR * varint(self.inputs as u64);
        total += WITNESS_SCALE_FACTOR * varint(self.outputs as u64);

        if self.segwit_inputs > 0 {
            total += TXSIZE_SEGWIT_OVERHEAD;
            // Empty witness stacks for non-segwit inputs
            total += (self.inputs - self.segwit_inputs) as u64;
        }

        total
    }

    /// Estimated virtual size (weight / 4, rounded up)
    pub fn vsize(&self) -> u64 {
        (self.weight() + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
    }
}
