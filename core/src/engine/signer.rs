// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Streaming transaction signer
//!
//! The [Signer] holds the per-session state for a transaction, consuming
//! host-streamed inputs, outputs and previous transaction elements and
//! producing the next [TxRequest] for each.
//!
//! Passes are:
//! 1. [State::ComputeFee]: inputs and outputs are sanitised, fingerprinted and
//!    fed to the signature hasher while totals and prompts are accumulated.
//!    Elements replacing those of an earlier transaction are each followed by
//!    the matching elements of the original (see [OrigTxVerifier]).
//! 2. [State::ComputeDigests]: each input is re-requested and the transaction
//!    it spends streamed and hashed to bind the claimed amount.
//! 3. [State::SignAndSerialize]: the transaction is streamed once more (with an
//!    additional stream per legacy input), signed and serialized.
//!
//! Serialized bytes produced while handling one element are attached to the
//! following request, as are signatures.

use core::{cmp::Ordering, mem};

use heapless::Vec;
use rand_core::CryptoRngCore;

use crate::{
    address::{address_to_script, script_to_address},
    apdu::{
        input::{InputScriptType, Multisig, TxInput, PUBKEY_LEN},
        output::{OutputScriptType, TxOutput},
        prev::PrevTx,
        request::{TxRequest, MAX_SERIALIZED_LEN, MAX_SIGNATURE_LEN},
        sign_tx::SignTx,
        Path,
    },
    coins::{CoinInfo, SIGHASH_ALL_TAPROOT},
    hash::{self, Context},
    keychain::{verify_ecdsa, verify_schnorr, Node},
    paths::{change_input_type, input_path_matches, MatchChecker, MAX_ADDRESS_INDEX, MAX_CHAIN},
    scripts::{
        input_script_multisig, input_script_p2pkh, input_script_p2wpkh_in_p2sh,
        input_script_p2wsh_in_p2sh, is_p2pkh, output_script_multisig,
        output_script_native_segwit, output_script_op_return, output_script_p2pkh,
        output_script_p2sh, output_script_p2tr, parse_pushes, parse_witness,
        parse_witness_program, write_witness_multisig, write_witness_p2tr, write_witness_p2wpkh,
        Script, ScriptSig,
    },
    serializer::{
        write_decred_witness, write_outpoint, write_tx_footer, write_tx_header, write_tx_input,
        write_tx_output, TxHeader,
    },
    sighash::{Hasher, LegacyHasher, SigHasher, SigInput},
    writer::{write_prefixed, write_u32, write_u64, write_u8, write_varint, Writer},
};

use super::{
    approver::{Approver, Prompt},
    prevtx::PrevTxVerifier,
    replacement::{OrigTxVerifier, MAX_RBF_SEQUENCE},
    sanitize::{check_header, check_input, check_orig_input, check_output, MAX_INPUTS},
    weight::WeightCalculator,
    Driver, Error, Event, PrevTxState, Stage, State,
};

/// Truncated input fingerprint length
pub const FINGERPRINT_LEN: usize = 16;

/// Sequence number disabling lock time
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Input fingerprint, binding re-streamed inputs to those seen in pass 1
pub type Fingerprint = [u8; FINGERPRINT_LEN];

/// Per-input data retained from pass 1
#[derive(Copy, Clone, PartialEq, Debug)]
struct InputRecord {
    fingerprint: Fingerprint,
    script_type: InputScriptType,
    amount: u64,
    /// Truncated SHA-256 of the spent script pubkey
    script_hash: Fingerprint,
}

/// Signature supplied with an external input, checked once the spent script is verified
#[derive(Clone, PartialEq, Debug)]
enum ExternalSig {
    Ecdsa {
        digest: [u8; 32],
        pubkey: [u8; PUBKEY_LEN],
        sig: Vec<u8, MAX_SIGNATURE_LEN>,
    },
    Schnorr {
        digest: [u8; 32],
        output_key: [u8; 32],
        sig: [u8; 64],
    },
}

impl ExternalSig {
    fn verify(&self) -> Result<(), Error> {
        match self {
            ExternalSig::Ecdsa {
                digest,
                pubkey,
                sig,
            } => verify_ecdsa(pubkey, digest, sig),
            ExternalSig::Schnorr {
                digest,
                output_key,
                sig,
            } => verify_schnorr(output_key, digest, sig),
        }
    }
}

/// Current element awaiting its counterpart in the replaced transaction
#[derive(Clone, PartialEq, Debug)]
enum OrigMatch {
    Input {
        orig_index: u32,
        prev_hash: [u8; 32],
        prev_index: u32,
        amount: u64,
        script_type: InputScriptType,
    },
    Output {
        index: u32,
        orig_index: u32,
        amount: u64,
        script_pubkey: Script,
        change: bool,
    },
}

/// Transaction signer state
#[derive(Clone, Debug)]
pub struct Signer {
    coin: &'static CoinInfo,
    header: TxHeader,

    hasher: Hasher,
    approver: Approver,
    weight: WeightCalculator,

    inputs: Vec<InputRecord, MAX_INPUTS>,
    wallet_path: MatchChecker<Path>,
    script_type: MatchChecker<InputScriptType>,

    segwit: bool,
    sequences_final: bool,
    rbf: bool,
    legacy_count: u32,

    /// Output digest accumulated in pass 1
    h_outputs: Context,
    outputs_digest: [u8; 32],
    /// Output digest for the current re-stream
    h_check: Context,

    prev: Option<PrevTxVerifier>,
    prev_hash: [u8; 32],
    prev_index: u32,
    external: Option<ExternalSig>,

    /// Transaction being replaced
    orig_hash: Option<[u8; 32]>,
    orig: Option<OrigTxVerifier>,
    orig_match: Option<OrigMatch>,

    legacy: Option<LegacyHasher>,
    legacy_digest: Option<[u8; 32]>,

    request: TxRequest,
    serialized: Vec<u8, MAX_SERIALIZED_LEN>,
    signature: Option<(u32, Vec<u8, MAX_SIGNATURE_LEN>)>,

    done: u32,
}

impl Signer {
    /// Start a signing session for the provided coin and transaction header
    pub fn new(coin: &'static CoinInfo, tx: &SignTx) -> Result<Self, Error> {
        let header = check_header(coin, tx)?;
        let hasher = Hasher::new(coin, &header)?;

        let mut s = Self {
            coin,
            header,
            hasher,
            approver: Approver::new(),
            weight: WeightCalculator::new(),
            inputs: Vec::new(),
            wallet_path: MatchChecker::default(),
            script_type: MatchChecker::default(),
            segwit: false,
            sequences_final: true,
            rbf: false,
            legacy_count: 0,
            h_outputs: Context::sha256(),
            outputs_digest: [0u8; 32],
            h_check: Context::sha256(),
            prev: None,
            prev_hash: [0u8; 32],
            prev_index: 0,
            external: None,
            orig_hash: None,
            orig: None,
            orig_match: None,
            legacy: None,
            legacy_digest: None,
            request: TxRequest::finished(),
            serialized: Vec::new(),
            signature: None,
            done: 0,
        };

        // Decred prefix is serialized while streaming pass 1
        if coin.decred {
            write_tx_header(&mut s.serialized, coin, &s.header, true)?;
            write_varint(&mut s.serialized, s.header.inputs_count as u64)?;
        }

        s.set_request(State::ComputeFee(Stage::Input(0)));

        Ok(s)
    }

    /// Coin for this session
    pub fn coin(&self) -> &'static CoinInfo {
        self.coin
    }

    /// Outstanding request
    pub fn request(&self) -> &TxRequest {
        &self.request
    }

    /// Prompt awaiting user confirmation
    pub fn prompt(&self) -> Option<&Prompt> {
        self.approver.current()
    }

    /// Number of prompts awaiting confirmation
    pub fn pending(&self) -> usize {
        self.approver.pending()
    }

    /// Resolve the current prompt
    pub fn confirm(&mut self) -> Option<Prompt> {
        self.approver.pop()
    }

    /// Completed and total element counts across all passes
    pub fn progress(&self) -> (u32, u32) {
        let (n_in, n_out) = (self.header.inputs_count, self.header.outputs_count);

        let mut total = 3 * n_in + 2 * n_out;
        total += self.legacy_count * (n_in + n_out);
        if self.segwit {
            total += n_in;
        }

        (self.done, total)
    }

    /// Apply an event in the provided state, returning the next state
    #[cfg_attr(feature = "noinline", inline(never))]
    pub fn update<DRV: Driver, RNG: CryptoRngCore>(
        &mut self,
        state: State,
        evt: &Event,
        drv: &DRV,
        rng: &mut RNG,
    ) -> Result<State, Error> {
        let coin = self.coin;

        let next = match (state, evt) {
            // Pass 1
            (State::ComputeFee(Stage::Input(i)), Event::TxInput(txi)) => {
                self.fee_input(i, txi, drv)?
            }
            (State::ComputeFee(Stage::Output(i)), Event::TxOutput(txo)) => {
                self.fee_output(i, txo, drv)?
            }
            (State::ComputeFee(Stage::OrigMeta(i)), Event::PrevMeta(meta)) => {
                self.orig_meta(i, meta)?
            }
            (State::ComputeFee(Stage::OrigInput(i, _)), Event::TxInput(txi)) => {
                self.orig_input(i, txi, drv)?
            }
            (State::ComputeFee(Stage::OrigOutput(i, _)), Event::TxOutput(txo)) => {
                self.orig_output(i, txo, drv)?
            }

            // Pass 2
            (State::ComputeDigests(Stage::Input(i)), Event::TxInput(txi)) => {
                self.check_fingerprint(i, txi)?;
                self.prev_hash = txi.prev_hash;
                self.prev_index = txi.prev_index;

                self.external = match txi.script_type {
                    InputScriptType::External => Some(self.external_sig(i, txi)?),
                    _ => None,
                };

                State::ComputeDigests(Stage::PrevTx(i, PrevTxState::Meta))
            }
            (State::ComputeDigests(Stage::PrevTx(i, PrevTxState::Meta)), Event::PrevMeta(meta)) => {
                self.prev_meta(meta)?;
                self.prev_next(i)?
            }
            (
                State::ComputeDigests(Stage::PrevTx(i, PrevTxState::Input(_))),
                Event::PrevInput(txi),
            ) => {
                self.prev_mut()?.add_input(coin, txi)?;
                self.prev_next(i)?
            }
            (
                State::ComputeDigests(Stage::PrevTx(i, PrevTxState::Output(_))),
                Event::PrevOutput(txo),
            ) => {
                self.prev_mut()?.add_output(coin, txo)?;
                self.prev_next(i)?
            }
            (
                State::ComputeDigests(Stage::PrevTx(i, PrevTxState::ExtraData(_))),
                Event::PrevExtraData(chunk),
            ) => {
                self.prev_mut()?.add_extra_data(chunk)?;
                self.prev_next(i)?
            }

            // Pass 3
            (State::SignAndSerialize(Stage::LegacyInput(i, j)), Event::TxInput(txi)) => {
                self.legacy_input(i, j, txi, drv)?
            }
            (State::SignAndSerialize(Stage::LegacyOutput(i, j)), Event::TxOutput(txo)) => {
                self.legacy_output(i, j, txo, drv)?
            }
            (State::SignAndSerialize(Stage::Input(i)), Event::TxInput(txi)) => {
                self.sign_input(i, txi, drv)?
            }
            (State::SignAndSerialize(Stage::Output(i)), Event::TxOutput(txo)) => {
                self.serialize_output(i, txo, drv)?
            }
            (State::SignAndSerialize(Stage::Witness(i)), Event::TxInput(txi)) => {
                self.sign_witness(i, txi, drv, rng)?
            }

            _ => return Err(Error::UnexpectedEvent),
        };

        self.set_request(next);

        Ok(next)
    }

    /// Build the request for `state`, attaching pending serialized data and signature
    fn set_request(&mut self, state: State) {
        let mut r = match state {
            State::ComputeFee(s) | State::ComputeDigests(s) | State::SignAndSerialize(s) => {
                self.stage_request(s)
            }
            _ => TxRequest::finished(),
        };

        r.serialized.serialized_tx = mem::take(&mut self.serialized);

        if let Some((index, sig)) = self.signature.take() {
            r.serialized.signature_index = index;
            r.serialized.signature = sig;
        }

        self.request = r;
    }

    fn stage_request(&self, stage: Stage) -> TxRequest {
        let h = self.prev_hash;
        let o = self.orig_hash.unwrap_or_default();

        match stage {
            Stage::Input(i) | Stage::LegacyInput(_, i) | Stage::Witness(i) => TxRequest::input(i),
            Stage::Output(i) | Stage::LegacyOutput(_, i) => TxRequest::output(i),
            Stage::PrevTx(_, PrevTxState::Meta) => TxRequest::prev_meta(h),
            Stage::PrevTx(_, PrevTxState::Input(i)) => TxRequest::prev_input(i, h),
            Stage::PrevTx(_, PrevTxState::Output(i)) => TxRequest::prev_output(i, h),
            Stage::PrevTx(_, PrevTxState::ExtraData(offset)) => {
                let len = self
                    .prev
                    .as_ref()
                    .map(|p| p.extra_data_chunk_len())
                    .unwrap_or(0);
                TxRequest::prev_extra_data(h, offset, len)
            }
            Stage::OrigMeta(_) => TxRequest::prev_meta(o),
            Stage::OrigInput(_, j) => TxRequest::orig_input(j, o),
            Stage::OrigOutput(_, j) => TxRequest::orig_output(j, o),
        }
    }

    fn fee_input<DRV: Driver>(
        &mut self,
        index: u32,
        txi: &TxInput,
        drv: &DRV,
    ) -> Result<State, Error> {
        let coin = self.coin;

        check_input(coin, txi)?;

        let external = txi.script_type == InputScriptType::External;

        let script_pubkey = match external {
            true => {
                let s = txi.script_pubkey.ok_or(Error::MissingField)?;
                Script::from_slice(s).map_err(|_| Error::BufferOverflow)?
            }
            false => {
                let node = derive(drv, &txi.address_n)?;
                self.input_script_pubkey(txi, &node)?
            }
        };

        if external {
            self.approver.push(Prompt::ExternalInput {
                index,
                amount: txi.amount,
            })?;
        } else {
            if !input_path_matches(coin, &txi.address_n, txi.script_type) {
                self.approver.push(Prompt::ForeignPath {
                    index,
                    path: txi.address_n.clone(),
                })?;
            }

            match wallet_path(&txi.address_n) {
                Some(p) => self.wallet_path.add(p),
                None => self.wallet_path.mismatch(),
            }
            self.script_type.add(txi.script_type);
        }

        self.approver.add_input(txi.amount, external)?;
        self.weight.add_input(txi);
        self.hasher.add_input(txi, &script_pubkey)?;

        let record = InputRecord {
            fingerprint: fingerprint(txi)?,
            script_type: txi.script_type,
            amount: txi.amount,
            script_hash: truncate(&hash::sha256(&script_pubkey)),
        };
        self.inputs.push(record).map_err(|_| Error::InvalidCount)?;

        if txi.sequence != SEQUENCE_FINAL {
            self.sequences_final = false;
        }
        if txi.sequence <= MAX_RBF_SEQUENCE {
            self.rbf = true;
        }

        if !coin.decred
            && (txi.script_type.is_segwit() || txi.witness.map_or(false, |w| !w.is_empty()))
        {
            self.segwit = true;
        }

        if self.is_legacy(txi.script_type) {
            self.legacy_count += 1;
        }

        if coin.decred {
            write_tx_input(
                &mut self.serialized,
                coin,
                &txi.prev_hash,
                txi.prev_index,
                &[],
                txi.sequence,
                txi.decred_tree,
            )?;
        }

        self.done += 1;

        if let Some(h) = txi.orig_hash {
            return self.orig_begin_input(index, h, txi);
        }

        self.fee_next_input(index)
    }

    fn fee_next_input(&mut self, index: u32) -> Result<State, Error> {
        let next = index + 1;
        if next < self.header.inputs_count {
            return Ok(State::ComputeFee(Stage::Input(next)));
        }

        if let Some(o) = &self.orig {
            if !o.inputs_complete() {
                #[cfg(feature = "log")]
                log::warn!("original inputs removed");

                return Err(Error::CountMismatch);
            }

            self.approver.push(Prompt::ConfirmReplacement {
                txid: o.hash(),
                finalize: !self.rbf && o.is_rbf(),
            })?;
        }

        if self.coin.decred {
            write_varint(&mut self.serialized, self.header.outputs_count as u64)?;
        }

        Ok(State::ComputeFee(Stage::Output(0)))
    }

    /// Request the original input matching `txi`, fetching the original
    /// metadata on first use
    fn orig_begin_input(
        &mut self,
        index: u32,
        hash: [u8; 32],
        txi: &TxInput,
    ) -> Result<State, Error> {
        // Only a single transaction may be replaced
        match self.orig_hash {
            Some(h) if h != hash => return Err(Error::InvalidReplacement),
            _ => self.orig_hash = Some(hash),
        }

        self.orig_match = Some(OrigMatch::Input {
            orig_index: txi.orig_index,
            prev_hash: txi.prev_hash,
            prev_index: txi.prev_index,
            amount: txi.amount,
            script_type: txi.script_type,
        });

        match &self.orig {
            Some(o) => {
                o.check_input_index(txi.orig_index)?;
                Ok(State::ComputeFee(Stage::OrigInput(index, txi.orig_index)))
            }
            None => Ok(State::ComputeFee(Stage::OrigMeta(index))),
        }
    }

    fn orig_meta(&mut self, index: u32, meta: &PrevTx) -> Result<State, Error> {
        let hash = self.orig_hash.ok_or(Error::InvalidState)?;
        let legacy = self.is_legacy(InputScriptType::SpendAddress);

        let o = OrigTxVerifier::new(self.coin, hash, meta, legacy)?;

        let orig_index = match &self.orig_match {
            Some(OrigMatch::Input { orig_index, .. }) => *orig_index,
            _ => return Err(Error::InvalidState),
        };
        o.check_input_index(orig_index)?;

        self.orig = Some(o);

        Ok(State::ComputeFee(Stage::OrigInput(index, orig_index)))
    }

    fn orig_input<DRV: Driver>(
        &mut self,
        index: u32,
        txi: &TxInput,
        drv: &DRV,
    ) -> Result<State, Error> {
        let coin = self.coin;

        check_orig_input(coin, txi)?;

        match self.orig_match.take() {
            Some(OrigMatch::Input {
                prev_hash,
                prev_index,
                amount,
                script_type,
                ..
            }) if prev_hash == txi.prev_hash
                && prev_index == txi.prev_index
                && amount == txi.amount
                && script_type == txi.script_type => {}
            Some(OrigMatch::Input { .. }) => {
                #[cfg(feature = "log")]
                log::warn!("input {} does not match the original", index);

                return Err(Error::InvalidReplacement);
            }
            _ => return Err(Error::InvalidState),
        }

        let (script_pubkey, node) = match txi.script_type {
            InputScriptType::External => {
                let s = txi.script_pubkey.ok_or(Error::MissingField)?;
                let s = Script::from_slice(s).map_err(|_| Error::BufferOverflow)?;
                (s, None)
            }
            _ => {
                let node = derive(drv, &txi.address_n)?;
                (self.input_script_pubkey(txi, &node)?, Some(node))
            }
        };

        self.orig
            .as_mut()
            .ok_or(Error::InvalidState)?
            .add_input(coin, txi, &script_pubkey, node.as_ref())?;

        self.fee_next_input(index)
    }

    fn fee_output<DRV: Driver>(
        &mut self,
        index: u32,
        txo: &TxOutput,
        drv: &DRV,
    ) -> Result<State, Error> {
        let coin = self.coin;

        check_output(coin, txo)?;

        let script_pubkey = self.output_script_pubkey(txo, drv)?;
        let change = self.is_change(txo);

        // Outputs added by a replacement may only return change
        if self.orig.is_some() && txo.orig_hash.is_none() && !change {
            return Err(Error::InvalidReplacement);
        }

        match (txo.script_type, txo.address) {
            // Checked against the original instead
            _ if txo.orig_hash.is_some() => (),
            (OutputScriptType::PayToOpReturn, _) => {
                let data = txo.op_return_data.unwrap_or(&[]);
                self.approver.push(Prompt::op_return(index, data))?;
            }
            _ if change => (),
            (_, Some(a)) => self.approver.push(Prompt::output(index, txo.amount, a)?)?,
            (_, None) => {
                let a = script_to_address(coin, &script_pubkey)?;
                self.approver.push(Prompt::output(index, txo.amount, &a)?)?;
            }
        }

        self.approver.add_output(txo.amount, change)?;
        self.weight.add_output(&script_pubkey);
        self.hasher.add_output(txo.amount, &script_pubkey)?;
        digest_output(&mut self.h_outputs, txo.amount, &script_pubkey)?;

        if coin.decred {
            write_tx_output(&mut self.serialized, coin, txo.amount, &script_pubkey, 0)?;
        }

        self.done += 1;

        if let Some(h) = txo.orig_hash {
            let o = match &self.orig {
                Some(o) if o.hash() == h => o,
                _ => return Err(Error::InvalidReplacement),
            };
            o.check_output_index(txo.orig_index)?;
            let next = o.next_output();

            self.orig_match = Some(OrigMatch::Output {
                index,
                orig_index: txo.orig_index,
                amount: txo.amount,
                script_pubkey,
                change,
            });

            return Ok(State::ComputeFee(Stage::OrigOutput(index, next)));
        }

        self.fee_next_output(index)
    }

    fn fee_next_output(&mut self, index: u32) -> Result<State, Error> {
        let next = index + 1;
        if next < self.header.outputs_count {
            return Ok(State::ComputeFee(Stage::Output(next)));
        }

        // Trailing original outputs, which may only be removed change
        if let Some(o) = &self.orig {
            if !o.outputs_complete() {
                return Ok(State::ComputeFee(Stage::OrigOutput(index, o.next_output())));
            }
        }

        self.fee_finish()
    }

    fn orig_output<DRV: Driver>(
        &mut self,
        index: u32,
        txo: &TxOutput,
        drv: &DRV,
    ) -> Result<State, Error> {
        let coin = self.coin;

        check_output(coin, txo)?;
        if txo.orig_hash.is_some() {
            return Err(Error::UnexpectedField);
        }

        let script_pubkey = self.output_script_pubkey(txo, drv)?;
        let orig_change = self.is_change(txo);

        let j = self
            .orig
            .as_mut()
            .ok_or(Error::InvalidState)?
            .add_output(coin, txo.amount, &script_pubkey, orig_change)?;

        match self.orig_match.take() {
            Some(OrigMatch::Output {
                index: i,
                orig_index,
                amount,
                script_pubkey: s,
                change,
            }) if orig_index == j => {
                if s != script_pubkey {
                    #[cfg(feature = "log")]
                    log::warn!("output {} does not match original output {}", i, j);

                    return Err(Error::InvalidReplacement);
                }
                if change && !orig_change {
                    return Err(Error::ChangeMismatch);
                }

                if !change {
                    match amount.cmp(&txo.amount) {
                        Ordering::Less => self.approver.push(Prompt::ModifyOutput {
                            index: i,
                            orig_amount: txo.amount,
                            amount,
                        })?,
                        Ordering::Greater => return Err(Error::InvalidReplacement),
                        Ordering::Equal => (),
                    }
                }

                self.fee_next_output(index)
            }
            Some(OrigMatch::Input { .. }) => Err(Error::InvalidState),
            m => {
                // Original outputs without a counterpart were change
                if !orig_change {
                    #[cfg(feature = "log")]
                    log::warn!("original output {} removed", j);

                    return Err(Error::InvalidReplacement);
                }

                let pending = m.is_some();
                self.orig_match = m;

                let o = self.orig.as_ref().ok_or(Error::InvalidState)?;
                match pending || !o.outputs_complete() {
                    true => Ok(State::ComputeFee(Stage::OrigOutput(index, o.next_output()))),
                    false => self.fee_finish(),
                }
            }
        }
    }

    /// Apply transaction policy once every output is known, sealing pass 1
    fn fee_finish(&mut self) -> Result<State, Error> {
        let coin = self.coin;
        let vsize = self.weight.vsize();

        match self.orig.take() {
            Some(o) => {
                let orig = o.finish(coin)?;
                let lock_time = match self.sequences_final {
                    true => 0,
                    false => self.header.lock_time,
                };
                self.approver.finish_replacement(coin, vsize, lock_time, &orig)?;
            }
            None => self.approver.finish(
                coin,
                vsize,
                self.header.lock_time,
                self.sequences_final,
            )?,
        }

        self.hasher.seal()?;
        self.outputs_digest = mem::replace(&mut self.h_outputs, Context::sha256()).finalize();

        if coin.decred {
            write_tx_footer(&mut self.serialized, coin, &self.header)?;
        }

        Ok(State::ComputeDigests(Stage::Input(0)))
    }

    fn prev_mut(&mut self) -> Result<&mut PrevTxVerifier, Error> {
        self.prev.as_mut().ok_or(Error::InvalidState)
    }

    fn prev_meta(&mut self, meta: &PrevTx) -> Result<(), Error> {
        self.prev = Some(PrevTxVerifier::new(self.coin, meta, self.prev_index)?);
        Ok(())
    }

    fn prev_next(&mut self, index: u32) -> Result<State, Error> {
        if let Some(s) = self.prev_mut()?.next_state() {
            return Ok(State::ComputeDigests(Stage::PrevTx(index, s)));
        }

        let prev = self.prev.take().ok_or(Error::InvalidState)?;
        let (amount, script_hash) = prev.finish(&self.prev_hash)?;

        let r = self
            .inputs
            .get(index as usize)
            .ok_or(Error::InvalidCount)?;

        if amount != r.amount {
            #[cfg(feature = "log")]
            log::warn!("input {} amount mismatch ({} != {})", index, r.amount, amount);

            return Err(Error::InvalidAmount);
        }

        if r.script_type == InputScriptType::External {
            if truncate(&script_hash) != r.script_hash {
                return Err(Error::InvalidScriptType);
            }

            let sig = self.external.take().ok_or(Error::InvalidState)?;
            if let Err(e) = sig.verify() {
                #[cfg(feature = "log")]
                log::warn!("input {} signature invalid", index);

                return Err(e);
            }
        }

        self.done += 1;

        let next = index + 1;
        match next < self.header.inputs_count {
            true => Ok(State::ComputeDigests(Stage::Input(next))),
            false => self.begin_sign(),
        }
    }

    /// Write the transaction header, starting pass 3
    fn begin_sign(&mut self) -> Result<State, Error> {
        if !self.coin.decred {
            write_tx_header(&mut self.serialized, self.coin, &self.header, self.segwit)?;
        }

        // Decred witness count follows the prefix
        write_varint(&mut self.serialized, self.header.inputs_count as u64)?;

        Ok(State::SignAndSerialize(self.sign_stage(0)))
    }

    /// Pass 3 stage for input `index`, legacy inputs first re-stream the transaction
    fn sign_stage(&self, index: u32) -> Stage {
        match self.inputs.get(index as usize) {
            Some(r) if self.is_legacy(r.script_type) => Stage::LegacyInput(index, 0),
            _ => Stage::Input(index),
        }
    }

    fn legacy_input<DRV: Driver>(
        &mut self,
        index: u32,
        j: u32,
        txi: &TxInput,
        drv: &DRV,
    ) -> Result<State, Error> {
        let coin = self.coin;

        self.check_fingerprint(j, txi)?;

        if j == 0 {
            self.legacy = Some(LegacyHasher::new(coin, &self.header)?);
        }

        let script = match j == index {
            true => {
                let node = derive(drv, &txi.address_n)?;
                self.script_code(txi, &node)?
            }
            false => Script::new(),
        };

        self.legacy
            .as_mut()
            .ok_or(Error::InvalidState)?
            .add_input(coin, txi, &script)?;

        self.done += 1;

        let next = j + 1;
        match next < self.header.inputs_count {
            true => Ok(State::SignAndSerialize(Stage::LegacyInput(index, next))),
            false => Ok(State::SignAndSerialize(Stage::LegacyOutput(index, 0))),
        }
    }

    fn legacy_output<DRV: Driver>(
        &mut self,
        index: u32,
        j: u32,
        txo: &TxOutput,
        drv: &DRV,
    ) -> Result<State, Error> {
        let coin = self.coin;

        let script_pubkey = self.output_script_pubkey(txo, drv)?;
        self.verify_output(j, txo.amount, &script_pubkey)?;

        self.legacy
            .as_mut()
            .ok_or(Error::InvalidState)?
            .add_output(coin, txo.amount, &script_pubkey)?;

        self.done += 1;

        let next = j + 1;
        if next < self.header.outputs_count {
            return Ok(State::SignAndSerialize(Stage::LegacyOutput(index, next)));
        }

        let legacy = self.legacy.take().ok_or(Error::InvalidState)?;
        self.legacy_digest = Some(legacy.finish(self.header.lock_time, coin.sighash_type())?);

        Ok(State::SignAndSerialize(Stage::Input(index)))
    }

    fn sign_input<DRV: Driver>(
        &mut self,
        index: u32,
        txi: &TxInput,
        drv: &DRV,
    ) -> Result<State, Error> {
        use InputScriptType::*;

        let coin = self.coin;
        let sighash = coin.sighash_type();

        self.check_fingerprint(index, txi)?;

        if coin.decred {
            return self.sign_decred(index, txi, drv);
        }

        let script_sig = match txi.script_type {
            External => ScriptSig::from_slice(txi.script_sig.unwrap_or(&[]))
                .map_err(|_| Error::BufferOverflow)?,
            SpendWitness | SpendTaproot => ScriptSig::new(),
            SpendP2shWitness => {
                let node = derive(drv, &txi.address_n)?;
                match &txi.multisig {
                    Some(m) => {
                        let redeem = multisig_redeem_script(m, node.public_key())?;
                        input_script_p2wsh_in_p2sh(&hash::sha256(&redeem))
                    }
                    None => input_script_p2wpkh_in_p2sh(&node.pubkey_hash(false)),
                }
            }
            SpendAddress | SpendMultisig => {
                let node = derive(drv, &txi.address_n)?;
                let script_code = self.script_code(txi, &node)?;

                let digest = match self.is_legacy(txi.script_type) {
                    true => self.legacy_digest.take().ok_or(Error::DigestNotReady)?,
                    false => {
                        let script_pubkey = self.input_script_pubkey(txi, &node)?;
                        self.hasher.signature_digest(&sig_input(
                            index,
                            txi,
                            &script_code,
                            &script_pubkey,
                            sighash,
                        ))?
                    }
                };

                let sig = node.sign_ecdsa(&digest)?;

                let s = match &txi.multisig {
                    Some(m) => input_script_multisig(
                        multisig_signatures(m, node.public_key(), &sig),
                        sighash as u8,
                        &script_code,
                    )?,
                    None => input_script_p2pkh(&sig, sighash as u8, node.public_key())?,
                };

                self.signature = Some((index, sig));
                s
            }
        };

        write_tx_input(
            &mut self.serialized,
            coin,
            &txi.prev_hash,
            txi.prev_index,
            &script_sig,
            txi.sequence,
            None,
        )?;

        self.done += 1;

        let next = index + 1;
        if next < self.header.inputs_count {
            return Ok(State::SignAndSerialize(self.sign_stage(next)));
        }

        write_varint(&mut self.serialized, self.header.outputs_count as u64)?;

        Ok(State::SignAndSerialize(Stage::Output(0)))
    }

    fn sign_decred<DRV: Driver>(
        &mut self,
        index: u32,
        txi: &TxInput,
        drv: &DRV,
    ) -> Result<State, Error> {
        let sighash = self.coin.sighash_type();

        let node = derive(drv, &txi.address_n)?;
        let script_code = self.script_code(txi, &node)?;

        let digest = self.hasher.signature_digest(&sig_input(
            index,
            txi,
            &script_code,
            &script_code,
            sighash,
        ))?;

        let sig = node.sign_ecdsa(&digest)?;
        let script_sig = input_script_p2pkh(&sig, sighash as u8, node.public_key())?;

        write_decred_witness(&mut self.serialized, txi.amount, &script_sig)?;
        self.signature = Some((index, sig));

        self.done += 1;

        let next = index + 1;
        match next < self.header.inputs_count {
            true => Ok(State::SignAndSerialize(Stage::Input(next))),
            false => self.finish(),
        }
    }

    fn serialize_output<DRV: Driver>(
        &mut self,
        index: u32,
        txo: &TxOutput,
        drv: &DRV,
    ) -> Result<State, Error> {
        let script_pubkey = self.output_script_pubkey(txo, drv)?;
        self.verify_output(index, txo.amount, &script_pubkey)?;

        write_tx_output(&mut self.serialized, self.coin, txo.amount, &script_pubkey, 0)?;

        self.done += 1;

        let next = index + 1;
        if next < self.header.outputs_count {
            return Ok(State::SignAndSerialize(Stage::Output(next)));
        }

        match self.segwit {
            true => Ok(State::SignAndSerialize(Stage::Witness(0))),
            false => self.finish(),
        }
    }

    fn sign_witness<DRV: Driver, RNG: CryptoRngCore>(
        &mut self,
        index: u32,
        txi: &TxInput,
        drv: &DRV,
        rng: &mut RNG,
    ) -> Result<State, Error> {
        use InputScriptType::*;

        self.check_fingerprint(index, txi)?;

        match txi.script_type {
            External => match txi.witness {
                Some(w) if !w.is_empty() => self.serialized.write(w)?,
                _ => write_varint(&mut self.serialized, 0)?,
            },
            SpendTaproot => {
                let node = derive(drv, &txi.address_n)?;
                let script_pubkey = self.input_script_pubkey(txi, &node)?;

                let digest = self.hasher.signature_digest(&SigInput {
                    taproot: true,
                    ..sig_input(
                        index,
                        txi,
                        &[],
                        &script_pubkey,
                        SIGHASH_ALL_TAPROOT as u32,
                    )
                })?;

                let mut aux = [0u8; 32];
                rng.fill_bytes(&mut aux);

                let sig = node.sign_taproot(&digest, &aux)?;
                write_witness_p2tr(&mut self.serialized, &sig, SIGHASH_ALL_TAPROOT)?;

                let sig = Vec::from_slice(&sig).map_err(|_| Error::SignError)?;
                self.signature = Some((index, sig));
            }
            SpendWitness | SpendP2shWitness => {
                let sighash = self.coin.sighash_type();

                let node = derive(drv, &txi.address_n)?;
                let script_code = self.script_code(txi, &node)?;
                let script_pubkey = self.input_script_pubkey(txi, &node)?;

                let digest = self.hasher.signature_digest(&sig_input(
                    index,
                    txi,
                    &script_code,
                    &script_pubkey,
                    sighash,
                ))?;

                let sig = node.sign_ecdsa(&digest)?;

                match &txi.multisig {
                    Some(m) => write_witness_multisig(
                        &mut self.serialized,
                        multisig_signatures(m, node.public_key(), &sig),
                        sighash as u8,
                        &script_code,
                    )?,
                    None => write_witness_p2wpkh(
                        &mut self.serialized,
                        &sig,
                        sighash as u8,
                        node.public_key(),
                    )?,
                }

                self.signature = Some((index, sig));
            }
            // Empty witness for non-segwit inputs
            SpendAddress | SpendMultisig => write_varint(&mut self.serialized, 0)?,
        }

        self.done += 1;

        let next = index + 1;
        match next < self.header.inputs_count {
            true => Ok(State::SignAndSerialize(Stage::Witness(next))),
            false => self.finish(),
        }
    }

    fn finish(&mut self) -> Result<State, Error> {
        // Decred lock time and expiry close the prefix
        if !self.coin.decred {
            write_tx_footer(&mut self.serialized, self.coin, &self.header)?;
        }

        #[cfg(feature = "log")]
        log::debug!("transaction complete");

        Ok(State::Finished)
    }

    /// Parse the signature supplied with an external input and compute the digest it signs
    ///
    /// Native P2WPKH and P2TR key path spends are supported, as are P2PKH inputs
    /// for coins with BIP-0143 style digests.
    fn external_sig(&self, index: u32, txi: &TxInput) -> Result<ExternalSig, Error> {
        let coin = self.coin;
        let sighash = coin.sighash_type();
        let script_pubkey = txi.script_pubkey.ok_or(Error::MissingField)?;

        let witness = || {
            let w = txi.witness.ok_or(Error::MissingField)?;
            parse_witness(w).ok_or(Error::InvalidSignature)
        };

        let (pubkey, sig, script_code) = match parse_witness_program(script_pubkey) {
            // P2WPKH, `<sig||hash_type> <pubkey>`
            Some((0, program)) if coin.segwit && program.len() == 20 => {
                let (sig, pubkey) = match witness()?[..] {
                    [sig, pubkey] => (sig, pubkey),
                    _ => return Err(Error::InvalidSignature),
                };

                let h160 = hash::hash160(pubkey, false);
                if h160[..] != program[..] {
                    return Err(Error::InvalidSignature);
                }

                (pubkey, sig, output_script_p2pkh(&h160))
            }
            // P2TR key path, `<sig[||hash_type]>`
            Some((1, program)) if coin.taproot && program.len() == 32 => {
                let (sig, hash_type) = match witness()?[..] {
                    [sig] if sig.len() == 64 => (sig, SIGHASH_ALL_TAPROOT),
                    [sig] if sig.len() == 65 && sig[64] == 0x01 => (&sig[..64], 0x01),
                    _ => return Err(Error::InvalidSignature),
                };

                let digest = self.hasher.signature_digest(&SigInput {
                    taproot: true,
                    ..sig_input(index, txi, &[], script_pubkey, hash_type as u32)
                })?;

                let mut output_key = [0u8; 32];
                output_key.copy_from_slice(program);
                let mut s = [0u8; 64];
                s.copy_from_slice(sig);

                return Ok(ExternalSig::Schnorr {
                    digest,
                    output_key,
                    sig: s,
                });
            }
            // P2PKH, `<sig||hash_type> <pubkey>`, legacy digests need a dedicated re-stream
            None if is_p2pkh(script_pubkey) && !self.is_legacy(InputScriptType::SpendAddress) => {
                let script_sig = txi.script_sig.ok_or(Error::MissingField)?;
                let items = parse_pushes(script_sig).ok_or(Error::InvalidSignature)?;

                let (sig, pubkey) = match items[..] {
                    [sig, pubkey] => (sig, pubkey),
                    _ => return Err(Error::InvalidSignature),
                };

                if hash::hash160(pubkey, false)[..] != script_pubkey[3..23] {
                    return Err(Error::InvalidSignature);
                }

                let script_code =
                    Script::from_slice(script_pubkey).map_err(|_| Error::BufferOverflow)?;
                (pubkey, sig, script_code)
            }
            _ => return Err(Error::UnsupportedScriptType),
        };

        // Signatures must commit to the coin's hash type
        let (hash_type, der) = sig.split_last().ok_or(Error::InvalidSignature)?;
        if *hash_type as u32 != sighash & 0xff {
            return Err(Error::InvalidSignature);
        }

        let digest = self.hasher.signature_digest(&sig_input(
            index,
            txi,
            &script_code,
            script_pubkey,
            sighash,
        ))?;

        Ok(ExternalSig::Ecdsa {
            digest,
            pubkey: pubkey.try_into().map_err(|_| Error::InvalidSignature)?,
            sig: Vec::from_slice(der).map_err(|_| Error::InvalidSignature)?,
        })
    }

    /// Check a re-streamed input against its pass 1 fingerprint
    fn check_fingerprint(&self, index: u32, txi: &TxInput) -> Result<(), Error> {
        let r = self
            .inputs
            .get(index as usize)
            .ok_or(Error::InvalidCount)?;

        if r.fingerprint != fingerprint(txi)? {
            #[cfg(feature = "log")]
            log::warn!("input {} changed since first pass", index);

            return Err(Error::TxChanged);
        }

        Ok(())
    }

    /// Accumulate a re-streamed output, checking the pass 1 digest on the last
    fn verify_output(&mut self, index: u32, amount: u64, script_pubkey: &[u8]) -> Result<(), Error> {
        if index == 0 {
            self.h_check = Context::sha256();
        }

        digest_output(&mut self.h_check, amount, script_pubkey)?;

        if index + 1 < self.header.outputs_count {
            return Ok(());
        }

        let d = mem::replace(&mut self.h_check, Context::sha256()).finalize();
        if d != self.outputs_digest {
            #[cfg(feature = "log")]
            log::warn!("outputs changed since first pass");

            return Err(Error::TxChanged);
        }

        Ok(())
    }

    /// Inputs signed with a dedicated legacy re-stream
    fn is_legacy(&self, script_type: InputScriptType) -> bool {
        let c = self.coin;

        let bip143 = c.decred || c.overwintered || c.fork_id.is_some() || c.force_bip143;

        !bip143
            && matches!(
                script_type,
                InputScriptType::SpendAddress | InputScriptType::SpendMultisig
            )
    }

    /// Check whether an output returns to the wallet funding the transaction
    fn is_change(&self, txo: &TxOutput) -> bool {
        let script_type = match change_input_type(txo.script_type) {
            Some(t) => t,
            None => return false,
        };

        let path = &txo.address_n;
        let (chain, index) = match path.len() {
            n if n >= 2 => (path[n - 2], path[n - 1]),
            _ => return false,
        };

        wallet_path(path).map_or(false, |p| self.wallet_path.check(&p))
            && self.script_type.check(&script_type)
            && chain <= MAX_CHAIN
            && index <= MAX_ADDRESS_INDEX
            && txo.amount > 0
    }

    /// Script pubkey for an output, deriving change scripts from their path
    fn output_script_pubkey<DRV: Driver>(&self, txo: &TxOutput, drv: &DRV) -> Result<Script, Error> {
        if txo.script_type == OutputScriptType::PayToOpReturn {
            return output_script_op_return(txo.op_return_data.ok_or(Error::MissingField)?);
        }

        if txo.address_n.is_empty() {
            return address_to_script(self.coin, txo.address.ok_or(Error::MissingField)?);
        }

        // Outputs carry no multisig descriptor, so P2SH change cannot be derived
        let script_type = match change_input_type(txo.script_type) {
            Some(InputScriptType::SpendMultisig) | None => return Err(Error::InvalidScriptType),
            Some(t) => t,
        };

        let node = derive(drv, &txo.address_n)?;
        let script_pubkey = self.singlesig_script_pubkey(&node, script_type)?;

        if let Some(a) = txo.address {
            if address_to_script(self.coin, a)? != script_pubkey {
                return Err(Error::ChangeMismatch);
            }
        }

        Ok(script_pubkey)
    }

    fn singlesig_script_pubkey(
        &self,
        node: &Node,
        script_type: InputScriptType,
    ) -> Result<Script, Error> {
        let h160 = node.pubkey_hash(self.coin.decred);

        match script_type {
            InputScriptType::SpendAddress => Ok(output_script_p2pkh(&h160)),
            InputScriptType::SpendWitness => output_script_native_segwit(0, &h160),
            InputScriptType::SpendP2shWitness => {
                let w = output_script_native_segwit(0, &h160)?;
                Ok(output_script_p2sh(&hash::hash160(&w, false)))
            }
            InputScriptType::SpendTaproot => Ok(output_script_p2tr(&node.taproot_output_key()?)),
            _ => Err(Error::InvalidScriptType),
        }
    }

    /// Script pubkey spent by an owned input
    fn input_script_pubkey(&self, txi: &TxInput, node: &Node) -> Result<Script, Error> {
        let m = match &txi.multisig {
            Some(m) => m,
            None => return self.singlesig_script_pubkey(node, txi.script_type),
        };

        let redeem = multisig_redeem_script(m, node.public_key())?;

        match txi.script_type {
            InputScriptType::SpendMultisig => {
                Ok(output_script_p2sh(&hash::hash160(&redeem, false)))
            }
            InputScriptType::SpendWitness => {
                output_script_native_segwit(0, &hash::sha256(&redeem))
            }
            InputScriptType::SpendP2shWitness => {
                let w = output_script_native_segwit(0, &hash::sha256(&redeem))?;
                Ok(output_script_p2sh(&hash::hash160(&w, false)))
            }
            _ => Err(Error::InvalidScriptType),
        }
    }

    /// Script code committed to by ECDSA signatures, the redeem / witness script
    /// for multisig inputs or the P2PKH script for the signing key
    fn script_code(&self, txi: &TxInput, node: &Node) -> Result<Script, Error> {
        match &txi.multisig {
            Some(m) => multisig_redeem_script(m, node.public_key()),
            None => Ok(output_script_p2pkh(&node.pubkey_hash(self.coin.decred))),
        }
    }
}

fn derive<DRV: Driver>(drv: &DRV, path: &[u32]) -> Result<Node, Error> {
    drv.derive_secp256k1(path).ok_or(Error::ForbiddenKeyPath)
}

/// Account level path prefix (dropping chain and address index)
fn wallet_path(path: &[u32]) -> Option<Path> {
    match path.len() {
        n if n >= 2 => Path::from_slice(&path[..n - 2]).ok(),
        _ => None,
    }
}

fn truncate(h: &[u8; 32]) -> Fingerprint {
    let mut f = [0u8; FINGERPRINT_LEN];
    f.copy_from_slice(&h[..FINGERPRINT_LEN]);
    f
}

/// Compute an input fingerprint over every host-supplied field
pub fn fingerprint(txi: &TxInput) -> Result<Fingerprint, Error> {
    let mut ctx = Context::sha256();

    write_u8(&mut ctx, txi.address_n.len() as u8)?;
    for c in txi.address_n.iter() {
        write_u32(&mut ctx, *c)?;
    }

    write_outpoint(&mut ctx, &txi.prev_hash, txi.prev_index)?;
    write_u64(&mut ctx, txi.amount)?;
    write_u8(&mut ctx, txi.script_type as u8)?;
    write_u32(&mut ctx, txi.sequence)?;

    match &txi.multisig {
        Some(m) => {
            write_u8(&mut ctx, m.m)?;
            write_prefixed(&mut ctx, m.pubkeys)?;
            write_prefixed(&mut ctx, m.signatures)?;
        }
        None => write_u8(&mut ctx, 0)?,
    }

    for d in [txi.script_pubkey, txi.script_sig, txi.witness] {
        match d {
            Some(d) => {
                write_u8(&mut ctx, 1)?;
                write_prefixed(&mut ctx, d)?;
            }
            None => write_u8(&mut ctx, 0)?,
        }
    }

    write_u8(&mut ctx, txi.decred_tree.unwrap_or(0xff))?;

    match &txi.orig_hash {
        Some(h) => {
            write_u8(&mut ctx, 1)?;
            ctx.write(h)?;
            write_u32(&mut ctx, txi.orig_index)?;
        }
        None => write_u8(&mut ctx, 0)?,
    }

    Ok(truncate(&ctx.finalize()))
}

fn digest_output(ctx: &mut Context, amount: u64, script_pubkey: &[u8]) -> Result<(), Error> {
    write_u64(ctx, amount)?;
    write_prefixed(ctx, script_pubkey)
}

/// Redeem script for a multisig input, which must include `pubkey`
fn multisig_redeem_script(m: &Multisig, pubkey: &[u8]) -> Result<Script, Error> {
    if !m.pubkeys().any(|k| k == pubkey) {
        return Err(Error::MultisigMismatch);
    }

    output_script_multisig(m.pubkeys(), m.m)
}

/// Signatures in public key order, merging our signature with those supplied
fn multisig_signatures<'a>(
    m: &'a Multisig<'a>,
    pubkey: &'a [u8],
    sig: &'a [u8],
) -> impl Iterator<Item = &'a [u8]> + Clone + 'a {
    m.pubkeys
        .chunks_exact(PUBKEY_LEN)
        .enumerate()
        .filter_map(move |(i, k)| match k == pubkey {
            true => Some(sig),
            false => m.signature(i),
        })
}

fn sig_input<'a>(
    index: u32,
    txi: &'a TxInput,
    script_code: &'a [u8],
    script_pubkey: &'a [u8],
    sighash_type: u32,
) -> SigInput<'a> {
    SigInput {
        index,
        prev_hash: &txi.prev_hash,
        prev_index: txi.prev_index,
        amount: txi.amount,
        sequence: txi.sequence,
        script_code,
        script_pubkey,
        sighash_type,
        taproot: false,
    }
}
