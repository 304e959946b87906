// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Replacement (BIP-0125 fee bump) transaction verification
//!
//! Inputs and outputs of a replacing transaction reference the transaction
//! they replace by `orig_hash` / `orig_index`. The original is streamed
//! alongside pass 1 as full [TxInput] elements, its txid recomputed and the
//! first of our signatures on it verified, so only transactions produced by
//! this wallet may be replaced.

use heapless::Vec;

use crate::{
    apdu::{
        input::{InputScriptType, TxInput, PUBKEY_LEN},
        prev::PrevTx,
        request::MAX_SIGNATURE_LEN,
    },
    coins::{CoinInfo, SIGHASH_ALL_TAPROOT},
    hash::Context,
    keychain::{verify_ecdsa, verify_schnorr, Node},
    scripts::{output_script_p2pkh, parse_pushes, parse_witness, Script},
    serializer::{write_prev_tx_footer, write_tx_header, write_tx_input, write_tx_output, TxHeader},
    sighash::{Bip143, Counter, LegacyHasher, SigHasher, SigInput},
    writer::write_varint,
};

use super::{sanitize::check_prev_header, signer::SEQUENCE_FINAL, Error};

/// Largest sequence number signalling replaceability
pub const MAX_RBF_SEQUENCE: u32 = 0xffff_fffd;

/// Totals of a replaced transaction
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct OrigTotals {
    pub total_in: u64,
    pub total_out: u64,
    /// Outputs returning to this wallet
    pub change_out: u64,
    /// Effective lock time, zero where every input sequence is final
    pub lock_time: u32,
}

#[derive(Clone, PartialEq, Debug)]
enum OrigSignature {
    Ecdsa {
        pubkey: [u8; PUBKEY_LEN],
        sig: Vec<u8, MAX_SIGNATURE_LEN>,
    },
    Schnorr {
        output_key: [u8; 32],
        sig: [u8; 64],
        hash_type: u8,
    },
}

/// Original input carrying the signature to be verified
#[derive(Clone, PartialEq, Debug)]
struct SignedInput {
    index: u32,
    prev_hash: [u8; 32],
    prev_index: u32,
    amount: u64,
    sequence: u32,
    /// Signed with a BIP-0143 digest
    bip143: bool,
    script_code: Script,
    script_pubkey: Script,
    signature: OrigSignature,
}

impl SignedInput {
    fn new(
        coin: &CoinInfo,
        index: u32,
        txi: &TxInput,
        script_pubkey: &[u8],
        node: &Node,
        legacy: bool,
    ) -> Result<Self, Error> {
        // The signature is the first witness item, or the first push for
        // inputs without a witness
        let items = match (txi.witness, txi.script_sig) {
            (Some(w), _) if w.len() > 1 => parse_witness(w),
            (_, Some(s)) => parse_pushes(s),
            _ => None,
        };
        let sig = *items
            .as_ref()
            .and_then(|i| i.first())
            .ok_or(Error::InvalidSignature)?;

        let signature = match txi.script_type {
            InputScriptType::SpendTaproot => {
                let (sig, hash_type) = match sig.len() {
                    64 => (sig, SIGHASH_ALL_TAPROOT),
                    65 if sig[64] == 0x01 => (&sig[..64], 0x01),
                    _ => return Err(Error::InvalidSignature),
                };

                OrigSignature::Schnorr {
                    output_key: node.taproot_output_key()?,
                    sig: sig.try_into().map_err(|_| Error::InvalidSignature)?,
                    hash_type,
                }
            }
            _ => {
                let (hash_type, der) = sig.split_last().ok_or(Error::InvalidSignature)?;
                if *hash_type as u32 != coin.sighash_type() & 0xff {
                    return Err(Error::InvalidSignature);
                }

                OrigSignature::Ecdsa {
                    pubkey: *node.public_key(),
                    sig: Vec::from_slice(der).map_err(|_| Error::InvalidSignature)?,
                }
            }
        };

        Ok(Self {
            index,
            prev_hash: txi.prev_hash,
            prev_index: txi.prev_index,
            amount: txi.amount,
            sequence: txi.sequence,
            bip143: txi.script_type.is_segwit() || !legacy,
            script_code: output_script_p2pkh(&node.pubkey_hash(false)),
            script_pubkey: Script::from_slice(script_pubkey).map_err(|_| Error::BufferOverflow)?,
            signature,
        })
    }

    fn sig_input(&self, sighash_type: u32, taproot: bool) -> SigInput<'_> {
        SigInput {
            index: self.index,
            prev_hash: &self.prev_hash,
            prev_index: self.prev_index,
            amount: self.amount,
            sequence: self.sequence,
            script_code: match taproot {
                true => &[][..],
                false => &self.script_code[..],
            },
            script_pubkey: &self.script_pubkey,
            sighash_type,
            taproot,
        }
    }
}

/// Streaming verifier for the transaction being replaced
#[derive(Clone, Debug)]
pub struct OrigTxVerifier {
    hash: [u8; 32],
    header: TxHeader,
    txid: Context,

    hasher: Bip143,
    legacy: Option<LegacyHasher>,

    inputs: Counter,
    outputs: Counter,
    totals: OrigTotals,
    min_sequence: u32,

    signed: Option<SignedInput>,
}

impl OrigTxVerifier {
    /// Start verification of original transaction `hash`, `legacy` where the
    /// coin signs non-segwit inputs over a legacy preimage
    pub fn new(coin: &CoinInfo, hash: [u8; 32], meta: &PrevTx, legacy: bool) -> Result<Self, Error> {
        if coin.decred || coin.overwintered {
            return Err(Error::UnsupportedPrevTx);
        }

        let header = check_prev_header(coin, meta)?;
        if meta.extra_data_len > 0 {
            return Err(Error::UnexpectedField);
        }
        if header.inputs_count == 0 || header.outputs_count == 0 {
            return Err(Error::InvalidCount);
        }

        let mut txid = Context::sha256d();
        write_tx_header(&mut txid, coin, &header, false)?;
        write_varint(&mut txid, header.inputs_count as u64)?;

        let legacy = match legacy {
            true => Some(LegacyHasher::new(coin, &header)?),
            false => None,
        };

        Ok(Self {
            hash,
            hasher: Bip143::new(&header),
            legacy,
            inputs: Counter::new(header.inputs_count),
            outputs: Counter::new(header.outputs_count),
            totals: OrigTotals::default(),
            min_sequence: SEQUENCE_FINAL,
            signed: None,
            header,
            txid,
        })
    }

    /// Hash of the transaction being replaced
    pub fn hash(&self) -> [u8; 32] {
        self.hash
    }

    pub fn next_input(&self) -> u32 {
        self.inputs.added()
    }

    pub fn next_output(&self) -> u32 {
        self.outputs.added()
    }

    pub fn inputs_complete(&self) -> bool {
        self.inputs.is_complete()
    }

    pub fn outputs_complete(&self) -> bool {
        self.outputs.is_complete()
    }

    /// Check whether the original signals replaceability
    pub fn is_rbf(&self) -> bool {
        self.min_sequence <= MAX_RBF_SEQUENCE
    }

    /// Check `orig_index` refers to the next original input, inputs may be
    /// added but not removed or reordered
    pub fn check_input_index(&self, orig_index: u32) -> Result<(), Error> {
        if orig_index >= self.inputs.declared() {
            return Err(Error::InvalidCount);
        }
        if orig_index != self.inputs.added() {
            return Err(Error::CountMismatch);
        }
        Ok(())
    }

    /// Check `orig_index` refers to an original output not yet streamed
    pub fn check_output_index(&self, orig_index: u32) -> Result<(), Error> {
        if orig_index >= self.outputs.declared() {
            return Err(Error::InvalidCount);
        }
        if orig_index < self.outputs.added() {
            return Err(Error::CountMismatch);
        }
        Ok(())
    }

    /// Add an original input spending `script_pubkey`, `node` is the signing
    /// key for owned inputs
    pub fn add_input(
        &mut self,
        coin: &CoinInfo,
        txi: &TxInput,
        script_pubkey: &[u8],
        node: Option<&Node>,
    ) -> Result<(), Error> {
        let index = self.inputs.add()?;

        self.hasher.add_input(txi, script_pubkey)?;
        self.totals.total_in = self
            .totals
            .total_in
            .checked_add(txi.amount)
            .ok_or(Error::AmountOverflow)?;
        self.min_sequence = self.min_sequence.min(txi.sequence);

        write_tx_input(
            &mut self.txid,
            coin,
            &txi.prev_hash,
            txi.prev_index,
            txi.script_sig.unwrap_or(&[]),
            txi.sequence,
            None,
        )?;
        if self.inputs.is_complete() {
            write_varint(&mut self.txid, self.header.outputs_count as u64)?;
        }

        let signed = txi.script_sig.map_or(false, |s| !s.is_empty())
            || txi.witness.map_or(false, |w| w.len() > 1);

        let script_code = match node {
            Some(node) if signed && txi.multisig.is_none() && self.signed.is_none() => {
                let s = SignedInput::new(
                    coin,
                    index,
                    txi,
                    script_pubkey,
                    node,
                    self.legacy.is_some(),
                )?;
                let c = s.script_code.clone();
                self.signed = Some(s);
                c
            }
            _ => Script::new(),
        };

        if let Some(l) = &mut self.legacy {
            l.add_input(coin, txi, &script_code)?;
        }

        Ok(())
    }

    /// Add an original output, returning its index
    pub fn add_output(
        &mut self,
        coin: &CoinInfo,
        amount: u64,
        script_pubkey: &[u8],
        change: bool,
    ) -> Result<u32, Error> {
        if !self.inputs.is_complete() {
            return Err(Error::CountMismatch);
        }

        let index = self.outputs.add()?;

        self.hasher.add_output(amount, script_pubkey)?;
        if let Some(l) = &mut self.legacy {
            l.add_output(coin, amount, script_pubkey)?;
        }

        write_tx_output(&mut self.txid, coin, amount, script_pubkey, 0)?;
        if self.outputs.is_complete() {
            write_prev_tx_footer(&mut self.txid, coin, &self.header)?;
        }

        let t = &mut self.totals;
        t.total_out = t.total_out.checked_add(amount).ok_or(Error::AmountOverflow)?;
        if change {
            t.change_out = t.change_out.checked_add(amount).ok_or(Error::AmountOverflow)?;
        }

        Ok(index)
    }

    /// Check the recomputed txid and our signature, returning the original totals
    pub fn finish(self, coin: &CoinInfo) -> Result<OrigTotals, Error> {
        let Self {
            hash,
            header,
            txid,
            mut hasher,
            legacy,
            inputs,
            outputs,
            totals,
            min_sequence,
            signed,
        } = self;

        if !inputs.is_complete() || !outputs.is_complete() {
            return Err(Error::CountMismatch);
        }

        let mut digest = txid.finalize();
        digest.reverse();

        if digest != hash {
            #[cfg(feature = "log")]
            log::warn!("original txid mismatch: {:02x?}", digest);

            return Err(Error::InvalidReplacement);
        }

        let s = match signed {
            Some(s) => s,
            None => {
                #[cfg(feature = "log")]
                log::warn!("original transaction has no signed input of ours");

                return Err(Error::InvalidReplacement);
            }
        };

        hasher.seal()?;

        let r = match &s.signature {
            OrigSignature::Schnorr {
                output_key,
                sig,
                hash_type,
            } => {
                let d = hasher.signature_digest(&s.sig_input(*hash_type as u32, true))?;
                verify_schnorr(output_key, &d, sig)
            }
            OrigSignature::Ecdsa { pubkey, sig } => {
                let sighash = coin.sighash_type();
                let d = match (s.bip143, legacy) {
                    (false, Some(l)) => l.finish(header.lock_time, sighash)?,
                    _ => hasher.signature_digest(&s.sig_input(sighash, false))?,
                };
                verify_ecdsa(pubkey, &d, sig)
            }
        };

        if let Err(e) = r {
            #[cfg(feature = "log")]
            log::warn!("original input {} signature invalid", s.index);

            return Err(e);
        }

        Ok(OrigTotals {
            lock_time: match min_sequence {
                SEQUENCE_FINAL => 0,
                _ => header.lock_time,
            },
            ..totals
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{coins::TESTNET, hash, paths::HARDENED, scripts::output_script_native_segwit};

    const H: u32 = HARDENED;

    /// Single P2WPKH input original, returning the verifier inputs and txid
    struct Orig {
        node: Node,
        spk: Script,
        out_spk: Script,
        txid: [u8; 32],
    }

    impl Orig {
        fn new() -> Self {
            let node = Node::new([0x11; 32]).unwrap();
            let spk = output_script_native_segwit(0, &node.pubkey_hash(false)).unwrap();
            let out_spk = output_script_p2pkh(&[0x33; 20]);

            let mut tx = alloc::vec::Vec::new();
            tx.extend(2u32.to_le_bytes());
            tx.push(1);
            tx.extend([0x22; 32]);
            tx.extend(0u32.to_le_bytes());
            tx.push(0);
            tx.extend(MAX_RBF_SEQUENCE.to_le_bytes());
            tx.push(1);
            tx.extend(9_000u64.to_le_bytes());
            tx.push(out_spk.len() as u8);
            tx.extend_from_slice(&out_spk);
            tx.extend(0u32.to_le_bytes());

            let mut txid = hash::sha256d(&tx);
            txid.reverse();

            Self {
                node,
                spk,
                out_spk,
                txid,
            }
        }

        fn meta() -> PrevTx {
            PrevTx::new(2, 0, 1, 1)
        }

        fn input<'a>(&self, witness: &'a [u8]) -> TxInput<'a> {
            TxInput {
                sequence: MAX_RBF_SEQUENCE,
                witness: Some(witness),
                ..TxInput::new(
                    &[84 | H, 1 | H, H, 0, 0],
                    [0x22; 32],
                    0,
                    10_000,
                    InputScriptType::SpendWitness,
                )
            }
        }

        /// Witness signing the BIP-0143 digest for `amount`
        fn witness(&self, amount: u64) -> alloc::vec::Vec<u8> {
            let mut h = Bip143::new(&TxHeader {
                version: 2,
                inputs_count: 1,
                outputs_count: 1,
                ..Default::default()
            });
            let txi = TxInput {
                amount,
                ..self.input(&[])
            };
            h.add_input(&txi, &self.spk).unwrap();
            h.add_output(9_000, &self.out_spk).unwrap();
            h.seal().unwrap();

            let script_code = output_script_p2pkh(&self.node.pubkey_hash(false));
            let d = h
                .signature_digest(&SigInput {
                    index: 0,
                    prev_hash: &txi.prev_hash,
                    prev_index: 0,
                    amount,
                    sequence: MAX_RBF_SEQUENCE,
                    script_code: &script_code,
                    script_pubkey: &self.spk,
                    sighash_type: 1,
                    taproot: false,
                })
                .unwrap();

            let sig = self.node.sign_ecdsa(&d).unwrap();

            let mut w = alloc::vec![0x02, sig.len() as u8 + 1];
            w.extend_from_slice(&sig);
            w.push(0x01);
            w.push(PUBKEY_LEN as u8);
            w.extend_from_slice(self.node.public_key());
            w
        }

        fn verify(&self, hash: [u8; 32], witness: &[u8]) -> Result<OrigTotals, Error> {
            let mut v = OrigTxVerifier::new(&TESTNET, hash, &Self::meta(), true)?;
            v.add_input(&TESTNET, &self.input(witness), &self.spk, Some(&self.node))?;
            v.add_output(&TESTNET, 9_000, &self.out_spk, false)?;
            v.finish(&TESTNET)
        }
    }

    #[test]
    fn verify_original() {
        let o = Orig::new();
        let w = o.witness(10_000);

        let totals = o.verify(o.txid, &w).unwrap();
        assert_eq!(
            totals,
            OrigTotals {
                total_in: 10_000,
                total_out: 9_000,
                change_out: 0,
                lock_time: 0,
            }
        );

        // Witnesses are not covered by the txid, signatures are checked
        assert_eq!(
            o.verify(o.txid, &o.witness(10_001)),
            Err(Error::InvalidSignature)
        );
        assert_eq!(o.verify([0x55; 32], &w), Err(Error::InvalidReplacement));
    }

    #[test]
    fn requires_signed_input() {
        let o = Orig::new();

        let mut v = OrigTxVerifier::new(&TESTNET, o.txid, &Orig::meta(), true).unwrap();
        let txi = TxInput {
            witness: None,
            ..o.input(&[])
        };
        v.add_input(&TESTNET, &txi, &o.spk, Some(&o.node)).unwrap();
        v.add_output(&TESTNET, 9_000, &o.out_spk, false).unwrap();
        assert!(v.is_rbf());

        assert_eq!(v.finish(&TESTNET), Err(Error::InvalidReplacement));
    }

    #[test]
    fn element_indices() {
        let o = Orig::new();
        let w = o.witness(10_000);

        let mut v = OrigTxVerifier::new(&TESTNET, o.txid, &PrevTx::new(2, 0, 1, 2), true).unwrap();

        assert_eq!(v.check_input_index(1), Err(Error::InvalidCount));
        assert_eq!(v.check_input_index(0), Ok(()));
        assert_eq!(
            v.add_output(&TESTNET, 9_000, &o.out_spk, false),
            Err(Error::CountMismatch)
        );

        v.add_input(&TESTNET, &o.input(&w), &o.spk, Some(&o.node)).unwrap();
        assert!(v.inputs_complete());
        assert_eq!(v.check_input_index(0), Err(Error::InvalidCount));

        assert_eq!(v.add_output(&TESTNET, 5_000, &o.out_spk, true), Ok(0));
        assert_eq!(v.next_output(), 1);
        assert_eq!(v.check_output_index(0), Err(Error::CountMismatch));
        assert_eq!(v.check_output_index(2), Err(Error::InvalidCount));
        assert_eq!(v.check_output_index(1), Ok(()));
        assert!(!v.outputs_complete());
    }

    #[test]
    fn unsupported_originals() {
        use crate::coins::{DECRED, ZCASH};

        for coin in [&DECRED, &ZCASH] {
            assert!(matches!(
                OrigTxVerifier::new(coin, [0u8; 32], &Orig::meta(), false),
                Err(Error::UnsupportedPrevTx)
            ));
        }

        let mut meta = Orig::meta();
        meta.extra_data_len = 4;
        assert!(OrigTxVerifier::new(&TESTNET, [0u8; 32], &meta, true).is_err());
    }
}
