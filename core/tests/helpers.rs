// Copyright (c) 2022-2023 The MobileCoin Foundation

#![allow(unused)]

use std::fmt::Debug;

use bip32::{ChildNumber, XPrv};
use bip39::{Language, Mnemonic, Seed};
use encdec::{Decode, DecodeOwned, Encode};
use log::{debug, trace};

use utxo_signer_core::{
    apdu::{prelude::*, ApduError, ApduStatic},
    engine::{Driver, Engine, Error, Event, Prompt, State},
    hash::sha256d,
    keychain::Node,
};

pub const MNEMONIC_ALL: &str = "all all all all all all all all all all all all";

pub const MNEMONIC_DECRED: &str =
    "alcohol woman abuse must during monitor noble actual mixed trade anger aisle";

pub const H: u32 = 0x8000_0000;

/// Initialise logging for tests, repeated calls are ignored
pub fn init_log() {
    let _ = simplelog::SimpleLogger::init(log::LevelFilter::Debug, Default::default());
}

/// Decode a hex string to bytes
pub fn hx(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

/// Decode a hex string to a 32-byte hash
pub fn h32(s: &str) -> [u8; 32] {
    hex::decode(s).unwrap().try_into().unwrap()
}

/// Driver implementation for test use
pub struct TestDriver {
    /// BIP39 Mnemonic derived seed
    pub seed: [u8; 64],
}

impl TestDriver {
    pub fn new(mnemonic: &str) -> Self {
        let mnemonic = Mnemonic::from_phrase(mnemonic, Language::English).unwrap();
        let seed = Seed::new(&mnemonic, "");

        let mut b = [0u8; 64];
        b.copy_from_slice(seed.as_bytes());
        Self { seed: b }
    }
}

impl Driver for TestDriver {
    fn derive_secp256k1(&self, path: &[u32]) -> Option<Node> {
        let mut k = XPrv::new(self.seed).ok()?;
        for i in path {
            k = k.derive_child(ChildNumber(*i)).ok()?;
        }

        Node::new(k.to_bytes()).ok()
    }
}

/// Decoded response APDU
#[derive(Clone, PartialEq, Debug)]
pub struct Response {
    pub info: TxInfo,
    pub request: Option<TxRequest>,
}

/// Engine wrapper exchanging encoded APDUs
pub struct TestEngine {
    pub engine: Engine<TestDriver>,
}

impl TestEngine {
    pub fn new(mnemonic: &str) -> Self {
        Self {
            engine: Engine::new(TestDriver::new(mnemonic)),
        }
    }

    /// Encode a request APDU, apply it to the engine and decode the response
    pub fn send<T>(&mut self, command: &T) -> Result<Response, Error>
    where
        T: Encode<Error = ApduError> + ApduStatic + Debug,
    {
        debug!("cmd: {:?}", command);

        let mut req = [0u8; 512];
        let n = command.encode(&mut req).unwrap();

        trace!("encoded: {:02x?}", &req[..n]);

        let evt = match Event::parse(T::INS, &req[..n]) {
            Ok(v) => v,
            Err(e) => panic!("Decode failed with {:?} for: {:02x?}", e, &req[..n]),
        };

        let r = self.engine.update(&evt)?;

        let mut buff = [0u8; 1024];
        let n = r.encode(&mut buff).unwrap();

        let (info, i) = TxInfo::decode(&buff[..n]).unwrap();
        let request = match i < n {
            true => Some(TxRequest::decode_owned(&buff[i..n]).unwrap().0),
            false => None,
        };

        let resp = Response { info, request };

        debug!("resp: {:?}", resp);

        Ok(resp)
    }

    /// Approve all pending prompts, returning them in order
    pub fn approve_all(&mut self) -> Vec<Prompt> {
        let mut prompts = vec![];

        while self.engine.state() == State::Pending {
            let p = self.engine.prompt().cloned().unwrap();
            debug!("approve: {:?}", p);

            prompts.push(p);
            self.engine.approve();
        }

        prompts
    }
}

/// Previous transaction supplied by the host
#[derive(Clone, Debug)]
pub struct PrevTxData<'a> {
    pub hash: [u8; 32],
    pub meta: PrevTx,
    pub inputs: Vec<PrevInput<'a>>,
    pub outputs: Vec<PrevOutput<'a>>,
    pub extra_data: Vec<u8>,
}

/// Build a version 1 previous transaction with a single input, paying `outputs`
pub fn prev_tx<'a>(outputs: &[(u64, &'a [u8])]) -> PrevTxData<'a> {
    let input = PrevInput::new([0x44; 32], 1, &[0x51], 0xffff_ffff);

    let mut tx = vec![];
    tx.extend(1u32.to_le_bytes());
    tx.push(1);
    tx.extend(input.prev_hash);
    tx.extend(input.prev_index.to_le_bytes());
    tx.push(input.script_sig.len() as u8);
    tx.extend(input.script_sig);
    tx.extend(input.sequence.to_le_bytes());

    tx.push(outputs.len() as u8);
    for (amount, script_pubkey) in outputs {
        tx.extend(amount.to_le_bytes());
        tx.push(script_pubkey.len() as u8);
        tx.extend(*script_pubkey);
    }
    tx.extend(0u32.to_le_bytes());

    // Transaction ids are displayed byte reversed
    let mut hash = sha256d(&tx);
    hash.reverse();

    PrevTxData {
        hash,
        meta: PrevTx::new(1, 0, 1, outputs.len() as u32),
        inputs: vec![input],
        outputs: outputs
            .iter()
            .map(|(amount, script_pubkey)| PrevOutput::new(*amount, *script_pubkey))
            .collect(),
        extra_data: vec![],
    }
}

/// Transaction supplied by the host
#[derive(Clone, Debug)]
pub struct TxData<'a> {
    pub tx: SignTx<'a>,
    pub inputs: Vec<TxInput<'a>>,
    pub outputs: Vec<TxOutput<'a>>,
    pub prev: Vec<PrevTxData<'a>>,
}

impl<'a> TxData<'a> {
    fn prev(&self, hash: &[u8; 32]) -> &PrevTxData<'a> {
        self.prev
            .iter()
            .find(|p| &p.hash == hash)
            .expect("unknown previous transaction")
    }
}

/// Transaction being replaced, owned inputs carry their signatures
#[derive(Clone, Debug)]
pub struct OrigTxData<'a> {
    pub hash: [u8; 32],
    pub meta: PrevTx,
    pub inputs: Vec<TxInput<'a>>,
    pub outputs: Vec<TxOutput<'a>>,
}

/// Signing session output collected by the host
#[derive(Clone, Debug, Default)]
pub struct Signed {
    pub serialized: Vec<u8>,
    pub signatures: Vec<(u32, Vec<u8>)>,
    pub prompts: Vec<Prompt>,
    pub requests: Vec<TxRequest>,
}

/// Run a signing session to completion, answering each request from `t`
/// and approving all prompts
pub fn sign(e: &mut TestEngine, t: &TxData) -> Result<Signed, Error> {
    sign_inner(e, t, None)
}

/// Run a signing session for a transaction replacing `orig`
pub fn sign_replacement(e: &mut TestEngine, t: &TxData, orig: &OrigTxData) -> Result<Signed, Error> {
    sign_inner(e, t, Some(orig))
}

fn sign_inner(e: &mut TestEngine, t: &TxData, orig: Option<&OrigTxData>) -> Result<Signed, Error> {
    let mut s = Signed::default();

    let orig_tx = |h: &[u8; 32]| orig.filter(|o| &o.hash == h);

    let mut r = e.send(&t.tx)?;

    loop {
        if r.info.state == TxState::Pending {
            assert!(r.info.value > 0);

            s.prompts.extend(e.approve_all());
            r = e.send(&TxPoll)?;
            continue;
        }

        let req = r.request.clone().expect("missing request");

        s.serialized
            .extend_from_slice(&req.serialized.serialized_tx);
        if !req.serialized.signature.is_empty() {
            s.signatures.push((
                req.serialized.signature_index,
                req.serialized.signature.to_vec(),
            ));
        }
        s.requests.push(req.clone());

        let index = req.details.request_index as usize;

        r = match (req.request_type, req.details.tx_hash) {
            (RequestType::TxFinished, _) => break,

            (RequestType::TxInput, None) => e.send(&t.inputs[index])?,
            (RequestType::TxOutput, None) => e.send(&t.outputs[index])?,

            (RequestType::TxMeta, Some(h)) => match orig_tx(&h) {
                Some(o) => e.send(&o.meta)?,
                None => e.send(&t.prev(&h).meta)?,
            },
            (RequestType::TxInput, Some(h)) => e.send(&t.prev(&h).inputs[index])?,
            (RequestType::TxOutput, Some(h)) => e.send(&t.prev(&h).outputs[index])?,
            (RequestType::TxOrigInput, Some(h)) => {
                e.send(&orig_tx(&h).expect("unknown original").inputs[index])?
            }
            (RequestType::TxOrigOutput, Some(h)) => {
                e.send(&orig_tx(&h).expect("unknown original").outputs[index])?
            }
            (RequestType::TxExtraData, Some(h)) => {
                let (offset, len) = req.details.extra_data.unwrap();
                let d = &t.prev(&h).extra_data[offset as usize..][..len as usize];
                e.send(&PrevExtraData::new(d))?
            }

            _ => panic!("unexpected request: {req:?}"),
        };
    }

    assert_eq!(e.engine.state(), State::Finished);

    Ok(s)
}

/// Check a response carries the `expected` request with the provided serialized chunk
pub fn check_request(r: &Response, expected: TxRequest, serialized: &str) {
    let req = r.request.as_ref().expect("missing request");

    assert_eq!(req.request_type, expected.request_type);
    assert_eq!(req.details, expected.details);
    assert_eq!(hex::encode(&req.serialized.serialized_tx), serialized);
}
