// Copyright (c) 2022-2023 The MobileCoin Foundation

use secp256k1::{ecdsa, Message, PublicKey, Secp256k1};
use sha2::{Digest, Sha256};

use utxo_signer_core::{
    apdu::prelude::*,
    engine::{Driver, Prompt},
};

mod helpers;
use helpers::*;

const ADDRESS: &str = "t1KnbiUyepswKexX7JrXAif6htkAt5of38A";
const ADDRESS_SCRIPT: &str = "76a91414fdede0ddc3be652a0ce1afbc1b509a55b6b94888ac";

const SAPLING_VERSION_GROUP_ID: u32 = 0x892F_2085;
const SAPLING_BRANCH_ID: u32 = 0x76B8_09BB;

const NU5_VERSION_GROUP_ID: u32 = 0x26A7_270A;
const NU5_BRANCH_ID: u32 = 0xC2D6_D0B4;

const PATH: [u32; 5] = [44 | H, 133 | H, H, 0, 0];

fn sha256d(d: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(d)).as_slice().try_into().unwrap()
}

fn blake2b(personal: &[u8], d: &[u8]) -> [u8; 32] {
    blake2b_simd::Params::new()
        .hash_length(32)
        .personal(personal)
        .hash(d)
        .as_bytes()
        .try_into()
        .unwrap()
}

fn request_types(s: &Signed) -> Vec<RequestType> {
    s.requests.iter().map(|r| r.request_type).collect()
}

/// Sapling previous transaction paying 100_000 to `spk`, without shielded data
fn sapling_prev(spk: &[u8]) -> PrevTxData<'_> {
    // Empty value balance, spends, outputs and joinsplits
    let extra_data = vec![0u8; 11];

    let mut ptx = vec![];
    ptx.extend((4 | 0x8000_0000u32).to_le_bytes());
    ptx.extend(SAPLING_VERSION_GROUP_ID.to_le_bytes());
    ptx.push(1);
    ptx.extend([0x44; 32]);
    ptx.extend(1u32.to_le_bytes());
    ptx.extend([0x01, 0x51]);
    ptx.extend(0xffff_ffffu32.to_le_bytes());
    ptx.push(1);
    ptx.extend(100_000u64.to_le_bytes());
    ptx.push(spk.len() as u8);
    ptx.extend(spk);
    ptx.extend(0u32.to_le_bytes());
    ptx.extend(0u32.to_le_bytes());
    ptx.extend(&extra_data);

    let mut hash = sha256d(&ptx);
    hash.reverse();

    PrevTxData {
        hash,
        meta: PrevTx {
            extra_data_len: extra_data.len() as u32,
            expiry: Some(0),
            version_group_id: Some(SAPLING_VERSION_GROUP_ID),
            ..PrevTx::new(4, 0, 1, 1)
        },
        inputs: vec![PrevInput::new([0x44; 32], 1, &[0x51], 0xffff_ffff)],
        outputs: vec![PrevOutput::new(100_000, spk)],
        extra_data,
    }
}

/// NU5 transaction spending a Sapling output
#[test]
fn zcash_v5_transparent() {
    init_log();

    let node = TestDriver::new(MNEMONIC_ALL).derive_secp256k1(&PATH).unwrap();
    let spk = [&[0x76, 0xa9, 0x14][..], &node.pubkey_hash(false), &[0x88, 0xac]].concat();
    let prev = sapling_prev(&spk);

    let t = TxData {
        tx: SignTx::new("Zcash", 5, 0, 1, 1).with_overwinter(NU5_VERSION_GROUP_ID, NU5_BRANCH_ID),
        inputs: vec![TxInput::new(
            &PATH,
            prev.hash,
            0,
            100_000,
            InputScriptType::SpendAddress,
        )],
        outputs: vec![TxOutput::to_address(ADDRESS, 90_000)],
        prev: vec![prev.clone()],
    };

    let mut e = TestEngine::new(MNEMONIC_ALL);
    let s = sign(&mut e, &t).unwrap();

    assert_eq!(
        s.prompts,
        vec![
            Prompt::output(0, 90_000, ADDRESS).unwrap(),
            Prompt::Total {
                spending: 100_000,
                fee: 10_000
            },
        ]
    );

    assert_eq!(
        request_types(&s),
        vec![
            RequestType::TxInput,
            RequestType::TxOutput,
            RequestType::TxInput,
            RequestType::TxMeta,
            RequestType::TxInput,
            RequestType::TxOutput,
            RequestType::TxExtraData,
            RequestType::TxInput,
            RequestType::TxOutput,
            RequestType::TxFinished,
        ]
    );

    let tx = hex::encode(&s.serialized);

    // Header with branch, lock time and expiry, followed by the input count
    assert!(tx.starts_with("050000800a27a726b4d0d6c2000000000000000001"));

    // Output followed by empty sapling and orchard bundles
    assert!(tx.ends_with(&format!("01905f01000000000019{ADDRESS_SCRIPT}000000")));

    assert_eq!(s.signatures.len(), 1);
}

/// Sapling transactions verify the previous transaction, including extra data
#[test]
fn zcash_v4_transparent() {
    init_log();

    let node = TestDriver::new(MNEMONIC_ALL).derive_secp256k1(&PATH).unwrap();
    let spk = [&[0x76, 0xa9, 0x14][..], &node.pubkey_hash(false), &[0x88, 0xac]].concat();
    let dest = hx(ADDRESS_SCRIPT);

    let prev = sapling_prev(&spk);
    let prev_hash = prev.hash;

    let t = TxData {
        tx: SignTx::new("Zcash", 4, 0, 1, 1)
            .with_overwinter(SAPLING_VERSION_GROUP_ID, SAPLING_BRANCH_ID),
        inputs: vec![TxInput::new(
            &PATH,
            prev_hash,
            0,
            100_000,
            InputScriptType::SpendAddress,
        )],
        outputs: vec![TxOutput::to_address(ADDRESS, 90_000)],
        prev: vec![prev],
    };

    let mut e = TestEngine::new(MNEMONIC_ALL);
    let s = sign(&mut e, &t).unwrap();

    // Extra data is requested in a single window following the outputs
    let extra: Vec<_> = s
        .requests
        .iter()
        .filter(|r| r.request_type == RequestType::TxExtraData)
        .map(|r| r.details.extra_data)
        .collect();
    assert_eq!(extra, vec![Some((0, 11))]);

    // ZIP-0243 signature digest
    let mut outpoint = prev_hash.to_vec();
    outpoint.reverse();
    outpoint.extend(0u32.to_le_bytes());

    let mut output = 90_000u64.to_le_bytes().to_vec();
    output.push(dest.len() as u8);
    output.extend(&dest);

    let mut preimage = vec![];
    preimage.extend((4 | 0x8000_0000u32).to_le_bytes());
    preimage.extend(SAPLING_VERSION_GROUP_ID.to_le_bytes());
    preimage.extend(blake2b(b"ZcashPrevoutHash", &outpoint));
    preimage.extend(blake2b(b"ZcashSequencHash", &0xffff_ffffu32.to_le_bytes()));
    preimage.extend(blake2b(b"ZcashOutputsHash", &output));
    preimage.extend([0u8; 96]);
    preimage.extend(0u32.to_le_bytes());
    preimage.extend(0u32.to_le_bytes());
    preimage.extend(0u64.to_le_bytes());
    preimage.extend(1u32.to_le_bytes());
    preimage.extend(&outpoint);
    preimage.push(spk.len() as u8);
    preimage.extend(&spk);
    preimage.extend(100_000u64.to_le_bytes());
    preimage.extend(0xffff_ffffu32.to_le_bytes());

    let mut personal = b"ZcashSigHash".to_vec();
    personal.extend(SAPLING_BRANCH_ID.to_le_bytes());

    let digest = blake2b(&personal, &preimage);

    let (_, sig) = &s.signatures[0];

    let secp = Secp256k1::verification_only();
    secp.verify_ecdsa(
        &Message::from_digest(digest),
        &ecdsa::Signature::from_der(sig).unwrap(),
        &PublicKey::from_slice(node.public_key()).unwrap(),
    )
    .unwrap();

    let mut script_sig = vec![sig.len() as u8 + 1];
    script_sig.extend(sig);
    script_sig.push(0x01);
    script_sig.push(33);
    script_sig.extend(node.public_key());

    let mut tx = vec![];
    tx.extend((4 | 0x8000_0000u32).to_le_bytes());
    tx.extend(SAPLING_VERSION_GROUP_ID.to_le_bytes());
    tx.push(1);
    tx.extend(&outpoint);
    tx.push(script_sig.len() as u8);
    tx.extend(&script_sig);
    tx.extend(0xffff_ffffu32.to_le_bytes());
    tx.push(1);
    tx.extend(&output);
    tx.extend(0u32.to_le_bytes());
    tx.extend(0u32.to_le_bytes());
    tx.extend(0u64.to_le_bytes());
    tx.extend([0x00, 0x00, 0x00]);

    assert_eq!(hex::encode(&s.serialized), hex::encode(&tx));
}

/// Overwintered sessions require version group and branch ids
#[test]
fn zcash_missing_branch() {
    let mut e = TestEngine::new(MNEMONIC_ALL);

    let r = e.send(&SignTx::new("Zcash", 4, 0, 1, 1));
    assert_eq!(r, Err(utxo_signer_core::engine::Error::MissingField));
}
