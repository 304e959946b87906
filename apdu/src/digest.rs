// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Helpers for computing APDU / event digests
//!
//! These are used to compute the rolling session digest, and must match over
//! APDUs and the engine events decoded from them.

use sha2::{Digest as _, Sha512_256};

use crate::{
    input::TxInput,
    output::TxOutput,
    prev::{PrevInput, PrevOutput, PrevTx},
    sign_tx::SignTx,
};

fn opt_u32(v: Option<u32>) -> [u8; 5] {
    let mut b = [0u8; 5];
    if let Some(v) = v {
        b[0] = 1;
        b[1..].copy_from_slice(&v.to_le_bytes());
    }
    b
}

fn opt_bytes(d: &mut Sha512_256, v: Option<&[u8]>) {
    match v {
        Some(v) => {
            d.update([1u8]);
            d.update((v.len() as u32).to_le_bytes());
            d.update(v);
        }
        None => d.update([0u8]),
    }
}

pub fn digest_sign_tx(tx: &SignTx) -> [u8; 32] {
    Sha512_256::new()
        .chain_update("sign_tx")
        .chain_update((tx.coin_name.len() as u32).to_le_bytes())
        .chain_update(tx.coin_name)
        .chain_update(tx.version.to_le_bytes())
        .chain_update(tx.lock_time.to_le_bytes())
        .chain_update(tx.inputs_count.to_le_bytes())
        .chain_update(tx.outputs_count.to_le_bytes())
        .chain_update(opt_u32(tx.expiry))
        .chain_update(opt_u32(tx.version_group_id))
        .chain_update(opt_u32(tx.branch_id))
        .finalize()
        .into()
}

pub fn digest_tx_input(txi: &TxInput) -> [u8; 32] {
    let mut d = Sha512_256::new()
        .chain_update("tx_input")
        .chain_update((txi.address_n.len() as u32).to_le_bytes());

    for c in txi.address_n.iter() {
        d.update(c.to_le_bytes());
    }

    d = d
        .chain_update(txi.prev_hash)
        .chain_update(txi.prev_index.to_le_bytes())
        .chain_update(txi.amount.to_le_bytes())
        .chain_update([txi.script_type as u8])
        .chain_update(txi.sequence.to_le_bytes());

    if let Some(m) = &txi.multisig {
        d.update([m.m]);
        d.update(m.pubkeys);
        d.update(m.signatures);
    }

    opt_bytes(&mut d, txi.script_pubkey);
    opt_bytes(&mut d, txi.script_sig);
    opt_bytes(&mut d, txi.witness);
    opt_bytes(&mut d, txi.orig_hash.as_ref().map(|h| &h[..]));

    d.chain_update(txi.decred_tree.map(|t| [1, t]).unwrap_or([0, 0]))
        .chain_update(txi.orig_index.to_le_bytes())
        .finalize()
        .into()
}

pub fn digest_tx_output(txo: &TxOutput) -> [u8; 32] {
    let mut d = Sha512_256::new()
        .chain_update("tx_output")
        .chain_update((txo.address_n.len() as u32).to_le_bytes());

    for c in txo.address_n.iter() {
        d.update(c.to_le_bytes());
    }

    opt_bytes(&mut d, txo.address.map(|a| a.as_bytes()));
    opt_bytes(&mut d, txo.op_return_data);
    opt_bytes(&mut d, txo.orig_hash.as_ref().map(|h| &h[..]));

    d.chain_update(txo.amount.to_le_bytes())
        .chain_update([txo.script_type as u8])
        .chain_update(txo.orig_index.to_le_bytes())
        .finalize()
        .into()
}

pub fn digest_prev_meta(tx: &PrevTx) -> [u8; 32] {
    Sha512_256::new()
        .chain_update("prev_meta")
        .chain_update(tx.version.to_le_bytes())
        .chain_update(tx.lock_time.to_le_bytes())
        .chain_update(tx.inputs_count.to_le_bytes())
        .chain_update(tx.outputs_count.to_le_bytes())
        .chain_update(tx.extra_data_len.to_le_bytes())
        .chain_update(opt_u32(tx.expiry))
        .chain_update(opt_u32(tx.version_group_id))
        .chain_update(opt_u32(tx.branch_id))
        .finalize()
        .into()
}

pub fn digest_prev_input(txi: &PrevInput) -> [u8; 32] {
    Sha512_256::new()
        .chain_update("prev_input")
        .chain_update(txi.prev_hash)
        .chain_update(txi.prev_index.to_le_bytes())
        .chain_update(txi.sequence.to_le_bytes())
        .chain_update((txi.script_sig.len() as u32).to_le_bytes())
        .chain_update(txi.script_sig)
        .chain_update(txi.decred_tree.map(|t| [1, t]).unwrap_or([0, 0]))
        .finalize()
        .into()
}

pub fn digest_prev_output(txo: &PrevOutput) -> [u8; 32] {
    Sha512_256::new()
        .chain_update("prev_output")
        .chain_update(txo.amount.to_le_bytes())
        .chain_update((txo.script_pubkey.len() as u32).to_le_bytes())
        .chain_update(txo.script_pubkey)
        .chain_update(opt_u32(txo.decred_script_version.map(u32::from)))
        .finalize()
        .into()
}

pub fn digest_prev_extra_data(chunk: &[u8]) -> [u8; 32] {
    Sha512_256::new()
        .chain_update("prev_extra_data")
        .chain_update((chunk.len() as u32).to_le_bytes())
        .chain_update(chunk)
        .finalize()
        .into()
}
