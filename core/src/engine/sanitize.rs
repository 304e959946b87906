// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Structural checks applied to host-supplied messages before they reach
//! the signer, rejecting field combinations the coin can not express.

use crate::{
    apdu::{
        input::{InputScriptType, Multisig, TxInput, MAX_MULTISIG_KEYS, PUBKEY_LEN},
        output::{OutputScriptType, TxOutput},
        prev::PrevTx,
        sign_tx::SignTx,
    },
    coins::CoinInfo,
    serializer::TxHeader,
};

use super::Error;

/// Maximum number of inputs per signing session
pub const MAX_INPUTS: usize = 256;

/// Zcash transaction versions accepted for signing
const ZCASH_VERSIONS: [u32; 2] = [4, 5];

/// First Zcash transaction version with an overwintered header
const ZCASH_OVERWINTER_VERSION: u32 = 3;

/// Check overwinter / expiry fields against the coin
fn check_extensions(
    coin: &CoinInfo,
    expiry: Option<u32>,
    version_group_id: Option<u32>,
    branch_id: Option<u32>,
) -> Result<(), Error> {
    if expiry.is_some() && !(coin.decred || coin.overwintered) {
        return Err(Error::UnexpectedField);
    }

    if !coin.overwintered && (version_group_id.is_some() || branch_id.is_some()) {
        return Err(Error::UnexpectedField);
    }

    Ok(())
}

/// Validate a [SignTx] header, returning the session [TxHeader]
pub fn check_header(coin: &CoinInfo, tx: &SignTx) -> Result<TxHeader, Error> {
    if tx.inputs_count == 0 || tx.outputs_count == 0 {
        return Err(Error::InvalidCount);
    }
    if tx.inputs_count as usize > MAX_INPUTS {
        return Err(Error::InvalidCount);
    }

    check_extensions(coin, tx.expiry, tx.version_group_id, tx.branch_id)?;

    if coin.overwintered {
        if tx.version_group_id.is_none() || tx.branch_id.is_none() {
            return Err(Error::MissingField);
        }
        if !ZCASH_VERSIONS.contains(&tx.version) {
            return Err(Error::UnsupportedVersion);
        }
    }

    Ok(TxHeader {
        version: tx.version,
        lock_time: tx.lock_time,
        inputs_count: tx.inputs_count,
        outputs_count: tx.outputs_count,
        expiry: tx.expiry.unwrap_or(0),
        version_group_id: tx.version_group_id,
        branch_id: tx.branch_id.unwrap_or(0),
    })
}

/// Validate previous transaction metadata, returning its [TxHeader]
pub fn check_prev_header(coin: &CoinInfo, tx: &PrevTx) -> Result<TxHeader, Error> {
    check_extensions(coin, tx.expiry, tx.version_group_id, tx.branch_id)?;

    if tx.extra_data_len > 0 && !coin.extra_data {
        return Err(Error::UnexpectedField);
    }

    if coin.overwintered {
        if tx.version >= 5 {
            return Err(Error::UnsupportedPrevTx);
        }
        if tx.version >= ZCASH_OVERWINTER_VERSION && tx.version_group_id.is_none() {
            return Err(Error::MissingField);
        }
    }

    Ok(TxHeader {
        version: tx.version,
        lock_time: tx.lock_time,
        inputs_count: tx.inputs_count,
        outputs_count: tx.outputs_count,
        expiry: tx.expiry.unwrap_or(0),
        version_group_id: tx.version_group_id,
        branch_id: tx.branch_id.unwrap_or(0),
    })
}

/// Validate a multisig descriptor
pub fn check_multisig(m: &Multisig) -> Result<(), Error> {
    let n = m.n();

    if m.pubkeys.len() % PUBKEY_LEN != 0 || n == 0 || n > MAX_MULTISIG_KEYS {
        return Err(Error::MultisigMismatch);
    }
    if m.m == 0 || m.m as usize > n {
        return Err(Error::MultisigMismatch);
    }

    Ok(())
}

/// Replacement is available for coins with Bitcoin style transactions
fn check_replacement(coin: &CoinInfo, orig_hash: Option<&[u8; 32]>) -> Result<(), Error> {
    match orig_hash.is_some() && (coin.decred || coin.overwintered) {
        true => Err(Error::UnexpectedField),
        false => Ok(()),
    }
}

/// Validate a transaction input
pub fn check_input(coin: &CoinInfo, txi: &TxInput) -> Result<(), Error> {
    check_replacement(coin, txi.orig_hash.as_ref())?;
    check_input_fields(coin, txi, false)
}

/// Validate an input of the transaction being replaced, where owned inputs
/// carry their signatures
pub fn check_orig_input(coin: &CoinInfo, txi: &TxInput) -> Result<(), Error> {
    if txi.orig_hash.is_some() {
        return Err(Error::UnexpectedField);
    }
    check_input_fields(coin, txi, true)
}

fn check_input_fields(coin: &CoinInfo, txi: &TxInput, signed: bool) -> Result<(), Error> {
    use InputScriptType::*;

    match (&txi.multisig, txi.script_type) {
        (Some(m), SpendMultisig | SpendP2shWitness | SpendWitness) => check_multisig(m)?,
        (Some(_), _) => return Err(Error::UnexpectedField),
        (None, SpendMultisig) => return Err(Error::MissingField),
        _ => (),
    }

    match txi.script_type {
        External => {
            if !txi.address_n.is_empty() {
                return Err(Error::UnexpectedField);
            }
            if txi.script_pubkey.is_none() {
                return Err(Error::MissingField);
            }
        }
        _ => {
            if txi.address_n.is_empty() {
                return Err(Error::MissingField);
            }
            if txi.script_pubkey.is_some() {
                return Err(Error::UnexpectedField);
            }
            if !signed && (txi.script_sig.is_some() || txi.witness.is_some()) {
                return Err(Error::UnexpectedField);
            }
        }
    }

    if txi.script_type.is_segwit() && !coin.segwit {
        return Err(Error::UnsupportedScriptType);
    }
    if txi.script_type == SpendTaproot && !coin.taproot {
        return Err(Error::UnsupportedScriptType);
    }

    if coin.decred {
        if txi.script_type != SpendAddress {
            return Err(Error::UnsupportedScriptType);
        }
    } else if txi.decred_tree.is_some() {
        return Err(Error::UnexpectedField);
    }

    Ok(())
}

/// Validate a transaction output
pub fn check_output(coin: &CoinInfo, txo: &TxOutput) -> Result<(), Error> {
    check_replacement(coin, txo.orig_hash.as_ref())?;

    if txo.script_type == OutputScriptType::PayToOpReturn {
        if txo.amount != 0 {
            return Err(Error::InvalidAmount);
        }
        if txo.address.is_some() || !txo.address_n.is_empty() {
            return Err(Error::UnexpectedField);
        }
        if txo.op_return_data.is_none() {
            return Err(Error::MissingField);
        }
        return Ok(());
    }

    if txo.op_return_data.is_some() {
        return Err(Error::UnexpectedField);
    }
    if txo.address.is_none() && txo.address_n.is_empty() {
        return Err(Error::MissingField);
    }

    if !txo.address_n.is_empty() {
        match txo.script_type {
            OutputScriptType::PayToWitness | OutputScriptType::PayToP2shWitness if !coin.segwit => {
                return Err(Error::UnsupportedScriptType)
            }
            OutputScriptType::PayToTaproot if !coin.taproot => {
                return Err(Error::UnsupportedScriptType)
            }
            _ => (),
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        apdu::prev::PrevTx,
        coins::{BITCOIN, DECRED, ZCASH},
        paths::HARDENED,
    };

    const H: u32 = HARDENED;

    #[test]
    fn headers() {
        let tests = &[
            (&BITCOIN, SignTx::new("Bitcoin", 2, 0, 1, 1), Ok(())),
            (&BITCOIN, SignTx::new("Bitcoin", 2, 0, 0, 1), Err(Error::InvalidCount)),
            (&BITCOIN, SignTx::new("Bitcoin", 2, 0, 1, 0), Err(Error::InvalidCount)),
            (
                &BITCOIN,
                SignTx::new("Bitcoin", 2, 0, 1, 1).with_expiry(10),
                Err(Error::UnexpectedField),
            ),
            (
                &BITCOIN,
                SignTx::new("Bitcoin", 2, 0, 1, 1).with_overwinter(1, 2),
                Err(Error::UnexpectedField),
            ),
            (&DECRED, SignTx::new("Decred", 1, 0, 1, 1).with_expiry(0), Ok(())),
            (&ZCASH, SignTx::new("Zcash", 5, 0, 1, 1), Err(Error::MissingField)),
            (
                &ZCASH,
                SignTx::new("Zcash", 3, 0, 1, 1).with_overwinter(0x03c48270, 0x5ba81b19),
                Err(Error::UnsupportedVersion),
            ),
            (
                &ZCASH,
                SignTx::new("Zcash", 5, 0, 1, 1).with_overwinter(0x26a7270a, 0xc2d6d0b4),
                Ok(()),
            ),
        ];

        for (coin, tx, r) in tests {
            assert_eq!(
                check_header(coin, tx).map(|_| ()),
                *r,
                "header check {tx:?}"
            );
        }
    }

    #[test]
    fn prev_headers() {
        let mut p = PrevTx::new(5, 0, 1, 1);
        p.version_group_id = Some(0x26a7270a);
        p.branch_id = Some(0xc2d6d0b4);
        assert_eq!(
            check_prev_header(&ZCASH, &p).map(|_| ()),
            Err(Error::UnsupportedPrevTx)
        );

        let mut p = PrevTx::new(1, 0, 1, 1);
        p.extra_data_len = 10;
        assert_eq!(
            check_prev_header(&BITCOIN, &p).map(|_| ()),
            Err(Error::UnexpectedField)
        );
        assert!(check_prev_header(&ZCASH, &p).is_ok());
    }

    #[test]
    fn inputs() {
        let path = [84 | H, H, H, 0, 0];
        let pubkeys = [0x02u8; PUBKEY_LEN * 2];

        let tests = &[
            (
                TxInput::new(&path, [0u8; 32], 0, 10, InputScriptType::SpendWitness),
                Ok(()),
            ),
            (
                TxInput::new(&[], [0u8; 32], 0, 10, InputScriptType::SpendWitness),
                Err(Error::MissingField),
            ),
            (
                TxInput {
                    script_pubkey: Some(&[0x51]),
                    ..TxInput::new(&path, [0u8; 32], 0, 10, InputScriptType::SpendWitness)
                },
                Err(Error::UnexpectedField),
            ),
            (
                TxInput::new(&[], [0u8; 32], 0, 10, InputScriptType::External),
                Err(Error::MissingField),
            ),
            (
                TxInput::new(&path, [0u8; 32], 0, 10, InputScriptType::SpendMultisig),
                Err(Error::MissingField),
            ),
            (
                TxInput {
                    multisig: Some(Multisig::new(3, &pubkeys, &[])),
                    ..TxInput::new(&path, [0u8; 32], 0, 10, InputScriptType::SpendMultisig)
                },
                Err(Error::MultisigMismatch),
            ),
            (
                TxInput {
                    multisig: Some(Multisig::new(1, &pubkeys, &[])),
                    ..TxInput::new(&path, [0u8; 32], 0, 10, InputScriptType::SpendAddress)
                },
                Err(Error::UnexpectedField),
            ),
            (
                TxInput {
                    decred_tree: Some(0),
                    ..TxInput::new(&path, [0u8; 32], 0, 10, InputScriptType::SpendAddress)
                },
                Err(Error::UnexpectedField),
            ),
        ];

        for (txi, r) in tests {
            assert_eq!(check_input(&BITCOIN, txi), *r, "input check {txi:?}");
        }

        // Segwit not available for Decred / Zcash
        let txi = TxInput::new(&path, [0u8; 32], 0, 10, InputScriptType::SpendWitness);
        assert_eq!(check_input(&DECRED, &txi), Err(Error::UnsupportedScriptType));
        assert_eq!(check_input(&ZCASH, &txi), Err(Error::UnsupportedScriptType));
    }

    #[test]
    fn replacement_inputs() {
        let path = [84 | H, H, H, 0, 0];
        let witness = [0x02, 0x01, 0xff, 0x01, 0xee];

        let signed = TxInput {
            witness: Some(&witness),
            ..TxInput::new(&path, [0u8; 32], 0, 10, InputScriptType::SpendWitness)
        };
        assert_eq!(check_input(&BITCOIN, &signed), Err(Error::UnexpectedField));
        assert_eq!(check_orig_input(&BITCOIN, &signed), Ok(()));

        // Original inputs can not themselves reference a replaced transaction
        let nested = TxInput {
            orig_hash: Some([0x11; 32]),
            ..signed.clone()
        };
        assert_eq!(check_orig_input(&BITCOIN, &nested), Err(Error::UnexpectedField));

        let replacing = TxInput {
            orig_hash: Some([0x11; 32]),
            ..TxInput::new(&path, [0u8; 32], 0, 10, InputScriptType::SpendAddress)
        };
        assert_eq!(check_input(&BITCOIN, &replacing), Ok(()));
        assert_eq!(check_input(&DECRED, &replacing), Err(Error::UnexpectedField));

        let txo = TxOutput {
            orig_hash: Some([0x11; 32]),
            ..TxOutput::to_address("bc1qexample", 10)
        };
        assert_eq!(check_output(&BITCOIN, &txo), Ok(()));
        assert_eq!(check_output(&ZCASH, &txo), Err(Error::UnexpectedField));
    }

    #[test]
    fn outputs() {
        let tests = &[
            (TxOutput::to_address("bc1qexample", 10), Ok(())),
            (TxOutput::op_return(&[0xaa]), Ok(())),
            (
                TxOutput {
                    amount: 1,
                    ..TxOutput::op_return(&[0xaa])
                },
                Err(Error::InvalidAmount),
            ),
            (
                TxOutput {
                    address: None,
                    ..TxOutput::to_address("", 10)
                },
                Err(Error::MissingField),
            ),
        ];

        for (txo, r) in tests {
            assert_eq!(check_output(&BITCOIN, txo), *r, "output check {txo:?}");
        }

        let txo = TxOutput::to_path(&[84 | H, 20 | H, H, 1, 0], 10, OutputScriptType::PayToWitness);
        assert_eq!(check_output(&ZCASH, &txo), Err(Error::UnsupportedScriptType));
    }
}
