// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Script construction for outputs, script signatures and witnesses

use heapless::Vec;

use crate::{
    engine::Error,
    writer::{op_push_len, varint_len, write_op_push, write_prefixed, write_varint, Writer},
};

/// Maximum script pubkey / redeem script length
pub const MAX_SCRIPT_LEN: usize = 520;

/// Maximum script signature length (15-of-15 P2SH multisig)
pub const MAX_SCRIPT_SIG_LEN: usize = 1650;

/// Script pubkey / redeem script
pub type Script = Vec<u8, MAX_SCRIPT_LEN>;

/// Script signature
pub type ScriptSig = Vec<u8, MAX_SCRIPT_SIG_LEN>;

/// Maximum stack items parsed from a witness or script signature
pub const MAX_STACK_ITEMS: usize = 20;

/// Stack items pushed by a witness or script signature
pub type StackItems<'a> = Vec<&'a [u8], MAX_STACK_ITEMS>;

pub const OP_0: u8 = 0x00;
pub const OP_1: u8 = 0x51;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_DUP: u8 = 0x76;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKMULTISIG: u8 = 0xae;

fn push_data<W: Writer>(w: &mut W, d: &[u8]) -> Result<(), Error> {
    write_op_push(w, d.len())?;
    w.write(d)
}

fn script_from(parts: &[&[u8]]) -> Result<Script, Error> {
    let mut s = Script::new();
    for p in parts {
        s.write(p)?;
    }
    Ok(s)
}

/// `OP_DUP OP_HASH160 <h160> OP_EQUALVERIFY OP_CHECKSIG`
pub fn output_script_p2pkh(h160: &[u8; 20]) -> Script {
    let mut s = Script::new();
    // Fixed 25-byte script always fits
    let _ = s.write(&[OP_DUP, OP_HASH160, 20]);
    let _ = s.write(h160);
    let _ = s.write(&[OP_EQUALVERIFY, OP_CHECKSIG]);
    s
}

/// `OP_HASH160 <h160> OP_EQUAL`
pub fn output_script_p2sh(h160: &[u8; 20]) -> Script {
    let mut s = Script::new();
    let _ = s.write(&[OP_HASH160, 20]);
    let _ = s.write(h160);
    let _ = s.write(&[OP_EQUAL]);
    s
}

/// Native segwit output `<version> <program>`
pub fn output_script_native_segwit(version: u8, program: &[u8]) -> Result<Script, Error> {
    if version > 16 || !(2..=40).contains(&program.len()) {
        return Err(Error::InvalidAddress);
    }

    let v = match version {
        0 => OP_0,
        _ => OP_1 + version - 1,
    };

    script_from(&[&[v, program.len() as u8], program])
}

/// Taproot output `OP_1 <x-only key>`
pub fn output_script_p2tr(output_key: &[u8; 32]) -> Script {
    let mut s = Script::new();
    let _ = s.write(&[OP_1, 32]);
    let _ = s.write(output_key);
    s
}

/// `OP_RETURN <data>`
pub fn output_script_op_return(data: &[u8]) -> Result<Script, Error> {
    let mut s = Script::new();
    s.write(&[OP_RETURN])?;
    push_data(&mut s, data)?;
    Ok(s)
}

/// `OP_m <pubkey>... OP_n OP_CHECKMULTISIG` redeem script
pub fn output_script_multisig<'a>(
    pubkeys: impl Iterator<Item = &'a [u8]>,
    m: u8,
) -> Result<Script, Error> {
    if !(1..=15).contains(&m) {
        return Err(Error::MultisigMismatch);
    }

    let mut s = Script::new();
    s.write(&[OP_1 + m - 1])?;

    let mut n = 0u8;
    for p in pubkeys {
        push_data(&mut s, p)?;
        n += 1;
    }

    if m > n || n > 15 {
        return Err(Error::MultisigMismatch);
    }

    s.write(&[OP_1 + n - 1, OP_CHECKMULTISIG])?;
    Ok(s)
}

/// Check whether a script is a P2PKH output
pub fn is_p2pkh(s: &[u8]) -> bool {
    s.len() == 25
        && s[..3] == [OP_DUP, OP_HASH160, 20]
        && s[23..] == [OP_EQUALVERIFY, OP_CHECKSIG]
}

/// Check whether a script is a P2SH output
pub fn is_p2sh(s: &[u8]) -> bool {
    s.len() == 23 && s[..2] == [OP_HASH160, 20] && s[22] == OP_EQUAL
}

/// Parse a native segwit output, returning `(version, program)`
pub fn parse_witness_program(s: &[u8]) -> Option<(u8, &[u8])> {
    if s.len() < 4 || s.len() > 42 || s[1] as usize != s.len() - 2 {
        return None;
    }

    let v = match s[0] {
        OP_0 => 0,
        v @ OP_1..=0x60 => v - OP_1 + 1,
        _ => return None,
    };

    Some((v, &s[2..]))
}

fn read_varint(d: &[u8]) -> Option<(u64, &[u8])> {
    let (&b, rest) = d.split_first()?;

    let n = match b {
        0xfd => 2,
        0xfe => 4,
        0xff => 8,
        v => return Some((v as u64, rest)),
    };
    if rest.len() < n {
        return None;
    }

    let mut v = [0u8; 8];
    v[..n].copy_from_slice(&rest[..n]);
    Some((u64::from_le_bytes(v), &rest[n..]))
}

fn take(d: &[u8], len: usize) -> Option<(&[u8], &[u8])> {
    (d.len() >= len).then(|| d.split_at(len))
}

/// Split a serialized witness into its stack items
pub fn parse_witness(w: &[u8]) -> Option<StackItems<'_>> {
    let (n, mut rest) = read_varint(w)?;
    let mut items = StackItems::new();

    for _ in 0..n {
        let (len, r) = read_varint(rest)?;
        let (item, r) = take(r, usize::try_from(len).ok()?)?;

        items.push(item).ok()?;
        rest = r;
    }

    rest.is_empty().then_some(items)
}

/// Split a push-only script signature into its stack items
pub fn parse_pushes(s: &[u8]) -> Option<StackItems<'_>> {
    let mut rest = s;
    let mut items = StackItems::new();

    while let Some((&op, r)) = rest.split_first() {
        let (len, r) = match op {
            0x01..=0x4b => (op as usize, r),
            0x4c => {
                let (n, r) = take(r, 1)?;
                (n[0] as usize, r)
            }
            0x4d => {
                let (n, r) = take(r, 2)?;
                (u16::from_le_bytes([n[0], n[1]]) as usize, r)
            }
            _ => return None,
        };

        let (item, r) = take(r, len)?;
        items.push(item).ok()?;
        rest = r;
    }

    Some(items)
}

/// P2PKH script signature `<sig||hash_type> <pubkey>`
pub fn input_script_p2pkh(sig: &[u8], hash_type: u8, pubkey: &[u8]) -> Result<ScriptSig, Error> {
    let mut s = ScriptSig::new();
    write_op_push(&mut s, sig.len() + 1)?;
    s.write(sig)?;
    s.write(&[hash_type])?;
    push_data(&mut s, pubkey)?;
    Ok(s)
}

/// Nested P2WPKH script signature, pushing the `0 <h160>` redeem script
pub fn input_script_p2wpkh_in_p2sh(h160: &[u8; 20]) -> ScriptSig {
    let mut s = ScriptSig::new();
    let _ = s.write(&[0x16, OP_0, 20]);
    let _ = s.write(h160);
    s
}

/// Nested P2WSH script signature, pushing the `0 <sha256>` redeem script
pub fn input_script_p2wsh_in_p2sh(script_hash: &[u8; 32]) -> ScriptSig {
    let mut s = ScriptSig::new();
    let _ = s.write(&[0x22, OP_0, 32]);
    let _ = s.write(script_hash);
    s
}

/// P2SH multisig script signature `OP_0 <sig>... <redeem script>`, signatures
/// in public key order
pub fn input_script_multisig<'a>(
    signatures: impl Iterator<Item = &'a [u8]>,
    hash_type: u8,
    redeem_script: &[u8],
) -> Result<ScriptSig, Error> {
    let mut s = ScriptSig::new();
    s.write(&[OP_0])?;

    for sig in signatures {
        write_op_push(&mut s, sig.len() + 1)?;
        s.write(sig)?;
        s.write(&[hash_type])?;
    }

    push_data(&mut s, redeem_script)?;
    Ok(s)
}

/// P2WPKH witness `<sig||hash_type> <pubkey>`
pub fn write_witness_p2wpkh<W: Writer>(
    w: &mut W,
    sig: &[u8],
    hash_type: u8,
    pubkey: &[u8],
) -> Result<(), Error> {
    write_varint(w, 2)?;
    write_varint(w, sig.len() as u64 + 1)?;
    w.write(sig)?;
    w.write(&[hash_type])?;
    write_prefixed(w, pubkey)
}

/// P2WSH multisig witness `<> <sig>... <witness script>`
pub fn write_witness_multisig<'a, W: Writer>(
    w: &mut W,
    signatures: impl Iterator<Item = &'a [u8]> + Clone,
    hash_type: u8,
    witness_script: &[u8],
) -> Result<(), Error> {
    let n = signatures.clone().count();

    write_varint(w, n as u64 + 2)?;
    write_varint(w, 0)?;

    for sig in signatures {
        write_varint(w, sig.len() as u64 + 1)?;
        w.write(sig)?;
        w.write(&[hash_type])?;
    }

    write_prefixed(w, witness_script)
}

/// Taproot key path witness, the hash type byte is omitted for `SIGHASH_DEFAULT`
pub fn write_witness_p2tr<W: Writer>(w: &mut W, sig: &[u8; 64], hash_type: u8) -> Result<(), Error> {
    write_varint(w, 1)?;
    match hash_type {
        0 => write_prefixed(w, sig),
        _ => {
            write_varint(w, 65)?;
            w.write(sig)?;
            w.write(&[hash_type])
        }
    }
}

/// Length of a script signature pushing a DER signature (+hash type) and pubkey,
/// used for fee estimation
pub const fn p2pkh_script_sig_len(sig_len: usize, pubkey_len: usize) -> usize {
    op_push_len(sig_len + 1) + sig_len + 1 + op_push_len(pubkey_len) + pubkey_len
}

/// Length of a prefixed witness item
pub const fn witness_item_len(n: usize) -> usize {
    varint_len(n as u64) + n
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn standard_scripts() {
        let h = [0x14u8; 20];

        let s = output_script_p2pkh(&h);
        assert_eq!(s.len(), 25);
        assert!(is_p2pkh(&s));
        assert!(!is_p2sh(&s));

        let s = output_script_p2sh(&h);
        assert_eq!(s.len(), 23);
        assert!(is_p2sh(&s));

        let s = output_script_native_segwit(0, &h).unwrap();
        assert_eq!(&s[..2], &[0x00, 0x14]);
        assert_eq!(parse_witness_program(&s), Some((0, &h[..])));

        let s = output_script_p2tr(&[0x22; 32]);
        assert_eq!(&s[..2], &[0x51, 0x20]);
        assert_eq!(parse_witness_program(&s), Some((1, &[0x22u8; 32][..])));

        let s = output_script_op_return(b"test of the op_return data").unwrap();
        assert_eq!(
            hex::encode(&s),
            "6a1a74657374206f6620746865206f705f72657475726e2064617461"
        );
    }

    #[test]
    fn multisig_redeem_script() {
        let keys = [[0x02u8; 33], [0x03u8; 33]];

        let s = output_script_multisig(keys.iter().map(|k| &k[..]), 1).unwrap();
        assert_eq!(s.len(), 3 + 2 * 34);
        assert_eq!(s[0], 0x51);
        assert_eq!(s[s.len() - 2], 0x52);
        assert_eq!(s[s.len() - 1], OP_CHECKMULTISIG);

        assert_eq!(
            output_script_multisig(keys.iter().map(|k| &k[..]), 3),
            Err(Error::MultisigMismatch)
        );
    }

    #[test]
    fn nested_script_sigs() {
        let h = hex::decode("d16b8c0680c61fc6ed2e407455715055e41052f5").unwrap();
        let s = input_script_p2wpkh_in_p2sh(&h.try_into().unwrap());
        assert_eq!(
            hex::encode(&s),
            "160014d16b8c0680c61fc6ed2e407455715055e41052f5"
        );
    }

    #[test]
    fn p2pkh_script_sig() {
        let sig = [0x30u8; 71];
        let pubkey = [0x02u8; 33];
        let s = input_script_p2pkh(&sig, 0x01, &pubkey).unwrap();

        assert_eq!(s.len(), p2pkh_script_sig_len(71, 33));
        assert_eq!(s[0], 72);
        assert_eq!(s[72], 0x01);
        assert_eq!(s[73], 33);
    }

    #[test]
    fn witness_items() {
        let w = parse_witness(&[0x02, 0x01, 0xff, 0x01, 0xee]).unwrap();
        assert_eq!(&w[..], &[&[0xff][..], &[0xee][..]]);

        assert_eq!(parse_witness(&[0x00]).unwrap().len(), 0);

        // Truncated item, trailing data
        assert_eq!(parse_witness(&[0x02, 0x01, 0xff, 0x02, 0xee]), None);
        assert_eq!(parse_witness(&[0x01, 0x01, 0xff, 0x00]), None);

        let sig = [0x30u8; 71];
        let pubkey = [0x02u8; 33];
        let s = input_script_p2pkh(&sig, 0x01, &pubkey).unwrap();

        let items = parse_pushes(&s).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(&items[0][..71], &sig[..]);
        assert_eq!(items[0][71], 0x01);
        assert_eq!(items[1], &pubkey[..]);

        // Opcodes other than data pushes
        assert_eq!(parse_pushes(&[OP_0, 0x01, 0xaa]), None);
    }

    #[test]
    fn taproot_witness() {
        let sig = [0xaa; 64];

        let mut w = Vec::<u8, 80>::new();
        write_witness_p2tr(&mut w, &sig, 0).unwrap();
        assert_eq!(&w[..2], &[0x01, 0x40]);
        assert_eq!(w.len(), 66);

        let mut w = Vec::<u8, 80>::new();
        write_witness_p2tr(&mut w, &sig, 0x83).unwrap();
        assert_eq!(&w[..2], &[0x01, 0x41]);
        assert_eq!(w[66], 0x83);
    }
}
