// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Address encoding and decoding (Base58Check and bech32 / bech32m)

use alloc::{string::String, vec::Vec};

use bech32::{FromBase32, ToBase32, Variant};

use crate::{
    coins::CoinInfo,
    engine::Error,
    hash::{blake256d, sha256d},
    scripts::{
        is_p2pkh, is_p2sh, output_script_native_segwit, output_script_p2pkh, output_script_p2sh,
        parse_witness_program, Script,
    },
};

/// Maximum encoded address length
pub const MAX_ADDRESS_LEN: usize = 128;

/// Encode an address version as big-endian bytes without leading zeros
fn version_bytes(v: u32) -> ([u8; 4], usize) {
    let b = v.to_be_bytes();
    let n = match v {
        0..=0xff => 1,
        0x100..=0xffff => 2,
        0x1_0000..=0xff_ffff => 3,
        _ => 4,
    };
    (b, 4 - n)
}

fn checksum(coin: &CoinInfo, d: &[u8]) -> [u8; 4] {
    let h = match coin.decred {
        true => blake256d(d),
        false => sha256d(d),
    };
    [h[0], h[1], h[2], h[3]]
}

/// Encode a Base58Check address with the provided version and payload
pub fn encode_base58(coin: &CoinInfo, version: u32, payload: &[u8]) -> String {
    let (v, offset) = version_bytes(version);

    let mut d = Vec::with_capacity(4 + payload.len() + 4);
    d.extend_from_slice(&v[offset..]);
    d.extend_from_slice(payload);

    let c = checksum(coin, &d);
    d.extend_from_slice(&c);

    bs58::encode(d).into_string()
}

/// Decode a Base58Check address into `(version, payload)`
pub fn decode_base58(coin: &CoinInfo, addr: &str) -> Result<Vec<u8>, Error> {
    let d = bs58::decode(addr)
        .into_vec()
        .map_err(|_| Error::InvalidAddress)?;

    if d.len() < 5 {
        return Err(Error::InvalidAddress);
    }

    let (body, c) = d.split_at(d.len() - 4);
    if checksum(coin, body) != c {
        return Err(Error::InvalidAddress);
    }

    Ok(body.to_vec())
}

/// Encode a segwit address from witness version and program
pub fn encode_segwit(hrp: &str, version: u8, program: &[u8]) -> Result<String, Error> {
    let variant = match version {
        0 => Variant::Bech32,
        _ => Variant::Bech32m,
    };

    let mut data = Vec::with_capacity(1 + program.len() * 8 / 5 + 1);
    data.push(bech32::u5::try_from_u8(version).map_err(|_| Error::InvalidAddress)?);
    data.extend_from_slice(&program.to_base32());

    bech32::encode(hrp, data, variant).map_err(|_| Error::InvalidAddress)
}

/// Decode a segwit address, returning `(version, program)`
pub fn decode_segwit(hrp: &str, addr: &str) -> Result<(u8, Vec<u8>), Error> {
    let (h, data, variant) = bech32::decode(addr).map_err(|_| Error::InvalidAddress)?;
    if h != hrp || data.is_empty() {
        return Err(Error::InvalidAddress);
    }

    let version = data[0].to_u8();
    let program = Vec::<u8>::from_base32(&data[1..]).map_err(|_| Error::InvalidAddress)?;

    // Version 0 uses bech32 with 20 or 32 byte programs, later versions bech32m
    match (version, variant) {
        (0, Variant::Bech32) if program.len() == 20 || program.len() == 32 => (),
        (1..=16, Variant::Bech32m) if (2..=40).contains(&program.len()) => (),
        _ => return Err(Error::InvalidAddress),
    }

    Ok((version, program))
}

/// Decode an address string to the matching output script
pub fn address_to_script(coin: &CoinInfo, addr: &str) -> Result<Script, Error> {
    // Segwit addresses
    if let Some(hrp) = coin.bech32_prefix {
        let lower = addr.to_ascii_lowercase();
        if lower.len() > hrp.len() && lower.starts_with(hrp) && lower.as_bytes()[hrp.len()] == b'1'
        {
            let (version, program) = decode_segwit(hrp, addr)?;
            if version == 1 && !coin.taproot {
                return Err(Error::InvalidAddress);
            }
            return output_script_native_segwit(version, &program);
        }
    }

    // Base58 addresses
    let d = decode_base58(coin, addr)?;

    for (version, p2sh) in [(coin.address_type, false), (coin.address_type_p2sh, true)] {
        let (v, offset) = version_bytes(version);
        let prefix = &v[offset..];

        if d.len() != prefix.len() + 20 || &d[..prefix.len()] != prefix {
            continue;
        }

        let mut h = [0u8; 20];
        h.copy_from_slice(&d[prefix.len()..]);

        return Ok(match p2sh {
            false => output_script_p2pkh(&h),
            true => output_script_p2sh(&h),
        });
    }

    Err(Error::InvalidAddress)
}

/// Encode an output script as an address, for display
pub fn script_to_address(coin: &CoinInfo, script: &[u8]) -> Result<String, Error> {
    if is_p2pkh(script) {
        return Ok(encode_base58(coin, coin.address_type, &script[3..23]));
    }

    if is_p2sh(script) {
        return Ok(encode_base58(coin, coin.address_type_p2sh, &script[2..22]));
    }

    match (parse_witness_program(script), coin.bech32_prefix) {
        (Some((version, program)), Some(hrp)) => encode_segwit(hrp, version, program),
        _ => Err(Error::InvalidAddress),
    }
}
