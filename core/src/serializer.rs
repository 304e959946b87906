// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction wire serialization
//!
//! Elements are written one at a time to a [Writer], either the bounded chunk
//! returned to the host or a hash context. Coin-family differences (Decred prefix
//! encoding, Zcash overwintered headers and shielded trailers) are selected from the
//! [CoinInfo].

use crate::{
    coins::CoinInfo,
    engine::Error,
    writer::{write_prefixed, write_reversed, write_u16, write_u32, write_u64, write_u8, Writer},
};

/// Overwintered transaction version flag (Zcash)
pub const OVERWINTERED: u32 = 0x8000_0000;

/// Decred full serialization (prefix and witness)
pub const DECRED_SERIALIZE_FULL: u32 = 0 << 16;
/// Decred prefix-only serialization
pub const DECRED_SERIALIZE_NO_WITNESS: u32 = 1 << 16;
/// Decred witness serialization for signing
pub const DECRED_SERIALIZE_WITNESS_SIGNING: u32 = 3 << 16;

/// Decred output script version
pub const DECRED_SCRIPT_VERSION: u16 = 0;

/// Transaction header fields, shared by the transaction being signed
/// and previous transactions streamed for verification
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TxHeader {
    pub version: u32,
    pub lock_time: u32,
    pub inputs_count: u32,
    pub outputs_count: u32,
    pub expiry: u32,
    /// Version group, present for overwintered transactions
    pub version_group_id: Option<u32>,
    pub branch_id: u32,
}

impl TxHeader {
    /// Check whether this is an overwintered (Zcash v3+) transaction
    pub fn overwintered(&self) -> bool {
        self.version_group_id.is_some()
    }
}

/// Write the transaction header
pub fn write_tx_header<W: Writer>(
    w: &mut W,
    coin: &CoinInfo,
    h: &TxHeader,
    witness_marker: bool,
) -> Result<(), Error> {
    if coin.decred {
        let v = match witness_marker {
            true => h.version | DECRED_SERIALIZE_FULL,
            false => h.version | DECRED_SERIALIZE_NO_WITNESS,
        };
        return write_u32(w, v);
    }

    if let Some(vgid) = h.version_group_id {
        write_u32(w, h.version | OVERWINTERED)?;
        write_u32(w, vgid)?;

        // v5 moves branch, lock time and expiry into the header
        if h.version >= 5 {
            write_u32(w, h.branch_id)?;
            write_u32(w, h.lock_time)?;
            write_u32(w, h.expiry)?;
        }
        return Ok(());
    }

    write_u32(w, h.version)?;
    if witness_marker {
        w.write(&[0x00, 0x01])?;
    }

    Ok(())
}

/// Write the transaction footer for the transaction being signed
pub fn write_tx_footer<W: Writer>(w: &mut W, coin: &CoinInfo, h: &TxHeader) -> Result<(), Error> {
    if coin.decred {
        write_u32(w, h.lock_time)?;
        return write_u32(w, h.expiry);
    }

    if h.overwintered() {
        if h.version < 5 {
            write_u32(w, h.lock_time)?;
            write_u32(w, h.expiry)?;
            // Sapling value balance
            write_u64(w, 0)?;
        }

        // Empty shielded spends, outputs and joinsplits / actions
        return w.write(&[0x00, 0x00, 0x00]);
    }

    write_u32(w, h.lock_time)
}

/// Write the footer of a previous transaction, any extra data follows
pub fn write_prev_tx_footer<W: Writer>(
    w: &mut W,
    coin: &CoinInfo,
    h: &TxHeader,
) -> Result<(), Error> {
    write_u32(w, h.lock_time)?;

    if coin.decred || h.overwintered() {
        write_u32(w, h.expiry)?;
    }

    Ok(())
}

/// Write a transaction outpoint
pub fn write_outpoint<W: Writer>(w: &mut W, prev_hash: &[u8; 32], prev_index: u32) -> Result<(), Error> {
    write_reversed(w, prev_hash)?;
    write_u32(w, prev_index)
}

/// Write a transaction input, Decred inputs carry the tree in place of the script
pub fn write_tx_input<W: Writer>(
    w: &mut W,
    coin: &CoinInfo,
    prev_hash: &[u8; 32],
    prev_index: u32,
    script: &[u8],
    sequence: u32,
    decred_tree: Option<u8>,
) -> Result<(), Error> {
    write_outpoint(w, prev_hash, prev_index)?;

    match coin.decred {
        true => write_u8(w, decred_tree.unwrap_or(0))?,
        false => write_prefixed(w, script)?,
    }

    write_u32(w, sequence)
}

/// Write a transaction output
pub fn write_tx_output<W: Writer>(
    w: &mut W,
    coin: &CoinInfo,
    amount: u64,
    script_pubkey: &[u8],
    script_version: u16,
) -> Result<(), Error> {
    write_u64(w, amount)?;

    if coin.decred {
        write_u16(w, script_version)?;
    }

    write_prefixed(w, script_pubkey)
}

/// Write a Decred input witness (value and fraud proof)
pub fn write_decred_witness<W: Writer>(w: &mut W, amount: u64, script_sig: &[u8]) -> Result<(), Error> {
    write_u64(w, amount)?;
    // Block height and index fraud proof
    write_u32(w, 0)?;
    write_u32(w, 0xffff_ffff)?;
    write_prefixed(w, script_sig)
}

#[cfg(test)]
mod test {
    use heapless::Vec;

    use super::*;
    use crate::coins::{BITCOIN, DECRED, ZCASH};

    type Buff = Vec<u8, 256>;

    #[test]
    fn bitcoin_header_footer() {
        let h = TxHeader {
            version: 1,
            inputs_count: 1,
            outputs_count: 2,
            ..Default::default()
        };

        let mut b = Buff::new();
        write_tx_header(&mut b, &BITCOIN, &h, true).unwrap();
        assert_eq!(hex::encode(&b), "010000000001");

        let mut b = Buff::new();
        write_tx_header(&mut b, &BITCOIN, &h, false).unwrap();
        write_tx_footer(&mut b, &BITCOIN, &h).unwrap();
        assert_eq!(hex::encode(&b), "0100000000000000");
    }

    #[test]
    fn zcash_v5_header_footer() {
        let h = TxHeader {
            version: 5,
            version_group_id: Some(0x26a7270a),
            branch_id: 0xc2d6d0b4,
            ..Default::default()
        };

        let mut b = Buff::new();
        write_tx_header(&mut b, &ZCASH, &h, false).unwrap();
        assert_eq!(hex::encode(&b), "050000800a27a726b4d0d6c20000000000000000");

        let mut b = Buff::new();
        write_tx_footer(&mut b, &ZCASH, &h).unwrap();
        assert_eq!(hex::encode(&b), "000000");
    }

    #[test]
    fn zcash_v4_footer() {
        let h = TxHeader {
            version: 4,
            version_group_id: Some(0x892f2085),
            expiry: 0x11,
            ..Default::default()
        };

        let mut b = Buff::new();
        write_tx_header(&mut b, &ZCASH, &h, false).unwrap();
        write_tx_footer(&mut b, &ZCASH, &h).unwrap();
        assert_eq!(
            hex::encode(&b),
            "0400008085202f8900000000110000000000000000000000000000"
        );
    }

    #[test]
    fn decred_elements() {
        let h = TxHeader {
            version: 1,
            ..Default::default()
        };

        let mut b = Buff::new();
        write_tx_header(&mut b, &DECRED, &h, false).unwrap();
        assert_eq!(hex::encode(&b), "01000100");

        let mut hash = [0u8; 32];
        hash[31] = 0xaa;

        let mut b = Buff::new();
        write_tx_input(&mut b, &DECRED, &hash, 2, &[0x51], 0xffff_ffff, Some(1)).unwrap();
        assert_eq!(b.len(), 32 + 4 + 1 + 4);
        assert_eq!(b[0], 0xaa);
        assert_eq!(b[36], 0x01);

        let mut b = Buff::new();
        write_tx_output(&mut b, &DECRED, 5, &[0x51], DECRED_SCRIPT_VERSION).unwrap();
        assert_eq!(hex::encode(&b), "050000000000000000000151");
    }
}
