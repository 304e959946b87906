// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Per-coin signing parameters and policy

/// Coin parameters, used to select address encodings, hashing and
/// fee policy for a signing session
#[derive(Clone, PartialEq, Debug)]
pub struct CoinInfo {
    /// Coin name, matched against `SignTx.coin_name`
    pub coin_name: &'static str,
    /// Ticker, used when displaying amounts
    pub coin_shortcut: &'static str,
    /// Number of decimal places in one coin
    pub decimals: u32,
    /// Base58 P2PKH address version
    pub address_type: u32,
    /// Base58 P2SH address version
    pub address_type_p2sh: u32,
    /// Fee threshold (per 1000 virtual bytes) above which a high fee warning is raised
    pub maxfee_kb: u64,
    /// Segwit supported
    pub segwit: bool,
    /// Taproot supported
    pub taproot: bool,
    /// Bech32 human readable part for segwit addresses
    pub bech32_prefix: Option<&'static str>,
    /// Fork id (replay protection), signed with `SIGHASH_FORKID`
    pub fork_id: Option<u32>,
    /// Always use BIP-0143 signature hashing
    pub force_bip143: bool,
    /// Decred hashing and serialization
    pub decred: bool,
    /// Zcash overwinter / sapling / NU5 transactions
    pub overwintered: bool,
    /// Previous transactions may carry extra data
    pub extra_data: bool,
    /// Signature digests are double hashed
    pub sign_hash_double: bool,
    /// SLIP-0044 coin type
    pub slip44: u32,
}

impl CoinInfo {
    /// Base coin definition, used to build the table below
    const fn base(coin_name: &'static str, coin_shortcut: &'static str, slip44: u32) -> Self {
        Self {
            coin_name,
            coin_shortcut,
            decimals: 8,
            address_type: 0,
            address_type_p2sh: 5,
            maxfee_kb: 0,
            segwit: false,
            taproot: false,
            bech32_prefix: None,
            fork_id: None,
            force_bip143: false,
            decred: false,
            overwintered: false,
            extra_data: false,
            sign_hash_double: true,
            slip44,
        }
    }

    /// Compute the signature hash type for this coin
    pub fn sighash_type(&self) -> u32 {
        match self.fork_id {
            Some(f) => SIGHASH_ALL | SIGHASH_FORKID | (f << 8),
            None => SIGHASH_ALL,
        }
    }
}

/// Sign all inputs and outputs
pub const SIGHASH_ALL: u32 = 0x01;

/// Fork id flag for replay protected coins
pub const SIGHASH_FORKID: u32 = 0x40;

/// Taproot default hash type (implicit `SIGHASH_ALL`, no trailing byte)
pub const SIGHASH_ALL_TAPROOT: u8 = 0x00;

pub const BITCOIN: CoinInfo = CoinInfo {
    maxfee_kb: 2_000_000,
    segwit: true,
    taproot: true,
    bech32_prefix: Some("bc"),
    ..CoinInfo::base("Bitcoin", "BTC", 0)
};

pub const TESTNET: CoinInfo = CoinInfo {
    address_type: 111,
    address_type_p2sh: 196,
    maxfee_kb: 10_000_000,
    segwit: true,
    taproot: true,
    bech32_prefix: Some("tb"),
    ..CoinInfo::base("Testnet", "TEST", 1)
};

pub const BCASH: CoinInfo = CoinInfo {
    maxfee_kb: 500_000,
    fork_id: Some(0),
    force_bip143: true,
    ..CoinInfo::base("Bcash", "BCH", 145)
};

pub const LITECOIN: CoinInfo = CoinInfo {
    address_type: 48,
    address_type_p2sh: 50,
    maxfee_kb: 67_000_000,
    segwit: true,
    bech32_prefix: Some("ltc"),
    ..CoinInfo::base("Litecoin", "LTC", 2)
};

pub const DECRED: CoinInfo = CoinInfo {
    address_type: 0x073f,
    address_type_p2sh: 0x071a,
    maxfee_kb: 1_000_000,
    decred: true,
    sign_hash_double: false,
    ..CoinInfo::base("Decred", "DCR", 42)
};

pub const DECRED_TESTNET: CoinInfo = CoinInfo {
    address_type: 0x0f21,
    address_type_p2sh: 0x0efc,
    maxfee_kb: 10_000_000,
    decred: true,
    sign_hash_double: false,
    ..CoinInfo::base("Decred Testnet", "TDCR", 1)
};

pub const ZCASH: CoinInfo = CoinInfo {
    address_type: 0x1cb8,
    address_type_p2sh: 0x1cbd,
    maxfee_kb: 1_000_000,
    overwintered: true,
    extra_data: true,
    ..CoinInfo::base("Zcash", "ZEC", 133)
};

pub const ZCASH_TESTNET: CoinInfo = CoinInfo {
    address_type: 0x1d25,
    address_type_p2sh: 0x1cba,
    maxfee_kb: 10_000_000,
    overwintered: true,
    extra_data: true,
    ..CoinInfo::base("Zcash Testnet", "TAZ", 1)
};

/// Default coin table
pub const COINS: &[CoinInfo] = &[
    BITCOIN,
    TESTNET,
    BCASH,
    LITECOIN,
    DECRED,
    DECRED_TESTNET,
    ZCASH,
    ZCASH_TESTNET,
];

/// Find a coin by name in the provided table
pub fn by_name<'a>(coins: &'a [CoinInfo], name: &str) -> Option<&'a CoinInfo> {
    coins.iter().find(|c| c.coin_name == name)
}
