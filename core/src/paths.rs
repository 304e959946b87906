// Copyright (c) 2022-2023 The MobileCoin Foundation

//! BIP-0032 derivation path helpers and wallet path policy

use crate::{
    apdu::{input::InputScriptType, output::OutputScriptType},
    coins::CoinInfo,
};

/// Hardened derivation flag
pub const HARDENED: u32 = 0x8000_0000;

/// Maximum permitted address index
pub const MAX_ADDRESS_INDEX: u32 = 1_000_000;

/// Maximum permitted chain (0: receive, 1: change)
pub const MAX_CHAIN: u32 = 1;

pub const PURPOSE_BIP44: u32 = 44 | HARDENED;
pub const PURPOSE_BIP48: u32 = 48 | HARDENED;
pub const PURPOSE_BIP49: u32 = 49 | HARDENED;
pub const PURPOSE_BIP84: u32 = 84 | HARDENED;
pub const PURPOSE_BIP86: u32 = 86 | HARDENED;

/// Check whether a path component is hardened
pub const fn is_hardened(c: u32) -> bool {
    c & HARDENED != 0
}

/// Check an input path matches the purpose / coin / account schema expected
/// for its script type.
///
/// Paths failing this check are not rejected, but require user confirmation.
pub fn input_path_matches(coin: &CoinInfo, path: &[u32], script_type: InputScriptType) -> bool {
    let purpose = match path.first() {
        Some(p) => *p,
        None => return false,
    };

    let allowed = match (purpose, script_type) {
        (PURPOSE_BIP44, InputScriptType::SpendAddress | InputScriptType::SpendMultisig) => true,
        (
            PURPOSE_BIP48,
            InputScriptType::SpendMultisig
            | InputScriptType::SpendP2shWitness
            | InputScriptType::SpendWitness,
        ) => true,
        (PURPOSE_BIP49, InputScriptType::SpendP2shWitness) => coin.segwit,
        (PURPOSE_BIP84, InputScriptType::SpendWitness) => coin.segwit,
        (PURPOSE_BIP86, InputScriptType::SpendTaproot) => coin.taproot,
        _ => false,
    };

    if !allowed {
        return false;
    }

    // BIP-0048 paths carry an additional script type component
    let len = match purpose {
        PURPOSE_BIP48 => 6,
        _ => 5,
    };

    if path.len() != len {
        return false;
    }

    // Purpose, coin type and account must be hardened
    if path[1] != (coin.slip44 | HARDENED) || !is_hardened(path[2]) {
        return false;
    }

    if purpose == PURPOSE_BIP48 && !is_hardened(path[3]) {
        return false;
    }

    let (chain, index) = (path[len - 2], path[len - 1]);
    chain <= MAX_CHAIN && index <= MAX_ADDRESS_INDEX
}

/// Map a change output script type to the input script type it spends as
pub fn change_input_type(script_type: OutputScriptType) -> Option<InputScriptType> {
    match script_type {
        OutputScriptType::PayToAddress => Some(InputScriptType::SpendAddress),
        OutputScriptType::PayToScriptHash => Some(InputScriptType::SpendMultisig),
        OutputScriptType::PayToWitness => Some(InputScriptType::SpendWitness),
        OutputScriptType::PayToP2shWitness => Some(InputScriptType::SpendP2shWitness),
        OutputScriptType::PayToTaproot => Some(InputScriptType::SpendTaproot),
        OutputScriptType::PayToOpReturn => None,
    }
}

/// Tracks a value common to every element observed, `None` once elements disagree
#[derive(Clone, PartialEq, Debug)]
pub enum MatchChecker<T> {
    /// No elements observed
    Empty,
    /// All elements matched this value
    Matched(T),
    /// Elements disagreed
    Mismatch,
}

impl<T> Default for MatchChecker<T> {
    fn default() -> Self {
        Self::Empty
    }
}

impl<T: PartialEq> MatchChecker<T> {
    /// Add an observed value
    pub fn add(&mut self, v: T) {
        match self {
            Self::Empty => *self = Self::Matched(v),
            Self::Matched(m) if *m == v => (),
            _ => *self = Self::Mismatch,
        }
    }

    /// Mark elements as inconsistent
    pub fn mismatch(&mut self) {
        *self = Self::Mismatch;
    }

    /// Check whether a value matches the common value
    pub fn check(&self, v: &T) -> bool {
        match self {
            Self::Matched(m) => m == v,
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coins::{BITCOIN, LITECOIN, TESTNET};

    const H: u32 = HARDENED;

    #[test]
    fn input_paths() {
        let tests: &[(&CoinInfo, &[u32], InputScriptType, bool)] = &[
            (&BITCOIN, &[44 | H, H, H, 0, 0], InputScriptType::SpendAddress, true),
            (&BITCOIN, &[84 | H, H, H, 1, 7], InputScriptType::SpendWitness, true),
            (&BITCOIN, &[86 | H, H, H, 0, 0], InputScriptType::SpendTaproot, true),
            (&TESTNET, &[49 | H, 1 | H, H, 1, 0], InputScriptType::SpendP2shWitness, true),
            (&TESTNET, &[48 | H, 1 | H, H, 2 | H, 0, 0], InputScriptType::SpendWitness, true),
            // Purpose / script type mismatch
            (&TESTNET, &[49 | H, 1 | H, H, 0, 0], InputScriptType::SpendWitness, false),
            // Wrong coin type
            (&BITCOIN, &[44 | H, 1 | H, H, 0, 0], InputScriptType::SpendAddress, false),
            // Unhardened account
            (&BITCOIN, &[44 | H, H, 0, 0, 0], InputScriptType::SpendAddress, false),
            // Chain / index out of range
            (&BITCOIN, &[44 | H, H, H, 2, 0], InputScriptType::SpendAddress, false),
            (&BITCOIN, &[44 | H, H, H, 0, 1_000_001], InputScriptType::SpendAddress, false),
            // Taproot not supported
            (&LITECOIN, &[86 | H, 2 | H, H, 0, 0], InputScriptType::SpendTaproot, false),
            (&BITCOIN, &[], InputScriptType::SpendAddress, false),
        ];

        for (coin, path, script_type, ok) in tests {
            assert_eq!(
                input_path_matches(coin, path, *script_type),
                *ok,
                "path {path:08x?} ({script_type:?})"
            );
        }
    }

    #[test]
    fn match_checker() {
        let mut m = MatchChecker::default();
        assert!(!m.check(&1));

        m.add(1);
        m.add(1);
        assert!(m.check(&1));
        assert!(!m.check(&2));

        m.add(2);
        assert_eq!(m, MatchChecker::Mismatch);
        assert!(!m.check(&1));
    }
}
