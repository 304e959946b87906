// Copyright (c) 2022-2023 The MobileCoin Foundation

use crate::{apdu::sign_tx::SignTx, coins::CoinInfo};

use super::{signer::Signer, Error};

/// Active engine function, holding the (large) per-session signer state
#[derive(Default)]
pub struct Function {
    inner: FunctionType,
}

/// Enum for internal state machines to allow storage to be shared between functions
#[allow(clippy::large_enum_variant)]
#[derive(Default)]
enum FunctionType {
    #[default]
    None,

    Sign(Signer),
}

impl Function {
    /// Create a new / empty function context
    pub const fn new() -> Self {
        Self {
            inner: FunctionType::None,
        }
    }

    /// Setup transaction signer context
    #[cfg_attr(feature = "noinline", inline(never))]
    pub fn signer_init(&mut self, coin: &'static CoinInfo, tx: &SignTx) -> Result<(), Error> {
        // Clear existing session prior to init
        self.clear();

        self.inner = FunctionType::Sign(Signer::new(coin, tx)?);

        Ok(())
    }

    /// Fetch mutable signer context
    pub fn signer(&mut self) -> Option<&mut Signer> {
        match &mut self.inner {
            FunctionType::Sign(s) => Some(s),
            _ => None,
        }
    }

    /// Fetch signer context
    pub fn signer_ref(&self) -> Option<&Signer> {
        match &self.inner {
            FunctionType::Sign(s) => Some(s),
            _ => None,
        }
    }

    /// Clear function context, dropping any session state
    pub fn clear(&mut self) {
        self.inner = FunctionType::None;
    }
}
