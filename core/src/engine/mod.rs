// Copyright (c) 2022-2023 The MobileCoin Foundation

//! The [Engine] provides streaming transaction signing for hardware wallets.
//!
//! This handles [Event] inputs and returns [Output] responses to the caller,
//! see [apdu][crate::apdu] for APDU protocol / encoding specifications.

use rand_core::{CryptoRngCore, OsRng};
use strum::{Display, EnumIter, EnumString, EnumVariantNames};

use crate::{
    coins::{self, CoinInfo},
    keychain::Node,
};

mod function;
pub use function::Function;

mod event;
pub use event::Event;

pub use crate::apdu::state::Digest as TxDigest;

mod output;
pub use output::Output;

mod error;
pub use error::{Error, ErrorKind};

mod approver;
pub use approver::{fee_threshold, Approver, Prompt};

mod prevtx;
pub use prevtx::PrevTxVerifier;

mod replacement;
pub use replacement::{OrigTotals, OrigTxVerifier};

mod sanitize;
pub use sanitize::MAX_INPUTS;

mod signer;
pub use signer::{fingerprint, Fingerprint, Signer};

mod weight;
pub use weight::WeightCalculator;

/// Previous transaction streaming states
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub enum PrevTxState {
    /// Awaiting previous transaction metadata
    #[default]
    Meta,
    /// Awaiting previous transaction input
    Input(u32),
    /// Awaiting previous transaction output
    Output(u32),
    /// Awaiting extra data at the provided offset
    ExtraData(u32),
}

/// Element requested within a signing pass
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Stage {
    /// Transaction input
    Input(u32),
    /// Transaction output
    Output(u32),
    /// Previous transaction element for the input being verified
    PrevTx(u32, PrevTxState),
    /// Legacy digest input stream, (signed input, streamed input)
    LegacyInput(u32, u32),
    /// Legacy digest output stream, (signed input, streamed output)
    LegacyOutput(u32, u32),
    /// Input witness
    Witness(u32),
    /// Metadata of the replaced transaction, requested for the provided input
    OrigMeta(u32),
    /// Replaced transaction input, (current input, original input)
    OrigInput(u32, u32),
    /// Replaced transaction output, (current output, original output)
    OrigOutput(u32, u32),
}

impl Default for Stage {
    fn default() -> Self {
        Self::Input(0)
    }
}

/// Engine internal state enumeration
#[derive(Copy, Clone, PartialEq, Debug, EnumString, Display, EnumVariantNames, EnumIter)]
pub enum State {
    /// Idle state, no transaction running
    Init,
    /// Pass 1, sanitising inputs and outputs and computing the fee
    ComputeFee(Stage),
    /// Pass 2, verifying previous transactions
    ComputeDigests(Stage),
    /// Pass 3, signing and serializing
    SignAndSerialize(Stage),
    /// User confirmation pending
    Pending,
    /// Transaction complete
    Finished,
    /// Transaction denied / cancelled
    Aborted,
    /// Transaction failed
    Error,
}

impl State {
    /// Check whether the state is a signing pass accepting data events
    pub fn is_pass(&self) -> bool {
        matches!(
            self,
            State::ComputeFee(_) | State::ComputeDigests(_) | State::SignAndSerialize(_)
        )
    }
}

/// [Engine] provides hardware-independent support for UTXO transaction signing
///
pub struct Engine<DRV: Driver, RNG: CryptoRngCore = OsRng> {
    state: State,

    /// State resumed once pending prompts are resolved
    resume: State,

    digest: TxDigest,

    coins: &'static [CoinInfo],

    function: Function,

    drv: DRV,
    rng: RNG,
}

/// [`Driver`] trait provides platform support for [`Engine`] instances
pub trait Driver {
    /// BIP-0032 derivation for secp256k1 keys, `None` if the path is not
    /// permitted on this device
    fn derive_secp256k1(&self, path: &[u32]) -> Option<Node>;
}

impl<T: Driver> Driver for &mut T {
    fn derive_secp256k1(&self, path: &[u32]) -> Option<Node> {
        T::derive_secp256k1(self, path)
    }
}

impl<DRV: Driver> Engine<DRV> {
    /// Create a new transaction engine instance with the provided driver,
    /// using the default [OsRng]
    pub const fn new(drv: DRV) -> Self {
        Self::new_with_rng(drv, OsRng {})
    }
}

impl<DRV: Driver, RNG: CryptoRngCore> Engine<DRV, RNG> {
    /// Create a new transaction engine instance with the provided driver and rng
    pub const fn new_with_rng(drv: DRV, rng: RNG) -> Self {
        Self {
            state: State::Init,
            resume: State::Init,
            digest: TxDigest::new(),
            coins: coins::COINS,
            function: Function::new(),
            rng,
            drv,
        }
    }

    /// Replace the supported coin table
    pub fn set_coins(&mut self, coins: &'static [CoinInfo]) {
        self.coins = coins;
    }

    /// Handle incoming transaction events
    #[cfg_attr(feature = "noinline", inline(never))]
    pub fn update(&mut self, evt: &Event) -> Result<Output, Error> {
        #[cfg(feature = "log")]
        log::debug!("event: {:02x?}", evt);

        // Update state digest (only applied for mutating events)
        if let Some(h) = evt.hash() {
            self.digest.update(&h);
        }

        match (self.state, evt) {
            // Empty event, do nothing
            (_, Event::None) => (),

            // Start a new session, replacing any existing one
            (_, Event::SignTx(tx)) => {
                self.digest = TxDigest::from_random(&mut self.rng);
                self.digest.update(&tx.hash());

                let coin = match coins::by_name(self.coins, tx.coin_name) {
                    Some(c) => c,
                    None => {
                        #[cfg(feature = "log")]
                        log::warn!("unknown coin: {}", tx.coin_name);

                        return self.fail(Error::UnknownCoin);
                    }
                };

                if let Err(e) = self.function.signer_init(coin, tx) {
                    #[cfg(feature = "log")]
                    log::warn!("transaction init failed: {:?}", e);

                    return self.fail(e);
                }

                self.state = State::ComputeFee(Stage::Input(0));

                return self.request();
            }

            // Cancel from any state
            (_, Event::TxCancel) => {
                self.function.clear();
                self.state = State::Aborted;
            }

            (State::Aborted, _) => return Err(Error::ActionCancelled),

            // Report pending state while prompts remain
            (State::Pending, Event::TxPoll) => (),
            (State::Pending, _) => return Err(Error::ApprovalPending),

            // Re-send the outstanding request
            (State::Finished, Event::TxPoll) => return self.request(),
            (s, Event::TxPoll) if s.is_pass() => return self.request(),

            // Stream transaction elements to the signer
            (
                s,
                Event::TxInput(_)
                | Event::TxOutput(_)
                | Event::PrevMeta(_)
                | Event::PrevInput(_)
                | Event::PrevOutput(_)
                | Event::PrevExtraData(_),
            ) if s.is_pass() => {
                let signer = match self.function.signer() {
                    Some(s) => s,
                    None => return self.fail(Error::UnexpectedEvent),
                };

                let next = match signer.update(self.state, evt, &self.drv, &mut self.rng) {
                    Ok(v) => v,
                    Err(e) => {
                        #[cfg(feature = "log")]
                        log::warn!("{:?} failed in state {:?}: {:?}", evt, self.state, e);

                        return self.fail(e);
                    }
                };

                match signer.pending() {
                    0 => self.state = next,
                    _ => {
                        self.resume = next;
                        self.state = State::Pending;
                    }
                }

                if self.state != State::Pending {
                    return self.request();
                }
            }

            _e => {
                #[cfg(feature = "log")]
                log::error!("Unexpected event in state {:?}: {:02x?}", self.state, _e);

                return self.fail(Error::UnexpectedEvent);
            }
        }

        Ok(Output::State {
            state: self.state,
            value: self.value(),
            digest: self.digest.clone(),
        })
    }

    /// Clear the session on failure
    fn fail(&mut self, e: Error) -> Result<Output, Error> {
        self.function.clear();
        self.state = State::Error;
        Err(e)
    }

    /// Build a response containing the outstanding request
    fn request(&self) -> Result<Output, Error> {
        let request = match self.function.signer_ref() {
            Some(s) => s.request().clone(),
            None => return Err(Error::InvalidState),
        };

        Ok(Output::Request {
            state: self.state,
            value: self.value(),
            digest: self.digest.clone(),
            request,
        })
    }

    /// Value reported with the current state
    fn value(&self) -> u16 {
        match self.state {
            State::Pending => self.function.signer_ref().map(|s| s.pending()).unwrap_or(0) as u16,
            _ => self.progress().unwrap_or(0) as u16,
        }
    }

    /// Fetch current engine state
    pub fn state(&self) -> State {
        self.state
    }

    /// Fetch the session digest
    pub fn digest(&self) -> &TxDigest {
        &self.digest
    }

    /// Fetch the coin for the active session, used to format prompt amounts
    /// with [fmt_amount][crate::helpers::fmt_amount]
    pub fn coin(&self) -> Option<&'static CoinInfo> {
        self.function.signer_ref().map(|s| s.coin())
    }

    /// Fetch the prompt awaiting user confirmation
    pub fn prompt(&self) -> Option<&Prompt> {
        match self.state {
            State::Pending => self.function.signer_ref().and_then(|s| s.prompt()),
            _ => None,
        }
    }

    /// Approve the current prompt, resuming the session once none remain
    pub fn approve(&mut self) {
        if self.state != State::Pending {
            return;
        }

        let remaining = match self.function.signer() {
            Some(s) => {
                s.confirm();
                s.pending()
            }
            None => return,
        };

        if remaining == 0 {
            self.state = self.resume;
        }
    }

    /// Deny the current prompt, aborting the transaction
    pub fn deny(&mut self) {
        self.function.clear();
        self.state = State::Aborted;
    }

    /// Reset engine state
    pub fn reset(&mut self) {
        self.function.clear();
        self.state = State::Init;
    }

    /// Fetch signing progress (percentage) for the active session
    pub fn progress(&self) -> Option<usize> {
        match self.state {
            State::Finished => Some(100),
            State::Init | State::Aborted | State::Error => None,
            _ => self.function.signer_ref().map(|s| {
                let (done, total) = s.progress();
                compute_progress(done as usize, total as usize)
            }),
        }
    }
}

fn compute_progress(done: usize, total: usize) -> usize {
    // Check to avoid divide by zero
    if total == 0 {
        return 0;
    }

    let v = done * 100 / total;

    // Panic in _debug builds_ (testing only) if we exceed
    // 100% when calculating progress
    debug_assert!(v <= 100);

    // Otherwise clamp to a maximum of 100
    v.min(100)
}
