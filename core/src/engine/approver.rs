// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Transaction policy and user confirmation prompts.
//!
//! The [Approver] accumulates input and output totals during pass 1 and queues
//! a [Prompt] for each property of the transaction the user must confirm.
//! Prompts are resolved one at a time via [Engine::approve][super::Engine::approve]
//! or [Engine::deny][super::Engine::deny].

use heapless::{Deque, String, Vec};

use crate::{apdu::Path, coins::CoinInfo};

use super::{replacement::OrigTotals, Error};

/// Maximum number of queued prompts
pub const MAX_PROMPTS: usize = 8;

/// Maximum OP_RETURN payload shown to the user
pub const MAX_OP_RETURN_LEN: usize = 80;

/// Maximum displayed address length
pub const MAX_DISPLAY_ADDRESS_LEN: usize = 128;

/// More change outputs than this require confirmation
pub const MAX_SILENT_CHANGE_COUNT: u32 = 1;

/// User confirmation prompts
#[derive(Clone, PartialEq, Debug)]
pub enum Prompt {
    /// Input path does not match the coin's expected schema
    ForeignPath { index: u32, path: Path },
    /// Input not owned by this device
    ExternalInput { index: u32, amount: u64 },
    /// Output to an external address
    Output {
        index: u32,
        amount: u64,
        address: String<MAX_DISPLAY_ADDRESS_LEN>,
    },
    /// OP_RETURN data output
    OpReturn {
        index: u32,
        data: Vec<u8, MAX_OP_RETURN_LEN>,
    },
    /// More change outputs than expected
    ChangeCountOverThreshold { count: u32 },
    /// Fee exceeds the coin fee policy
    FeeOverThreshold { fee: u64, threshold: u64 },
    /// Transaction lock time is set, `disabled` if every input sequence is final
    NonDefaultLocktime { lock_time: u32, disabled: bool },
    /// Final amount confirmation
    Total { spending: u64, fee: u64 },
    /// Final amount confirmation for transactions with external inputs
    JointTotal { spending: u64, total: u64 },
    /// Transaction replaces `txid`, `finalize` if it opts the original out of
    /// replace-by-fee
    ConfirmReplacement { txid: [u8; 32], finalize: bool },
    /// External output amount reduced from the original transaction
    ModifyOutput {
        index: u32,
        orig_amount: u64,
        amount: u64,
    },
    /// Fee changed from the original transaction
    ModifyFee { orig_fee: u64, fee: u64 },
}

impl Prompt {
    /// Build an output prompt
    pub fn output(index: u32, amount: u64, address: &str) -> Result<Self, Error> {
        let mut a = String::new();
        a.push_str(address).map_err(|_| Error::InvalidLength)?;

        Ok(Self::Output {
            index,
            amount,
            address: a,
        })
    }

    /// Build an OP_RETURN prompt, data is truncated for display
    pub fn op_return(index: u32, data: &[u8]) -> Self {
        let n = data.len().min(MAX_OP_RETURN_LEN);

        Self::OpReturn {
            index,
            data: Vec::from_slice(&data[..n]).unwrap_or_default(),
        }
    }
}

/// Transaction totals and prompt queue
#[derive(Clone, Debug, Default)]
pub struct Approver {
    prompts: Deque<Prompt, MAX_PROMPTS>,

    total_in: u64,
    external_in: u64,
    total_out: u64,
    change_out: u64,
    change_count: u32,
}

impl Approver {
    pub const fn new() -> Self {
        Self {
            prompts: Deque::new(),
            total_in: 0,
            external_in: 0,
            total_out: 0,
            change_out: 0,
            change_count: 0,
        }
    }

    /// Queue a prompt for the user
    pub fn push(&mut self, p: Prompt) -> Result<(), Error> {
        #[cfg(feature = "log")]
        log::debug!("prompt: {:?}", p);

        self.prompts.push_back(p).map_err(|_| Error::BufferOverflow)
    }

    /// Fetch the prompt currently displayed
    pub fn current(&self) -> Option<&Prompt> {
        self.prompts.front()
    }

    /// Resolve the current prompt
    pub fn pop(&mut self) -> Option<Prompt> {
        self.prompts.pop_front()
    }

    /// Number of unresolved prompts
    pub fn pending(&self) -> usize {
        self.prompts.len()
    }

    /// Account for an input amount
    pub fn add_input(&mut self, amount: u64, external: bool) -> Result<(), Error> {
        self.total_in = self
            .total_in
            .checked_add(amount)
            .ok_or(Error::AmountOverflow)?;

        if external {
            self.external_in = self
                .external_in
                .checked_add(amount)
                .ok_or(Error::AmountOverflow)?;
        }

        Ok(())
    }

    /// Account for an output amount
    pub fn add_output(&mut self, amount: u64, change: bool) -> Result<(), Error> {
        self.total_out = self
            .total_out
            .checked_add(amount)
            .ok_or(Error::AmountOverflow)?;

        if change {
            self.change_out = self
                .change_out
                .checked_add(amount)
                .ok_or(Error::AmountOverflow)?;
            self.change_count += 1;
        }

        Ok(())
    }

    /// Transaction fee, fails if outputs exceed inputs
    pub fn fee(&self) -> Result<u64, Error> {
        self.total_in
            .checked_sub(self.total_out)
            .ok_or(Error::NotEnoughFunds)
    }

    /// Apply transaction-wide policy once all outputs are known, queueing the
    /// summary prompts
    pub fn finish(
        &mut self,
        coin: &CoinInfo,
        vsize: u64,
        lock_time: u32,
        sequences_final: bool,
    ) -> Result<(), Error> {
        let fee = self.fee()?;

        if self.change_count > MAX_SILENT_CHANGE_COUNT {
            self.push(Prompt::ChangeCountOverThreshold {
                count: self.change_count,
            })?;
        }

        self.check_fee(coin, vsize, fee)?;

        if lock_time != 0 {
            self.push(Prompt::NonDefaultLocktime {
                lock_time,
                disabled: sequences_final,
            })?;
        }

        // Change and external inputs are both returned to the wallet so are
        // excluded from the amount spent
        let total = self.total_in - self.change_out.min(self.total_in);

        match self.external_in {
            0 => self.push(Prompt::Total {
                spending: total,
                fee,
            }),
            _ => self.push(Prompt::JointTotal {
                spending: total.saturating_sub(self.external_in),
                total,
            }),
        }
    }

    /// Apply policy for a transaction replacing `orig`, which must pay external
    /// outputs no less and keep its effective lock time
    ///
    /// The fee change replaces the summary prompts.
    pub fn finish_replacement(
        &mut self,
        coin: &CoinInfo,
        vsize: u64,
        lock_time: u32,
        orig: &OrigTotals,
    ) -> Result<(), Error> {
        let fee = self.fee()?;
        let orig_fee = orig
            .total_in
            .checked_sub(orig.total_out)
            .ok_or(Error::InvalidReplacement)?;

        if self.change_count > MAX_SILENT_CHANGE_COUNT {
            self.push(Prompt::ChangeCountOverThreshold {
                count: self.change_count,
            })?;
        }

        self.check_fee(coin, vsize, fee)?;

        let spent = self.total_out - self.change_out;
        let orig_spent = orig.total_out - orig.change_out;
        if spent > orig_spent {
            #[cfg(feature = "log")]
            log::warn!("replacement pays {} externally, original {}", spent, orig_spent);

            return Err(Error::InvalidReplacement);
        }

        if lock_time != orig.lock_time {
            return Err(Error::InvalidReplacement);
        }

        if fee != orig_fee {
            self.push(Prompt::ModifyFee { orig_fee, fee })?;
        }

        Ok(())
    }

    fn check_fee(&mut self, coin: &CoinInfo, vsize: u64, fee: u64) -> Result<(), Error> {
        let threshold = fee_threshold(coin, vsize);
        match fee > threshold {
            true => self.push(Prompt::FeeOverThreshold { fee, threshold }),
            false => Ok(()),
        }
    }
}

/// Compute the maximum fee accepted without warning for a transaction of `vsize`
pub fn fee_threshold(coin: &CoinInfo, vsize: u64) -> u64 {
    coin.maxfee_kb.saturating_mul(vsize) / 1000
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::coins::{BITCOIN, TESTNET};

    fn drain(a: &mut Approver) -> alloc::vec::Vec<Prompt> {
        core::iter::from_fn(|| a.pop()).collect()
    }

    #[test]
    fn total_prompt() {
        let mut a = Approver::new();
        a.add_input(12_300_000, false).unwrap();
        a.add_output(5_000_000, false).unwrap();
        a.add_output(7_289_000, true).unwrap();

        a.finish(&TESTNET, 200, 0, true).unwrap();

        assert_eq!(
            drain(&mut a),
            &[Prompt::Total {
                spending: 5_011_000,
                fee: 11_000
            }]
        );
    }

    #[test]
    fn policy_prompts() {
        let mut a = Approver::new();
        a.add_input(1_000_000, false).unwrap();
        a.add_output(100, true).unwrap();
        a.add_output(100, true).unwrap();

        // Fee well over 2000 sat/vB on 100 vB
        a.finish(&BITCOIN, 100, 500_000, false).unwrap();

        assert_eq!(
            drain(&mut a),
            &[
                Prompt::ChangeCountOverThreshold { count: 2 },
                Prompt::FeeOverThreshold {
                    fee: 999_800,
                    threshold: 200_000
                },
                Prompt::NonDefaultLocktime {
                    lock_time: 500_000,
                    disabled: false
                },
                Prompt::Total {
                    spending: 999_800,
                    fee: 999_800
                },
            ]
        );
    }

    #[test]
    fn joint_total() {
        let mut a = Approver::new();
        a.add_input(60_000, false).unwrap();
        a.add_input(40_000, true).unwrap();
        a.add_output(90_000, false).unwrap();

        a.finish(&TESTNET, 200, 0, true).unwrap();

        assert_eq!(
            drain(&mut a),
            &[Prompt::JointTotal {
                spending: 60_000,
                total: 100_000
            }]
        );
    }

    #[test]
    fn negative_fee() {
        let mut a = Approver::new();
        a.add_input(1_000, false).unwrap();
        a.add_output(1_001, false).unwrap();

        assert_eq!(a.fee(), Err(Error::NotEnoughFunds));
        assert_eq!(a.finish(&TESTNET, 100, 0, true), Err(Error::NotEnoughFunds));
    }

    #[test]
    fn replacement_fee_bump() {
        let orig = OrigTotals {
            total_in: 100_000,
            total_out: 99_000,
            change_out: 49_000,
            lock_time: 0,
        };

        let mut a = Approver::new();
        a.add_input(100_000, false).unwrap();
        a.add_output(50_000, false).unwrap();
        a.add_output(48_000, true).unwrap();

        a.finish_replacement(&TESTNET, 200, 0, &orig).unwrap();

        // No summary, only the fee change
        assert_eq!(
            drain(&mut a),
            &[Prompt::ModifyFee {
                orig_fee: 1_000,
                fee: 2_000
            }]
        );

        // Unchanged fee is accepted silently
        let mut a = Approver::new();
        a.add_input(100_000, false).unwrap();
        a.add_output(50_000, false).unwrap();
        a.add_output(49_000, true).unwrap();

        a.finish_replacement(&TESTNET, 200, 0, &orig).unwrap();
        assert_eq!(a.pending(), 0);
    }

    #[test]
    fn replacement_policy() {
        let orig = OrigTotals {
            total_in: 100_000,
            total_out: 99_000,
            change_out: 49_000,
            lock_time: 0,
        };

        let approver = |external, change| {
            let mut a = Approver::new();
            a.add_input(100_000, false).unwrap();
            a.add_output(external, false).unwrap();
            a.add_output(change, true).unwrap();
            a
        };

        // Paying external outputs more
        assert_eq!(
            approver(51_000, 47_000).finish_replacement(&TESTNET, 200, 0, &orig),
            Err(Error::InvalidReplacement)
        );

        // Changing the lock time
        assert_eq!(
            approver(50_000, 48_000).finish_replacement(&TESTNET, 200, 700_000, &orig),
            Err(Error::InvalidReplacement)
        );

        // Negative fees
        assert_eq!(
            approver(50_000, 50_001).finish_replacement(&TESTNET, 200, 0, &orig),
            Err(Error::NotEnoughFunds)
        );
        let bad = OrigTotals {
            total_out: 100_001,
            ..orig
        };
        assert_eq!(
            approver(50_000, 48_000).finish_replacement(&TESTNET, 200, 0, &bad),
            Err(Error::InvalidReplacement)
        );
    }

    #[test]
    fn amount_overflow() {
        let mut a = Approver::new();
        a.add_input(u64::MAX, false).unwrap();
        assert_eq!(a.add_input(1, false), Err(Error::AmountOverflow));

        a.add_output(u64::MAX, false).unwrap();
        assert_eq!(a.add_output(1, true), Err(Error::AmountOverflow));
    }

    #[test]
    fn op_return_truncated() {
        let data = [0xab; 100];
        match Prompt::op_return(2, &data) {
            Prompt::OpReturn { index, data } => {
                assert_eq!(index, 2);
                assert_eq!(data.len(), MAX_OP_RETURN_LEN);
            }
            p => panic!("unexpected prompt {p:?}"),
        }
    }
}
