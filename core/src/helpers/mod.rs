// Copyright (c) 2022-2023 The MobileCoin Foundation

use core::str::from_utf8;

use emstr::{helpers::Fractional, EncodeStr};

use crate::coins::CoinInfo;

/// Maximum significant characters rendered before truncation
const MAX_SF: usize = 18;

// Format helper for amounts in the coin's display unit
pub fn fmt_amount<'a>(value: u64, coin: &CoinInfo, buff: &'a mut [u8]) -> &'a str {
    let scalar = 10i64.pow(coin.decimals);

    let value = match i64::try_from(value) {
        Ok(v) => v,
        Err(_) => return "INVALID_AMOUNT",
    };

    // Compute and write value using scalar
    let mut n = match emstr::write!(&mut buff[..], Fractional::<i64>::new(value, scalar)) {
        Ok(v) => v,
        Err(_) => return "ENCODE_ERR",
    };

    // Backtrack and truncate values if max chars is exceeded
    if n > MAX_SF {
        n = MAX_SF;
        buff[n] = b'.';
        buff[n + 1] = b'.';
        n += 2;
    }

    match emstr::write!(&mut buff[n..], ' ', coin.coin_shortcut) {
        Ok(v) => n += v,
        Err(_) => return "ENCODE_ERR",
    }

    match from_utf8(&buff[..n]) {
        Ok(v) => v,
        Err(_) => "INVALID_UTF8",
    }
}
