// Copyright (c) 2022-2023 The MobileCoin Foundation

use encdec::Decode;

use crate::apdu::{prelude::*, ApduError, ApduStatic};

/// [`Engine`][super::Engine] input events, typically decoded from request [APDUs][crate::apdu]
#[derive(Clone, Debug)]
pub enum Event<'a> {
    None,

    /// Start a signing session
    SignTx(SignTx<'a>),

    /// Transaction input, in response to a `TXINPUT` request
    TxInput(TxInput<'a>),

    /// Transaction output, in response to a `TXOUTPUT` request
    TxOutput(TxOutput<'a>),

    /// Previous transaction metadata, in response to a `TXMETA` request
    PrevMeta(PrevTx),

    /// Previous transaction input
    PrevInput(PrevInput<'a>),

    /// Previous transaction output
    PrevOutput(PrevOutput<'a>),

    /// Previous transaction extra data chunk
    PrevExtraData(&'a [u8]),

    /// Poll for the outstanding request
    TxPoll,

    /// Cancel the active session
    TxCancel,
}

fn decode_event<'a, T>(buff: &'a [u8]) -> Result<Event, ApduError>
where
    T: Decode<'a, Error = ApduError>,
    Event<'a>: From<T::Output>,
{
    T::decode(buff).map(|(v, _n)| Event::from(v))
}

impl<'a> Event<'a> {
    /// Parse an incoming APDU to engine event
    #[cfg_attr(feature = "noinline", inline(never))]
    pub fn parse(ins: u8, buff: &'a [u8]) -> Result<Self, ApduError> {
        match ins {
            SignTx::INS => decode_event::<SignTx>(buff),
            TxInput::INS => decode_event::<TxInput>(buff),
            TxOutput::INS => decode_event::<TxOutput>(buff),

            PrevTx::INS => decode_event::<PrevTx>(buff),
            PrevInput::INS => decode_event::<PrevInput>(buff),
            PrevOutput::INS => decode_event::<PrevOutput>(buff),
            PrevExtraData::INS => decode_event::<PrevExtraData>(buff),

            TxPoll::INS => decode_event::<TxPoll>(buff),
            TxCancel::INS => decode_event::<TxCancel>(buff),

            _ => Err(ApduError::InvalidEncoding),
        }
    }

    /// Compute a SHA512_256 hash for state-mutating events,
    /// used in the construction of the streaming digest.
    ///
    /// This calls out to [crate::apdu::digest] methods for
    /// consistency between events and APDUs.
    pub fn hash(&self) -> Option<[u8; 32]> {
        use crate::apdu::digest::*;

        let h = match self {
            Event::SignTx(tx) => digest_sign_tx(tx),
            Event::TxInput(txi) => digest_tx_input(txi),
            Event::TxOutput(txo) => digest_tx_output(txo),
            Event::PrevMeta(meta) => digest_prev_meta(meta),
            Event::PrevInput(txi) => digest_prev_input(txi),
            Event::PrevOutput(txo) => digest_prev_output(txo),
            Event::PrevExtraData(chunk) => digest_prev_extra_data(chunk),

            // Polling and cancellation do not alter the session
            Event::None | Event::TxPoll | Event::TxCancel => return None,
        };

        Some(h)
    }
}

impl<'a> From<SignTx<'a>> for Event<'a> {
    fn from(a: SignTx<'a>) -> Self {
        Event::SignTx(a)
    }
}

impl<'a> From<TxInput<'a>> for Event<'a> {
    fn from(a: TxInput<'a>) -> Self {
        Event::TxInput(a)
    }
}

impl<'a> From<TxOutput<'a>> for Event<'a> {
    fn from(a: TxOutput<'a>) -> Self {
        Event::TxOutput(a)
    }
}

impl<'a> From<PrevTx> for Event<'a> {
    fn from(a: PrevTx) -> Self {
        Event::PrevMeta(a)
    }
}

impl<'a> From<PrevInput<'a>> for Event<'a> {
    fn from(a: PrevInput<'a>) -> Self {
        Event::PrevInput(a)
    }
}

impl<'a> From<PrevOutput<'a>> for Event<'a> {
    fn from(a: PrevOutput<'a>) -> Self {
        Event::PrevOutput(a)
    }
}

impl<'a> From<PrevExtraData<'a>> for Event<'a> {
    fn from(a: PrevExtraData<'a>) -> Self {
        Event::PrevExtraData(a.chunk)
    }
}

impl<'a> From<TxPoll> for Event<'a> {
    fn from(_: TxPoll) -> Self {
        Event::TxPoll
    }
}

impl<'a> From<TxCancel> for Event<'a> {
    fn from(_: TxCancel) -> Self {
        Event::TxCancel
    }
}
