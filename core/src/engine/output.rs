// Copyright (c) 2022-2023 The MobileCoin Foundation

use encdec::Encode;

use crate::apdu::{self, request::TxRequest, state::TxInfo, ApduError};

use super::TxDigest;

/// [`Engine`][super::Engine] outputs (in response to events), typically encoded to response [APDUs][crate::apdu]
#[derive(Clone, PartialEq, Debug)]
pub enum Output {
    None,

    /// Engine state, `value` is the number of pending prompts
    /// or progress percentage depending on state
    State {
        state: super::State,
        value: u16,
        digest: TxDigest,
    },

    /// Engine state with the next request for the host
    Request {
        state: super::State,
        value: u16,
        digest: TxDigest,
        request: TxRequest,
    },
}

impl Output {
    /// Encode an [`Output`] object to a response [APDU]
    #[cfg_attr(feature = "noinline", inline(never))]
    pub fn encode(&self, buff: &mut [u8]) -> Result<usize, ApduError> {
        match self {
            Output::None => Ok(0),
            Output::State {
                state,
                value,
                digest,
            } => TxInfo {
                state: state.state(),
                value: *value,
                digest: digest.clone(),
            }
            .encode(buff),
            Output::Request {
                state,
                value,
                digest,
                request,
            } => {
                let n = TxInfo {
                    state: state.state(),
                    value: *value,
                    digest: digest.clone(),
                }
                .encode(buff)?;

                let m = request.encode(&mut buff[n..])?;

                Ok(n + m)
            }
        }
    }

    /// Fetch state for outputs containing this
    pub fn state(&self) -> Option<super::State> {
        match &self {
            Output::State { state, .. } | Output::Request { state, .. } => Some(*state),
            _ => None,
        }
    }

    /// Fetch digest for outputs containing this
    pub fn digest(&self) -> Option<&TxDigest> {
        match &self {
            Output::State { digest, .. } | Output::Request { digest, .. } => Some(digest),
            _ => None,
        }
    }

    /// Fetch the request for the host, if any
    pub fn request(&self) -> Option<&TxRequest> {
        match &self {
            Output::Request { request, .. } => Some(request),
            _ => None,
        }
    }
}

impl PartialEq<super::State> for Output {
    fn eq(&self, other: &super::State) -> bool {
        match self.state() {
            Some(s) => s == *other,
            None => false,
        }
    }
}

impl crate::engine::State {
    /// Map [engine](crate::engine) states to [apdu][apdu::state::TxState] states for transmission
    pub fn state(&self) -> apdu::state::TxState {
        use crate::{apdu::state::TxState, engine::State};

        match self {
            State::Init => TxState::Init,
            State::ComputeFee(_) => TxState::ComputeFee,
            State::ComputeDigests(_) => TxState::ComputeDigests,
            State::SignAndSerialize(_) => TxState::SignAndSerialize,
            State::Pending => TxState::Pending,
            State::Finished => TxState::Finished,
            State::Aborted => TxState::Aborted,
            State::Error => TxState::Error,
        }
    }
}
