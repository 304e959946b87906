// Copyright (c) 2022-2023 The MobileCoin Foundation

/// Error kinds reported to the host / UI
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ErrorKind {
    /// Malformed or inconsistent host-supplied data
    DataError,
    /// User declined a confirmation
    ActionCancelled,
    /// Unsupported operation or protocol misuse
    ProcessError,
    /// Unknown coin or transaction version
    Unsupported,
}

/// [Engine][super::Engine] errors
#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "thiserror", derive(thiserror::Error))]
#[repr(u8)]
pub enum Error {
    /// Invalid argument length
    #[cfg_attr(feature = "thiserror", error("Invalid argument length"))]
    InvalidLength = 0x00,

    /// Unexpected event
    #[cfg_attr(feature = "thiserror", error("Unexpected event"))]
    UnexpectedEvent = 0x01,

    /// Signing error
    #[cfg_attr(feature = "thiserror", error("Signing error"))]
    SignError = 0x03,

    /// Invalid engine state
    #[cfg_attr(feature = "thiserror", error("invalid engine state"))]
    InvalidState = 0x0a,

    /// Message encoding failed
    #[cfg_attr(feature = "thiserror", error("message encoding failed"))]
    EncodingFailed = 0x0b,

    /// Pending user approval
    #[cfg_attr(feature = "thiserror", error("pending user approval"))]
    ApprovalPending = 0x0c,

    /// Input / output / header count invalid
    #[cfg_attr(feature = "thiserror", error("invalid element count"))]
    InvalidCount = 0x10,

    /// Required field missing
    #[cfg_attr(feature = "thiserror", error("missing field"))]
    MissingField = 0x11,

    /// Field not permitted in this context
    #[cfg_attr(feature = "thiserror", error("unexpected field"))]
    UnexpectedField = 0x12,

    /// Script type not valid in this context
    #[cfg_attr(feature = "thiserror", error("invalid script type"))]
    InvalidScriptType = 0x13,

    /// Address could not be decoded for this coin
    #[cfg_attr(feature = "thiserror", error("invalid address"))]
    InvalidAddress = 0x14,

    /// Amount invalid for this element
    #[cfg_attr(feature = "thiserror", error("invalid amount"))]
    InvalidAmount = 0x15,

    /// Amount totals overflowed
    #[cfg_attr(feature = "thiserror", error("amount overflow"))]
    AmountOverflow = 0x16,

    /// Outputs exceed inputs (negative fee)
    #[cfg_attr(feature = "thiserror", error("not enough funds"))]
    NotEnoughFunds = 0x17,

    /// Recomputed previous transaction hash does not match
    #[cfg_attr(feature = "thiserror", error("previous transaction hash mismatch"))]
    PrevHashMismatch = 0x18,

    /// Transaction data changed between passes
    #[cfg_attr(feature = "thiserror", error("transaction has changed during signing"))]
    TxChanged = 0x19,

    /// Declared change script does not match the derived script
    #[cfg_attr(feature = "thiserror", error("change output mismatch"))]
    ChangeMismatch = 0x1a,

    /// Signature digest requested before all elements were added
    #[cfg_attr(feature = "thiserror", error("digest not ready"))]
    DigestNotReady = 0x1b,

    /// Elements added do not match declared counts
    #[cfg_attr(feature = "thiserror", error("element count mismatch"))]
    CountMismatch = 0x1c,

    /// Multisig descriptor invalid or does not match
    #[cfg_attr(feature = "thiserror", error("multisig mismatch"))]
    MultisigMismatch = 0x1d,

    /// Previous output index out of range
    #[cfg_attr(feature = "thiserror", error("previous output index out of range"))]
    PrevIndexOutOfRange = 0x20,

    /// Unsupported script version
    #[cfg_attr(feature = "thiserror", error("unsupported script version"))]
    ScriptVersion = 0x21,

    /// Derivation path not available to this signer
    #[cfg_attr(feature = "thiserror", error("forbidden key path"))]
    ForbiddenKeyPath = 0x22,

    /// Script type not supported for this operation
    #[cfg_attr(feature = "thiserror", error("unsupported script type"))]
    UnsupportedScriptType = 0x23,

    /// Bounded buffer exhausted
    #[cfg_attr(feature = "thiserror", error("buffer overflow"))]
    BufferOverflow = 0x24,

    /// Write to finalized / closed digest
    #[cfg_attr(feature = "thiserror", error("digest already finalized"))]
    DigestFinalized = 0x25,

    /// Previous transaction format not supported for verification
    #[cfg_attr(feature = "thiserror", error("unsupported previous transaction"))]
    UnsupportedPrevTx = 0x26,

    /// Supplied signature malformed or not valid for the signed digest
    #[cfg_attr(feature = "thiserror", error("invalid signature"))]
    InvalidSignature = 0x27,

    /// Replacement transaction does not match or reduces payments of the original
    #[cfg_attr(feature = "thiserror", error("invalid replacement transaction"))]
    InvalidReplacement = 0x28,

    /// Unknown coin
    #[cfg_attr(feature = "thiserror", error("unknown coin"))]
    UnknownCoin = 0x30,

    /// Unsupported transaction version
    #[cfg_attr(feature = "thiserror", error("unsupported transaction version"))]
    UnsupportedVersion = 0x31,

    /// User declined a confirmation
    #[cfg_attr(feature = "thiserror", error("action cancelled"))]
    ActionCancelled = 0x40,

    /// Unknown / not-yet defined error (placeholder)
    #[cfg_attr(feature = "thiserror", error("unknown"))]
    Unknown = 0xf0,
}

impl Error {
    /// Map error to the kind reported to the host
    pub fn kind(&self) -> ErrorKind {
        use Error::*;

        match self {
            InvalidLength | InvalidCount | MissingField | UnexpectedField | InvalidScriptType
            | InvalidAddress | InvalidAmount | AmountOverflow | NotEnoughFunds
            | PrevHashMismatch | TxChanged | ChangeMismatch | DigestNotReady | CountMismatch
            | MultisigMismatch | InvalidSignature => ErrorKind::DataError,
            ActionCancelled => ErrorKind::ActionCancelled,
            UnknownCoin | UnsupportedVersion => ErrorKind::Unsupported,
            UnexpectedEvent | SignError | InvalidState | EncodingFailed | ApprovalPending
            | PrevIndexOutOfRange | ScriptVersion | ForbiddenKeyPath | UnsupportedScriptType
            | BufferOverflow | DigestFinalized | UnsupportedPrevTx | InvalidReplacement
            | Unknown => {
                ErrorKind::ProcessError
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn error_kinds() {
        let tests = &[
            (Error::NotEnoughFunds, ErrorKind::DataError),
            (Error::PrevHashMismatch, ErrorKind::DataError),
            (Error::TxChanged, ErrorKind::DataError),
            (Error::ChangeMismatch, ErrorKind::DataError),
            (Error::DigestNotReady, ErrorKind::DataError),
            (Error::InvalidSignature, ErrorKind::DataError),
            (Error::ActionCancelled, ErrorKind::ActionCancelled),
            (Error::UnexpectedEvent, ErrorKind::ProcessError),
            (Error::UnsupportedScriptType, ErrorKind::ProcessError),
            (Error::InvalidReplacement, ErrorKind::ProcessError),
            (Error::UnknownCoin, ErrorKind::Unsupported),
            (Error::UnsupportedVersion, ErrorKind::Unsupported),
        ];

        for (e, k) in tests {
            assert_eq!(e.kind(), *k, "kind mismatch for {e:?}");
        }
    }
}
