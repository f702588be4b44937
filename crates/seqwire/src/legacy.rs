//! Entry points kept for source compatibility.

use crate::error::{SeqError, SeqResult};

/// Parse a control-device identifier into a card number.
///
/// The hw transport never resolved these; always fails.
#[deprecated(note = "the hw sequencer is not addressed by control id")]
pub fn parse_control_id(_id: &str) -> SeqResult<u32> {
    Err(SeqError::NotSupported("parse_control_id"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(deprecated)]
    fn test_parse_control_id_unsupported() {
        for id in ["", "hw:0", "default"] {
            let err = parse_control_id(id).unwrap_err();
            assert!(matches!(err, SeqError::NotSupported(_)));
            assert_eq!(err.code(), -libc::ENOTTY);
        }
    }
}
