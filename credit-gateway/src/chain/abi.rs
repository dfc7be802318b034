//! Minimal Ethereum ABI encoding for the credit contract
//!
//! Only the shapes the contract uses: static `bytes32` words, one dynamic
//! `bytes` tail, `bool`/`uint256` return words and `Error(string)` revert
//! payloads.

use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::types::{Address, CiphertextHandle, CreditInputVector};

pub const SUBMIT_CREDIT_DATA: &str =
    "submitCreditData(bytes32,bytes32,bytes32,bytes32,bytes32,bytes32,bytes)";
pub const EVALUATE_LOAN: &str = "evaluateLoan()";
pub const GET_LOAN_STATUS: &str = "getLoanStatus()";
pub const HAS_CREDIT_DATA: &str = "hasCreditData()";
pub const GET_CREDIT_DATA_TIMESTAMP: &str = "getCreditDataTimestamp()";

pub const CREDIT_DATA_SUBMITTED_EVENT: &str = "CreditDataSubmitted(address,uint256)";
pub const LOAN_APPROVED_EVENT: &str = "LoanApproved(address,uint256)";
pub const LOAN_REJECTED_EVENT: &str = "LoanRejected(address,uint256)";

/// `Error(string)` selector
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

const WORD: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("return data too short: {0} bytes")]
    TooShort(usize),
    #[error("value does not fit in the target type")]
    Overflow,
    #[error("invalid bool word")]
    InvalidBool,
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// First four bytes of the Keccak-256 hash of a function signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Topic 0 of an event
pub fn event_topic(signature: &str) -> [u8; 32] {
    keccak256(signature.as_bytes())
}

/// Address left-padded to a 32-byte word (indexed topic encoding)
pub fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; WORD];
    word[12..].copy_from_slice(address.as_bytes());
    word
}

fn uint_word(value: u64) -> [u8; 32] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn pad_to_word(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// Calldata for a function without arguments
pub fn encode_call(signature: &str) -> Vec<u8> {
    selector(signature).to_vec()
}

/// Calldata for `submitCreditData`: six handle words, the offset of the proof
/// tail, then the proof length and the zero-padded proof bytes.
pub fn encode_submit_credit_data(
    handles: &[CiphertextHandle; CreditInputVector::LEN],
    proof: &[u8],
) -> Vec<u8> {
    let head_words = CreditInputVector::LEN + 1;
    let mut data = Vec::with_capacity(4 + WORD * (head_words + 1) + pad_to_word(proof.len()));

    data.extend_from_slice(&selector(SUBMIT_CREDIT_DATA));
    for handle in handles {
        data.extend_from_slice(handle.as_bytes());
    }
    data.extend_from_slice(&uint_word((head_words * WORD) as u64));
    data.extend_from_slice(&uint_word(proof.len() as u64));
    data.extend_from_slice(proof);
    data.resize(data.len() + pad_to_word(proof.len()) - proof.len(), 0);
    data
}

fn first_word(data: &[u8]) -> Result<&[u8], AbiError> {
    if data.len() < WORD {
        return Err(AbiError::TooShort(data.len()));
    }
    Ok(&data[..WORD])
}

/// Decode a `uint256` return word that must fit in 64 bits
pub fn decode_u64(data: &[u8]) -> Result<u64, AbiError> {
    let word = first_word(data)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow);
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(bytes))
}

/// Decode a `bool` return word
pub fn decode_bool(data: &[u8]) -> Result<bool, AbiError> {
    match decode_u64(data) {
        Ok(0) => Ok(false),
        Ok(1) => Ok(true),
        Ok(_) | Err(AbiError::Overflow) => Err(AbiError::InvalidBool),
        Err(e) => Err(e),
    }
}

/// Encode an `Error(string)` revert payload
pub fn encode_revert_reason(reason: &str) -> Vec<u8> {
    let bytes = reason.as_bytes();
    let mut data = ERROR_STRING_SELECTOR.to_vec();
    data.extend_from_slice(&uint_word(WORD as u64));
    data.extend_from_slice(&uint_word(bytes.len() as u64));
    data.extend_from_slice(bytes);
    data.resize(data.len() + pad_to_word(bytes.len()) - bytes.len(), 0);
    data
}

/// Extract the message of an `Error(string)` revert payload
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let body = data.strip_prefix(&ERROR_STRING_SELECTOR[..])?;
    let offset = usize::try_from(decode_u64(body).ok()?).ok()?;
    let tail = body.get(offset..)?;
    let len = usize::try_from(decode_u64(tail).ok()?).ok()?;
    let bytes = tail.get(WORD..WORD.checked_add(len)?)?;
    String::from_utf8(bytes.to_vec()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matches_known_value() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_submit_layout() {
        let handles: [CiphertextHandle; 6] =
            std::array::from_fn(|i| CiphertextHandle([i as u8 + 1; 32]));
        let proof = vec![0xee; 40];

        let data = encode_submit_credit_data(&handles, &proof);

        // selector + 6 handles + offset + length + 64 padded proof bytes
        assert_eq!(data.len(), 4 + 32 * 8 + 64);
        assert_eq!(&data[..4], &selector(SUBMIT_CREDIT_DATA));
        for (i, handle) in handles.iter().enumerate() {
            let start = 4 + 32 * i;
            assert_eq!(&data[start..start + 32], handle.as_bytes());
        }
        assert_eq!(decode_u64(&data[4 + 32 * 6..]).unwrap(), 224);
        assert_eq!(decode_u64(&data[4 + 32 * 7..]).unwrap(), 40);
        assert_eq!(&data[4 + 32 * 8..4 + 32 * 8 + 40], &proof[..]);
        assert!(data[4 + 32 * 8 + 40..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_bool_words() {
        assert!(decode_bool(&uint_word(1)).unwrap());
        assert!(!decode_bool(&uint_word(0)).unwrap());
        assert_eq!(decode_bool(&uint_word(2)), Err(AbiError::InvalidBool));
        assert_eq!(decode_bool(&[0u8; 4]), Err(AbiError::TooShort(4)));
    }

    #[test]
    fn test_revert_reason() {
        let data = encode_revert_reason("No credit data submitted");
        assert_eq!(&data[..4], &ERROR_STRING_SELECTOR);
        assert_eq!(
            decode_revert_reason(&data).as_deref(),
            Some("No credit data submitted")
        );
        assert_eq!(decode_revert_reason(&[0x12, 0x34]), None);
    }

    #[test]
    fn test_address_word_is_left_padded() {
        let word = address_word(&Address([0x11; 20]));
        assert!(word[..12].iter().all(|b| *b == 0));
        assert!(word[12..].iter().all(|b| *b == 0x11));
    }
}
