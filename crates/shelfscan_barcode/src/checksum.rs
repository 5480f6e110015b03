//! Weighted modulo-10 check digits for the EAN/UPC family.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("code must have at least {expected} digits, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("invalid character in code: {0}")]
    InvalidCharacter(char),
}

fn weighted_sum(digits: &str, take: usize, even_weight: u32, odd_weight: u32) -> Result<u32, ChecksumError> {
    if digits.len() < take {
        return Err(ChecksumError::TooShort {
            expected: take,
            actual: digits.len(),
        });
    }
    let mut total = 0u32;
    for (i, ch) in digits.chars().take(take).enumerate() {
        let digit = ch
            .to_digit(10)
            .ok_or(ChecksumError::InvalidCharacter(ch))?;
        let weight = if i % 2 == 0 { even_weight } else { odd_weight };
        total += digit * weight;
    }
    Ok(total)
}

/// EAN-13 check digit over the first 12 digits (weights 1,3,1,3,...).
pub fn ean13_check_digit(digits: &str) -> Result<u8, ChecksumError> {
    let total = weighted_sum(digits, 12, 1, 3)?;
    Ok(((10 - (total % 10)) % 10) as u8)
}

/// EAN-8 check digit over the first 7 digits (weights 3,1,3,1,...).
pub fn ean8_check_digit(digits: &str) -> Result<u8, ChecksumError> {
    let total = weighted_sum(digits, 7, 3, 1)?;
    Ok(((10 - (total % 10)) % 10) as u8)
}

/// UPC-A check digit over the first 11 digits (weights 3,1,3,1,...).
pub fn upc_a_check_digit(digits: &str) -> Result<u8, ChecksumError> {
    let total = weighted_sum(digits, 11, 3, 1)?;
    Ok(((10 - (total % 10)) % 10) as u8)
}
