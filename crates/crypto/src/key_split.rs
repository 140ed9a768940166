//! N-way XOR secret sharing of the data key
//!
//! Every share but the last is uniformly random; the last is chosen so the
//! XOR of all shares equals the key. Any `n - 1` shares reveal nothing.

use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::Zeroizing;

pub type KeyShare = Zeroizing<Vec<u8>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeySplitError {
    #[error("Cannot split a key into zero shares")]
    NoShares,

    #[error("Cannot split an empty key")]
    EmptyKey,

    #[error("Cannot merge an empty list of shares")]
    NothingToMerge,

    #[error("Share {index} is {got} bytes, expected {expected}")]
    UnequalShares {
        index: usize,
        expected: usize,
        got: usize,
    },
}

/// Split `key` into `n` shares whose XOR is `key`
pub fn key_split(key: &[u8], n: usize) -> Result<Vec<KeyShare>, KeySplitError> {
    if n == 0 {
        return Err(KeySplitError::NoShares);
    }
    if key.is_empty() {
        return Err(KeySplitError::EmptyKey);
    }

    let mut shares = Vec::with_capacity(n);
    let mut last = Zeroizing::new(key.to_vec());
    for _ in 1..n {
        let mut share = Zeroizing::new(vec![0u8; key.len()]);
        OsRng.fill_bytes(&mut share);
        xor_into(&mut last, &share);
        shares.push(share);
    }
    shares.push(last);
    Ok(shares)
}

/// XOR-fold shares back into the key
pub fn key_merge<S: AsRef<[u8]>>(shares: &[S]) -> Result<KeyShare, KeySplitError> {
    let first: &[u8] = shares.first().ok_or(KeySplitError::NothingToMerge)?.as_ref();
    let mut merged = Zeroizing::new(first.to_vec());
    for (index, share) in shares.iter().enumerate().skip(1) {
        let share: &[u8] = share.as_ref();
        if share.len() != merged.len() {
            return Err(KeySplitError::UnequalShares {
                index,
                expected: merged.len(),
                got: share.len(),
            });
        }
        xor_into(&mut merged, share);
    }
    Ok(merged)
}

fn xor_into(acc: &mut [u8], other: &[u8]) {
    for (a, b) in acc.iter_mut().zip(other) {
        *a ^= b;
    }
}
