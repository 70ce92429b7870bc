//! Account nonce arithmetic (EVM nonces, XRP sequences).

use std::collections::BTreeSet;

/// Smallest nonce at or above what the network expects that nobody holds.
pub fn next_nonce(network_nonce: u64, held: &BTreeSet<u64>) -> u64 {
    let mut candidate = network_nonce;
    for n in held.range(network_nonce..) {
        if *n != candidate {
            break;
        }
        candidate += 1;
    }
    candidate
}

/// Nonces missing between the last confirmed one and the highest pending one.
///
/// A gap blocks every later pending transaction until something fills it.
pub fn detect_gaps(last_confirmed: Option<u64>, pending: &BTreeSet<u64>) -> Vec<u64> {
    let Some(&highest) = pending.last() else {
        return Vec::new();
    };
    let first = last_confirmed.map_or(0, |n| n + 1);
    (first..highest).filter(|n| !pending.contains(n)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[u64]) -> BTreeSet<u64> {
        values.iter().copied().collect()
    }

    #[test]
    fn next_nonce_skips_held_run() {
        assert_eq!(next_nonce(5, &set(&[])), 5);
        assert_eq!(next_nonce(5, &set(&[5, 6])), 7);
        assert_eq!(next_nonce(5, &set(&[5, 7])), 6);
        // Held values below the network nonce are already confirmed.
        assert_eq!(next_nonce(5, &set(&[3, 4])), 5);
    }

    #[test]
    fn gap_between_confirmed_and_pending() {
        assert_eq!(detect_gaps(Some(5), &set(&[7])), vec![6]);
        assert_eq!(detect_gaps(Some(5), &set(&[6, 7])), Vec::<u64>::new());
        assert_eq!(detect_gaps(Some(5), &set(&[6, 9])), vec![7, 8]);
    }

    #[test]
    fn fresh_account_gaps_start_at_zero() {
        assert_eq!(detect_gaps(None, &set(&[2])), vec![0, 1]);
        assert!(detect_gaps(None, &set(&[])).is_empty());
    }
}
