//! Token supply verification.
//!
//! Battles only move tokens between agents. Dead agents keep their
//! remaining balance on the books, so the sum over every registered agent
//! must equal the sum at registration.

/// Result of a supply check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplyResult {
    /// Current supply equals the registered supply.
    Conserved,
    /// Tokens were created or destroyed.
    Drift {
        /// Supply at registration.
        expected: u128,
        /// Supply now.
        actual: u128,
    },
}

impl SupplyResult {
    /// Whether the supply is conserved.
    pub const fn is_conserved(&self) -> bool {
        matches!(self, Self::Conserved)
    }
}

/// Compare the current balances against the registered supply.
pub fn verify_supply(expected: u128, balances: impl IntoIterator<Item = u64>) -> SupplyResult {
    let actual = balances
        .into_iter()
        .fold(0_u128, |acc, b| acc.saturating_add(u128::from(b)));
    if actual == expected {
        SupplyResult::Conserved
    } else {
        SupplyResult::Drift { expected, actual }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_supply() {
        assert_eq!(verify_supply(1_500, [1_250, 250]), SupplyResult::Conserved);
    }

    #[test]
    fn drift_reports_both_sides() {
        assert_eq!(
            verify_supply(1_500, [1_000, 499]),
            SupplyResult::Drift {
                expected: 1_500,
                actual: 1_499
            }
        );
    }

    #[test]
    fn large_balances_do_not_overflow() {
        let expected = u128::from(u64::MAX) * 2;
        assert!(verify_supply(expected, [u64::MAX, u64::MAX]).is_conserved());
    }
}
