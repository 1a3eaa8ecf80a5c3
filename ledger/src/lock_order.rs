//! Deterministic account lock ordering.
//!
//! Every transfer locks its two accounts lowest id first, whichever side is the
//! source. With one global order over account rows no two transfers can wait
//! on each other in a cycle.

use simplebank_common::AccountId;

/// Which side of a transfer is locked first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOrder {
    SourceFirst,
    DestinationFirst,
}

/// Decide the lock order for a transfer from `source` to `destination`.
pub fn lock_order(source: AccountId, destination: AccountId) -> LockOrder {
    if source <= destination {
        LockOrder::SourceFirst
    } else {
        LockOrder::DestinationFirst
    }
}

/// The two accounts in acquisition order.
pub fn ordered_pair(a: AccountId, b: AccountId) -> [AccountId; 2] {
    match lock_order(a, b) {
        LockOrder::SourceFirst => [a, b],
        LockOrder::DestinationFirst => [b, a],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_lower_id_first() {
        let one = AccountId::new(1);
        let two = AccountId::new(2);

        assert_eq!(lock_order(one, two), LockOrder::SourceFirst);
        assert_eq!(lock_order(two, one), LockOrder::DestinationFirst);
        assert_eq!(ordered_pair(two, one), [one, two]);
    }

    #[test]
    fn test_reversed_transfers_share_order() {
        let a = AccountId::new(900);
        let b = AccountId::new(17);
        assert_eq!(ordered_pair(a, b), ordered_pair(b, a));
    }

    proptest! {
        #[test]
        fn prop_order_is_symmetric(a in any::<i64>(), b in any::<i64>()) {
            let (a, b) = (AccountId::new(a), AccountId::new(b));
            prop_assert_eq!(ordered_pair(a, b), ordered_pair(b, a));
        }

        #[test]
        fn prop_first_is_minimum(a in any::<i64>(), b in any::<i64>()) {
            let (a, b) = (AccountId::new(a), AccountId::new(b));
            let [first, second] = ordered_pair(a, b);
            prop_assert_eq!(first, a.min(b));
            prop_assert_eq!(second, a.max(b));
        }
    }
}
