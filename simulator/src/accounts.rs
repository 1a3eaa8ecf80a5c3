//! Account provisioning for simulations.

use rand::rngs::StdRng;
use rand::Rng;
use tracing::info;

use simplebank_common::{Currency, MinorUnits};
use simplebank_ledger::{Account, LedgerStore, NewAccount};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

/// Random lowercase owner name.
pub fn random_owner(rng: &mut StdRng) -> String {
    (0..15)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Random supported currency.
pub fn random_currency(rng: &mut StdRng) -> Currency {
    Currency::ALL[rng.gen_range(0..Currency::ALL.len())]
}

/// Create `count` accounts in `currency`, each holding `initial_balance`.
pub async fn provision<S: LedgerStore>(
    store: &S,
    count: usize,
    initial_balance: MinorUnits,
    currency: Currency,
    rng: &mut StdRng,
) -> anyhow::Result<Vec<Account>> {
    let mut accounts = Vec::with_capacity(count);
    for _ in 0..count {
        let owner = random_owner(rng);
        let account = store
            .create_account(NewAccount::new(owner, initial_balance, currency))
            .await?;
        info!(
            account_id = %account.id,
            owner = %account.owner,
            balance = %currency.format_minor(account.balance),
            "Provisioned account"
        );
        accounts.push(account);
    }
    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use simplebank_ledger::MemoryStore;

    #[test]
    fn test_random_owner_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let owner = random_owner(&mut rng);
        assert_eq!(owner.len(), 15);
        assert!(owner.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let mut first = StdRng::seed_from_u64(42);
        let mut second = StdRng::seed_from_u64(42);
        assert_eq!(random_owner(&mut first), random_owner(&mut second));
        assert_eq!(random_currency(&mut first), random_currency(&mut second));
    }

    #[tokio::test]
    async fn test_provision() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);

        let accounts = provision(&store, 3, 500, Currency::Eur, &mut rng)
            .await
            .unwrap();

        assert_eq!(accounts.len(), 3);
        assert!(accounts.iter().all(|a| a.balance == 500 && a.currency == Currency::Eur));
        assert!(accounts.windows(2).all(|w| w[0].id < w[1].id));
    }
}
