//! Shard Selector - smallest-shard rule
//!
//! Smaller shards give proportionally smaller price impact for the same trade,
//! so the router prefers the shard holding the least of the input token.
//! Shards tied at that minimum (exact equality) are picked uniformly at random
//! to avoid herding every trader onto one pool.

use rand::seq::SliceRandom;
use rand::Rng;
use types::{Address, ShardInfo};

/// Result of [`identify_smallest`]
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub selected: ShardInfo,
    /// Every shard sharing the minimum reserve, `selected` included
    pub tied: Vec<ShardInfo>,
    pub min_reserve: u128,
}

/// Pick the shard with the smallest reserve of `token_in`.
///
/// Shards that do not hold `token_in` are ignored; `None` when nothing is left.
pub fn identify_smallest<R: Rng + ?Sized>(
    shards: &[ShardInfo],
    token_in: &Address,
    rng: &mut R,
) -> Option<Selection> {
    let min_reserve = shards.iter().filter_map(|s| s.reserve_of(token_in)).min()?;

    let tied: Vec<ShardInfo> = shards
        .iter()
        .filter(|s| s.reserve_of(token_in) == Some(min_reserve))
        .cloned()
        .collect();
    let selected = tied.choose(rng)?.clone();

    Some(Selection {
        selected,
        tied,
        min_reserve,
    })
}

/// Order in which shards are tried: the selected smallest shard first, then
/// the rest ascending by reserve of `token_in` (ties by address).
pub fn escalation_order<R: Rng + ?Sized>(
    shards: &[ShardInfo],
    token_in: &Address,
    rng: &mut R,
) -> Option<(Selection, Vec<ShardInfo>)> {
    let selection = identify_smallest(shards, token_in, rng)?;

    let mut rest: Vec<ShardInfo> = shards
        .iter()
        .filter(|s| s.reserve_of(token_in).is_some() && s.pool_address != selection.selected.pool_address)
        .cloned()
        .collect();
    rest.sort_by_key(|s| (s.reserve_of(token_in).unwrap_or(0), s.pool_address));

    let mut order = Vec::with_capacity(rest.len() + 1);
    order.push(selection.selected.clone());
    order.extend(rest);
    Some((selection, order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use types::{CurveParams, CurveScalar, FeeSchedule, ShardStatus, Token};

    const USDC: Address = Address([0x01; 20]);
    const USDT: Address = Address([0x02; 20]);

    fn shard(byte: u8, reserve_usdc: u128) -> ShardInfo {
        let pool = Address([byte; 20]);
        ShardInfo {
            id: ShardInfo::make_id(137, &pool),
            chain_id: 137,
            pool_address: pool,
            token_a: Token::new(137, USDC, "USDC", 6),
            token_b: Token::new(137, USDT, "USDT", 6),
            reserve_a: reserve_usdc,
            reserve_b: 1_000_000,
            total_supply: 1_000,
            curve_params: CurveParams::with_c(CurveScalar(10_400)),
            fee_schedule: FeeSchedule::default(),
            status: ShardStatus::Active,
            last_sync_ms: 0,
        }
    }

    #[test]
    fn test_empty_input_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(identify_smallest(&[], &USDC, &mut rng).is_none());
        // no shard holds the token
        assert!(identify_smallest(&[shard(0xa1, 10)], &Address([9; 20]), &mut rng).is_none());
    }

    #[test]
    fn test_minimum_is_selected_by_input_side() {
        let shards = vec![shard(0xa1, 120_000), shard(0xa2, 50_000), shard(0xa3, 80_000)];
        let mut rng = StdRng::seed_from_u64(7);

        let selection = identify_smallest(&shards, &USDC, &mut rng).unwrap();
        assert_eq!(selection.selected.pool_address, Address([0xa2; 20]));
        assert_eq!(selection.min_reserve, 50_000);
        assert_eq!(selection.tied.len(), 1);

        // USDT reserves all tie at 1,000,000
        let selection = identify_smallest(&shards, &USDT, &mut rng).unwrap();
        assert_eq!(selection.tied.len(), 3);
    }

    #[test]
    fn test_ties_are_exact_and_all_reachable() {
        let shards = vec![shard(0xa1, 50_000), shard(0xa2, 50_000), shard(0xa3, 50_001)];
        let mut rng = StdRng::seed_from_u64(42);

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let selection = identify_smallest(&shards, &USDC, &mut rng).unwrap();
            assert_eq!(selection.tied.len(), 2);
            seen.insert(selection.selected.pool_address);
        }
        assert_eq!(seen, HashSet::from([Address([0xa1; 20]), Address([0xa2; 20])]));
    }

    #[test]
    fn test_escalation_order_is_ascending_after_selection() {
        let shards = vec![shard(0xa3, 300), shard(0xa1, 100), shard(0xa2, 200)];
        let mut rng = StdRng::seed_from_u64(3);
        let (_, order) = escalation_order(&shards, &USDC, &mut rng).unwrap();
        let reserves: Vec<u128> = order.iter().map(|s| s.reserve_a).collect();
        assert_eq!(reserves, vec![100, 200, 300]);
    }
}
