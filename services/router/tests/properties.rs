//! Property tests for shard selection and threshold validation

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shard_router::{selector, validator};
use std::collections::HashSet;
use types::{Address, CurveParams, CurveScalar, FeeSchedule, ShardInfo, ShardStatus, Token};

const USDC: Address = Address([0x01; 20]);
const USDT: Address = Address([0x02; 20]);

fn shard(index: usize, reserve_usdc: u128, c: u64) -> ShardInfo {
    let mut bytes = [0xa0; 20];
    bytes[19] = index as u8;
    let pool = Address(bytes);
    ShardInfo {
        id: ShardInfo::make_id(137, &pool),
        chain_id: 137,
        pool_address: pool,
        token_a: Token::new(137, USDC, "USDC", 6),
        token_b: Token::new(137, USDT, "USDT", 6),
        reserve_a: reserve_usdc,
        reserve_b: 1_000_000_000,
        total_supply: 1,
        curve_params: CurveParams::with_c(CurveScalar(c)),
        fee_schedule: FeeSchedule::default(),
        status: ShardStatus::Active,
        last_sync_ms: 0,
    }
}

proptest! {
    #[test]
    fn selected_shard_holds_the_minimum_reserve(
        reserves in prop::collection::vec(1u128..1_000, 1..12),
        seed in any::<u64>(),
    ) {
        let shards: Vec<ShardInfo> = reserves.iter().enumerate().map(|(i, r)| shard(i, *r, 10_400)).collect();
        let min = *reserves.iter().min().unwrap();
        let mut rng = StdRng::seed_from_u64(seed);

        let selection = selector::identify_smallest(&shards, &USDC, &mut rng).unwrap();
        prop_assert_eq!(selection.min_reserve, min);
        prop_assert_eq!(selection.selected.reserve_a, min);
        prop_assert!(selection.tied.iter().all(|s| s.reserve_a == min));
        prop_assert_eq!(selection.tied.len(), reserves.iter().filter(|r| **r == min).count());
    }

    #[test]
    fn every_tied_shard_is_eventually_selected(ties in 2usize..5, seed in any::<u64>()) {
        let mut shards: Vec<ShardInfo> = (0..ties).map(|i| shard(i, 500, 10_400)).collect();
        shards.push(shard(ties, 501, 10_400));
        let mut rng = StdRng::seed_from_u64(seed);

        let mut seen = HashSet::new();
        for _ in 0..400 {
            let selection = selector::identify_smallest(&shards, &USDC, &mut rng).unwrap();
            prop_assert_eq!(selection.selected.reserve_a, 500);
            seen.insert(selection.selected.pool_address);
        }
        prop_assert_eq!(seen.len(), ties);
    }

    #[test]
    fn escalation_visits_every_shard_once_in_ascending_order(
        reserves in prop::collection::vec(1u128..1_000_000, 1..10),
        seed in any::<u64>(),
    ) {
        let shards: Vec<ShardInfo> = reserves.iter().enumerate().map(|(i, r)| shard(i, *r, 10_400)).collect();
        let mut rng = StdRng::seed_from_u64(seed);

        let (selection, order) = selector::escalation_order(&shards, &USDC, &mut rng).unwrap();
        prop_assert_eq!(order.len(), shards.len());
        prop_assert_eq!(&order[0], &selection.selected);
        prop_assert!(order.windows(2).all(|w| w[0].reserve_a <= w[1].reserve_a));
    }

    #[test]
    fn validity_flips_exactly_at_the_threshold(reserve in 1u128..10_000_000_000, c in 1u64..=1_000_000) {
        let s = shard(0, reserve, c);
        let threshold = validator::validate(&s, 1, &USDC).threshold;
        prop_assert_eq!(threshold, reserve * c as u128 / 1_000_000);

        if threshold > 0 {
            prop_assert!(validator::validate(&s, threshold, &USDC).is_valid);
            prop_assert!(validator::validate(&s, threshold / 2 + 1, &USDC).is_valid);
        }
        prop_assert!(!validator::validate(&s, threshold + 1, &USDC).is_valid);
    }

    #[test]
    fn threshold_scales_linearly_with_reserve(reserve in 1u128..1_000_000_000, k in 1u128..100) {
        let base = validator::validate(&shard(0, reserve * 1_000_000, 10_400), 1, &USDC).threshold;
        let scaled = validator::validate(&shard(0, reserve * 1_000_000 * k, 10_400), 1, &USDC).threshold;
        prop_assert_eq!(scaled, base * k);
    }
}
