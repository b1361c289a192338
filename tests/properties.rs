//! Property tests for player merges, resets and health steps.

use proptest::prelude::*;
use scoreline::{health_step, LocalBus, PlayerUpdate, StateStore, StoreConfig, MAX_HEALTH_STEP};
use std::sync::Arc;
use tempfile::TempDir;

fn test_store(dir: &TempDir) -> StateStore {
    StateStore::open(
        StoreConfig {
            path: dir.path().join("data"),
            ..Default::default()
        },
        Arc::new(LocalBus::new()),
    )
    .unwrap()
}

fn arb_update() -> impl Strategy<Value = PlayerUpdate> {
    (
        proptest::option::of("[A-Za-z ]{0,12}"),
        proptest::option::of(-1000i64..1000),
        proptest::option::of(-50i64..150),
        proptest::option::of(any::<bool>()),
    )
        .prop_map(|(name, points, health, is_active)| PlayerUpdate {
            name,
            points,
            health,
            is_active,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_update_touches_only_present_fields(id in 1u32..=10, update in arb_update()) {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);
        let before = store.load().unwrap();

        let after = store.update_player(id, &update).unwrap();

        prop_assert_eq!(after.players.len(), before.players.len());
        prop_assert_eq!(&after.game_title, &before.game_title);
        for (old, new) in before.players.iter().zip(after.players.iter()) {
            prop_assert_eq!(old.id, new.id);
            if old.id != id {
                prop_assert_eq!(old, new);
                continue;
            }
            prop_assert_eq!(&new.name, update.name.as_ref().unwrap_or(&old.name));
            prop_assert_eq!(new.points, update.points.unwrap_or(old.points));
            prop_assert_eq!(new.health, update.health.unwrap_or(old.health));
            prop_assert_eq!(new.is_active, update.is_active.unwrap_or(old.is_active));
        }
    }

    #[test]
    fn prop_reset_after_any_updates(updates in proptest::collection::vec((1u32..=10, arb_update()), 1..6)) {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir);

        for (id, update) in &updates {
            store.update_player(*id, update).unwrap();
        }
        let before = store.load().unwrap();
        let after = store.reset_all_players().unwrap();

        for (old, new) in before.players.iter().zip(after.players.iter()) {
            prop_assert_eq!(old.id, new.id);
            prop_assert_eq!(&old.name, &new.name);
            prop_assert_eq!(new.points, 0);
            prop_assert_eq!(new.health, 100);
            prop_assert!(new.is_active);
        }
    }

    #[test]
    fn prop_health_step_bounded_and_monotonic(a in -500i64..500, b in -500i64..500) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(health_step(high) <= MAX_HEALTH_STEP);
        prop_assert!(health_step(low) <= health_step(high));
    }
}
