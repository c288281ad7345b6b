//! Property-based tests for stream and tracker using proptest.

use proptest::prelude::*;

use trainloop_core::{
    Advance, Decision, Direction, ProgressTracker, ShuffledSource, Stream, VecSource, from_fn,
};

// --- Stream accounting properties ---

proptest! {
    #[test]
    fn boundaries_follow_source_length(len in 1usize..10, advances in 0usize..80) {
        let mut stream = Stream::new(VecSource::new((0..len).collect::<Vec<_>>()));
        let mut boundaries = 0u64;
        for _ in 0..advances {
            if stream.advance().unwrap().is_end_of_epoch() {
                boundaries += 1;
            }
        }
        // Every epoch costs len elements plus one boundary call.
        prop_assert_eq!(boundaries, (advances / (len + 1)) as u64);
        prop_assert_eq!(stream.global_iteration(), advances as u64 - boundaries);
        prop_assert_eq!(stream.current_epoch(), boundaries);
        prop_assert!(stream.current_iteration_in_epoch() <= len as u64);
    }

    #[test]
    fn restore_of_checkpoint_is_identity(len in 0usize..8, advances in 0usize..40, seed in any::<u64>()) {
        let items: Vec<usize> = (0..len).collect();
        let mut stream = Stream::new(ShuffledSource::new(items.clone(), seed));
        for _ in 0..advances {
            stream.advance().unwrap();
        }
        let state = stream.checkpoint();

        let mut restored = Stream::new(ShuffledSource::new(items, seed));
        restored.restore(state.clone()).unwrap();
        prop_assert_eq!(restored.current_epoch(), stream.current_epoch());
        prop_assert_eq!(restored.current_iteration_in_epoch(), stream.current_iteration_in_epoch());
        prop_assert_eq!(restored.global_iteration(), stream.global_iteration());

        for _ in 0..(2 * len + 2) {
            prop_assert_eq!(restored.advance().unwrap(), stream.advance().unwrap());
        }
    }

    #[test]
    fn replayed_restore_matches_uninterrupted_run(
        len in 1usize..8,
        epoch_size in 1u64..12,
        advances in 0usize..40,
    ) {
        let make = || Stream::new(from_fn(move || 0..len)).with_epoch_size(epoch_size).unwrap();
        let mut stream = make();
        for _ in 0..advances {
            stream.advance().unwrap();
        }
        let mut restored = make();
        restored.restore(stream.checkpoint()).unwrap();
        for _ in 0..20 {
            prop_assert_eq!(restored.advance().unwrap(), stream.advance().unwrap());
        }
        prop_assert_eq!(restored.checkpoint(), stream.checkpoint());
    }

    #[test]
    fn fixed_epochs_have_exact_size(len in 1usize..6, epoch_size in 1u64..15) {
        let mut stream = Stream::new(VecSource::new((0..len).collect::<Vec<_>>()))
            .with_epoch_size(epoch_size)
            .unwrap();
        for _ in 0..3 {
            let mut count = 0u64;
            while let Advance::Element(_) = stream.advance().unwrap() {
                count += 1;
            }
            prop_assert_eq!(count, epoch_size);
        }
    }
}

// --- Tracker properties ---

fn direction_strategy() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Max), Just(Direction::Min)]
}

proptest! {
    #[test]
    fn tracker_matches_reference_model(
        direction in direction_strategy(),
        patience in 1u64..5,
        values in prop::collection::vec(-100i32..100, 1..40),
    ) {
        let mut tracker = ProgressTracker::new(patience, direction).unwrap();
        let mut best: Option<f64> = None;
        let mut strikes = 0u64;

        for v in values {
            let v = f64::from(v);
            let decision = tracker.observe(v).unwrap();
            if strikes >= patience {
                prop_assert_eq!(decision, Decision::Stop);
                continue;
            }
            let improved = match (best, direction) {
                (None, _) => true,
                (Some(b), Direction::Max) => v > b,
                (Some(b), Direction::Min) => v < b,
            };
            if improved {
                best = Some(v);
                strikes = 0;
                prop_assert_eq!(decision, Decision::Improved);
            } else {
                strikes += 1;
                let expected = if strikes >= patience { Decision::Stop } else { Decision::NoImprovement };
                prop_assert_eq!(decision, expected);
            }
            prop_assert_eq!(tracker.best_value(), best);
            prop_assert_eq!(tracker.strikes(), strikes);
        }
    }

    #[test]
    fn tracker_checkpoint_round_trips(
        direction in direction_strategy(),
        patience in 1u64..5,
        values in prop::collection::vec(-1.0e6f64..1.0e6, 0..20),
    ) {
        let mut tracker = ProgressTracker::new(patience, direction).unwrap();
        for v in values {
            tracker.observe(v).unwrap();
        }
        let json = serde_json::to_string(&tracker.checkpoint()).unwrap();
        let restored = ProgressTracker::restore(serde_json::from_str(&json).unwrap()).unwrap();
        prop_assert_eq!(restored, tracker);
    }
}
