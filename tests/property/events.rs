use proptest::prelude::*;

use fleetci::events::{Event, EventBus};

fn event_strategy() -> impl Strategy<Value = Event> {
    prop_oneof![
        ("[a-z]{1,6}", "[0-9a-f]{7}").prop_map(|(repository, revision)| Event::RepositoryUpdated {
            repository,
            revision,
        }),
        "[a-z]{1,6}".prop_map(|task_id| Event::TaskRequested { task_id }),
    ]
}

proptest! {
    #[test]
    fn bus_hands_out_events_in_publication_order(
        batches in proptest::collection::vec(proptest::collection::vec(event_strategy(), 0..8), 1..5)
    ) {
        let mut bus = EventBus::new();
        for batch in batches {
            for event in &batch {
                bus.push(event.clone());
            }
            prop_assert_eq!(bus.len(), batch.len());
            prop_assert_eq!(bus.drain(), batch);
            prop_assert!(bus.is_empty());
        }
    }
}
