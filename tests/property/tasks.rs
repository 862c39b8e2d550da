use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use proptest::prelude::*;

use fleetci::events::Event;
use fleetci::tasks::{ExecutionOutcome, Task, Trigger};

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn properties_strategy() -> impl Strategy<Value = Option<BTreeMap<String, String>>> {
    proptest::option::of(proptest::collection::btree_map("[a-z]{1,5}", "[a-z ]{0,10}", 0..4))
}

proptest! {
    #[test]
    fn only_the_first_stop_changes_a_task(
        stops in proptest::collection::vec(properties_strategy(), 1..6),
        every in 1u64..86_400,
    ) {
        let mut task = Task::new("t", Trigger::schedule(Duration::from_secs(every), Duration::ZERO, at(0)), "true", at(0));
        let mut stops = stops.into_iter();
        let first = stops.next().unwrap();
        prop_assert!(task.stop(first.clone()));
        let stopped = task.clone();
        prop_assert_eq!(&stopped.stop_properties, &first.unwrap_or_default());

        for properties in stops {
            prop_assert!(!task.stop(properties));
            prop_assert_eq!(&task, &stopped);
        }
        prop_assert!(!task.is_ready(at(every as i64 * 10)));
    }

    #[test]
    fn schedule_is_never_ready_before_it_is_due(
        every in 1i64..100_000,
        executed_at in 0i64..1_000_000,
        probe in 0i64..200_000,
    ) {
        let trigger = Trigger::schedule(Duration::from_secs(every as u64), Duration::ZERO, at(0));
        let mut task = Task::new("t", trigger, "true", at(0));
        task.record_execution(at(executed_at), ExecutionOutcome::Success);

        let due = at(executed_at) + TimeDelta::seconds(every);
        prop_assert_eq!(task.trigger.due_at(), Some(due));
        let now = at(executed_at + probe);
        prop_assert_eq!(task.is_ready(now), now >= due);
    }

    #[test]
    fn an_executed_revision_never_triggers_again(
        revisions in proptest::collection::vec("[0-9a-f]{4}", 1..10),
    ) {
        let mut task = Task::new("t", Trigger::repository("core", Duration::ZERO), "true", at(0));
        let mut clock = 0;
        for revision in &revisions {
            clock += 1;
            let event = Event::RepositoryUpdated { repository: "core".to_string(), revision: revision.clone() };
            task.on_event(&event, at(clock));
            if task.is_trigger_expired(at(clock)) {
                task.record_execution(at(clock), ExecutionOutcome::Success);
            }
            prop_assert!(!task.on_event(&event, at(clock)));
            prop_assert!(!task.is_ready(at(clock)));
        }
        let mut distinct = revisions.clone();
        distinct.dedup();
        prop_assert_eq!(task.executions as usize, distinct.len());
    }
}
