//! Property-based tests for event flattening
//!
//! Scripts and webhooks see events through `to_array`, and script results
//! come back through `from_array`. These properties pin down what survives
//! the trip.

use dsp_events::Event;
use proptest::prelude::*;
use serde_json::{Map, Value};

// Strategy for flat JSON payloads
fn payload_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(
        "[a-z_]{1,12}",
        prop_oneof![
            any::<i64>().prop_map(Value::from),
            "[A-Za-z0-9 ]{0,20}".prop_map(Value::from),
            any::<bool>().prop_map(Value::from),
        ],
        0..8,
    )
    .prop_map(|entries| entries.into_iter().collect())
}

fn event_name_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}\\.[a-z]{1,8}".prop_map(|s| s.to_string())
}

proptest! {
    /// Name, data and flags carry over; the receiving event keeps its id
    #[test]
    fn prop_from_array_restores_event(
        name in event_name_strategy(),
        data in payload_strategy(),
        stopped in any::<bool>(),
        prevented in any::<bool>(),
    ) {
        let mut source = Event::with_data(name.clone(), Value::Object(data.clone()));
        if stopped {
            source.stop_propagation();
        }
        if prevented {
            source.prevent_default();
        }

        let mut target = Event::new("placeholder");
        let target_id = target.id().to_string();
        target.from_array(&source.to_array());

        prop_assert_eq!(target.name(), name.as_str());
        prop_assert_eq!(target.data(), &data);
        prop_assert_eq!(target.is_propagation_stopped(), stopped);
        prop_assert_eq!(target.is_default_prevented(), prevented);
        prop_assert_eq!(target.id(), target_id.as_str());
        prop_assert_eq!(target.timestamp(), source.timestamp());
    }

    /// A false stop flag never restarts a stopped event
    #[test]
    fn prop_stop_propagation_is_sticky(data in payload_strategy()) {
        let mut event = Event::with_data("user.created", Value::Object(data));
        event.stop_propagation();

        let mut update = Map::new();
        update.insert("stop_propagation".to_string(), Value::Bool(false));
        event.from_array(&update);

        prop_assert!(event.is_propagation_stopped());
    }

    /// Writing back identical data does not mark the event dirty
    #[test]
    fn prop_unchanged_data_is_clean(data in payload_strategy()) {
        let mut event = Event::with_data("user.created", Value::Object(data.clone()));
        event.set_data(data);

        prop_assert!(!event.is_dirty());
    }
}
