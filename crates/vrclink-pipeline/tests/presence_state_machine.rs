//! Stateful property testing for the presence roster.
//!
//! Uses proptest-state-machine to drive `PresenceCache` with random
//! upsert/remove/replace/drain sequences against a reference model. The model
//! tracks:
//!
//! - Which bucket each friend id sits in
//! - That no id ever shows up in more than one bucket
//!
//! The file also checks envelope round-trips and that routed events for one
//! id always leave the last event's state behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use proptest_state_machine::{ReferenceStateMachine, StateMachineTest, prop_state_machine};
use serde_json::{Value, json};
use tokio::runtime::Runtime;

use vrclink_api::{ApiError, Friend, Instance, PresenceState, ResourceResolver, World};
use vrclink_pipeline::{EventRouter, NoopHandler, PresenceCache, decode, encode};

/// Ids drawn from a small pool so operations collide often.
const ID_POOL: usize = 5;

fn id(n: usize) -> String {
    format!("usr_{n}")
}

fn friend(n: usize, state: PresenceState) -> Friend {
    Friend::from_json(&json!({"id": id(n), "displayName": format!("Friend {n}")}))
        .unwrap()
        .with_presence(state)
}

fn state_strategy() -> impl Strategy<Value = PresenceState> {
    prop_oneof![
        Just(PresenceState::Online),
        Just(PresenceState::Active),
        Just(PresenceState::Offline),
    ]
}

/// Operations on the roster.
#[derive(Debug, Clone)]
pub enum RosterOperation {
    Upsert { id: usize, state: PresenceState },
    Remove { id: usize },
    ReplaceAll { friends: Vec<(usize, PresenceState)> },
    Drain,
}

/// Reference model: id to bucket.
#[derive(Clone, Debug, Default)]
pub struct RosterModel {
    pub buckets: HashMap<usize, PresenceState>,
}

impl ReferenceStateMachine for RosterModel {
    type State = Self;
    type Transition = RosterOperation;

    fn init_state() -> BoxedStrategy<Self::State> {
        Just(Self::default()).boxed()
    }

    fn transitions(_state: &Self::State) -> BoxedStrategy<Self::Transition> {
        prop_oneof![
            6 => (0..ID_POOL, state_strategy())
                .prop_map(|(id, state)| RosterOperation::Upsert { id, state }),
            3 => (0..ID_POOL).prop_map(|id| RosterOperation::Remove { id }),
            1 => prop::collection::vec((0..ID_POOL, state_strategy()), 0..8)
                .prop_map(|friends| RosterOperation::ReplaceAll { friends }),
            1 => Just(RosterOperation::Drain),
        ]
        .boxed()
    }

    fn apply(mut state: Self::State, transition: &Self::Transition) -> Self::State {
        match transition {
            RosterOperation::Upsert { id, state: presence } => {
                state.buckets.insert(*id, *presence);
            }
            RosterOperation::Remove { id } => {
                state.buckets.remove(id);
            }
            RosterOperation::ReplaceAll { friends } => {
                // Last occurrence of an id wins.
                state.buckets = friends.iter().copied().collect();
            }
            RosterOperation::Drain => {
                state.buckets.clear();
            }
        }
        state
    }
}

pub struct RosterTestHarness {
    cache: Arc<PresenceCache>,
}

impl RosterTestHarness {
    fn new() -> Self {
        Self {
            cache: PresenceCache::new(),
        }
    }

    fn apply_operation(&self, op: &RosterOperation, model_before: &RosterModel) {
        match op {
            RosterOperation::Upsert { id, state } => {
                let previous = self.cache.upsert(friend(*id, *state));
                assert_eq!(
                    previous.map(|f| f.presence_state),
                    model_before.buckets.get(id).copied(),
                    "upsert returned the wrong previous entry"
                );
            }
            RosterOperation::Remove { id } => {
                let removed = self.cache.remove(&self::id(*id));
                assert_eq!(removed.is_some(), model_before.buckets.contains_key(id));
            }
            RosterOperation::ReplaceAll { friends } => {
                self.cache
                    .replace_all(friends.iter().map(|(id, state)| friend(*id, *state)));
            }
            RosterOperation::Drain => self.cache.drain(),
        }
    }

    fn verify_invariants(&self, model: &RosterModel) {
        let mut seen: HashMap<String, PresenceState> = HashMap::new();
        for state in PresenceState::ALL {
            for f in self.cache.list_bucket(state) {
                assert_eq!(f.presence_state, state, "friend filed under the wrong bucket");
                assert!(
                    seen.insert(f.id.clone(), state).is_none(),
                    "{} appears in more than one bucket",
                    f.id
                );
            }
        }

        assert_eq!(self.cache.len(), model.buckets.len());
        for n in 0..ID_POOL {
            assert_eq!(
                self.cache.state_of(&id(n)),
                model.buckets.get(&n).copied(),
                "state mismatch for {}",
                id(n)
            );
        }
    }
}

impl StateMachineTest for RosterTestHarness {
    type SystemUnderTest = Self;
    type Reference = RosterModel;

    fn init_test(
        _ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) -> Self::SystemUnderTest {
        Self::new()
    }

    fn apply(
        state: Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
        transition: <Self::Reference as ReferenceStateMachine>::Transition,
    ) -> Self::SystemUnderTest {
        // ref_state is already post-transition; read the prior state off the
        // cache for the return-value checks.
        let before = RosterModel {
            buckets: (0..ID_POOL)
                .filter_map(|n| state.cache.state_of(&id(n)).map(|s| (n, s)))
                .collect(),
        };
        state.apply_operation(&transition, &before);
        state.verify_invariants(ref_state);
        state
    }

    fn check_invariants(
        state: &Self::SystemUnderTest,
        ref_state: &<Self::Reference as ReferenceStateMachine>::State,
    ) {
        state.verify_invariants(ref_state);
    }
}

prop_state_machine! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 10000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn roster_state_machine_test(sequential 1..60 => RosterTestHarness);
}

// =============================================================================
// Envelope round-trip
// =============================================================================

fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-zA-Z0-9 _\"\\\\-]{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-zA-Z]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn decode_inverts_encode(
        event_type in "[a-z]{1,12}(-[a-z]{1,12})?",
        payload in json_strategy(),
    ) {
        let decoded = decode(&encode(&event_type, &payload)).unwrap();
        prop_assert_eq!(decoded.event_type, event_type);
        prop_assert_eq!(decoded.payload, payload);
    }
}

// =============================================================================
// Routed event ordering
// =============================================================================

/// Resolver that knows every user and takes a while to answer.
struct SlowResolver;

#[async_trait]
impl ResourceResolver for SlowResolver {
    async fn fetch_user(&self, id: &str) -> Result<Friend, ApiError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Friend::from_json(&json!({"id": id}))
    }

    async fn fetch_world(&self, id: &str) -> Result<World, ApiError> {
        Err(ApiError::NotFound {
            kind: "world",
            id: id.to_string(),
        })
    }

    async fn fetch_instance(
        &self,
        _world_id: &str,
        instance_id: &str,
    ) -> Result<Instance, ApiError> {
        Err(ApiError::NotFound {
            kind: "instance",
            id: instance_id.to_string(),
        })
    }

    async fn fetch_friends(&self, _offline: bool) -> Result<Vec<Friend>, ApiError> {
        Ok(Vec::new())
    }
}

fn event_for(n: usize, state: PresenceState) -> (&'static str, Value) {
    match state {
        PresenceState::Online => ("friend-online", json!({"userId": id(n), "user": {"id": id(n)}})),
        PresenceState::Active => ("friend-active", json!({"userId": id(n), "user": {"id": id(n)}})),
        PresenceState::Offline => ("friend-offline", json!({"userId": id(n)})),
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        ..ProptestConfig::default()
    })]

    #[test]
    fn last_event_wins(events in prop::collection::vec((0..ID_POOL, state_strategy()), 1..20)) {
        let runtime = Runtime::new().unwrap();
        let cache = PresenceCache::new();
        let router = EventRouter::new(cache.clone(), Arc::new(SlowResolver), Arc::new(NoopHandler));

        runtime.block_on(async {
            for (n, state) in &events {
                let (event_type, payload) = event_for(*n, *state);
                router.dispatch(event_type, payload).await.unwrap();
            }
        });

        let expected: HashMap<usize, PresenceState> = events.iter().copied().collect();
        for (n, state) in expected {
            prop_assert_eq!(cache.state_of(&id(n)), Some(state));
        }
    }
}

#[test]
fn test_remove_twice() {
    let cache = PresenceCache::new();
    cache.upsert(friend(0, PresenceState::Online));

    assert!(cache.remove(&id(0)).is_some());
    assert!(cache.remove(&id(0)).is_none());
}
