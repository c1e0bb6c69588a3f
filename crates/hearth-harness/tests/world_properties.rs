//! Property-based tests over random interleavings of sends, remote posts,
//! link failures, refused reconnects and clock jumps.
//!
//! Invariants are checked after every step. Once the network heals, every
//! client must converge on the server's log and every message a client sent
//! must be on the server exactly once, in send order.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use hearth_client::{ConnectionState, SessionConfig};
use hearth_harness::{InvariantRegistry, SimWorld};
use proptest::prelude::*;

const CLIENTS: usize = 2;

#[derive(Debug, Clone)]
enum Op {
    Send { client: usize, text: String },
    RemotePost { text: String },
    KillLink { client: usize },
    RefuseConnections { count: usize },
    Advance { millis: u64 },
    Typing { client: usize },
    RemoteTyping,
}

fn text_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,12}"
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        5 => (0..CLIENTS, text_strategy()).prop_map(|(client, text)| Op::Send { client, text }),
        2 => text_strategy().prop_map(|text| Op::RemotePost { text }),
        2 => (0..CLIENTS).prop_map(|client| Op::KillLink { client }),
        1 => (1usize..4).prop_map(|count| Op::RefuseConnections { count }),
        3 => (1u64..8_000).prop_map(|millis| Op::Advance { millis }),
        1 => (0..CLIENTS).prop_map(|client| Op::Typing { client }),
        1 => Just(Op::RemoteTyping),
    ]
}

fn world(seed: u64) -> (SimWorld, Vec<usize>) {
    let config = SessionConfig { history_page: 500, ..SessionConfig::default() };
    let mut world = SimWorld::with_config(seed, config);
    let alice = world.add_client("alice", "Alice", true);
    let bob = world.add_client("bob", "Bob", true);
    world.start(alice);
    world.start(bob);
    (world, vec![alice, bob])
}

fn apply(world: &mut SimWorld, clients: &[usize], op: &Op, sent: &mut [Vec<String>]) {
    match op {
        Op::Send { client, text } => {
            world.send(clients[*client], text).unwrap();
            sent[*client].push(text.clone());
        },
        Op::RemotePost { text } => {
            world.server.post("carol", "Carol", text);
            world.settle();
        },
        Op::KillLink { client } => world.kill_link(clients[*client]),
        Op::RefuseConnections { count } => world.server.refuse_connections(*count),
        Op::Advance { millis } => {
            world.advance_by_steps(Duration::from_millis(*millis), Duration::from_millis(500));
        },
        Op::Typing { client } => world.apply(clients[*client], |s| s.start_typing()),
        Op::RemoteTyping => {
            world.server.push_typing("carol", "Carol", true);
            world.settle();
        },
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariants hold after every step of any interleaving.
    #[test]
    fn invariants_hold_under_faults(seed in any::<u64>(), ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (mut world, clients) = world(seed);
        let registry = InvariantRegistry::standard();
        let mut sent = vec![Vec::new(); CLIENTS];

        for (step, op) in ops.iter().enumerate() {
            apply(&mut world, &clients, op, &mut sent);
            world.assert_invariants(&registry, &format!("step {step}: {op:?}"));
        }
    }

    /// After the network heals, every client holds exactly the server's log
    /// and nothing is duplicated or reordered.
    #[test]
    fn clients_converge_after_healing(seed in any::<u64>(), ops in prop::collection::vec(op_strategy(), 1..40)) {
        let (mut world, clients) = world(seed);
        let mut sent = vec![Vec::new(); CLIENTS];
        for op in &ops {
            apply(&mut world, &clients, op, &mut sent);
        }

        world.server.refuse_connections(0);
        world.advance_by_steps(Duration::from_secs(90), Duration::from_millis(500));

        let server_ids: Vec<_> = world.server.messages().iter().map(|m| m.id).collect();
        for (index, &client) in clients.iter().enumerate() {
            let session = world.session(client);
            prop_assert_eq!(session.connection_state(), ConnectionState::Connected);
            prop_assert_eq!(session.unconfirmed_count(), 0);

            let ids: Vec<_> = session.messages().map(|m| m.server_id()).collect();
            prop_assert!(ids.iter().all(Option::is_some), "local entries remain: {:?}", ids);
            let ids: Vec<_> = ids.into_iter().flatten().collect();
            prop_assert_eq!(&ids, &server_ids);

            let user = &session.identity().user_id;
            let on_server: Vec<_> = world
                .server
                .messages()
                .iter()
                .filter(|m| &m.sender_id == user)
                .map(|m| match &m.body {
                    hearth_proto::payloads::chat::WireBody::Text { text } => text.clone(),
                })
                .collect();
            prop_assert_eq!(&on_server, &sent[index]);
        }
        world.assert_invariants(&InvariantRegistry::standard(), "after healing");
    }
}
