use std::collections::BTreeSet;

use proptest::prelude::*;

use mesh_protocol::conversation::inviter_of;
use mesh_protocol::{ConversationState, Network, PeerId, Role};

fn arb_peer() -> impl Strategy<Value = PeerId> {
    "[a-h]".prop_map(PeerId::from)
}

fn arb_network() -> impl Strategy<Value = Network> {
    (arb_peer(), prop::collection::btree_set(arb_peer(), 0..8))
        .prop_map(|(id, peers)| Network::with_peers(id, peers))
}

fn arb_state() -> impl Strategy<Value = ConversationState> {
    prop_oneof![
        Just(ConversationState::Negotiating),
        Just(ConversationState::AwaitingHello),
        Just(ConversationState::Established),
        Just(ConversationState::Closed),
    ]
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::Inviter), Just(Role::Invitee)]
}

// --- Network extension set algebra ---

proptest! {
    #[test]
    fn unknown_peers_are_new_and_foreign(local in arb_network(), remote in arb_network()) {
        let unknown = local.unknown_in(&remote);
        for peer in &unknown {
            prop_assert!(remote.knows(peer));
            prop_assert!(!local.knows(peer));
            prop_assert_ne!(peer, local.id());
            prop_assert_ne!(peer, remote.id());
        }
    }

    #[test]
    fn unknown_peers_cover_the_difference(local in arb_network(), remote in arb_network()) {
        let unknown: BTreeSet<PeerId> = local.unknown_in(&remote).into_iter().collect();
        let expected: BTreeSet<PeerId> = remote
            .peers()
            .iter()
            .filter(|p| *p != local.id() && !local.knows(p))
            .cloned()
            .collect();
        prop_assert_eq!(unknown, expected);
    }

    #[test]
    fn learning_everything_leaves_nothing_unknown(local in arb_network(), remote in arb_network()) {
        let mut local = local;
        for peer in local.unknown_in(&remote) {
            local.add_peer(peer);
        }
        prop_assert!(local.unknown_in(&remote).is_empty());
    }

    #[test]
    fn network_never_knows_itself(net in arb_network(), extra in arb_peer()) {
        let mut net = net;
        net.add_peer(extra);
        prop_assert!(!net.knows(net.id()));
    }
}

// --- Conversation state machine ---

proptest! {
    #[test]
    fn closed_is_reachable_and_terminal(from in arb_state(), next in arb_state()) {
        if from != ConversationState::Closed {
            prop_assert!(from.can_transition_to(ConversationState::Closed));
        } else {
            prop_assert!(from.transition(next).is_err());
        }
    }

    #[test]
    fn transition_agrees_with_predicate(from in arb_state(), next in arb_state()) {
        prop_assert_eq!(from.can_transition_to(next), from.transition(next).is_ok());
    }

    #[test]
    fn both_ends_agree_on_the_inviter(role in arb_role(), a in arb_peer(), b in arb_peer()) {
        let mirrored = match role {
            Role::Inviter => Role::Invitee,
            Role::Invitee => Role::Inviter,
        };
        prop_assert_eq!(inviter_of(role, &a, &b), inviter_of(mirrored, &b, &a));
    }
}
