// SPDX-License-Identifier: MIT OR Apache-2.0

use assert_matches::assert_matches;

use crate::config::RoundConfig;
use crate::group::Role;
use crate::message::{BulkMessage, MessageType, NetworkMessage, RoundId, SignedMessage};
use crate::randomizer::RANDOMIZER_SEED_SIZE;
use crate::round::{RoundError, RoundOutput, RoundState};
use crate::slot::SLOT_HEADER_SIZE;
use crate::test_utils::{
    MemberId, Network, QueueDataSource, TestGroup, TransparentShuffle, setup_logging,
};
use crate::traits::FaultHook;

const MAX_STEPS: usize = 10_000;

fn round_id() -> RoundId {
    RoundId::from_bytes([7; 32])
}

/// Four members, members 1 and 3 are servers, member 0 leads.
fn test_group() -> TestGroup {
    TestGroup::new(4, &[1, 3], 0, [1; 32])
}

fn network(
    test_group: &TestGroup,
    config: RoundConfig,
    sender: Option<(MemberId, &[u8])>,
) -> Network {
    let rounds = test_group
        .ids()
        .into_iter()
        .map(|id| {
            let payloads = match sender {
                Some((sender, payload)) if sender == id => vec![payload.to_vec()],
                _ => vec![],
            };
            test_group.round(id, round_id(), config.clone(), payloads)
        })
        .collect();
    Network::new(rounds)
}

fn everyone_received(network: &Network) -> bool {
    network
        .ids()
        .into_iter()
        .all(|id| !network.deliveries_of(id).is_empty())
}

fn run_dry(network: &mut Network) {
    for _ in 0..MAX_STEPS {
        if !network.step() {
            return;
        }
    }
    panic!("network did not settle");
}

fn stop_all(network: &mut Network) {
    for id in network.ids() {
        network.round_mut(id).request_stop();
    }
    assert!(network.process_until_finished(MAX_STEPS));
}

/// Flips a byte in the signature of our own slot record.
struct FlipSignature;

impl FaultHook for FlipSignature {
    fn slot_record(&mut self, phase: u32, record: &mut Vec<u8>) {
        if phase == 0 {
            record[RANDOMIZER_SEED_SIZE + 8] ^= 1;
        }
    }
}

/// Leader swaps the first two slots of the combined vector.
struct SwapSlots;

impl FaultHook for SwapSlots {
    fn combined(&mut self, phase: u32, combined: &mut Vec<u8>) {
        if phase == 0 {
            let (first, second) = combined.split_at_mut(SLOT_HEADER_SIZE);
            first.swap_with_slice(&mut second[..SLOT_HEADER_SIZE]);
        }
    }
}

/// Reveals a user contribution one byte shorter than committed to.
struct TruncateReveal;

impl FaultHook for TruncateReveal {
    fn reveal(&mut self, role: Role, _phase: u32, contribution: &mut Vec<u8>) {
        if role == Role::User {
            contribution.pop();
        }
    }
}

/// Reveals a user contribution which differs from what was committed to.
struct AlterReveal;

impl FaultHook for AlterReveal {
    fn reveal(&mut self, role: Role, _phase: u32, contribution: &mut Vec<u8>) {
        if role == Role::User {
            contribution[0] ^= 1;
        }
    }
}

/// Leader puts the combined vector of phase 0 back into phase 1.
#[derive(Default)]
struct ReplayCombined {
    first: Option<Vec<u8>>,
}

impl FaultHook for ReplayCombined {
    fn combined(&mut self, phase: u32, combined: &mut Vec<u8>) {
        match phase {
            0 => self.first = Some(combined.clone()),
            1 => {
                if let Some(first) = &self.first {
                    *combined = first.clone();
                }
            }
            _ => (),
        }
    }
}

/// Appends a byte to our own slot record.
struct GrowRecord;

impl FaultHook for GrowRecord {
    fn slot_record(&mut self, _phase: u32, record: &mut Vec<u8>) {
        record.push(0);
    }
}

#[test]
fn anonymous_message_reaches_everyone() {
    setup_logging();

    let test_group = test_group();
    let mut network = network(&test_group, RoundConfig::default(), Some((2, b"hi".as_slice())));
    network.start();

    assert!(network.process_until(everyone_received, MAX_STEPS));

    // Payload was announced in phase 0 and sent in phase 1, everyone moved on to phase 2 since.
    let slot = network.round(2).my_slot().unwrap();
    for id in network.ids() {
        let round = network.round(id);
        assert_eq!(network.deliveries_of(id), vec![(slot, b"hi".to_vec())]);
        assert_eq!(round.phase(), 2);
        assert_eq!(round.expected_bulk_size(), 4 * SLOT_HEADER_SIZE);
        assert!(round.audit_log().is_empty());
        assert!(!round.is_stopped());
    }

    stop_all(&mut network);

    for id in network.ids() {
        let round = network.round(id);
        assert!(round.is_successful());
        assert!(round.is_interrupted());
        assert_eq!(round.state(), RoundState::Finished);
        assert_eq!(round.phase(), 2);
        assert!(round.faults().is_empty());
        assert_eq!(round.offline_log_len(), 0);

        // Nothing else got delivered in the last phase.
        assert_eq!(network.deliveries_of(id).len(), 1);

        let result = network.results.get(&id).unwrap();
        assert!(result.successful);
        assert!(result.interrupted);
        assert_eq!(result.round_id, round_id());
    }

    // Only the leader collects contributions.
    assert!(network.round(0).message_log().len() > network.round(1).message_log().len());
}

#[test]
fn members_commit_before_revealing() {
    let test_group = test_group();
    let mut network = network(
        &test_group,
        RoundConfig::default(),
        Some((1, b"commit".as_slice())),
    );
    network.start();
    assert!(network.process_until(everyone_received, MAX_STEPS));

    for phase in 0..2 {
        let leader_commits = network.positions(MessageType::LeaderCommitData, phase);
        assert_eq!(leader_commits.len(), 4);

        // Leader only broadcasts its digest after receiving all six commitments.
        let commits = network
            .positions(MessageType::UserCommitData, phase)
            .into_iter()
            .chain(network.positions(MessageType::ServerCommitData, phase))
            .collect::<Vec<_>>();
        assert_eq!(commits.len(), 6);
        let first_leader_commit = leader_commits.iter().map(|(pos, _)| *pos).min().unwrap();
        assert!(commits.iter().all(|(pos, _)| *pos < first_leader_commit));

        // Nobody reveals before having seen the leader's digest.
        let reveals = network
            .positions(MessageType::UserBulkData, phase)
            .into_iter()
            .chain(network.positions(MessageType::ServerBulkData, phase))
            .collect::<Vec<_>>();
        assert_eq!(reveals.len(), 6);
        for (pos, reveal) in reveals {
            let seen = leader_commits
                .iter()
                .find(|(_, entry)| entry.recipient == reveal.sender)
                .map(|(seen, _)| *seen)
                .unwrap();
            assert!(seen < pos);
        }

        // Combined data follows all reveals.
        let last_reveal = network
            .positions(MessageType::UserBulkData, phase)
            .into_iter()
            .chain(network.positions(MessageType::ServerBulkData, phase))
            .map(|(pos, _)| pos)
            .max()
            .unwrap();
        assert!(
            network
                .positions(MessageType::LeaderBulkData, phase)
                .iter()
                .all(|(pos, _)| *pos > last_reveal)
        );
    }
}

#[test]
fn flipped_signature_fails_round() {
    setup_logging();

    let test_group = test_group();
    let mut network = network(&test_group, RoundConfig::default(), None);
    network.round_mut(2).set_fault_hook(FlipSignature);
    network.start();

    assert!(network.process_until_finished(MAX_STEPS));

    let slot = network.round(2).my_slot().unwrap();
    for id in network.ids() {
        let round = network.round(id);
        assert!(!round.is_successful());
        assert!(!round.is_interrupted());
        assert_eq!(round.phase(), 0);
        assert_eq!(round.faults().faulty_slots(), vec![slot]);

        let result = network.results.get(&id).unwrap();
        assert!(!result.successful);
        assert_eq!(result.faulty_slots, vec![slot]);
        assert!(result.bad_members.is_empty());
    }
    assert!(network.deliveries.is_empty());
}

#[test]
fn replayed_records_blame_the_leader() {
    setup_logging();

    let test_group = test_group();
    let rounds = test_group
        .ids()
        .into_iter()
        .map(|id| {
            let payloads = if id == 2 {
                vec![vec![], b"hi".to_vec()]
            } else {
                vec![]
            };
            test_group.round(id, round_id(), RoundConfig::default(), payloads)
        })
        .collect();
    let mut network = Network::new(rounds);
    network.round_mut(0).set_fault_hook(ReplayCombined::default());
    network.start();

    assert!(network.process_until_finished(MAX_STEPS));

    for id in network.ids() {
        let round = network.round(id);
        assert!(!round.is_successful());
        assert_eq!(round.phase(), 1);
        assert!(
            round
                .stop_reason()
                .unwrap()
                .contains("carries a record of phase 0 in phase 1")
        );

        // No slot owner is blamed for what the leader did.
        let result = network.results.get(&id).unwrap();
        assert!(result.faulty_slots.is_empty());
        assert_eq!(result.replayed_slots, vec![0]);
        assert_eq!(result.suspected_leader, Some(0));
    }
    assert!(network.deliveries.is_empty());
}

#[test]
fn oversized_own_record_ends_round() {
    let test_group = test_group();
    let mut network = network(&test_group, RoundConfig::default(), None);
    network.round_mut(2).set_fault_hook(GrowRecord);
    network.start();

    run_dry(&mut network);

    let round = network.round(2);
    assert!(round.is_stopped());
    assert!(!round.is_successful());
    assert!(round.faults().is_empty());
    assert_eq!(
        round.stop_reason(),
        Some(
            format!(
                "own slot record of {} bytes does not fit slot of {} bytes",
                SLOT_HEADER_SIZE + 1,
                SLOT_HEADER_SIZE
            )
            .as_str()
        )
    );

    // Nobody else got a commitment from member 2.
    assert_eq!(network.round(0).state(), RoundState::CommitSharing);
    assert_eq!(network.round(0).commit_count(), 5);
}

#[test]
fn payloads_up_to_max_size_are_delivered() {
    setup_logging();

    let test_group = test_group();
    let config = RoundConfig {
        max_payload_size: 16,
        ..RoundConfig::default()
    };
    let rounds = test_group
        .ids()
        .into_iter()
        .map(|id| {
            let data_source = match id {
                // Misbehaving source handing out more than asked for.
                1 => QueueDataSource::new(vec![vec![7; 40]]).ignoring_max_size(),
                2 => QueueDataSource::new(vec![vec![0xab; 16]]),
                _ => QueueDataSource::default(),
            };
            test_group.round_with_source(id, round_id(), config.clone(), data_source)
        })
        .collect();
    let mut network = Network::new(rounds);
    network.start();

    assert!(network.process_until(everyone_received, MAX_STEPS));

    let mut expected = vec![
        (network.round(1).my_slot().unwrap(), vec![7; 16]),
        (network.round(2).my_slot().unwrap(), vec![0xab; 16]),
    ];
    expected.sort();

    for id in network.ids() {
        let mut delivered = network.deliveries_of(id);
        delivered.sort();
        assert_eq!(delivered, expected);

        let round = network.round(id);
        assert_eq!(round.phase(), 2);
        assert_eq!(round.expected_bulk_size(), 4 * SLOT_HEADER_SIZE);
        assert!(round.audit_log().is_empty());
    }
}

#[test]
fn message_log_is_drained_per_phase() {
    let test_group = test_group();
    let mut network = network(&test_group, RoundConfig::default(), None);
    network.start();

    // Leader sees its own combined vector first and only kept the traffic of phase 0 so far:
    // six commitments, six contributions and both of its own broadcasts.
    assert!(network.process_until(|network| network.round(0).phase() == 1, MAX_STEPS));
    let phase_0 = network.round_mut(0).take_message_log();
    assert_eq!(phase_0.len(), 14);
    assert!(network.round(0).message_log().is_empty());

    assert!(network.process_until(|network| network.round(0).phase() == 2, MAX_STEPS));
    assert_eq!(network.round(0).message_log().len(), 14);
    assert!(network.round_mut(0).take_audit_log().is_empty());
}

#[test]
fn swapped_slots_fail_round() {
    let test_group = test_group();
    let mut network = network(&test_group, RoundConfig::default(), None);
    network.round_mut(0).set_fault_hook(SwapSlots);
    network.start();

    assert!(network.process_until_finished(MAX_STEPS));

    for id in network.ids() {
        let result = network.results.get(&id).unwrap();
        assert!(!result.successful);
        assert_eq!(result.faulty_slots, vec![0]);
    }
}

#[test]
fn wrong_length_reveal_is_dropped() {
    setup_logging();

    let test_group = test_group();
    let mut network = network(&test_group, RoundConfig::default(), None);
    network.round_mut(2).set_fault_hook(TruncateReveal);
    network.start();

    run_dry(&mut network);

    let leader = network.round(0);
    assert_eq!(leader.state(), RoundState::DataSharing);
    assert_eq!(leader.phase(), 0);
    assert_eq!(leader.data_count(), 5);
    assert!(!leader.is_stopped());
    assert!(leader.is_successful());

    let rejected = leader.audit_log().by_sender(&2).collect::<Vec<_>>();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].phase, 0);
    assert_eq!(rejected[0].round_id, round_id());

    for id in [1, 2, 3] {
        assert_eq!(network.round(id).state(), RoundState::DataReceiving);
    }
    assert!(network.results.is_empty());
    assert!(network.deliveries.is_empty());
}

#[test]
fn verified_reveals_reject_mismatch() {
    let test_group = test_group();
    let config = RoundConfig {
        verify_reveals: true,
        ..RoundConfig::default()
    };
    let mut network = network(&test_group, config, None);
    network.round_mut(3).set_fault_hook(AlterReveal);
    network.start();

    run_dry(&mut network);

    let leader = network.round(0);
    assert_eq!(leader.state(), RoundState::DataSharing);
    let rejected = leader.audit_log().by_sender(&3).collect::<Vec<_>>();
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].reason.contains("does not match its commitment"));
    assert!(network.results.is_empty());
}

#[test]
fn unverified_reveals_are_caught_by_slot_signatures() {
    let test_group = test_group();
    let mut network = network(&test_group, RoundConfig::default(), None);
    network.round_mut(3).set_fault_hook(AlterReveal);
    network.start();

    assert!(network.process_until_finished(MAX_STEPS));

    // The altered byte lands in the first slot.
    for id in network.ids() {
        let result = network.results.get(&id).unwrap();
        assert!(!result.successful);
        assert_eq!(result.faulty_slots, vec![0]);
    }
    assert!(network.round(0).audit_log().is_empty());
}

#[test]
fn failed_key_shuffle_reports_bad_members() {
    let test_group = test_group();
    let rounds = test_group
        .ids()
        .into_iter()
        .map(|id| {
            let shuffle = TransparentShuffle::new(id, 4).failing(vec![3]);
            test_group.round_with_shuffle(id, round_id(), RoundConfig::default(), vec![], shuffle)
        })
        .collect();
    let mut network = Network::new(rounds);
    network.start();

    assert!(network.process_until_finished(MAX_STEPS));

    for id in network.ids() {
        let round = network.round(id);
        assert!(!round.is_successful());
        assert_eq!(round.faults().bad_members(), vec![3]);
        assert_eq!(round.my_slot(), None);

        let result = network.results.get(&id).unwrap();
        assert_eq!(result.bad_members, vec![3]);
    }
}

#[test]
fn incomplete_key_shuffle_fails_round() {
    let test_group = test_group();
    let rounds = test_group
        .ids()
        .into_iter()
        .map(|id| {
            let shuffle = TransparentShuffle::new(id, 4).truncated(3);
            test_group.round_with_shuffle(id, round_id(), RoundConfig::default(), vec![], shuffle)
        })
        .collect();
    let mut network = Network::new(rounds);
    network.start();

    assert!(network.process_until_finished(MAX_STEPS));

    for id in network.ids() {
        let result = network.results.get(&id).unwrap();
        assert!(!result.successful);
        assert!(
            result
                .reason
                .as_deref()
                .unwrap()
                .contains("yielded 3 descriptors")
        );
    }
}

#[test]
fn premature_messages_are_replayed() {
    setup_logging();

    let test_group = test_group();

    // Reference run without interference.
    let mut reference = network(
        &test_group,
        RoundConfig::default(),
        Some((3, b"later".as_slice())),
    );
    reference.start();
    assert!(reference.process_until(everyone_received, MAX_STEPS));
    stop_all(&mut reference);

    // Leader sees its own commit digest only after everyone else revealed.
    let mut delayed = network(
        &test_group,
        RoundConfig::default(),
        Some((3, b"later".as_slice())),
    );
    delayed.hold(|entry| {
        entry.recipient == 0
            && entry.sender == 0
            && entry.is(MessageType::LeaderCommitData, 0)
    });
    delayed.start();
    run_dry(&mut delayed);

    assert_eq!(delayed.held(), 1);
    let leader = delayed.round(0);
    assert_eq!(leader.state(), RoundState::CommitReceiving);
    assert_eq!(leader.offline_log_len(), 5);
    assert!(leader.audit_log().is_empty());

    delayed.release();
    assert!(delayed.process_until(everyone_received, MAX_STEPS));
    assert_eq!(delayed.round(0).offline_log_len(), 0);
    stop_all(&mut delayed);

    for id in reference.ids() {
        assert_eq!(reference.deliveries_of(id), delayed.deliveries_of(id));
        assert_eq!(reference.results.get(&id), delayed.results.get(&id));
        assert_eq!(
            reference.round(id).message_log().len(),
            delayed.round(id).message_log().len()
        );
        assert_eq!(reference.round(id).phase(), delayed.round(id).phase());
    }
}

#[test]
fn stale_phase_is_rejected() {
    let test_group = test_group();
    let mut network = network(&test_group, RoundConfig::default(), None);
    network.start();

    assert!(network.process_until(
        |network| network.ids().into_iter().all(|id| network.round(id).phase() >= 1),
        MAX_STEPS
    ));

    let (_, stale) = network
        .positions(MessageType::UserCommitData, 0)
        .into_iter()
        .find(|(_, entry)| entry.sender == 1)
        .unwrap();
    let stale = stale.bytes.clone();
    network.inject(1, 0, stale);

    assert!(network.process_until(
        |network| network.round(0).audit_log().by_sender(&1).count() == 1,
        MAX_STEPS
    ));
    let rejected = network.round(0).audit_log().by_sender(&1).next().unwrap().clone();
    assert!(rejected.reason.contains("message for phase 0"));

    // Round keeps going.
    assert!(network.process_until(|network| network.round(0).phase() >= 3, MAX_STEPS));
    assert!(network.round(0).is_successful());

    assert_eq!(network.round_mut(0).take_audit_log().len(), 1);
    assert!(network.round(0).audit_log().is_empty());
}

#[test]
fn foreign_and_forged_messages_are_rejected() {
    let test_group = test_group();
    let mut network = network(&test_group, RoundConfig::default(), None);
    network.start();

    let signed = |signer: usize, round_id: RoundId| {
        let message = BulkMessage::new(MessageType::UserCommitData, round_id, 0, vec![0; 32]);
        let signed =
            SignedMessage::sign(&message, test_group.credentials[signer].identity_secret())
                .unwrap();
        NetworkMessage::bulk(signed.to_bytes().unwrap())
            .to_bytes()
            .unwrap()
    };

    // Message of another round.
    network.inject(1, 0, signed(1, RoundId::from_bytes([9; 32])));
    // Member 2 pretending to be member 1.
    network.inject(1, 0, signed(2, round_id()));
    // Commitments are only handled by the leader.
    network.inject(1, 2, signed(1, round_id()));
    // Garbage.
    network.inject(3, 0, vec![1, 2, 3]);

    assert!(network.process_until(
        |network| network.round(0).audit_log().len() == 3,
        MAX_STEPS
    ));

    let reasons = network
        .round(0)
        .audit_log()
        .entries()
        .iter()
        .map(|entry| entry.reason.clone())
        .collect::<Vec<_>>();
    assert!(reasons[0].contains("message for round"));
    assert!(reasons[1].contains("invalid sender signature"));
    assert!(reasons[2].contains("invalid envelope"));

    let member = network.round(2).audit_log().entries().to_vec();
    assert_eq!(member.len(), 1);
    assert!(member[0].reason.contains("can only be handled by the leader"));

    // None of this prevents the round from making progress.
    assert!(network.process_until(|network| network.round(0).phase() >= 1, MAX_STEPS));
}

#[test]
fn stopped_round_ignores_messages() {
    let test_group = test_group();
    let mut round = test_group.round(1, round_id(), RoundConfig::default(), vec![]);
    round.start().unwrap();

    let outputs = round.stop("shutting down");
    assert_matches!(
        outputs.as_slice(),
        [RoundOutput::Finished(result)] if !result.successful && result.interrupted
    );
    assert_eq!(round.stop_reason(), Some("shutting down"));
    assert!(round.stop("again").is_empty());

    let message = BulkMessage::new(MessageType::LeaderCommitData, round_id(), 0, vec![0; 32]);
    let signed =
        SignedMessage::sign(&message, test_group.credentials[0].identity_secret()).unwrap();
    let bytes = NetworkMessage::bulk(signed.to_bytes().unwrap())
        .to_bytes()
        .unwrap();
    assert!(round.on_message(0, &bytes).is_empty());
    assert!(round.audit_log().is_empty());
    assert!(round.message_log().is_empty());
    assert_eq!(round.offline_log_len(), 0);
}

#[test]
fn rounds_start_once() {
    let test_group = test_group();
    let mut round = test_group.round(0, round_id(), RoundConfig::default(), vec![]);
    assert_eq!(round.state(), RoundState::Offline);
    assert!(round.is_leader());
    assert!(!round.is_server());

    let outputs = round.start().unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(round.state(), RoundState::KeyShuffling);
    assert_matches!(round.start(), Err(RoundError::AlreadyStarted));

    // Messages from outside the group are ignored.
    assert!(round.on_message(42, &outputs_bytes(&outputs)).is_empty());
    assert!(round.audit_log().is_empty());
}

fn outputs_bytes(outputs: &[RoundOutput<MemberId>]) -> Vec<u8> {
    match &outputs[0] {
        RoundOutput::Broadcast { message } => message.clone(),
        _ => panic!("expected broadcast"),
    }
}

#[test]
fn bulk_messages_before_start_are_rejected() {
    let test_group = test_group();
    let mut round = test_group.round(0, round_id(), RoundConfig::default(), vec![]);

    let message = BulkMessage::new(MessageType::UserCommitData, round_id(), 0, vec![0; 32]);
    let signed =
        SignedMessage::sign(&message, test_group.credentials[1].identity_secret()).unwrap();
    let bytes = NetworkMessage::bulk(signed.to_bytes().unwrap())
        .to_bytes()
        .unwrap();

    assert!(round.on_message(1, &bytes).is_empty());
    assert_eq!(round.audit_log().len(), 1);
    assert_eq!(round.offline_log_len(), 0);
}
