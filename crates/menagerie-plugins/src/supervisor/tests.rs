//! Unit tests for handshake validation and supervision plumbing.
//!
//! Process-level launch behaviour is covered by the integration tests in
//! `tests/launch.rs`; these tests exercise the pure validation helpers and
//! the contract table.

use rstest::rstest;

use super::*;
use crate::handshake::{Endpoint, HandshakeConfig};

fn descriptor(allowed: Vec<TransportKind>, authenticated: bool) -> LaunchDescriptor {
    LaunchDescriptor {
        name: String::from("cat"),
        contract: String::from("animal"),
        handshake: HandshakeConfig {
            protocol_version: 1,
            magic_cookie_key: String::from("ANIMAL_PLUGIN"),
            magic_cookie_value: String::from("hello"),
        },
        command: std::path::PathBuf::from("/plugins/cat/cat"),
        args: Vec::new(),
        allowed_transports: allowed,
        require_authenticated_transport: authenticated,
        checksum: None,
    }
}

fn handshake_line(
    core: u32,
    plugin: u32,
    transport: TransportKind,
    proof: Option<String>,
) -> HandshakeLine {
    HandshakeLine {
        core_protocol: core,
        plugin_protocol: plugin,
        endpoint: Endpoint::Tcp(String::from("127.0.0.1:41017")),
        transport,
        server_proof: proof,
    }
}

const KEY: [u8; 32] = [7u8; 32];

// ---------------------------------------------------------------------------
// validate_handshake
// ---------------------------------------------------------------------------

#[test]
fn accepts_a_matching_handshake() {
    let descriptor = descriptor(vec![TransportKind::FramedRpc], false);
    let line = handshake_line(1, 1, TransportKind::FramedRpc, None);
    validate_handshake(&descriptor, &line, &KEY).expect("should validate");
}

#[rstest]
#[case::core_mismatch(9, 1)]
#[case::plugin_mismatch(1, 9)]
fn rejects_protocol_mismatches(#[case] core: u32, #[case] plugin: u32) {
    let descriptor = descriptor(vec![TransportKind::FramedRpc], false);
    let line = handshake_line(core, plugin, TransportKind::FramedRpc, None);
    let err = validate_handshake(&descriptor, &line, &KEY).expect_err("should fail");
    assert!(matches!(err, HandshakeError::ProtocolMismatch { .. }));
}

#[test]
fn rejects_a_transport_outside_the_allowed_set() {
    let descriptor = descriptor(vec![TransportKind::FramedRpc], false);
    let line = handshake_line(1, 1, TransportKind::StreamRpc, None);
    let err = validate_handshake(&descriptor, &line, &KEY).expect_err("should fail");
    match err {
        HandshakeError::TransportNotAllowed { requested, allowed } => {
            assert_eq!(requested, TransportKind::StreamRpc);
            assert_eq!(allowed, vec![TransportKind::FramedRpc]);
        }
        other => panic!("expected TransportNotAllowed, got {other:?}"),
    }
}

#[test]
fn authenticated_transport_requires_a_proof() {
    let descriptor = descriptor(vec![TransportKind::FramedRpc], true);
    let line = handshake_line(1, 1, TransportKind::FramedRpc, None);
    let err = validate_handshake(&descriptor, &line, &KEY).expect_err("should fail");
    assert!(matches!(err, HandshakeError::AuthenticationFailed { .. }));
}

#[test]
fn authenticated_transport_verifies_the_proof() {
    let descriptor = descriptor(vec![TransportKind::FramedRpc], true);

    let good = handshake_line(
        1,
        1,
        TransportKind::FramedRpc,
        Some(expected_proof(&KEY, "hello")),
    );
    validate_handshake(&descriptor, &good, &KEY).expect("valid proof passes");

    let bad = handshake_line(
        1,
        1,
        TransportKind::FramedRpc,
        Some(expected_proof(&KEY, "wrong-cookie")),
    );
    let err = validate_handshake(&descriptor, &bad, &KEY).expect_err("should fail");
    assert!(matches!(err, HandshakeError::AuthenticationFailed { .. }));
}

#[test]
fn proof_depends_on_key_and_cookie() {
    let proof = expected_proof(&KEY, "hello");
    assert_eq!(proof.len(), 64);
    assert_eq!(proof, expected_proof(&KEY, "hello"));
    assert_ne!(proof, expected_proof(&[8u8; 32], "hello"));
    assert_ne!(proof, expected_proof(&KEY, "goodbye"));
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

#[rstest]
#[case::animal("animal", PluginContract::Animal)]
#[case::animal_stream("animal-stream", PluginContract::AnimalStream)]
fn contract_tags_round_trip(#[case] tag: &str, #[case] contract: PluginContract) {
    assert_eq!(PluginContract::from_tag(tag), Some(contract));
    assert_eq!(contract.as_tag(), tag);
}

#[test]
fn unknown_contract_tag_is_none() {
    assert_eq!(PluginContract::from_tag("mineral"), None);
}

#[rstest]
#[case::animal_framed(PluginContract::Animal, TransportKind::FramedRpc, true)]
#[case::animal_stream_rejected(PluginContract::Animal, TransportKind::StreamRpc, false)]
#[case::stream_on_mux(PluginContract::AnimalStream, TransportKind::StreamRpc, true)]
#[case::stream_fallback(PluginContract::AnimalStream, TransportKind::FramedRpc, true)]
fn contract_transport_support(
    #[case] contract: PluginContract,
    #[case] transport: TransportKind,
    #[case] supported: bool,
) {
    assert_eq!(contract.supports(transport), supported);
}

// ---------------------------------------------------------------------------
// Launch preconditions
// ---------------------------------------------------------------------------

#[test]
fn empty_transport_set_refuses_to_launch() {
    let supervisor = PluginSupervisor::new(DEFAULT_HANDSHAKE_TIMEOUT);
    let descriptor = descriptor(Vec::new(), false);
    let err = supervisor.launch(&descriptor).expect_err("should refuse");
    assert!(matches!(
        err,
        LaunchError::Supervisor(SupervisorError::NoAllowedTransports { .. })
    ));
}

#[test]
fn unspawnable_command_is_spawn_failed() {
    let supervisor = PluginSupervisor::new(DEFAULT_HANDSHAKE_TIMEOUT);
    let mut descriptor = descriptor(vec![TransportKind::FramedRpc], false);
    descriptor.command = std::path::PathBuf::from("/no/such/binary");
    let err = supervisor.launch(&descriptor).expect_err("should fail");
    assert!(matches!(
        err,
        LaunchError::Supervisor(SupervisorError::SpawnFailed { .. })
    ));
}
