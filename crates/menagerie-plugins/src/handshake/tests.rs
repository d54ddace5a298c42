//! Unit tests for handshake line parsing.

use std::path::PathBuf;

use rstest::rstest;

use super::*;
use crate::transport::TransportKind;

#[test]
fn parses_a_tcp_line_without_proof() {
    let line = HandshakeLine::parse("1|3|tcp|127.0.0.1:41017|stream-rpc\n").expect("parses");
    assert_eq!(line.core_protocol, 1);
    assert_eq!(line.plugin_protocol, 3);
    assert_eq!(line.endpoint, Endpoint::Tcp("127.0.0.1:41017".into()));
    assert_eq!(line.transport, TransportKind::StreamRpc);
    assert!(line.server_proof.is_none());
}

#[test]
fn parses_a_unix_line_with_proof() {
    let line =
        HandshakeLine::parse("1|1|unix|/tmp/cat.sock|framed-rpc|deadbeef").expect("parses");
    assert_eq!(line.endpoint, Endpoint::Unix(PathBuf::from("/tmp/cat.sock")));
    assert_eq!(line.server_proof.as_deref(), Some("deadbeef"));
}

#[rstest]
#[case::too_few("1|1|tcp|addr")]
#[case::too_many("1|1|tcp|addr|framed-rpc|proof|extra")]
#[case::core_not_numeric("one|1|tcp|addr|framed-rpc")]
#[case::plugin_not_numeric("1|one|tcp|addr|framed-rpc")]
#[case::unknown_network("1|1|carrier-pigeon|addr|framed-rpc")]
#[case::unknown_transport("1|1|tcp|addr|telepathy")]
#[case::empty("")]
fn malformed_lines_are_rejected(#[case] raw: &str) {
    let err = HandshakeLine::parse(raw).expect_err("should fail");
    assert!(matches!(err, HandshakeError::Malformed { .. }));
}

#[test]
fn empty_proof_field_reads_as_none() {
    let line = HandshakeLine::parse("1|1|tcp|addr|framed-rpc|").expect("parses");
    assert!(line.server_proof.is_none());
}

#[rstest]
#[case::tcp_no_proof("1|2|tcp|127.0.0.1:9|framed-rpc")]
#[case::unix_with_proof("1|2|unix|/tmp/x.sock|stream-rpc|cafe")]
fn render_round_trips(#[case] raw: &str) {
    let line = HandshakeLine::parse(raw).expect("parses");
    assert_eq!(line.render(), raw);
}
