//! Unit tests for transport selection and the two wire codecs.

use std::io::{Cursor, Seek, SeekFrom};

use rstest::rstest;
use serde_json::{Value, json};

use super::framed::FramedConnection;
use super::mux::{FrameKind, MuxFrame};
use super::*;

// ---------------------------------------------------------------------------
// Transport tags and format mapping
// ---------------------------------------------------------------------------

#[rstest]
#[case::framed(TransportKind::FramedRpc, "framed-rpc")]
#[case::stream(TransportKind::StreamRpc, "stream-rpc")]
fn tags_round_trip(#[case] kind: TransportKind, #[case] tag: &str) {
    assert_eq!(kind.as_str(), tag);
    assert_eq!(kind.to_string(), tag);
    assert_eq!(TransportKind::from_tag(tag), Some(kind));
}

#[test]
fn unknown_tag_is_none() {
    assert_eq!(TransportKind::from_tag("telepathy"), None);
}

#[rstest]
#[case::framed("framed-rpc", &[TransportKind::FramedRpc][..])]
#[case::stream("stream-rpc", &[TransportKind::FramedRpc, TransportKind::StreamRpc][..])]
#[case::unknown("carrier-pigeon", &[][..])]
#[case::empty("", &[][..])]
fn format_maps_to_allowed_transports(#[case] format: &str, #[case] expected: &[TransportKind]) {
    assert_eq!(transports_for_format(format), expected);
}

// ---------------------------------------------------------------------------
// Framed codec
// ---------------------------------------------------------------------------

#[test]
fn framed_send_then_recv_round_trips() {
    let mut session = FramedConnection::new(Cursor::new(Vec::new()));
    session
        .send(&json!({"method": "speak", "loud": true}))
        .expect("send");

    let mut cursor = session.into_inner();
    cursor.seek(SeekFrom::Start(0)).expect("rewind");

    let mut session = FramedConnection::new(cursor);
    let decoded: Value = session.recv().expect("recv");
    assert_eq!(decoded, json!({"method": "speak", "loud": true}));
}

#[test]
fn framed_recv_rejects_oversized_frames() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(MAX_FRAME_LEN + 1).to_be_bytes());
    let mut session = FramedConnection::new(Cursor::new(bytes));
    let err = session.recv::<Value>().expect_err("should fail");
    assert!(matches!(err, TransportError::FrameTooLarge { .. }));
}

#[test]
fn framed_recv_on_empty_stream_is_closed() {
    let mut session = FramedConnection::new(Cursor::new(Vec::new()));
    let err = session.recv::<Value>().expect_err("should fail");
    assert!(matches!(err, TransportError::Closed));
}

#[test]
fn framed_recv_rejects_non_json_bodies() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&4u32.to_be_bytes());
    bytes.extend_from_slice(b"@@@@");
    let mut session = FramedConnection::new(Cursor::new(bytes));
    let err = session.recv::<Value>().expect_err("should fail");
    assert!(matches!(err, TransportError::Codec { .. }));
}

// ---------------------------------------------------------------------------
// Mux codec
// ---------------------------------------------------------------------------

#[test]
fn mux_frame_round_trips() {
    let frame = MuxFrame {
        stream_id: 7,
        kind: FrameKind::Data,
        payload: b"{\"ok\":true}".to_vec(),
    };
    let mut buffer = Vec::new();
    frame.write_to(&mut buffer).expect("write");

    let decoded = MuxFrame::read_from(&mut Cursor::new(buffer)).expect("read");
    assert_eq!(decoded, frame);
}

#[test]
fn mux_rejects_unknown_frame_kinds() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u32.to_be_bytes());
    bytes.push(9);
    bytes.extend_from_slice(&0u32.to_be_bytes());
    let err = MuxFrame::read_from(&mut Cursor::new(bytes)).expect_err("should fail");
    assert!(matches!(err, TransportError::UnknownFrameKind { kind: 9 }));
}

#[cfg(unix)]
#[test]
fn mux_call_round_trips_over_a_socket_pair() {
    use std::os::unix::net::UnixStream;

    let (ours, theirs) = UnixStream::pair().expect("socket pair");

    let server = std::thread::spawn(move || {
        let mut stream = theirs;
        let request = MuxFrame::read_from(&mut stream).expect("server read data");
        assert_eq!(request.kind, FrameKind::Data);
        let close = MuxFrame::read_from(&mut stream).expect("server read close");
        assert_eq!(close.kind, FrameKind::Close);

        MuxFrame {
            stream_id: request.stream_id,
            kind: FrameKind::Data,
            payload: b"{\"sound\":\"meow\"}".to_vec(),
        }
        .write_to(&mut stream)
        .expect("server write");
        MuxFrame {
            stream_id: request.stream_id,
            kind: FrameKind::Close,
            payload: Vec::new(),
        }
        .write_to(&mut stream)
        .expect("server close");
    });

    let mut session = MuxConnection::new(ours);
    let response: Value = session.call(&json!({"method": "speak"})).expect("call");
    assert_eq!(response, json!({"sound": "meow"}));

    server.join().expect("server thread");
}

#[cfg(unix)]
#[test]
fn framed_call_round_trips_over_a_socket_pair() {
    use std::os::unix::net::UnixStream;

    let (ours, theirs) = UnixStream::pair().expect("socket pair");

    let server = std::thread::spawn(move || {
        let mut session = FramedConnection::new(theirs);
        let request: Value = session.recv().expect("server recv");
        assert_eq!(request["method"], "speak");
        session.send(&json!({"sound": "woof"})).expect("server send");
    });

    let mut session = FramedConnection::new(ours);
    let response: Value = session.call(&json!({"method": "speak"})).expect("call");
    assert_eq!(response, json!({"sound": "woof"}));

    server.join().expect("server thread");
}
