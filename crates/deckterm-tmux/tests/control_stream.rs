//! Stream-level properties of the control mode parser.

use deckterm_core::{PaneId, WindowId};
use deckterm_tmux::{ControlEvent, ControlProtocolParser, PayloadEncoding, percent_decode, percent_encode};
use proptest::prelude::*;

/// A realistic control session: attach block, topology, output (including
/// non-UTF-8 bytes and a malformed escape), a command response whose body
/// starts with '%', an unknown verb and an exit.
const TRANSCRIPT: &str = "%begin 1700000000 1 0\n\
%end 1700000000 1 0\n\
%session-changed $1 deckterm-0badf00d\n\
%window-add @1\n\
%layout-change @1 d3da,211x50,0,0{105x50,0,0,0,105x50,106,0,3} d3da,211x50,0,0{105x50,0,0,0,105x50,106,0,3} *\n\
%output %0 hello%0D%0A\n\
%output %3 %1B[31mred%1B[0m\n\
%output %3 bin%FF%00%80\n\
%output %0 trunc%4\n\
%begin 1700000001 2 1\n\
%0\t@1\n\
%3\t@1\n\
%end 1700000001 2 1\n\
%client-detached /dev/ttys003\n\
%pane-mode-changed %3\n\
%window-renamed @1 build logs\n\
%window-add @2\n\
%window-close @2\n\
%extended-output %0 12 : tail\n\
%exit detached\n";

/// One line (or one response block) of generated control output. Payloads
/// mix multi-byte UTF-8 with bytes 0x80..=0xFF, so random cuts land inside
/// UTF-8 sequences and `%HH` escapes.
fn stream_piece() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        (0u32..8, prop::collection::vec(any::<u8>(), 0..24))
            .prop_map(|(pane, data)| format!("%output %{pane} {}\n", percent_encode(&data)).into_bytes()),
        (0u32..8, "[a-z é→✓日本]{0,12}")
            .prop_map(|(pane, text)| format!("%output %{pane} {text}\n").into_bytes()),
        (1u64..40, prop::collection::vec("[a-z0-9%@\t é→✓]{0,12}", 0..4), any::<bool>()).prop_map(
            |(id, body, ok)| {
                let end = if ok { "end" } else { "error" };
                let mut block = format!("%begin 1700000000 {id} 1\n");
                for line in body {
                    block.push_str(&line);
                    block.push('\n');
                }
                block.push_str(&format!("%{end} 1700000000 {id} 1\n"));
                block.into_bytes()
            }
        ),
        (1u32..5).prop_map(|w| format!("%window-add @{w}\n").into_bytes()),
        (1u32..5).prop_map(|w| format!("%window-renamed @{w} ré✓\n").into_bytes()),
        Just(b"%output %1 trunc%4\n".to_vec()),
        Just(b"%output %2 %E2%9C%93%C3\n".to_vec()),
        prop::collection::vec(0x80u8..=0xff, 1..6).prop_map(|mut raw| {
            raw.push(b'\n');
            raw
        }),
    ]
}

fn generated_stream() -> impl Strategy<Value = (Vec<u8>, Vec<usize>)> {
    prop::collection::vec(stream_piece(), 1..16)
        .prop_map(|pieces| pieces.concat())
        .prop_flat_map(|bytes| {
            let len = bytes.len();
            (Just(bytes), prop::collection::vec(0..=len, 0..32))
        })
}

fn split_at(bytes: &[u8], mut cuts: Vec<usize>) -> Vec<&[u8]> {
    cuts.sort_unstable();
    cuts.dedup();
    let mut chunks = Vec::new();
    let mut start = 0;
    for cut in cuts {
        chunks.push(&bytes[start..cut]);
        start = cut;
    }
    chunks.push(&bytes[start..]);
    chunks
}

fn run_chunks(chunks: &[&[u8]]) -> (Vec<ControlEvent>, ControlProtocolParser) {
    let mut parser = ControlProtocolParser::new(PayloadEncoding::Percent);
    let mut events = Vec::new();
    for chunk in chunks {
        events.extend(parser.feed(chunk));
    }
    (events, parser)
}

#[test]
fn transcript_events() {
    let (events, mut parser) = run_chunks(&[TRANSCRIPT.as_bytes()]);
    let outputs: Vec<(PaneId, Vec<u8>)> = events
        .iter()
        .filter_map(|e| match e {
            ControlEvent::PaneOutput { pane_id, bytes } => Some((*pane_id, bytes.to_vec())),
            _ => None,
        })
        .collect();
    assert_eq!(
        outputs,
        vec![
            (PaneId(0), b"hello\r\n".to_vec()),
            (PaneId(3), b"\x1b[31mred\x1b[0m".to_vec()),
            (PaneId(3), b"bin\xff\x00\x80".to_vec()),
            (PaneId(0), b"trunc".to_vec()),
            (PaneId(0), b"tail".to_vec()),
        ]
    );
    assert_eq!(events.first(), Some(&ControlEvent::Connected {
        session_id: "1".into(),
        name: "deckterm-0badf00d".into(),
    }));
    assert_eq!(events.last(), Some(&ControlEvent::Disconnected { reason: Some("detached".into()) }));
    assert!(events.contains(&ControlEvent::PaneModeChanged { pane_id: PaneId(3), in_mode: true }));

    let response = parser.take_completed(2).expect("response 2");
    assert_eq!(response.output, "%0\t@1\n%3\t@1\n");
    assert!(parser.take_completed(1).is_some());

    assert_eq!(parser.windows().len(), 1);
    assert_eq!(parser.window(WindowId(1)).expect("window").name, "build logs");
    assert_eq!(parser.panes_in(WindowId(1)).len(), 2);
    assert!(!parser.is_connected());
}

#[test]
fn three_body_lines_make_one_response() {
    let mut parser = ControlProtocolParser::new(PayloadEncoding::Percent);
    parser.feed_str("%begin 1700000000 7 1\nalpha\nbeta\ngamma\n%end 1700000000 7 1\n");
    for other in [0, 1, 6, 8] {
        assert!(parser.take_completed(other).is_none());
    }
    let response = parser.take_completed(7).expect("response");
    assert_eq!(response.output, "alpha\nbeta\ngamma\n");
}

#[test]
fn octal_encoding_decodes_tmux_payloads() {
    let mut parser = ControlProtocolParser::new(PayloadEncoding::Octal);
    let events = parser.feed_str("%output %1 a\\033[0m\\134\n");
    assert_eq!(
        events,
        vec![ControlEvent::PaneOutput {
            pane_id: PaneId(1),
            bytes: bytes::Bytes::from_static(b"a\x1b[0m\\"),
        }]
    );
}

proptest! {
    #[test]
    fn chunk_boundaries_do_not_matter(cuts in prop::collection::vec(0usize..TRANSCRIPT.len(), 0..24)) {
        let bytes = TRANSCRIPT.as_bytes();
        let (whole, _) = run_chunks(&[bytes]);
        let (split, _) = run_chunks(&split_at(bytes, cuts));
        prop_assert_eq!(whole, split);
    }

    #[test]
    fn chunk_boundaries_do_not_matter_for_generated_streams((bytes, cuts) in generated_stream()) {
        let (whole, mut whole_parser) = run_chunks(&[bytes.as_slice()]);
        let (split, mut split_parser) = run_chunks(&split_at(&bytes, cuts));
        prop_assert_eq!(whole, split);
        prop_assert_eq!(whole_parser.windows(), split_parser.windows());
        for id in 1..40 {
            prop_assert_eq!(whole_parser.take_completed(id), split_parser.take_completed(id));
        }
    }

    #[test]
    fn percent_round_trip(mut data in prop::collection::vec(any::<u8>(), 0..256), extra in 0x80u8..=0xff) {
        data.push(extra);
        prop_assert_eq!(percent_decode(&percent_encode(&data)), data);
    }
}
