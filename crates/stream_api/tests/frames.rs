use agent_protocol::{ConversationItem, Usage};
use futures_util::stream;
use pretty_assertions::assert_eq;
use stream_api::{ApiError, Frame, FrameDecoder, FrameStream};

const SCRIPT: &str = concat!(
    "0:\"Hi\"\n",
    "g:\"thinking \u{2728}\"\n",
    "d:{\"finishReason\":\"stop\"}\n",
    "0:\" there\"\n",
    "2:[{\"type\":\"conversation-created\",\"conversationId\":\"abc\"},",
    "{\"type\":\"response_items\",\"items\":[{\"type\":\"message\",\"role\":\"assistant\",",
    "\"content\":[{\"type\":\"markdown\",\"text\":\"Hi there\"}]}]},",
    "{\"type\":\"usage\",\"prompt_tokens\":5,\"completion_tokens\":2}]\n",
);

fn text_of(frames: &[Frame]) -> String {
    frames
        .iter()
        .filter_map(|frame| match frame {
            Frame::TextDelta(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[test]
fn frames_are_identical_for_every_chunk_boundary() {
    let whole = FrameDecoder::decode_all(SCRIPT).expect("single chunk decodes");
    let bytes = SCRIPT.as_bytes();

    for split in 1..bytes.len() {
        let mut decoder = FrameDecoder::default();
        let mut frames = decoder.feed(&bytes[..split]).expect("head");
        frames.extend(decoder.feed(&bytes[split..]).expect("tail"));
        assert!(decoder.finish().is_none());
        assert_eq!(frames, whole, "split at byte {split}");
    }
}

#[test]
fn byte_at_a_time_matches_single_chunk() {
    let whole = FrameDecoder::decode_all(SCRIPT).expect("single chunk decodes");
    let mut decoder = FrameDecoder::default();
    let mut frames = Vec::new();
    for byte in SCRIPT.as_bytes() {
        frames.extend(decoder.feed(std::slice::from_ref(byte)).expect("byte"));
    }
    assert_eq!(frames, whole);
}

#[test]
fn text_deltas_concatenate() {
    let frames = FrameDecoder::decode_all("0:\"hi\"\n0:\" there\"\n").expect("decode");
    assert_eq!(text_of(&frames), "hi there");
}

#[test]
fn conversation_created_is_reported_every_time() {
    let line = "2:[{\"type\":\"conversation-created\",\"conversationId\":\"abc\"}]\n";
    let frames = FrameDecoder::decode_all(&format!("{line}{line}")).expect("decode");
    assert_eq!(
        frames,
        vec![
            Frame::ConversationId("abc".to_string()),
            Frame::ConversationId("abc".to_string()),
        ]
    );
}

#[test]
fn malformed_data_line_does_not_block_next_line() {
    let frames =
        FrameDecoder::decode_all("2:[{\"type\":\"response_items\",\"items\":[\n0:\"ok\"\n")
            .expect("malformed data is swallowed");
    assert_eq!(frames, vec![Frame::TextDelta("ok".to_string())]);
}

#[test]
fn non_string_deltas_and_malformed_errors_are_ignored() {
    let frames = FrameDecoder::decode_all("0:42\ng:{\"x\":1}\n3:{\"code\":1}\n3:\"trunc\n0:\"after\"\n")
        .expect("only string error payloads are fatal");
    assert_eq!(frames, vec![Frame::TextDelta("after".to_string())]);
}

#[test]
fn string_error_frame_is_terminal() {
    let error = FrameDecoder::decode_all("0:\"a\"\n3:\"quota exceeded\"\n")
        .expect_err("string error payload aborts");
    assert!(matches!(error, ApiError::StreamError(message) if message == "quota exceeded"));
}

#[test]
fn data_object_forms_are_accepted() {
    let bare = FrameDecoder::decode_all(
        "2:{\"type\":\"assistant-message\",\"content\":\"plain\"}\n",
    )
    .expect("bare object");
    assert_eq!(
        bare,
        vec![Frame::Data {
            items: vec![ConversationItem::assistant_text("plain")],
            usage: None,
        }]
    );

    let wrapped = FrameDecoder::decode_all(
        "2:{\"data\":[{\"type\":\"usage\",\"usage\":{\"inputTokens\":1,\"outputTokens\":2,\"totalTokens\":9}}]}\n",
    )
    .expect("wrapped data array");
    assert_eq!(
        wrapped,
        vec![Frame::Data {
            items: Vec::new(),
            usage: Some(Usage {
                input_tokens: 1,
                output_tokens: 2,
                total_tokens: 9,
            }),
        }]
    );
}

#[test]
fn unknown_item_kinds_survive_as_opaque() {
    let frames = FrameDecoder::decode_all(
        "2:[{\"type\":\"response_item\",\"item\":{\"type\":\"citation\",\"url\":\"u\"}}]\n",
    )
    .expect("decode");
    let Some(Frame::Data { items, .. }) = frames.first() else {
        panic!("expected a data frame, got {frames:?}");
    };
    assert!(matches!(&items[0], ConversationItem::Opaque(value) if value["url"] == "u"));
}

#[tokio::test]
async fn unterminated_last_line_is_decoded_at_end_of_body() {
    let body = stream::iter(vec![
        Ok::<_, ApiError>(b"0:\"one\"\n0:\"tw".to_vec()),
        Ok(b"o\"".to_vec()),
    ]);
    let frames = FrameStream::new(body)
        .collect_frames()
        .await
        .expect("stream decodes");
    assert_eq!(text_of(&frames), "onetwo");
}
