use std::time::Duration;

use agent_protocol::FooterState;
use pretty_assertions::assert_eq;
use tab_bus::{BusConnection, BusListener, BusMessage, HistoryRow, LineCodec, TabMode};

fn line_message(tab_id: u32, text: &str) -> BusMessage {
    BusMessage::Line {
        tab_id,
        text: text.to_string(),
    }
}

#[test]
fn newline_in_a_later_write_completes_the_message() {
    let mut codec = LineCodec::new();
    let encoded = LineCodec::encode(&line_message(1, "hello")).expect("encode");
    let (body, newline) = encoded.split_at(encoded.len() - 1);

    assert!(codec.push(body).is_empty());
    assert!(codec.has_partial_line());
    assert_eq!(codec.push(newline), vec![line_message(1, "hello")]);
}

#[test]
fn invalid_line_is_dropped_without_corrupting_the_next() {
    let mut codec = LineCodec::new();
    let mut bytes = b"{\"type\":\"line\",\"tabId\":1,\"te\n".to_vec();
    bytes.extend(LineCodec::encode(&line_message(1, "after")).expect("encode"));

    assert_eq!(codec.push(&bytes), vec![line_message(1, "after")]);
}

#[test]
fn every_split_point_yields_the_same_messages() {
    let messages = vec![
        line_message(1, "multi\nline text stays escaped"),
        BusMessage::History {
            tab_id: 2,
            rows: vec![HistoryRow {
                index: 1,
                session: "3f2a".to_string(),
                ts: "2026-02-14T00:00:00Z".to_string(),
                kind: "message".to_string(),
                summary: "user: hi".to_string(),
            }],
        },
        BusMessage::State {
            tab_id: 2,
            footer_state: FooterState::default(),
        },
    ];
    let wire: Vec<u8> = messages
        .iter()
        .flat_map(|message| LineCodec::encode(message).expect("encode"))
        .collect();

    for split in 0..=wire.len() {
        let mut codec = LineCodec::new();
        let mut decoded = codec.push(&wire[..split]);
        decoded.extend(codec.push(&wire[split..]));
        assert_eq!(decoded, messages, "split at {split}");
    }
}

#[tokio::test]
async fn worker_and_supervisor_exchange_messages_over_the_socket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bus.sock");
    let listener = BusListener::bind(&path).expect("bind");

    let worker = tokio::spawn({
        let path = path.clone();
        async move {
            let mut connection = BusConnection::connect(&path).await.expect("connect");
            connection
                .send(&BusMessage::Register {
                    tab_id: 7,
                    mode: TabMode::Chat,
                })
                .await
                .expect("register");
            let input = connection.recv().await.expect("recv");
            connection
                .send(&line_message(7, "echo"))
                .await
                .expect("line");
            input
        }
    });

    let mut supervisor_side = listener.accept().await.expect("accept");
    assert_eq!(
        supervisor_side.recv().await.expect("recv"),
        Some(BusMessage::Register {
            tab_id: 7,
            mode: TabMode::Chat
        })
    );
    supervisor_side
        .send(&BusMessage::Input {
            tab_id: 7,
            text: "hi".to_string(),
        })
        .await
        .expect("send input");
    assert_eq!(
        supervisor_side.recv().await.expect("recv"),
        Some(line_message(7, "echo"))
    );

    let input = worker.await.expect("worker task");
    assert_eq!(
        input,
        Some(BusMessage::Input {
            tab_id: 7,
            text: "hi".to_string()
        })
    );
    assert_eq!(supervisor_side.recv().await.expect("recv after close"), None);

    listener.remove_socket_file();
    assert!(!path.exists());
}

#[tokio::test]
async fn split_socket_writes_decode_as_one_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bus.sock");
    let listener = BusListener::bind(&path).expect("bind");

    let writer = tokio::spawn({
        let path = path.clone();
        async move {
            let connection = BusConnection::connect(&path).await.expect("connect");
            let (_reader, mut writer) = connection.into_split();
            writer
                .send_raw(b"{\"type\":\"stream\",\"tabId\":3,")
                .await
                .expect("first half");
            tokio::time::sleep(Duration::from_millis(50)).await;
            writer
                .send_raw(b"\"text\":\"partial\"}\nnot json\n")
                .await
                .expect("second half");
            writer
                .send(&BusMessage::Shutdown { tab_id: 3 })
                .await
                .expect("shutdown");
        }
    });

    let mut connection = listener.accept().await.expect("accept");
    assert_eq!(
        connection.recv().await.expect("recv"),
        Some(BusMessage::Stream {
            tab_id: 3,
            text: "partial".to_string()
        })
    );
    assert_eq!(
        connection.recv().await.expect("recv"),
        Some(BusMessage::Shutdown { tab_id: 3 })
    );
    writer.await.expect("writer task");
}

#[test]
fn binding_replaces_a_stale_socket_file() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("nested").join("bus.sock");
    std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    std::fs::write(&path, "stale").expect("stale file");

    runtime.block_on(async {
        let listener = BusListener::bind(&path).expect("rebind over stale file");
        assert_eq!(listener.path(), path.as_path());
    });
}
