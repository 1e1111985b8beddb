mod support;

use agent_protocol::{ChatMode, ConversationItem, LoginPhase, LoginState};
use agent_session::{SessionOptions, SessionUpdate};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use session_store::{SessionStore, SettingsStore};
use support::{
    delayed_stream_response, drain, driver_for, json_response, lines, manifest_response, stream_response, streams,
    ScriptedServer,
};

fn no_history() -> SessionOptions {
    SessionOptions::new(1).with_history(false)
}

fn tool_output_of(item: &ConversationItem) -> &Value {
    match item {
        ConversationItem::ToolOutput(output) => &output.output,
        other => panic!("expected tool output, got {other:?}"),
    }
}

#[tokio::test]
async fn hello_turn_streams_live_text_and_records_transcript() {
    let server = ScriptedServer::new(vec![stream_response(&[
        "0:\"Hi\"\n",
        "0:\" there\"\n",
        "2:[{\"type\":\"response_items\",\"items\":[{\"type\":\"message\",\"role\":\"assistant\",\"content\":[{\"type\":\"markdown\",\"text\":\"Hi there\"}]}]}]\n",
    ])])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("hello").await;

    let updates = drain(&mut rx);
    assert_eq!(
        streams(&updates),
        vec!["Hi".to_string(), "Hi there".to_string(), String::new()]
    );
    assert_eq!(lines(&updates), vec!["Hi there".to_string()]);
    assert_eq!(
        driver.items(),
        &[
            ConversationItem::user_text("hello"),
            ConversationItem::assistant_text("Hi there"),
        ]
    );

    let footers: Vec<bool> = updates
        .iter()
        .filter_map(|update| match update {
            SessionUpdate::State(footer) => Some(footer.busy),
            _ => None,
        })
        .collect();
    assert_eq!(footers.first(), Some(&true));
    assert_eq!(footers.last(), Some(&false));
}

#[tokio::test]
async fn streamed_text_without_message_item_is_flushed_as_assistant_message() {
    let server = ScriptedServer::new(vec![stream_response(&["0:\"Just\"\n0:\" text\"\n"])]).await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, _rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("hi").await;

    assert_eq!(
        driver.items()[1],
        ConversationItem::assistant_text("Just text")
    );
}

#[tokio::test]
async fn request_body_carries_mode_app_and_conversation_context() {
    let server = ScriptedServer::new(vec![
        stream_response(&["2:[{\"type\":\"conversation-created\",\"conversationId\":\"c1\"}]\n0:\"ok\"\n"]),
        stream_response(&["0:\"again\"\n"]),
    ])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, _rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("/mode builder").await;
    driver.handle_input("/app link app_7").await;
    driver.handle_input("first").await;
    driver.handle_input("second").await;

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    let first = requests[0].json();
    assert_eq!(first["mode"], "builder");
    assert_eq!(first["executionMode"], "local");
    assert_eq!(first["appId"], "app_7");
    assert!(first.get("conversationId").is_none());

    let second = requests[1].json();
    assert_eq!(second["conversationId"], "c1");
    assert_eq!(second["input"].as_array().map(Vec::len), Some(3));
}

#[tokio::test]
async fn conversation_id_is_first_writer_wins_and_persisted() {
    let server = ScriptedServer::new(vec![stream_response(&[
        "2:[{\"type\":\"conversation-created\",\"conversationId\":\"c1\"}]\n",
        "2:[{\"type\":\"conversation-created\",\"conversationId\":\"c2\"}]\n",
    ])])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, _rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("hello").await;

    assert_eq!(driver.session().conversation_id.as_deref(), Some("c1"));
    let saved = SettingsStore::for_workspace(driver.sandbox().root())
        .load()
        .expect("settings");
    assert_eq!(saved.conversation_id.as_deref(), Some("c1"));
}

#[tokio::test]
async fn local_tool_call_is_executed_and_resubmitted() {
    let server = ScriptedServer::new(vec![
        stream_response(&[
            "2:[{\"type\":\"response_item\",\"item\":{\"type\":\"tool_call\",\"callId\":\"call_1\",\"name\":\"read_file\",\"arguments\":{\"path\":\"notes.txt\"}}}]\n",
        ]),
        manifest_response(&["read_file", "write_file"]),
        stream_response(&["0:\"Read it\"\n"]),
    ])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    std::fs::write(workspace.path().join("notes.txt"), "remember the milk\n").expect("seed");
    let (mut driver, mut rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("what do my notes say?").await;

    let items = driver.items();
    assert_eq!(items.len(), 4);
    assert_eq!(items[1].kind(), "tool_call");
    let output = tool_output_of(&items[2]);
    assert_eq!(output["ok"], true);
    assert_eq!(output["content"], "remember the milk\n");
    assert_eq!(items[3], ConversationItem::assistant_text("Read it"));

    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].request_line.starts_with("GET /api/tools "));
    let follow_up = requests[2].json();
    assert_eq!(follow_up["action"], "tool_result");
    assert_eq!(follow_up["toolResult"]["ok"], true);
    assert_eq!(follow_up["input"].as_array().map(Vec::len), Some(3));

    let shown = lines(&drain(&mut rx));
    assert!(shown.iter().any(|line| line.contains("read_file")));
}

#[tokio::test]
async fn disallowed_tool_is_answered_with_structured_error() {
    let server = ScriptedServer::new(vec![
        stream_response(&[
            "2:[{\"type\":\"response_item\",\"item\":{\"type\":\"tool_call\",\"callId\":\"call_1\",\"name\":\"deploy\",\"arguments\":{}}}]\n",
        ]),
        manifest_response(&["read_file"]),
        stream_response(&["0:\"ok\"\n"]),
    ])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, _rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("ship it").await;

    let output = tool_output_of(&driver.items()[2]);
    assert_eq!(output["ok"], false);
    assert!(output["error"]
        .as_str()
        .is_some_and(|error| error.contains("not in the allowed tool list")));
}

#[tokio::test]
async fn tool_depth_limit_stops_the_turn_after_answering_calls() {
    let tool_call = |id: &str| {
        format!(
            "2:[{{\"type\":\"response_item\",\"item\":{{\"type\":\"tool_call\",\"callId\":\"{id}\",\"name\":\"list_files\",\"arguments\":{{}}}}}}]\n"
        )
    };
    let first = tool_call("call_1");
    let second = tool_call("call_2");
    let server = ScriptedServer::new(vec![
        stream_response(&[first.as_str()]),
        manifest_response(&["list_files"]),
        stream_response(&[second.as_str()]),
    ])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(
        &server,
        Some("tok"),
        workspace.path(),
        no_history().with_max_tool_depth(1),
    );

    driver.handle_input("loop forever").await;

    assert_eq!(server.requests().len(), 3);
    let kinds: Vec<&str> = driver.items().iter().map(ConversationItem::kind).collect();
    assert_eq!(
        kinds,
        vec!["message", "tool_call", "tool_output", "tool_call", "tool_output"]
    );
    assert!(lines(&drain(&mut rx))
        .contains(&"Tool call limit (1) reached; stopping this turn.".to_string()));
}

#[tokio::test]
async fn hosted_mode_does_not_execute_tool_calls() {
    let server = ScriptedServer::new(vec![stream_response(&[
        "2:[{\"type\":\"response_item\",\"item\":{\"type\":\"tool_call\",\"callId\":\"call_1\",\"name\":\"read_file\",\"arguments\":{\"path\":\"a\"}}}]\n",
    ])])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, _rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("/exec hosted").await;
    driver.handle_input("go").await;

    assert_eq!(server.requests().len(), 1);
    assert_eq!(driver.items().len(), 2);
}

#[tokio::test]
async fn transport_error_before_first_frame_rolls_back_the_turn() {
    let server = ScriptedServer::new(vec![json_response(
        401,
        r#"{"error":{"message":"token expired"}}"#,
    )])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("hello").await;

    assert!(driver.items().is_empty());
    let shown = lines(&drain(&mut rx));
    assert_eq!(shown.len(), 1);
    assert!(shown[0].starts_with("Error:"));
    assert!(shown[0].contains("token expired"));
}

#[tokio::test]
async fn terminal_error_keeps_partial_text_and_prior_items() {
    let server = ScriptedServer::new(vec![stream_response(&["0:\"Partial\"\n3:\"boom\"\n"])]).await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("hello").await;

    assert_eq!(
        driver.items(),
        &[
            ConversationItem::user_text("hello"),
            ConversationItem::assistant_text("Partial"),
        ]
    );
    let updates = drain(&mut rx);
    assert_eq!(lines(&updates).last(), Some(&"Error: boom".to_string()));
    assert_eq!(streams(&updates).last(), Some(&String::new()));
}

#[tokio::test]
async fn aborted_stream_answers_pending_tool_calls() {
    let server = ScriptedServer::new(vec![stream_response(&[
        "2:[{\"type\":\"response_item\",\"item\":{\"type\":\"tool_call\",\"callId\":\"call_9\",\"name\":\"read_file\",\"arguments\":{\"path\":\"a\"}}}]\n3:\"upstream died\"\n",
    ])])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, _rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("hello").await;

    assert_eq!(driver.items().len(), 3);
    assert_eq!(
        tool_output_of(&driver.items()[2]),
        &json!({"ok": false, "error": "turn aborted before tool execution"})
    );
    assert_eq!(server.requests().len(), 1);
}

#[tokio::test]
async fn app_id_from_tool_output_is_captured_once() {
    let server = ScriptedServer::new(vec![stream_response(&[
        "2:[{\"type\":\"response_items\",\"items\":[{\"type\":\"tool_output\",\"callId\":\"c\",\"output\":{\"appId\":\"app_first\"}},{\"type\":\"app_event\",\"event\":\"created\",\"appId\":\"app_second\"}]}]\n",
    ])])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, _rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("make an app").await;

    assert_eq!(driver.session().app_id.as_deref(), Some("app_first"));
}

#[tokio::test]
async fn turns_require_login() {
    let server = ScriptedServer::new(Vec::new()).await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(&server, None, workspace.path(), no_history());

    driver.handle_input("hello").await;

    assert!(driver.items().is_empty());
    assert!(server.requests().is_empty());
    assert_eq!(
        lines(&drain(&mut rx)),
        vec!["Not logged in. Run /login first.".to_string()]
    );
}

#[tokio::test]
async fn device_login_polls_until_token_arrives() {
    let server = ScriptedServer::new(vec![
        json_response(
            200,
            r#"{"deviceCode":"dev_1","userCode":"ABCD-EFGH","verificationUrl":"https://example.test/device"}"#,
        ),
        json_response(202, ""),
        json_response(200, r#"{"accessToken":"tok_new"}"#),
    ])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(&server, None, workspace.path(), no_history());
    let settings = SettingsStore::for_workspace(driver.sandbox().root());

    driver.handle_input("/login").await;
    assert_eq!(driver.session().login.phase(), LoginPhase::Pending);
    assert!(driver.next_poll().is_some());
    assert_eq!(settings.load().expect("settings").device_code.as_deref(), Some("dev_1"));
    assert!(lines(&drain(&mut rx))[0].contains("ABCD-EFGH"));

    driver.poll_login(true).await;
    assert_eq!(driver.session().login.phase(), LoginPhase::Pending);
    assert!(lines(&drain(&mut rx))[0].starts_with("Login still pending"));

    driver.poll_login(false).await;
    assert_eq!(
        driver.session().login,
        LoginState::Ready {
            token: "tok_new".to_string()
        }
    );
    assert!(driver.next_poll().is_none());
    let saved = settings.load().expect("settings");
    assert_eq!(saved.access_token.as_deref(), Some("tok_new"));
    assert_eq!(saved.device_code, None);
    assert_eq!(lines(&drain(&mut rx)), vec!["Logged in.".to_string()]);

    let poll_body = server.requests()[1].json();
    assert_eq!(poll_body, json!({"deviceCode": "dev_1"}));
}

#[tokio::test]
async fn background_poll_errors_are_silent_but_manual_ones_report() {
    let server = ScriptedServer::new(vec![
        json_response(
            200,
            r#"{"deviceCode":"dev_1","userCode":"U","verificationUrl":"https://example.test"}"#,
        ),
        json_response(400, r#"{"error":"expired_token"}"#),
    ])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(&server, None, workspace.path(), no_history());

    driver.handle_input("/login").await;
    drain(&mut rx);

    driver.poll_login(false).await;
    assert_eq!(driver.session().login.phase(), LoginPhase::Error);
    assert!(lines(&drain(&mut rx)).is_empty());

    driver.handle_input("/login status").await;
    let shown = lines(&drain(&mut rx));
    assert_eq!(shown.len(), 1);
    assert!(shown[0].contains("expired_token"));
}

#[tokio::test]
async fn settings_are_restored_by_a_new_driver() {
    let server = ScriptedServer::new(Vec::new()).await;
    let workspace = tempfile::tempdir().expect("tempdir");
    {
        let (mut driver, _rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());
        driver.handle_input("/mode builder").await;
        driver.handle_input("/exec hosted").await;
        driver.handle_input("/app link app_3").await;
    }

    let (driver, _rx) = driver_for(&server, None, workspace.path(), no_history());
    let session = driver.session();
    assert_eq!(session.mode, ChatMode::Builder);
    assert_eq!(session.execution_mode.as_str(), "hosted");
    assert_eq!(session.app_id.as_deref(), Some("app_3"));
    assert_eq!(
        session.login,
        LoginState::Ready {
            token: "tok".to_string()
        }
    );
}

#[tokio::test]
async fn logout_clears_token_and_blocks_turns() {
    let server = ScriptedServer::new(Vec::new()).await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("/logout").await;
    driver.handle_input("hello").await;

    assert_eq!(
        lines(&drain(&mut rx)),
        vec![
            "Logged out.".to_string(),
            "Not logged in. Run /login first.".to_string()
        ]
    );
}

#[tokio::test]
async fn command_table_reports_usage_and_unknown_commands() {
    let server = ScriptedServer::new(Vec::new()).await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("/mode turbo").await;
    driver.handle_input("/frobnicate").await;
    driver.handle_input("/cancel").await;
    driver.handle_input("/app").await;

    assert_eq!(
        lines(&drain(&mut rx)),
        vec![
            "Usage: /mode general|builder".to_string(),
            "Unknown command: /frobnicate. Type /help for commands.".to_string(),
            "Nothing to cancel.".to_string(),
            "No app linked.".to_string(),
        ]
    );
}

#[tokio::test]
async fn init_submits_action_without_user_message() {
    let server = ScriptedServer::new(vec![stream_response(&["0:\"Scaffolded\"\n"])]).await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, _rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());

    driver.handle_input("/init").await;

    let body = server.requests()[0].json();
    assert_eq!(body["action"], "init");
    assert_eq!(body["input"], json!([]));
    assert_eq!(
        driver.items(),
        &[ConversationItem::assistant_text("Scaffolded")]
    );
}

#[tokio::test]
async fn history_log_mirrors_transcript_and_clear_starts_a_new_log() {
    let server = ScriptedServer::new(vec![stream_response(&["0:\"Hi\"\n"])]).await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, _rx) = driver_for(
        &server,
        Some("tok"),
        workspace.path(),
        SessionOptions::new(4),
    );

    driver.handle_input("hello").await;
    let first_log = driver.history_path().expect("history enabled").to_path_buf();
    let store = SessionStore::open(&first_log).expect("open log");
    assert_eq!(store.header().tab_id, Some(4));
    let logged: Vec<ConversationItem> = store.entries().iter().map(|e| e.item.clone()).collect();
    assert_eq!(logged, driver.items().to_vec());

    driver.handle_input("/clear").await;
    assert!(driver.items().is_empty());
    assert!(driver.session().conversation_id.is_none());
    assert_ne!(driver.history_path(), Some(first_log.as_path()));
}

#[tokio::test]
async fn cancel_flag_stops_the_stream_and_keeps_partial_text() {
    let server = ScriptedServer::new(vec![delayed_stream_response(&[
        (0, "0:\"Working\"\n"),
        (2_000, "0:\" too late\"\n"),
    ])])
    .await;
    let workspace = tempfile::tempdir().expect("tempdir");
    let (mut driver, mut rx) = driver_for(&server, Some("tok"), workspace.path(), no_history());
    let cancel = driver.cancel_handle();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        cancel.store(true, std::sync::atomic::Ordering::SeqCst);
    });
    let started = std::time::Instant::now();
    driver.handle_input("hello").await;
    canceller.await.expect("canceller");

    assert!(started.elapsed() < std::time::Duration::from_millis(1_500));
    assert_eq!(
        driver.items(),
        &[
            ConversationItem::user_text("hello"),
            ConversationItem::assistant_text("Working"),
        ]
    );
    assert_eq!(lines(&drain(&mut rx)).last(), Some(&"Cancelled.".to_string()));
}
