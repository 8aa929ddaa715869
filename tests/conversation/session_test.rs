//! Tests for multi-turn conversations against a fake agent.

use std::collections::HashMap;
use std::time::Duration;

use claude_code_sdk::auth::AuthKind;
use claude_code_sdk::cli::ClaudeEvent;
use claude_code_sdk::config::{ClientConfig, ConfigOverrides, OutputFormat};
use claude_code_sdk::{ClaudeCode, ConversationState, Error, Response};
use futures_util::StreamExt;
use tokio_test::assert_ok;

use crate::support::FakeAgent;

const STREAM_JSON_TURN: &str = r#"printf '%s\n' \
  '{"type":"system","subtype":"init","session_id":"s1","tools":["Read"]}' \
  '{"type":"assistant","message":{"role":"assistant","content":[{"type":"text","text":"4"}]}}' \
  '{"type":"result","subtype":"success","session_id":"s1","result":"4","is_error":false,"num_turns":1}'"#;

fn client(agent: &FakeAgent, config: ClientConfig) -> ClaudeCode {
    let config = config.with_api_key("k").with_binary(agent.path());
    ClaudeCode::new(config)
        .unwrap()
        .with_env(HashMap::<String, String>::new())
}

#[tokio::test]
async fn conversation_max_turns_closes_at_ceiling() {
    let agent = FakeAgent::new("printf ok");
    let mut conversation =
        client(&agent, ClientConfig::new(AuthKind::AnthropicApi).with_max_turns(3)).conversation();

    for turn in 1..=3 {
        assert!(!conversation.is_closed());
        let response = assert_ok!(conversation.send("hi").await);
        assert_eq!(response, Response::Text("ok".to_string()));
        assert_eq!(conversation.turn_count(), turn);
    }
    assert!(conversation.is_closed());

    let err = conversation.send("one more").await.unwrap_err();
    assert!(
        matches!(err, Error::Validation(ref msg) if msg == "Conversation has reached the maximum number of turns: 3")
    );
    assert_eq!(conversation.turn_count(), 3);
    assert_eq!(agent.invocations().len(), 3);
}

#[tokio::test]
async fn conversation_resumes_after_first_success() {
    let agent = FakeAgent::new("printf ok");
    let mut conversation = client(&agent, ClientConfig::default())
        .start_conversation(
            Some("7f0e1c52-2d4b-4f4e-9a51-3c1f3b2f9d10".to_string()),
            &ConfigOverrides::default(),
        )
        .unwrap();
    let id = conversation.id().to_string();

    assert_ok!(conversation.send("first").await);
    assert_eq!(conversation.continuation_token(), Some(id.as_str()));
    assert_ok!(conversation.send("second").await);

    assert_eq!(
        agent.invocations(),
        vec![
            format!("-p|--session-id|{id}|--|first|conversation={id}"),
            format!("-p|--resume|{id}|--|second|conversation={id}"),
        ]
    );
}

#[tokio::test]
async fn conversation_rejects_non_uuid_id_before_spawn() {
    let agent = FakeAgent::new("printf ok");
    let err = client(&agent, ClientConfig::default())
        .start_conversation(Some("my-id".to_string()), &ConfigOverrides::default())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(agent.invocations().is_empty());
}

#[tokio::test]
async fn conversation_failed_turns_count() {
    // The first invocation fails, later ones succeed.
    let agent = FakeAgent::new(
        r#"n=$(wc -l < "$LOG"); if [ $n -eq 1 ]; then printf 'boom' >&2; exit 1; fi; printf ok"#,
    );
    let mut conversation =
        client(&agent, ClientConfig::default().with_max_turns(2)).conversation();
    let id = conversation.id().to_string();

    let err = conversation.send("first").await.unwrap_err();
    let Error::Execution(execution) = &err else {
        panic!("expected execution error, got {err:?}");
    };
    assert_eq!(execution.exit_code, Some(1));
    assert_eq!(execution.stderr, "boom");
    assert_eq!(conversation.turn_count(), 1);
    assert_eq!(conversation.state(), ConversationState::Idle);
    assert!(conversation.continuation_token().is_none());

    assert_ok!(conversation.send("retry").await);
    assert!(conversation.is_closed());
    assert_eq!(conversation.stats().failed, 1);
    assert_eq!(conversation.stats().succeeded, 1);

    let invocations = agent.invocations();
    assert!(invocations[1].contains(&format!("--session-id|{id}")));
}

#[tokio::test]
async fn conversation_early_drop_completes_turn() {
    let agent = FakeAgent::new("printf partial; exec sleep 30");
    let mut conversation = client(&agent, ClientConfig::default()).conversation();

    {
        let mut turn = conversation.stream("hi").unwrap();
        assert_eq!(turn.turn(), 1);
        let first = turn.next().await.unwrap().unwrap();
        assert_eq!(first.as_text(), Some("partial"));
    }

    assert_eq!(conversation.state(), ConversationState::Idle);
    assert_eq!(conversation.turn_count(), 1);
    assert!(conversation.continuation_token().is_none());
}

#[tokio::test]
async fn conversation_stream_json_records() {
    let agent = FakeAgent::new(STREAM_JSON_TURN);
    let config = ClientConfig::default().with_output_format(OutputFormat::StreamJson);
    let mut conversation = client(&agent, config).conversation();

    let mut records = Vec::new();
    {
        let mut stream = conversation.stream_json("what is 2+2?").unwrap();
        while let Some(record) = stream.next().await {
            records.push(record.unwrap());
        }
    }

    let events: Vec<ClaudeEvent> = records.iter().map(|r| r.event().unwrap()).collect();
    assert_eq!(events.len(), 3);
    assert_eq!(events[1].text().as_deref(), Some("4"));
    assert!(events[2].is_terminal());
    assert!(conversation.continuation_token().is_some());

    let invocation = &agent.invocations()[0];
    assert!(invocation.starts_with("-p|--output-format|stream-json|--verbose|"));
    assert!(invocation.contains("|--|what is 2+2?|conversation="));
}

#[tokio::test]
async fn conversation_send_json_document() {
    let agent = FakeAgent::new(r#"printf '{"type":"result","result":"4","session_id":"s1"}'"#);
    let config = ClientConfig::default().with_output_format(OutputFormat::Json);
    let mut conversation = client(&agent, config).conversation();

    let response = conversation.send("what is 2+2?").await.unwrap();
    let Response::Json(value) = &response else {
        panic!("expected json response, got {response:?}");
    };
    assert_eq!(value["session_id"], "s1");
    assert_eq!(response.result_text(), Some("4"));
}

#[tokio::test]
async fn conversation_authentication_fails_before_spawn() {
    let agent = FakeAgent::new("printf ok");
    let config = ClientConfig::new(AuthKind::Vertex).with_region("us-east5");
    let mut conversation = client(&agent, config).conversation();

    let err = conversation.send("hi").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Authentication {
            field: "project_id",
            ..
        }
    ));
    assert_eq!(conversation.turn_count(), 0);
    assert!(agent.invocations().is_empty());
}

#[tokio::test]
async fn conversation_timeout_counts_turn() {
    let agent = FakeAgent::new("printf thinking; exec sleep 30");
    let config = ClientConfig::default()
        .with_timeout(Duration::from_millis(300))
        .with_terminate_grace(Duration::from_secs(1))
        .with_max_turns(1);
    let mut conversation = client(&agent, config).conversation();

    let err = conversation.send("hi").await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.as_execution().unwrap().stdout, "thinking");
    assert!(conversation.is_closed());
}

#[tokio::test]
async fn client_one_shot_passes_credentials() {
    let agent = FakeAgent::new(r#"printf '%s' "$ANTHROPIC_API_KEY""#);
    let response = client(&agent, ClientConfig::default())
        .run_prompt("hi")
        .await
        .unwrap();
    assert_eq!(response.as_text(), Some("k"));
    assert_eq!(agent.invocations(), vec!["-p|--|hi|conversation="]);
}
