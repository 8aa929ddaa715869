//! Tests for decoding live agent output.

use std::time::Duration;

use claude_code_sdk::cli::{
    Decoder, OutputStream, ProcessInvocation, ProcessRunner, ProtocolUnit, StreamRecord,
};
use claude_code_sdk::config::{MalformedLinePolicy, OutputFormat};
use claude_code_sdk::Error;
use futures_util::StreamExt;

use crate::support::FakeAgent;

fn spawn(agent: &FakeAgent, format: OutputFormat, timeout: Option<Duration>) -> OutputStream {
    let mut invocation = ProcessInvocation::new(agent.path());
    if let Some(timeout) = timeout {
        invocation = invocation.timeout(timeout);
    }
    let running = ProcessRunner::new(Duration::from_secs(1))
        .spawn_streaming(&invocation)
        .unwrap();
    OutputStream::new(running, format, MalformedLinePolicy::Error)
}

/// Drain the stream, returning the units before the first error and the error.
async fn drain(mut stream: OutputStream) -> (Vec<ProtocolUnit>, Option<Error>) {
    let mut units = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(unit) => units.push(unit),
            Err(e) => {
                assert!(stream.next().await.is_none(), "stream continued after error");
                return (units, Some(e));
            }
        }
    }
    (units, None)
}

fn types(units: &[ProtocolUnit]) -> Vec<String> {
    units
        .iter()
        .filter_map(ProtocolUnit::as_record)
        .filter_map(StreamRecord::record_type)
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn stream_plain_text_scenario() {
    let agent = FakeAgent::new("printf hello");
    let units = spawn(&agent, OutputFormat::Text, None)
        .try_collect()
        .await
        .unwrap();
    let text: String = units.iter().filter_map(ProtocolUnit::as_text).collect();
    assert_eq!(text, "hello");
}

#[tokio::test]
async fn stream_json_fragmented_across_writes() {
    let agent = FakeAgent::new(
        r#"printf '{"ty'; sleep 0.1; printf 'pe":"a"}\n{"type":'; sleep 0.1; printf '"b"}\n'"#,
    );
    let units = spawn(&agent, OutputFormat::StreamJson, None)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(types(&units), ["a", "b"]);
}

#[tokio::test]
async fn stream_json_unterminated_last_record() {
    let agent = FakeAgent::new(r#"printf '{"type":"a"}\n{"type":"result","result":"ok"}'"#);
    let units = spawn(&agent, OutputFormat::StreamJson, None)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(types(&units), ["a", "result"]);
}

#[tokio::test]
async fn stream_yields_records_before_exit_failure() {
    let agent = FakeAgent::new(
        r#"printf '{"type":"system","subtype":"init"}\n'; printf 'quota exceeded' >&2; exit 2"#,
    );
    let (units, err) = drain(spawn(&agent, OutputFormat::StreamJson, None)).await;

    assert_eq!(types(&units), ["system"]);
    let Some(Error::Execution(execution)) = err else {
        panic!("expected execution error, got {err:?}");
    };
    assert_eq!(execution.exit_code, Some(2));
    assert_eq!(execution.stderr, "quota exceeded");
    assert!(execution.stdout.contains("\"system\""));
}

#[tokio::test]
async fn stream_malformed_line_reports_context() {
    let agent = FakeAgent::new(
        r#"printf '{"type":"a"}\nnot json\n{"type":"b"}\n'; printf 'oops' >&2; exec sleep 30"#,
    );
    let (units, err) = drain(spawn(&agent, OutputFormat::StreamJson, None)).await;

    assert_eq!(types(&units), ["a"]);
    let Some(Error::Execution(execution)) = err else {
        panic!("expected execution error, got {err:?}");
    };
    assert_eq!(execution.offending_line.as_deref(), Some("not json"));
    assert!(execution.stdout.starts_with("{\"type\":\"a\"}\nnot json"));
}

#[tokio::test]
async fn stream_malformed_line_skipped_by_policy() {
    let agent = FakeAgent::new(r#"printf '{"type":"a"}\nnot json\n{"type":"b"}\n'"#);
    let running = ProcessRunner::default()
        .spawn_streaming(&ProcessInvocation::new(agent.path()))
        .unwrap();
    let units = OutputStream::new(running, OutputFormat::StreamJson, MalformedLinePolicy::Skip)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(types(&units), ["a", "b"]);
}

#[tokio::test]
async fn stream_timeout_keeps_partial_output() {
    let agent =
        FakeAgent::new(r#"printf '{"type":"a"}\n{"type":'; printf 'slow' >&2; exec sleep 30"#);
    let timeout = Duration::from_millis(400);
    let (units, err) = drain(spawn(&agent, OutputFormat::StreamJson, Some(timeout))).await;

    assert_eq!(types(&units), ["a"]);
    let Some(Error::Timeout(timeout_err)) = err else {
        panic!("expected timeout, got {err:?}");
    };
    assert_eq!(timeout_err.timeout, timeout);
    assert_eq!(timeout_err.stdout, "{\"type\":\"a\"}\n{\"type\":");
    assert_eq!(timeout_err.stderr, "slow");
}

#[tokio::test]
async fn stream_json_document_parsed_at_end() {
    let agent =
        FakeAgent::new(r#"printf '{"type":"result",'; sleep 0.1; printf '"result":"4"}\n'"#);
    let units = spawn(&agent, OutputFormat::Json, None)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(units.len(), 1);
    let record = units[0].as_record().unwrap();
    assert_eq!(record.get("result").unwrap(), "4");
}

#[tokio::test]
async fn stream_json_document_invalid() {
    let agent = FakeAgent::new("printf 'not json at all'");
    let (units, err) = drain(spawn(&agent, OutputFormat::Json, None)).await;
    assert!(units.is_empty());
    let Some(Error::Execution(execution)) = err else {
        panic!("expected execution error, got {err:?}");
    };
    assert_eq!(execution.stdout, "not json at all");
    assert_eq!(execution.exit_code, None);
}

#[test]
fn decoder_any_chunking_matches_whole_input() {
    let input = concat!(
        "{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s\"}\n",
        "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"caf\u{e9} \u{1f980}\"}]}}\n",
        "{\"type\":\"result\",\"result\":\"done\"}\n",
    )
    .as_bytes();
    let whole =
        Decoder::decode_all(OutputFormat::StreamJson, MalformedLinePolicy::Error, input).unwrap();
    assert_eq!(whole.len(), 3);

    for size in 1..=input.len() {
        let mut decoder = Decoder::new(OutputFormat::StreamJson, MalformedLinePolicy::Error);
        let mut units = Vec::new();
        for chunk in input.chunks(size) {
            units.extend(decoder.feed(chunk).unwrap());
        }
        units.extend(decoder.finish().unwrap());
        assert_eq!(units, whole, "chunk size {size}");
    }
}

#[test]
fn decoder_text_any_chunking_matches_whole_input() {
    let input = "h\u{e9}llo \u{1f980} w\u{f6}rld".as_bytes();
    for size in 1..=input.len() {
        let mut decoder = Decoder::new(OutputFormat::Text, MalformedLinePolicy::Error);
        let mut text = String::new();
        for chunk in input.chunks(size) {
            for unit in decoder.feed(chunk).unwrap() {
                text.push_str(unit.as_text().unwrap());
            }
        }
        for unit in decoder.finish().unwrap() {
            text.push_str(unit.as_text().unwrap());
        }
        assert_eq!(text, "h\u{e9}llo \u{1f980} w\u{f6}rld", "chunk size {size}");
    }
}
