//! Tests for invocation building.

use std::collections::HashMap;
use std::io::Write;

use claude_code_sdk::auth::{AuthKind, AuthResolver, AuthSettings};
use claude_code_sdk::cli::{CommandBuilder, CONVERSATION_ID_ENV};
use claude_code_sdk::config::{ClientConfig, OutputFormat};
use claude_code_sdk::Error;
use tokio_test::{assert_err, assert_ok};

fn api_auth() -> claude_code_sdk::auth::AuthContext {
    let mut settings = AuthSettings::new(AuthKind::AnthropicApi);
    settings.api_key = Some("k".to_string());
    AuthResolver::with_env(HashMap::new())
        .resolve(&settings)
        .unwrap()
}

#[test]
fn builder_plain_prompt_scenario() {
    let invocation = CommandBuilder::new("hi").build(api_auth()).unwrap();

    assert_eq!(invocation.program.to_str(), Some("claude"));
    assert_eq!(invocation.args, vec!["-p", "--", "hi"]);
    assert_eq!(
        invocation.env.get("ANTHROPIC_API_KEY").map(String::as_str),
        Some("k")
    );
    assert!(invocation.timeout.is_none());
}

#[test]
fn builder_full_argument_order() {
    let args = CommandBuilder::new("Fix the bug")
        .output_format(OutputFormat::Json)
        .session_id("conv-1")
        .model("claude-sonnet-4")
        .allowed_tools(&["Read", "Glob"])
        .disallowed_tools(&["Bash"])
        .max_turns(3)
        .build_args();

    assert_eq!(
        args,
        vec![
            "-p",
            "--output-format",
            "json",
            "--session-id",
            "conv-1",
            "--model",
            "claude-sonnet-4",
            "--allowedTools",
            "Read,Glob",
            "--disallowedTools",
            "Bash",
            "--max-turns",
            "3",
            "--",
            "Fix the bug",
        ]
    );
}

#[test]
fn builder_prompt_is_one_opaque_argument() {
    let prompt = "rm -rf / ; echo $(whoami) \"quoted\"\nnext line";
    let args = CommandBuilder::new(prompt).build_args();
    assert_eq!(args, vec!["-p", "--", prompt]);
}

#[test]
fn builder_resume_session() {
    let args = CommandBuilder::new("continue").resume("session_abc123").build_args();
    let pos = args.iter().position(|a| a == "--resume").unwrap();
    assert_eq!(args[pos + 1], "session_abc123");
    assert!(!args.contains(&"--session-id".to_string()));
}

#[test]
fn builder_rejects_blank_prompt() {
    let err = CommandBuilder::new(" \n\t").build(api_auth()).unwrap_err();
    assert!(matches!(err, Error::Validation(ref msg) if msg == "Prompt cannot be empty"));
}

#[test]
fn builder_disjoint_tools_succeed_overlapping_fail() {
    let disjoint: [(&[&str], &[&str]); 4] = [
        (&[], &[]),
        (&["Read"], &[]),
        (&[], &["Bash"]),
        (&["Read", "Glob"], &["Bash", "Write"]),
    ];
    for (allowed, disallowed) in disjoint {
        let builder = CommandBuilder::new("task")
            .allowed_tools(allowed)
            .disallowed_tools(disallowed);
        assert_ok!(builder.validate());
    }

    let overlapping: [(&[&str], &[&str]); 3] = [
        (&["Bash"], &["Bash"]),
        (&["Read", "Bash"], &["Write", "Bash"]),
        (&["Read", "Write", "Bash"], &["Bash", "Write"]),
    ];
    for (allowed, disallowed) in overlapping {
        let builder = CommandBuilder::new("task")
            .allowed_tools(allowed)
            .disallowed_tools(disallowed);
        let err = assert_err!(builder.build(api_auth()));
        assert!(matches!(err, Error::Validation(ref msg) if msg.contains("Bash")));
    }
}

#[test]
fn builder_tool_names_compare_after_trimming() {
    let config = ClientConfig::new(AuthKind::AnthropicApi)
        .with_api_key("k")
        .with_allowed_tools([" Bash"])
        .with_disallowed_tools(["Bash"]);
    assert!(matches!(config.validate(), Err(Error::Validation(_))));

    let err = assert_err!(CommandBuilder::from_config(&config, "hi").build(api_auth()));
    assert_eq!(
        err.to_string(),
        "Validation error: Tools cannot be both allowed and disallowed: Bash"
    );
}

#[test]
fn builder_dash_prompt_follows_separator() {
    let args = CommandBuilder::new("--dangerously-skip-permissions")
        .max_turns(1)
        .build_args();
    let separator = args.iter().position(|a| a == "--").unwrap();
    assert_eq!(separator, args.len() - 2);
    assert_eq!(args[separator + 1], "--dangerously-skip-permissions");
    assert!(!args[..separator].contains(&"--dangerously-skip-permissions".to_string()));
}

#[test]
fn builder_overlap_message_is_sorted() {
    let err = CommandBuilder::new("task")
        .allowed_tools(&["Write", "Bash"])
        .disallowed_tools(&["Write", "Bash"])
        .validate()
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Validation error: Tools cannot be both allowed and disallowed: Bash, Write"
    );
}

#[test]
fn builder_passes_mcp_config_path_unchanged() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"mcpServers": {{"fs": {{"command": "npx", "args": [], "env": {{}}}}}}}}"#
    )
    .unwrap();

    let path = file.path().to_path_buf();
    let invocation = CommandBuilder::new("task")
        .mcp_config(&path)
        .build(api_auth())
        .unwrap();

    let args = &invocation.args;
    let pos = args.iter().position(|a| a == "--mcp-config").unwrap();
    assert_eq!(args[pos + 1], path.to_string_lossy());
}

#[test]
fn builder_rejects_malformed_mcp_config() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"servers": []}}"#).unwrap();

    let err = CommandBuilder::new("task")
        .mcp_config(file.path())
        .build(api_auth())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let err = CommandBuilder::new("task")
        .mcp_config("/nonexistent/mcp.json")
        .build(api_auth())
        .unwrap_err();
    assert!(matches!(err, Error::Validation(ref msg) if msg.contains("not found")));
}

#[test]
fn builder_conversation_id_goes_to_environment() {
    let invocation = CommandBuilder::new("hi")
        .conversation_id("conv-9")
        .build(api_auth())
        .unwrap();
    assert_eq!(
        invocation.env.get(CONVERSATION_ID_ENV).map(String::as_str),
        Some("conv-9")
    );
    assert!(!invocation.args.contains(&"conv-9".to_string()));
}

#[test]
fn builder_from_config_is_idempotent() {
    let config = ClientConfig::new(AuthKind::AnthropicApi)
        .with_api_key("k")
        .with_allowed_tools(["Read"])
        .with_max_turns(2)
        .with_output_format(OutputFormat::StreamJson)
        .with_timeout(std::time::Duration::from_secs(30));

    let first = CommandBuilder::from_config(&config, "hi")
        .build(api_auth())
        .unwrap();
    let second = CommandBuilder::from_config(&config, "hi")
        .build(api_auth())
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.timeout, Some(std::time::Duration::from_secs(30)));
    assert!(first.args.contains(&"--verbose".to_string()));
}

#[test]
fn builder_authentication_is_not_consulted_for_invalid_input() {
    let err = CommandBuilder::new("")
        .build_with(|| {
            Err(Error::Authentication {
                field: "api_key",
                message: "missing".to_string(),
            })
        })
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}
