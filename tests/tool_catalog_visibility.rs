mod common;
use common::ENV_LOCK;

use sentryfrogg::mcp::catalog::list_tools_for_openai;
use std::collections::HashSet;

fn restore_env(key: &str, previous: Option<String>) {
    match previous {
        Some(value) => std::env::set_var(key, value),
        None => std::env::remove_var(key),
    }
}

#[tokio::test]
async fn tools_list_hides_mcp_local_when_unsafe_local_disabled() {
    let _guard = ENV_LOCK.lock().await;

    let prev_unsafe_local = std::env::var("SENTRYFROGG_UNSAFE_LOCAL").ok();

    std::env::remove_var("SENTRYFROGG_UNSAFE_LOCAL");

    let tools = list_tools_for_openai("full", &HashSet::new());
    assert!(
        !tools.iter().any(|tool| tool.name == "mcp_local"),
        "mcp_local must be hidden from tools/list unless SENTRYFROGG_UNSAFE_LOCAL=1"
    );

    restore_env("SENTRYFROGG_UNSAFE_LOCAL", prev_unsafe_local);
}

#[tokio::test]
async fn tools_list_shows_mcp_local_when_unsafe_local_enabled() {
    let _guard = ENV_LOCK.lock().await;

    let prev_unsafe_local = std::env::var("SENTRYFROGG_UNSAFE_LOCAL").ok();

    std::env::set_var("SENTRYFROGG_UNSAFE_LOCAL", "1");

    let tools = list_tools_for_openai("full", &HashSet::new());
    assert!(
        tools.iter().any(|tool| tool.name == "mcp_local"),
        "mcp_local must be present in tools/list when SENTRYFROGG_UNSAFE_LOCAL=1"
    );

    restore_env("SENTRYFROGG_UNSAFE_LOCAL", prev_unsafe_local);
}
