//! Registry-level tests for taskweave-agents

use taskweave_agents::{create_default_registry, Agent, AgentRegistry};

#[test]
fn default_registry_has_all_builtin_agents() {
    let registry = create_default_registry();
    let mut names = registry.list();
    names.sort();
    assert_eq!(names, vec!["extraction", "reducer", "validator", "viz_spec"]);
}

#[test]
fn version_tags_are_stable() {
    let registry = create_default_registry();
    assert_eq!(registry.version_tag("viz_spec"), "viz_spec@1");
    assert_eq!(registry.version_tag("missing"), "missing@unknown");
}

#[tokio::test]
async fn unknown_agent_is_an_agent_error() {
    let registry = create_default_registry();
    let err = registry
        .execute("nope", serde_json::json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "AgentError");
}

#[tokio::test]
async fn registration_replaces_by_name() {
    struct Stub;

    #[async_trait::async_trait]
    impl Agent for Stub {
        fn name(&self) -> &str {
            "validator"
        }
        fn version(&self) -> &str {
            "99"
        }
        async fn run(
            &self,
            _args: serde_json::Value,
        ) -> taskweave_core::Result<serde_json::Value> {
            Ok(serde_json::json!({"stub": true}))
        }
    }

    let mut registry = AgentRegistry::new();
    registry.register(Stub);
    assert_eq!(registry.version_tag("validator"), "validator@99");
    let out = registry.execute("validator", serde_json::json!({})).await.unwrap();
    assert_eq!(out["stub"], true);
}
