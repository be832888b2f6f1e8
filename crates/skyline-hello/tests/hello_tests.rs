//! The hello-world stack end to end against the simulated cloud
//!
//! Tenet: declaration errors never reach the provider, a second apply of
//! the same declaration changes nothing, and `POST /hello` answers with the
//! JSON-encoded greeting.

use pretty_assertions::assert_eq;
use skyline_aws::sim::{HttpRequest, SimulatedCloud};
use skyline_aws::types::{
    API, FUNCTION, INTEGRATION, PERMISSION, ROLE, ROLE_POLICY_ATTACHMENT, ROUTE, STAGE,
};
use skyline_aws::prelude::*;
use skyline_engine::{
    Engine, FileStateStore, NodeOutcome, ProviderError, SkylineConfig, StateRecord, StateStore,
    StepKind,
};
use skyline_graph::{GraphBuilder, GraphError, NodeName, Output};
use skyline_hello::{code_archive, hello_graph, register, HelloOptions, ENTRY_POINT, URL_OUTPUT};
use std::sync::Arc;

const ALL_TYPES: [&str; 8] = [
    ROLE,
    ROLE_POLICY_ATTACHMENT,
    FUNCTION,
    API,
    STAGE,
    INTEGRATION,
    ROUTE,
    PERMISSION,
];

fn cloud() -> Arc<SimulatedCloud> {
    let cloud = Arc::new(SimulatedCloud::new(&SkylineConfig::default()));
    register(&cloud);
    cloud
}

fn is_endpoint(url: &str) -> bool {
    let Some(host) = url.strip_prefix("https://") else {
        return false;
    };
    let Some(id) = host.strip_suffix(".execute-api.us-east-1.amazonaws.com") else {
        return false;
    };
    !id.is_empty() && id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

#[tokio::test]
async fn test_first_apply_creates_one_of_each() {
    let cloud = cloud();
    let graph = hello_graph("dev", &HelloOptions::default()).unwrap();
    let report = Engine::new(cloud.clone())
        .apply(&graph, StateRecord::new("dev"))
        .await
        .unwrap();

    assert!(report.succeeded());
    assert_eq!(report.count(StepKind::Create), 8);
    for resource_type in ALL_TYPES {
        assert_eq!(cloud.count(resource_type), 1, "{resource_type}");
        assert_eq!(report.state.count_of(resource_type), 1, "{resource_type}");
    }

    assert_eq!(report.outputs.len(), 1);
    let url = report.outputs[URL_OUTPUT].as_str().unwrap();
    assert!(is_endpoint(url), "{url}");
    let api_id = &report.state.resource("httpApi").unwrap().id;
    assert_eq!(url, format!("https://{api_id}.execute-api.us-east-1.amazonaws.com"));
}

#[tokio::test]
async fn test_post_hello_returns_greeting() {
    let cloud = cloud();
    let graph = hello_graph("dev", &HelloOptions::default()).unwrap();
    let report = Engine::new(cloud.clone())
        .apply(&graph, StateRecord::new("dev"))
        .await
        .unwrap();
    let url = report.outputs[URL_OUTPUT].as_str().unwrap();

    let response = cloud.invoke(url, &HttpRequest::new("POST", "/hello")).unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "\"Hello, World!\"");

    let wrong_method = cloud.invoke(url, &HttpRequest::new("GET", "/hello")).unwrap();
    assert_eq!(wrong_method.status, 404);
}

#[tokio::test]
async fn test_second_apply_is_noop() {
    let cloud = cloud();
    let engine = Engine::new(cloud.clone());
    let graph = hello_graph("dev", &HelloOptions::default()).unwrap();
    let first = engine.apply(&graph, StateRecord::new("dev")).await.unwrap();
    let calls = cloud.call_count();

    let again = hello_graph("dev", &HelloOptions::default()).unwrap();
    assert!(engine.preview(&again, &first.state).is_noop());
    let second = engine.apply(&again, first.state.clone()).await.unwrap();

    assert!(second.succeeded());
    assert!(second.is_noop());
    assert_eq!(second.count(StepKind::Same), 8);
    assert_eq!(cloud.call_count(), calls);
    assert_eq!(second.outputs, first.outputs);
    assert_eq!(second.state.resources, first.state.resources);
}

#[tokio::test]
async fn test_removing_route_deletes_only_route() {
    let cloud = cloud();
    let engine = Engine::new(cloud.clone());
    let first = engine
        .apply(&hello_graph("dev", &HelloOptions::default()).unwrap(), StateRecord::new("dev"))
        .await
        .unwrap();

    let without = hello_graph("dev", &HelloOptions::new().with_route(false)).unwrap();
    let plan = engine.preview(&without, &first.state);
    let deletes: Vec<&str> = plan.steps_of(StepKind::Delete).map(|s| s.name.as_str()).collect();
    assert_eq!(deletes, vec!["route"]);

    let second = engine.apply(&without, first.state.clone()).await.unwrap();
    assert!(second.succeeded());
    assert_eq!(second.count(StepKind::Delete), 1);
    assert_eq!(second.count(StepKind::Same), 7);
    assert_eq!(cloud.count(ROUTE), 0);
    for resource_type in ALL_TYPES.into_iter().filter(|t| *t != ROUTE) {
        assert_eq!(cloud.count(resource_type), 1, "{resource_type}");
    }
    for (name, resource) in &second.state.resources {
        assert_eq!(resource.id, first.state.resources[name].id, "{name}");
    }

    let url = second.outputs[URL_OUTPUT].as_str().unwrap();
    let response = cloud.invoke(url, &HttpRequest::new("POST", "/hello")).unwrap();
    assert_eq!(response.status, 404);
}

#[tokio::test]
async fn test_renaming_role_converges() {
    let cloud = cloud();
    let engine = Engine::new(cloud.clone());
    let before = hello_graph("dev", &HelloOptions::new().with_role_name("before")).unwrap();
    let first = engine.apply(&before, StateRecord::new("dev")).await.unwrap();
    assert!(first.succeeded());

    let after = hello_graph("dev", &HelloOptions::new().with_role_name("after")).unwrap();
    let second = engine.apply(&after, first.state).await.unwrap();
    assert!(second.succeeded(), "{:?}", second.failures().collect::<Vec<_>>());
    assert_eq!(second.outcome("lambdaRole"), Some(&NodeOutcome::Applied { kind: StepKind::Replace }));
    assert_eq!(
        second.outcome("lambdaRoleAttachment"),
        Some(&NodeOutcome::Applied { kind: StepKind::Replace })
    );
    assert_eq!(
        second.outcome("myLambdaFunction"),
        Some(&NodeOutcome::Applied { kind: StepKind::Update })
    );
    assert!(second.state.pending_deletes.is_empty());
    assert!(cloud.get(ROLE, "before").is_none());
    assert!(cloud.get(ROLE, "after").is_some());
    assert_eq!(cloud.count(ROLE), 1);
    assert_eq!(cloud.count(ROLE_POLICY_ATTACHMENT), 1);

    let url = second.outputs[URL_OUTPUT].as_str().unwrap();
    let response = cloud.invoke(url, &HttpRequest::new("POST", "/hello")).unwrap();
    assert_eq!(response.status, 200);

    let calls = cloud.call_count();
    let third = engine.apply(&after, second.state).await.unwrap();
    assert!(third.is_noop());
    assert_eq!(cloud.call_count(), calls);
}

#[tokio::test]
async fn test_typo_in_role_reference_is_rejected_before_any_call() {
    let cloud = cloud();
    let mut ctx = GraphBuilder::new("dev");
    Role::new(
        &mut ctx,
        "lambdaRole",
        RoleArgs::new(PolicyDocument::assume_role("lambda.amazonaws.com")),
    )
    .unwrap();
    Function::new(
        &mut ctx,
        "myLambdaFunction",
        FunctionArgs {
            name: None,
            runtime: Runtime::NodeJs20x.into(),
            code: code_archive().into(),
            handler: ENTRY_POINT.into(),
            role: Output::attribute(NodeName::new("lambdaRol").unwrap(), "arn"),
        },
    )
    .unwrap();

    let err = ctx.build().unwrap_err();
    assert_eq!(
        err,
        GraphError::DanglingReference {
            referrer: "myLambdaFunction".to_owned(),
            reference: NodeName::new("lambdaRol").unwrap(),
        }
    );
    assert_eq!(cloud.call_count(), 0);
    assert!(cloud.snapshot().is_empty());
}

#[tokio::test]
async fn test_failed_function_keeps_independent_branch() {
    let cloud = cloud();
    cloud.fail_next(FUNCTION, ProviderError::limit_exceeded("function quota reached"));
    let engine = Engine::new(cloud.clone());
    let graph = hello_graph("dev", &HelloOptions::default()).unwrap();
    let report = engine.apply(&graph, StateRecord::new("dev")).await.unwrap();

    assert!(!report.succeeded());
    match report.outcome("myLambdaFunction") {
        Some(NodeOutcome::Failed { error, .. }) => {
            assert!(error.to_string().contains("function quota reached"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    let mut skipped: Vec<&str> = report.skipped().map(NodeName::as_str).collect();
    skipped.sort_unstable();
    assert_eq!(skipped, vec!["apiGatewayPermission", "lambdaIntegration", "route"]);
    for name in ["lambdaRole", "lambdaRoleAttachment", "httpApi", "stage"] {
        assert!(report.state.resource(name).is_some(), "{name}");
    }
    assert!(report.outputs.contains_key(URL_OUTPUT));

    let healed = engine.apply(&graph, report.state).await.unwrap();
    assert!(healed.succeeded());
    assert_eq!(healed.count(StepKind::Create), 4);
    assert_eq!(healed.count(StepKind::Same), 4);
    let url = healed.outputs[URL_OUTPUT].as_str().unwrap();
    let response = cloud.invoke(url, &HttpRequest::new("POST", "/hello")).unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_session_resumes_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStateStore::new(dir.path());
    let config = SkylineConfig::default();
    let graph = hello_graph("dev", &HelloOptions::default()).unwrap();

    let cloud = cloud();
    let report = Engine::from_config(cloud.clone(), &config)
        .apply(&graph, store.load_or_new("dev").unwrap())
        .await
        .unwrap();
    store.save(&report.state).unwrap();
    let snapshot = serde_json::to_string(&cloud.snapshot()).unwrap();

    let resumed = Arc::new(SimulatedCloud::from_snapshot(
        serde_json::from_str(&snapshot).unwrap(),
        &config,
    ));
    register(&resumed);
    let state = store.load("dev").unwrap().unwrap();
    assert!(state.journal.verify_integrity().is_ok());

    let again = Engine::from_config(resumed.clone(), &config)
        .apply(&graph, state)
        .await
        .unwrap();
    assert!(again.is_noop());
    assert_eq!(resumed.call_count(), 0);

    let url = again.outputs[URL_OUTPUT].as_str().unwrap();
    let response = resumed.invoke(url, &HttpRequest::new("POST", "/hello")).unwrap();
    assert_eq!(response.body, "\"Hello, World!\"");

    let destroyed = Engine::from_config(resumed.clone(), &config)
        .destroy(again.state)
        .await
        .unwrap();
    assert!(destroyed.succeeded());
    assert!(resumed.snapshot().is_empty());
}
