//! Placement checks run by a node agent before anything is deployed

mod common;

use std::sync::atomic::Ordering;

use apphost::admission::AdmissionError;
use apphost::capabilities::AppStore;
use apphost::lifecycle::LifecycleError;
use apphost::progress::ProgressSender;
use apphost::spec::AppSpecification;
use common::{compose_spec, single_spec, TestNode, NODE_IP};

fn v7_spec(name: &str) -> AppSpecification {
    let mut spec = compose_spec(name, &["app"]);
    spec.version = 7;
    spec
}

async fn install(node: &TestNode, spec: AppSpecification) -> Result<(), LifecycleError> {
    node.agent
        .lifecycle
        .install_hard(spec, &ProgressSender::detached())
        .await
}

#[tokio::test]
async fn test_static_ip_required() {
    let node = TestNode::new();
    node.geo.static_ip.store(false, Ordering::SeqCst);
    let mut spec = v7_spec("pinned");
    spec.staticip = true;

    let result = install(&node, spec.clone()).await;
    assert_eq!(
        result,
        Err(LifecycleError::Admission(AdmissionError::StaticIpRequired(
            "pinned".to_string()
        )))
    );
    assert!(node.log.with_prefix("create:").is_empty());

    node.geo.static_ip.store(true, Ordering::SeqCst);
    install(&node, spec).await.unwrap();
}

#[tokio::test]
async fn test_node_allow_list() {
    let node = TestNode::new();

    let mut elsewhere = v7_spec("listed");
    elsewhere.nodes = vec!["198.51.100.7:16127".to_string()];
    assert_eq!(
        install(&node, elsewhere).await,
        Err(LifecycleError::Admission(AdmissionError::NotAllowed(
            "listed".to_string()
        )))
    );

    let mut here = v7_spec("listed");
    here.nodes = vec![format!("{}:16127", NODE_IP)];
    install(&node, here).await.unwrap();

    let mut by_collateral = v7_spec("collateral");
    by_collateral.nodes = vec!["abcd:0".to_string()];
    install(&node, by_collateral).await.unwrap();
}

#[tokio::test]
async fn test_geolocation_rules() {
    let node = TestNode::new();

    let mut forbidden = compose_spec("geo", &["app"]);
    forbidden.version = 5;
    forbidden.geolocation = vec!["acEU".to_string(), "a!cEU_CZ".to_string()];
    assert!(matches!(
        install(&node, forbidden).await,
        Err(LifecycleError::Admission(AdmissionError::Geolocation(_)))
    ));

    let mut elsewhere = compose_spec("geo", &["app"]);
    elsewhere.version = 5;
    elsewhere.geolocation = vec!["acNA_US".to_string()];
    assert!(matches!(
        install(&node, elsewhere).await,
        Err(LifecycleError::Admission(AdmissionError::Geolocation(_)))
    ));

    let mut allowed = compose_spec("geo", &["app"]);
    allowed.version = 5;
    allowed.geolocation = vec!["acEU_CZ_ALL".to_string()];
    install(&node, allowed).await.unwrap();
}

#[tokio::test]
async fn test_locked_resources_count_against_capacity() {
    let mut config = common::test_config();
    config.node.cpu_cores = 2.0;
    let node = TestNode::with_config(config);

    install(&node, single_spec("first")).await.unwrap();
    install(&node, single_spec("second")).await.unwrap();
    assert_eq!(
        install(&node, single_spec("third")).await,
        Err(LifecycleError::Admission(AdmissionError::InsufficientCpu))
    );
    assert_eq!(node.store.installed_apps().await.unwrap().len(), 2);
}
