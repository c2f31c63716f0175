//! Integration tests for the k8s connector using wiremock
//!
//! A mocked API server stands in for the cluster; listors drive it through
//! the connector registry exactly as a scan does.

use cloudbench::auth::{AuthProvider, Profile, StaticAuthProvider};
use cloudbench::connector::k8s::{K8S_API_SERVER, K8S_TOKEN};
use cloudbench::connector::{ConnectorRegistry, K8sConnector};
use cloudbench::definition::{ConfListor, ConfVersionConstraint};
use cloudbench::framework::{ListOptions, Listor};
use cloudbench::Error;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry() -> Arc<ConnectorRegistry> {
    let mut registry = ConnectorRegistry::new();
    registry.register(Arc::new(K8sConnector::new(Duration::from_secs(5))));
    Arc::new(registry)
}

fn auth(server: &MockServer) -> Arc<dyn AuthProvider> {
    let uri = server.uri();
    Arc::new(StaticAuthProvider::new().with_profile(
        "k8s",
        Profile::from_pairs(
            "test-cluster",
            &[(K8S_API_SERVER, uri.as_str()), (K8S_TOKEN, "test-token")],
        ),
    ))
}

fn pods_listor() -> ConfListor {
    serde_yaml::from_str(
        r#"
id: 1
cloud_type: k8s
rs_type: Pods
list_cmd:
  data_list_json_path: $.items
  k8s:
    version: v1
    namespace: prod
    resource: pods
    extra_param:
      labelSelector: app=web
"#,
    )
    .expect("valid listor")
}

/// The whole `items` envelope comes back from exactly one call
#[tokio::test]
async fn test_list_pods_single_call() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/prod/pods"))
        .and(query_param("labelSelector", "app=web"))
        .and(bearer_token("test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "PodList",
            "items": [
                {"metadata": {"name": "web-1"}},
                {"metadata": {"name": "web-2"}},
                {"metadata": {"name": "web-3"}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let listor = Listor::new(pods_listor(), Some(auth(&server)), registry());
    let data = listor.list_data(&ListOptions::new()).await.unwrap();

    assert_eq!(data.len(), 3);
    assert_eq!(data[0]["metadata"]["name"], "web-1");
    assert_eq!(data[2]["metadata"]["name"], "web-3");
}

#[tokio::test]
async fn test_server_error_is_connector_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/prod/pods"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "kind": "Status",
            "message": "pods is forbidden"
        })))
        .mount(&server)
        .await;

    let listor = Listor::new(pods_listor(), Some(auth(&server)), registry());
    let err = listor.list_data(&ListOptions::new()).await.unwrap_err();

    match err {
        Error::Connector { cloud, message } => {
            assert_eq!(cloud, "k8s");
            assert!(message.contains("403"), "unexpected message: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_unconfigured_cluster_lists_nothing() {
    let server = MockServer::start().await;

    let listor = Listor::new(
        pods_listor(),
        Some(Arc::new(StaticAuthProvider::new())),
        registry(),
    );
    let data = listor.list_data(&ListOptions::new()).await.unwrap();

    assert!(data.is_empty());
    let requests = server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_version_constraint() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/version"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"gitVersion": "v1.22.4+k3s1"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/namespaces/prod/pods"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let mut conf = pods_listor();
    conf.constraint.by_cloud.insert(
        "k8s".to_string(),
        ConfVersionConstraint {
            version: ">= 1.24".to_string(),
        },
    );
    let listor = Listor::new(conf.clone(), Some(auth(&server)), registry());
    let err = listor.list_data(&ListOptions::new()).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "constraint not satisfied, need >= 1.24, got v1.22.4+k3s1"
    );

    conf.constraint.by_cloud.insert(
        "k8s".to_string(),
        ConfVersionConstraint {
            version: ">= 1.20, < 1.23".to_string(),
        },
    );
    let listor = Listor::new(conf, Some(auth(&server)), registry());
    assert!(listor.list_data(&ListOptions::new()).await.unwrap().is_empty());
}

/// Profiles sharing a name but pointing at different clusters never share
/// a client
#[tokio::test]
async fn test_same_profile_name_different_clusters() {
    let cluster_a = MockServer::start().await;
    let cluster_b = MockServer::start().await;
    for (server, label) in [(&cluster_a, "a"), (&cluster_b, "b")] {
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/prod/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"metadata": {"name": label}}]
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    let auth_for = |server: &MockServer| -> Arc<dyn AuthProvider> {
        let uri = server.uri();
        Arc::new(StaticAuthProvider::new().with_profile(
            "k8s",
            Profile::from_pairs("default", &[(K8S_API_SERVER, uri.as_str())]),
        ))
    };

    let listor = Listor::new(pods_listor(), None, registry());
    let from_a = listor
        .list_data(&ListOptions::new().with_auth(auth_for(&cluster_a)))
        .await
        .unwrap();
    let from_b = listor
        .list_data(&ListOptions::new().with_auth(auth_for(&cluster_b)))
        .await
        .unwrap();

    assert_eq!(from_a[0]["metadata"]["name"], "a");
    assert_eq!(from_b[0]["metadata"]["name"], "b");
}
