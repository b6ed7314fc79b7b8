use collrun::collection::{Auth, CollectionTree, RequestDef};
use collrun::http::HttpTransport;
use collrun::runner::{ExecutorConfig, RequestExecutor};
use collrun::script::{DirectiveSandbox, ScriptKind};
use collrun::variable::ExecutionContext;
use collrun::{CollrunError, ExecutionError};
use std::sync::Arc;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn executor() -> RequestExecutor {
    RequestExecutor::new(
        Arc::new(HttpTransport::new().unwrap()),
        Arc::new(DirectiveSandbox::new()),
        ExecutorConfig::default(),
    )
}

fn single(def: RequestDef) -> CollectionTree {
    let mut tree = CollectionTree::new("Errors");
    let root = tree.root();
    tree.add_request(root, "Req", def).unwrap();
    tree.wire();
    tree
}

/// 连接被拒绝
#[tokio::test]
async fn test_connection_refused() {
    let tree = single(RequestDef::get("http://127.0.0.1:1/unreachable"));
    let request = tree.find("Req").unwrap();

    let result = executor()
        .execute_request(&tree, request, &mut ExecutionContext::new(), None, None)
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.response.is_none());
    assert_eq!(
        result.error.as_ref().map(|e| e.kind()),
        Some("RequestExecutionError")
    );
}

/// 无效的 URL 在发送之前被拒绝
#[tokio::test]
async fn test_invalid_url() {
    let tree = single(RequestDef::get("not a url"));
    let request = tree.find("Req").unwrap();

    let result = executor()
        .execute_request(&tree, request, &mut ExecutionContext::new(), None, None)
        .await
        .unwrap();

    match result.error {
        Some(ExecutionError::RequestExecution { message, status }) => {
            assert!(message.contains("not a url"));
            assert_eq!(status, None);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

/// 未定义的 URL 变量
#[tokio::test]
async fn test_undefined_url_variable() {
    let tree = single(RequestDef::get("{{base_url}}/users"));
    let request = tree.find("Req").unwrap();

    let result = executor()
        .execute_request(&tree, request, &mut ExecutionContext::new(), None, None)
        .await
        .unwrap();

    match result.error {
        Some(ExecutionError::VariableResolution {
            variable, field, ..
        }) => {
            assert_eq!(variable, "base_url");
            assert_eq!(field, "url");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

/// 不支持的认证类型
#[tokio::test]
async fn test_unsupported_auth_type() {
    let mock_server = MockServer::start().await;
    let mut tree = single(RequestDef::get(mock_server.uri()));
    let request = tree.find("Req").unwrap();
    tree.node_mut(request).with_auth(Auth::new("ntlm"));

    let result = executor()
        .execute_request(&tree, request, &mut ExecutionContext::new(), None, None)
        .await
        .unwrap();

    assert_eq!(
        result.error.as_ref().map(|e| e.kind()),
        Some("AuthenticationError")
    );
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

/// 脚本语法错误：预请求脚本失败时不发送，测试脚本失败时保留响应
#[tokio::test]
async fn test_script_failures() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let mut tree = single(RequestDef::get(mock_server.uri()));
    let request = tree.find("Req").unwrap();
    tree.node_mut(request).scripts.pre_request = Some("frobnicate everything".to_string());

    let result = executor()
        .execute_request(&tree, request, &mut ExecutionContext::new(), None, None)
        .await
        .unwrap();
    match &result.error {
        Some(ExecutionError::ScriptExecution {
            script_type,
            message,
        }) => {
            assert_eq!(*script_type, ScriptKind::PreRequest);
            assert!(message.contains("Request 'Req'"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(result.response.is_none());

    tree.node_mut(request).scripts.pre_request = None;
    tree.node_mut(request).scripts.test = Some("set bogus x = status".to_string());
    let result = executor()
        .execute_request(&tree, request, &mut ExecutionContext::new(), None, None)
        .await
        .unwrap();
    assert!(!result.success);
    assert_eq!(
        result.error.as_ref().map(|e| e.kind()),
        Some("ScriptExecutionError")
    );
    assert_eq!(result.status(), Some(200));
}

/// 结果可以序列化为 JSON，错误带有 kind 标签
#[tokio::test]
async fn test_result_json_shape() {
    let tree = single(RequestDef::get("{{missing}}"));
    let request = tree.find("Req").unwrap();

    let result = executor()
        .execute_request(&tree, request, &mut ExecutionContext::new(), None, None)
        .await
        .unwrap();
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["kind"], "VariableResolution");
    assert_eq!(json["error"]["variable"], "missing");
    assert_eq!(json["path"], serde_json::json!(["Errors", "Req"]));
}

/// 传入文件夹节点是调用错误，而不是失败的结果
#[tokio::test]
async fn test_non_request_node_is_rejected() {
    let mut tree = CollectionTree::new("Errors");
    let root = tree.root();
    let folder = tree.add_folder(root, "Folder").unwrap();

    let err = executor()
        .execute_request(&tree, folder, &mut ExecutionContext::new(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CollrunError::InvalidArgument(_)));
}
