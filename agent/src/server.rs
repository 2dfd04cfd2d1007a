use std::{path::Path, sync::Arc};

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::warn;

use kiosk_common::{config::AgentConfig, CommandResult, ProcessRunner};

use crate::commands::{CommandExecutor, CommandRequest};

type AppState<R> = Arc<CommandExecutor<R>>;

/// Who may talk to the agent. Every request must name the agent itself in
/// `Host`, which keeps pages served elsewhere out even when their name
/// resolves to loopback. Commands additionally need the bearer token.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    allowed_hosts: Arc<Vec<String>>,
    token: Option<Arc<str>>,
}

impl AccessPolicy {
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut allowed_hosts = vec![config.listen_addr.to_ascii_lowercase()];
        if let Some((_, port)) = config.listen_addr.rsplit_once(':') {
            for name in ["localhost", "127.0.0.1", "[::1]"] {
                allowed_hosts.push(format!("{name}:{port}"));
            }
        }
        allowed_hosts.extend(
            config
                .allowed_hosts
                .iter()
                .map(|host| host.trim().to_ascii_lowercase()),
        );

        Self {
            allowed_hosts: Arc::new(allowed_hosts),
            token: config.command_token.as_deref().map(Arc::from),
        }
    }

    pub fn allows_host(&self, host: &str) -> bool {
        let host = host.trim();
        self.allowed_hosts
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host))
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }
}

/// `POST /api/command`, `GET /api/status`, and the screenshot directory
/// under `/screenshots`.
pub fn router<R>(executor: AppState<R>, screenshot_dir: &Path, policy: AccessPolicy) -> Router
where
    R: ProcessRunner + 'static,
{
    let commands = Router::new()
        .route("/api/command", post(handle_command::<R>))
        .route_layer(middleware::from_fn_with_state(
            policy.clone(),
            require_token,
        ));

    Router::new()
        .merge(commands)
        .route("/api/status", get(handle_get_status::<R>))
        .nest_service("/screenshots", ServeDir::new(screenshot_dir))
        .layer(middleware::from_fn_with_state(policy, require_local_host))
        .with_state(executor)
}

pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

async fn require_local_host(
    State(policy): State<AccessPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().authority().map(|authority| authority.as_str()));

    if host.is_some_and(|host| policy.allows_host(host)) {
        return next.run(request).await;
    }

    warn!(
        "refusing {} {} for host {host:?}",
        request.method(),
        request.uri().path()
    );
    StatusCode::MISDIRECTED_REQUEST.into_response()
}

async fn require_token(
    State(policy): State<AccessPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = policy.token.as_deref() else {
        warn!("command refused: agent.command_token is not configured");
        return (
            StatusCode::FORBIDDEN,
            Json(CommandResult::failed("Commands are disabled on this device")),
        )
            .into_response();
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if presented.map(str::trim) == Some(expected) {
        return next.run(request).await;
    }

    warn!("command refused: missing or wrong bearer token");
    (
        StatusCode::UNAUTHORIZED,
        Json(CommandResult::failed("Unauthorized")),
    )
        .into_response()
}

async fn handle_command<R: ProcessRunner>(
    State(executor): State<AppState<R>>,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    Json(executor.execute(&request).await)
}

async fn handle_get_status<R: ProcessRunner>(
    State(executor): State<AppState<R>>,
) -> impl IntoResponse {
    let request = CommandRequest::new("get_status", serde_json::Value::Null);
    Json(executor.execute(&request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use kiosk_common::{
        process::testing::{exit, ScriptedRunner},
        KioskConfig,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::registration::DeviceIdentity;

    const HOST: &str = "127.0.0.1:8765";
    const TOKEN: &str = "hall-display-token";

    fn config(home: &Path) -> KioskConfig {
        let mut config = KioskConfig::default();
        config.agent.home_dir = home.to_path_buf();
        config.agent.restart_settle_secs = 0;
        config.agent.command_token = Some(TOKEN.to_string());
        config
    }

    fn app_with(config: &KioskConfig, runner: Arc<ScriptedRunner>) -> Router {
        let identity = DeviceIdentity {
            hostname: "kiosk-hall".to_string(),
            mac: "b8:27:eb:aa:bb:cc".to_string(),
        };
        let executor = Arc::new(CommandExecutor::new(runner, config, identity, None));
        let screenshot_dir = executor.screenshot_dir().to_path_buf();
        router(
            executor,
            &screenshot_dir,
            AccessPolicy::from_config(&config.agent),
        )
    }

    fn app(home: &Path, runner: Arc<ScriptedRunner>) -> Router {
        app_with(&config(home), runner)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn command_request(host: Option<&str>, token: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/command")
            .header("content-type", "application/json");
        if let Some(host) = host {
            builder = builder.header("host", host);
        }
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn post_command(body: &str) -> Request<Body> {
        command_request(Some(HOST), Some(TOKEN), body)
    }

    fn get(uri: &str, host: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("host", host)
            .body(Body::empty())
            .unwrap()
    }

    const LAUNCH_FEH: &str = r#"{"command": "launch_program", "params": {"program": "feh"}}"#;

    #[tokio::test]
    async fn dispatches_posted_command() {
        let home = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());

        let response = app(home.path(), runner.clone())
            .oneshot(post_command(LAUNCH_FEH))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"success": true, "message": "Program launched: feh"})
        );
        assert_eq!(runner.detached().len(), 1);
    }

    #[tokio::test]
    async fn params_are_optional() {
        let home = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());

        let response = app(home.path(), runner)
            .oneshot(post_command(r#"{"command": "shutdown_now"}"#))
            .await
            .unwrap();

        let result: CommandResult = serde_json::from_value(body_json(response).await).unwrap();
        assert_eq!(result, CommandResult::failed("Unknown command: shutdown_now"));
    }

    #[tokio::test]
    async fn rejects_body_without_command() {
        let home = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());

        let response = app(home.path(), runner.clone())
            .oneshot(post_command(r#"{"params": {}}"#))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn foreign_host_cannot_run_commands() {
        let home = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());

        for host in [Some("kiosk-attacker.example:8765"), Some("127.0.0.1:9999"), None] {
            let response = app(home.path(), runner.clone())
                .oneshot(command_request(host, Some(TOKEN), LAUNCH_FEH))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST, "{host:?}");
        }

        assert!(runner.detached().is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn foreign_host_cannot_read_status() {
        let home = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());

        let response = app(home.path(), runner.clone())
            .oneshot(get("/api/status", "rebind.example.net:8765"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::MISDIRECTED_REQUEST);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn loopback_names_and_configured_hosts_are_accepted() {
        let home = tempfile::tempdir().unwrap();
        let mut config = config(home.path());
        config.agent.allowed_hosts = vec!["Kiosk-Hall.local:8765".to_string()];

        for host in ["localhost:8765", "LOCALHOST:8765", "[::1]:8765", "kiosk-hall.local:8765"] {
            let runner = Arc::new(ScriptedRunner::succeeding());
            let response = app_with(&config, runner.clone())
                .oneshot(command_request(Some(host), Some(TOKEN), LAUNCH_FEH))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{host}");
            assert_eq!(runner.detached().len(), 1, "{host}");
        }
    }

    #[tokio::test]
    async fn command_needs_the_bearer_token() {
        let home = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::succeeding());

        for token in [None, Some("guess"), Some("")] {
            let response = app(home.path(), runner.clone())
                .oneshot(command_request(Some(HOST), token, LAUNCH_FEH))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{token:?}");
            assert_eq!(
                body_json(response).await,
                json!({"success": false, "message": "Unauthorized"})
            );
        }

        assert!(runner.detached().is_empty());
    }

    #[tokio::test]
    async fn commands_are_disabled_without_a_configured_token() {
        let home = tempfile::tempdir().unwrap();
        let mut config = config(home.path());
        config.agent.command_token = None;
        let runner = Arc::new(ScriptedRunner::succeeding());

        let response = app_with(&config, runner.clone())
            .oneshot(command_request(Some(HOST), Some(TOKEN), LAUNCH_FEH))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(runner.detached().is_empty());
    }

    #[tokio::test]
    async fn status_endpoint_reports_device() {
        let home = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new(|_| exit(1)));

        let response = app(home.path(), runner)
            .oneshot(get("/api/status", HOST))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["status"]["hostname"], "kiosk-hall");
        assert_eq!(body["status"]["x_running"], false);
        assert_eq!(body["status"]["device_id"], Value::Null);
    }

    #[tokio::test]
    async fn serves_saved_screenshots() {
        let home = tempfile::tempdir().unwrap();
        let shots = home.path().join("screenshots");
        std::fs::create_dir_all(&shots).unwrap();
        std::fs::write(shots.join("lobby.png"), b"png-bytes").unwrap();

        let response = app(home.path(), Arc::new(ScriptedRunner::succeeding()))
            .oneshot(get("/screenshots/lobby.png", HOST))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"png-bytes");
    }

    #[test]
    fn policy_follows_the_listen_port() {
        let mut config = KioskConfig::default().agent;
        config.listen_addr = "0.0.0.0:9000".to_string();
        let policy = AccessPolicy::from_config(&config);

        assert!(policy.allows_host("localhost:9000"));
        assert!(policy.allows_host("0.0.0.0:9000"));
        assert!(!policy.allows_host("localhost:8765"));
        assert!(!policy.allows_host("localhost"));
        assert!(!policy.has_token());
    }
}
