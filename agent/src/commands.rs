use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::Local;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use kiosk_common::{system, CommandResult, DeviceStatus, Invocation, KioskConfig, ProcessRunner};

use crate::registration::DeviceIdentity;

/// An incoming request: a command name and free-form parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, params: Value) -> Self {
        Self {
            command: command.into(),
            params,
        }
    }
}

pub struct CommandExecutor<R> {
    runner: Arc<R>,
    identity: DeviceIdentity,
    device_id: Option<String>,
    display: String,
    windowing_process: String,
    browsers: Vec<String>,
    screenshot_dir: PathBuf,
    command_timeout: Duration,
    kill_timeout: Duration,
    restart_settle: Duration,
}

impl<R: ProcessRunner> CommandExecutor<R> {
    pub fn new(
        runner: Arc<R>,
        config: &KioskConfig,
        identity: DeviceIdentity,
        device_id: Option<String>,
    ) -> Self {
        Self {
            runner,
            identity,
            device_id,
            display: config.surface.display.clone(),
            windowing_process: config.surface.windowing_process.clone(),
            browsers: config.surface.browsers.clone(),
            screenshot_dir: config.agent.screenshot_dir(),
            command_timeout: Duration::from_secs(config.agent.command_timeout_secs),
            kill_timeout: Duration::from_secs(config.agent.kill_timeout_secs),
            restart_settle: Duration::from_secs(config.agent.restart_settle_secs),
        }
    }

    pub fn screenshot_dir(&self) -> &Path {
        &self.screenshot_dir
    }

    pub async fn execute(&self, request: &CommandRequest) -> CommandResult {
        info!("executing command {:?}", request.command);

        let result = match request.command.as_str() {
            "restart_render_surface" | "restart_browser" => self.restart_render_surface().await,
            "screenshot" => self.screenshot(&request.params).await,
            "launch_program" => self.launch_program(&request.params),
            "get_status" => self.get_status().await,
            other => CommandResult::failed(format!("Unknown command: {other}")),
        };

        if !result.success {
            warn!("command {:?} failed: {}", request.command, result.message);
        }
        result
    }

    async fn restart_render_surface(&self) -> CommandResult {
        info!("restarting browser");

        for browser in &self.browsers {
            match self.runner.kill_by_name(browser, self.kill_timeout).await {
                // pkill exits 1 when nothing matched.
                Ok(output) => debug!("pkill {browser} exited with {:?}", output.code),
                Err(err) => {
                    error!("error restarting browser: {err}");
                    return CommandResult::failed(err.to_string());
                }
            }
        }

        tokio::time::sleep(self.restart_settle).await;

        // The kiosk session relaunches the browser on its own.
        info!("browser restart initiated");
        CommandResult::ok("Browser restart initiated")
    }

    async fn screenshot(&self, params: &Value) -> CommandResult {
        info!("taking screenshot");

        let filename = match params.get("filename") {
            None | Some(Value::Null) => Local::now()
                .format("screenshot_%Y%m%d_%H%M%S.png")
                .to_string(),
            Some(Value::String(name)) if is_plain_filename(name) => name.clone(),
            Some(other) => {
                return CommandResult::failed(format!("Invalid screenshot filename: {other}"))
            }
        };

        if let Err(err) = tokio::fs::create_dir_all(&self.screenshot_dir).await {
            error!(
                "cannot create screenshot directory {}: {err}",
                self.screenshot_dir.display()
            );
            return CommandResult::failed(err.to_string());
        }

        let filepath = self.screenshot_dir.join(&filename);
        let target = filepath.display().to_string();

        let capture = if self.runner.command_exists("scrot").await {
            Invocation::new("scrot").arg(target.as_str())
        } else if self.runner.command_exists("import").await {
            Invocation::new("import").args(["-window", "root", target.as_str()])
        } else {
            return CommandResult::failed(
                "No screenshot tool available (install scrot or imagemagick)",
            );
        };
        let capture = capture.env("DISPLAY", self.display.as_str());

        if let Err(err) = self.runner.run_checked(&capture, self.command_timeout).await {
            error!("error taking screenshot: {err}");
            return CommandResult::failed(err.to_string());
        }

        info!("screenshot saved: {target}");
        CommandResult::ok(format!("Screenshot saved: {filename}")).with_field("filepath", target)
    }

    fn launch_program(&self, params: &Value) -> CommandResult {
        let Some(program) = params
            .get("program")
            .and_then(Value::as_str)
            .filter(|program| !program.trim().is_empty())
        else {
            return CommandResult::failed("No program specified");
        };

        let args = match params.get("args") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let strings: Option<Vec<String>> = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect();
                match strings {
                    Some(args) => args,
                    None => return CommandResult::failed("Program arguments must be strings"),
                }
            }
            Some(_) => return CommandResult::failed("Program arguments must be a list"),
        };

        let invocation = Invocation::new(program)
            .args(args)
            .env("DISPLAY", self.display.as_str());
        info!("launching program: {invocation}");

        match self.runner.spawn_detached(&invocation) {
            Ok(pid) => {
                info!("program launched: {program}");
                let result = CommandResult::ok(format!("Program launched: {program}"));
                match pid {
                    Some(pid) => result.with_field("pid", pid),
                    None => result,
                }
            }
            Err(err) => {
                error!("error launching program: {err}");
                CommandResult::failed(err.to_string())
            }
        }
    }

    async fn get_status(&self) -> CommandResult {
        let status = self.device_status().await;
        match serde_json::to_value(&status) {
            Ok(value) => CommandResult::ok("Device status").with_field("status", value),
            Err(err) => CommandResult::failed(err.to_string()),
        }
    }

    pub async fn device_status(&self) -> DeviceStatus {
        let x_running = self.runner.is_running(&self.windowing_process).await;

        let mut browser_running = false;
        for browser in &self.browsers {
            if self.runner.is_running(browser).await {
                browser_running = true;
                break;
            }
        }

        DeviceStatus {
            hostname: self.identity.hostname.clone(),
            mac: self.identity.mac.clone(),
            device_id: self.device_id.clone(),
            uptime: system::uptime_seconds(),
            load: system::load_average(),
            x_running,
            browser_running,
            timestamp: system::local_timestamp(),
        }
    }
}

/// A bare file name: no directory components and no parent references.
fn is_plain_filename(name: &str) -> bool {
    !name.is_empty() && !name.contains(['/', '\\']) && !name.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_common::process::testing::{exit, ScriptedRunner};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Fixture {
        _home: tempfile::TempDir,
        config: KioskConfig,
    }

    fn fixture() -> Fixture {
        let home = tempfile::tempdir().unwrap();
        let mut config = KioskConfig::default();
        config.agent.home_dir = home.path().to_path_buf();
        config.agent.restart_settle_secs = 0;
        Fixture {
            _home: home,
            config,
        }
    }

    fn executor(
        runner: Arc<ScriptedRunner>,
        config: &KioskConfig,
    ) -> CommandExecutor<ScriptedRunner> {
        let identity = DeviceIdentity {
            hostname: "kiosk-lobby".to_string(),
            mac: "b8:27:eb:00:00:01".to_string(),
        };
        CommandExecutor::new(runner, config, identity, Some("31".to_string()))
    }

    async fn run(
        executor: &CommandExecutor<ScriptedRunner>,
        command: &str,
        params: Value,
    ) -> CommandResult {
        executor.execute(&CommandRequest::new(command, params)).await
    }

    #[tokio::test]
    async fn restart_kills_every_browser() {
        let fixture = fixture();
        // pkill reports "no match" for most browsers; that is still success.
        let runner = Arc::new(ScriptedRunner::new(|invocation| {
            if invocation.args.last().map(String::as_str) == Some("surf") {
                exit(0)
            } else {
                exit(1)
            }
        }));
        let executor = executor(runner.clone(), &fixture.config);

        for alias in ["restart_browser", "restart_render_surface"] {
            let result = run(&executor, alias, Value::Null).await;
            assert_eq!(result, CommandResult::ok("Browser restart initiated"));
        }

        assert_eq!(
            runner.call_lines()[..4].to_vec(),
            vec![
                "pkill -9 chromium-browse",
                "pkill -9 epiphany-browse",
                "pkill -9 surf",
                "pkill -9 firefox-esr"
            ]
        );
        assert_eq!(runner.calls().len(), 8);
    }

    #[tokio::test]
    async fn restart_fails_when_pkill_is_missing() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::new(|invocation| {
            Err(kiosk_common::CommandError::Spawn {
                program: invocation.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            })
        }));
        let executor = executor(runner.clone(), &fixture.config);

        let result = run(&executor, "restart_browser", Value::Null).await;
        assert!(!result.success);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn screenshot_prefers_scrot() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let executor = executor(runner.clone(), &fixture.config);

        let result = run(&executor, "screenshot", json!({"filename": "lobby.png"})).await;

        let expected = executor.screenshot_dir().join("lobby.png");
        assert!(result.success);
        assert_eq!(result.message, "Screenshot saved: lobby.png");
        assert_eq!(
            result.extra["filepath"],
            json!(expected.display().to_string())
        );
        assert!(executor.screenshot_dir().is_dir());

        let calls = runner.calls();
        assert_eq!(calls[0].to_string(), "which scrot");
        assert_eq!(calls[1].to_string(), format!("scrot {}", expected.display()));
        assert_eq!(
            calls[1].env,
            vec![("DISPLAY".to_string(), ":0".to_string())]
        );
    }

    #[tokio::test]
    async fn screenshot_falls_back_to_import() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::new(|invocation| {
            match (invocation.program.as_str(), invocation.args.first()) {
                ("which", Some(tool)) if tool == "scrot" => exit(1),
                _ => exit(0),
            }
        }));
        let executor = executor(runner.clone(), &fixture.config);

        let result = run(&executor, "screenshot", Value::Null).await;

        assert!(result.success);
        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].program, "import");
        assert_eq!(calls[2].args[..2].to_vec(), vec!["-window", "root"]);

        let saved = calls[2].args[2].clone();
        let name = Path::new(&saved).file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("screenshot_") && name.ends_with(".png"));
        assert_eq!(name.len(), "screenshot_20260101_120000.png".len());
    }

    #[tokio::test]
    async fn screenshot_without_tools_fails() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::new(|_| exit(1)));
        let executor = executor(runner.clone(), &fixture.config);

        let result = run(&executor, "screenshot", Value::Null).await;

        assert_eq!(
            result,
            CommandResult::failed("No screenshot tool available (install scrot or imagemagick)")
        );
        assert_eq!(runner.call_lines(), vec!["which scrot", "which import"]);
    }

    #[tokio::test]
    async fn screenshot_rejects_path_like_names() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let executor = executor(runner.clone(), &fixture.config);

        for name in [json!("../etc/passwd"), json!("a/b.png"), json!(""), json!(12)] {
            let result = run(&executor, "screenshot", json!({ "filename": name })).await;
            assert!(!result.success, "{name} should be rejected");
        }
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_capture_is_reported() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::new(|invocation| {
            if invocation.program == "scrot" {
                exit(2)
            } else {
                exit(0)
            }
        }));
        let executor = executor(runner, &fixture.config);

        let result = run(&executor, "screenshot", json!({"filename": "x.png"})).await;
        assert!(!result.success);
        assert!(!result.extra.contains_key("filepath"));
    }

    #[tokio::test]
    async fn launch_program_spawns_detached_with_display() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let executor = executor(runner.clone(), &fixture.config);

        let result = run(
            &executor,
            "launch_program",
            json!({"program": "xterm", "args": ["-e", "top"]}),
        )
        .await;

        assert_eq!(result, CommandResult::ok("Program launched: xterm"));
        assert!(runner.calls().is_empty());

        let detached = runner.detached();
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].to_string(), "xterm -e top");
        assert_eq!(
            detached[0].env,
            vec![("DISPLAY".to_string(), ":0".to_string())]
        );
    }

    #[tokio::test]
    async fn launch_program_requires_a_program() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let executor = executor(runner.clone(), &fixture.config);

        for params in [Value::Null, json!({}), json!({"program": ""})] {
            let result = run(&executor, "launch_program", params).await;
            assert_eq!(result, CommandResult::failed("No program specified"));
        }

        let result = run(
            &executor,
            "launch_program",
            json!({"program": "xterm", "args": "-e top"}),
        )
        .await;
        assert!(!result.success);
        assert!(runner.detached().is_empty());
    }

    #[tokio::test]
    async fn launch_failure_is_reported() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::succeeding().failing_detached());
        let executor = executor(runner.clone(), &fixture.config);

        let result = run(&executor, "launch_program", json!({"program": "nope"})).await;

        assert!(!result.success);
        assert_eq!(runner.detached().len(), 1);
    }

    #[tokio::test]
    async fn get_status_reports_surface_processes() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::new(|invocation| {
            match invocation.args.first().map(String::as_str) {
                Some("Xorg") | Some("epiphany-browse") => exit(0),
                _ => exit(1),
            }
        }));
        let executor = executor(runner.clone(), &fixture.config);

        let result = run(&executor, "get_status", Value::Null).await;

        assert!(result.success);
        let status: DeviceStatus = serde_json::from_value(result.extra["status"].clone()).unwrap();
        assert_eq!(status.hostname, "kiosk-lobby");
        assert_eq!(status.device_id.as_deref(), Some("31"));
        assert!(status.x_running);
        assert!(status.browser_running);
        assert_eq!(
            runner.call_lines(),
            vec!["pgrep Xorg", "pgrep chromium-browse", "pgrep epiphany-browse"]
        );
    }

    #[tokio::test]
    async fn unknown_command_is_rejected() {
        let fixture = fixture();
        let runner = Arc::new(ScriptedRunner::succeeding());
        let executor = executor(runner.clone(), &fixture.config);

        let result = run(&executor, "reboot", Value::Null).await;

        assert_eq!(result, CommandResult::failed("Unknown command: reboot"));
        assert!(runner.calls().is_empty());
    }
}
