use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use swarmctl_config::ContainerDriverConfig;
use swarmctl_domain::{
    Instance, InstanceFilter, InstanceId, InstanceSpec, InstanceStatus, NetworkFacts, PortMapping,
    ProviderCapabilities, ProviderKind,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::driver::{Driver, ExecResult, LogBatch, LogEntry, LogLevel, LogOptions, PartialInstanceSpec};
use crate::error::DriverError;

/// Southbound binding for a local container CLI (`docker`/`podman`, §6.1):
/// every operation is a subprocess invocation with deterministic argv,
/// JSON-parsed `inspect` output, and a hard per-invocation timeout.
/// Grounded on the subprocess/piped-IO/timeout idiom the teacher repo uses
/// for its Terraform subprocess driver (`run_tf`).
pub struct ContainerDriver {
    cfg: ContainerDriverConfig,
    network_ready: AtomicBool,
    /// Serializes exec-probe bookkeeping in tests; real CLI calls are
    /// naturally serialized per-container by the backend itself.
    inspect_lock: Mutex<()>,
}

impl ContainerDriver {
    pub fn new(cfg: ContainerDriverConfig) -> Self {
        ContainerDriver {
            cfg,
            network_ready: AtomicBool::new(false),
            inspect_lock: Mutex::new(()),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.cfg.binary)
    }

    /// Runs the CLI with `args`, capturing combined stdout+stderr, bounded
    /// by `command_timeout_secs`. Returns `(exit_code, stdout, stderr)`.
    async fn run(&self, args: &[&str]) -> Result<(i32, String, String), DriverError> {
        debug!(binary = %self.cfg.binary, ?args, "running container CLI command");

        let mut cmd = self.command();
        cmd.args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| DriverError::Unavailable(format!("spawn {}: {}", self.cfg.binary, e)))?;

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(bool, String)>();

        let tx_out = tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx_out.send((false, line));
            }
        });

        let tx_err = tx.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = tx_err.send((true, line));
            }
        });

        drop(tx);

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let collect = async {
            while let Some((is_err, line)) = rx.recv().await {
                let buf = if is_err { &mut stderr_buf } else { &mut stdout_buf };
                buf.push_str(&line);
                buf.push('\n');
            }
        };

        let timed_out = tokio::time::timeout(
            std::time::Duration::from_secs(self.cfg.command_timeout_secs),
            collect,
        )
        .await
        .is_err();

        stdout_task.await.ok();
        stderr_task.await.ok();

        if timed_out {
            let _ = child.kill().await;
            return Err(DriverError::Timeout(format!(
                "{} {} timed out after {}s",
                self.cfg.binary,
                args.first().copied().unwrap_or(""),
                self.cfg.command_timeout_secs
            )));
        }

        let status = child
            .wait()
            .await
            .map_err(|e| DriverError::Internal(format!("wait {}: {}", self.cfg.binary, e)))?;
        let code = status.code().unwrap_or(-1);
        if code != 0 {
            warn!(binary = %self.cfg.binary, code, "container CLI command exited non-zero");
        }
        Ok((code, stdout_buf, stderr_buf))
    }

    async fn inspect(&self, provider_id: &str) -> Result<Option<serde_json::Value>, DriverError> {
        let _guard = self.inspect_lock.lock().await;
        let (code, stdout, stderr) = self.run(&["inspect", provider_id]).await?;
        if code != 0 {
            if stderr.to_lowercase().contains("no such") {
                return Ok(None);
            }
            return Err(DriverError::Internal(format!("inspect failed: {stderr}")));
        }
        let parsed: Vec<serde_json::Value> = serde_json::from_str(stdout.trim())
            .map_err(|e| DriverError::Internal(format!("parse inspect output: {e}")))?;
        Ok(parsed.into_iter().next())
    }

    /// Maps a documented CLI status string to a neutral `InstanceStatus`
    /// (§4.A): `running → Running`; `exited|created|paused → Stopped`;
    /// `restarting → Creating`; `removing → Deleted`; `dead|<unknown> → Failed`.
    fn map_status(raw: &str) -> InstanceStatus {
        match raw {
            "running" => InstanceStatus::Running,
            "exited" | "created" | "paused" => InstanceStatus::Stopped,
            "restarting" => InstanceStatus::Creating,
            "removing" => InstanceStatus::Deleted,
            _ => InstanceStatus::Failed,
        }
    }

    fn instance_from_inspect(
        &self,
        id: &InstanceId,
        provider_kind: &ProviderKind,
        name: &str,
        spec: &InstanceSpec,
        inspected: &serde_json::Value,
        provider_id: &str,
    ) -> Instance {
        let raw_status = inspected
            .get("State")
            .and_then(|s| s.get("Status"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        let status = Self::map_status(raw_status);

        let internal_ip = inspected
            .get("NetworkSettings")
            .and_then(|n| n.get("Networks"))
            .and_then(|n| n.get(&self.cfg.network_name))
            .and_then(|n| n.get("IPAddress"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let external_port = inspected
            .get("NetworkSettings")
            .and_then(|n| n.get("Ports"))
            .and_then(|p| p.get(format!("{}/tcp", spec.network.port)))
            .and_then(|bindings| bindings.as_array())
            .and_then(|arr| arr.first())
            .and_then(|b| b.get("HostPort"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<u16>().ok())
            .unwrap_or(0);

        let mut network = NetworkFacts {
            internal_ip,
            external_ip: Some("127.0.0.1".to_string()),
            ports: Vec::new(),
            urls: Vec::new(),
        };
        if external_port != 0 {
            network.ports.push(PortMapping {
                internal: spec.network.port,
                external: external_port,
                protocol: "tcp".to_string(),
            });
            network.urls.push(format!("http://localhost:{external_port}"));
        }

        let mut metadata = HashMap::new();
        metadata.insert("container_id".to_string(), provider_id.to_string());

        let now = Utc::now();
        Instance {
            id: id.clone(),
            provider_instance_id: Some(provider_id.to_string()),
            provider_kind: provider_kind.clone(),
            name: name.to_string(),
            status,
            spec: spec.clone(),
            usage: Default::default(),
            network,
            metadata,
            created_at: now,
            updated_at: now,
            extra: serde_json::Map::new(),
        }
    }
}

#[async_trait::async_trait]
impl Driver for ContainerDriver {
    fn kind(&self) -> &str {
        "container"
    }

    async fn initialize(&self) -> Result<(), DriverError> {
        let (code, stdout, _) = self
            .run(&["version", "--format", "{{.Server.Version}}"])
            .await
            .map_err(|_| DriverError::Unavailable("container backend unreachable".to_string()))?;
        if code != 0 {
            return Err(DriverError::Unavailable(format!(
                "container backend version query failed: {}",
                stdout.trim()
            )));
        }

        let (code, stdout, _) = self.run(&["network", "ls", "--format", "{{.Name}}"]).await?;
        if code == 0 && !stdout.lines().any(|l| l.trim() == self.cfg.network_name) {
            self.run(&["network", "create", &self.cfg.network_name]).await?;
        }
        self.network_ready.store(true, Ordering::SeqCst);
        info!(network = %self.cfg.network_name, "container driver initialized");
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_live_resize: false,
            supports_snapshotting: false,
            supports_multi_region: false,
            regions: Vec::new(),
            max_instances_per_caller: 64,
            max_cpu_cores_per_instance: 16.0,
            max_memory_mib_per_instance: 65536,
        }
    }

    async fn create(&self, spec: &InstanceSpec, name: &str) -> Result<Instance, DriverError> {
        let id = InstanceId::generate();
        let container_name = format!("swarmctl-{}", id.as_str());

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            container_name.clone(),
            "--network".into(),
            self.cfg.network_name.clone(),
            "-v".into(),
            format!("{}:{}", spec.workspace_path, spec.workspace_path),
            "-p".into(),
            format!("{}:{}", 0, spec.network.port),
        ];
        for (k, v) in &spec.env {
            args.push("-e".into());
            args.push(format!("{k}={v}"));
        }
        if let Some(auth) = &spec.auth {
            if let Some(token) = &auth.token {
                args.push("-e".into());
                args.push(format!("SWARMCTL_PASSWORD={token}"));
            }
        }
        args.push(spec.image.clone());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let (code, stdout, stderr) = self.run(&arg_refs).await?;
        if code != 0 {
            // Best-effort cleanup: the container may have been partially
            // created (e.g. name reserved) even though `run` failed.
            let _ = self.run(&["rm", "-f", &container_name]).await;
            return Err(DriverError::Internal(format!("container create failed: {stderr}")));
        }
        let provider_id = stdout.trim().to_string();

        let inspected = self
            .inspect(&provider_id)
            .await?
            .ok_or_else(|| DriverError::Internal("container vanished immediately after create".to_string()))?;

        Ok(self.instance_from_inspect(&id, &ProviderKind::new(self.kind()), name, spec, &inspected, &provider_id))
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<Instance>, DriverError> {
        let container_name = format!("swarmctl-{}", id.as_str());
        let inspected = match self.inspect(&container_name).await? {
            Some(v) => v,
            None => return Ok(None),
        };
        // `get` on a driver that only keeps the backend's own records can
        // reconstruct the neutral spec's network port from the container's
        // port bindings but not its original image/env; callers needing the
        // full spec should consult the instance registry instead, which is
        // the source of truth for the immutable spec (§4.C).
        let spec = InstanceSpec::default();
        Ok(Some(self.instance_from_inspect(
            id,
            &ProviderKind::new(self.kind()),
            &container_name,
            &spec,
            &inspected,
            &container_name,
        )))
    }

    async fn list(&self, _filter: Option<&InstanceFilter>) -> Result<Vec<Instance>, DriverError> {
        let (code, stdout, stderr) = self
            .run(&["ps", "-a", "--filter", "label=swarmctl", "--format", "{{.ID}}"])
            .await?;
        if code != 0 {
            return Err(DriverError::Internal(format!("container list failed: {stderr}")));
        }
        let mut out = Vec::new();
        for line in stdout.lines() {
            let id = line.trim();
            if id.is_empty() {
                continue;
            }
            if let Some(inspected) = self.inspect(id).await? {
                let spec = InstanceSpec::default();
                out.push(self.instance_from_inspect(
                    &InstanceId::new(id),
                    &ProviderKind::new(self.kind()),
                    id,
                    &spec,
                    &inspected,
                    id,
                ));
            }
        }
        Ok(out)
    }

    async fn start(&self, id: &InstanceId) -> Result<Instance, DriverError> {
        let container_name = format!("swarmctl-{}", id.as_str());
        let (code, _, stderr) = self.run(&["start", &container_name]).await?;
        if code != 0 {
            return Err(DriverError::Internal(format!("container start failed: {stderr}")));
        }
        self.get(id)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} vanished after start")))
    }

    async fn stop(&self, id: &InstanceId, force: bool) -> Result<Instance, DriverError> {
        let container_name = format!("swarmctl-{}", id.as_str());
        let args: Vec<&str> = if force {
            vec!["kill", &container_name]
        } else {
            vec!["stop", &container_name]
        };
        let (code, _, stderr) = self.run(&args).await?;
        if code != 0 {
            return Err(DriverError::Internal(format!("container stop failed: {stderr}")));
        }
        self.get(id)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} vanished after stop")))
    }

    async fn delete(&self, id: &InstanceId) -> Result<bool, DriverError> {
        let container_name = format!("swarmctl-{}", id.as_str());
        let (code, _, stderr) = self.run(&["rm", "-f", &container_name]).await?;
        if code != 0 && !stderr.to_lowercase().contains("no such") {
            return Err(DriverError::Internal(format!("container delete failed: {stderr}")));
        }
        Ok(code == 0)
    }

    async fn update(&self, id: &InstanceId, partial: &PartialInstanceSpec) -> Result<Instance, DriverError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} not found")))?;
        let was_running = existing.status == InstanceStatus::Running;
        let merged_spec = partial.apply(&existing.spec);

        if was_running {
            self.stop(id, false).await?;
        }
        self.delete(id).await?;

        let mut created = self.create(&merged_spec, &existing.name).await?;
        // `update` preserves the original id across the recreate (§4.A).
        created.id = id.clone();

        if was_running && created.status != InstanceStatus::Running {
            created = self.start(id).await?;
        }
        Ok(created)
    }

    async fn logs(&self, id: &InstanceId, opts: &LogOptions) -> Result<LogBatch, DriverError> {
        let container_name = format!("swarmctl-{}", id.as_str());
        let mut args = vec!["logs".to_string(), "--timestamps".to_string()];
        if let Some(lines) = opts.lines {
            args.push("--tail".to_string());
            args.push(lines.to_string());
        }
        args.push(container_name);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let (code, stdout, stderr) = self.run(&arg_refs).await?;
        if code != 0 {
            return Err(DriverError::Internal(format!("container logs failed: {stderr}")));
        }

        let entries = stdout
            .lines()
            .filter(|line| opts.grep.as_deref().map(|pat| line.contains(pat)).unwrap_or(true))
            .map(|line| LogEntry {
                timestamp: Utc::now(),
                level: LogLevel::Info,
                message: line.to_string(),
                source: "stdout".to_string(),
            })
            .collect();
        Ok(LogBatch { entries })
    }

    async fn exec(&self, id: &InstanceId, cmd: &[String]) -> Result<ExecResult, DriverError> {
        let container_name = format!("swarmctl-{}", id.as_str());
        let mut args = vec!["exec".to_string(), container_name];
        args.extend(cmd.iter().cloned());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let (code, stdout, stderr) = self.run(&arg_refs).await?;
        Ok(ExecResult {
            exit_code: code,
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_table() {
        assert_eq!(ContainerDriver::map_status("running"), InstanceStatus::Running);
        assert_eq!(ContainerDriver::map_status("exited"), InstanceStatus::Stopped);
        assert_eq!(ContainerDriver::map_status("created"), InstanceStatus::Stopped);
        assert_eq!(ContainerDriver::map_status("paused"), InstanceStatus::Stopped);
        assert_eq!(ContainerDriver::map_status("restarting"), InstanceStatus::Creating);
        assert_eq!(ContainerDriver::map_status("removing"), InstanceStatus::Deleted);
        assert_eq!(ContainerDriver::map_status("dead"), InstanceStatus::Failed);
        assert_eq!(ContainerDriver::map_status("whatever"), InstanceStatus::Failed);
    }

    #[tokio::test]
    async fn initialize_fails_unavailable_when_binary_missing() {
        let cfg = ContainerDriverConfig {
            binary: "swarmctl-definitely-not-a-real-binary".to_string(),
            ..Default::default()
        };
        let driver = ContainerDriver::new(cfg);
        let err = driver.initialize().await.unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(_)));
    }

    #[test]
    fn capabilities_are_static_and_nonzero() {
        let driver = ContainerDriver::new(ContainerDriverConfig::default());
        let caps = driver.capabilities();
        assert!(caps.max_instances_per_caller > 0);
    }
}
