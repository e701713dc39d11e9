use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::{json, Value};
use swarmctl_config::CloudDriverConfig;
use swarmctl_domain::{
    Instance, InstanceFilter, InstanceId, InstanceSpec, InstanceStatus, NetworkFacts, PortMapping,
    ProviderCapabilities, ProviderKind,
};
use tracing::{debug, info, warn};

use crate::driver::{Driver, ExecResult, LogBatch, LogEntry, LogLevel, LogOptions, PartialInstanceSpec};
use crate::error::DriverError;

/// HTTPS binding to a token-authenticated micro-VM platform (§6.2), modeled
/// after the Fly.io Machines API app/machine/service/guest shape. Every
/// request is bearer-authenticated and retried with jittered exponential
/// backoff on retryable failures.
pub struct CloudDriver {
    cfg: CloudDriverConfig,
    client: reqwest::Client,
}

impl CloudDriver {
    pub fn new(cfg: CloudDriverConfig) -> Result<Self, DriverError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| DriverError::Internal(format!("build http client: {e}")))?;
        Ok(CloudDriver { cfg, client })
    }

    #[cfg(test)]
    fn with_base(cfg: CloudDriverConfig) -> Self {
        CloudDriver {
            client: reqwest::Client::new(),
            cfg,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.api_base.trim_end_matches('/'), path)
    }

    /// Maps an HTTP status to a neutral error kind per §6.2: 401 →
    /// Authentication (non-retryable), 404 → NotFound (non-retryable), 429
    /// → RateLimited (retryable), 5xx/transport → Internal (retryable),
    /// anything else → InvalidArgument (non-retryable).
    fn map_status_error(status: reqwest::StatusCode, body: &str) -> DriverError {
        let message = Self::extract_message(body).unwrap_or_else(|| body.to_string());
        match status.as_u16() {
            401 | 403 => DriverError::Authentication(message),
            404 => DriverError::NotFound(message),
            409 => DriverError::Conflict(message),
            429 => DriverError::RateLimited(message),
            500..=599 => DriverError::Internal(message),
            _ => DriverError::InvalidArgument(message),
        }
    }

    fn extract_message(body: &str) -> Option<String> {
        let value: Value = serde_json::from_str(body).ok()?;
        value
            .get("error")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("message").and_then(|v| v.as_str()))
            .map(str::to_string)
    }

    /// Jittered exponential backoff: `initial_backoff_ms * multiplier^attempt`,
    /// capped at `max_backoff_ms`, with up to 25% random jitter added so
    /// concurrent callers don't retry in lockstep.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = (self.cfg.initial_backoff_ms as f64) * self.cfg.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.cfg.max_backoff_ms as f64);
        let jitter_frac = rand::thread_rng().gen_range(0.0..0.25);
        let with_jitter = capped * (1.0 + jitter_frac);
        Duration::from_millis(with_jitter.round() as u64)
    }

    /// Sends one request, retrying retryable failures with backoff up to
    /// `max_retries` times.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<Value, DriverError> {
        let mut attempt = 0;
        loop {
            let resp = build()
                .bearer_auth(&self.cfg.auth_token)
                .send()
                .await;

            let result = match resp {
                Ok(r) => {
                    let status = r.status();
                    let text = r.text().await.unwrap_or_default();
                    if status.is_success() {
                        if text.trim().is_empty() {
                            Ok(json!({}))
                        } else {
                            serde_json::from_str(&text)
                                .map_err(|e| DriverError::Internal(format!("decode response: {e}")))
                        }
                    } else {
                        Err(Self::map_status_error(status, &text))
                    }
                }
                Err(e) => Err(DriverError::Internal(format!("transport error: {e}"))),
            };

            match result {
                Ok(v) => return Ok(v),
                Err(e) if e.retryable() && attempt < self.cfg.max_retries => {
                    let delay = self.backoff_delay(attempt);
                    warn!(attempt, ?delay, error = %e, "retrying cloud driver request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_machine(&self, app: &str, machine_id: &str) -> Result<Option<Value>, DriverError> {
        let url = self.url(&format!("/v1/apps/{app}/machines/{machine_id}"));
        match self.send_with_retry(|| self.client.get(&url)).await {
            Ok(v) => Ok(Some(v)),
            Err(DriverError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Maps the platform's machine state to a neutral `InstanceStatus`.
    fn map_state(state: &str) -> InstanceStatus {
        match state {
            "started" | "running" => InstanceStatus::Running,
            "stopped" | "suspended" => InstanceStatus::Stopped,
            "created" | "starting" => InstanceStatus::Creating,
            "destroying" | "destroyed" => InstanceStatus::Deleted,
            _ => InstanceStatus::Failed,
        }
    }

    fn instance_from_machine(
        &self,
        id: &InstanceId,
        name: &str,
        spec: &InstanceSpec,
        machine: &Value,
    ) -> Instance {
        let state = machine.get("state").and_then(|v| v.as_str()).unwrap_or("unknown");
        let status = Self::map_state(state);
        let machine_id = machine.get("id").and_then(|v| v.as_str()).unwrap_or("").to_string();

        let region = machine.get("region").and_then(|v| v.as_str()).map(str::to_string);
        let mut network = NetworkFacts::default();
        if let Some(private_ip) = machine
            .get("private_ip")
            .and_then(|v| v.as_str())
        {
            network.internal_ip = Some(private_ip.to_string());
        }
        if let Some(services) = machine
            .get("config")
            .and_then(|c| c.get("services"))
            .and_then(|v| v.as_array())
        {
            for svc in services {
                let internal = svc.get("internal_port").and_then(|v| v.as_u64()).unwrap_or(0) as u16;
                if let Some(ports) = svc.get("ports").and_then(|v| v.as_array()) {
                    for p in ports {
                        if let Some(external) = p.get("port").and_then(|v| v.as_u64()) {
                            network.ports.push(PortMapping {
                                internal,
                                external: external as u16,
                                protocol: "tcp".to_string(),
                            });
                        }
                    }
                }
            }
        }

        let mut metadata = std::collections::HashMap::new();
        metadata.insert("machine_id".to_string(), machine_id.clone());
        if let Some(region) = &region {
            metadata.insert("region".to_string(), region.clone());
        }

        let now = Utc::now();
        Instance {
            id: id.clone(),
            provider_instance_id: Some(machine_id),
            provider_kind: ProviderKind::new("cloud"),
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

    fn machine_config(spec: &InstanceSpec) -> Value {
        let mut env = serde_json::Map::new();
        for (k, v) in &spec.env {
            env.insert(k.clone(), json!(v));
        }
        json!({
            "image": spec.image,
            "env": env,
            "guest": {
                "cpu_kind": if spec.resources.cpu.dedicated { "performance" } else { "shared" },
                "cpus": spec.resources.cpu.cores.max(1.0) as u64,
                "memory_mb": spec.resources.memory.min_mib,
            },
            "services": [{
                "internal_port": spec.network.port,
                "protocol": "tcp",
                "ports": [{ "port": 0 }],
            }],
        })
    }
}

#[async_trait::async_trait]
impl Driver for CloudDriver {
    fn kind(&self) -> &str {
        "cloud"
    }

    async fn initialize(&self) -> Result<(), DriverError> {
        let url = self.url("/v1/apps");
        self.send_with_retry(|| self.client.get(&url).query(&[("limit", "1")]))
            .await
            .map_err(|e| match e {
                DriverError::Authentication(m) => DriverError::Authentication(m),
                other => DriverError::Unavailable(format!("cloud backend unreachable: {other}")),
            })?;
        info!("cloud driver initialized");
        Ok(())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_live_resize: false,
            supports_snapshotting: true,
            supports_multi_region: true,
            regions: vec!["iad".to_string(), "sea".to_string(), "fra".to_string()],
            max_instances_per_caller: 256,
            max_cpu_cores_per_instance: 8.0,
            max_memory_mib_per_instance: 32768,
        }
    }

    async fn create(&self, spec: &InstanceSpec, name: &str) -> Result<Instance, DriverError> {
        let id = InstanceId::generate();
        let app = format!("swarmctl-{}", id.as_str());

        self.send_with_retry(|| {
            self.client
                .post(self.url("/v1/apps"))
                .json(&json!({ "app_name": app, "org_slug": "personal" }))
        })
        .await?;

        let body = json!({ "name": name, "config": Self::machine_config(spec) });
        let created = match self
            .send_with_retry(|| self.client.post(self.url(&format!("/v1/apps/{app}/machines"))).json(&body))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                let _ = self.send_with_retry(|| self.client.delete(self.url(&format!("/v1/apps/{app}")))).await;
                return Err(e);
            }
        };

        Ok(self.instance_from_machine(&id, name, spec, &created))
    }

    async fn get(&self, id: &InstanceId) -> Result<Option<Instance>, DriverError> {
        let app = format!("swarmctl-{}", id.as_str());
        let machines = self.send_with_retry(|| self.client.get(self.url(&format!("/v1/apps/{app}/machines")))).await;
        let machines = match machines {
            Ok(v) => v,
            Err(DriverError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let machine = machines.as_array().and_then(|a| a.first());
        match machine {
            Some(m) => {
                let spec = InstanceSpec::default();
                Ok(Some(self.instance_from_machine(id, &app, &spec, m)))
            }
            None => Ok(None),
        }
    }

    async fn list(&self, _filter: Option<&InstanceFilter>) -> Result<Vec<Instance>, DriverError> {
        let apps = self.send_with_retry(|| self.client.get(self.url("/v1/apps"))).await?;
        let mut out = Vec::new();
        let app_list = apps
            .get("apps")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for app_entry in app_list {
            let app = match app_entry.get("name").and_then(|v| v.as_str()) {
                Some(n) if n.starts_with("swarmctl-") => n.to_string(),
                _ => continue,
            };
            let id = InstanceId::new(app.trim_start_matches("swarmctl-"));
            if let Ok(Some(instance)) = self.get(&id).await {
                out.push(instance);
            }
        }
        Ok(out)
    }

    async fn start(&self, id: &InstanceId) -> Result<Instance, DriverError> {
        let app = format!("swarmctl-{}", id.as_str());
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} not found")))?;
        let machine_id = existing
            .metadata
            .get("machine_id")
            .cloned()
            .ok_or_else(|| DriverError::Internal("missing machine_id metadata".to_string()))?;
        self.send_with_retry(|| self.client.post(self.url(&format!("/v1/apps/{app}/machines/{machine_id}/start"))))
            .await?;
        self.get(id).await?.ok_or_else(|| DriverError::NotFound(format!("instance {id} vanished after start")))
    }

    async fn stop(&self, id: &InstanceId, _force: bool) -> Result<Instance, DriverError> {
        let app = format!("swarmctl-{}", id.as_str());
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} not found")))?;
        let machine_id = existing
            .metadata
            .get("machine_id")
            .cloned()
            .ok_or_else(|| DriverError::Internal("missing machine_id metadata".to_string()))?;
        self.send_with_retry(|| self.client.post(self.url(&format!("/v1/apps/{app}/machines/{machine_id}/stop"))))
            .await?;
        self.get(id).await?.ok_or_else(|| DriverError::NotFound(format!("instance {id} vanished after stop")))
    }

    async fn delete(&self, id: &InstanceId) -> Result<bool, DriverError> {
        let app = format!("swarmctl-{}", id.as_str());
        match self
            .send_with_retry(|| self.client.delete(self.url(&format!("/v1/apps/{app}"))))
            .await
        {
            Ok(_) => Ok(true),
            Err(DriverError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn update(&self, id: &InstanceId, partial: &PartialInstanceSpec) -> Result<Instance, DriverError> {
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} not found")))?;
        let was_running = existing.status == InstanceStatus::Running;
        let merged_spec = partial.apply(&existing.spec);

        self.delete(id).await?;
        let mut created = self.create(&merged_spec, &existing.name).await?;
        created.id = id.clone();

        if was_running && created.status != InstanceStatus::Running {
            created = self.start(id).await?;
        }
        Ok(created)
    }

    async fn logs(&self, id: &InstanceId, opts: &LogOptions) -> Result<LogBatch, DriverError> {
        let app = format!("swarmctl-{}", id.as_str());
        let mut req = self.client.get(self.url(&format!("/v1/apps/{app}/machines/logs")));
        if let Some(lines) = opts.lines {
            req = req.query(&[("limit", lines.to_string())]);
        }
        let resp = self.send_with_retry(|| req.try_clone().expect("cloneable request")).await?;
        let entries = resp
            .get("entries")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|e| {
                let message = e.get("message").and_then(|v| v.as_str())?.to_string();
                if let Some(pat) = &opts.grep {
                    if !message.contains(pat.as_str()) {
                        return None;
                    }
                }
                Some(LogEntry {
                    timestamp: Utc::now(),
                    level: LogLevel::Info,
                    message,
                    source: "platform".to_string(),
                })
            })
            .collect();
        Ok(LogBatch { entries })
    }

    async fn exec(&self, id: &InstanceId, cmd: &[String]) -> Result<ExecResult, DriverError> {
        let app = format!("swarmctl-{}", id.as_str());
        let existing = self
            .get(id)
            .await?
            .ok_or_else(|| DriverError::NotFound(format!("instance {id} not found")))?;
        let machine_id = existing
            .metadata
            .get("machine_id")
            .cloned()
            .ok_or_else(|| DriverError::Internal("missing machine_id metadata".to_string()))?;

        let body = json!({ "command": cmd });
        let resp = self
            .send_with_retry(|| {
                self.client
                    .post(self.url(&format!("/v1/apps/{app}/machines/{machine_id}/exec")))
                    .json(&body)
            })
            .await?;
        debug!(%id, "exec completed");
        Ok(ExecResult {
            exit_code: resp.get("exit_code").and_then(|v| v.as_i64()).unwrap_or(-1) as i32,
            stdout: resp.get("stdout").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            stderr: resp.get("stderr").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_cfg(base: &str) -> CloudDriverConfig {
        CloudDriverConfig {
            api_base: base.to_string(),
            auth_token: "test-token".to_string(),
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            ..Default::default()
        }
    }

    #[test]
    fn state_mapping_matches_table() {
        assert_eq!(CloudDriver::map_state("started"), InstanceStatus::Running);
        assert_eq!(CloudDriver::map_state("stopped"), InstanceStatus::Stopped);
        assert_eq!(CloudDriver::map_state("created"), InstanceStatus::Creating);
        assert_eq!(CloudDriver::map_state("destroyed"), InstanceStatus::Deleted);
        assert_eq!(CloudDriver::map_state("whatever"), InstanceStatus::Failed);
    }

    #[test]
    fn status_mapping_is_non_retryable_for_auth_and_not_found() {
        let auth = CloudDriver::map_status_error(reqwest::StatusCode::UNAUTHORIZED, "{}");
        assert!(!auth.retryable());
        let nf = CloudDriver::map_status_error(reqwest::StatusCode::NOT_FOUND, "{}");
        assert!(!nf.retryable());
    }

    #[test]
    fn status_mapping_is_retryable_for_rate_limit_and_server_error() {
        let rl = CloudDriver::map_status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "{}");
        assert!(rl.retryable());
        let server = CloudDriver::map_status_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "{}");
        assert!(server.retryable());
    }

    #[tokio::test]
    async fn initialize_succeeds_when_apps_endpoint_is_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/apps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "apps": [] })))
            .mount(&server)
            .await;

        let driver = CloudDriver::with_base(test_cfg(&server.uri()));
        driver.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_fails_unavailable_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/apps"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let driver = CloudDriver::with_base(test_cfg(&server.uri()));
        let err = driver.initialize().await.unwrap_err();
        assert!(matches!(err, DriverError::Unavailable(_)));
    }

    #[tokio::test]
    async fn retries_on_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/apps"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/apps"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "apps": [] })))
            .mount(&server)
            .await;

        let driver = CloudDriver::with_base(test_cfg(&server.uri()));
        driver.initialize().await.unwrap();
    }
}
