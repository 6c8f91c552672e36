//! The update object: a single create/update/delete/start/stop/restart
//! request, carried through plan generation and execution, completed exactly
//! once.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::chute::{Chute, HostConfigSpec, NetInterfaceSpec};
use crate::context::AgentContext;
use crate::plan::PlanMap;
use crate::{Error, Result, plan, plans};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Create,
    Update,
    Delete,
    Start,
    Stop,
    Restart,
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpdateType::Create => "create",
            UpdateType::Update => "update",
            UpdateType::Delete => "delete",
            UpdateType::Start => "start",
            UpdateType::Stop => "stop",
            UpdateType::Restart => "restart",
        };
        f.write_str(s)
    }
}

/// An inbound request, as received on the wire. Unknown fields are collected
/// rather than rejected; they are kept for diagnostics only.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    #[serde(rename = "updateClass")]
    pub update_class: String,
    #[serde(rename = "updateType")]
    pub update_type: UpdateType,
    pub name: String,
    /// Correlation token chosen by the requester.
    #[serde(default)]
    pub tok: u64,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub external_image: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub host_config: Option<HostConfigSpec>,
    #[serde(default)]
    pub net: BTreeMap<String, NetInterfaceSpec>,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The terminal outcome handed back to the requester.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub success: bool,
    pub message: String,
    /// Progress and warning log; attached in debug mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responses: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct Update {
    pub update_type: UpdateType,
    pub name: String,
    pub tok: u64,
    pub new: Option<Chute>,
    pub old: Option<Chute>,
    /// Append-only log of human-readable progress and warnings.
    pub responses: Vec<String>,
    /// First irrecoverable error, if any.
    pub failure: Option<String>,
    /// Unknown request fields, for diagnostics.
    pub extra: serde_json::Map<String, serde_json::Value>,

    pub(crate) plan: PlanMap,
    pub(crate) config_changed: bool,
    completion: Option<oneshot::Sender<UpdateResult>>,
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} (tok {})", self.update_type, self.name, self.tok)
    }
}

impl Update {
    /// Validates the request envelope and builds the update. The sender is
    /// fired exactly once when the update completes.
    pub fn from_request(
        request: UpdateRequest,
        completion: oneshot::Sender<UpdateResult>,
    ) -> Result<Self> {
        if request.update_class != "CHUTE" {
            return Err(Error::validation(format!(
                "unknown update class '{}'",
                request.update_class
            )));
        }

        let new = match request.update_type {
            UpdateType::Create | UpdateType::Update => Some(Chute {
                name: request.name.clone(),
                version: request.version,
                external_image: request.external_image,
                environment: request.environment,
                host_config: request.host_config,
                net: request.net,
                dockerfile: request.dockerfile,
                cache: Default::default(),
            }),
            _ => None,
        };

        Ok(Update {
            update_type: request.update_type,
            name: request.name,
            tok: request.tok,
            new,
            old: None,
            responses: Vec::new(),
            failure: None,
            extra: request.extra,
            plan: PlanMap::default(),
            config_changed: false,
            completion: Some(completion),
        })
    }

    /// Appends a progress line visible in debug-mode results.
    pub fn progress(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(update = %self.name, "{message}");
        self.responses.push(message);
    }

    pub(crate) fn chute(&self, target: plan::Target) -> Result<&Chute> {
        let chute = match target {
            plan::Target::Old => self.old.as_ref(),
            plan::Target::New => self.new.as_ref(),
        };

        chute.ok_or_else(|| {
            Error::validation(format!("update {self} has no {target:?} chute snapshot"))
        })
    }

    pub(crate) fn chute_mut(&mut self, target: plan::Target) -> Result<&mut Chute> {
        let display = format!("update {self} has no {target:?} chute snapshot");
        let chute = match target {
            plan::Target::Old => self.old.as_mut(),
            plan::Target::New => self.new.as_mut(),
        };

        chute.ok_or(Error::Validation(display))
    }

    /// Generates the plan, executes it, commits the chute store, and fires
    /// the completion channel. All failure paths complete the update with
    /// `success=false`.
    pub async fn execute(&mut self, ctx: &AgentContext) {
        self.old = ctx.chutes.get(&self.name);

        if let Err(e) = plans::generate(self) {
            let message = e.to_string();
            tracing::warn!(update = %self, "Failed to generate plans: {message}");
            self.failure = Some(message.clone());
            self.complete(false, message, ctx.settings.debug_mode);
            return;
        }

        match plan::execute_plan(self, ctx).await {
            Ok(()) => {
                self.commit(ctx);
                let message = format!("Chute {} {} success", self.name, self.update_type);
                self.complete(true, message, ctx.settings.debug_mode);
            }
            Err(_) => {
                let message = self
                    .failure
                    .clone()
                    .unwrap_or_else(|| "update failed".to_owned());
                self.complete(false, message, ctx.settings.debug_mode);
            }
        }
    }

    fn commit(&mut self, ctx: &AgentContext) {
        match self.update_type {
            UpdateType::Create | UpdateType::Update => {
                if let Some(new) = self.new.clone() {
                    ctx.chutes.insert(new);
                }
            }
            UpdateType::Delete => {
                ctx.chutes.remove(&self.name);
            }
            // The stored snapshot is unchanged by lifecycle-only updates.
            UpdateType::Start | UpdateType::Stop | UpdateType::Restart => {}
        }
    }

    /// Fires the completion channel. Later calls are no-ops.
    pub fn complete(&mut self, success: bool, message: impl Into<String>, debug: bool) {
        let Some(sender) = self.completion.take() else {
            tracing::warn!(update = %self, "Update already completed");
            return;
        };

        let result = UpdateResult {
            success,
            message: message.into(),
            responses: debug.then(|| self.responses.clone()),
        };

        if sender.send(result).is_err() {
            tracing::warn!(update = %self, "Requester went away before completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::container::testing::ScriptedEngine;
    use crate::context::Settings;

    fn request(update_type: &str, name: &str) -> UpdateRequest {
        serde_json::from_value(serde_json::json!({
            "updateClass": "CHUTE",
            "updateType": update_type,
            "name": name,
            "tok": 7,
            "external_image": "registry.example.com/app:1",
        }))
        .unwrap()
    }

    fn context(engine: Arc<ScriptedEngine>, debug: bool) -> (TempDir, AgentContext) {
        paradrop_logging::test_global("debug");

        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            config_dir: dir.path().join("config"),
            write_dir: dir.path().join("run"),
            data_dir: dir.path().join("data"),
            dynamic_network_pool: "192.168.128.0/17".parse().unwrap(),
            registry_auth: None,
            router_id: "router-test".to_owned(),
            pipework: dir.path().join("pipework"),
            sys_net_dir: dir.path().join("sys-net"),
            wan_interface: "eth0".to_owned(),
            apply_commands: false,
            debug_mode: debug,
        };
        std::fs::create_dir_all(&settings.config_dir).unwrap();
        std::fs::create_dir_all(&settings.write_dir).unwrap();
        std::fs::create_dir_all(&settings.sys_net_dir).unwrap();

        let ctx = AgentContext::new(settings, engine).unwrap();
        (dir, ctx)
    }

    async fn run(ctx: &AgentContext, request: UpdateRequest) -> UpdateResult {
        let (tx, rx) = oneshot::channel();
        let mut update = Update::from_request(request, tx).unwrap();
        update.execute(ctx).await;
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn create_pulls_creates_and_starts() {
        let engine = Arc::new(ScriptedEngine::new());
        let (_dir, ctx) = context(engine.clone(), false);

        let result = run(&ctx, request("create", "sensor")).await;

        assert!(result.success, "{}", result.message);
        assert!(result.responses.is_none());
        assert_eq!(
            engine.calls(),
            [
                "pull registry.example.com/app:1",
                "create sensor",
                "start sensor",
                "inspect sensor",
            ]
        );
        assert!(ctx.chutes.contains("sensor"));
    }

    #[tokio::test]
    async fn create_failure_runs_aborts_in_reverse() {
        let engine = Arc::new(ScriptedEngine::new().fail_on("start"));
        let (_dir, ctx) = context(engine.clone(), false);

        let result = run(&ctx, request("create", "sensor")).await;

        assert!(!result.success);
        assert_eq!(
            engine.calls(),
            [
                "pull registry.example.com/app:1",
                "create sensor",
                "start sensor",
                "remove_container sensor force=true",
                "remove_image registry.example.com/app:1",
            ]
        );
        assert!(!ctx.chutes.contains("sensor"));
    }

    #[tokio::test]
    async fn create_of_existing_chute_fails_cleanly() {
        let engine = Arc::new(ScriptedEngine::new());
        let (_dir, ctx) = context(engine.clone(), false);

        assert!(run(&ctx, request("create", "sensor")).await.success);
        let result = run(&ctx, request("create", "sensor")).await;

        assert!(!result.success);
        assert!(result.message.contains("already exists"));
    }

    #[tokio::test]
    async fn update_replaces_the_container() {
        let engine = Arc::new(ScriptedEngine::new());
        let (_dir, ctx) = context(engine.clone(), false);

        assert!(run(&ctx, request("create", "sensor")).await.success);
        let result = run(&ctx, request("update", "sensor")).await;

        assert!(result.success, "{}", result.message);
        let calls = engine.calls();
        let after_create = &calls[4..];
        assert_eq!(
            after_create,
            [
                "stop sensor",
                "pull registry.example.com/app:1",
                "remove_container sensor force=true",
                "create sensor",
                "start sensor",
                "inspect sensor",
            ]
        );
    }

    #[tokio::test]
    async fn delete_removes_container_and_image() {
        let engine = Arc::new(ScriptedEngine::new());
        let (_dir, ctx) = context(engine.clone(), false);

        assert!(run(&ctx, request("create", "sensor")).await.success);
        let result = run(&ctx, request("delete", "sensor")).await;

        assert!(result.success, "{}", result.message);
        assert!(!ctx.chutes.contains("sensor"));
        let calls = engine.calls();
        assert!(calls.contains(&"remove_container sensor force=true".to_owned()));
        assert!(calls.contains(&"remove_image registry.example.com/app:1".to_owned()));
    }

    #[tokio::test]
    async fn lifecycle_updates_require_an_existing_chute() {
        let engine = Arc::new(ScriptedEngine::new());
        let (_dir, ctx) = context(engine.clone(), false);

        let result = run(&ctx, request("stop", "ghost")).await;

        assert!(!result.success);
        assert!(result.message.contains("no chute named"));
    }

    #[tokio::test]
    async fn stop_then_start_uses_the_stored_chute() {
        let engine = Arc::new(ScriptedEngine::new());
        let (_dir, ctx) = context(engine.clone(), false);

        assert!(run(&ctx, request("create", "sensor")).await.success);
        assert!(run(&ctx, request("stop", "sensor")).await.success);
        assert!(run(&ctx, request("start", "sensor")).await.success);

        let calls = engine.calls();
        assert!(calls.contains(&"stop sensor".to_owned()));
        assert_eq!(
            calls.iter().filter(|c| c.as_str() == "start sensor").count(),
            2
        );
    }

    #[tokio::test]
    async fn debug_mode_attaches_the_response_log() {
        let engine = Arc::new(ScriptedEngine::new());
        let (_dir, ctx) = context(engine.clone(), true);

        let result = run(&ctx, request("create", "sensor")).await;

        let responses = result.responses.unwrap();
        assert!(
            responses
                .iter()
                .any(|line| line.contains("Pulling image: registry.example.com/app:1"))
        );
    }

    #[tokio::test]
    async fn unknown_update_class_is_rejected() {
        let request: UpdateRequest = serde_json::from_value(serde_json::json!({
            "updateClass": "ROUTER",
            "updateType": "create",
            "name": "x",
        }))
        .unwrap();

        let (tx, _rx) = oneshot::channel();
        let err = Update::from_request(request, tx).unwrap_err();

        assert!(err.to_string().contains("unknown update class"));
    }

    #[test]
    fn unknown_request_fields_are_collected() {
        let request: UpdateRequest = serde_json::from_value(serde_json::json!({
            "updateClass": "CHUTE",
            "updateType": "create",
            "name": "x",
            "somethingCustom": true,
        }))
        .unwrap();

        assert!(request.extra.contains_key("somethingCustom"));
    }
}
