//! Script sandbox for CUSTOM nodes
//!
//! User code is a JavaScript function body called with a single `inputs`
//! argument. It runs in an embedded `boa_engine` interpreter on its own
//! worker thread with:
//! - only ECMAScript built-ins in scope (no filesystem, network or modules)
//! - a code size cap
//! - a per-loop iteration limit and a recursion limit
//! - a wall-clock timeout and cancellation on the async side
//! - at most `max_concurrent_scripts` worker threads alive at once
//!
//! The interpreter cannot be interrupted from outside. The loop limit applies
//! to each loop on its own, so nested loops can run far longer than it
//! suggests, and a timed-out script keeps its thread until it ends by itself.
//! The caller does not wait for it, but the script keeps its worker slot, so
//! runaway scripts can exhaust the slots and later runs fail with a timeout.
//! Interpreter memory is not bounded.

use boa_engine::{Context, Source};
use omniflow_core::PortMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{WorkflowError, WorkflowResult};
use crate::executor::SandboxConfig;

/// Runs user scripts under `SandboxConfig` limits
#[derive(Debug, Clone)]
pub struct ScriptSandbox {
    config: SandboxConfig,
    /// One permit per live worker thread
    workers: Arc<Semaphore>,
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl ScriptSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_concurrent_scripts.max(1)));
        Self { config, workers }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Check static limits before starting an interpreter
    pub fn validate(&self, code: &str) -> WorkflowResult<()> {
        if code.len() > self.config.max_code_bytes {
            return Err(WorkflowError::Sandbox(format!(
                "code is {} bytes, limit is {}",
                code.len(),
                self.config.max_code_bytes
            )));
        }
        Ok(())
    }

    /// Run `code` with `inputs` bound to the `inputs` parameter.
    ///
    /// Returns the body's return value, or `None` when it returns nothing
    /// JSON can represent.
    pub async fn run(
        &self,
        code: &str,
        inputs: &PortMap,
        token: &CancellationToken,
    ) -> WorkflowResult<Option<Value>> {
        self.validate(code)?;

        let inputs_json = serde_json::to_string(inputs)
            .map_err(|e| WorkflowError::Sandbox(format!("cannot encode inputs: {}", e)))?;
        let script = wrap_script(code, &inputs_json);
        let deadline = Instant::now() + self.config.timeout;

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(WorkflowError::Cancelled),
            result = self.run_on_worker(script, deadline) => result,
        }
    }

    /// Evaluate `script` on a fresh thread holding one worker permit.
    ///
    /// The permit is released when the script ends, not when the caller
    /// stops waiting.
    async fn run_on_worker(
        &self,
        script: String,
        deadline: Instant,
    ) -> WorkflowResult<Option<Value>> {
        let timeout_ms = self.config.timeout.as_millis() as u64;

        let permit = tokio::time::timeout_at(deadline, self.workers.clone().acquire_owned())
            .await
            .map_err(|_| {
                warn!(timeout_ms, "All script workers busy");
                WorkflowError::Sandbox(format!("no script worker free within {} ms", timeout_ms))
            })?
            .map_err(|_| WorkflowError::Sandbox("script workers closed".to_string()))?;

        let limits = self.config.clone();
        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("omniflow-script".to_string())
            .spawn(move || {
                let result = evaluate(&script, &limits);
                drop(permit);
                // The caller may have given up already
                let _ = tx.send(result);
            })
            .map_err(|e| WorkflowError::Sandbox(format!("cannot start script worker: {}", e)))?;

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(WorkflowError::Sandbox(
                "script worker exited without a result".to_string(),
            )),
            Err(_) => {
                warn!(timeout_ms, "Script timed out; its worker keeps running");
                Err(WorkflowError::Sandbox(format!("script exceeded {} ms", timeout_ms)))
            }
        }
    }
}

fn wrap_script(code: &str, inputs_json: &str) -> String {
    format!(
        r#"
(function () {{
    var __result = (function (inputs) {{
{code}
    }})({inputs_json});
    if (__result === undefined) {{
        return undefined;
    }}
    return JSON.stringify({{ value: __result }});
}})();
"#
    )
}

fn evaluate(script: &str, limits: &SandboxConfig) -> WorkflowResult<Option<Value>> {
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);

    let value = context
        .eval(Source::from_bytes(script))
        .map_err(|e| match e.try_native(&mut context) {
            Ok(native) => WorkflowError::Sandbox(native.to_string()),
            Err(_) => WorkflowError::Sandbox(e.to_string()),
        })?;

    let Some(encoded) = value.as_string() else {
        debug!("Script returned no value");
        return Ok(None);
    };

    let wrapper: Value = serde_json::from_str(&encoded.to_std_string_escaped())
        .map_err(|e| WorkflowError::Sandbox(format!("cannot decode result: {}", e)))?;

    Ok(wrapper.get("value").cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn inputs() -> PortMap {
        let mut map = PortMap::new();
        map.insert("text".into(), json!("hello"));
        map.insert("n".into(), json!(20));
        map
    }

    async fn run(code: &str) -> WorkflowResult<Option<Value>> {
        ScriptSandbox::default()
            .run(code, &inputs(), &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn test_returns_value() {
        let result = run("return inputs.text.toUpperCase() + ' ' + (inputs.n + 1);")
            .await
            .unwrap();
        assert_eq!(result, Some(json!("HELLO 21")));
    }

    #[tokio::test]
    async fn test_returns_object() {
        let result = run("return { words: inputs.text.split('l').length, ok: true };")
            .await
            .unwrap();
        assert_eq!(result, Some(json!({"words": 3, "ok": true})));
    }

    #[tokio::test]
    async fn test_no_return_value() {
        assert_eq!(run("var x = 1 + 1;").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_thrown_error_surfaces() {
        let err = run("throw new Error('bad input');").await.unwrap_err();
        match err {
            WorkflowError::Sandbox(message) => assert!(message.contains("bad input")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_syntax_error_surfaces() {
        assert!(matches!(
            run("return (;").await,
            Err(WorkflowError::Sandbox(_))
        ));
    }

    #[tokio::test]
    async fn test_no_host_globals() {
        let result = run("return [typeof require, typeof process, typeof fetch];")
            .await
            .unwrap();
        assert_eq!(result, Some(json!(["undefined", "undefined", "undefined"])));
    }

    #[tokio::test]
    async fn test_loop_limit() {
        let sandbox = ScriptSandbox::new(SandboxConfig {
            loop_iteration_limit: 1_000,
            ..SandboxConfig::default()
        });
        let err = sandbox
            .run("while (true) {}", &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Sandbox(_)));
    }

    #[tokio::test]
    async fn test_nested_loops_time_out_and_keep_their_worker() {
        let sandbox = ScriptSandbox::new(SandboxConfig {
            timeout: Duration::from_millis(100),
            loop_iteration_limit: 10_000,
            max_concurrent_scripts: 1,
            ..SandboxConfig::default()
        });
        let nested = "for (var i = 0; i < 5000; i++) {\n\
                      for (var j = 0; j < 5000; j++) {}\n\
                      }\n\
                      return 1;";

        let err = sandbox
            .run(nested, &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::Sandbox("script exceeded 100 ms".into()));

        // The abandoned script still owns the only worker
        let err = sandbox
            .run("return 1;", &PortMap::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WorkflowError::Sandbox("no script worker free within 100 ms".into())
        );
    }

    #[tokio::test]
    async fn test_code_size_limit() {
        let sandbox = ScriptSandbox::new(SandboxConfig {
            max_code_bytes: 8,
            ..SandboxConfig::default()
        });
        assert!(sandbox.validate("return 1;").is_err());
        assert!(sandbox.validate("return;").is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_before_finish() {
        let sandbox = ScriptSandbox::new(SandboxConfig {
            timeout: Duration::from_secs(30),
            ..SandboxConfig::default()
        });
        let token = CancellationToken::new();
        token.cancel();
        let err = sandbox
            .run("return 1;", &PortMap::new(), &token)
            .await
            .unwrap_err();
        assert_eq!(err, WorkflowError::Cancelled);
    }
}
