//! Startup connectivity guard.
//!
//! Three sequential checks against the configured Grafana instance:
//! reachability (`/api/health`), product identity (same response) and
//! authentication (`/api/user`). A fatal outcome short-circuits the rest.

use std::time::Duration;

use grafana_mcp_core::error::{Error, exit};
use serde::Serialize;
use serde_json::Value;

use crate::client::{CONNECTIVITY_TIMEOUT, GrafanaClient};

#[derive(Clone, Debug)]
pub struct GuardOptions {
    pub attempts: u32,
    /// Delay before retry `n` is `backoff * n`.
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
            timeout: CONNECTIVITY_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStep {
    Reachability,
    Identity,
    Authentication,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Ok,
    Skipped,
    Warning,
    Fatal,
}

/// Outcome of one guard step.
#[derive(Clone, Debug, Serialize)]
pub struct ConnectivityCheckResult {
    pub step: CheckStep,
    pub severity: Severity,
    /// `reachable`, `unreachable`, `tls_invalid`, `grafana`, `unrecognized`,
    /// `authenticated`, `unauthenticated`, `forbidden` or `skipped`
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

impl ConnectivityCheckResult {
    fn new(step: CheckStep, severity: Severity, state: &'static str, message: impl Into<String>) -> Self {
        Self {
            step,
            severity,
            state,
            status: None,
            message: message.into(),
        }
    }

    fn with_status(mut self, status: Option<u16>) -> Self {
        self.status = status;
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GuardReport {
    pub url: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    pub checks: Vec<ConnectivityCheckResult>,
}

impl GuardReport {
    pub fn is_fatal(&self) -> bool {
        self.checks
            .iter()
            .any(|check| check.severity == Severity::Fatal)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            exit::CONNECTIVITY_FAILURE
        } else {
            exit::SUCCESS
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ConnectivityCheckResult> {
        self.checks
            .iter()
            .filter(|check| check.severity == Severity::Warning)
    }

    fn push(&mut self, check: ConnectivityCheckResult) -> bool {
        match check.severity {
            Severity::Fatal => tracing::error!(
                event = "guard.check_failed",
                step = ?check.step,
                state = check.state,
                status = check.status,
                message = %check.message,
            ),
            Severity::Warning | Severity::Skipped => tracing::warn!(
                event = "guard.check_warning",
                step = ?check.step,
                state = check.state,
                status = check.status,
                message = %check.message,
            ),
            Severity::Ok => tracing::info!(
                event = "guard.check_passed",
                step = ?check.step,
                state = check.state,
            ),
        }
        let fatal = check.severity == Severity::Fatal;
        self.checks.push(check);
        !fatal
    }
}

/// Run every step in order and collect the outcomes.
pub async fn run_guard(client: &GrafanaClient, options: &GuardOptions) -> GuardReport {
    let client = client.clone().with_timeout(options.timeout);
    let mut report = GuardReport {
        url: client.config().base_url_str().to_string(),
        ok: false,
        version: None,
        identity: None,
        checks: Vec::new(),
    };

    let health = match check_reachability(&client, options).await {
        Ok(health) => {
            report.push(ConnectivityCheckResult::new(
                CheckStep::Reachability,
                Severity::Ok,
                "reachable",
                "Grafana responded to /api/health",
            ));
            health
        }
        Err(check) => {
            report.push(check);
            return report;
        }
    };

    report.version = health
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_string);
    report.push(check_identity(&health));

    let mut identity = None;
    let auth = check_authentication(&client, &mut identity).await;
    report.identity = identity;
    report.ok = report.push(auth);
    report
}

async fn check_reachability(
    client: &GrafanaClient,
    options: &GuardOptions,
) -> std::result::Result<Value, ConnectivityCheckResult> {
    let attempts = options.attempts.max(1);
    let mut last = None;
    for attempt in 1..=attempts {
        match client.get_json("/health", &[]).await {
            Ok(health) => return Ok(health),
            // The server answered, so it is reachable even if unhealthy.
            Err(Error::Upstream { status, message }) => {
                return Err(ConnectivityCheckResult::new(
                    CheckStep::Reachability,
                    Severity::Fatal,
                    "unreachable",
                    format!("health check returned HTTP {status}: {message}"),
                )
                .with_status(Some(status)));
            }
            Err(Error::Authentication { status, message }) => {
                return Err(ConnectivityCheckResult::new(
                    CheckStep::Reachability,
                    Severity::Fatal,
                    "unauthenticated",
                    format!("health check rejected the credential: {message}"),
                )
                .with_status(Some(status)));
            }
            Err(err @ Error::Connectivity { .. }) => {
                tracing::warn!(event = "guard.reachability_retry", attempt, attempts, error = %err);
                let tls = err.is_tls_failure();
                last = Some(err);
                if tls {
                    break;
                }
                if attempt < attempts {
                    tokio::time::sleep(options.backoff * attempt).await;
                }
            }
            // Anything else will not change on a retry.
            Err(err) => {
                return Err(ConnectivityCheckResult::new(
                    CheckStep::Reachability,
                    Severity::Fatal,
                    err.code(),
                    err.to_string(),
                ));
            }
        }
    }

    let (state, message) = match last {
        Some(err) if err.is_tls_failure() => ("tls_invalid", err.to_string()),
        Some(err) => ("unreachable", err.to_string()),
        None => ("unreachable", "no attempts made".to_string()),
    };
    Err(ConnectivityCheckResult::new(
        CheckStep::Reachability,
        Severity::Fatal,
        state,
        message,
    ))
}

fn check_identity(health: &Value) -> ConnectivityCheckResult {
    let recognized = health
        .as_object()
        .is_some_and(|body| body.contains_key("database") || body.contains_key("version"));
    if recognized {
        ConnectivityCheckResult::new(
            CheckStep::Identity,
            Severity::Ok,
            "grafana",
            "health payload matches Grafana",
        )
    } else {
        ConnectivityCheckResult::new(
            CheckStep::Identity,
            Severity::Warning,
            "unrecognized",
            "endpoint answered /api/health but does not look like Grafana",
        )
    }
}

async fn check_authentication(
    client: &GrafanaClient,
    identity: &mut Option<String>,
) -> ConnectivityCheckResult {
    let credential = client.config().credential();
    if credential.is_none() {
        return ConnectivityCheckResult::new(
            CheckStep::Authentication,
            Severity::Skipped,
            "skipped",
            "no credential configured; requests will be anonymous",
        );
    }

    match client.get_json("/user", &[]).await {
        Ok(user) => {
            *identity = ["login", "email", "name"]
                .iter()
                .find_map(|key| user.get(*key).and_then(Value::as_str))
                .map(str::to_string);
            ConnectivityCheckResult::new(
                CheckStep::Authentication,
                Severity::Ok,
                "authenticated",
                format!(
                    "authenticated as {}",
                    identity.as_deref().unwrap_or("unknown user")
                ),
            )
            .with_status(Some(200))
        }
        Err(Error::Authentication { status, message }) => ConnectivityCheckResult::new(
            CheckStep::Authentication,
            Severity::Fatal,
            "unauthenticated",
            format!("credential rejected: {message}"),
        )
        .with_status(Some(status)),
        Err(Error::Upstream { status: 403, message }) if credential.is_token_style() => {
            ConnectivityCheckResult::new(
                CheckStep::Authentication,
                Severity::Warning,
                "forbidden",
                format!(
                    "{} cannot read /api/user ({message}); continuing",
                    credential.kind()
                ),
            )
            .with_status(Some(403))
        }
        Err(Error::Upstream { status: 403, message }) => ConnectivityCheckResult::new(
            CheckStep::Authentication,
            Severity::Fatal,
            "forbidden",
            format!("credential is not allowed to read /api/user: {message}"),
        )
        .with_status(Some(403)),
        Err(err) => ConnectivityCheckResult::new(
            CheckStep::Authentication,
            Severity::Fatal,
            "unauthenticated",
            err.to_string(),
        )
        .with_status(err.upstream_status()),
    }
}
