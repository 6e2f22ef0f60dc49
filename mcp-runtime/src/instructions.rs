use std::path::{Path, PathBuf};

pub const INSTRUCTIONS_PATH_ENV: &str = "MCP_INSTRUCTIONS_PATH";

const BUILT_IN: &str = "\
This server provides access to a Grafana instance and the services around it.

Available tool families:
- Dashboards: search dashboards, fetch one by UID, ID or URL, summarize it, extract panel queries, read \
parts of it by JSONPath, and create or patch dashboards.
- Datasources: list datasources and fetch one by UID or name.
- Prometheus and Loki: run PromQL and LogQL queries and explore metric names, label names and label values.
- Alerting: list alert rules (with label selectors) and notification contact points.
- Incidents: list, fetch and create incidents, and add notes to their timeline.
- Sift: list investigations and analyses, and run error-pattern and slow-request checks.
- Asserts: summarize the assertions raised for an entity.
- OnCall: view schedules, shifts, teams, users and who is on call now.
- Admin: list teams and organization users.
- Pyroscope: list profile types and labels, and fetch profiles.
- Navigation: generate deeplinks to dashboards, panels and Explore.

Tools that depend on an integration the instance does not have are not listed.

Every result is a single JSON object with a `type` field. List results carry their items under a \
descriptive field together with `total_count`; other payloads sit under `grafana_response`.

When responding, favor concise summaries and include identifiers (dashboard UID, datasource UID, \
incident ID) so follow-up calls can fetch details. Do not expand raw JSON unless asked.";

/// Where instructions may live, in priority order: the configured path, then
/// `instructions.md` in the working directory.
pub fn candidate_paths(lookup: impl Fn(&str) -> Option<String>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(configured) = lookup(INSTRUCTIONS_PATH_ENV).filter(|raw| !raw.trim().is_empty()) {
        candidates.push(PathBuf::from(configured.trim()));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("instructions.md"));
    }
    candidates
}

/// First non-empty candidate file, else the built-in text.
pub fn load_from(candidates: &[PathBuf]) -> String {
    for path in candidates {
        if let Some(text) = read_non_empty(path) {
            tracing::info!(event = "instructions.loaded", path = %path.display());
            return text;
        }
    }
    tracing::debug!(event = "instructions.built_in");
    BUILT_IN.to_string()
}

pub fn load_instructions() -> String {
    load_from(&candidate_paths(|key| std::env::var(key).ok()))
}

fn read_non_empty(path: &Path) -> Option<String> {
    if !path.is_file() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Err(err) => {
            tracing::warn!(event = "instructions.read_failed", path = %path.display(), error = %err);
            None
        }
    }
}
