//! Trigger key builder.
//!
//! Turns the env matrix text into one [`BuildRequestKey`] per row and each
//! key into the trigger payload for the build platform.
//!
//! Matrix text is one row per line, each row a `,`-separated list of
//! `key=value` fields:
//!
//! ```text
//! PLATFORM=ios,SHARD=1
//! PLATFORM=android,SHARD=1
//! ```

use std::collections::{BTreeMap, HashSet};

use tracing::warn;

use crate::api::{
    BuildParams, EnvironmentParam, HookInfo, TriggerParams, WorkerParams, HOOK_TYPE,
};
use crate::config::GitContext;
use crate::error::{MatrixError, MatrixResult};

/// Environment overrides of one matrix row, ordered by name.
pub type EnvRow = BTreeMap<String, String>;

/// Parse the env matrix. Empty lines are skipped; any malformed field
/// fails the whole parse.
pub fn parse_env_matrix(input: &str) -> MatrixResult<Vec<EnvRow>> {
    let mut matrix = Vec::new();

    for line in input.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            continue;
        }

        let mut row = EnvRow::new();
        for field in line.split(',') {
            let mut parts = field.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => {
                    row.insert(key.to_string(), value.to_string());
                }
                _ => {
                    return Err(MatrixError::InvalidField {
                        field: field.to_string(),
                    })
                }
            }
        }

        matrix.push(row);
    }

    Ok(matrix)
}

/// `key=value` pairs sorted by key and joined with `,`.
pub fn canonical_env(row: &EnvRow) -> String {
    row.iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Identifier of a build variant: `"{stack} [{machine_type}] - {envs}"`.
pub fn build_id(stack: &str, machine_type: &str, row: &EnvRow) -> String {
    format!("{} [{}] - {}", stack, machine_type, canonical_env(row))
}

/// Parameters shared by every row of the matrix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SharedParams {
    /// Empty means "use the app's default stack".
    pub stack: String,
    /// Empty means "use the app's default machine type".
    pub machine_type: String,
    pub workflow: String,
    pub repo_owner: Option<String>,
}

impl SharedParams {
    pub fn new(stack: &str, machine_type: &str, workflow: &str) -> Self {
        SharedParams {
            stack: stack.to_string(),
            machine_type: machine_type.to_string(),
            workflow: workflow.to_string(),
            repo_owner: None,
        }
    }

    pub fn with_repo_owner(mut self, owner: &str) -> Self {
        if !owner.is_empty() {
            self.repo_owner = Some(owner.to_string());
        }
        self
    }
}

/// One row of the execution matrix, ready to trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequestKey {
    pub stack: String,
    pub machine_type: String,
    pub workflow: String,
    /// Aggregation key, unique per distinct row.
    pub id: String,
    pub envs: EnvRow,
    pub repo_owner: Option<String>,
}

impl BuildRequestKey {
    pub fn new(shared: &SharedParams, envs: EnvRow) -> Self {
        BuildRequestKey {
            id: build_id(&shared.stack, &shared.machine_type, &envs),
            stack: shared.stack.clone(),
            machine_type: shared.machine_type.clone(),
            workflow: shared.workflow.clone(),
            envs,
            repo_owner: shared.repo_owner.clone(),
        }
    }

    /// Trigger payload for this key.
    ///
    /// Git metadata comes from `git`; the key overrides workflow, worker and
    /// environments. The commit message is always sent empty because the
    /// platform mishandles multi-line messages.
    pub fn trigger_params(&self, git: &GitContext, trigger_token: &str) -> TriggerParams {
        let mut build_params = BuildParams {
            commit_hash: git.commit_hash.clone(),
            commit_message: String::new(),
            tag: git.tag.clone(),
            branch: git.branch.clone(),
            branch_repo_owner: git.branch_repo_owner.clone(),
            branch_dest: git.branch_dest.clone(),
            branch_dest_repo_owner: git.branch_dest_repo_owner.clone(),
            pull_request_id: git.pull_request_id,
            pull_request_repository_url: git.pull_request_repository_url.clone(),
            pull_request_merge_branch: git.pull_request_merge_branch.clone(),
            pull_request_head_branch: git.pull_request_head_branch.clone(),
            workflow_id: self.workflow.clone(),
            skip_git_status_report: true,
            environments: self
                .envs
                .iter()
                .map(|(name, value)| EnvironmentParam {
                    mapped_to: name.clone(),
                    value: value.clone(),
                    is_expand: true,
                })
                .collect(),
            worker: WorkerParams::default(),
        };

        if let Some(owner) = &self.repo_owner {
            build_params.branch_repo_owner = owner.clone();
            build_params.branch_dest_repo_owner = owner.clone();
        }
        if !self.stack.is_empty() {
            build_params.worker.only_with_stack_id = self.stack.clone();
        }
        if !self.machine_type.is_empty() {
            build_params.worker.machine_type = self.machine_type.clone();
        }

        TriggerParams {
            hook_info: HookInfo {
                kind: HOOK_TYPE.to_string(),
                build_trigger_token: trigger_token.to_string(),
            },
            build_params,
        }
    }
}

/// One key per matrix row, in matrix order.
///
/// Rows that render to the same identifier are kept; their outcomes
/// collapse into one entry later, so a warning is logged here.
pub fn build_keys(matrix: &[EnvRow], shared: &SharedParams) -> Vec<BuildRequestKey> {
    let mut seen = HashSet::new();
    matrix
        .iter()
        .map(|row| {
            let key = BuildRequestKey::new(shared, row.clone());
            if !seen.insert(key.id.clone()) {
                warn!(id = %key.id, "duplicate matrix row; only one outcome will be reported");
            }
            key
        })
        .collect()
}
