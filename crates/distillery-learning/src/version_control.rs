//! Versioning for training data: field diffs, branches, merges, rollback,
//! integrity validation and recovery from the history log.
//!
//! Every mutation goes through [`VersionControl::write_version`], which bumps
//! the version by one and appends a history entry carrying full before/after
//! snapshots in the same compare-and-swap write. Rollback and recovery are
//! themselves forward versions; history is never rewritten.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use distillery_core::{Branch, ChangeType, PatternType, TrainingData, TrainingHistory};
use distillery_db::TrainingStore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::LearningError;

/// Fields compared by [`diff`]. Identity and bookkeeping fields are excluded.
pub const TRACKED_FIELDS: [&str; 9] = [
    "signal_id",
    "pattern",
    "pattern_type",
    "embedding",
    "confidence",
    "positive_count",
    "negative_count",
    "seen_count",
    "active",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: Value,
    pub new: Value,
}

/// A field both the branch and the main line changed, to different values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeConflict {
    pub field: &'static str,
    pub base: Value,
    pub main: Value,
    pub branch: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeOutcome {
    Merged {
        record: TrainingData,
        applied: Vec<FieldChange>,
    },
    /// Nothing was written; the branch stays open.
    Conflicted { conflicts: Vec<MergeConflict> },
}

/// Edits applied to a branch snapshot. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchPatch {
    pub pattern: Option<String>,
    pub pattern_type: Option<PatternType>,
    pub embedding: Option<Vec<f32>>,
    pub confidence: Option<f64>,
    pub active: Option<bool>,
}

fn field_value(record: &TrainingData, field: &str) -> Value {
    match field {
        "signal_id" => json!(record.signal_id),
        "pattern" => json!(record.pattern),
        "pattern_type" => json!(record.pattern_type),
        "embedding" => json!(record.embedding),
        "confidence" => json!(record.confidence),
        "positive_count" => json!(record.positive_count),
        "negative_count" => json!(record.negative_count),
        "seen_count" => json!(record.seen_count),
        "active" => json!(record.active),
        _ => Value::Null,
    }
}

fn copy_field(target: &mut TrainingData, source: &TrainingData, field: &str) {
    match field {
        "signal_id" => target.signal_id.clone_from(&source.signal_id),
        "pattern" => target.pattern.clone_from(&source.pattern),
        "pattern_type" => target.pattern_type = source.pattern_type,
        "embedding" => target.embedding.clone_from(&source.embedding),
        "confidence" => target.confidence = source.confidence,
        "positive_count" => target.positive_count = source.positive_count,
        "negative_count" => target.negative_count = source.negative_count,
        "seen_count" => target.seen_count = source.seen_count,
        "active" => target.active = source.active,
        _ => {}
    }
}

/// Tracked fields whose values differ between `old` and `new`.
#[must_use]
pub fn diff(old: &TrainingData, new: &TrainingData) -> Vec<FieldChange> {
    TRACKED_FIELDS
        .into_iter()
        .filter_map(|field| {
            let (before, after) = (field_value(old, field), field_value(new, field));
            (before != after).then_some(FieldChange {
                field,
                old: before,
                new: after,
            })
        })
        .collect()
}

/// `target` with every tracked field taken from `source`.
#[must_use]
pub fn restore_tracked_fields(target: &TrainingData, source: &TrainingData) -> TrainingData {
    let mut restored = target.clone();
    for field in TRACKED_FIELDS {
        copy_field(&mut restored, source, field);
    }
    restored
}

/// Structural checks on a record. Returns every violation found.
///
/// # Errors
///
/// Returns the list of violations when the record is not sound.
pub fn validate_integrity(record: &TrainingData) -> Result<(), Vec<String>> {
    let mut issues = Vec::new();
    if !record.confidence.is_finite() || !(0.0..=1.0).contains(&record.confidence) {
        issues.push(format!("confidence {} outside [0, 1]", record.confidence));
    }
    if record.positive_count < 0 || record.negative_count < 0 || record.seen_count < 0 {
        issues.push("negative feedback count".to_string());
    }
    if record.seen_count < record.positive_count.saturating_add(record.negative_count) {
        issues.push(format!(
            "seen_count {} below positive + negative ({} + {})",
            record.seen_count, record.positive_count, record.negative_count
        ));
    }
    if record.version < 1 {
        issues.push(format!("version {} below 1", record.version));
    }
    if record.tenant_id.trim().is_empty() {
        issues.push("empty tenant_id".to_string());
    }
    if record.signal_id.trim().is_empty() {
        issues.push("empty signal_id".to_string());
    }
    if record.pattern.trim().is_empty() {
        issues.push("empty pattern".to_string());
    }
    match record.pattern_type {
        PatternType::Regex => {
            if let Err(e) = Regex::new(&record.pattern) {
                issues.push(format!("pattern does not compile: {e}"));
            }
        }
        PatternType::Embedding => match record.embedding.as_deref() {
            None | Some([]) => issues.push("embedding pattern without embedding".to_string()),
            Some(vector) if vector.iter().any(|v| !v.is_finite()) => {
                issues.push("embedding contains non-finite values".to_string());
            }
            Some(_) => {}
        },
        PatternType::Keyword => {}
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn snapshot(record: &TrainingData) -> Option<Value> {
    serde_json::to_value(record).ok()
}

fn parse_snapshot(value: Option<&Value>) -> Option<TrainingData> {
    value.and_then(|v| serde_json::from_value(v.clone()).ok())
}

struct Change<'a> {
    change_type: ChangeType,
    user_id: Option<&'a str>,
    reason: Option<&'a str>,
}

#[derive(Clone)]
pub struct VersionControl {
    store: Arc<dyn TrainingStore>,
}

impl VersionControl {
    #[must_use]
    pub fn new(store: Arc<dyn TrainingStore>) -> Self {
        Self { store }
    }

    async fn require(&self, id: Uuid) -> Result<TrainingData, LearningError> {
        self.store
            .get_training(id)
            .await?
            .ok_or_else(|| LearningError::not_found("training data", id))
    }

    /// Persist a brand-new record at version 1 with its `created` entry.
    ///
    /// # Errors
    ///
    /// Returns [`LearningError::Storage`] if the insert fails.
    pub async fn create(
        &self,
        mut record: TrainingData,
        user_id: Option<&str>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TrainingData, LearningError> {
        record.version = 1;
        record.created_at = now;
        record.last_updated_at = now;
        let history = TrainingHistory {
            id: Uuid::new_v4(),
            training_data_id: record.id,
            tenant_id: record.tenant_id.clone(),
            user_id: user_id.map(str::to_string),
            change_type: ChangeType::Created,
            previous_value: None,
            new_value: snapshot(&record),
            version: record.version,
            reason: reason.map(str::to_string),
            changed_at: now,
        };
        self.store.insert_training(&record, &history).await?;
        tracing::info!(
            training_data_id = %record.id,
            signal_id = %record.signal_id,
            "training data created"
        );
        Ok(record)
    }

    /// Write `next` as the version after `current`, appending history.
    ///
    /// `next.version` and `next.last_updated_at` are overwritten.
    ///
    /// # Errors
    ///
    /// A [`distillery_db::DbError::VersionConflict`] (wrapped in
    /// [`LearningError::Storage`]) when `current` is no longer the stored version.
    pub async fn write_version(
        &self,
        current: &TrainingData,
        next: TrainingData,
        change_type: ChangeType,
        user_id: Option<&str>,
        reason: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TrainingData, LearningError> {
        let change = Change {
            change_type,
            user_id,
            reason,
        };
        self.write_as(current, next, current.version + 1, change, now)
            .await
    }

    async fn write_as(
        &self,
        current: &TrainingData,
        mut next: TrainingData,
        version: i64,
        change: Change<'_>,
        now: DateTime<Utc>,
    ) -> Result<TrainingData, LearningError> {
        let Change {
            change_type,
            user_id,
            reason,
        } = change;
        next.version = version;
        next.last_updated_at = now;

        let entry = TrainingHistory {
            id: Uuid::new_v4(),
            training_data_id: current.id,
            tenant_id: current.tenant_id.clone(),
            user_id: user_id.map(str::to_string),
            change_type,
            previous_value: snapshot(current),
            new_value: snapshot(&next),
            version: next.version,
            reason: reason.map(str::to_string),
            changed_at: now,
        };
        self.store
            .update_training(current.version, &next, &entry)
            .await?;
        tracing::debug!(
            training_data_id = %next.id,
            version = next.version,
            change_type = %change_type,
            "training data version written"
        );
        Ok(next)
    }

    /// Version log, oldest first.
    ///
    /// # Errors
    ///
    /// [`LearningError::NotFound`] when neither record nor history exists.
    pub async fn history(&self, id: Uuid) -> Result<Vec<TrainingHistory>, LearningError> {
        let history = self.store.list_history(id).await?;
        if history.is_empty() && self.store.get_training(id).await?.is_none() {
            return Err(LearningError::not_found("training data", id));
        }
        Ok(history)
    }

    async fn snapshot_at(&self, id: Uuid, version: i64) -> Result<TrainingData, LearningError> {
        let history = self.store.list_history(id).await?;
        let entry = history
            .iter()
            .find(|h| h.version == version)
            .ok_or_else(|| LearningError::not_found("training history", format!("{id}@{version}")))?;
        parse_snapshot(entry.new_value.as_ref()).ok_or_else(|| LearningError::Integrity {
            id,
            reason: format!("history snapshot for version {version} is unreadable"),
        })
    }

    /// # Errors
    ///
    /// [`LearningError::NotFound`] for an unknown record.
    pub async fn create_branch(
        &self,
        training_data_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Branch, LearningError> {
        let current = self.load_verified(training_data_id, now).await?;
        let branch = Branch {
            branch_id: Uuid::new_v4(),
            training_data_id,
            tenant_id: current.tenant_id.clone(),
            base_version: current.version,
            snapshot: current,
            active: true,
            created_at: now,
        };
        self.store.insert_branch(&branch).await?;
        tracing::info!(branch_id = %branch.branch_id, %training_data_id, base_version = branch.base_version, "branch created");
        Ok(branch)
    }

    /// # Errors
    ///
    /// [`LearningError::NotFound`] for an unknown branch and
    /// [`LearningError::Validation`] for a merged branch or a patch that
    /// leaves the snapshot unsound.
    pub async fn update_branch(
        &self,
        branch_id: Uuid,
        patch: BranchPatch,
    ) -> Result<Branch, LearningError> {
        let mut branch = self.require_open_branch(branch_id).await?;
        let snapshot = &mut branch.snapshot;
        if let Some(pattern) = patch.pattern {
            snapshot.pattern = pattern;
        }
        if let Some(pattern_type) = patch.pattern_type {
            snapshot.pattern_type = pattern_type;
        }
        if let Some(embedding) = patch.embedding {
            snapshot.embedding = Some(embedding);
        }
        if let Some(confidence) = patch.confidence {
            snapshot.confidence = confidence;
        }
        if let Some(active) = patch.active {
            snapshot.active = active;
        }
        validate_integrity(snapshot)
            .map_err(|issues| LearningError::Validation(issues.join("; ")))?;
        self.store.update_branch(&branch).await?;
        Ok(branch)
    }

    async fn require_open_branch(&self, branch_id: Uuid) -> Result<Branch, LearningError> {
        let branch = self
            .store
            .get_branch(branch_id)
            .await?
            .ok_or_else(|| LearningError::not_found("branch", branch_id))?;
        if !branch.active {
            return Err(LearningError::Validation(format!(
                "branch {branch_id} is already merged"
            )));
        }
        Ok(branch)
    }

    /// Reapply the branch's changes (base version to snapshot) onto the
    /// current main-line record.
    ///
    /// # Errors
    ///
    /// [`LearningError::NotFound`] / [`LearningError::Validation`] as for
    /// [`update_branch`](Self::update_branch); storage errors including a
    /// version conflict with a concurrent writer.
    pub async fn merge_branch(
        &self,
        branch_id: Uuid,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<MergeOutcome, LearningError> {
        let mut branch = self.require_open_branch(branch_id).await?;
        let current = self.load_verified(branch.training_data_id, now).await?;
        let base = self
            .snapshot_at(branch.training_data_id, branch.base_version)
            .await?;

        let branch_changes = diff(&base, &branch.snapshot);
        let conflicts: Vec<MergeConflict> = branch_changes
            .iter()
            .filter_map(|change| {
                let main = field_value(&current, change.field);
                (main != change.old && main != change.new).then(|| MergeConflict {
                    field: change.field,
                    base: change.old.clone(),
                    main,
                    branch: change.new.clone(),
                })
            })
            .collect();
        if !conflicts.is_empty() {
            tracing::warn!(
                %branch_id,
                conflicts = conflicts.len(),
                "merge refused: main line changed the same fields"
            );
            return Ok(MergeOutcome::Conflicted { conflicts });
        }

        let mut merged = current.clone();
        for change in &branch_changes {
            copy_field(&mut merged, &branch.snapshot, change.field);
        }
        let applied = diff(&current, &merged);
        let reason = format!("merge branch {branch_id}");
        let record = self
            .write_version(&current, merged, ChangeType::Updated, user_id, Some(reason.as_str()), now)
            .await?;

        branch.active = false;
        self.store.update_branch(&branch).await?;
        tracing::info!(%branch_id, version = record.version, fields = applied.len(), "branch merged");
        Ok(MergeOutcome::Merged { record, applied })
    }

    /// Restore the tracked fields of `target_version` as a new version.
    ///
    /// # Errors
    ///
    /// [`LearningError::Validation`] for a version outside `1..=current`,
    /// [`LearningError::NotFound`] when that version has no history entry.
    pub async fn rollback(
        &self,
        id: Uuid,
        target_version: i64,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TrainingData, LearningError> {
        let current = self.require(id).await?;
        if target_version < 1 || target_version > current.version {
            return Err(LearningError::Validation(format!(
                "cannot roll back to version {target_version}; current version is {}",
                current.version
            )));
        }
        let target = self.snapshot_at(id, target_version).await?;
        let restored = restore_tracked_fields(&current, &target);
        let reason = format!("rollback to version {target_version}");
        let record = self
            .write_version(&current, restored, ChangeType::Updated, user_id, Some(reason.as_str()), now)
            .await?;
        tracing::info!(training_data_id = %id, target_version, version = record.version, "rolled back");
        Ok(record)
    }

    /// Write the newest history snapshot that passes validation as a new version.
    ///
    /// # Errors
    ///
    /// [`LearningError::Integrity`] when no snapshot in the log is sound.
    pub async fn recover_from_history(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TrainingData, LearningError> {
        let current = self.require(id).await?;
        let history = self.store.list_history(id).await?;
        let Some((source_version, candidate)) = history.iter().rev().find_map(|entry| {
            let snapshot = parse_snapshot(entry.new_value.as_ref())?;
            validate_integrity(&snapshot)
                .is_ok()
                .then_some((entry.version, snapshot))
        }) else {
            return Err(LearningError::Integrity {
                id,
                reason: "no valid snapshot in history".to_string(),
            });
        };

        // A corrupt record may carry a bogus version; stay ahead of the log.
        let latest = history.iter().map(|h| h.version).max().unwrap_or(0);
        let reason = format!("recovered from version {source_version}");
        let change = Change {
            change_type: ChangeType::Updated,
            user_id: None,
            reason: Some(reason.as_str()),
        };
        let restored = restore_tracked_fields(&current, &candidate);
        let record = self
            .write_as(&current, restored, current.version.max(latest) + 1, change, now)
            .await?;
        tracing::warn!(training_data_id = %id, source_version, version = record.version, "training data recovered from history");
        Ok(record)
    }

    /// Read a record and validate it, recovering from history on failure.
    ///
    /// # Errors
    ///
    /// [`LearningError::NotFound`] for an unknown id and
    /// [`LearningError::Integrity`] when the record is unsound and recovery fails.
    pub async fn load_verified(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<TrainingData, LearningError> {
        let record = self.require(id).await?;
        match validate_integrity(&record) {
            Ok(()) => Ok(record),
            Err(issues) => {
                tracing::warn!(training_data_id = %id, issues = ?issues, "training data failed integrity checks; recovering");
                self.recover_from_history(id, now)
                    .await
                    .map_err(|err| match err {
                        LearningError::Integrity { .. } => LearningError::Integrity {
                            id,
                            reason: issues.join("; "),
                        },
                        other => other,
                    })
            }
        }
    }

    /// Markdown changelog of a record, newest version first.
    ///
    /// # Errors
    ///
    /// [`LearningError::NotFound`] for an unknown record.
    pub async fn generate_changelog(&self, id: Uuid) -> Result<String, LearningError> {
        let current = self.require(id).await?;
        let history = self.store.list_history(id).await?;
        Ok(render_changelog(&current, &history))
    }
}

fn render_changelog(current: &TrainingData, history: &[TrainingHistory]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Changelog: {} / `{}`\n", current.signal_id, current.pattern);
    let _ = writeln!(
        out,
        "Training data `{}` (tenant `{}`), current version {}, confidence {:.3}.",
        current.id, current.tenant_id, current.version, current.confidence
    );

    for entry in history.iter().rev() {
        let _ = writeln!(
            out,
            "\n## Version {} ({})\n",
            entry.version,
            entry.changed_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        let _ = writeln!(out, "- Change: {}", entry.change_type);
        if let Some(user) = &entry.user_id {
            let _ = writeln!(out, "- By: {user}");
        }
        if let Some(reason) = &entry.reason {
            let _ = writeln!(out, "- Reason: {reason}");
        }
        let before = parse_snapshot(entry.previous_value.as_ref());
        let after = parse_snapshot(entry.new_value.as_ref());
        match (before, after) {
            (Some(before), Some(after)) => {
                for change in diff(&before, &after) {
                    let _ = writeln!(
                        out,
                        "- `{}`: {} -> {}",
                        change.field,
                        display_value(&change.old),
                        display_value(&change.new)
                    );
                }
            }
            (None, Some(_)) => {
                let _ = writeln!(out, "- Initial version");
            }
            _ => {
                let _ = writeln!(out, "- Snapshot unavailable");
            }
        }
    }
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Array(items) => format!("[{} values]", items.len()),
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "version_control_test.rs"]
mod tests;
