use std::time::Duration;

use chrono::{TimeZone, Utc};
use distillery_core::{FeedbackType, NewFeedback, PatternType, TrainingData};
use distillery_db::MemoryStore;
use distillery_learning::{
    ConfidenceScorer, FeedbackRateLimiter, MatcherConfig, PatternMatcher, TrainingConfig,
    TrainingManager,
};

use super::*;

#[test]
fn parses_migrate_command() {
    let cli =
        Cli::try_parse_from(["distillery-cli", "migrate"]).expect("expected valid cli args");
    assert!(matches!(cli.command, Some(Commands::Migrate)));
}

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["distillery-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_rollback_with_user() {
    let id = Uuid::new_v4();
    let id_arg = id.to_string();
    let cli = Cli::try_parse_from(["distillery-cli", "rollback", &id_arg, "3", "--user", "ops"])
        .expect("expected valid cli args");
    match cli.command {
        Some(Commands::Rollback {
            id: parsed,
            version,
            user,
        }) => {
            assert_eq!(parsed, id);
            assert_eq!(version, 3);
            assert_eq!(user.as_deref(), Some("ops"));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn rejects_malformed_training_id() {
    let result = Cli::try_parse_from(["distillery-cli", "changelog", "not-a-uuid"]);
    assert!(result.is_err());
}

#[test]
fn parses_validate_industries_path() {
    let cli = Cli::try_parse_from([
        "distillery-cli",
        "validate-industries",
        "config/industries.yaml",
    ])
    .expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::ValidateIndustries { ref path }) if path == Path::new("config/industries.yaml")
    ));
}

#[test]
fn parses_decay_without_tenant() {
    let cli = Cli::try_parse_from(["distillery-cli", "decay"]).expect("expected valid cli args");
    assert!(matches!(
        cli.command,
        Some(Commands::Decay { tenant: None })
    ));
}

#[test]
fn industry_table_lists_every_industry() {
    let registry = distillery_core::parse_industries(
        r"
industries:
  saas:
    signal_definitions:
      - id: hiring
        priority: high
        keywords: [hiring]
      - id: funding
        priority: critical
        patterns: ['series [a-d]']
    fluff_patterns:
      - pattern: cookie
        region: footer
  retail:
    signal_definitions:
      - id: expansion
        priority: medium
        keywords: [new store]
",
    )
    .unwrap();

    let table = industry_table(&registry).unwrap();
    let lines: Vec<&str> = table.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("INDUSTRY"));
    assert!(lines[1].starts_with("retail"));
    assert!(lines[2].starts_with("saas"));
    assert!(lines[2].contains('2'));
}

#[test]
fn empty_registry_is_an_error() {
    let err = industry_table(&IndustryRegistry::empty()).unwrap_err();
    assert!(err.to_string().contains("no industries"));
}

#[test]
fn shipped_industries_file_is_valid() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/industries.yaml");
    let table = validate_industries(&path).unwrap();
    assert!(table.contains("saas"));
    assert!(table.contains("retail"));
    assert!(table.contains("healthcare"));
}

#[test]
fn missing_industries_file_is_an_error() {
    assert!(validate_industries(Path::new("/nonexistent/industries.yaml")).is_err());
}

fn seed_record() -> TrainingData {
    let now = Utc::now();
    TrainingData {
        id: Uuid::new_v4(),
        tenant_id: "t1".to_string(),
        signal_id: "hiring".to_string(),
        pattern: "now hiring".to_string(),
        pattern_type: PatternType::Keyword,
        embedding: None,
        confidence: 0.5,
        positive_count: 0,
        negative_count: 0,
        seen_count: 0,
        version: 1,
        active: true,
        created_at: now,
        last_updated_at: now,
    }
}

fn manager(store: &Arc<MemoryStore>) -> TrainingManager {
    TrainingManager::new(
        store.clone(),
        store.clone(),
        TemporaryScrapeStore::new(store.clone(), 7),
        Arc::new(PatternMatcher::keyword_only(MatcherConfig::default())),
        Arc::new(FeedbackRateLimiter::new(100, Duration::from_secs(60))),
        ConfidenceScorer::default(),
        TrainingConfig::default(),
    )
}

#[tokio::test]
async fn rollback_and_changelog_report_versions() {
    let store = Arc::new(MemoryStore::new());
    let versions = VersionControl::new(store.clone());
    let created = versions
        .create(seed_record(), Some("ops"), Some("seed"), Utc::now())
        .await
        .unwrap();
    let mut next = created.clone();
    next.confidence = 0.9;
    versions
        .write_version(
            &created,
            next,
            distillery_core::ChangeType::Updated,
            Some("ops"),
            Some("manual"),
            Utc::now(),
        )
        .await
        .unwrap();

    let out = training::rollback(&versions, created.id, 1, Some("ops"), Utc::now())
        .await
        .unwrap();
    assert!(out.starts_with("restored version 1;"));
    assert!(out.contains("now at version 3"));
    assert!(out.contains("confidence 0.500"));

    let changelog = training::changelog(&versions, created.id).await.unwrap();
    assert!(changelog.starts_with("# Changelog: hiring"));
    assert!(changelog.contains("## Version 3"));
    assert!(changelog.contains("rollback to version 1"));
}

#[tokio::test]
async fn rollback_past_current_version_fails() {
    let store = Arc::new(MemoryStore::new());
    let versions = VersionControl::new(store.clone());
    let created = versions
        .create(seed_record(), None, None, Utc::now())
        .await
        .unwrap();

    let result = training::rollback(&versions, created.id, 5, None, Utc::now()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn analytics_renders_text_and_json() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);
    manager
        .submit_feedback(NewFeedback {
            tenant_id: "t1".to_string(),
            user_id: "u1".to_string(),
            feedback_type: FeedbackType::Correct,
            signal_id: "hiring".to_string(),
            source_scrape_id: Uuid::new_v4(),
            source_text: "We're hiring engineers".to_string(),
            corrected_value: None,
            user_confidence: None,
            submitted_at: None,
        })
        .await
        .unwrap();

    let text = training::analytics(&manager, "t1", false).await.unwrap();
    assert!(text.starts_with("tenant t1"));
    assert!(text.contains("patterns: 1 active, 0 inactive"));
    assert!(text.contains("unprocessed feedback: 0"));

    let json = training::analytics(&manager, "t1", true).await.unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["active_patterns"], 1);
    assert_eq!(value["feedback_by_type"]["correct"], 1);
}

#[tokio::test]
async fn decay_reports_stale_patterns() {
    let store = Arc::new(MemoryStore::new());
    let versions = VersionControl::new(store.clone());
    let old = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    versions
        .create(seed_record(), None, None, old)
        .await
        .unwrap();
    let manager = manager(&store);

    let out = training::decay(&manager, Some("t1"), old + chrono::Duration::days(30))
        .await
        .unwrap();
    assert_eq!(out, "examined 1 stale pattern(s): 1 decayed, 0 failed");
}

#[tokio::test]
async fn reprocess_with_nothing_pending() {
    let store = Arc::new(MemoryStore::new());
    let manager = manager(&store);
    let out = training::reprocess(&manager, "t1", Utc::now()).await.unwrap();
    assert_eq!(out, "reprocessed 0 feedback record(s), 0 failed");
}
