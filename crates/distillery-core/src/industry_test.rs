use super::*;

const SAAS_YAML: &str = r#"
industries:
  SaaS:
    signal_definitions:
      - id: hiring
        name: Hiring activity
        priority: high
        keywords: ["we're hiring", "open positions"]
        patterns: ["join (our|the) team"]
        source_types: [careers, homepage]
      - id: funding
        priority: critical
        keywords: ["series a", "series b", "raised"]
    fluff_patterns:
      - pattern: "accept cookies"
        region: footer
      - pattern: "^\\s*©"
        regex: true
    scoring_rules:
      - name: growth
        signals: [hiring, funding]
        points: 40
      - signals: [funding]
        points: 30
    max_lead_score: 120
    custom_fields:
      crm_owner: "sales-west"
"#;

#[test]
fn parses_and_normalizes_industry_keys() {
    let registry = parse_industries(SAAS_YAML).expect("valid yaml");
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.keys(), vec!["saas"]);

    let cfg = registry.get("SAAS").expect("lookup is case-insensitive");
    assert_eq!(cfg.signal_definitions.len(), 2);
    assert_eq!(cfg.signal_definitions[0].priority, SignalPriority::High);
    assert_eq!(cfg.fluff_patterns[0].region, Region::Footer);
    assert_eq!(cfg.fluff_patterns[1].region, Region::All);
    assert!(cfg.fluff_patterns[1].regex);
    assert_eq!(cfg.max_lead_score, 120);
    assert_eq!(cfg.custom_fields["crm_owner"], "sales-west");
}

#[test]
fn max_lead_score_defaults_to_150() {
    let yaml = r"
industries:
  retail:
    signal_definitions:
      - id: expansion
        priority: medium
        keywords: [new store]
";
    let registry = parse_industries(yaml).unwrap();
    assert_eq!(registry.get("retail").unwrap().max_lead_score, 150);
}

#[test]
fn rejects_duplicate_signal_ids() {
    let yaml = r"
industries:
  retail:
    signal_definitions:
      - id: expansion
        priority: medium
        keywords: [new store]
      - id: expansion
        priority: low
        keywords: [grand opening]
";
    let err = parse_industries(yaml).unwrap_err();
    assert!(err.to_string().contains("duplicate signal id 'expansion'"));
}

#[test]
fn rejects_signal_without_matchers() {
    let yaml = r"
industries:
  retail:
    signal_definitions:
      - id: expansion
        priority: medium
";
    let err = parse_industries(yaml).unwrap_err();
    assert!(err.to_string().contains("at least one keyword or pattern"));
}

#[test]
fn rejects_invalid_regex() {
    let yaml = r#"
industries:
  retail:
    signal_definitions:
      - id: expansion
        priority: medium
        patterns: ["(unclosed"]
"#;
    let err = parse_industries(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(err.to_string().contains("invalid regex"));
}

#[test]
fn rejects_scoring_rule_with_unknown_signal() {
    let yaml = r"
industries:
  retail:
    signal_definitions:
      - id: expansion
        priority: medium
        keywords: [new store]
    scoring_rules:
      - signals: [funding]
        points: 10
";
    let err = parse_industries(yaml).unwrap_err();
    assert!(err.to_string().contains("unknown signal 'funding'"));
}

#[test]
fn rejects_non_positive_max_score() {
    let yaml = r"
industries:
  retail:
    max_lead_score: 0
";
    let err = parse_industries(yaml).unwrap_err();
    assert!(err.to_string().contains("max_lead_score must be positive"));
}

#[test]
fn rejects_unknown_region() {
    let yaml = r"
industries:
  retail:
    fluff_patterns:
      - pattern: cookies
        region: navbar
";
    let err = parse_industries(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::IndustriesFileParse(_)));
}

#[test]
fn load_industries_reports_missing_file() {
    let err = load_industries(Path::new("/definitely/not/here.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::IndustriesFileIo { .. }));
}

#[test]
fn empty_registry_misses_every_key() {
    let registry = IndustryRegistry::empty();
    assert!(registry.is_empty());
    assert!(registry.get("saas").is_none());
}
