//! Wire-shape tests for the types dashboards consume.

use chrono::Utc;
use pretty_assertions::assert_eq;
use vigil_core::{
    BuildTrigger, CacheDefinition, CacheEntry, EntityType, ExpirationPolicy, PolicyUpdate,
    UpdatePolicy,
};

#[test]
fn test_entry_uses_camel_case_fields() {
    let def = CacheDefinition::new("dt-activity-2025", EntityType::HeatMapCache)
        .with_policies(UpdatePolicy::OnceADay, ExpirationPolicy::Never)
        .with_target_year(2025);
    let mut entry = CacheEntry::new(&def, Utc::now());
    entry.last_build_trigger = Some(BuildTrigger::Manual {
        requested_by: "ops@example.com".to_string(),
    });

    let json = serde_json::to_value(&entry).expect("serialize");

    assert_eq!(json["entityType"], "heat_map_cache");
    assert_eq!(json["updatePolicy"], "once_a_day");
    assert_eq!(json["expirationPolicy"], "never");
    assert_eq!(json["errorCount24h"], 0);
    assert_eq!(json["consecutiveFailures"], 0);
    assert_eq!(json["lastBuildTrigger"]["kind"], "manual");
    assert_eq!(json["lastBuildTrigger"]["requestedBy"], "ops@example.com");

    let parsed: CacheEntry = serde_json::from_value(json).expect("deserialize");
    assert_eq!(parsed, entry);
}

#[test]
fn test_definition_defaults_from_yaml_like_json() {
    let def: CacheDefinition =
        serde_json::from_str(r#"{"name": "page-home", "entityType": "page_cache"}"#)
            .expect("deserialize");
    assert_eq!(def.update_policy, UpdatePolicy::AllAppRestarts);
    assert_eq!(def.expiration_policy, ExpirationPolicy::TtlMinutes(15));
    assert!(def.auto_refresh);
    assert_eq!(def.target_year, None);
}

#[test]
fn test_policy_update_applies_only_present_fields() {
    let def = CacheDefinition::new("api-totals", EntityType::ApiCache);
    let mut entry = CacheEntry::new(&def, Utc::now());

    let update: PolicyUpdate =
        serde_json::from_str(r#"{"expirationPolicy": 60, "autoRefresh": false}"#).expect("parse");
    update.apply(&mut entry);

    assert_eq!(entry.update_policy, UpdatePolicy::AllAppRestarts);
    assert_eq!(entry.expiration_policy, ExpirationPolicy::TtlMinutes(60));
    assert!(!entry.auto_refresh);
    assert!(PolicyUpdate::default().is_empty());
}
