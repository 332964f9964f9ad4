//! Policy loading, saving, and auto-save through the file and memory
//! adapters, and construction from configuration.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use palisade::{
    Adapter, AdapterError, Enforcer, Error, FileAdapter, MemoryAdapter, Model, PalisadeConfig,
    Rule,
};
use tempfile::TempDir;

const MODEL: &str = "[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
";

const POLICY: &str = "# operators may write device control
p, role:operator, device_control, w
p, role:viewer, device_control, r

g, testuser-0, role:operator
g, testuser-1, role:viewer
";

fn model() -> Model {
    MODEL.parse().expect("model should parse")
}

fn write_policy(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("policy.csv");
    fs::write(&path, contents).expect("policy file should be written");
    path
}

// ============================================================================
// File adapter
// ============================================================================

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_policy(dir.path(), POLICY);

    let e = Enforcer::with_adapter(model(), FileAdapter::new(&path)).unwrap();
    assert!(e.enforce(&["testuser-0", "device_control", "w"]).unwrap());
    assert!(!e.enforce(&["testuser-0", "device_control", "r"]).unwrap());
    assert!(e.enforce(&["testuser-1", "device_control", "r"]).unwrap());
    assert_eq!(e.get_policy().unwrap().len(), 2);
    assert_eq!(e.get_grouping_policy().unwrap().len(), 2);
}

#[test]
fn test_save_then_reload_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("policy.csv");

    // Nothing to load yet.
    assert!(matches!(
        Enforcer::with_adapter(model(), FileAdapter::new(&path)),
        Err(Error::Adapter(AdapterError::Io { .. }))
    ));

    fs::write(&path, "").unwrap();
    let e = Enforcer::builder(model())
        .adapter(FileAdapter::new(&path))
        .auto_save(false)
        .without_audit()
        .build()
        .unwrap();
    e.add_policy(&["role:ops", "reports, quarterly", "read"])
        .unwrap();
    e.add_grouping_policy(&["alice", "role:ops"]).unwrap();
    e.save_policy().unwrap();

    let reloaded = Enforcer::with_adapter(model(), FileAdapter::new(&path)).unwrap();
    assert!(
        reloaded
            .enforce(&["alice", "reports, quarterly", "read"])
            .unwrap()
    );
}

#[test]
fn test_auto_save_writes_through_to_file() {
    let dir = TempDir::new().unwrap();
    let path = write_policy(dir.path(), POLICY);

    let e = Enforcer::with_adapter(model(), FileAdapter::new(&path)).unwrap();
    e.add_policy(&["role:viewer", "audit_log", "r"]).unwrap();
    e.remove_grouping_policy(&["testuser-1", "role:viewer"])
        .unwrap();

    let rules = FileAdapter::new(&path).load_policy().unwrap();
    assert!(rules.contains(&rule("p", &["role:viewer", "audit_log", "r"])));
    assert!(!rules.contains(&rule("g", &["testuser-1", "role:viewer"])));

    let reloaded = Enforcer::with_adapter(model(), FileAdapter::new(&path)).unwrap();
    assert_eq!(
        reloaded.get_policy().unwrap(),
        e.get_policy().unwrap()
    );
    assert_eq!(
        reloaded.get_grouping_policy().unwrap(),
        e.get_grouping_policy().unwrap()
    );
}

#[test]
fn test_save_policy_rewrites_file() {
    let dir = TempDir::new().unwrap();
    let path = write_policy(dir.path(), POLICY);

    let e = Enforcer::builder(model())
        .adapter(FileAdapter::new(&path))
        .auto_save(false)
        .without_audit()
        .build()
        .unwrap();
    e.remove_filtered_policy(0, &["role:viewer"]).unwrap();

    // Auto-save is off, so the file still has the viewer rule.
    assert_eq!(FileAdapter::new(&path).load_policy().unwrap().len(), 4);

    e.save_policy().unwrap();
    let contents = fs::read_to_string(&path).unwrap();
    assert!(!contents.contains("role:viewer, device_control"));
    assert_eq!(FileAdapter::new(&path).load_policy().unwrap().len(), 3);
}

#[test]
fn test_load_policy_replaces_state() {
    let dir = TempDir::new().unwrap();
    let path = write_policy(dir.path(), POLICY);

    let e = Enforcer::builder(model())
        .adapter(FileAdapter::new(&path))
        .auto_save(false)
        .without_audit()
        .build()
        .unwrap();
    e.add_policy(&["mallory", "device_control", "w"]).unwrap();
    assert!(e.enforce(&["mallory", "device_control", "w"]).unwrap());

    e.load_policy().unwrap();
    assert!(!e.enforce(&["mallory", "device_control", "w"]).unwrap());
    assert!(e.enforce(&["testuser-0", "device_control", "w"]).unwrap());
}

#[test]
fn test_malformed_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_policy(dir.path(), "p, alice, data1, read\np, \"unterminated\n");

    let result = Enforcer::with_adapter(model(), FileAdapter::new(&path));
    assert!(matches!(
        result,
        Err(Error::Adapter(AdapterError::Format { line: 2, .. }))
    ));
}

#[test]
fn test_rule_with_wrong_arity_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_policy(dir.path(), "p, alice, data1\n");

    assert!(matches!(
        Enforcer::with_adapter(model(), FileAdapter::new(&path)),
        Err(Error::Policy(_))
    ));
}

// ============================================================================
// Adapter failures
// ============================================================================

/// Loads normally but refuses every incremental write.
struct ReadOnlyAdapter(MemoryAdapter);

impl Adapter for ReadOnlyAdapter {
    fn load_policy(&self) -> Result<Vec<Rule>, AdapterError> {
        self.0.load_policy()
    }

    fn save_policy(&self, rules: &[Rule]) -> Result<(), AdapterError> {
        self.0.save_policy(rules)
    }

    fn add_policy(&self, _ptype: &str, _values: &[String]) -> Result<(), AdapterError> {
        Err(AdapterError::Other("read-only".to_string()))
    }

    fn remove_policy(&self, _ptype: &str, _values: &[String]) -> Result<(), AdapterError> {
        Err(AdapterError::Other("read-only".to_string()))
    }
}

#[test]
fn test_adapter_failure_keeps_memory_state() {
    let e = Enforcer::builder(model())
        .adapter(ReadOnlyAdapter(MemoryAdapter::new()))
        .without_audit()
        .build()
        .unwrap();

    let result = e.add_policy(&["alice", "data1", "read"]);
    assert!(matches!(result, Err(Error::Adapter(AdapterError::Other(_)))));

    // The in-memory mutation stands.
    assert!(e.has_policy(&["alice", "data1", "read"]).unwrap());
    assert!(e.enforce(&["alice", "data1", "read"]).unwrap());

    // A no-op add never reaches the adapter.
    assert!(!e.add_policy(&["alice", "data1", "read"]).unwrap());
}

#[test]
fn test_memory_adapter_round_trip() {
    let adapter: Arc<MemoryAdapter> = Arc::new(MemoryAdapter::with_rules([
        rule("p", &["role:ops", "doc1", "read"]),
        rule("g", &["alice", "role:ops"]),
    ]));
    let e = Enforcer::builder(model())
        .shared_adapter(adapter.clone())
        .auto_save(false)
        .without_audit()
        .build()
        .unwrap();
    assert!(e.enforce(&["alice", "doc1", "read"]).unwrap());

    e.add_grouping_policy(&["bob", "role:ops"]).unwrap();
    e.save_policy().unwrap();
    assert_eq!(
        adapter.rules().unwrap(),
        vec![
            rule("g", &["alice", "role:ops"]),
            rule("g", &["bob", "role:ops"]),
            rule("p", &["role:ops", "doc1", "read"]),
        ]
    );
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_from_config() {
    let dir = TempDir::new().unwrap();
    let model_path = dir.path().join("model.conf");
    fs::write(&model_path, MODEL).unwrap();
    let policy_path = write_policy(dir.path(), POLICY);

    let mut config = PalisadeConfig::default();
    config.model.path = model_path;
    config.policy.path = Some(policy_path);
    config.enforcer.audit = false;
    config.enforcer.cache_enabled = false;

    let e = Enforcer::from_config(&config).unwrap();
    assert!(e.enforce(&["testuser-0", "device_control", "w"]).unwrap());
    assert_eq!(e.cached_decisions().unwrap(), 0);
}

#[test]
fn test_from_project_directory() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("model.conf"), MODEL).unwrap();
    write_policy(dir.path(), POLICY);
    fs::write(
        dir.path().join("palisade.toml"),
        "[policy]\npath = \"policy.csv\"\n\n[enforcer]\naudit = false\n",
    )
    .unwrap();

    let config = PalisadeConfig::load_from_dir(dir.path()).unwrap();
    let e = Enforcer::from_config(&config).unwrap();
    assert!(e.enforce(&["testuser-1", "device_control", "r"]).unwrap());
}

#[test]
fn test_from_config_rejects_invalid_settings() {
    let mut config = PalisadeConfig::default();
    config.enforcer.cache_capacity = 0;
    assert!(matches!(
        Enforcer::from_config(&config),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_from_config_reports_missing_model() {
    let dir = TempDir::new().unwrap();
    let mut config = PalisadeConfig::default();
    config.model.path = dir.path().join("absent.conf");
    assert!(matches!(
        Enforcer::from_config(&config),
        Err(Error::Model(_))
    ));
}

fn rule(ptype: &str, values: &[&str]) -> Rule {
    (
        ptype.to_string(),
        values.iter().map(ToString::to_string).collect(),
    )
}
