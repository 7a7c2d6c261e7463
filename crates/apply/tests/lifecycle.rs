use forma_apply::{Action, Lifecycle};
use forma_core::{parse_config, SynthesisError, ViolationKind};
use forma_persist::{SqliteStore, Store};
use forma_registry::Registry;

const REPL: &str = "k8s_couchbase_com_couchbase_replication_v2";

fn setup() -> (Registry, SqliteStore) {
    (Registry::builtin().unwrap(), SqliteStore::open_in_memory().unwrap())
}

#[test]
fn create_then_noop_then_update() {
    let (reg, store) = setup();
    let lc = Lifecycle::new(&reg, &store);
    let cfg = parse_config("metadata:\n  name: repl-1\nspec:\n  bucket: orders\n").unwrap();

    let first = lc.apply("couchbase/repl-1", REPL, &cfg, false).unwrap();
    assert_eq!(first.action, Action::Create);
    assert!(first.applied);
    assert!(first.prior.is_none());

    let again = lc.apply("couchbase/repl-1", REPL, &cfg, false).unwrap();
    assert_eq!(again.action, Action::NoOp);
    assert!(!again.applied);
    assert_eq!(again.version, first.version);
    assert_eq!(store.history("couchbase/repl-1", None).unwrap().len(), 1);

    let changed = parse_config("metadata:\n  name: repl-1\nspec:\n  bucket: archive\n  paused: true\n").unwrap();
    let plan = lc.plan("couchbase/repl-1", REPL, &changed).unwrap();
    assert_eq!(plan.action, Action::Update);
    assert_eq!((plan.summary.adds, plan.summary.updates, plan.summary.removes), (1, 1, 0));

    let upd = lc.apply("couchbase/repl-1", REPL, &changed, false).unwrap();
    assert_eq!(upd.action, Action::Update);
    assert_eq!(upd.prior, Some(first.version));
    assert!(upd.version > first.version);

    let latest = store.latest("couchbase/repl-1").unwrap().unwrap();
    assert_eq!(latest.state.version, upd.version);
    assert!(latest.state.manifest.contains("bucket: archive"));
    assert_eq!(latest.type_name, REPL);
}

#[test]
fn forced_apply_bumps_version_without_changes() {
    let (reg, store) = setup();
    let lc = Lifecycle::new(&reg, &store);
    let cfg = parse_config("metadata:\n  name: r\nspec:\n  bucket: b\n").unwrap();
    let a = lc.apply("r", REPL, &cfg, false).unwrap();
    let b = lc.apply("r", REPL, &cfg, true).unwrap();
    assert_eq!(b.action, Action::NoOp);
    assert!(b.applied);
    assert!(b.version > a.version);
    let hist = store.history("r", None).unwrap();
    assert_eq!(hist.len(), 2);
    assert_eq!(hist[0].state.manifest, hist[1].state.manifest);
}

#[test]
fn invalid_config_never_reaches_the_store() {
    let (reg, store) = setup();
    let lc = Lifecycle::new(&reg, &store);
    let cfg = parse_config("metadata:\n  name: r\nspec:\n  compression_type: Gzip\n").unwrap();
    let err = lc.apply("r", REPL, &cfg, false).unwrap_err();
    let synth = err.downcast_ref::<SynthesisError>().expect("validation error");
    let kinds: Vec<_> = synth.validation_errors().iter().map(|e| (e.path.to_string(), e.kind)).collect();
    assert_eq!(
        kinds,
        vec![
            ("spec.bucket".to_string(), ViolationKind::MissingRequired),
            ("spec.compression_type".to_string(), ViolationKind::EnumViolation),
        ]
    );
    assert!(store.addresses().unwrap().is_empty());
}

#[test]
fn address_keeps_its_resource_type() {
    let (reg, store) = setup();
    let lc = Lifecycle::new(&reg, &store);
    let cfg = parse_config("metadata:\n  name: r\nspec:\n  bucket: b\n").unwrap();
    lc.apply("shared", REPL, &cfg, false).unwrap();
    let other = reg.names().into_iter().find(|n| *n != REPL).unwrap().to_string();
    let err = lc.plan("shared", &other, &cfg).unwrap_err().to_string();
    assert!(err.contains("holds a"), "{}", err);
}

#[test]
fn delete_removes_all_history() {
    let (reg, store) = setup();
    let lc = Lifecycle::new(&reg, &store);
    let cfg = parse_config("metadata:\n  name: r\n").unwrap();
    lc.apply("gone", REPL, &cfg, false).unwrap();
    lc.apply("gone", REPL, &cfg, true).unwrap();
    assert!(lc.delete("gone").unwrap());
    assert!(!lc.delete("gone").unwrap());
    assert!(store.latest("gone").unwrap().is_none());
    // the next apply starts over as a create
    assert_eq!(lc.apply("gone", REPL, &cfg, false).unwrap().action, Action::Create);
}

#[test]
fn unknown_type_is_reported() {
    let (reg, store) = setup();
    let lc = Lifecycle::new(&reg, &store);
    let cfg = parse_config("metadata:\n  name: r\n").unwrap();
    assert!(lc.plan("x", "k8s_nope_v1", &cfg).is_err());
}
