use serde_json::json;
use std::sync::Arc;
use tempfile::tempdir;

use lt_engine::{builtin_catalog, Context, ContextOptions, FactoryCatalog, Injector, Placeholder, Slot, DRY_RUN_EXPERIMENT};
use lt_types::{InjectionError, LtError};

struct A;

struct B {
    _a: Arc<A>,
}

struct C {
    _b: Arc<B>,
}

#[derive(Debug)]
struct Optimizer {
    lr: f64,
}

fn chain_catalog() -> Arc<FactoryCatalog> {
    let mut catalog = FactoryCatalog::new();
    catalog
        .register("chain.A", |_: &mut Injector<'_>| Ok(A))
        .register("chain.B", |inj: &mut Injector<'_>| Ok(B { _a: inj.reference("a")? }))
        .register("chain.C", |inj: &mut Injector<'_>| Ok(C { _b: inj.reference("b")? }))
        .register("chain.Broken", |inj: &mut Injector<'_>| {
            inj.reference::<A>("ghost")?;
            Ok(())
        })
        .register("optim.Sgd", |inj: &mut Injector<'_>| {
            Ok(Optimizer {
                lr: inj.value("optimizer.lr")?,
            })
        });
    Arc::new(catalog)
}

#[test]
fn test_chain_declared_in_reverse_builds_within_three_rounds() {
    let options = ContextOptions::from_json(json!({
        "c": "type::chain.C",
        "b": "type::chain.B",
        "a": "type::chain.A"
    }))
    .with_auto_instantiate(false);
    let mut context = Context::create(options, chain_catalog()).unwrap();
    assert_eq!(context.registry().pending_types(), vec!["c", "b", "a"]);

    let report = context.instantiate_types().unwrap();
    assert_eq!(report.built, 3);
    assert!(report.rounds <= 3);
    assert!(context.registry().pending_types().is_empty());
    assert!(context.instance::<C>("c").is_ok());
}

#[test]
fn test_unresolvable_dependency_exhausts_the_budget() {
    let options = ContextOptions::from_json(json!({
        "broken": "type::chain.Broken",
        "a": "type::chain.A"
    }));
    let err = Context::create(options, chain_catalog()).unwrap_err();
    match err {
        LtError::TypeInstantiation { rounds, failures } => {
            assert_eq!(rounds, 2);
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].name, "broken");
            assert!(failures[0].message.contains("ghost"));
        }
        other => panic!("expected TypeInstantiation, got {other}"),
    }
}

#[test]
fn test_directives_across_files_build_instances() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("base.json"), r#"{"epochs": 3, "seed": 7}"#).unwrap();
    std::fs::write(
        dir.path().join("optimizer.json"),
        r#"{"lr": 0.05, "type": "type::optim.Sgd"}"#,
    )
    .unwrap();
    let main = dir.path().join("experiment.json");
    std::fs::write(
        &main,
        r#"{"import": "import::base.json", "optimizer": "config::optimizer.json", "seed": 11}"#,
    )
    .unwrap();

    let options = ContextOptions::from_file(&main).with_args(vec!["--optimizer.lr".into(), "0.2".into()]);
    let mut context = Context::create(options, chain_catalog()).unwrap();

    assert_eq!(context.config().get::<i64>("epochs"), Some(3));
    assert_eq!(context.config().get::<i64>("seed"), Some(11));
    let optimizer = context.instance::<Optimizer>("type").unwrap();
    assert_eq!(optimizer.lr, 0.2);
}

#[test]
fn test_disabled_context_changes_keep_config_untouched() {
    let dir = tempdir().unwrap();
    let extra = dir.path().join("extra.json");
    std::fs::write(&extra, r#"{"writer": "type::lighter.collaborators.Placeholder"}"#).unwrap();

    let options = ContextOptions::from_json(json!({"epochs": 1})).with_context_changes(false);
    let mut context = Context::create(options, Arc::new(builtin_catalog())).unwrap();
    let before = context.config().clone();

    let loaded = context.injector().config_file(&extra, Some("extra")).unwrap();
    assert!(loaded.has_value("writer"));
    assert_eq!(context.config(), &before);
    assert!(!context.registry().contains_type("writer"));
}

#[test]
fn test_dry_run_sees_placeholder_slots() {
    let mut config = serde_json::Map::new();
    for slot in Slot::EXPERIMENT {
        config.insert(slot.name().to_string(), json!("type::lighter.collaborators.Placeholder"));
    }
    let options = ContextOptions::from_json(config.into()).with_device("cuda:0".parse().unwrap());
    let mut context = Context::create(options, Arc::new(builtin_catalog())).unwrap();

    let placeholder = context.instance::<Placeholder>("model").unwrap();
    assert!(placeholder.device.is_cuda());
    assert!(context.injector().collaborators().is_ok());

    let mut experiment = context.construct_experiment(DRY_RUN_EXPERIMENT).unwrap();
    experiment.run().unwrap();
}

#[test]
fn test_unknown_experiment_is_an_injection_error() {
    let mut context = Context::create(ContextOptions::default(), Arc::new(builtin_catalog())).unwrap();
    let err = context.construct_experiment("lighter.experiments.Nope").err().unwrap();
    assert!(matches!(err, LtError::Injection(InjectionError::UnknownExperiment { .. })));
}

#[test]
fn test_import_path_on_unknown_module_is_none() {
    assert!(builtin_catalog().import_path("does.not.exist").is_none());
}
