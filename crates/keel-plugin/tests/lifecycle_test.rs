//! Integration tests for plugin registration, resolution, and shutdown.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use helpers::{Recorder, call_log, calls, manager};
use keel_core::ConfigStore;
use keel_plugin::prelude::*;

static SINGLETON_REGISTRATIONS: AtomicUsize = AtomicUsize::new(0);

/// Only registered by the idempotence test, so the static counter is exact.
#[derive(Default)]
struct Singleton;

#[async_trait]
impl Plugin for Singleton {
    fn name(&self) -> String {
        "singleton".to_string()
    }

    fn on_registration(&self, _config: &ConfigStore) {
        SINGLETON_REGISTRATIONS.fetch_add(1, Ordering::SeqCst);
    }

    fn initialize(&self, _ctx: &PluginContext<'_>) -> anyhow::Result<Extension> {
        Ok(Extension::new(7u32))
    }
}

#[derive(Default)]
struct Counted;

#[async_trait]
impl Plugin for Counted {
    fn name(&self) -> String {
        "counted".to_string()
    }

    fn initialize(&self, _ctx: &PluginContext<'_>) -> anyhow::Result<Extension> {
        Ok(Extension::new(7u32))
    }
}

#[derive(Default)]
struct Impostor;

#[async_trait]
impl Plugin for Impostor {
    fn name(&self) -> String {
        "counted".to_string()
    }

    fn initialize(&self, _ctx: &PluginContext<'_>) -> anyhow::Result<Extension> {
        Ok(Extension::empty())
    }
}

#[test]
fn test_registering_same_type_twice_is_idempotent() {
    let manager = manager();

    manager.register::<Singleton>(false).unwrap();
    manager.register::<Singleton>(false).unwrap();
    manager.init_all().unwrap();
    manager.register::<Singleton>(true).unwrap();

    assert_eq!(SINGLETON_REGISTRATIONS.load(Ordering::SeqCst), 1);
    assert_eq!(manager.list().len(), 1);
    assert_eq!(manager.startup_order(), ["singleton"]);

    let value = manager.get_extension("singleton").unwrap();
    assert_eq!(value.downcast_ref::<u32>(), Some(&7));
}

#[test]
fn test_get_extension_of_registers_and_initializes() {
    let manager = manager();

    let value = manager.get_extension_of::<Counted>().unwrap();

    assert_eq!(value.downcast_ref::<u32>(), Some(&7));
    assert_eq!(manager.state("counted"), Some(LifecycleState::Initialized));
}

#[test]
fn test_same_name_with_different_type_is_rejected() {
    let manager = manager();
    manager.register::<Counted>(false).unwrap();

    let err = manager.register::<Impostor>(false).err().unwrap();

    match err {
        PluginError::DuplicatePluginDefinition {
            name,
            existing,
            requested,
        } => {
            assert_eq!(name, "counted");
            assert!(existing.ends_with("Counted"));
            assert!(requested.ends_with("Impostor"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_dependencies_start_before_dependents() {
    let log = call_log();
    let manager = manager();

    manager.register_plugin(Recorder::new("a", &log), false).unwrap();
    manager
        .register_plugin(Recorder::new("b", &log).depends_on("a"), false)
        .unwrap();
    manager
        .register_plugin(Recorder::new("c", &log).depends_on("b"), true)
        .unwrap();

    assert_eq!(manager.startup_order(), ["a", "b", "c"]);
    assert_eq!(calls(&log, "init"), ["a", "b", "c"]);
    assert_eq!(calls(&log, "register"), ["a", "b", "c"]);
}

#[test]
fn test_init_all_orders_by_dependency_not_registration() {
    let log = call_log();
    let manager = manager();

    manager
        .register_plugin(Recorder::new("c", &log).depends_on("b"), false)
        .unwrap();
    manager
        .register_plugin(Recorder::new("b", &log).depends_on("a"), false)
        .unwrap();
    manager.register_plugin(Recorder::new("a", &log), false).unwrap();

    manager.init_all().unwrap();

    assert_eq!(manager.startup_order(), ["a", "b", "c"]);
}

#[test]
fn test_circular_dependency_is_reported_with_chain() {
    let log = call_log();
    let manager = manager();

    manager
        .register_plugin(Recorder::new("a", &log).depends_on("b"), false)
        .unwrap();
    manager
        .register_plugin(Recorder::new("b", &log).depends_on("a"), false)
        .unwrap();

    let err = manager.initialize("a", false).err().unwrap();

    match err {
        PluginError::CircularDependency {
            plugin,
            dependency,
            chain,
        } => {
            assert_eq!(plugin, "b");
            assert_eq!(dependency, "a");
            assert_eq!(chain, ["a", "b"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(calls(&log, "init").is_empty());
}

/// Looks up `target` from inside its own `initialize`.
struct Lookup {
    name: &'static str,
    target: &'static str,
}

#[async_trait]
impl Plugin for Lookup {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn initialize(&self, ctx: &PluginContext<'_>) -> anyhow::Result<Extension> {
        ctx.get_extension(self.target)?;
        Ok(Extension::new(self.name.to_string()))
    }
}

fn circular_cause(err: &PluginError) -> Option<&PluginError> {
    match err {
        PluginError::CircularDependency { .. } => Some(err),
        PluginError::Initialization { source, .. } => {
            circular_cause(source.downcast_ref::<PluginError>()?)
        }
        _ => None,
    }
}

#[test]
fn test_self_lookup_during_initialize_is_circular() {
    let manager = manager();
    let lookup = || Lookup {
        name: "self_ref",
        target: "self_ref",
    };

    let err = manager.register_plugin(lookup(), true).err().unwrap();

    assert!(matches!(err, PluginError::Initialization { ref plugin, .. } if plugin == "self_ref"));
    match circular_cause(&err) {
        Some(PluginError::CircularDependency {
            plugin,
            dependency,
            chain,
        }) => {
            assert_eq!(plugin, "self_ref");
            assert_eq!(dependency, "self_ref");
            assert_eq!(chain, &["self_ref"]);
        }
        other => panic!("unexpected cause: {other:?}"),
    }
    assert_eq!(manager.state("self_ref"), Some(LifecycleState::Registered));
    assert!(manager.startup_order().is_empty());

    // A second attempt fails the same way.
    let again = manager.initialize("self_ref", true).err().unwrap();
    assert!(circular_cause(&again).is_some());
}

#[test]
fn test_mutual_lookup_during_initialize_is_circular() {
    let manager = manager();
    manager
        .register_plugin(
            Lookup {
                name: "pong",
                target: "ping",
            },
            false,
        )
        .unwrap();

    let err = manager
        .register_plugin(
            Lookup {
                name: "ping",
                target: "pong",
            },
            true,
        )
        .err()
        .unwrap();

    match circular_cause(&err) {
        Some(PluginError::CircularDependency {
            plugin,
            dependency,
            chain,
        }) => {
            assert_eq!(plugin, "pong");
            assert_eq!(dependency, "ping");
            assert_eq!(chain, &["ping", "pong"]);
        }
        other => panic!("unexpected cause: {other:?}"),
    }
    assert_eq!(manager.state("ping"), Some(LifecycleState::Registered));
    assert_eq!(manager.state("pong"), Some(LifecycleState::Registered));
    assert!(manager.startup_order().is_empty());
}

#[test]
fn test_unknown_dependency_fails() {
    let log = call_log();
    let manager = manager();

    let err = manager
        .register_plugin(Recorder::new("a", &log).depends_on("missing"), true)
        .err()
        .unwrap();

    assert!(matches!(err, PluginError::UnknownExtensionPoint(point) if point == "missing"));
}

#[test]
fn test_two_single_plugins_on_one_point_conflict() {
    let log = call_log();
    let manager = manager();

    manager
        .register_plugin(Recorder::new("pg", &log).at("db"), true)
        .unwrap();
    let err = manager
        .register_plugin(Recorder::new("sqlite", &log).at("db"), true)
        .err()
        .unwrap();

    match err {
        PluginError::DuplicateExtensionPoint {
            extension_point,
            plugin,
            existing,
        } => {
            assert_eq!(extension_point, "db");
            assert_eq!(plugin, "sqlite");
            assert_eq!(existing, "pg");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(calls(&log, "init"), ["pg"]);
}

#[test]
fn test_first_enabled_candidate_wins_without_conflict() {
    let log = call_log();
    let manager = manager();

    manager
        .register_plugin(Recorder::new("pg", &log).at("db").lazy(), false)
        .unwrap();
    manager
        .register_plugin(Recorder::new("sqlite", &log).at("db").lazy(), false)
        .unwrap();

    let value = manager.get_extension("db").unwrap();

    assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("pg"));
    assert_eq!(manager.state("sqlite"), Some(LifecycleState::Registered));
}

#[test]
fn test_multi_extension_collects_every_plugin() {
    let log = call_log();
    let manager = manager();

    for name in ["stdout", "file", "syslog"] {
        manager
            .register_plugin(Recorder::new(name, &log).at("sinks").multi().lazy(), false)
            .unwrap();
    }
    manager.initialize("file", true).unwrap();

    let sinks = manager.get_extensions("sinks").unwrap();

    assert_eq!(sinks.len(), 3);
    for (name, value) in &sinks {
        assert_eq!(value.downcast_ref::<String>(), Some(name));
    }
    let mut initialized = calls(&log, "init");
    initialized.sort();
    assert_eq!(initialized, ["file", "stdout", "syslog"]);
}

#[test]
fn test_get_extensions_on_empty_point_is_empty() {
    let manager = manager();
    assert!(manager.get_extensions("nothing").unwrap().is_empty());
}

#[test]
fn test_shutdown_runs_in_reverse_startup_order() {
    let log = call_log();
    let manager = manager();

    for name in ["a", "b", "c"] {
        manager.register_plugin(Recorder::new(name, &log), false).unwrap();
    }
    manager.init_all().unwrap();
    manager.shutdown_all();

    assert_eq!(calls(&log, "init"), ["a", "b", "c"]);
    assert_eq!(calls(&log, "shutdown"), ["c", "b", "a"]);
    assert!(
        manager
            .list()
            .iter()
            .all(|info| info.state == LifecycleState::ShutDown)
    );
}

#[test]
fn test_failing_shutdown_does_not_stop_the_others() {
    let log = call_log();
    let manager = manager();

    manager.register_plugin(Recorder::new("a", &log), false).unwrap();
    manager
        .register_plugin(Recorder::new("b", &log).failing_shutdown(), false)
        .unwrap();
    manager.register_plugin(Recorder::new("c", &log), false).unwrap();
    manager.init_all().unwrap();

    manager.shutdown_all();
    manager.shutdown_all();

    assert_eq!(calls(&log, "shutdown"), ["c", "b", "a"]);
}

#[test]
fn test_lazy_plugin_initializes_on_first_use() {
    let log = call_log();
    let manager = manager();

    manager.register_plugin(Recorder::new("a", &log), false).unwrap();
    manager
        .register_plugin(Recorder::new("cache", &log).lazy(), false)
        .unwrap();
    manager.register_plugin(Recorder::new("c", &log), false).unwrap();
    manager.init_all().unwrap();

    assert_eq!(manager.state("cache"), Some(LifecycleState::Collected));
    assert_eq!(calls(&log, "init"), ["a", "c"]);

    let value = manager.get_extension("cache").unwrap();

    assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("cache"));
    assert_eq!(manager.state("cache"), Some(LifecycleState::Initialized));
    assert_eq!(manager.startup_order(), ["a", "cache", "c"]);

    manager.shutdown_all();
    assert_eq!(calls(&log, "shutdown"), ["c", "cache", "a"]);
}

#[test]
fn test_lazy_plugin_never_used_is_not_shut_down() {
    let log = call_log();
    let manager = manager();

    manager
        .register_plugin(Recorder::new("cache", &log).lazy(), true)
        .unwrap();
    manager.shutdown_all();

    assert!(calls(&log, "init").is_empty());
    assert!(calls(&log, "shutdown").is_empty());
}

#[test]
fn test_disabled_plugin_is_inert() {
    let log = call_log();
    let manager = manager();

    manager
        .register_plugin(Recorder::new("off", &log).disabled(), false)
        .unwrap();
    manager.init_all().unwrap();

    assert_eq!(manager.state("off"), Some(LifecycleState::Registered));
    assert!(manager.startup_order().is_empty());
    assert!(matches!(
        manager.get_extension("off"),
        Err(PluginError::UnknownExtensionPoint(_))
    ));
}

#[test]
fn test_failed_initialize_propagates_and_reverts_state() {
    let log = call_log();
    let manager = manager();

    let err = manager
        .register_plugin(Recorder::new("flaky", &log).failing_initialize(), true)
        .err()
        .unwrap();

    assert!(matches!(err, PluginError::Initialization { ref plugin, .. } if plugin == "flaky"));
    assert_eq!(manager.state("flaky"), Some(LifecycleState::Registered));
    assert!(manager.startup_order().is_empty());
}

#[test]
fn test_unregistered_name_is_not_found() {
    let manager = manager();
    assert!(matches!(
        manager.initialize("ghost", false),
        Err(PluginError::PluginNotFound(name)) if name == "ghost"
    ));
    assert!(matches!(
        manager.get_extension("ghost"),
        Err(PluginError::UnknownExtensionPoint(_))
    ));
}

/// Two backends for one point, chosen by the `DB_BACKEND` option.
struct Backend {
    name: &'static str,
}

#[async_trait]
impl Plugin for Backend {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn extension_point(&self, _config: &ConfigStore) -> String {
        "db".to_string()
    }

    fn is_enabled(&self, config: &ConfigStore) -> bool {
        option_selects(config, "DB_BACKEND", "pg", self.name)
    }

    fn initialize(&self, _ctx: &PluginContext<'_>) -> anyhow::Result<Extension> {
        Ok(Extension::new(self.name))
    }
}

#[test]
fn test_configuration_selects_between_backends() {
    let manager = manager();
    manager.config().set("DB_BACKEND", "sqlite");

    manager.register_plugin(Backend { name: "pg" }, false).unwrap();
    manager.register_plugin(Backend { name: "sqlite" }, false).unwrap();
    manager.init_all().unwrap();

    let value = manager.get_extension("db").unwrap();
    assert_eq!(value.downcast_ref::<&str>(), Some(&"sqlite"));
    assert_eq!(manager.state("pg"), Some(LifecycleState::Registered));

    // Later configuration changes do not re-resolve a committed point.
    manager.config().set("DB_BACKEND", "pg");
    let value = manager.get_extension("db").unwrap();
    assert_eq!(value.downcast_ref::<&str>(), Some(&"sqlite"));
}

/// Pulls its dependency's value through the context.
#[derive(Default)]
struct Greeter;

#[async_trait]
impl Plugin for Greeter {
    fn name(&self) -> String {
        "greeter".to_string()
    }

    fn dependencies(&self, _config: &ConfigStore) -> Vec<String> {
        vec!["counted".to_string()]
    }

    fn initialize(&self, ctx: &PluginContext<'_>) -> anyhow::Result<Extension> {
        let count = ctx.get_extension("counted")?;
        let count = count
            .downcast::<u32>()
            .ok_or_else(|| anyhow::anyhow!("counted is not a u32"))?;
        let prefix = ctx.config().get_or("GREETING", "hello");
        Ok(Extension::new(format!("{} {}", prefix.as_str().unwrap_or_default(), count)))
    }
}

#[test]
fn test_plugin_reads_dependency_through_context() {
    let manager = manager();
    manager.register::<Counted>(false).unwrap();

    let value = manager.get_extension_of::<Greeter>().unwrap();

    assert_eq!(value.downcast_ref::<String>().map(String::as_str), Some("hello 7"));
    assert_eq!(manager.startup_order(), ["counted", "greeter"]);
}

#[test]
fn test_set_extension_is_lazy_and_resolves_dependencies() {
    let log = call_log();
    let manager = manager();
    let shutdowns = Arc::new(AtomicUsize::new(0));

    manager.register_plugin(Recorder::new("a", &log).lazy(), false).unwrap();
    let counter = shutdowns.clone();
    manager
        .set_extension(
            "clock",
            vec!["a".to_string()],
            |ctx: &PluginContext<'_>| -> anyhow::Result<Extension> {
                let a = ctx.get_extension("a")?;
                let after = a.downcast_ref::<String>().map_or("", String::as_str);
                Ok(Extension::new(format!("clock after {after}")))
            },
            Some(move |_value: &Extension| -> anyhow::Result<()> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
    manager.init_all().unwrap();

    assert_eq!(
        manager.state("SetExtension|clock|"),
        Some(LifecycleState::Collected)
    );

    let value = manager.get_extension("clock").unwrap();
    assert_eq!(
        value.downcast_ref::<String>().map(String::as_str),
        Some("clock after a")
    );

    manager.shutdown_all();
    assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(calls(&log, "shutdown"), ["a"]);
}

#[test]
fn test_list_reports_registration_details() {
    let log = call_log();
    let manager = manager();

    manager
        .register_plugin(Recorder::new("pg", &log).at("db"), true)
        .unwrap();

    let infos = manager.list();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].name, "pg");
    assert_eq!(infos[0].extension_point, "db");
    assert_eq!(infos[0].state, LifecycleState::Initialized);
    assert!(infos[0].type_name.ends_with("Recorder"));
    assert!(!infos[0].async_ready_called);
}
