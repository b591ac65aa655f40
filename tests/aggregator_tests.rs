use agent_discovery::{
    error::{DiscoveryError, Result},
    provider::{
        RegistryProvider,
        local::{LocalRegistry, LocalResource},
    },
    registry::{ErrorMode, ResourceAggregator},
    types::ResourceId,
    utils::time::current_timestamp,
};
use serde_json::{Value, json};
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

fn id(name: &str) -> ResourceId {
    ResourceId::new(name).unwrap()
}

fn owned_by(owner: &str) -> LocalResource {
    LocalResource::new().with_attribute("Owner", json!(owner))
}

fn owner_of(aggregator: &ResourceAggregator, name: &ResourceId) -> Result<Value> {
    aggregator.execute(name, |conn, id, _| conn.get_attribute(id, "Owner"), &[])
}

fn permutations(items: &[&'static str]) -> Vec<Vec<&'static str>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut all = Vec::new();
    for (i, first) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, *first);
            all.push(tail);
        }
    }
    all
}

#[test_log::test]
fn test_first_provider_wins_in_every_order() -> Result<()> {
    let shared = id("test:type=shared");

    for order in permutations(&["a", "b", "c"]) {
        let registries: Vec<LocalRegistry> = order
            .iter()
            .map(|name| -> Result<LocalRegistry> {
                let registry = LocalRegistry::new(*name);
                registry.register(shared.clone(), owned_by(name))?;
                registry.register(id(&format!("test:type=own,name={name}")), owned_by(name))?;
                Ok(registry)
            })
            .collect::<Result<_>>()?;

        let aggregator = ResourceAggregator::new(
            Arc::new(registries[0].clone()),
            registries[1..]
                .iter()
                .map(|r| Arc::new(r.clone()) as Arc<dyn RegistryProvider>),
        )?;

        assert_eq!(aggregator.resolve(&shared)?.name(), order[0], "order {order:?}");
        assert_eq!(owner_of(&aggregator, &shared)?, json!(order[0]));

        // Unique names stay reachable no matter the priority
        for name in &order {
            let own = id(&format!("test:type=own,name={name}"));
            assert_eq!(owner_of(&aggregator, &own)?, json!(name));
        }

        let summary = aggregator.for_each(None, |conn, id| {
            let owner = conn.get_attribute(id, "Owner")?;
            if id == &shared {
                assert_eq!(owner, json!(order[0]));
            }
            Ok(())
        })?;
        assert_eq!(summary.visited, 4);
        assert_eq!(summary.hidden, 2);
        assert_eq!(aggregator.query_identifiers(None).len(), 4);
    }
    Ok(())
}

#[test_log::test]
fn test_overlapping_identifier_resolves_to_primary() -> Result<()> {
    let one = id("test:type=one");
    let p1 = LocalRegistry::new("p1");
    let p2 = LocalRegistry::new("p2");
    p1.register(one.clone(), owned_by("p1"))?;

    let aggregator = ResourceAggregator::with_primary(Arc::new(p1))?;
    p2.register(one.clone(), owned_by("p2").with_attribute("Extra", json!(true)))?;
    aggregator.register_provider(Arc::new(p2))?;

    let names = aggregator.query_identifiers(None);
    assert_eq!(names.into_iter().collect::<Vec<_>>(), vec![one.clone()]);
    assert_eq!(owner_of(&aggregator, &one)?, json!("p1"));

    let err = aggregator
        .execute(&one, |conn, id, _| conn.get_attribute(id, "Extra"), &[])
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::AttributeNotFound { .. }));
    Ok(())
}

#[test_log::test]
fn test_unregister_during_enumeration() -> Result<()> {
    let primary = LocalRegistry::new("primary");
    let stable = LocalRegistry::new("stable");
    let volatile = LocalRegistry::new("volatile");
    for n in 0..20 {
        primary.register(id(&format!("primary:n={n}")), owned_by("primary"))?;
        stable.register(id(&format!("stable:n={n}")), owned_by("stable"))?;
        volatile.register(id(&format!("volatile:n={n}")), owned_by("volatile"))?;
    }

    let aggregator = ResourceAggregator::new(
        Arc::new(primary),
        [
            Arc::new(stable) as Arc<dyn RegistryProvider>,
            Arc::new(volatile.clone()),
        ],
    )?;
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        scope.spawn(|| {
            while !done.load(Ordering::Acquire) {
                if aggregator.unregister_provider("volatile").is_ok() {
                    thread::yield_now();
                    let _ = aggregator.register_provider(Arc::new(volatile.clone()));
                }
            }
        });

        for _ in 0..200 {
            let mut seen = Vec::new();
            let summary = aggregator
                .for_each(None, |_, id| {
                    seen.push(id.clone());
                    Ok(())
                })
                .unwrap();
            assert!(summary.is_complete());

            let unique: HashSet<_> = seen.iter().cloned().collect();
            assert_eq!(unique.len(), seen.len(), "duplicate resource visited");

            let count = |domain: &str| seen.iter().filter(|id| id.domain() == domain).count();
            assert_eq!(count("primary"), 20);
            assert_eq!(count("stable"), 20);
            assert!(matches!(count("volatile"), 0 | 20), "partial provider observed");
        }
        done.store(true, Ordering::Release);
    });

    assert_eq!(aggregator.provider_names()[..2], ["primary", "stable"]);
    Ok(())
}

#[test_log::test]
fn test_change_detection_is_monotonic() -> Result<()> {
    let primary = LocalRegistry::new("primary");
    let aggregator = ResourceAggregator::with_primary(Arc::new(primary.clone()))?;

    assert!(aggregator.has_changed_since(0));
    let future = current_timestamp() + 1;
    assert!(!aggregator.has_changed_since(future));

    let before = current_timestamp();
    primary.register(id("test:type=late"), LocalResource::new())?;
    let observed = aggregator.last_changed();
    assert!(observed >= before);
    assert!(aggregator.has_changed_since(before));

    // A provider change is structural too
    let registered_at = current_timestamp();
    aggregator.register_provider(Arc::new(LocalRegistry::new("secondary")))?;
    assert!(aggregator.has_changed_since(registered_at));
    aggregator.unregister_provider("secondary")?;

    assert!(aggregator.last_changed() >= observed);
    assert!(aggregator.has_changed_since(0));
    Ok(())
}

#[test_log::test]
fn test_change_visible_after_second_boundary() -> Result<()> {
    let primary = LocalRegistry::new("primary");
    let aggregator = ResourceAggregator::with_primary(Arc::new(primary.clone()))?;

    thread::sleep(Duration::from_millis(1100));
    let after_setup = current_timestamp();
    assert!(!aggregator.has_changed_since(after_setup + 1));

    primary.register(id("test:type=tick"), LocalResource::new())?;
    assert!(aggregator.has_changed_since(after_setup));
    Ok(())
}

#[test_log::test]
fn test_destroy_is_idempotent() -> Result<()> {
    let primary = LocalRegistry::new("primary");
    let secondary = LocalRegistry::new("secondary");
    let aggregator = ResourceAggregator::new(
        Arc::new(primary.clone()),
        [Arc::new(secondary.clone()) as Arc<dyn RegistryProvider>],
    )?;

    aggregator.destroy();
    aggregator.destroy();
    assert_eq!(primary.listener_count(), 0);
    assert_eq!(secondary.listener_count(), 0);

    // Still usable for lookups
    primary.register(id("test:type=one"), owned_by("primary"))?;
    assert_eq!(owner_of(&aggregator, &id("test:type=one"))?, json!("primary"));
    Ok(())
}

#[test_log::test]
fn test_dropping_aggregator_removes_listeners() -> Result<()> {
    let primary = LocalRegistry::new("primary");
    {
        let _aggregator = ResourceAggregator::with_primary(Arc::new(primary.clone()))?;
        assert_eq!(primary.listener_count(), 1);
    }
    assert_eq!(primary.listener_count(), 0);
    Ok(())
}

#[test_log::test]
fn test_independent_aggregators() -> Result<()> {
    let shared = LocalRegistry::new("shared");
    let first = ResourceAggregator::with_primary(Arc::new(shared.clone()))?;
    let second = ResourceAggregator::with_primary(Arc::new(shared.clone()))?;
    assert_eq!(shared.listener_count(), 2);

    first.destroy();
    assert_eq!(shared.listener_count(), 1);
    drop(second);
    assert_eq!(shared.listener_count(), 0);
    Ok(())
}

#[test_log::test]
fn test_execute_passes_arguments_and_errors() -> Result<()> {
    let primary = LocalRegistry::new("primary");
    let calc = id("calc:type=adder");
    primary.register(
        calc.clone(),
        LocalResource::new().with_operation("add", |args| {
            Ok(json!(args.iter().filter_map(Value::as_i64).sum::<i64>()))
        }),
    )?;
    let aggregator = ResourceAggregator::with_primary(Arc::new(primary))?;

    let sum = aggregator.execute(
        &calc,
        |conn, id, args| conn.invoke(id, "add", args),
        &[json!(1), json!(2), json!(3)],
    )?;
    assert_eq!(sum, json!(6));

    let err = aggregator
        .execute(&calc, |conn, id, args| conn.invoke(id, "subtract", args), &[])
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::Invocation(_)));

    let err = aggregator
        .execute(&id("calc:type=missing"), |_, _, _| Ok(()), &[])
        .unwrap_err();
    assert!(err.to_string().contains("calc:type=missing"));
    Ok(())
}

#[test_log::test]
fn test_fail_fast_stops_at_unavailable_provider() -> Result<()> {
    let primary = LocalRegistry::new("primary");
    let remote = LocalRegistry::new("remote");
    primary.register(id("test:type=one"), owned_by("primary"))?;
    remote.register(id("test:type=two"), owned_by("remote"))?;

    let aggregator = ResourceAggregator::new(
        Arc::new(primary),
        [Arc::new(remote.clone()) as Arc<dyn RegistryProvider>],
    )?;
    remote.set_available(false);

    let mut calls = 0;
    let err = aggregator
        .for_each_with(None, ErrorMode::FailFast, |_, _| {
            calls += 1;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(calls, 1);
    assert!(err.is_retryable());

    let summary = aggregator.for_each(None, |_, _| Ok(()))?;
    assert_eq!(summary.visited, 1);
    assert_eq!(summary.failures[0].provider, "remote");
    Ok(())
}
