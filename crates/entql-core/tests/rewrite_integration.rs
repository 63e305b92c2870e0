//! Integration tests for the full rewrite pipeline.

use entql_core::catalog::{AttributeDef, EntityDef, SchemaBundle, ScalarType};
use entql_core::criteria::{
    CriterionRegistry, ExistsCriterion, RowFilter, RowLevelCriterion, SoftDeleteCriterion,
    TenantCriterion,
};
use entql_core::{
    EngineConfig, ParameterMap, ParameterOrigin, RewriteEngine, RewriteError, SecurityContext,
    Value,
};
use std::collections::HashSet;
use std::sync::Arc;

fn schema() -> SchemaBundle {
    SchemaBundle::from_entities([
        EntityDef::new("Customer", "id")
            .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
            .with_attribute(AttributeDef::scalar("name", ScalarType::String))
            .with_attribute(AttributeDef::scalar("age", ScalarType::Int32))
            .with_attribute(AttributeDef::scalar("region", ScalarType::String))
            .with_attribute(AttributeDef::scalar("tenantId", ScalarType::String))
            .with_attribute(AttributeDef::scalar("deletedAt", ScalarType::Timestamp).nullable())
            .with_attribute(AttributeDef::collection("orders", "Order"))
            .with_tenant("tenantId")
            .with_soft_delete("deletedAt"),
        EntityDef::new("Order", "id")
            .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
            .with_attribute(AttributeDef::scalar("total", ScalarType::Decimal))
            .with_attribute(AttributeDef::reference("customer", "Customer"))
            .with_attribute(AttributeDef::scalar("tenantId", ScalarType::String))
            .with_tenant("tenantId"),
        EntityDef::new("OrderLine", "id")
            .with_attribute(AttributeDef::scalar("id", ScalarType::Int64))
            .with_attribute(AttributeDef::scalar("quantity", ScalarType::Int32))
            .with_attribute(AttributeDef::reference("order", "Order")),
        EntityDef::new("Membership", "id")
            .with_attribute(AttributeDef::scalar("id", ScalarType::Uuid))
            .with_attribute(AttributeDef::reference("customer", "Customer"))
            .with_attribute(AttributeDef::scalar("userId", ScalarType::String)),
    ])
    .expect("valid schema")
}

fn engine(registry: CriterionRegistry) -> RewriteEngine {
    RewriteEngine::new(
        Arc::new(schema()),
        Arc::new(registry),
        EngineConfig::default(),
    )
    .expect("valid engine")
}

fn registry() -> CriterionRegistry {
    CriterionRegistry::builder()
        .register(TenantCriterion::new())
        .register(SoftDeleteCriterion::new())
        .build()
        .expect("valid registry")
}

// =============================================================================
// Documented examples
// =============================================================================

mod examples {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_no_criteria_keeps_the_query() {
        let engine = engine(CriterionRegistry::empty());
        let out = engine
            .rewrite(
                "select e from Customer e where e.name = :name",
                ParameterMap::new().with("name", "Alice"),
                &SecurityContext::anonymous(),
            )
            .unwrap();

        assert_eq!(out.text, "select e from Customer e where e.name = :name");
        assert_eq!(out.parameters.names().collect::<Vec<_>>(), vec!["name"]);
    }

    #[test]
    fn test_soft_delete() {
        let registry = CriterionRegistry::builder()
            .register(SoftDeleteCriterion::new())
            .build()
            .unwrap();
        let out = engine(registry)
            .rewrite(
                "select e from Customer e where e.name = :name",
                ParameterMap::new().with("name", "Alice"),
                &SecurityContext::anonymous(),
            )
            .unwrap();

        assert_eq!(
            out.text,
            "select e from Customer e where (e.name = :name) and (e.deletedAt is null)"
        );
    }

    #[test]
    fn test_tenant() {
        let registry = CriterionRegistry::builder()
            .register(TenantCriterion::new())
            .build()
            .unwrap();
        let out = engine(registry)
            .rewrite(
                "select e from Customer e where e.name = :name",
                ParameterMap::new().with("name", "Alice"),
                &SecurityContext::new("alice").with_tenant("acme"),
            )
            .unwrap();

        assert_eq!(
            out.text,
            "select e from Customer e where (e.name = :name) and \
             (:criterion_tenantId = 'NO_TENANT' or e.tenantId = :criterion_tenantId)"
        );
        assert_eq!(
            out.parameters.value("criterion_tenantId"),
            Some(&Value::from("acme"))
        );
        assert_eq!(
            out.parameters.names().collect::<Vec<_>>(),
            vec!["name", "criterion_tenantId"]
        );
    }

    #[test]
    fn test_aggregate_position() {
        let engine = engine(CriterionRegistry::empty());
        let query = engine.parse("select count(e.id) from OrderLine e").unwrap();
        let bound = engine.bind(query, ParameterMap::new()).unwrap();

        let position = engine.position_of(&bound, "e.id").unwrap().unwrap();
        assert_eq!(position.index, 0);
        assert!(position.is_aggregate);
    }

    #[test]
    fn test_unknown_attribute() {
        let source = "select e from Customer e where e.ssn = :x";
        let err = engine(registry())
            .rewrite(
                source,
                ParameterMap::new().with("x", "123"),
                &SecurityContext::anonymous(),
            )
            .unwrap_err();

        match &err {
            RewriteError::UnresolvedPath { alias, path, .. } => {
                assert_eq!(alias, "e");
                assert_eq!(path, "ssn");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.format_with_source(source).contains("line 1"));
    }
}

// =============================================================================
// Rewrite invariants
// =============================================================================

mod invariants {
    use super::*;

    #[test]
    fn test_exactly_one_tenant_parameter() {
        let engine = engine(registry());
        let security = SecurityContext::new("alice").with_tenant("acme");
        let out = engine
            .rewrite(
                "select o from Order o join o.customer c where c.name = :name \
                 and exists (select x from Order x where x.customer = c)",
                ParameterMap::new().with("name", "Alice"),
                &security,
            )
            .unwrap();

        let tenant_params: Vec<_> = out
            .parameters
            .iter()
            .filter(|(name, _)| name.contains("tenantId"))
            .collect();
        assert_eq!(tenant_params.len(), 1);
        assert_eq!(tenant_params[0].1.value, Value::from("acme"));
        assert_eq!(
            tenant_params[0].1.origin,
            ParameterOrigin::Criterion("tenant".into())
        );

        // o, c and x each get the tenant disjunction
        assert_eq!(
            out.text.matches(":criterion_tenantId = 'NO_TENANT'").count(),
            3
        );
    }

    #[test]
    fn test_anonymous_context_binds_the_sentinel() {
        let out = engine(registry())
            .rewrite(
                "select e from Customer e",
                ParameterMap::new(),
                &SecurityContext::anonymous(),
            )
            .unwrap();
        assert_eq!(
            out.parameters.value("criterion_tenantId"),
            Some(&Value::from("NO_TENANT"))
        );
    }

    #[test]
    fn test_aliases_stay_unique() {
        let registry = CriterionRegistry::builder()
            .register(
                ExistsCriterion::new("members", "Customer", "Membership")
                    .with_reference("customer")
                    .with_member("userId", "user_id"),
            )
            .build()
            .unwrap();
        let out = engine(registry)
            .rewrite(
                "select m from Customer m where exists (select m1 from Order m1 where m1.customer = m)",
                ParameterMap::new(),
                &SecurityContext::new("bob").with_attribute("user_id", "u-1"),
            )
            .unwrap();

        let aliases: Vec<&str> = out.model.aliases().collect();
        let unique: HashSet<&str> = aliases.iter().copied().collect();
        assert_eq!(aliases.len(), unique.len());
        assert!(out.text.contains("from Membership m2 where m2.customer = m and"));
        assert_eq!(
            out.model.range("m2").and_then(|r| r.injected_by.as_deref()),
            Some("members")
        );
    }

    #[test]
    fn test_sibling_subqueries_reusing_an_alias_are_each_constrained() {
        let registry = CriterionRegistry::builder()
            .register(TenantCriterion::new())
            .build()
            .unwrap();
        let out = engine(registry)
            .rewrite(
                "select c from Customer c where exists (select o from Order o where o.customer = c) \
                 or exists (select o from Order o where o.total > 100)",
                ParameterMap::new(),
                &SecurityContext::new("alice").with_tenant("acme"),
            )
            .unwrap();

        let aliases: Vec<&str> = out.model.aliases().collect();
        assert_eq!(aliases, vec!["c", "o", "o1"]);
        assert!(out.text.contains("o.tenantId = :criterion_tenantId"));
        assert!(out.text.contains("o1.tenantId = :criterion_tenantId"));
        assert_eq!(out.parameters.names().collect::<Vec<_>>(), vec!["criterion_tenantId"]);
    }

    #[test]
    fn test_transform_twice_does_not_duplicate() {
        let engine = engine(registry());
        let security = SecurityContext::new("alice").with_tenant("acme");
        let out = engine
            .rewrite("select e from Customer e", ParameterMap::new(), &security)
            .unwrap();

        let again = engine.transform(&out.model, &security).unwrap();
        let text = engine.serialize(&again).unwrap().text;
        assert_eq!(text, out.text);
        assert_eq!(text.matches("deletedAt is null").count(), 1);
    }

    #[test]
    fn test_left_join_fragments_go_to_on() {
        let out = engine(registry())
            .rewrite(
                "select o from Order o left join o.customer c",
                ParameterMap::new(),
                &SecurityContext::new("alice").with_tenant("acme"),
            )
            .unwrap();

        let (joins, filter) = out.text.split_once(" where ").unwrap();
        assert!(joins.contains("left join o.customer c on"));
        assert!(joins.contains("c.deletedAt is null"));
        assert!(joins.contains("c.tenantId = :criterion_tenantId"));
        assert!(!filter.contains("c."));
        assert!(filter.contains("o.tenantId = :criterion_tenantId"));
    }
}

// =============================================================================
// Failures
// =============================================================================

mod failures {
    use super::*;

    #[test]
    fn test_caller_parameter_collision() {
        let err = engine(registry())
            .rewrite(
                "select e from Customer e where e.name = :criterion_tenantId",
                ParameterMap::new().with("criterion_tenantId", "x"),
                &SecurityContext::anonymous(),
            )
            .unwrap_err();
        assert!(matches!(err, RewriteError::CriterionConflict { .. }));
    }

    #[test]
    fn test_unbound_parameter() {
        let err = engine(registry())
            .rewrite(
                "select e from Customer e where e.name = :name",
                ParameterMap::new(),
                &SecurityContext::anonymous(),
            )
            .unwrap_err();
        assert!(matches!(err, RewriteError::UnboundParameter { ref name, .. } if name == "name"));
    }

    #[test]
    fn test_missing_row_level_attribute() {
        let registry = CriterionRegistry::builder()
            .register(RowLevelCriterion::new(
                "region",
                "Customer",
                RowFilter::attribute_eq("region", "region"),
            ))
            .build()
            .unwrap();
        let engine = engine(registry);

        let err = engine
            .rewrite(
                "select e from Customer e",
                ParameterMap::new(),
                &SecurityContext::new("bob"),
            )
            .unwrap_err();
        assert!(matches!(err, RewriteError::Criterion { .. }));

        let admin = engine
            .rewrite(
                "select e from Customer e",
                ParameterMap::new(),
                &SecurityContext::system(),
            )
            .unwrap();
        assert_eq!(admin.text, "select e from Customer e");
    }

    #[test]
    fn test_lex_error_comes_first() {
        let err = engine(registry())
            .rewrite(
                "select e from Customer e where e.ssn # 1",
                ParameterMap::new(),
                &SecurityContext::anonymous(),
            )
            .unwrap_err();
        assert!(matches!(err, RewriteError::Lang(entql_lang::LangError::Lex(_))));
    }
}

// =============================================================================
// Concurrency
// =============================================================================

mod concurrency {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_concurrent_rewrites_share_one_parse() {
        const THREADS: usize = 8;
        let engine = Arc::new(engine(registry()));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let tenant = format!("tenant-{}", i);
                    let out = engine
                        .rewrite(
                            "select e from Customer e where e.name = :name",
                            ParameterMap::new().with("name", "Alice"),
                            &SecurityContext::new("svc").with_tenant(tenant.as_str()),
                        )
                        .unwrap();
                    (tenant, out)
                })
            })
            .collect();

        let texts: HashSet<String> = handles
            .into_iter()
            .map(|h| {
                let (tenant, out) = h.join().unwrap();
                assert_eq!(
                    out.parameters.value("criterion_tenantId"),
                    Some(&Value::from(tenant))
                );
                out.text
            })
            .collect();

        assert_eq!(texts.len(), 1);
        let stats = engine.cache_stats().unwrap();
        assert_eq!(stats.parses(), 1);
        assert_eq!(stats.hits(), (THREADS - 1) as u64);
    }
}

// =============================================================================
// Round-trip property
// =============================================================================

mod round_trip {
    use super::*;
    use proptest::prelude::*;

    fn atom() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("e.name = :name".to_string()),
            (0i64..100).prop_map(|n| format!("e.age > {}", n)),
            (0i64..50, 50i64..100).prop_map(|(lo, hi)| format!("e.age between {} and {}", lo, hi)),
            Just("e.name like 'A%'".to_string()),
            Just("e.deletedAt is not null".to_string()),
            Just("e.age in (1, 2, :age)".to_string()),
            Just("e.region <> 'EU'".to_string()),
        ]
    }

    fn predicate() -> impl Strategy<Value = String> {
        atom().prop_recursive(4, 24, 2, |inner| {
            prop_oneof![
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{} and {}", a, b)),
                (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("{} or {}", a, b)),
                inner.clone().prop_map(|a| format!("not {}", a)),
                inner.prop_map(|a| format!("({})", a)),
            ]
        })
    }

    proptest! {
        #[test]
        fn serialize_without_criteria_reprints_the_query(pred in predicate()) {
            let engine = engine(CriterionRegistry::empty());
            let source = format!("select e from Customer e where {}", pred);
            let params = ParameterMap::new().with("name", "Alice").with("age", 3i32);

            let out = engine
                .rewrite(&source, params, &SecurityContext::anonymous())
                .unwrap();
            let printed = entql_lang::parse(&source).unwrap().to_string();
            prop_assert_eq!(&out.text, &printed);

            let reparsed = entql_lang::parse(&out.text).unwrap().to_string();
            prop_assert_eq!(reparsed, out.text);
        }
    }
}
