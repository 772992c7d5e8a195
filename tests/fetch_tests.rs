//! Fetch query injection through the service.

mod common;

use std::sync::Arc;

use common::{create_service, seeded_executor};
use namedql::mapping::{
    FetchQueryDefinition, FetchQueryParameterDefinition, ParameterSource, QueryDefinition,
    ScriptDefinition,
};
use namedql::{ErrorKind, MappingBuilder, QueryParameter, ScriptKind};
use serde_json::{json, Value};

fn orders_by_users() -> QueryDefinition {
    QueryDefinition::new(
        "orders_by_users",
        ScriptKind::Literal,
        "SELECT * FROM orders WHERE user_id IN (:user_id)",
    )
}

fn orders_fetch() -> FetchQueryDefinition {
    FetchQueryDefinition::new("orders_by_users").parameter(
        FetchQueryParameterDefinition::new("user_id", ParameterSource::ParentResultField)
            .source_name("id"),
    )
}

fn users_with(fetch: FetchQueryDefinition) -> QueryDefinition {
    QueryDefinition::new(
        "users_with_orders",
        ScriptKind::Literal,
        "SELECT * FROM users WHERE dept = :dept",
    )
    .fetch(fetch)
}

fn ids(value: &Value) -> Vec<Value> {
    value
        .as_array()
        .map(|items| items.iter().map(|item| item["id"].clone()).collect())
        .unwrap_or_default()
}

#[test]
fn test_result_field_fetch_injects_per_parent() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![orders_by_users(), users_with(orders_fetch().inject_into("orders"))],
        executor.clone(),
    );

    let rows = service
        .select("users_with_orders", QueryParameter::new(json!({"dept": "eng"})))
        .unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(ids(&rows[0]["orders"]), vec![json!(101), json!(107)]);
    assert_eq!(ids(&rows[3]["orders"]), vec![json!(104)]);
    assert_eq!(rows[8]["orders"], json!([]));

    // One fetch statement for the whole batch
    let fetches = executor.calls_matching("FROM orders");
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].args.len(), 10);
    assert_eq!(fetches[0].args[0], json!(1));
}

#[test]
fn test_single_parent_binds_scalar() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![
            orders_by_users(),
            QueryDefinition::new(
                "user_by_id",
                ScriptKind::Literal,
                "SELECT * FROM users WHERE id = :id",
            )
            .fetch(orders_fetch().inject_into("orders")),
        ],
        executor.clone(),
    );

    let row = service
        .get("user_by_id", QueryParameter::new(json!({"id": 2})))
        .unwrap()
        .unwrap();
    assert_eq!(ids(&row["orders"]), vec![json!(102)]);

    let fetch = &executor.calls_matching("FROM orders")[0];
    assert_eq!(fetch.statement, "SELECT * FROM orders WHERE user_id IN (?)");
    assert_eq!(fetch.args, vec![json!(2)]);
}

#[test]
fn test_forward_fetches_only_returned_rows() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![orders_by_users(), users_with(orders_fetch().inject_into("orders"))],
        executor.clone(),
    );

    let forwarding = service
        .forward(
            "users_with_orders",
            QueryParameter::new(json!({"dept": "ops"})).with_limit(5),
        )
        .unwrap();
    assert!(forwarding.has_next);
    assert_eq!(forwarding.rows.len(), 5);

    let fetch = &executor.calls_matching("FROM orders")[0];
    assert_eq!(
        fetch.args,
        vec![json!(11), json!(12), json!(13), json!(14), json!(15)]
    );
}

#[test]
fn test_distinct_single_record_fetch() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![
            QueryDefinition::new(
                "users_by_ids",
                ScriptKind::Literal,
                "SELECT * FROM users WHERE id IN (:id)",
            ),
            QueryDefinition::new(
                "group_members",
                ScriptKind::Literal,
                "SELECT * FROM memberships WHERE group_id = :group",
            )
            .fetch(
                FetchQueryDefinition::new("users_by_ids")
                    .inject_into("user")
                    .single_record()
                    .parameter(
                        FetchQueryParameterDefinition::new("id", ParameterSource::ParentResultField)
                            .source_name("user_id")
                            .distinct(),
                    ),
            ),
        ],
        executor.clone(),
    );

    let rows = service
        .select("group_members", QueryParameter::new(json!({"group": 7})))
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["user"]["name"], json!("user2"));
    assert_eq!(rows[1]["user"]["name"], json!("user2"));
    assert_eq!(rows[2]["user"]["name"], json!("user5"));

    let fetch = &executor.calls_matching("FROM users")[0];
    assert_eq!(fetch.args, vec![json!(2), json!(5)]);
}

#[test]
fn test_parent_parameter_and_constant_sources() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![
            QueryDefinition::new(
                "dept_peers",
                ScriptKind::Literal,
                "SELECT * FROM users WHERE dept = :dept AND id > :after",
            ),
            QueryDefinition::new(
                "user_by_id",
                ScriptKind::Literal,
                "SELECT * FROM users WHERE id = :id",
            )
            .fetch(
                FetchQueryDefinition::new("dept_peers")
                    .inject_into("peers")
                    .parameter(
                        FetchQueryParameterDefinition::new("dept", ParameterSource::ParentParameter)
                            .source_name("team"),
                    )
                    .parameter(
                        FetchQueryParameterDefinition::new("after", ParameterSource::Constant)
                            .value(json!(14)),
                    ),
            ),
        ],
        executor.clone(),
    );

    let row = service
        .get("user_by_id", QueryParameter::new(json!({"id": 1, "team": "ops"})))
        .unwrap()
        .unwrap();
    assert_eq!(ids(&row["peers"]), vec![json!(15), json!(16), json!(17)]);
}

#[test]
fn test_lazy_fetch_is_skipped() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![orders_by_users(), users_with(orders_fetch().inject_into("orders").lazy())],
        executor.clone(),
    );

    let rows = service
        .select("users_with_orders", QueryParameter::new(json!({"dept": "eng"})))
        .unwrap();
    assert!(rows[0].get("orders").is_none());
    assert!(executor.calls_matching("FROM orders").is_empty());
}

#[test]
fn test_lua_predicate_gates_fetch() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![
            orders_by_users(),
            users_with(
                orders_fetch()
                    .inject_into("orders")
                    .predicate(ScriptDefinition::new(ScriptKind::Lua, "return p.with_orders == true")),
            ),
        ],
        executor.clone(),
    );

    let rows = service
        .select("users_with_orders", QueryParameter::new(json!({"dept": "eng"})))
        .unwrap();
    assert!(rows[0].get("orders").is_none());

    let rows = service
        .select(
            "users_with_orders",
            QueryParameter::new(json!({"dept": "eng", "with_orders": true})),
        )
        .unwrap();
    assert_eq!(ids(&rows[0]["orders"]), vec![json!(101), json!(107)]);
    assert_eq!(executor.calls_matching("FROM orders").len(), 1);
}

#[test]
fn test_lua_injection_script() {
    let script = r#"
        for _, row in ipairs(rows) do
            local sum = 0
            for _, order in ipairs(fetched) do
                if order.user_id == row.id then
                    sum = sum + order.total
                end
            end
            row.spent = sum
        end
        return rows
    "#;
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![
            orders_by_users(),
            users_with(orders_fetch().injection_script(ScriptDefinition::new(ScriptKind::Lua, script))),
        ],
        executor,
    );

    let rows = service
        .select("users_with_orders", QueryParameter::new(json!({"dept": "eng"})))
        .unwrap();
    assert_eq!(rows.len(), 10);
    assert_eq!(rows[0]["spent"], json!(15));
    assert_eq!(rows[5]["spent"], json!(60));
    assert_eq!(rows[9]["spent"], json!(0));
}

#[test]
fn test_max_fetch_size_applies_to_fetch() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![
            orders_by_users(),
            users_with(orders_fetch().inject_into("orders").max_fetch_size(3)),
        ],
        executor,
    );

    let err = service
        .select("users_with_orders", QueryParameter::new(json!({"dept": "eng"})))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SizeExceeded);
    assert!(err.to_string().contains("orders_by_users"));
}

#[test]
fn test_self_reference_is_rejected() {
    let result = MappingBuilder::new()
        .query(
            QueryDefinition::new("loop", ScriptKind::Literal, "SELECT * FROM users")
                .fetch(FetchQueryDefinition::new("loop").inject_into("again")),
        )
        .build();
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Mapping);
    assert!(err.to_string().contains("references itself"));
}

#[test]
fn test_indirect_cycle_fails_at_runtime() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![
            QueryDefinition::new(
                "users_by_dept",
                ScriptKind::Literal,
                "SELECT * FROM users WHERE dept = :dept",
            )
            .fetch(orders_fetch().inject_into("orders")),
            orders_by_users().fetch(
                FetchQueryDefinition::new("users_by_dept")
                    .inject_into("buyers")
                    .parameter(
                        FetchQueryParameterDefinition::new("dept", ParameterSource::Constant)
                            .value(json!("eng")),
                    ),
            ),
        ],
        executor,
    );

    let err = service
        .select("users_by_dept", QueryParameter::new(json!({"dept": "eng"})))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FetchCycle);
    assert_eq!(
        err.to_string(),
        "Fetch cycle detected: users_by_dept -> orders_by_users -> users_by_dept"
    );
}
