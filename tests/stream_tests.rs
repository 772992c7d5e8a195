//! Streaming over repeated forwards, with retry and keyset revision.

mod common;

use std::cell::{Cell, RefCell};
use std::sync::Arc;
use std::time::Duration;

use common::{create_service, seeded_executor};
use namedql::mapping::QueryDefinition;
use namedql::{Backoff, ErrorKind, QueryParameter, Row, ScriptKind};
use serde_json::json;

fn users_by_dept() -> QueryDefinition {
    QueryDefinition::new(
        "users_by_dept",
        ScriptKind::Literal,
        "SELECT * FROM users WHERE dept = :dept",
    )
}

fn eng(limit: usize) -> QueryParameter {
    QueryParameter::new(json!({"dept": "eng"})).with_limit(limit)
}

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter().filter_map(|r| r["id"].as_i64()).collect()
}

#[test]
fn test_stream_reads_every_batch() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(vec![users_by_dept()], executor.clone());

    let mut stream = service.stream("users_by_dept", eng(4));
    let rows = stream.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(ids(&rows), (1..=10).collect::<Vec<_>>());
    assert_eq!(stream.batches(), 3);
    assert!(stream.is_closed());

    let statements: Vec<_> = executor.calls().into_iter().map(|c| c.statement).collect();
    assert_eq!(
        statements,
        vec![
            "SELECT * FROM users WHERE dept = ? LIMIT 5",
            "SELECT * FROM users WHERE dept = ? LIMIT 5 OFFSET 4",
            "SELECT * FROM users WHERE dept = ? LIMIT 5 OFFSET 8",
        ]
    );
}

#[test]
fn test_stream_uses_configured_batch_size() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(vec![users_by_dept()], executor.clone());

    let rows = service
        .stream("users_by_dept", QueryParameter::new(json!({"dept": "ops"})))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(rows.len(), 7);
    // Default batch size is 16, so a single forward suffices
    assert_eq!(executor.calls().len(), 1);
}

#[test]
fn test_empty_stream() {
    let service = create_service(vec![users_by_dept()], Arc::new(seeded_executor()));
    let mut stream = service.stream("users_by_dept", QueryParameter::new(json!({"dept": "hr"})));
    assert!(stream.next().is_none());
    assert!(stream.is_closed());
    assert!(stream.next().is_none());
}

#[test]
fn test_stream_retries_transient_failure() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(vec![users_by_dept()], executor.clone());
    let delays = RefCell::new(Vec::new());
    executor.fail_next(1);

    let mut stream = service
        .stream("users_by_dept", eng(4))
        .retry(2, Backoff::Fixed(Duration::from_millis(25)))
        .sleep_with(|d| delays.borrow_mut().push(d));
    let rows = stream.by_ref().collect::<Result<Vec<_>, _>>().unwrap();

    assert_eq!(rows.len(), 10);
    assert_eq!(stream.failures(), 0);
    assert_eq!(stream.total_retries(), 1);
    drop(stream);
    assert_eq!(*delays.borrow(), vec![Duration::from_millis(25)]);
}

#[test]
fn test_stream_gives_up_after_retries() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(vec![users_by_dept()], executor.clone());
    let delays = RefCell::new(Vec::new());
    executor.fail_next(5);

    let backoff = Backoff::Exponential {
        base: Duration::from_millis(10),
        max: Duration::from_secs(1),
    };
    let mut stream = service
        .stream("users_by_dept", eng(4))
        .retry(2, backoff)
        .sleep_with(|d| delays.borrow_mut().push(d));

    let err = stream.next().unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(stream.next().is_none());
    assert_eq!(stream.total_retries(), 2);
    assert_eq!(executor.calls().len(), 3);
    drop(stream);
    assert_eq!(
        *delays.borrow(),
        vec![Duration::from_millis(10), Duration::from_millis(20)]
    );
}

#[test]
fn test_stream_without_retry_fails_fast() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(vec![users_by_dept()], executor.clone());
    executor.fail_next(1);

    let mut stream = service.stream("users_by_dept", eng(4));
    assert!(stream.next().unwrap().is_err());
    assert!(stream.is_closed());
    assert_eq!(executor.calls().len(), 1);
}

#[test]
fn test_stream_aborts_on_listed_kinds() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(vec![users_by_dept()], executor.clone());
    executor.fail_next(1);

    let mut stream = service
        .stream("users_by_dept", eng(4))
        .retry(3, Backoff::Fixed(Duration::ZERO))
        .abort_on([ErrorKind::Execution]);
    assert!(stream.next().unwrap().is_err());
    assert_eq!(stream.total_retries(), 0);
    assert_eq!(executor.calls().len(), 1);
}

#[test]
fn test_keyset_reviser() {
    let executor = Arc::new(seeded_executor());
    let service = create_service(
        vec![QueryDefinition::new(
            "users_after",
            ScriptKind::Literal,
            "SELECT * FROM users WHERE dept = :dept AND id > :after",
        )],
        executor.clone(),
    );

    let parameter = QueryParameter::new(json!({"dept": "eng", "after": 0})).with_limit(3);
    let rows = service
        .stream("users_after", parameter)
        .revise_with(|p, last| {
            if let Some(criteria) = p.criteria.as_object_mut() {
                criteria.insert("after".to_string(), last["id"].clone());
            }
        })
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(ids(&rows), (1..=10).collect::<Vec<_>>());

    let calls = executor.calls();
    assert_eq!(calls.len(), 4);
    for call in &calls {
        assert!(!call.statement.contains("OFFSET"));
    }
    let cursors: Vec<_> = calls.iter().map(|c| c.args[1].clone()).collect();
    assert_eq!(cursors, vec![json!(0), json!(3), json!(6), json!(9)]);
}

#[test]
fn test_terminator_and_close_hook() {
    let service = create_service(vec![users_by_dept()], Arc::new(seeded_executor()));
    let closed = Cell::new(0);

    let mut stream = service
        .stream("users_by_dept", eng(3))
        .terminate_when(|row| row["id"] == json!(5))
        .on_close(|| closed.set(closed.get() + 1));
    let rows = stream.by_ref().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(ids(&rows), vec![1, 2, 3, 4]);
    assert!(stream.is_closed());

    stream.close();
    drop(stream);
    assert_eq!(closed.get(), 1);
}
