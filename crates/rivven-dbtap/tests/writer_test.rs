//! Integration tests for the batched writer

mod common;

use common::{user, users, Event, MockDriver};
use rivven_dbtap::prelude::*;
use std::sync::Arc;

fn sink(driver: &MockDriver, batch_size: usize) -> SinkAdapter {
    SinkAdapter::builder(driver.factory(), Arc::new(users()))
        .batch_size(NonZeroUsize::new(batch_size).unwrap())
        .build()
        .unwrap()
}

async fn writer(driver: &MockDriver, batch_size: usize) -> BatchWriter<Vec<Value>> {
    let binder: Arc<dyn StatementBinder<Vec<Value>>> = Arc::new(ValuesBinder);
    sink(driver, batch_size)
        .new_writer(&ExecutionContext::Task { partition: 0 }, binder)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_writer_opens_without_autocommit() {
    let driver = MockDriver::new();
    let writer = writer(&driver, 3).await;

    assert_eq!(writer.state(), WriterState::Open);
    assert_eq!(writer.sql(), "INSERT INTO users (id,name) VALUES (?,?);");
    assert_eq!(
        driver.events(),
        vec![
            Event::Open,
            Event::AutoCommit(false),
            Event::Prepare("INSERT INTO users (id,name) VALUES (?,?);".into()),
        ]
    );
}

#[tokio::test]
async fn test_flushes_at_threshold_and_on_close() {
    let driver = MockDriver::new();
    let mut writer = writer(&driver, 3).await;

    for id in 1..=7 {
        writer.write(&user(id, "ada")).await.unwrap();
    }
    assert_eq!(driver.batches(), vec![3, 3]);
    assert_eq!(writer.pending(), 1);
    assert_eq!(writer.total(), 7);
    assert_eq!(driver.commits(), 0);

    writer.close().await.unwrap();

    assert_eq!(driver.batches(), vec![3, 3, 1]);
    assert_eq!(driver.commits(), 1);
    assert_eq!(driver.closes(), 1);
    assert_eq!(writer.flushes(), 3);
    assert_eq!(writer.state(), WriterState::Closed);
    assert_eq!(writer.last_result(), Some(&WriteResult::Success));
    assert_eq!(driver.committed_rows("users").len(), 7);
}

#[tokio::test]
async fn test_exact_multiple_needs_no_final_flush() {
    let driver = MockDriver::new();
    let mut writer = writer(&driver, 4).await;

    for id in 0..12 {
        writer.write(&user(id, "x")).await.unwrap();
    }
    writer.close().await.unwrap();

    assert_eq!(driver.batches(), vec![4, 4, 4]);
    assert_eq!(writer.flushes(), 3);
    assert_eq!(driver.commits(), 1);
}

#[tokio::test]
async fn test_rows_in_submission_order() {
    let driver = MockDriver::new();
    let mut writer = writer(&driver, 2).await;

    for id in 0..5 {
        writer.write(&user(id, "x")).await.unwrap();
    }
    writer.close().await.unwrap();

    let ids: Vec<i64> = driver
        .committed_rows("users")
        .iter()
        .filter_map(|row| row[0].as_i64())
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_explicit_flush_does_not_commit() {
    let driver = MockDriver::new();
    let mut writer = writer(&driver, 100).await;

    writer.write(&user(1, "ada")).await.unwrap();
    writer.write(&user(2, "bob")).await.unwrap();
    writer.flush().await.unwrap();

    assert_eq!(driver.batches(), vec![2]);
    assert_eq!(writer.pending(), 0);
    assert_eq!(driver.commits(), 0);
    assert!(driver.committed_rows("users").is_empty());

    writer.close().await.unwrap();
    assert_eq!(driver.batches(), vec![2]);
    assert_eq!(driver.committed_rows("users").len(), 2);
}

#[tokio::test]
async fn test_arity_mismatch_is_bind_error() {
    let driver = MockDriver::new();
    let mut writer = writer(&driver, 3).await;

    let err = writer.write(&vec![Value::from(1i64)]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bind);
    assert_eq!(writer.pending(), 0);
    assert_eq!(writer.total(), 0);

    writer.write(&user(1, "ada")).await.unwrap();
    assert_eq!(writer.pending(), 1);
}

#[tokio::test]
async fn test_binder_error_does_not_advance_batch() {
    let driver = MockDriver::new();
    let binder = |name: &str, params: &mut Parameters| -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_argument("empty name"));
        }
        params.push(name.len() as i64);
        params.push(name);
        Ok(())
    };
    let binder: Arc<dyn StatementBinder<str>> = Arc::new(binder);
    let mut writer = sink(&driver, 3)
        .new_writer(&ExecutionContext::Task { partition: 1 }, binder)
        .await
        .unwrap();

    writer.write("ada").await.unwrap();
    let err = writer.write("").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Bind);
    assert_eq!(writer.pending(), 1);

    writer.close().await.unwrap();
    assert_eq!(driver.committed_rows("users").len(), 1);
}

#[tokio::test]
async fn test_batch_failure_rolls_back_and_keeps_pending() {
    let driver = MockDriver::new();
    driver.configure(|s| s.fail_batch_at = Some(2));
    let mut writer = writer(&driver, 3).await;

    for id in 0..5 {
        writer.write(&user(id, "x")).await.unwrap();
    }
    let err = writer.write(&user(5, "x")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BatchExecution);
    assert_eq!(err.attempted(), Some(3));
    assert_eq!(writer.pending(), 3);
    assert_eq!(writer.state(), WriterState::Failed);
    assert_eq!(driver.rollbacks(), 1);
    assert_eq!(
        err.to_string(),
        "unable to execute batch [length: 46][stmts: 3]: duplicate key value violates unique constraint"
    );
    match writer.last_result() {
        Some(WriteResult::Failed {
            kind, attempted, ..
        }) => {
            assert_eq!(*kind, ErrorKind::BatchExecution);
            assert_eq!(*attempted, 3);
        }
        other => panic!("unexpected last result: {:?}", other),
    }
}

#[tokio::test]
async fn test_long_driver_message_is_truncated() {
    let driver = MockDriver::new();
    let message = "e".repeat(200);
    driver.configure(|s| {
        s.fail_batch_at = Some(1);
        s.batch_error = message.clone();
    });
    let mut writer = writer(&driver, 1).await;

    let err = writer.write(&user(1, "ada")).await.unwrap_err();
    match err {
        Error::BatchExecution {
            attempted,
            total,
            message_length,
            message,
        } => {
            assert_eq!(attempted, 1);
            assert_eq!(total, 1);
            assert_eq!(message_length, 200);
            assert_eq!(message.len(), 75);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_rollback_failure_is_swallowed() {
    let driver = MockDriver::new();
    driver.configure(|s| {
        s.fail_batch_at = Some(1);
        s.fail_rollback = true;
    });
    let mut writer = writer(&driver, 1).await;

    let err = writer.write(&user(1, "ada")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BatchExecution);
}

#[tokio::test]
async fn test_operations_after_failure() {
    let driver = MockDriver::new();
    driver.configure(|s| s.fail_batch_at = Some(1));
    let mut writer = writer(&driver, 2).await;

    writer.write(&user(1, "a")).await.unwrap();
    let first = writer.write(&user(2, "b")).await.unwrap_err();

    let err = writer.write(&user(3, "c")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    let err = writer.flush().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);

    let closed = writer.close().await.unwrap_err();
    assert_eq!(closed.to_string(), first.to_string());
    assert_eq!(driver.commits(), 0);
    assert_eq!(driver.batches(), Vec::<usize>::new());
    assert_eq!(driver.closes(), 1);
    assert!(driver.committed_rows("users").is_empty());
}

#[tokio::test]
async fn test_close_is_memoized() {
    let driver = MockDriver::new();
    let mut writer = writer(&driver, 10).await;

    writer.write(&user(1, "ada")).await.unwrap();
    writer.close().await.unwrap();
    writer.close().await.unwrap();

    assert_eq!(driver.commits(), 1);
    assert_eq!(driver.closes(), 1);
    assert_eq!(driver.count(|e| *e == Event::StatementClose), 1);

    let err = writer.write(&user(2, "bob")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IllegalState);
}

#[tokio::test]
async fn test_failed_close_is_memoized() {
    let driver = MockDriver::new();
    driver.configure(|s| s.fail_commit = true);
    let mut writer = writer(&driver, 10).await;

    writer.write(&user(1, "ada")).await.unwrap();
    let first = writer.close().await.unwrap_err();
    let second = writer.close().await.unwrap_err();

    assert_eq!(first.kind(), ErrorKind::Commit);
    assert_eq!(first.attempted(), Some(1));
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(driver.rollbacks(), 1);
    assert_eq!(driver.closes(), 1);
    assert!(driver.committed_rows("users").is_empty());
}

#[tokio::test]
async fn test_close_failure_after_commit() {
    let driver = MockDriver::new();
    driver.configure(|s| s.fail_close = true);
    let mut writer = writer(&driver, 10).await;

    writer.write(&user(1, "ada")).await.unwrap();
    let err = writer.close().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionClose);
    assert_eq!(driver.commits(), 1);
    assert_eq!(driver.committed_rows("users").len(), 1);
}

#[tokio::test]
async fn test_close_failure_hidden_by_earlier_error() {
    let driver = MockDriver::new();
    driver.configure(|s| {
        s.fail_commit = true;
        s.fail_close = true;
    });
    let mut writer = writer(&driver, 10).await;

    writer.write(&user(1, "ada")).await.unwrap();
    let err = writer.close().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Commit);
}

#[tokio::test]
async fn test_empty_writer_commits_nothing() {
    let driver = MockDriver::new();
    let mut writer = writer(&driver, 10).await;

    writer.close().await.unwrap();
    assert!(driver.batches().is_empty());
    assert_eq!(driver.commits(), 1);
    assert_eq!(driver.closes(), 1);
}

#[tokio::test]
async fn test_dropped_writer_discards_uncommitted_rows() {
    let driver = MockDriver::new();
    {
        let mut writer = writer(&driver, 2).await;
        for id in 0..3 {
            writer.write(&user(id, "x")).await.unwrap();
        }
    }

    assert_eq!(driver.batches(), vec![2]);
    assert_eq!(driver.commits(), 0);
    assert!(driver.committed_rows("users").is_empty());
}

mod cadence {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn flushes_every_batch_size_records(batch_size in 1usize..16, records in 0usize..64) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let driver = MockDriver::new();

            rt.block_on(async {
                let mut writer = writer(&driver, batch_size).await;
                for id in 0..records {
                    writer.write(&user(id as i64, "x")).await.unwrap();
                }
                prop_assert_eq!(writer.flushes() as usize, records / batch_size);
                prop_assert_eq!(writer.pending() as usize, records % batch_size);
                writer.close().await.unwrap();
                Ok::<(), TestCaseError>(())
            })?;

            let batches = driver.batches();
            prop_assert_eq!(batches.iter().sum::<usize>(), records);
            prop_assert!(batches.iter().all(|&n| n > 0 && n <= batch_size));
            prop_assert_eq!(driver.commits(), 1);
            prop_assert_eq!(driver.committed_rows("users").len(), records);
        }
    }
}
