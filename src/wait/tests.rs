//! Unit tests for the operation waiter.

use rstest::{fixture, rstest};
use tokio::time::Instant;

use super::*;
use crate::disk::{DiskService, DiskSpec};
use crate::identity::InstanceIdentity;
use crate::test_support::FakeDiskService;

#[fixture]
fn service() -> FakeDiskService {
    FakeDiskService::new(InstanceIdentity::new("proj", "zone-a", "node-1"))
}

async fn start(service: &FakeDiskService) -> Operation {
    let spec = DiskSpec {
        name: String::from("data"),
        size_gb: 10,
        disk_type: None,
    };
    service.create_disk(&spec).await.expect("create starts")
}

#[rstest]
#[case::first_poll(1)]
#[case::third_poll(3)]
#[case::late(40)]
#[tokio::test(start_paused = true)]
async fn returns_after_the_poll_that_reports_done(service: FakeDiskService, #[case] polls: u32) {
    service.set_polls_to_complete(Some(polls));
    let operation = start(&service).await;

    OperationWaiter::default()
        .wait(&service, &operation)
        .await
        .expect("operation completes");

    let made = service.status_polls();
    assert!(made >= polls && made <= polls + 1, "polled {made} times for {polls}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn never_finishing_operation_times_out_after_budget(service: FakeDiskService) {
    service.set_polls_to_complete(None);
    let operation = start(&service).await;
    let started = Instant::now();

    let err = OperationWaiter::default()
        .wait(&service, &operation)
        .await
        .expect_err("operation never completes");

    let elapsed = started.elapsed();
    assert!(elapsed >= OPERATION_WAIT_TIMEOUT, "gave up early after {elapsed:?}");
    assert!(elapsed < OPERATION_WAIT_TIMEOUT + OPERATION_POLL_INTERVAL * 2);
    assert_eq!(
        err,
        WaitError::Timeout {
            operation: operation.name.clone(),
            target: operation.target_link.clone(),
            timeout: OPERATION_WAIT_TIMEOUT,
        }
    );
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn status_fetch_failures_do_not_abort_the_wait(service: FakeDiskService) {
    service.set_polls_to_complete(Some(1));
    service.fail_status_polls(3);
    let operation = start(&service).await;

    OperationWaiter::default()
        .wait(&service, &operation)
        .await
        .expect("operation completes after transient errors");

    assert_eq!(service.status_polls(), 4);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn finished_operation_with_error_is_a_failure(service: FakeDiskService) {
    service.set_operation_error("QUOTA_EXCEEDED: disk quota exceeded");
    let operation = start(&service).await;

    let err = OperationWaiter::default()
        .wait(&service, &operation)
        .await
        .expect_err("operation failed remotely");

    assert!(matches!(
        err,
        WaitError::Failed { ref message, .. } if message.contains("QUOTA_EXCEEDED")
    ));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn custom_timing_bounds_the_wait(service: FakeDiskService) {
    service.set_polls_to_complete(None);
    let operation = start(&service).await;
    let waiter = OperationWaiter::new(Duration::from_millis(10), Duration::from_millis(50));

    let err = waiter
        .wait(&service, &operation)
        .await
        .expect_err("short budget elapses");

    assert!(matches!(err, WaitError::Timeout { timeout, .. } if timeout == waiter.timeout()));
    assert!(service.status_polls() <= 6);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stalled_status_poll_is_cut_off_at_the_deadline(service: FakeDiskService) {
    service.set_polls_to_complete(Some(1));
    service.delay_status_polls(Duration::from_secs(30));
    let operation = start(&service).await;
    let started = Instant::now();

    let err = OperationWaiter::default()
        .wait(&service, &operation)
        .await
        .expect_err("the only poll outlives the budget");

    let elapsed = started.elapsed();
    assert!(elapsed >= OPERATION_WAIT_TIMEOUT, "gave up early after {elapsed:?}");
    assert!(
        elapsed < OPERATION_WAIT_TIMEOUT + OPERATION_POLL_INTERVAL,
        "overran the budget: {elapsed:?}"
    );
    assert!(matches!(
        err,
        WaitError::Timeout { timeout, .. } if timeout == OPERATION_WAIT_TIMEOUT
    ));
    assert_eq!(service.status_polls(), 0);
}
