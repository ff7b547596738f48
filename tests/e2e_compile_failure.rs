//! A failing compile ends its job with one Error and frees the slot.

mod helpers;

use std::sync::Arc;

use buildfarm::backend::Record;
use buildfarm::{AdmissionQueue, JobRequest, JobVariant, Message};
use helpers::{
    Harness, Script, ScriptedCompiler, StaticResolver, is_compile_starting, is_store, read_until,
    terminal_count,
};
use tokio::sync::Semaphore;

const BROKEN: &str = "github.com/example/broken";
const NEXT: &str = "github.com/example/next";

#[tokio::test]
async fn compile_failure_reports_once_and_promotes_next_job() {
    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new(
        StaticResolver::new().with_package(BROKEN).with_package(NEXT),
        ScriptedCompiler::gated(Arc::clone(&gate))
            .script(BROKEN, Script::Fail("undefined: fmt.Prinln".into())),
        AdmissionQueue::new(1, 1),
    );

    let (mut broken, broken_done) = harness.connect(JobRequest::new(BROKEN, JobVariant::Standard));
    let mut broken_messages = read_until(&mut broken, is_compile_starting).await;

    let (mut next, next_done) = harness.connect(JobRequest::new(NEXT, JobVariant::Standard));
    assert_eq!(next.next_message().await, Some(Message::queue_position(1)));

    gate.add_permits(1);
    broken_messages.extend(broken.collect_messages().await);
    broken_done.await.unwrap();

    assert_eq!(terminal_count(&broken_messages), 1, "{broken_messages:?}");
    assert!(
        !broken_messages.iter().any(is_store),
        "a failed compile must not reach the store phase: {broken_messages:?}"
    );
    match broken_messages.last() {
        Some(Message::Error(report)) => {
            assert_eq!(report.path, BROKEN);
            assert!(
                report.message.contains("undefined: fmt.Prinln"),
                "compiler output should reach the client: {}",
                report.message
            );
        }
        other => panic!("expected a final Error, got {other:?}"),
    }
    assert!(harness.blobs().is_empty(), "nothing should be published");

    let records = harness.records();
    assert!(
        matches!(records.as_slice(), [Record::Error(record)] if record.path == BROKEN),
        "the failure should be recorded once: {records:?}"
    );

    assert_eq!(
        read_until(&mut next, |m| m == &Message::queue_done()).await,
        vec![Message::queue_done()],
        "the waiting job should be promoted"
    );
    gate.add_permits(1);
    let next_messages = next.collect_messages().await;
    assert!(matches!(next_messages.last(), Some(Message::Complete(_))));
    next_done.await.unwrap();
}

#[tokio::test]
async fn unknown_package_fails_in_download() {
    let harness = Harness::new(
        StaticResolver::new(),
        ScriptedCompiler::new(),
        AdmissionQueue::new(1, 1),
    );

    let (mut peer, done) = harness.connect(JobRequest::new("github.com/nobody/here", JobVariant::Standard));
    let messages = peer.collect_messages().await;
    done.await.unwrap();

    assert_eq!(
        messages.last(),
        Some(&Message::error(
            "github.com/nobody/here",
            "package github.com/nobody/here not found"
        ))
    );
    assert_eq!(harness.compiler().calls(), 0);
}

#[tokio::test]
async fn record_store_failure_is_reported_but_not_recorded() {
    let harness = Harness::new(
        StaticResolver::new().with_package(NEXT),
        ScriptedCompiler::new(),
        AdmissionQueue::new(1, 1),
    );
    harness
        .service
        .backend()
        .records
        .fail_with("disk full");

    let (mut peer, done) = harness.connect(JobRequest::new(NEXT, JobVariant::Standard));
    let messages = peer.collect_messages().await;
    done.await.unwrap();

    match messages.last() {
        Some(Message::Error(report)) => assert!(
            report.message.contains("disk full"),
            "unexpected message: {}",
            report.message
        ),
        other => panic!("expected Error, got {other:?}"),
    }
    assert!(harness.records().is_empty());
}
