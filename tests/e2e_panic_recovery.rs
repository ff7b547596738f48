//! A panicking collaborator is reported as an error and returns its slot.

mod helpers;

use buildfarm::backend::Record;
use buildfarm::{AdmissionQueue, JobRequest, JobVariant, Message};
use helpers::{Harness, Script, ScriptedCompiler, StaticResolver, terminal_count};

const PANICS: &str = "github.com/example/panics";
const FINE: &str = "github.com/example/fine";

#[tokio::test]
async fn compiler_panic_is_reported_and_recorded() {
    let harness = Harness::new(
        StaticResolver::new().with_package(PANICS).with_package(FINE),
        ScriptedCompiler::new().script(PANICS, Script::Panic("index out of range".into())),
        AdmissionQueue::new(1, 0),
    );

    let (mut peer, done) = harness.connect(JobRequest::new(PANICS, JobVariant::Standard));
    let messages = peer.collect_messages().await;
    done.await.unwrap();

    assert_eq!(terminal_count(&messages), 1, "{messages:?}");
    assert_eq!(
        messages.last(),
        Some(&Message::error(PANICS, "panic recovered: index out of range"))
    );

    let records = harness.records();
    assert!(
        matches!(
            records.as_slice(),
            [Record::Error(record)] if record.error == "panic recovered: index out of range"
        ),
        "{records:?}"
    );

    // With no backlog allowed, this only succeeds if the panicking job
    // returned its slot.
    let (mut peer, done) = harness.connect(JobRequest::new(FINE, JobVariant::Standard));
    let messages = peer.collect_messages().await;
    done.await.unwrap();
    assert!(
        matches!(messages.last(), Some(Message::Complete(complete)) if complete.short == "example/fine"),
        "{messages:?}"
    );
}
