mod common;

use common::{config, init_logging, parse_offset, scratch_factory};
use receiver_source::{
    checkpoint::CheckpointMark,
    config::ReadConfig,
    error::{ConfigurationError, ReadError, ValidationError},
    extract::TimestampFn,
    factory::FnReceiverFactory,
    reader::{ReaderState, SourceReader},
    receivers::memory::{FailurePlan, MemoryReceiver},
};
use std::{collections::HashSet, time::Duration};

const RECORDS: u64 = 100;

type NoFactory =
    FnReceiverFactory<fn() -> Result<MemoryReceiver<String>, anyhow::Error>>;

/// Advances until `count` records were delivered, collecting their values
/// and offsets.
async fn collect(
    reader: &mut SourceReader<String>,
    count: usize,
) -> Vec<(String, u64)> {
    let mut delivered = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), async {
        while delivered.len() < count {
            if reader.advance().await.unwrap() {
                delivered.push((
                    reader.current().unwrap().clone(),
                    reader.current_record_id().unwrap(),
                ));
            }
        }
    })
    .await
    .expect("reader should deliver the expected records in time");
    delivered
}

/// Keeps advancing for a while and fails if anything else is delivered.
async fn assert_nothing_more(reader: &mut SourceReader<String>) {
    for _ in 0..10 {
        assert!(!reader.advance().await.unwrap(), "unexpected extra record");
    }
}

fn expected_values() -> HashSet<String> {
    (0..RECORDS).map(|i| i.to_string()).collect()
}

/// Mirrors a consumer that only accepts values it expects, each once.
fn drain_expected(delivered: &[(String, u64)]) -> HashSet<String> {
    let mut expected = expected_values();
    for (value, _) in delivered {
        assert!(expected.remove(value), "unexpected or duplicate record {value}");
    }
    expected
}

#[test]
fn setters_reject_absent_components() {
    let base = ReadConfig::<String>::new();
    assert!(matches!(
        base.clone().with_receiver_factory::<NoFactory>(None),
        Err(ConfigurationError::MissingArgument(_))
    ));
    assert!(matches!(
        base.clone().with_offset_fn(None),
        Err(ConfigurationError::MissingArgument(_))
    ));
    assert!(matches!(
        base.with_timestamp_fn(None),
        Err(ConfigurationError::MissingArgument(_))
    ));
}

#[test]
fn validation_requires_factory_and_offset_fn() {
    let (factory, _) = scratch_factory(RECORDS, None);

    let without_factory = ReadConfig::<String>::new()
        .with_offset_fn(parse_offset())
        .unwrap()
        .with_timestamp_fn(TimestampFn::arrival_time())
        .unwrap();
    assert!(matches!(
        without_factory.validate(),
        Err(ValidationError::Missing(_))
    ));

    let without_offset_fn = ReadConfig::<String>::new()
        .with_receiver_factory(factory.clone())
        .unwrap();
    assert!(matches!(
        without_offset_fn.validate(),
        Err(ValidationError::Missing(_))
    ));
    assert!(without_offset_fn.create_reader(None).is_err());

    let without_timestamp_fn = without_offset_fn.with_offset_fn(parse_offset()).unwrap();
    assert!(without_timestamp_fn.validate().is_ok());
}

#[tokio::test]
async fn healthy_receiver_delivers_every_record_once() {
    init_logging();
    let (factory, tally) = scratch_factory(RECORDS, None);
    let mut reader = config(factory).create_reader(None).unwrap();
    reader.start().await.unwrap();

    let delivered = collect(&mut reader, RECORDS as usize).await;
    assert_nothing_more(&mut reader).await;
    reader.close().await;

    assert!(drain_expected(&delivered).is_empty());
    assert_eq!(tally.lifetimes(), 1);
    assert_eq!(reader.checkpoint_mark(), CheckpointMark::at(RECORDS - 1));
}

#[tokio::test]
async fn failure_in_the_middle_is_reread_without_duplicates() {
    init_logging();
    let (factory, tally) = scratch_factory(RECORDS, Some(50));
    let mut reader = config(factory).create_reader(None).unwrap();
    reader.start().await.unwrap();

    let delivered = collect(&mut reader, RECORDS as usize).await;
    assert_nothing_more(&mut reader).await;
    reader.close().await;

    assert!(drain_expected(&delivered).is_empty());
    let offsets: Vec<u64> = delivered.iter().map(|(_, offset)| *offset).collect();
    assert_eq!(offsets, (0..RECORDS).collect::<Vec<_>>());
    assert_eq!(tally.lifetimes(), 2);
    assert_eq!(tally.stopped(), 2);
}

#[tokio::test]
async fn resuming_receiver_is_reread_without_duplicates() {
    init_logging();
    let records = (0..RECORDS).map(|i| i.to_string()).collect();
    let plan = FailurePlan::after(50);
    let receiver = MemoryReceiver::new(records, parse_offset()).fail_after(plan.clone());
    let mut reader = config(receiver.into_factory()).create_reader(None).unwrap();
    reader.start().await.unwrap();

    let delivered = collect(&mut reader, RECORDS as usize).await;
    assert_nothing_more(&mut reader).await;
    reader.close().await;

    assert!(plan.has_fired());
    assert!(drain_expected(&delivered).is_empty());
}

#[tokio::test]
async fn resume_from_checkpoint_never_redelivers() {
    init_logging();
    for k in [0, 37, RECORDS - 2] {
        let (factory, _) = scratch_factory(RECORDS, None);
        let mut reader = config(factory)
            .create_reader(Some(CheckpointMark::at(k)))
            .unwrap();
        reader.start().await.unwrap();

        let delivered = collect(&mut reader, (RECORDS - k - 1) as usize).await;
        assert_nothing_more(&mut reader).await;
        reader.close().await;

        assert!(delivered.iter().all(|(_, offset)| *offset > k));
        assert_eq!(delivered.first().map(|(_, offset)| *offset), Some(k + 1));
    }
}

#[tokio::test]
async fn full_buffer_blocks_the_producer() {
    init_logging();
    const CAPACITY: usize = 4;
    let (factory, tally) = scratch_factory(RECORDS, None);
    let mut reader = config(factory)
        .with_buffer_capacity(CAPACITY)
        .unwrap()
        .create_reader(None)
        .unwrap();
    reader.start().await.unwrap();

    // Nobody pulls: the producer fills the buffer and blocks.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tally.pushed(), CAPACITY);

    let mut delivered = 0;
    while delivered < RECORDS as usize {
        if reader.advance().await.unwrap() {
            delivered += 1;
            assert!(tally.pushed() <= delivered + CAPACITY);
            // A slow consumer.
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tally.pushed(), RECORDS as usize);
    reader.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_during_advance_stops_the_producer() {
    init_logging();
    let (factory, tally) = scratch_factory(2, None);
    let mut reader = config(factory)
        .with_poll_timeout(Duration::from_secs(30))
        .unwrap()
        .create_reader(None)
        .unwrap();
    reader.start().await.unwrap();
    assert_eq!(collect(&mut reader, 2).await.len(), 2);

    // The producer is idle now, so this advance waits for the full poll.
    let close = reader.close_handle();
    let in_flight = tokio::spawn(async move {
        let result = reader.advance().await;
        (reader, result)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!in_flight.is_finished());

    tokio::time::timeout(Duration::from_secs(5), close.close())
        .await
        .expect("close should not deadlock with an in-flight advance");
    assert!(close.is_closed());
    assert_eq!(tally.running(), 0);
    assert_eq!(tally.stopped(), 1);

    let (mut reader, result) =
        tokio::time::timeout(Duration::from_secs(5), in_flight)
            .await
            .expect("in-flight advance should return after close")
            .unwrap();
    assert!(matches!(result, Err(ReadError::Closed)));
    assert!(matches!(reader.advance().await, Err(ReadError::Closed)));
    assert_eq!(reader.state().await, ReaderState::Closed);
}

#[tokio::test]
async fn malformed_record_terminates_the_read() {
    init_logging();
    let records = vec!["0".to_string(), "one".to_string(), "2".to_string()];
    let receiver = MemoryReceiver::new(records, parse_offset());
    let mut reader = ReadConfig::<String>::new()
        .with_receiver_factory(receiver.into_factory())
        .unwrap()
        .with_offset_fn(parse_offset())
        .unwrap()
        .create_reader(None)
        .unwrap();
    reader.start().await.unwrap();
    assert_eq!(collect(&mut reader, 1).await, vec![("0".to_string(), 0)]);

    let error = loop {
        match reader.advance().await {
            Ok(_) => continue,
            Err(error) => break error,
        }
    };
    match &error {
        ReadError::MalformedRecord { raw, .. } => assert!(raw.contains("one")),
        other => panic!("expected a malformed record error, got {other:?}"),
    }
    assert!(matches!(reader.state().await, ReaderState::Failed(_)));
    assert!(matches!(reader.advance().await, Err(ReadError::Failed(_))));
}
