use async_trait::async_trait;
use log::{debug, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    extract::OffsetFn,
    factory::{from_fn, ReceiverFactory},
    models::{Offset, Record},
    receiver::{Receiver, Store},
};

use super::before_start;

const IDLE_PARK_MS: u64 = 10;

/// Makes the first receiver instance that is started fail after it has
/// stored a given number of records. Clones share the plan, so it fires
/// once across all instances built from the same template.
#[derive(Debug, Clone)]
pub struct FailurePlan {
    after: usize,
    fired: Arc<AtomicBool>,
}

impl FailurePlan {
    pub fn after(records: usize) -> Self {
        FailurePlan {
            after: records,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn arm(&self) -> Option<usize> {
        match self.fired.swap(true, Ordering::SeqCst) {
            false => Some(self.after),
            true => None,
        }
    }
}

struct Producer {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// A receiver that replays a list of records on its own OS thread, the
/// way receivers wrapping a blocking client library do. After the list is
/// exhausted it stays alive without producing until it is stopped.
pub struct MemoryReceiver<T> {
    records: Arc<Vec<T>>,
    offset_fn: OffsetFn<T>,
    start_offset: Offset,
    failure: Option<FailurePlan>,
    producer: Option<Producer>,
}

impl<T: Record + Clone> MemoryReceiver<T> {
    pub fn new(records: Vec<T>, offset_fn: OffsetFn<T>) -> Self {
        MemoryReceiver {
            records: Arc::new(records),
            offset_fn,
            start_offset: 0,
            failure: None,
            producer: None,
        }
    }

    pub fn fail_after(self, plan: FailurePlan) -> Self {
        MemoryReceiver {
            failure: Some(plan),
            ..self
        }
    }

    /// A factory handing out fresh copies of this receiver.
    pub fn into_factory(self) -> impl ReceiverFactory<T> + Clone {
        let template = Template(Arc::new(self));
        from_fn(move || Ok(template.instance()))
    }
}

#[derive(Clone)]
struct Template<T>(Arc<MemoryReceiver<T>>);

impl<T: Record + Clone> Template<T> {
    fn instance(&self) -> MemoryReceiver<T> {
        MemoryReceiver {
            records: Arc::clone(&self.0.records),
            offset_fn: self.0.offset_fn.clone(),
            start_offset: self.0.start_offset,
            failure: self.0.failure.clone(),
            producer: None,
        }
    }
}

fn produce<T: Record + Clone>(
    records: Arc<Vec<T>>,
    offset_fn: OffsetFn<T>,
    start_offset: Offset,
    fail_after: Option<usize>,
    store: Store<T>,
    stop: Arc<AtomicBool>,
) {
    let mut stored = 0;
    for record in records.iter() {
        if stop.load(Ordering::SeqCst) || store.is_stopped() {
            return;
        }
        if before_start(&offset_fn, record, start_offset) {
            continue;
        }
        if fail_after == Some(stored) {
            store.report_error(
                "memory receiver",
                anyhow::anyhow!("injected failure after {stored} records"),
            );
            return;
        }
        if store.blocking_store(record.clone()).is_err() {
            return;
        }
        stored += 1;
    }
    debug!("memory receiver replayed {stored} records");
    while !stop.load(Ordering::SeqCst) && !store.is_stopped() {
        thread::park_timeout(Duration::from_millis(IDLE_PARK_MS));
    }
}

#[async_trait]
impl<T: Record + Clone> Receiver<T> for MemoryReceiver<T> {
    fn set_start_offset(&mut self, offset: Offset) {
        self.start_offset = offset;
    }

    async fn on_start(&mut self, store: Store<T>) -> Result<(), anyhow::Error> {
        let records = Arc::clone(&self.records);
        let offset_fn = self.offset_fn.clone();
        let start_offset = self.start_offset;
        let fail_after = self.failure.as_ref().and_then(FailurePlan::arm);
        let stop = Arc::new(AtomicBool::new(false));
        let thread = thread::Builder::new()
            .name("memory-receiver".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                move || {
                    produce(records, offset_fn, start_offset, fail_after, store, stop)
                }
            })?;
        self.producer = Some(Producer { stop, thread });
        Ok(())
    }

    async fn on_stop(&mut self) {
        let Some(Producer { stop, thread }) = self.producer.take() else {
            return;
        };
        stop.store(true, Ordering::SeqCst);
        thread.thread().unpark();
        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("memory receiver thread panicked"),
            Err(error) => warn!("could not join memory receiver thread: {error}"),
        }
    }
}
