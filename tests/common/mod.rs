#![allow(dead_code)]

use async_trait::async_trait;
use receiver_source::{
    config::ReadConfig,
    extract::{OffsetFn, TimestampFn},
    factory::{from_fn, ReceiverFactory},
    receiver::{Receiver, Store},
};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What the receivers built by one factory have done so far.
#[derive(Debug, Clone, Default)]
pub struct Tally {
    pub lifetimes: Arc<AtomicUsize>,
    pub pushed: Arc<AtomicUsize>,
    pub stopped: Arc<AtomicUsize>,
    pub running: Arc<AtomicUsize>,
}

impl Tally {
    pub fn lifetimes(&self) -> usize {
        self.lifetimes.load(Ordering::SeqCst)
    }

    pub fn pushed(&self) -> usize {
        self.pushed.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Producer threads that have not exited yet.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }
}

/// Emits "0".."count" from its own thread every time it is started,
/// ignoring the start offset it is given. The first lifetime reports an
/// error right after storing offset `fail_after`, if set.
pub struct ScratchReceiver {
    count: u64,
    fail_after: Option<u64>,
    tally: Tally,
    producer: Option<(Arc<AtomicBool>, JoinHandle<()>)>,
}

#[async_trait]
impl Receiver<String> for ScratchReceiver {
    async fn on_start(
        &mut self,
        store: Store<String>,
    ) -> Result<(), anyhow::Error> {
        let first = self.tally.lifetimes.fetch_add(1, Ordering::SeqCst) == 0;
        let fail_after = self.fail_after.filter(|_| first);
        let count = self.count;
        let tally = self.tally.clone();
        let halt = Arc::new(AtomicBool::new(false));
        tally.running.fetch_add(1, Ordering::SeqCst);
        let thread = thread::spawn({
            let halt = Arc::clone(&halt);
            move || {
                for i in 0..count {
                    if halt.load(Ordering::SeqCst) || store.is_stopped() {
                        break;
                    }
                    if store.blocking_store(i.to_string()).is_err() {
                        break;
                    }
                    tally.pushed.fetch_add(1, Ordering::SeqCst);
                    if fail_after == Some(i) {
                        store.report_error(
                            "scratch receiver",
                            anyhow::anyhow!("connection reset"),
                        );
                        break;
                    }
                }
                while !halt.load(Ordering::SeqCst) && !store.is_stopped() {
                    thread::park_timeout(Duration::from_millis(5));
                }
                tally.running.fetch_sub(1, Ordering::SeqCst);
            }
        });
        self.producer = Some((halt, thread));
        Ok(())
    }

    async fn on_stop(&mut self) {
        if let Some((halt, thread)) = self.producer.take() {
            halt.store(true, Ordering::SeqCst);
            thread.thread().unpark();
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
        }
        self.tally.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn scratch_factory(
    count: u64,
    fail_after: Option<u64>,
) -> (impl ReceiverFactory<String> + Clone, Tally) {
    let tally = Tally::default();
    let factory = {
        let tally = tally.clone();
        from_fn(move || {
            Ok(ScratchReceiver {
                count,
                fail_after,
                tally: tally.clone(),
                producer: None,
            })
        })
    };
    (factory, tally)
}

pub fn parse_offset() -> OffsetFn<String> {
    OffsetFn::new(|record: &String| Ok(record.parse::<u64>()?))
}

pub fn config(factory: impl ReceiverFactory<String> + 'static) -> ReadConfig<String> {
    ReadConfig::new()
        .with_receiver_factory(factory)
        .unwrap()
        .with_offset_fn(parse_offset())
        .unwrap()
        .with_timestamp_fn(TimestampFn::arrival_time())
        .unwrap()
        .with_poll_timeout(Duration::from_millis(10))
        .unwrap()
        .with_restart_delay(Duration::from_millis(1))
}
