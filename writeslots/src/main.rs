mod cfg;
mod panic;

use crate::cfg::load_cfg;
use crate::panic::set_up_panic_hook;
use itertools::Itertools;
use libwriteslots::LogAppender;
use libwriteslots::Metrics;
use libwriteslots::Reservation;
use libwriteslots::SyncLoop;
use parking_lot::Mutex;
use rand::thread_rng;
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use stochastic_queue::mpmc_sync::stochastic_channel;
use stochastic_queue::mpmc_sync::StochasticMpmcRecvError;
use tokio::spawn;
use tokio::task::yield_now;
use tokio::time::sleep;
use tracing::info;

enum Task {
  Write { len: u64 },
  // Completions go back through the stochastic channel so they are processed in a random order relative to reservation.
  Complete { reservation: Reservation },
}

#[derive(Default)]
struct TaskProgress {
  reserved: AtomicU64,
  completed: AtomicU64,
}

#[tokio::main]
async fn main() {
  let cfg = load_cfg();
  if cfg.log_json {
    tracing_subscriber::fmt().json().init();
  } else {
    tracing_subscriber::fmt::init();
  };
  assert!(cfg.max_write_size > 0, "max write size must be positive");
  info!(
    slots = cfg.slots,
    writes = cfg.writes,
    max_write_size = cfg.max_write_size,
    concurrency = cfg.concurrency,
    sync_delay_us = cfg.sync_delay.as_micros() as u64,
    "config loaded"
  );

  let metrics = Arc::new(Metrics::default());
  let appender = Arc::new(LogAppender::new(cfg.slots, 0, metrics.clone()));
  set_up_panic_hook(Arc::downgrade(&appender));
  // Begin offsets of regions that have been reserved but not completed. Writes are never empty, so begins are unique.
  let pending = Arc::new(Mutex::new(BTreeSet::<u64>::new()));

  let sync_loop = spawn({
    let position = appender.subscribe_position();
    let pending = pending.clone();
    let sync_loop = SyncLoop::new(cfg.sync_delay, metrics.clone());
    async move {
      sync_loop
        .start(position, |position| {
          if let Some(&oldest) = pending.lock().first() {
            assert!(
              position <= oldest,
              "syncing up to {position} while write at {oldest} is still pending"
            );
          };
          async {}
        })
        .await
    }
  });

  let (tasks_sender, tasks_receiver) = stochastic_channel::<Task>();
  for _ in 0..cfg.writes {
    let len = thread_rng().gen_range(1..=cfg.max_write_size);
    tasks_sender.send(Task::Write { len }).unwrap();
  }

  let progress = Arc::new(TaskProgress::default());
  let complete = Arc::new(AtomicBool::new(cfg.writes == 0));
  // Background loop to regularly print out progress.
  spawn({
    let complete = complete.clone();
    let metrics = metrics.clone();
    let progress = progress.clone();
    async move {
      while !complete.load(Ordering::Relaxed) {
        sleep(Duration::from_secs(3)).await;
        info!(
          reserved = progress.reserved.load(Ordering::Relaxed),
          completed = progress.completed.load(Ordering::Relaxed),
          used = metrics.used_slots_gauge(),
          position = metrics.position_gauge(),
          "progress"
        );
      }
    }
  });

  let workers = (0..cfg.concurrency)
    .map(|_| {
      let appender = appender.clone();
      let complete = complete.clone();
      let pending = pending.clone();
      let progress = progress.clone();
      let tasks_receiver = tasks_receiver.clone();
      let tasks_sender = tasks_sender.clone();
      let writes = cfg.writes;
      spawn(async move {
        while !complete.load(Ordering::Relaxed) {
          // We must regularly check the completion count, as we hold a sender so the channel won't naturally end.
          let t = match tasks_receiver.try_recv() {
            Ok(Some(t)) => t,
            Err(StochasticMpmcRecvError::NoSenders) => break,
            Ok(None) => {
              sleep(Duration::from_millis(1)).await;
              continue;
            }
          };
          match t {
            Task::Write { len } => {
              // Waiting for a slot here could deadlock, as the completions that would free one may be queued behind us. Put the write back and try again later.
              let Some(reservation) = appender.try_reserve(len).unwrap() else {
                tasks_sender.send(Task::Write { len }).unwrap();
                yield_now().await;
                continue;
              };
              assert!(pending.lock().insert(reservation.begin()));
              progress.reserved.fetch_add(1, Ordering::Relaxed);
              if thread_rng().gen_bool(0.1) {
                let delay = thread_rng().gen_range(1..100);
                sleep(Duration::from_micros(delay)).await;
              };
              tasks_sender.send(Task::Complete { reservation }).unwrap();
            }
            Task::Complete { reservation } => {
              let begin = reservation.begin();
              assert!(pending.lock().remove(&begin));
              let position = appender.complete(reservation).unwrap();
              if let Some(p) = position {
                if let Some(&oldest) = pending.lock().first() {
                  assert!(
                    p <= oldest,
                    "position {p} is past pending write at {oldest}"
                  );
                };
              };
              if progress.completed.fetch_add(1, Ordering::Relaxed) + 1 == writes {
                complete.store(true, Ordering::Relaxed);
              };
            }
          }
        }
      })
    })
    .collect_vec();
  drop(tasks_sender);
  drop(tasks_receiver);
  for t in workers {
    t.await.unwrap();
  }

  let stats = appender.stats();
  assert_eq!(stats.used, 0);
  assert_eq!(stats.free, cfg.slots);
  let cursor = appender.cursor();
  let position = appender.position();
  assert!(position.map_or(true, |p| p <= cursor));
  info!(
    stats = serde_json::to_string(&stats).unwrap(),
    cursor,
    successful_acquire = metrics.successful_acquire_counter(),
    exhausted_acquire = metrics.exhausted_acquire_counter(),
    position_advance = metrics.position_advance_counter(),
    "all writes completed"
  );

  appender.shutdown();
  let Ok(appender) = Arc::try_unwrap(appender) else {
    panic!("appender is still shared");
  };
  appender.destroy().unwrap();

  let synced = sync_loop.await.unwrap();
  assert_eq!(synced, position);
  info!(synced, syncs = metrics.sync_counter(), "all done");
}
