//! Routing core of the pipeline. Holds every stage queue, knows which stage
//! feeds which, and picks the worker queue an item lands on.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{debug, info};
use tokio::sync::mpsc;

use super::messages::PipelineItem;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    /// Virtual ingest node. Has successors but no queue of its own.
    Start,
    Decode,
    Enrich,
    Conversation,
    Security,
    Postprocess,
    Stats,
    Output,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::Decode => "Decode",
            Self::Enrich => "Enrich",
            Self::Conversation => "Conversation",
            Self::Security => "Security",
            Self::Postprocess => "Postprocess",
            Self::Stats => "Stats",
            Self::Output => "Output",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

const PIPELINE_GRAPH: &[(Stage, &[Stage])] = &[
    (Stage::Start, &[Stage::Decode]),
    (Stage::Decode, &[Stage::Enrich]),
    (Stage::Enrich, &[Stage::Conversation]),
    (Stage::Conversation, &[Stage::Security, Stage::Stats]),
    (Stage::Security, &[Stage::Postprocess]),
    (Stage::Postprocess, &[Stage::Output]),
    (Stage::Stats, &[Stage::Output]),
    (Stage::Output, &[]),
];

struct StageQueues {
    /// One sender per worker of the stage.
    senders: Vec<mpsc::Sender<PipelineItem>>,
    successors: Vec<Stage>,
    next: AtomicUsize,
}

/// Shared by every worker. Submitting an item routes it to all successor
/// stages of the submitter; conversation workers are picked by partition so
/// one socket always lands on the same worker, everything else round-robins.
pub struct QueueDirector {
    stages: BTreeMap<Stage, StageQueues>,
    flow_log_interval: u64,
    flow_count: AtomicU64,
    last_logged: Mutex<Instant>,
}

impl QueueDirector {
    pub fn build(
        queue_capacity: usize,
        flow_log_interval: u64,
        workers_per_stage: &BTreeMap<Stage, usize>,
    ) -> (Self, BTreeMap<Stage, Vec<mpsc::Receiver<PipelineItem>>>) {
        let mut stages = BTreeMap::new();
        let mut receivers = BTreeMap::new();

        for (stage, successors) in PIPELINE_GRAPH {
            let workers = match stage {
                Stage::Start => 0,
                _ => *workers_per_stage.get(stage).unwrap_or(&1),
            };
            let mut senders = Vec::with_capacity(workers);
            let mut stage_receivers = Vec::with_capacity(workers);
            for _ in 0..workers {
                let (tx, rx) = mpsc::channel(queue_capacity);
                senders.push(tx);
                stage_receivers.push(rx);
            }
            stages.insert(
                *stage,
                StageQueues {
                    senders,
                    successors: successors.to_vec(),
                    next: AtomicUsize::new(0),
                },
            );
            if *stage != Stage::Start {
                receivers.insert(*stage, stage_receivers);
            }
        }

        let director = Self {
            stages,
            flow_log_interval,
            flow_count: AtomicU64::new(0),
            last_logged: Mutex::new(Instant::now()),
        };
        (director, receivers)
    }

    /// Hands an item from `from` to every successor stage. `partition` pins
    /// the conversation worker; without one the item round-robins.
    pub async fn submit(&self, from: Stage, item: PipelineItem, partition: Option<u64>) {
        if from == Stage::Decode {
            self.tick_flow_counter();
        }
        let successors = match self.stages.get(&from) {
            Some(queues) => queues.successors.clone(),
            None => return,
        };
        for successor in successors {
            self.send_to(successor, item.clone(), partition).await;
        }
    }

    async fn send_to(&self, stage: Stage, item: PipelineItem, partition: Option<u64>) {
        let queues = match self.stages.get(&stage) {
            Some(queues) if !queues.senders.is_empty() => queues,
            _ => return,
        };
        let index = match partition {
            Some(partition) if stage == Stage::Conversation => {
                partition as usize % queues.senders.len()
            }
            _ => queues.next.fetch_add(1, Ordering::Relaxed) % queues.senders.len(),
        };
        if queues.senders[index].send(item).await.is_err() {
            debug!("{} queue is closed, dropping the item", stage);
        }
    }

    /// Total number of items sitting in queues across the whole pipeline.
    pub fn depth(&self) -> usize {
        self.stages
            .values()
            .flat_map(|queues| queues.senders.iter())
            .map(|sender| sender.max_capacity() - sender.capacity())
            .sum()
    }

    fn stage_depth(&self, stage: Stage) -> usize {
        match self.stages.get(&stage) {
            Some(queues) => queues
                .senders
                .iter()
                .map(|sender| sender.max_capacity() - sender.capacity())
                .sum(),
            None => 0,
        }
    }

    fn queue_details(&self) -> String {
        self.stages
            .iter()
            .filter(|(_, queues)| !queues.senders.is_empty())
            .map(|(stage, _)| format!("{}: {}", stage, self.stage_depth(*stage)))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn tick_flow_counter(&self) {
        // Interval 0 turns the throughput log off.
        if self.flow_log_interval == 0 {
            return;
        }
        self.flow_count.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut last = match self.last_logged.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if now.duration_since(*last) > Duration::from_secs(self.flow_log_interval) {
            let count = self.flow_count.swap(0, Ordering::Relaxed);
            *last = now;
            drop(last);
            info!(
                "Flows per second: {:.2}. Elements in Queue: {} ({})",
                count as f64 / self.flow_log_interval as f64,
                self.depth(),
                self.queue_details()
            );
        }
    }
}
