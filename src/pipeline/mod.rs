//! The processing pipeline: decode, enrich, conversation folding, scoring,
//! postprocessing and writeout, each stage running on its own workers glued
//! together by bounded queues. Overflow at ingest goes to an on-disk spill
//! buffer and is fed back in once the queues have drained.

pub mod director;
pub mod messages;
pub mod spill;
pub mod stages;
pub mod worker;

use core::fmt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use ipnetwork::IpNetworkError;
use log::{debug, error, info};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::collaborators::{HostnameResolver, RiskScorer};
use crate::consts::SPILL_RECOVERY_INTERVAL;
use crate::location::LocationClassifier;
use crate::protocol::Decoder;
use crate::settings::{Configuration, ConstructorErr};
use crate::sinks::Sink;
use director::{QueueDirector, Stage};
use messages::{Datagram, PipelineItem};
use spill::SpillWriter;
use stages::conversation::ConversationHandler;
use stages::decode::DecodeHandler;
use stages::enrich::EnrichHandler;
use stages::output::OutputHandler;
use stages::postprocess::PostprocessHandler;
use stages::security::{Sampler, SecurityHandler};
use stages::stats::StatsHandler;
use worker::{run_worker, StageHandler};

/// Postprocessing runs a fixed pair of workers sharing one resolver cache.
const POSTPROCESS_WORKERS: usize = 2;

#[derive(Debug)]
pub enum PipelineInitErr {
    LocationErr(IpNetworkError),
    SinkErr(ConstructorErr),
    SampleShareErr(f64),
    QueueSizeErr,
}

impl From<IpNetworkError> for PipelineInitErr {
    fn from(error: IpNetworkError) -> PipelineInitErr {
        PipelineInitErr::LocationErr(error)
    }
}

impl From<ConstructorErr> for PipelineInitErr {
    fn from(error: ConstructorErr) -> PipelineInitErr {
        PipelineInitErr::SinkErr(error)
    }
}

impl fmt::Display for PipelineInitErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocationErr(error) => write!(f, "network group config error: {}", error),
            Self::SinkErr(error) => write!(f, "sink config error: {}", error),
            Self::SampleShareErr(share) => write!(
                f,
                "security_sample_percentage must be within ]0, 1], got {}",
                share
            ),
            Self::QueueSizeErr => write!(f, "queues_maxsize must be at least 1"),
        }
    }
}

/// The workers of one stage, stopped and joined as a group.
struct StageWorkers {
    label: String,
    stops: Vec<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl StageWorkers {
    fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            stops: Vec::new(),
            handles: Vec::new(),
        }
    }

    fn add(&mut self, worker: (watch::Sender<bool>, JoinHandle<()>)) {
        self.stops.push(worker.0);
        self.handles.push(worker.1);
    }

    fn len(&self) -> usize {
        self.handles.len()
    }
}

pub struct Pipeline {
    director: Arc<QueueDirector>,
    spill: Mutex<SpillWriter>,
    queues_maxsize: usize,
    workers: Vec<StageWorkers>,
}

impl Pipeline {
    /// Validates the configuration, builds the stage queues and spawns every
    /// worker. Workers start in pipeline order and are stopped in reverse.
    pub fn start(
        config: &Configuration,
        decoder: Decoder,
        scorer: Option<Box<dyn RiskScorer>>,
        resolver: Box<dyn HostnameResolver>,
    ) -> Result<Pipeline, PipelineInitErr> {
        // The stage channels cannot be built with capacity 0.
        if config.queues_maxsize == 0 {
            return Err(PipelineInitErr::QueueSizeErr);
        }
        let classifier = LocationClassifier::from_groups(&config.networks)?;
        let sampler = match Sampler::new(config.security_sample_percentage) {
            Some(sampler) => sampler,
            None => {
                return Err(PipelineInitErr::SampleShareErr(
                    config.security_sample_percentage,
                ))
            }
        };
        let mut sinks: Vec<Box<dyn Sink>> = Vec::with_capacity(config.sinks.len());
        for sink in &config.sinks {
            sinks.push(sink.destination.construct_sink(sink.settings.clone())?);
        }

        let worker_counts: BTreeMap<Stage, usize> = [
            (Stage::Decode, 1),
            (Stage::Enrich, config.enrich_workers),
            (Stage::Conversation, config.conversation_workers),
            (Stage::Security, 1),
            (Stage::Postprocess, POSTPROCESS_WORKERS),
            (Stage::Stats, 1),
            (Stage::Output, 1),
        ]
        .into_iter()
        .collect();
        let (director, mut receivers) = QueueDirector::build(
            config.queues_maxsize,
            config.flow_log_interval,
            &worker_counts,
        );
        let director = Arc::new(director);
        let resolver = Arc::new(Mutex::new(resolver));
        let mut workers = Vec::new();

        // Templates are per-exporter state, so one worker owns the decoder.
        let mut group = StageWorkers::new(Stage::Decode.to_string());
        if let Some(rx) = receivers.remove(&Stage::Decode).unwrap_or_default().pop() {
            group.add(spawn_worker(
                Stage::Decode,
                0,
                DecodeHandler::new(decoder),
                rx,
                director.clone(),
            ));
        }
        workers.push(group);
        let mut group = StageWorkers::new(Stage::Enrich.to_string());
        for (index, rx) in receivers
            .remove(&Stage::Enrich)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            group.add(spawn_worker(
                Stage::Enrich,
                index,
                EnrichHandler::new(classifier.clone(), config.extreme_networks_patch),
                rx,
                director.clone(),
            ));
        }
        workers.push(group);
        let mut group = StageWorkers::new(Stage::Conversation.to_string());
        for (index, rx) in receivers
            .remove(&Stage::Conversation)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            group.add(spawn_worker(
                Stage::Conversation,
                index,
                ConversationHandler::new(
                    config.conversation_ttl.response_received,
                    config.conversation_ttl.no_response,
                ),
                rx,
                director.clone(),
            ));
        }
        workers.push(group);
        let mut group = StageWorkers::new(Stage::Postprocess.to_string());
        for (index, rx) in receivers
            .remove(&Stage::Postprocess)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
        {
            group.add(spawn_worker(
                Stage::Postprocess,
                index,
                PostprocessHandler::new(resolver.clone()),
                rx,
                director.clone(),
            ));
        }
        workers.push(group);
        let mut group = StageWorkers::new(Stage::Security.to_string());
        if let Some(rx) = receivers.remove(&Stage::Security).unwrap_or_default().pop() {
            group.add(spawn_worker(
                Stage::Security,
                0,
                SecurityHandler::new(scorer, sampler),
                rx,
                director.clone(),
            ));
        }
        workers.push(group);
        // Stats aggregates over time, so it stays on a single worker too.
        let mut group = StageWorkers::new(Stage::Stats.to_string());
        if let Some(rx) = receivers.remove(&Stage::Stats).unwrap_or_default().pop() {
            group.add(spawn_worker(
                Stage::Stats,
                0,
                StatsHandler::new(config.stats_cache_seconds),
                rx,
                director.clone(),
            ));
        }
        workers.push(group);
        let mut group = StageWorkers::new(Stage::Output.to_string());
        if let Some(rx) = receivers.remove(&Stage::Output).unwrap_or_default().pop() {
            group.add(spawn_worker(
                Stage::Output,
                0,
                OutputHandler::new(sinks),
                rx,
                director.clone(),
            ));
        }
        workers.push(group);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_spill_recovery(
            director.clone(),
            PathBuf::from(&config.spill_directory),
            config.queues_maxsize,
            stop_rx,
        ));
        let mut group = StageWorkers::new("spill recovery");
        group.add((stop_tx, handle));
        workers.push(group);

        let worker_total: usize = workers.iter().map(StageWorkers::len).sum();
        info!("Pipeline started with {} workers.", worker_total);
        Ok(Pipeline {
            director,
            spill: Mutex::new(SpillWriter::new(
                &config.spill_directory,
                config.spill_chunk_size,
            )),
            queues_maxsize: config.queues_maxsize,
            workers,
        })
    }

    /// Entry point for received datagrams. While the queues are over their
    /// ceiling the datagram is parked on disk instead, to be recovered once
    /// the pipeline has caught up.
    pub async fn ingest(&self, payload: Bytes, exporter: String) {
        let datagram = Datagram { payload, exporter };
        if self.director.depth() <= self.queues_maxsize {
            self.director
                .submit(Stage::Start, PipelineItem::Datagram(datagram), None)
                .await;
        } else {
            let result = self.spill.lock().await.put(datagram).await;
            match result {
                Ok(()) => {
                    debug!("Queues over their ceiling, datagram spilled to disk for later.")
                }
                Err(error) => error!("Could not spill the datagram: {}", error),
            }
        }
    }

    /// Stops workers stage by stage in reverse start order, then flushes
    /// whatever is still sitting in the spill buffer so nothing received is
    /// silently dropped.
    pub async fn shutdown(mut self) {
        info!("Pipeline shutting down.");
        for group in self.workers.drain(..).rev() {
            for stop in &group.stops {
                if stop.send(true).is_err() {
                    debug!("a {} worker had already stopped", group.label);
                }
            }
            for result in join_all(group.handles).await {
                if let Err(error) = result {
                    error!("A {} worker did not stop cleanly: {}", group.label, error);
                }
            }
        }
        if let Err(error) = self.spill.lock().await.flush().await {
            error!("Could not flush the spill buffer: {}", error);
        }
        info!("Pipeline stopped.");
    }
}

fn spawn_worker<H>(
    stage: Stage,
    index: usize,
    handler: H,
    rx: mpsc::Receiver<PipelineItem>,
    director: Arc<QueueDirector>,
) -> (watch::Sender<bool>, JoinHandle<()>)
where
    H: StageHandler + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(run_worker(stage, index, handler, rx, director, stop_rx));
    (stop_tx, handle)
}

/// Feeds spilled datagrams back into the pipeline, one chunk file per
/// interval and only while the queues sit below a third of their ceiling.
async fn run_spill_recovery(
    director: Arc<QueueDirector>,
    directory: PathBuf,
    queues_maxsize: usize,
    mut stop: watch::Receiver<bool>,
) {
    debug!("spill recovery started");
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(SPILL_RECOVERY_INTERVAL) => {
                if director.depth() >= queues_maxsize / 3 {
                    continue;
                }
                match spill::recover_one(&directory).await {
                    Ok(Some(datagrams)) => {
                        info!("Recovering {} spilled datagrams from disk.", datagrams.len());
                        for datagram in datagrams {
                            director
                                .submit(Stage::Start, PipelineItem::Datagram(datagram), None)
                                .await;
                        }
                    }
                    Ok(None) => {}
                    Err(error) => error!("Spill recovery failed: {}", error),
                }
            }
        }
    }
    debug!("spill recovery stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::IdentityResolver;
    use crate::protocol::netflow_v5::NetflowV5Decoder;
    use crate::settings::{
        ConversationTtl, NetworkGroup, ProtocolVariants, SinkConfig, SinkSettings, SinkVariants,
    };
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn test_config(dir: &std::path::Path) -> Configuration {
        Configuration {
            host: "127.0.0.1".to_string(),
            port: 0,
            protocol: ProtocolVariants::NetflowV5,
            flow_log_interval: 10,
            extreme_networks_patch: false,
            stats_cache_seconds: 1,
            queues_maxsize: 1000,
            enrich_workers: 2,
            conversation_workers: 2,
            conversation_ttl: ConversationTtl {
                response_received: 1,
                no_response: 1,
            },
            security_sample_percentage: 0.1,
            spill_directory: dir.join("spill").to_string_lossy().to_string(),
            spill_chunk_size: 10,
            sinks: vec![SinkConfig {
                destination: SinkVariants::File,
                settings: SinkSettings {
                    path: Some(dir.join("out.jsonl").to_string_lossy().to_string()),
                    include_stats: Some(true),
                    host: None,
                    port: None,
                },
            }],
            networks: vec![NetworkGroup {
                label: "Localnet".to_string(),
                networks: vec!["192.168.0.0/16".to_string()],
            }],
        }
    }

    fn v5_datagram() -> Vec<u8> {
        let mut datagram = Vec::new();
        datagram.extend_from_slice(&5u16.to_be_bytes());
        datagram.extend_from_slice(&1u16.to_be_bytes());
        datagram.extend_from_slice(&10_000u32.to_be_bytes());
        datagram.extend_from_slice(&1_665_000_000u32.to_be_bytes());
        datagram.extend_from_slice(&0u32.to_be_bytes());
        datagram.extend_from_slice(&7u32.to_be_bytes());
        datagram.extend_from_slice(&[0, 3, 0, 0]);

        let mut record = [0u8; 48];
        record[0..4].copy_from_slice(&Ipv4Addr::new(192, 168, 1, 10).octets());
        record[4..8].copy_from_slice(&Ipv4Addr::new(8, 8, 8, 8).octets());
        record[16..20].copy_from_slice(&4u32.to_be_bytes());
        record[20..24].copy_from_slice(&256u32.to_be_bytes());
        record[32..34].copy_from_slice(&51_515u16.to_be_bytes());
        record[34..36].copy_from_slice(&53u16.to_be_bytes());
        record[38] = 17;
        datagram.extend_from_slice(&record);
        datagram
    }

    fn start(config: &Configuration) -> Pipeline {
        Pipeline::start(
            config,
            Decoder::NetflowV5(NetflowV5Decoder::default()),
            None,
            Box::new(IdentityResolver::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn datagrams_flow_end_to_end_into_the_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pipeline = start(&config);

        for _ in 0..12 {
            pipeline
                .ingest(v5_datagram().into(), "10.0.0.9".to_string())
                .await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        pipeline.shutdown().await;

        let contents = std::fs::read_to_string(dir.path().join("out.jsonl")).unwrap();
        assert!(contents.contains("\"socketIdentifier\":\"192.168.1.10:51515-8.8.8.8:domain\""));
        assert!(contents.contains("\"networkLocation\":\"Localnet\""));
        assert!(contents.contains("\"sourceHostname\":\"192.168.1.10\""));
    }

    #[tokio::test]
    async fn shutdown_flushes_the_spill_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let pipeline = start(&config);

        pipeline
            .spill
            .lock()
            .await
            .put(Datagram {
                payload: vec![1, 2, 3].into(),
                exporter: "10.0.0.9".to_string(),
            })
            .await
            .unwrap();
        pipeline.shutdown().await;

        let spilled = std::fs::read_dir(dir.path().join("spill")).unwrap().count();
        assert_eq!(spilled, 1);
    }

    #[tokio::test]
    async fn malformed_network_group_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.networks = vec![NetworkGroup {
            label: "broken".to_string(),
            networks: vec!["300.0.0.0/8".to_string()],
        }];

        let result = Pipeline::start(
            &config,
            Decoder::NetflowV5(NetflowV5Decoder::default()),
            None,
            Box::new(IdentityResolver::default()),
        );

        assert!(matches!(result, Err(PipelineInitErr::LocationErr(_))));
    }

    #[tokio::test]
    async fn out_of_range_sample_share_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.security_sample_percentage = 0.0;

        let result = Pipeline::start(
            &config,
            Decoder::NetflowV5(NetflowV5Decoder::default()),
            None,
            Box::new(IdentityResolver::default()),
        );

        assert!(matches!(result, Err(PipelineInitErr::SampleShareErr(_))));
    }

    #[tokio::test]
    async fn zero_queue_ceiling_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.queues_maxsize = 0;

        let result = Pipeline::start(
            &config,
            Decoder::NetflowV5(NetflowV5Decoder::default()),
            None,
            Box::new(IdentityResolver::default()),
        );

        assert!(matches!(result, Err(PipelineInitErr::QueueSizeErr)));
    }
}
