use log::info;
use tokio::net::UdpSocket;
use tokio::signal;

use crate::collaborators::IdentityResolver;
use crate::config::{ConfigCache, ConfigErr};
use crate::consts::DEFAULT_CONFIG_PATH;
use crate::listener;
use crate::pipeline::{Pipeline, PipelineInitErr};
use crate::settings::{Configuration, ProtocolVariants};

pub struct ApplicationState {
    pub config: ConfigCache,
}

#[derive(Debug)]
pub enum AppInitErr {
    Config(ConfigErr),
    Pipeline(PipelineInitErr),
    Bind(std::io::Error),
}

impl ApplicationState {
    pub fn new(config_cache: ConfigCache, _config: Configuration) -> Result<Self, AppInitErr> {
        Ok(Self {
            config: config_cache,
        })
    }

    pub fn config(&self) -> Result<Configuration, ConfigErr> {
        self.config.get_config::<Configuration>()
    }

    /// Starts the pipeline and the UDP listener and runs until interrupted.
    pub async fn init_components(config: Configuration) -> Result<(), AppInitErr> {
        let decoder = config.protocol.construct_decoder();
        let pipeline = Pipeline::start(&config, decoder, None, Box::new(IdentityResolver))
            .map_err(AppInitErr::Pipeline)?;

        let socket = UdpSocket::bind((config.host.as_str(), config.port))
            .await
            .map_err(AppInitErr::Bind)?;
        info!("Listening on {}:{}.", config.host, config.port);
        if config.protocol == ProtocolVariants::Ipfix {
            info!("Waiting for the first template set.");
        }

        tokio::select! {
            _ = listener::run(socket, &pipeline) => {},
            _ = signal::ctrl_c() => info!("Graceful exit."),
        }
        pipeline.shutdown().await;
        Ok(())
    }
}

pub fn init_config() -> Result<(ConfigCache, Configuration), AppInitErr> {
    let config_cache = ConfigCache::new(DEFAULT_CONFIG_PATH).map_err(AppInitErr::Config)?;
    let configuration = config_cache
        .get_config::<Configuration>()
        .map_err(AppInitErr::Config)?;

    Ok((config_cache, configuration))
}
