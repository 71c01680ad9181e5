use log::info;

use plankton::application_state::{init_config, ApplicationState};

#[tokio::main]
async fn main() {
    // Setup logger
    let env = env_logger::Env::default();
    env_logger::init_from_env(env);

    info!("Starting application");

    let (config_cache, config) = init_config().expect("Configuration init failed");
    let app_state = ApplicationState::new(config_cache, config)
        .expect("Unable to initialize application state");

    let config = app_state.config().expect("Unable to read configuration");
    if let Err(e) = ApplicationState::init_components(config).await {
        panic!("Application init error: {:?}", e);
    }
}
