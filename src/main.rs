#![allow(clippy::upper_case_acronyms)]

use std::sync::Arc;

use pingora::services::{background::background_service, listening::Service};
use pingora_core::{
    listeners::tls::TlsSettings,
    server::{configuration::Opt, Server},
};
use sentry::IntoDsn;

use edgeroute::{
    config::{self, Config, Tls},
    dispatch::{DispatchHttpApp, Dispatcher},
    graph::TokenKeyer,
    listener::{RegistrationHttpApp, Subscriber},
    logging::Logger,
    registry::ServiceRegistry,
    rollout::{self, LiveRouter, RolloutEngine},
    service::StatusHttpApp,
    transport::HttpConnector,
};

const EDGEROUTE_SERVICE: &str = "edgeroute";

fn main() {
    // Read command-line arguments
    let cli_options = Opt::parse_args();
    let config = match Config::load_yaml_with_opt_override(&cli_options) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let logger = if let Some(log_cfg) = &config.log {
        let logger = Logger::new(log_cfg.clone());
        logger.init_env_logger();
        Some(logger)
    } else {
        env_logger::init();
        None
    };

    let connector = match HttpConnector::new(config.router.rpc_timeout()) {
        Ok(connector) => Arc::new(connector),
        Err(e) => {
            eprintln!("Failed to build service connector: {e}");
            std::process::exit(1);
        }
    };

    // Registry, rollout worker and the live pointer they share
    let (trigger, triggers) = rollout::queue(config.router.rollout_queue);
    let registry = Arc::new(ServiceRegistry::new(trigger));
    let live = LiveRouter::new();
    let keyer = TokenKeyer::new(config.router.cookie_key.as_deref());
    let engine = RolloutEngine::new(registry.clone(), triggers, live.clone(), keyer);
    let subscriber = Arc::new(Subscriber::new(registry, connector));

    let mut edgeroute_server = Server::new_with_opt_and_conf(Some(cli_options), config.pingora);

    if let Some(log_service) = logger {
        log::info!("Adding log sync service...");
        edgeroute_server.add_service(log_service);
    }

    log::info!("Adding rollout worker...");
    edgeroute_server.add_service(background_service("rollout", engine));

    let dispatcher = Dispatcher::new(live.clone());
    let mut http_service = Service::new(
        EDGEROUTE_SERVICE.to_string(),
        DispatchHttpApp::new(dispatcher, config.router.max_body_bytes),
    );

    log::info!("Adding listeners...");
    if let Err(e) = add_listeners(&mut http_service, &config.listeners) {
        eprintln!("Failed to add listeners: {e}");
        std::process::exit(1);
    }

    log::info!("Adding Registration HTTP...");
    edgeroute_server.add_service(RegistrationHttpApp::registration_http_service(
        &config.registration.address,
        subscriber,
    ));

    add_optional_services(
        &mut edgeroute_server,
        live,
        config.status.as_ref(),
        config.prometheus.as_ref(),
        config.sentry.as_ref(),
    );

    log::info!("Bootstrapping...");
    edgeroute_server.bootstrap();
    log::info!("Bootstrapped. Adding Services...");
    edgeroute_server.add_service(http_service);

    log::info!("Starting Server...");
    edgeroute_server.run_forever();
}

/// Add public listeners, plain TCP or TLS
fn add_listeners(
    http_service: &mut Service<DispatchHttpApp>,
    listeners: &[config::Listener],
) -> Result<(), Box<dyn std::error::Error>> {
    for list_cfg in listeners {
        match &list_cfg.tls {
            Some(Tls {
                cert_path,
                key_path,
            }) => {
                let mut settings = TlsSettings::intermediate(cert_path, key_path)?;
                if list_cfg.offer_h2 {
                    settings.enable_h2();
                }
                http_service.add_tls_with_settings(&list_cfg.address.to_string(), None, settings);
            }
            None => http_service.add_tcp(&list_cfg.address.to_string()),
        }
    }
    Ok(())
}

/// Add optional services (Sentry, Prometheus, Status)
fn add_optional_services(
    server: &mut Server,
    live: LiveRouter,
    status: Option<&config::Status>,
    prometheus: Option<&config::Prometheus>,
    sentry_cfg: Option<&config::Sentry>,
) {
    if let Some(sentry_cfg) = sentry_cfg {
        log::info!("Adding Sentry config...");
        match sentry_cfg.dsn.clone().into_dsn() {
            Ok(Some(dsn)) => {
                server.sentry = Some(sentry::ClientOptions {
                    dsn: Some(dsn),
                    ..Default::default()
                });
            }
            Ok(None) => log::warn!("Sentry DSN is empty, Sentry disabled."),
            Err(e) => log::error!("Error parsing Sentry DSN: {e}"),
        }
    }

    if let Some(status_cfg) = status {
        log::info!("Adding Status HTTP...");
        server.add_service(StatusHttpApp::status_http_service(&status_cfg.address, live));
    }

    if let Some(prometheus_cfg) = prometheus {
        log::info!("Adding Prometheus HTTP...");
        let mut prometheus_service_http = Service::prometheus_http_service();
        prometheus_service_http.add_tcp(&prometheus_cfg.address.to_string());
        server.add_service(prometheus_service_http);
    }
}
