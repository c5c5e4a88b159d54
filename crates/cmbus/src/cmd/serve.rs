use std::sync::mpsc;
use std::thread;

use cmbus_frame::StreamConfig;
use cmbus_plugin::{Broker, BrokerConfig, BusListener};

use crate::builtin;
use crate::cmd::ServeArgs;
use crate::exit::{plugin_error, CliError, CliResult, INTERNAL, SUCCESS};

/// Why the serve loop stopped.
enum Stop {
    Interrupted,
    Failed(CliError),
}

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let config = load_config(&args)?;
    let (stop_tx, stop_rx) = mpsc::channel();
    install_ctrlc_handler(stop_tx.clone())?;

    let registry = builtin::registry().map_err(|err| plugin_error("plugin registry", err))?;
    let mut broker =
        Broker::start(config, &registry).map_err(|err| plugin_error("broker start failed", err))?;
    tracing::info!(plugins = ?broker.plugins(), node = broker.handle().node(), "broker running");

    let listener = BusListener::bind(&args.path)
        .map_err(|err| plugin_error("bind failed", err))?
        .with_stream_config(StreamConfig {
            buffer_capacity: args.buffer_capacity,
            ..StreamConfig::default()
        });
    let socket_path = listener.path().to_path_buf();

    let handle = broker.handle();
    thread::Builder::new()
        .name("listener".to_string())
        .spawn(move || {
            if let Err(err) = listener.serve(&handle) {
                let _ = stop_tx.send(Stop::Failed(plugin_error("accept failed", err)));
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("listener thread: {err}")))?;

    let stop = stop_rx.recv().unwrap_or(Stop::Interrupted);
    tracing::info!("shutting down");
    let shutdown = broker
        .shutdown()
        .map_err(|err| plugin_error("broker shutdown failed", err));
    // The listener thread is parked in accept and never drops its socket.
    let _ = std::fs::remove_file(&socket_path);

    shutdown?;
    match stop {
        Stop::Interrupted => Ok(SUCCESS),
        Stop::Failed(err) => Err(err),
    }
}

fn load_config(args: &ServeArgs) -> CliResult<BrokerConfig> {
    let mut config = match &args.config {
        Some(path) => BrokerConfig::from_file(path).map_err(|err| {
            plugin_error(&format!("failed loading {}", path.display()), err)
        })?,
        None => BrokerConfig::default(),
    };
    if let Some(plugins) = &args.plugins {
        config.plugins = plugins.clone();
    }
    if let Some(node) = args.node {
        config.node = node;
    }
    if let Some(hwm) = args.hwm {
        config.hwm = hwm;
    }
    Ok(config)
}

fn install_ctrlc_handler(stop: mpsc::Sender<Stop>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let _ = stop.send(Stop::Interrupted);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
