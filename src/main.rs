//! edge-mqtt command line client
//!
//! Publishes one message or prints everything arriving on a topic filter,
//! using the same configuration file an embedding application would.

use clap::{Parser, Subcommand};
use edge_mqtt::config::ClientConfig;
use edge_mqtt::observability::{init_default_logging, init_logging, LogFormat};
use edge_mqtt::transport::TcpTransport;
use edge_mqtt::{ClientError, MqttClient, PublishOptions, QoS, SubscribeOptions};
use std::path::PathBuf;
use std::process;
use tokio::time::Duration;
use tracing::{error, info, warn, Level};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["edge-mqtt.toml", "config/edge-mqtt.toml"];

/// Embeddable MQTT 3.1 client
#[derive(Parser)]
#[command(name = "edge-mqtt")]
#[command(about = "MQTT 3.1 publish/subscribe client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Broker URL, used when no configuration file is found
    #[arg(
        short,
        long,
        env = "EDGE_MQTT_BROKER",
        default_value = "mqtt://localhost:1883"
    )]
    broker: String,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a single message
    Pub {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        message: String,
        #[arg(short, long, default_value_t = 0, value_parser = qos_parser())]
        qos: u8,
        #[arg(short, long)]
        retain: bool,
    },
    /// Print messages matching a topic filter until interrupted
    Sub {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long, default_value_t = 0, value_parser = qos_parser())]
        qos: u8,
        /// Print one JSON object per message
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

fn qos_parser() -> clap::builder::RangedI64ValueParser<u8> {
    clap::value_parser!(u8).range(0..=2)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        1 => init_logging(Level::DEBUG, LogFormat::Compact, false),
        _ => init_logging(Level::TRACE, LogFormat::Compact, false),
    }

    let config = match load_configuration(&cli.config, &cli.broker) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Pub {
            topic,
            message,
            qos,
            retain,
        } => publish(config, &topic, message, qos, retain).await,
        Commands::Sub { topic, qos, json } => subscribe(config, &topic, qos, json).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
    broker: &str,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ClientConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ClientConfig::load_from_file(&path)?);
        }
    }

    info!("No configuration file found, using broker {}", broker);
    let config = ClientConfig::for_broker(broker);
    config.validate()?;
    Ok(config)
}

fn qos_from_arg(qos: u8) -> Result<QoS, Box<dyn std::error::Error>> {
    QoS::from_bits(qos).ok_or_else(|| format!("invalid QoS {qos}").into())
}

/// Spawn a client over TCP and wait for the session
async fn start_client(
    config: &ClientConfig,
) -> Result<(MqttClient, tokio::task::JoinHandle<()>), Box<dyn std::error::Error>> {
    let options = config.to_client_options()?;
    let connect_timeout = options.connect_timeout;
    let (client, task) = MqttClient::spawn(options, TcpTransport::new());

    client.on_error(|e: &ClientError| warn!("MQTT error: {}", e))?;
    client.on_log(|line: &str| info!(target: "mqtt_client", "{}", line))?;
    client.connect()?;
    client.wait_until_connected(connect_timeout).await?;

    Ok((client, task))
}

async fn publish(
    config: ClientConfig,
    topic: &str,
    message: String,
    qos: u8,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = qos_from_arg(qos)?;
    let (client, task) = start_client(&config).await?;

    let mut options = PublishOptions::qos(qos);
    if retain {
        options = options.retained();
    }

    if qos == QoS::AtMostOnce {
        client.publish(topic, message.into_bytes(), options)?;
    } else {
        match client
            .publish_and_wait(topic, message.into_bytes(), options)
            .await?
        {
            Some(ack) => info!("Publish acknowledged, packet id {}", ack.packet_id()),
            None => warn!("Connection closed before the publish was acknowledged"),
        }
    }

    client.shutdown()?;
    task.await?;
    Ok(())
}

async fn subscribe(
    config: ClientConfig,
    filter: &str,
    qos: u8,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = SubscribeOptions {
        qos: qos_from_arg(qos)?,
    };
    let (client, task) = start_client(&config).await?;

    // subscriptions do not survive a reconnect
    let resubscriber = client.clone();
    let filter_owned = filter.to_string();
    let resubscribe = move || {
        let handler = move |topic: &str, payload: &[u8]| print_message(topic, payload, json);
        if let Err(e) = resubscriber.subscribe(&filter_owned, options, handler) {
            error!("Failed to subscribe: {}", e);
        }
    };

    resubscribe();
    client.on_connect(resubscribe)?;
    info!("Subscribed to {}, press Ctrl-C to exit", filter);

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");

    client.shutdown()?;
    tokio::time::timeout(Duration::from_secs(5), task).await??;
    Ok(())
}

fn print_message(topic: &str, payload: &[u8], json: bool) {
    if json {
        let line = serde_json::json!({
            "topic": topic,
            "payload": String::from_utf8_lossy(payload),
            "received_at": chrono::Utc::now().to_rfc3339(),
        });
        println!("{line}");
    } else {
        println!("{topic} {}", String::from_utf8_lossy(payload));
    }
}

fn handle_config_command(
    config: &ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let options = config.to_client_options()?;
    info!(
        "Configuration is valid: broker {}:{}, client id {}",
        options.host, options.port, options.connect.client_id
    );

    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}
