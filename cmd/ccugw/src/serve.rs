//! The `serve` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use ccugw::{
    GatewayConfig, HandlerChain, LogSink, MqttTranslator, Notification, PublishPolicy, Server, ServerConfig,
    SetDispatcher, SetRequest, ValueWriter, WriteError,
};
use ccugw_mqttd::ListenerError;
use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn};

use crate::Cli;

#[derive(Args)]
pub struct ServeCommand {
    /// YAML configuration file (defaults apply when omitted)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Read line-delimited JSON notifications from stdin
    #[arg(long)]
    pub events_stdin: bool,
}

impl ServeCommand {
    pub async fn run(&self, _cli: &Cli) -> anyhow::Result<()> {
        let config = GatewayConfig::load_or_default(self.config.as_deref()).with_context(|| match &self.config {
            Some(path) => format!("loading {}", path.display()),
            None => "default configuration".to_string(),
        })?;

        let (tx, mut errors) = mpsc::unbounded_channel::<ListenerError>();
        let server = Arc::new(
            Server::with_span(ServerConfig::from(&config.mqtt), info_span!("mqtt-server")).with_error_channel(tx),
        );
        server.start().context("starting MQTT server")?;

        let chain = HandlerChain::new()
            .with(Arc::new(
                MqttTranslator::new(server.clone()).with_policy(PublishPolicy::from(&config.policy)),
            ))
            .with(Arc::new(LogSink));
        Arc::new(SetDispatcher::new(Arc::new(LoggingWriter)))
            .subscribe(&server)
            .context("subscribing set topics")?;

        let feed = self.events_stdin.then(|| spawn_feed(chain));

        let mut outcome = Ok(());
        loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        error!("waiting for interrupt: {}", e);
                    }
                    info!("shutting down");
                    break;
                }
                Some(err) = errors.recv() => {
                    error!("{}", err);
                    if server.all_listeners_failed() {
                        error!("no MQTT listener is running, shutting down");
                        outcome = Err(anyhow::anyhow!("all MQTT listeners failed"));
                        break;
                    }
                }
            }
        }

        if let Some(feed) = feed {
            feed.abort();
        }
        server.stop().await;
        outcome
    }
}

/// Writer used until a controller connection is configured: it only logs.
struct LoggingWriter;

impl ValueWriter for LoggingWriter {
    fn write(&self, request: SetRequest) -> Result<(), WriteError> {
        info!(
            "set request {:?} = {} (status {})",
            request.target, request.pv.value, request.pv.status
        );
        Ok(())
    }
}

fn spawn_feed(chain: HandlerChain) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => feed_line(&chain, &line),
                Ok(None) => {
                    info!("notification feed closed");
                    return;
                }
                Err(e) => {
                    warn!("reading notification feed: {}", e);
                    return;
                }
            }
        }
    })
}

fn feed_line(chain: &HandlerChain, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<Notification>(line) {
        Ok(notification) => {
            if let Err(e) = chain.dispatch(&notification) {
                warn!(
                    "{} notification from {}: {}",
                    notification.kind(),
                    notification.interface_id(),
                    e
                );
            }
        }
        Err(e) => warn!("skipping malformed notification: {}", e),
    }
}
