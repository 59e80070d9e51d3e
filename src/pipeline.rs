//! Monitor pipeline.
//!
//! Packet sources push [`MeshPacket`]s into a bounded queue through a
//! [`MonitorHandle`]. A single consumer task owns the [`RuleEngine`] and, per packet:
//!
//! 1. registers the sender (or bumps `last_seen`), recording battery and radio stats
//! 2. records the link from the sender to the local node when the SNR is known
//! 3. for telemetry: stores the derived readings, evaluates rules, dispatches actions,
//!    runs the battery drain check and forwards any alert raised to the alert listener
//! 4. for text messages and positions: stores them
//!
//! Every packet counts as a sign of life, whatever its port.
//!
//! The same task runs the silent-node sweep on a timer so that node records and
//! alerts are only ever written from one place. The loop ends once every handle has
//! been dropped and the queue is drained.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::channel::ChannelSender;
use crate::config::{alias_for, Config};
use crate::heartbeat::check_node_heartbeats;
use crate::logutil::{escape_log, short_node};
use crate::metrics;
use crate::rules::RuleEngine;
use crate::packet::{parse_packet_line, MeshPacket, Payload};
use crate::store::{AlertRecord, MonitorStore};
use crate::telemetry::TelemetryEvent;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    /// `None` disables the silent-node sweep.
    pub heartbeat_interval: Option<Duration>,
    pub node_silence: chrono::Duration,
    pub local_node_id: Option<String>,
    pub aliases: HashMap<String, String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            heartbeat_interval: None,
            node_silence: chrono::Duration::minutes(30),
            local_node_id: None,
            aliases: HashMap::new(),
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(cfg: &Config) -> Self {
        let secs = cfg.monitor.heartbeat_interval_secs;
        Self {
            queue_capacity: cfg.monitor.queue_capacity,
            heartbeat_interval: (secs > 0).then(|| Duration::from_secs(secs)),
            node_silence: chrono::Duration::minutes(cfg.monitor.node_silence_minutes as i64),
            local_node_id: cfg.monitor.local_node_id.clone(),
            aliases: cfg.aliases.clone(),
        }
    }
}

/// An alert written by the pipeline, with the node alias resolved.
#[derive(Debug, Clone)]
pub struct AlertNotice {
    pub alias: String,
    pub alert: AlertRecord,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("monitor queue is full")]
    QueueFull,
    #[error("monitor has stopped")]
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Packets handled, of any port.
    pub packets: u64,
    /// Telemetry events run through the rule engine.
    pub events: u64,
    pub dispatched: u64,
    pub alerts: u64,
}

/// Producer side of the monitor queue.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    tx: mpsc::Sender<MeshPacket>,
}

impl MonitorHandle {
    /// Enqueue a packet (or a bare telemetry event), waiting for room when the queue
    /// is full.
    pub async fn submit(&self, packet: impl Into<MeshPacket>) -> Result<(), SubmitError> {
        self.tx
            .send(packet.into())
            .await
            .map_err(|_| SubmitError::Closed)
    }

    /// Enqueue without waiting.
    pub fn try_submit(&self, packet: impl Into<MeshPacket>) -> Result<(), SubmitError> {
        self.tx.try_send(packet.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }
}

/// Spawn the consumer task. Alerts are forwarded to `alerts` when given.
pub fn start_monitor<C>(
    mut engine: RuleEngine<MonitorStore, C>,
    cfg: PipelineConfig,
    alerts: Option<mpsc::UnboundedSender<AlertNotice>>,
) -> (MonitorHandle, JoinHandle<PipelineStats>)
where
    C: ChannelSender + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<MeshPacket>(cfg.queue_capacity.max(1));
    let handle = MonitorHandle { tx };

    let task = tokio::spawn(async move {
        let mut stats = PipelineStats::default();
        let mut heartbeat = cfg.heartbeat_interval.map(|period| {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer
        });
        info!(
            "monitor started (queue={}, heartbeat={:?})",
            cfg.queue_capacity, cfg.heartbeat_interval
        );
        loop {
            tokio::select! {
                next = rx.recv() => match next {
                    Some(packet) => handle_packet(&mut engine, &cfg, packet, alerts.as_ref(), &mut stats),
                    None => break,
                },
                _ = next_tick(&mut heartbeat) => {
                    run_heartbeat(engine.store(), &cfg, alerts.as_ref(), &mut stats);
                }
            }
        }
        info!(
            "monitor stopped: {} packets, {} events, {} notifications, {} alerts",
            stats.packets, stats.events, stats.dispatched, stats.alerts
        );
        info!("metrics: {}", metrics::snapshot());
        stats
    });

    (handle, task)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn handle_packet<C: ChannelSender>(
    engine: &mut RuleEngine<MonitorStore, C>,
    cfg: &PipelineConfig,
    packet: MeshPacket,
    alerts: Option<&mpsc::UnboundedSender<AlertNotice>>,
    stats: &mut PipelineStats,
) {
    let now = Utc::now();
    stats.packets += 1;
    let store = engine.store();
    let from = packet.from.as_str();

    let default_alias = match &packet.payload {
        Payload::Telemetry(TelemetryEvent {
            alias: Some(alias), ..
        }) => alias.clone(),
        _ => alias_for(&cfg.aliases, from),
    };
    let alias = match store.update_node_stats(from, &default_alias, packet.battery(), &packet.link, now) {
        Ok(node) => node.alias,
        Err(e) => {
            warn!("Cannot register node {}: {}", short_node(from), e);
            default_alias
        }
    };

    if let (Some(local), Some(snr)) = (cfg.local_node_id.as_deref(), packet.link.snr) {
        if local != from {
            if let Err(e) = store.update_link(from, local, snr, now) {
                warn!("Cannot record link {} -> {}: {}", short_node(from), short_node(local), e);
            }
        }
    }

    match packet.payload {
        Payload::Telemetry(mut event) => {
            event.alias = Some(alias);
            handle_event(engine, event, now, alerts, stats);
        }
        Payload::Text(message) => match store.save_message(from, &message, now) {
            Ok(saved) => debug!(
                "{}: message #{} on channel {}: {}",
                alias,
                saved.id,
                saved.channel,
                escape_log(&saved.text)
            ),
            Err(e) => warn!("Cannot store message from {}: {}", short_node(from), e),
        },
        Payload::Position(pos) => {
            if let Err(e) =
                store.update_node_position(from, &alias, pos.latitude, pos.longitude, now)
            {
                warn!("Cannot store position of {}: {}", short_node(from), e);
            }
        }
        Payload::Other(port) => {
            debug!("{}: {} packet counted as heartbeat", alias, escape_log(&port));
        }
    }
}

fn handle_event<C: ChannelSender>(
    engine: &mut RuleEngine<MonitorStore, C>,
    event: TelemetryEvent,
    now: chrono::DateTime<Utc>,
    alerts: Option<&mpsc::UnboundedSender<AlertNotice>>,
    stats: &mut PipelineStats,
) {
    stats.events += 1;
    if let Err(e) = engine.store().record_reading(&event, now) {
        warn!("Cannot store readings for {}: {}", short_node(&event.node_id), e);
    }

    let report = engine.process_event(&event, now);
    stats.dispatched += report.dispatched.len() as u64;
    debug!(
        "{}: {} rules, {} matched, {} errors",
        event.display_alias(),
        report.rules_considered,
        report.matched.len(),
        report.errors.len()
    );
    if let Some(alert) = report.raised_alert() {
        stats.alerts += 1;
        forward(alerts, event.display_alias(), alert.clone());
    }
}

fn run_heartbeat(
    store: &MonitorStore,
    cfg: &PipelineConfig,
    alerts: Option<&mpsc::UnboundedSender<AlertNotice>>,
    stats: &mut PipelineStats,
) {
    match check_node_heartbeats(store, Utc::now(), cfg.local_node_id.as_deref(), cfg.node_silence) {
        Ok(raised) => {
            for alert in raised {
                stats.alerts += 1;
                let alias = match store.get_node(&alert.node_id) {
                    Ok(Some(node)) => node.alias,
                    _ => alias_for(&cfg.aliases, &alert.node_id),
                };
                forward(alerts, alias, alert);
            }
        }
        Err(e) => warn!("Heartbeat check failed: {}", e),
    }
}

fn forward(alerts: Option<&mpsc::UnboundedSender<AlertNotice>>, alias: String, alert: AlertRecord) {
    if let Some(tx) = alerts {
        if tx.send(AlertNotice { alias, alert }).is_err() {
            debug!("alert listener gone; notice dropped");
        }
    }
}

/// Feed JSON-lines packets from `reader` into the monitor.
///
/// Every packet with a sender is submitted, whatever its port; malformed lines are
/// skipped with a warning. Resolves to the number of packets submitted.
pub fn spawn_packet_source<R>(reader: R, handle: MonitorHandle) -> JoinHandle<usize>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = reader.lines();
        let mut submitted = 0usize;
        let mut line_no = 0usize;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!("packet source read error: {}", e);
                    break;
                }
            };
            line_no += 1;
            match parse_packet_line(&line) {
                Ok(Some(packet)) => {
                    if handle.submit(packet).await.is_err() {
                        warn!("monitor stopped; packet source exiting");
                        break;
                    }
                    submitted += 1;
                }
                Ok(None) => {}
                Err(e) => warn!("line {}: {}", line_no, e),
            }
        }
        debug!("packet source finished after {} lines", line_no);
        submitted
    })
}
