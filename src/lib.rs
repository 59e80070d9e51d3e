//! # meshwatch - Telemetry monitor for Meshtastic networks
//!
//! meshwatch watches the telemetry packets of a Meshtastic mesh, evaluates
//! user-defined rules against each reading, and notifies mesh channels when a rule
//! fires. It also raises persistent alerts for rapid battery drain and for nodes
//! that stop reporting.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use meshwatch::battery::{BatteryDrainMonitor, DrainPolicy};
//! use meshwatch::channel::{radio_channel, ChannelDirectory};
//! use meshwatch::config::Config;
//! use meshwatch::pipeline::{start_monitor, PipelineConfig};
//! use meshwatch::rules::RuleEngine;
//! use meshwatch::store::MonitorStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let store = MonitorStore::open(config.storage.store_path())?;
//!     let (sender, _outgoing) = radio_channel(
//!         ChannelDirectory::new(config.channels.names.clone()),
//!         config.channels.outgoing_queue,
//!     );
//!     let battery = BatteryDrainMonitor::new(DrainPolicy::from(&config.battery));
//!     let engine = RuleEngine::new(store, sender, battery);
//!     let (handle, task) = start_monitor(engine, PipelineConfig::from(&config), None);
//!     drop(handle);
//!     task.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`packet`] - decoding of JSON-lines packets into [`packet::MeshPacket`]
//! - [`telemetry`] - telemetry normalization into [`telemetry::TelemetryEvent`]
//! - [`rules`] - conditions, rule matching, action dispatch and the engine
//! - [`battery`] - per-node rapid drain detection
//! - [`heartbeat`] - silent-node detection
//! - [`channel`] - channel name resolution and the outgoing radio queue
//! - [`store`] - sled-backed rules, alerts, nodes, readings, links and messages
//! - [`pipeline`] - the consumer task tying it all together
//! - [`config`] - configuration loading and validation
//! - [`metrics`] - process-wide counters
//!
//! ## Architecture
//!
//! ```text
//! packets ──► MonitorHandle ──► [bounded queue] ──► pipeline task
//!                                                     │   ├─ store (nodes, links, messages, readings)
//!                                                     │   ├─ RuleEngine ──► RadioSender ──► [queue] ──► transport
//!                                                     │   └─ heartbeat timer
//!                                                     └──► AlertNotice listener
//! ```

pub mod battery;
pub mod channel;
pub mod config;
pub mod heartbeat;
pub mod logutil;
pub mod metrics;
pub mod packet;
pub mod pipeline;
pub mod rules;
pub mod store;
pub mod telemetry;
