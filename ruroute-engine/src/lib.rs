//! Ruroute Engine
//!
//! This crate ties the routing core together into a router that the CLI
//! (or any other front end) can start, reconfigure and stop.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  ┌─────────────────┐                                        │
//! │  │   ruroute-cli   │                                        │
//! │  └────────┬────────┘                                        │
//! │           ▼                                                 │
//! │  ┌────────────────────────────────────────────────────────┐ │
//! │  │                  ruroute-engine                         │ │
//! │  │  - RouterEngine (main interface)                       │ │
//! │  │  - Config (TOML configuration)                         │ │
//! │  │  - Events, process cache, system hooks                 │ │
//! │  └────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Library Layer                            │
//! │  ┌──────────────┐  ┌──────────┐  ┌───────────┐  ┌────────┐  │
//! │  │ hop-intercept│  │ hop-dns  │  │ hop-socks │  │hop-rules│ │
//! │  │ - TCP flows  │  │ - queries│  │ - upstream│  │- rules │  │
//! │  └──────────────┘  └──────────┘  └───────────┘  └────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod process;
pub mod system;

pub use config::{CheckConfig, CommonConfig, Config, DnsConfig, ListenConfig, SystemConfig};
pub use engine::{ProxyCheck, RouterEngine};
pub use error::{Error, Result};
pub use event::{EngineEvent, EngineState, EventHandler, LoggingEventHandler};
pub use process::{default_resolver, ProcessCache};
pub use system::{NoopSystemNetwork, ScriptSystemNetwork, SystemGuard, SystemNetwork};

#[cfg(target_os = "linux")]
pub use process::ProcfsResolver;
