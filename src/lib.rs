//! toolbridge: agent orchestration over dynamically activated MCP tool servers.
//!
//! Drives a bounded tool-use loop between a language model and a remote MCP
//! gateway. Servers are discovered and activated mid-conversation; a server
//! that needs configuration suspends the run behind a single-use interrupt
//! token that a later `resume` continues.
//!
//! # Quick Start
//!
//! ```no_run
//! use toolbridge::prelude::*;
//!
//! # async fn example() -> toolbridge::error::Result<()> {
//! let engine = Engine::new(BridgeConfig::from_env())?;
//! let request = ChatRequest::builder()
//!     .messages(vec![Message::user("What is on the Wikipedia front page?")])
//!     .initial_servers(vec!["wikipedia".to_string()])
//!     .build();
//! match engine.chat("alice", request).await? {
//!     ChatResponse::Terminal(done) => println!("{}", done.content),
//!     ChatResponse::Interrupt(pause) => println!("needs config for {}", pause.server),
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod interrupt;
pub mod prelude;
pub mod provider;
pub mod registry;
pub mod state;
pub mod types;
pub mod util;
