// Copyright 2026 The Ecoin Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Standalone node process. Config loading (JSON/CLI flags, seed
//! resolution) and the RPC/wallet surface that drives [`ecoin_node::Node`]
//! in production are out of scope here; this binary wires up a single
//! node from its environment and runs it until interrupted, which is
//! enough to join a network as a participant.

use ecoin_crypto::{Account, Role};
use ecoin_node::{Node, NodeConfig};
use ecoin_util::Shutdown;
use log::LevelFilter;
use std::env;

fn role_from_env() -> Role {
	match env::var("ECOIND_ROLE").as_deref() {
		Ok("hospital") => Role::Hospital,
		Ok("researcher") => Role::Researcher,
		Ok("doctor") => Role::Doctor,
		Ok("patient") => Role::Patient,
		_ => Role::Hospital,
	}
}

fn config_from_env() -> NodeConfig {
	let mut config = NodeConfig::default();
	if let Ok(addr) = env::var("ECOIND_LISTEN_ADDR") {
		config.listen_addr = addr.parse().expect("ECOIND_LISTEN_ADDR must be host:port");
	}
	if let Ok(addr) = env::var("ECOIND_UDP_ADDR") {
		config.udp_addr = addr.parse().expect("ECOIND_UDP_ADDR must be host:port");
	}
	if let Ok(path) = env::var("ECOIND_STORAGE_PATH") {
		config.storage_path = Some(path.into());
	}
	config
}

#[tokio::main]
async fn main() {
	ecoin_util::logging::init(LevelFilter::Info);

	// Standalone use only; production deployments persist and reload this
	// identity rather than minting a new one every run.
	let account = Account::new(role_from_env());
	log::info!("starting node {:?} as {:?}", account.id(), account.role);

	let config = config_from_env();
	let node = match Node::new(config, account).await {
		Ok(node) => node,
		Err(e) => {
			log::error!("failed to start node: {}", e);
			std::process::exit(1);
		}
	};

	let shutdown = Shutdown::new();
	let run_shutdown = shutdown.clone();
	let run = tokio::spawn(node.run(run_shutdown));

	if let Err(e) = tokio::signal::ctrl_c().await {
		log::error!("failed to listen for ctrl-c: {}", e);
	}
	log::info!("shutting down");
	shutdown.stop().await;
	let _ = run.await;
}
