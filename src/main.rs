//! Process entry point: loads configuration, wires the Thread-stack and
//! commissioner adapters, starts the background tick loop, and serves the
//! REST API.

use std::net::Ipv6Addr;
use std::sync::Arc;

use threadbr_collector::allowlist::mock::MockCommissioner;
use threadbr_collector::app::{AppState, run_tick_loop};
use threadbr_collector::config::BorderRouterConfig;
use threadbr_collector::domain::{ExtAddress, Rloc16};
use threadbr_collector::ipv6::NetworkPrefixes;
use threadbr_collector::server::{create_router_for, serve_with_graceful_shutdown, start_server};
use threadbr_collector::thread_api::mock::MockThreadApi;
use threadbr_collector::thread_api::{LeaderData, ThisNodeInfo};
use threadbr_collector::time::production_time_provider;

use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = BorderRouterConfig::default();

    // No real NCP/commissioner binding exists yet; these adapters stand in
    // for them until a concrete Thread-stack integration is wired up.
    let this_node = ThisNodeInfo {
        border_agent_id: "0000000000000000".to_string(),
        border_agent_state: "disconnected".to_string(),
        leader_data: LeaderData {
            partition_id: 0,
            data_version: 0,
        },
        network_name: "OpenThread".to_string(),
        rloc16: Rloc16::for_router_id(0),
        rloc_address: Ipv6Addr::UNSPECIFIED,
        router_count: 0,
    };
    let prefixes = NetworkPrefixes {
        mesh_local_prefix: [0xfd, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    };
    let thread_api = Arc::new(MockThreadApi::new(ExtAddress::ZERO, this_node, prefixes));
    let commissioner = Arc::new(MockCommissioner::new());
    let time_provider = production_time_provider();

    let state = Arc::new(Mutex::new(AppState::new(
        config,
        thread_api,
        commissioner,
        time_provider,
    )));

    tokio::spawn(run_tick_loop(state.clone()));

    let (listener, listen_addr) = start_server(&state).await?;
    let router = create_router_for(state);
    tracing::info!(%listen_addr, "listening");
    serve_with_graceful_shutdown(listener, router).await?;
    Ok(())
}
