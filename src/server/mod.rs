//! The companion proxy server. Interceptors running in `matched` or `middleware` proxy mode
//! rewrite matching requests to `{proxy}/{scheme}/{host}/{path}`; this server answers them
//! from its own [Mocker] and mirrors the control messages sent by the client side.
mod handler;
#[allow(clippy::module_inception)]
mod server;

use crate::{common::http::HttpClient, mock::mocker::Mocker};
use std::{future::Future, net::SocketAddr, sync::Arc};
use tokio::sync::oneshot::Sender;

pub use handler::{Error as HandlerError, Handler, ProxyHandler};
pub use server::{Error, ProxyServer, ProxyServerConfig};

/// Starts the companion proxy server and serves until `shutdown` resolves. The bound address
/// is published through `socket_addr_sender`, which is useful when binding to port 0.
pub async fn start_proxy_server<F>(
    config: ProxyServerConfig,
    mocker: Arc<Mocker>,
    client: Arc<dyn HttpClient + Send + Sync>,
    socket_addr_sender: Option<Sender<SocketAddr>>,
    shutdown: F,
) -> Result<(), Error>
where
    F: Future<Output = ()>,
{
    let handler = ProxyHandler::new(mocker, client);
    ProxyServer::new(Box::new(handler), config)
        .start_with_signals(socket_addr_sender, shutdown)
        .await
}
