//! Progress hub server command: `dependify serve`.

use anyhow::Result;
use dependify::config::DependifyConfig;

pub async fn cmd_serve(mut config: DependifyConfig, port: Option<u16>, dev: bool) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    dependify::server::start_server(&config, dev).await
}
