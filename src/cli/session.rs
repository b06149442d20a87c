use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::errors::CliResult;
use crate::grpc::{CriClient, CriConnection, RequestContext};

/// Per-invocation state. The runtime connection is opened lazily so flag
/// validation never touches the network.
#[derive(Debug)]
pub struct Session {
    config: Config,
    ctx: RequestContext,
    client: OnceCell<CriClient>,
}

impl Session {
    pub fn new(config: Config, cancel: CancellationToken) -> Self {
        let ctx = RequestContext::new(config.timeout, cancel);
        Self {
            config,
            ctx,
            client: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.ctx.cancel_token().clone()
    }

    /// Connects on first use and reuses the connection afterwards.
    pub async fn client(&self) -> CliResult<&CriClient> {
        self.client
            .get_or_try_init(|| async {
                let conn = CriConnection::connect(&self.config, &self.ctx).await?;
                Ok(CriClient::new(conn, self.ctx.clone()))
            })
            .await
    }
}
