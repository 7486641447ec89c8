//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over HTTP on localhost.

use crate::handler::RpcHandler;
use crate::types::{
    BalanceRequest, GenerateImageRequest, JobGetRequest, JobListRequest, SubmitTrainingRequest,
    WatchRequest,
};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use trainwatch_core::error::AppError;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9630;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

fn register_err(e: impl std::fmt::Display) -> AppError {
    AppError::Internal(format!("Failed to register RPC method: {}", e))
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: RpcHandler) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
        }
    }

    fn module(&self) -> Result<RpcModule<()>, AppError> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("training.submit.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SubmitTrainingRequest = params.parse()?;
                    handler.submit_training(req).await
                }
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_async_method("generation.create.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: GenerateImageRequest = params.parse()?;
                    handler.generate_image(req).await
                }
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_method("watch.start.v1", move |params, _, _| {
                let req: WatchRequest = params.parse()?;
                Ok::<_, jsonrpsee::types::ErrorObjectOwned>(handler.start_watch(req))
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_method("watch.stop.v1", move |params, _, _| {
                let req: WatchRequest = params.parse()?;
                Ok::<_, jsonrpsee::types::ErrorObjectOwned>(handler.stop_watch(req))
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_async_method("job.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobGetRequest = params.parse()?;
                    handler.get_job(req).await
                }
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_async_method("job.list.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobListRequest = params.parse()?;
                    handler.list_jobs(req).await
                }
            })
            .map_err(register_err)?;

        let handler = self.handler.clone();
        module
            .register_async_method("credits.balance.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: BalanceRequest = params.parse()?;
                    handler.balance(req).await
                }
            })
            .map_err(register_err)?;

        Ok(module)
    }

    /// Start the JSON-RPC server
    ///
    /// Only binds to the configured host (127.0.0.1 by default).
    pub async fn start(self) -> Result<(ServerHandle, SocketAddr), AppError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let module = self.module()?;

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| AppError::Config(format!("Failed to bind RPC server on {}: {}", addr, e)))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| AppError::Internal(e.to_string()))?;

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((server.start(module), local_addr))
    }
}
