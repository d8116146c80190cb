use std::net::SocketAddr;

use jsonrpsee::{
    core::server::Methods,
    server::{Server, ServerBuilder, ServerHandle},
    RpcModule,
};
use tower::{
    layer::util::{Identity, Stack},
    ServiceBuilder,
};
use tower_http::cors::CorsLayer;

use crate::rpc::{errors::RpcError, utils::create_cors_layer};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServerKind {
    Http(SocketAddr),
    Ws(SocketAddr),
}

impl std::fmt::Display for ServerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerKind::Http(addr) => write!(f, "{} (HTTP-RPC server)", addr),
            ServerKind::Ws(addr) => write!(f, "{} (WS-RPC server)", addr),
        }
    }
}

/// A built server, with or without CORS middleware. The two arms exist
/// because the middleware stack is part of the server's type.
enum BuiltServer {
    Plain(Server),
    WithCors(Server<Stack<CorsLayer, Identity>>),
}

impl BuiltServer {
    async fn build(
        builder: ServerBuilder<Identity, Identity>,
        socket_addr: SocketAddr,
        cors_origin: Option<&str>,
        server_kind: ServerKind,
    ) -> Result<Self, RpcError> {
        if let Some(origin) = cors_origin {
            let cors = create_cors_layer(origin).map_err(|e| RpcError::Custom(e.to_string()))?;
            let server = builder
                .set_http_middleware(ServiceBuilder::new().layer(cors))
                .build(socket_addr)
                .await
                .map_err(|err| RpcError::IoError(server_kind, err))?;
            Ok(BuiltServer::WithCors(server))
        } else {
            let server = builder
                .build(socket_addr)
                .await
                .map_err(|err| RpcError::IoError(server_kind, err))?;
            Ok(BuiltServer::Plain(server))
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, RpcError> {
        match self {
            BuiltServer::Plain(server) => server
                .local_addr()
                .map_err(|e| RpcError::Custom(e.to_string())),
            BuiltServer::WithCors(server) => server
                .local_addr()
                .map_err(|e| RpcError::Custom(e.to_string())),
        }
    }

    fn start(self, methods: Methods) -> ServerHandle {
        match self {
            BuiltServer::Plain(server) => server.start(methods),
            BuiltServer::WithCors(server) => server.start(methods),
        }
    }
}

/// Builder-style configuration for the gateway's HTTP and WS endpoints.
#[derive(Default)]
pub struct RpcServerConfig {
    http_addr: Option<SocketAddr>,
    ws_addr: Option<SocketAddr>,
    cors_origin: Option<String>,
}

impl RpcServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_addr(mut self, addr: SocketAddr) -> Self {
        self.http_addr = Some(addr);
        self
    }

    pub fn with_ws_addr(mut self, addr: SocketAddr) -> Self {
        self.ws_addr = Some(addr);
        self
    }

    /// Sets the allowed CORS origin(s), e.g. "*" or "http://example.com".
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = Some(origin.into());
        self
    }

    /// Binds both listeners. Commands are served on either endpoint; the
    /// auction event subscription needs the WS one.
    pub async fn build(self) -> Result<RpcServer, RpcError> {
        let http_addr = self.http_addr.ok_or_else(|| {
            RpcError::Custom("HTTP address not set in configuration.".to_string())
        })?;
        let ws_addr = self
            .ws_addr
            .ok_or_else(|| RpcError::Custom("WS address not set in configuration.".to_string()))?;

        let http_server = BuiltServer::build(
            ServerBuilder::default().http_only(),
            http_addr,
            self.cors_origin.as_deref(),
            ServerKind::Http(http_addr),
        )
        .await?;
        let ws_server = BuiltServer::build(
            ServerBuilder::default().ws_only(),
            ws_addr,
            self.cors_origin.as_deref(),
            ServerKind::Ws(ws_addr),
        )
        .await?;

        Ok(RpcServer {
            http_server,
            ws_server,
        })
    }
}

pub struct RpcServer {
    http_server: BuiltServer,
    ws_server: BuiltServer,
}

impl RpcServer {
    pub fn http_local_addr(&self) -> Result<SocketAddr, RpcError> {
        self.http_server.local_addr()
    }

    pub fn ws_local_addr(&self) -> Result<SocketAddr, RpcError> {
        self.ws_server.local_addr()
    }

    /// Starts both servers with the same RPC module.
    pub fn start<Context>(self, module: RpcModule<Context>) -> RpcServerHandle {
        let methods: Methods = module.into();
        let http = self.http_server.start(methods.clone());
        let ws = self.ws_server.start(methods);
        RpcServerHandle {
            http: Some(http),
            ws: Some(ws),
        }
    }
}

pub struct RpcServerHandle {
    pub http: Option<ServerHandle>,
    pub ws: Option<ServerHandle>,
}

impl RpcServerHandle {
    /// Stops both the HTTP and WS servers.
    pub fn stop(&self) -> Result<(), RpcError> {
        if let Some(handle) = &self.http {
            handle.stop().map_err(|e| RpcError::Custom(e.to_string()))?;
        }
        if let Some(handle) = &self.ws {
            handle.stop().map_err(|e| RpcError::Custom(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for RpcServerHandle {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
