use crate::agent::Agent;
use anyhow::{Context, Result};
use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::{convert::Infallible, net::SocketAddr};
use tokio::net::TcpListener;
use tracing::{debug, info, instrument, warn};

type Body = http_body_util::Full<Bytes>;

/// A request the proxy knows how to serve.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    Endpoint(u16),
    Identity(u32),
    Policy(u16),
    /// A known route with a malformed parameter.
    Invalid(&'static str),
    NotFound,
}

#[instrument(skip(agent))]
pub async fn serve(addr: SocketAddr, agent: Agent) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    loop {
        let (io, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(error) => {
                warn!(%error, "Failed to accept connection");
                continue;
            }
        };
        let agent = agent.clone();
        tokio::spawn(async move {
            let svc = hyper::service::service_fn(move |req| {
                let agent = agent.clone();
                async move { Ok::<_, Infallible>(handle(&agent, req).await) }
            });
            if let Err(error) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(io), svc)
                .await
            {
                debug!(%error, %peer, "Connection closed");
            }
        });
    }
}

async fn handle<B>(agent: &Agent, req: Request<B>) -> Response<Body> {
    let path = req.uri().path();
    if req.method() != Method::GET {
        return error_response(path, StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match route(path) {
        Route::Endpoint(id) => relay(agent, path, &format!("/v1/endpoint/{id}")).await,
        Route::Identity(id) => relay(agent, path, &format!("/v1/identity/{id}")).await,
        Route::Policy(id) => match agent.policy_map(id).await {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(error) => {
                warn!(%path, error = %format_args!("{error:#}"), "Failed to read BPF map");
                error_response(
                    path,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to read BPF map",
                )
            }
        },
        Route::Invalid(msg) => error_response(path, StatusCode::BAD_REQUEST, msg),
        Route::NotFound => error_response(path, StatusCode::NOT_FOUND, "not found"),
    }
}

/// Forwards a request to the agent API, passing its status and body through.
async fn relay(agent: &Agent, path: &str, upstream: &str) -> Response<Body> {
    match agent.get(upstream).await {
        Ok((status, body)) => json_response(status, body),
        Err(error) => {
            warn!(%path, error = %format_args!("{error:#}"), "Failed to call Cilium API");
            error_response(
                path,
                StatusCode::INTERNAL_SERVER_ERROR,
                "failed to call Cilium API",
            )
        }
    }
}

const INVALID_ENDPOINT: Route = Route::Invalid("failed to read endpoint ID");

/// Parameters are parsed as unsigned IDs so that nothing else reaches the agent.
fn route(path: &str) -> Route {
    if let Some(id) = path.strip_prefix("/v1/endpoint/") {
        return id.parse().map(Route::Endpoint).unwrap_or(INVALID_ENDPOINT);
    }
    if let Some(id) = path.strip_prefix("/v1/identity/") {
        return id
            .parse()
            .map(Route::Identity)
            .unwrap_or(Route::Invalid("failed to read identity"));
    }
    if let Some(id) = path.strip_prefix("/policy/") {
        return id.parse().map(Route::Policy).unwrap_or(INVALID_ENDPOINT);
    }
    Route::NotFound
}

fn json_response(status: StatusCode, body: Bytes) -> Response<Body> {
    let mut rsp = Response::new(Body::new(body));
    *rsp.status_mut() = status;
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    rsp
}

fn error_response(path: &str, status: StatusCode, msg: &str) -> Response<Body> {
    info!(%path, status = status.as_u16(), "{msg}");
    let body = serde_json::json!({
        "error": msg,
        "status": status.as_u16().to_string(),
    });
    let mut buf = body.to_string().into_bytes();
    buf.push(b'\n');
    json_response(status, buf.into())
}
