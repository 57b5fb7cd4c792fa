use std::net::SocketAddr;

use axum::{middleware, routing::get, Router};
use tower_http::{
    cors::CorsLayer, limit::RequestBodyLimitLayer, services::ServeDir, trace::TraceLayer,
};

use crate::{
    audit, auth,
    error::error_envelope,
    events, participants,
    rate_limit::throttle,
    state::AppState,
    storage::PUBLIC_PREFIX,
    students, users,
};

pub fn build_app(state: AppState) -> Router {
    let max_upload = state.config.max_upload_bytes;

    let api = Router::new()
        .merge(auth::router())
        .merge(users::router())
        .merge(students::router(max_upload))
        .merge(events::router(max_upload))
        .merge(participants::router())
        .merge(audit::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), throttle));

    Router::new()
        .merge(api)
        .route("/health", get(|| async { "ok" }))
        .nest_service(PUBLIC_PREFIX, ServeDir::new(&state.config.upload_dir))
        .layer(middleware::from_fn(error_envelope))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(max_upload))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router, addr: SocketAddr) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
