//! `GET /events`
//!
//! リスナーはレスポンスボディの中にある。クライアントが切断するとhyperがボディを
//! dropし、それによってリスナーもdropされ登録解除される。

use super::RoutedRequest;
use crate::AppState;
use axum::{
    body::Body,
    http::{header, HeaderValue},
    response::Response,
};
use fleet_common::error::RouterResult;
use std::{
    convert::Infallible,
    sync::atomic::{AtomicU64, Ordering},
};
use tracing::info;

static ANONYMOUS_LISTENERS: AtomicU64 = AtomicU64::new(0);

/// `GET /events`
pub async fn get_events(state: &AppState, request: RoutedRequest) -> RouterResult<Response> {
    let key = match request.remote_addr {
        Some(addr) => addr.to_string(),
        None => format!(
            "local-{}",
            ANONYMOUS_LISTENERS.fetch_add(1, Ordering::Relaxed)
        ),
    };
    let listener = state.events.add(key.clone()).await;
    info!(listener = %key, "Events listener connected");

    let stream = futures::stream::unfold(listener, |mut listener| async move {
        listener
            .recv()
            .await
            .map(|payload| (Ok::<_, Infallible>(payload), listener))
    });

    let mut response = Response::new(Body::from_stream(stream));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(response)
}
