//! Request handlers for different server endpoints

pub mod api;
pub mod auth;
pub mod websocket;

use std::convert::Infallible;
use warp::{Filter, Rejection, Reply};

use crate::context::AppContext;
use crate::core::hub::HubHandle;

pub use api::api_routes;
pub use websocket::ws_route;

/// Every route the server exposes: `/ws`, the credential API, `/health` and
/// static files from the public directory
pub fn routes(
    ctx: AppContext,
    hub: HubHandle,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health = warp::path("health").and(warp::path::end()).map(|| "OK");
    let public = warp::fs::dir(ctx.config.public_dir.clone());

    ws_route(ctx.clone(), hub)
        .or(api_routes(ctx))
        .or(health)
        .or(public)
}

// Helper function to include the application context in a request
pub fn with_context(ctx: AppContext) -> impl Filter<Extract = (AppContext,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

pub fn with_hub(hub: HubHandle) -> impl Filter<Extract = (HubHandle,), Error = Infallible> + Clone {
    warp::any().map(move || hub.clone())
}
