use log::{info, warn};
use warp::http::StatusCode;
use warp::ws::Ws;
use warp::{Filter, Rejection, Reply};

use crate::constants::WS_PATH;
use crate::context::AppContext;
use crate::core::connection::{Connection, ConnectionSettings};
use crate::core::hub::HubHandle;
use crate::error::RustyRoomsError;
use crate::handlers::auth::{resolve_identity, UpgradeQuery};
use crate::handlers::{with_context, with_hub};

/// `GET /ws`: authenticate, then upgrade into a hub connection
pub fn ws_route(
    ctx: AppContext,
    hub: HubHandle,
) -> impl Filter<Extract = (Box<dyn Reply>,), Error = Rejection> + Clone {
    warp::path(WS_PATH)
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::header::optional::<String>("authorization"))
        .and(upgrade_query())
        .and(with_context(ctx))
        .and(with_hub(hub))
        .map(handle_upgrade)
}

/// Query parameters, defaulting to none when the query string is absent or
/// does not parse
fn upgrade_query() -> impl Filter<Extract = (UpgradeQuery,), Error = std::convert::Infallible> + Clone
{
    warp::query::<UpgradeQuery>()
        .or(warp::any().map(UpgradeQuery::default))
        .unify()
}

fn handle_upgrade(
    ws: Ws,
    authorization: Option<String>,
    query: UpgradeQuery,
    ctx: AppContext,
    hub: HubHandle,
) -> Box<dyn Reply> {
    let user = match resolve_identity(
        authorization.as_deref(),
        &query,
        ctx.auth.as_ref(),
        ctx.config.allow_anonymous_access,
    ) {
        Ok(user) => user,
        Err(RustyRoomsError::Forbidden) => {
            warn!("Rejected WebSocket upgrade: invalid token");
            return Box::new(warp::reply::with_status("Forbidden", StatusCode::FORBIDDEN));
        }
        Err(e) => {
            warn!("Rejected WebSocket upgrade: {}", e);
            return Box::new(warp::reply::with_status(
                "Please login or provide name",
                StatusCode::BAD_REQUEST,
            ));
        }
    };

    info!("New websocket connection for {} ({})", user.name, user.id);

    let settings = ConnectionSettings::from_config(&ctx.config);
    Box::new(
        ws.max_message_size(settings.max_message_size)
            .on_upgrade(move |socket| Connection::serve(socket, user, hub, settings)),
    )
}
