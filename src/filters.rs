use tracing::debug;
use warp::{
    reject::{self, Reject},
    Filter,
};

use crate::controllers::SiteController;
use crate::models::UserState;

#[derive(Debug)]
pub struct Unauthorized;

impl Reject for Unauthorized {}

/// The token of an `Authorization: Session <token>` header.
fn session_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let space = header.find(' ')?;
    let (scheme, token) = (&header[..space], header[space..].trim());

    if scheme.eq_ignore_ascii_case("session") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

pub fn with_controller(
    controller: SiteController,
) -> impl Filter<Extract = (SiteController,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || controller.clone())
}

/// The caller's state from their session token, or a fresh user when the
/// request carries none.
pub fn user_state(
    controller: SiteController,
) -> impl Filter<Extract = (UserState,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("Authorization")
        .and(with_controller(controller))
        .and_then(|header: Option<String>, controller: SiteController| async move {
            let header = match header {
                None => return Ok(controller.create_user()),
                Some(header) => header,
            };

            let token = session_token(&header).ok_or_else(|| {
                debug!("authorization header is not a session token");
                reject::custom(Unauthorized)
            })?;

            controller.open_user(token).map_err(|err| {
                debug!(%err, "rejecting session token");
                reject::custom(Unauthorized)
            })
        })
}
