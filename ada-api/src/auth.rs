use ada_orchestrator::Actor;
use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

/// Auth middleware - builds the request's [`Actor`] from identity headers
///
/// The portal's authenticating proxy sets `x-ada-user` (or the oauth2-proxy
/// `x-forwarded-user`), `x-ada-admin` and `x-ada-group`. Requests without a
/// user are rejected with 401.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let actor = actor_from_headers(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(actor);

    Ok(next.run(req).await)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn actor_from_headers(headers: &HeaderMap) -> Option<Actor> {
    let user = header(headers, "x-ada-user").or_else(|| header(headers, "x-forwarded-user"))?;

    let mut actor = if header(headers, "x-ada-admin").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
        Actor::admin(user)
    } else {
        Actor::user(user)
    };

    if let Some(group) = header(headers, "x-ada-group") {
        actor = actor.with_group(group);
    }

    Some(actor)
}
