//! Initial page handler
//!
//! Serves the first full render: resolves (or plants) the group identity,
//! creates the group's store on first access, and embeds the serialised
//! initial tree plus a bootstrap block the client reads before opening the
//! wire. The root container carries `data-lvt-id="root"`; the client
//! targets every morph from there.

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{Html, IntoResponse, Response};
use lvt::tree::encode_full;
use serde_json::json;

use crate::app::RouteState;
use crate::error::TransportError;
use crate::identity;

pub(crate) async fn page_handler(
    State(state): State<RouteState>,
    headers: HeaderMap,
) -> Result<Response, TransportError> {
    let (group, fresh) = match (state.identity)(&headers) {
        Some(group) => (group, false),
        None => (identity::generate_group_id(), true),
    };

    let tree = state.handle.initial_tree(&group).await?;
    let bootstrap = json!({
        "group": group,
        "ws": state.ws_path,
        "poll": state.poll_path,
        "tree": encode_full(&tree),
    });
    let html = render_page(&state.title, &tree.to_html(), &bootstrap.to_string(), &state.client_src);

    let mut response = Html(html).into_response();
    if fresh {
        if let Ok(cookie) = HeaderValue::from_str(&identity::group_cookie(&group)) {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
    }
    Ok(response)
}

/// Render the full HTML document around the initial tree.
fn render_page(title: &str, body: &str, bootstrap: &str, client_src: &str) -> String {
    // `</` must not appear verbatim inside the inline JSON block.
    let bootstrap = bootstrap.replace("</", "<\\/");
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
</head>
<body>
    <div id="lvt-root" data-lvt-id="root">{body}</div>
    <script type="application/json" id="__LVT_BOOT__">{bootstrap}</script>
    <script type="module" src="{client_src}"></script>
</body>
</html>"#
    )
}
