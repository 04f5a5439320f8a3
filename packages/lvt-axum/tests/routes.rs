//! Route-level behaviour through the full axum stack: page render with
//! cookie planting, the long-poll wire, and upgrade rejection.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use lvt::prelude::*;
use lvt_axum::LvtApp;
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Default)]
struct Counter {
    n: i64,
}

impl LiveStore for Counter {
    fn change(&mut self, ctx: &mut ActionContext) -> Result<(), ChangeError> {
        if ctx.name() == "inc" {
            self.n += 1;
        }
        Ok(())
    }

    fn assigns(&self) -> Value {
        json!({ "N": self.n })
    }
}

fn app() -> axum::Router {
    LvtApp::new()
        .live(
            "/counter",
            "<p>Count: {{.N}}</p>",
            Arc::new(|| Box::new(Counter::default()) as Box<dyn LiveStore>),
        )
        .expect("template compiles")
        .build()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn page_serves_initial_tree_and_plants_cookie() {
    let response = app()
        .oneshot(Request::builder().uri("/counter").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(cookie.starts_with("lvt_group="));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains(r#"data-lvt-id="root""#));
    assert!(html.contains("<p>Count: 0</p>"));
    assert!(html.contains("__LVT_BOOT__"));
    // `</` is escaped inside the inline JSON block.
    assert!(html.contains(r#""s":["<p>Count: ","<\/p>"]"#));
}

#[tokio::test]
async fn page_keeps_an_existing_group_cookie() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/counter")
                .header(header::COOKIE, "lvt_group=g-keep")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn poll_joins_dispatches_and_patches() {
    let app = app();

    let open = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/counter/poll")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, "lvt_group=g-poll")
                .body(Body::from(json!({ "frames": [] }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(open.status(), StatusCode::OK);
    let open = body_json(open).await;
    let conn = open["conn"].as_str().expect("connection id").to_string();
    assert_eq!(open["frames"][0]["type"], "full");
    assert_eq!(open["frames"][0]["root"]["0"], "0");

    let next = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/counter/poll")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, "lvt_group=g-poll")
                .body(Body::from(
                    json!({
                        "conn": conn,
                        "frames": [ { "type": "action", "name": "inc" } ],
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(next.status(), StatusCode::OK);
    let next = body_json(next).await;
    assert_eq!(next["frames"][0]["type"], "patch");
    assert_eq!(next["frames"][0]["root"]["0"], "1");
}

#[tokio::test]
async fn poll_with_unknown_connection_is_gone() {
    let response = app()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/counter/poll")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::COOKIE, "lvt_group=g-gone")
                .body(Body::from(
                    json!({
                        "conn": "00000000-0000-0000-0000-000000000000",
                        "frames": [],
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GONE);
}

#[tokio::test]
async fn ws_without_an_upgrade_is_rejected() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/counter/ws")
                .header(header::COOKIE, "lvt_group=g-ws")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.status().is_client_error());
}
