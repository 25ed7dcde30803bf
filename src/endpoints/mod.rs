pub mod hub;
pub mod notifications;
pub mod products;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use clap::Parser;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tower::ServiceExt;

    use crate::bus::{InProcessBus, spawn_consumer};
    use crate::hub::Frame;
    use crate::repository::{Repository, in_memory};
    use crate::state::SharedState;
    use crate::{Settings, router};

    async fn state() -> SharedState {
        let settings = Settings::parse_from(["notification_hub_server", "--send-timeout-ms", "50"]);
        let repository = Repository::new(in_memory().await);
        SharedState::new(repository, InProcessBus::new(settings.bus_channel_capacity), &settings)
    }

    async fn connect(state: &SharedState) -> (crate::hub::ConnectionId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(8);
        (state.registry.register(tx).await.unwrap(), rx)
    }

    fn json_request(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    fn decode(frame: &Frame) -> Value {
        serde_json::from_str(frame.as_str()).unwrap()
    }

    #[tokio::test]
    async fn broadcast_is_accepted_and_delivered_to_everyone() {
        let state = state().await;
        let (_c1, mut rx1) = connect(&state).await;
        let (_c2, mut rx2) = connect(&state).await;
        let app = router(state);

        let request = json_request("POST", "/notifications/broadcast", r#"{"price":9.99}"#);
        let (status, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body.is_empty());
        for rx in [&mut rx1, &mut rx2] {
            let frame = decode(&rx.try_recv().unwrap());
            assert_eq!(frame["event"], "broadcast");
            assert_eq!(frame["payload"], json!({ "price": 9.99 }));
        }
    }

    #[tokio::test]
    async fn broadcast_to_group_skips_non_members() {
        let state = state().await;
        let (c1, mut rx1) = connect(&state).await;
        let (_c2, mut rx2) = connect(&state).await;
        state.registry.join_group(c1, "vip").await;
        let app = router(state);

        let request = json_request("POST", "/notifications/broadcast?group=vip", r#"{"price":9.99}"#);
        let (status, _) = send(&app, request).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_single_connection() {
        let state = state().await;
        let (_c1, mut rx1) = connect(&state).await;
        let (c2, mut rx2) = connect(&state).await;
        let app = router(state);

        let uri = format!("/notifications/broadcast?connection={}", c2.get());
        let (status, _) = send(&app, json_request("POST", &uri, "\"ping\"")).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(rx1.try_recv().is_err());
        assert_eq!(decode(&rx2.try_recv().unwrap())["payload"], "ping");
    }

    #[tokio::test]
    async fn broadcast_rejects_bad_requests() {
        let app = router(state().await);

        for request in [
            json_request("POST", "/notifications/broadcast", "{not json"),
            json_request("POST", "/notifications/broadcast", "null"),
            json_request("POST", "/notifications/broadcast?group=a&connection=1", "{}"),
        ] {
            let (status, _) = send(&app, request).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn broadcast_with_dead_client_still_accepted() {
        let state = state().await;
        let (_c1, rx1) = connect(&state).await;
        let (_c2, mut rx2) = connect(&state).await;
        drop(rx1);
        let registry = state.registry.clone();
        let app = router(state);

        let (status, _) = send(&app, json_request("POST", "/notifications/broadcast", "1")).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(rx2.try_recv().is_ok());
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_after_shutdown_is_unavailable() {
        let state = state().await;
        state.registry.shutdown().await;
        let app = router(state);

        let (status, _) = send(&app, json_request("POST", "/notifications/broadcast", "{}")).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn product_lifecycle_over_http() {
        let app = router(state().await);

        let (status, body) = send(
            &app,
            json_request("POST", "/products", r#"{"name":"Widget","price":19.99,"stock":5}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let created: Value = serde_json::from_slice(&body).unwrap();
        let id = created["id"].as_i64().unwrap();
        assert_eq!(created["price"], 19.99);

        let (status, body) = send(&app, get(&format!("/products/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), created);

        let update = r#"{"name":"Widget v2","price":24.5,"stock":3}"#;
        let (status, _) = send(&app, json_request("PUT", &format!("/products/{id}"), update)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, get("/products")).await;
        assert_eq!(status, StatusCode::OK);
        let listed: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed[0]["name"], "Widget v2");

        let delete = Request::builder()
            .method("DELETE")
            .uri(format!("/products/{id}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, delete).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, get(&format!("/products/{id}"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn product_errors_map_to_statuses() {
        let app = router(state().await);

        let long_name = "x".repeat(101);
        let body = json!({ "name": long_name, "price": 1.0, "stock": 1 }).to_string();
        let (status, _) = send(&app, json_request("POST", "/products", &body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(&app, get("/products/top/0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, get("/products/404")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let update = r#"{"name":"Ghost","price":1.0,"stock":1}"#;
        let (status, _) = send(&app, json_request("PUT", "/products/404", update)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn top_products_over_http() {
        let app = router(state().await);
        for body in [
            r#"{"name":"Widget","price":19.99,"stock":5}"#,
            r#"{"name":"Gadget","price":29.99,"stock":2}"#,
        ] {
            send(&app, json_request("POST", "/products", body)).await;
        }

        let (status, body) = send(&app, get("/products/top/1")).await;

        assert_eq!(status, StatusCode::OK);
        let top: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(top.as_array().unwrap().len(), 1);
        assert_eq!(top[0]["name"], "Gadget");
    }

    #[tokio::test]
    async fn created_product_is_announced_to_clients() {
        let state = state().await;
        let (_c1, mut rx) = connect(&state).await;
        let consumer = spawn_consumer(&state.bus, state.bus_topic.to_string(), state.ingress.clone());
        let app = router(state);

        let body = r#"{"name":"Widget","price":19.99,"stock":5}"#;
        let (status, _) = send(&app, json_request("POST", "/products", body)).await;
        assert_eq!(status, StatusCode::CREATED);

        let frame = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        let frame = decode(&frame);
        assert_eq!(frame["event"], "broadcast");
        assert_eq!(frame["payload"]["kind"], "product-created");
        assert_eq!(frame["payload"]["product"]["name"], "Widget");

        consumer.abort();
    }
}
