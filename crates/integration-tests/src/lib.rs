//! Integration tests for Larder.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p larder-integration-tests
//! ```
//!
//! Everything runs in-process: the engine on `MemoryStore` and
//! `FakeGateway`, the HTTP API through `tower::ServiceExt::oneshot` with an
//! in-memory session store. No database or network is needed.
//!
//! # Test Categories
//!
//! - `engine_flows` - Services driven directly (concurrency, merge, checkout)
//! - `cart_api` - Cart endpoints over HTTP
//! - `checkout_api` - Payment, webhook and order endpoints over HTTP

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::Path,
    http::{Method, Request, StatusCode, header},
    routing::post,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use tower_sessions::{MemoryStore as SessionMemoryStore, Session};

use larder_core::{AddressInput, ProductId, ProductStatus, ProductType, UserId, VariationId};
use larder_storefront::config::StorefrontConfig;
use larder_storefront::db::MemoryStore;
use larder_storefront::middleware::session_layer;
use larder_storefront::models::{CatalogProduct, CatalogVariation, CurrentUser, session_keys};
use larder_storefront::payments::FakeGateway;
use larder_storefront::routes;
use larder_storefront::state::AppState;

/// Webhook signing secret used by [`TestApp`].
pub const WEBHOOK_SECRET: &str = "wh_k8F2nQ7vX1pL4rT9zB6mY3cH0dJ5wSaE";

/// Simple product, 10.00.
pub const JAR: ProductId = ProductId::new(1);
/// Simple product, 4.50.
pub const SPOON: ProductId = ProductId::new(2);
/// Variable product; only sold through variations.
pub const APRON: ProductId = ProductId::new(3);
/// Apron size L, 27.50.
pub const LARGE_APRON: VariationId = VariationId::new(31);

/// Simple product priced `price`, published, with `stock` units.
#[must_use]
pub fn product(id: ProductId, name: &str, price: Decimal, stock: i32) -> CatalogProduct {
    CatalogProduct {
        id,
        name: name.to_owned(),
        sku: Some(name.to_ascii_uppercase().replace(' ', "-")),
        product_type: ProductType::Simple,
        status: ProductStatus::Published,
        price,
        stock_quantity: stock,
        alert_threshold: 2,
    }
}

/// Catalog: JAR (stock `jar_stock`), SPOON (20), APRON with LARGE_APRON (10).
pub async fn seed_catalog(store: &MemoryStore, jar_stock: i32) {
    store
        .insert_product(product(JAR, "Jar", Decimal::new(1000, 2), jar_stock))
        .await;
    store
        .insert_product(product(SPOON, "Spoon", Decimal::new(450, 2), 20))
        .await;
    store
        .insert_product(CatalogProduct {
            product_type: ProductType::Variable,
            ..product(APRON, "Apron", Decimal::new(2500, 2), 0)
        })
        .await;
    store
        .insert_variation(CatalogVariation {
            id: LARGE_APRON,
            product_id: APRON,
            sku: Some("APRON-L".to_owned()),
            price: Decimal::new(2750, 2),
            stock_quantity: 10,
            alert_threshold: 2,
            attributes: BTreeMap::from([("size".to_owned(), "L".to_owned())]),
            is_active: true,
        })
        .await;
}

/// A valid address.
#[must_use]
pub fn address() -> AddressInput {
    AddressInput {
        first_name: "Grace".to_owned(),
        last_name: "Hopper".to_owned(),
        email: "grace@example.com".to_owned(),
        phone: Some("+1 555 0100".to_owned()),
        line1: "1 Compiler Way".to_owned(),
        line2: None,
        city: "Arlington".to_owned(),
        state: "VA".to_owned(),
        postal_code: "22201".to_owned(),
        country: "US".to_owned(),
    }
}

/// Configuration for tests: fake gateway, webhooks enabled, short timeout.
#[must_use]
pub fn test_config() -> StorefrontConfig {
    let vars = HashMap::from([
        ("STOREFRONT_DATABASE_URL", "postgres://localhost/larder_test"),
        ("STOREFRONT_BASE_URL", "http://localhost:3000"),
        ("PAYMENT_GATEWAY", "fake"),
        ("PAYMENT_WEBHOOK_SECRET", WEBHOOK_SECRET),
        ("PAYMENT_TIMEOUT_SECS", "1"),
    ]);
    StorefrontConfig::from_lookup(|key| vars.get(key).map(|v| (*v).to_owned())).unwrap()
}

/// Stand-in for the external auth layer: logs the session in as `id`.
async fn login(session: Session, Path(id): Path<i64>) -> StatusCode {
    let user = CurrentUser {
        id: UserId::new(id),
    };
    session
        .insert(session_keys::CURRENT_USER, user)
        .await
        .unwrap();
    StatusCode::NO_CONTENT
}

/// The storefront API over in-memory storage and gateway.
#[derive(Clone)]
pub struct TestApp {
    pub store: MemoryStore,
    pub gateway: FakeGateway,
    pub state: AppState,
    router: Router,
}

impl TestApp {
    /// App with the standard catalog (JAR stock 50).
    pub async fn new() -> Self {
        Self::with_jar_stock(50).await
    }

    pub async fn with_jar_stock(jar_stock: i32) -> Self {
        let store = MemoryStore::new();
        seed_catalog(&store, jar_stock).await;
        let gateway = FakeGateway::new();

        let config = test_config();
        let sessions = session_layer(SessionMemoryStore::default(), &config);
        let state = AppState::new(
            config,
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
        );

        let routes = routes::routes().route("/test/login/{id}", post(login));
        let router = larder_storefront::with_layers(routes, state.clone(), sessions);

        Self {
            store,
            gateway,
            state,
            router,
        }
    }

    /// A new client with an empty cookie jar.
    #[must_use]
    pub fn client(&self) -> Client {
        Client {
            router: self.router.clone(),
            cookie: None,
        }
    }
}

/// Response status and JSON body.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestResponse {
    /// The `data` member of a success envelope.
    #[must_use]
    pub fn data(&self) -> &Value {
        &self.body["data"]
    }

    /// The `error` kind of an error envelope.
    #[must_use]
    pub fn error(&self) -> &str {
        self.body["error"].as_str().unwrap_or_default()
    }
}

/// A browser-like client that keeps the session cookie between requests.
pub struct Client {
    router: Router,
    cookie: Option<String>,
}

impl Client {
    pub async fn get(&mut self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&mut self, uri: &str, body: Value) -> TestResponse {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn put(&mut self, uri: &str, body: Value) -> TestResponse {
        self.send(Method::PUT, uri, Some(body)).await
    }

    pub async fn delete(&mut self, uri: &str) -> TestResponse {
        self.send(Method::DELETE, uri, None).await
    }

    /// Log this client's session in as `user_id`.
    pub async fn login(&mut self, user_id: i64) {
        let response = self
            .send(Method::POST, &format!("/test/login/{user_id}"), None)
            .await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    /// POST raw bytes with extra headers.
    pub async fn post_raw(&mut self, uri: &str, body: Vec<u8>, headers: &[(&str, &str)]) -> TestResponse {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.dispatch(builder.body(Body::from(body)).unwrap()).await
    }

    async fn send(&mut self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        self.dispatch(request).await
    }

    async fn dispatch(&mut self, mut request: Request<Body>) -> TestResponse {
        if let Some(cookie) = &self.cookie {
            request
                .headers_mut()
                .insert(header::COOKIE, cookie.parse().unwrap());
        }

        let response = self.router.clone().oneshot(request).await.unwrap();

        if let Some(pair) = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
        {
            self.cookie = Some(pair.to_owned());
        }

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        TestResponse { status, body }
    }
}
