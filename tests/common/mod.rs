#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use storefront_api::{
    build_router,
    config::AppConfig,
    db,
    entities::product,
    events,
    gateway::{
        CreateSessionRequest, CreatedSession, GatewayError, PaymentGateway, SessionFacts,
    },
    handlers::common::CART_ID_HEADER,
    notifications::{notifier_from_config, NotificationError, Notifier},
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const BUYER_EMAIL: &str = "buyer@example.com";

/// In-memory gateway. Sessions start unpaid; tests flip them with `mark_paid`.
#[derive(Default)]
pub struct FakeGateway {
    sessions: Mutex<HashMap<String, SessionFacts>>,
    requests: Mutex<Vec<CreateSessionRequest>>,
    next_id: AtomicUsize,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
    fail_create: AtomicBool,
    fail_get: AtomicBool,
}

impl FakeGateway {
    pub fn mark_paid(&self, session_id: &str) {
        self.update(session_id, |facts| facts.paid = true);
    }

    pub fn set_customer_email(&self, session_id: &str, email: Option<&str>) {
        self.update(session_id, |facts| {
            facts.customer_email = email.map(String::from)
        });
    }

    pub fn set_amount_total_minor(&self, session_id: &str, amount: i64) {
        self.update(session_id, |facts| facts.amount_total_minor = amount);
    }

    /// The gateway no longer knows the session.
    pub fn forget(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CreateSessionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    fn update(&self, session_id: &str, change: impl FnOnce(&mut SessionFacts)) {
        let mut sessions = self.sessions.lock().unwrap();
        let facts = sessions
            .get_mut(session_id)
            .unwrap_or_else(|| panic!("unknown fake session {}", session_id));
        change(facts);
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_session(
        &self,
        request: &CreateSessionRequest,
    ) -> Result<CreatedSession, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection refused".into()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("cs_test_{}", n);
        self.sessions.lock().unwrap().insert(
            session_id.clone(),
            SessionFacts {
                session_id: session_id.clone(),
                paid: false,
                customer_email: Some(BUYER_EMAIL.to_string()),
                amount_total_minor: request.amount_total_minor(),
            },
        );

        Ok(CreatedSession {
            redirect_url: format!("https://checkout.test/pay/{}", session_id),
            session_id,
        })
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionFacts>, GatewayError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection reset".into()));
        }
        Ok(self.sessions.lock().unwrap().get(session_id).cloned())
    }
}

/// A delivered confirmation as seen by the notifier.
#[derive(Debug, Clone, PartialEq)]
pub struct SentConfirmation {
    pub recipient: String,
    pub order_id: Uuid,
    pub total_amount: Decimal,
}

/// Records confirmations; can be switched to fail every delivery.
#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<SentConfirmation>>,
    failing: AtomicBool,
}

impl FakeNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentConfirmation> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn send(
        &self,
        recipient: &str,
        order_id: Uuid,
        total_amount: Decimal,
    ) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery {
                attempts: 1,
                reason: "relay down".into(),
            });
        }
        self.sent.lock().unwrap().push(SentConfirmation {
            recipient: recipient.to_string(),
            order_id,
            total_amount,
        });
        Ok(())
    }
}

/// Application wired against a migrated SQLite file, a fake gateway and a recording notifier.
pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<FakeNotifier>,
    _event_task: tokio::task::JoinHandle<()>,
    _db_dir: TempDir,
}

impl TestApp {
    /// Fresh database seeded with the standard catalog.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Like `new`, with config overrides applied before wiring. A configured
    /// `notification.relay_url` replaces the recording notifier with the real relay client.
    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("create temp dir");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.gateway.success_url =
            "https://shop.test/success?session_id={CHECKOUT_SESSION_ID}".to_string();
        cfg.gateway.cancel_url = "https://shop.test/cart".to_string();
        configure(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_sender, event_rx) = events::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(FakeNotifier::default());
        let app_notifier: Arc<dyn Notifier> = if cfg.notification.relay_url.is_some() {
            notifier_from_config(&cfg.notification).expect("relay notifier")
        } else {
            notifier.clone()
        };

        let state = Arc::new(AppState::new(
            Arc::new(pool),
            cfg,
            event_sender,
            gateway.clone(),
            app_notifier,
        ));
        let router = build_router(state.clone());

        let app = Self {
            router,
            state,
            gateway,
            notifier,
            _event_task: event_task,
            _db_dir: db_dir,
        };

        app.seed_product("P1", "Espresso Beans", Some("Dark roast, 1kg"), dec!(19.99), true)
            .await;
        app.seed_product("P2", "Pour-over Kettle", None, dec!(45.50), true)
            .await;
        app.seed_product("P3", "Retired Grinder", None, dec!(30.00), false)
            .await;
        app
    }

    pub async fn seed_product(
        &self,
        id: &str,
        name: &str,
        description: Option<&str>,
        price: Decimal,
        is_active: bool,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(id.to_string()),
            name: Set(name.to_string()),
            description: Set(description.map(String::from)),
            price: Set(price),
            is_active: Set(is_active),
            updated_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    /// Changes a product's catalog price.
    pub async fn reprice(&self, id: &str, price: Decimal) {
        product::ActiveModel {
            id: Set(id.to_string()),
            price: Set(price),
            updated_at: Set(Utc::now()),
            ..Default::default()
        }
        .update(&*self.state.db)
        .await
        .expect("reprice product");
    }

    /// Sends a request through the full middleware stack.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        cart_id: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(cart_id) = cart_id {
            builder = builder.header(CART_ID_HEADER, cart_id);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
