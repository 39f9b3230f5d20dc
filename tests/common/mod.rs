#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use medicart_api::{
    auth::{AuthConfig, AuthService, Claims},
    config::AppConfig,
    db,
    entities::{medicine, order, user, UserRole},
    events::{self, EventHandler, EventSender},
    handlers::AppServices,
    services::payments::{PaymentBridge, SandboxGateway},
    webhooks::OperatorAlertService,
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "medicart_integration_signing_key_only_for_tests_4b7e1d9a2c6f8e03";

/// Application harness backed by a SQLite file in a temporary directory.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub sandbox: Arc<SandboxGateway>,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting `configure` adjust the test configuration.
    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("medicart.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        configure(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let alerts = OperatorAlertService::from_config(&cfg)
            .expect("operator alert service")
            .with_backoff(std::time::Duration::from_millis(5));
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(alerts)];
        let event_task = tokio::spawn(events::process_events(event_rx, handlers));

        let sandbox = Arc::new(SandboxGateway::new());
        let bridge: Arc<dyn PaymentBridge> = sandbox.clone();
        let services = AppServices::new(db_arc.clone(), event_sender.clone(), bridge, &cfg);

        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&cfg)));
        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            event_sender,
            services,
        };
        let router = medicart_api::build_app(state.clone(), auth_service);

        Self {
            router,
            state,
            sandbox,
            _dir: dir,
            _event_task: event_task,
        }
    }

    /// Mint a bearer token the way the identity service would.
    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            name: Some("Test User".to_string()),
            email: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + chrono::Duration::hours(1)).timestamp(),
            nbf: now.timestamp(),
            iss: self.state.config.auth_issuer.clone(),
            aud: self.state.config.auth_audience.clone(),
        };

        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("encode access token")
    }

    pub async fn seed_user(&self, role: UserRole) -> user::Model {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            first_name: Set("Test".to_string()),
            last_name: Set("User".to_string()),
            email: Set(format!("{}@medicart.test", id.simple())),
            role: Set(role),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed user")
    }

    pub async fn seed_customer(&self) -> (user::Model, String) {
        let user = self.seed_user(UserRole::User).await;
        let token = self.token_for(user.id, &["user"]);
        (user, token)
    }

    pub async fn seed_admin(&self) -> (user::Model, String) {
        let user = self.seed_user(UserRole::Admin).await;
        let token = self.token_for(user.id, &["user", "admin"]);
        (user, token)
    }

    pub async fn seed_medicine(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        prescription_required: bool,
    ) -> medicine::Model {
        let now = Utc::now();
        medicine::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            description: Set(None),
            category: Set("general".to_string()),
            manufacturer: Set("Medicart Labs".to_string()),
            price: Set(price),
            discount_percent: Set(Decimal::ZERO),
            stock: Set(stock),
            prescription_required: Set(prescription_required),
            batch_number: Set(format!("B-{}", Uuid::new_v4().simple())),
            image_url: Set(Some(format!("https://img.medicart.test/{}.png", name))),
            expiry_date: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed medicine")
    }

    pub async fn stock_of(&self, medicine_id: Uuid) -> i32 {
        medicine::Entity::find_by_id(medicine_id)
            .one(&*self.state.db)
            .await
            .expect("query medicine")
            .expect("medicine exists")
            .stock
    }

    pub async fn set_price(&self, medicine_id: Uuid, price: Decimal) {
        let model = medicine::Entity::find_by_id(medicine_id)
            .one(&*self.state.db)
            .await
            .expect("query medicine")
            .expect("medicine exists");
        let mut active: medicine::ActiveModel = model.into();
        active.price = Set(price);
        active.update(&*self.state.db).await.expect("update price");
    }

    pub async fn set_stock(&self, medicine_id: Uuid, stock: i32) {
        let model = medicine::Entity::find_by_id(medicine_id)
            .one(&*self.state.db)
            .await
            .expect("query medicine")
            .expect("medicine exists");
        let mut active: medicine::ActiveModel = model.into();
        active.stock = Set(stock);
        active.update(&*self.state.db).await.expect("update stock");
    }

    pub async fn order_count(&self, user_id: Uuid) -> u64 {
        order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        self.send(builder.body(body).expect("failed to build request"))
            .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
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

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

/// Decimal fields serialize as strings; accept numbers too.
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("not a decimal: {other}"),
    }
}
