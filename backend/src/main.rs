use dotenvy::dotenv;
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{TraceLayer, DefaultMakeSpan, DefaultOnResponse};
use tower_sessions::MemoryStore;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use std::sync::Arc;

mod config;
mod db;
mod error;
mod schema;

mod handlers {
    pub mod auth_dtos;
    pub mod auth_handlers;
    pub mod auth_middleware;
    pub mod billing_handlers;
    pub mod campaign_handlers;
    pub mod dashboard_handlers;
    pub mod google_calendar;
    pub mod google_calendar_auth;
    pub mod lead_handlers;
    pub mod meeting_handlers;
    pub mod stripe_handlers;
}
mod api {
    pub mod google_calendar_api;
    pub mod lix;
}
mod models {
    pub mod campaign_models;
    pub mod credit_models;
    pub mod lead_models;
    pub mod meeting_models;
    pub mod user_models;
}
mod repositories {
    pub mod calendar_repository;
    pub mod campaign_repository;
    pub mod credit_repository;
    pub mod lead_repository;
    pub mod meeting_repository;
    pub mod user_repository;
}
mod utils {
    pub mod encryption;
    pub mod enrichment;
    pub mod scheduling;
    pub mod usage;
}
mod jobs {
    pub mod scheduler;
}

use api::google_calendar_api::GoogleCalendarApi;
use api::lix::{LeadSearch, LixClient};
use config::AppConfig;
use db::DbPool;
use handlers::google_calendar_auth::{build_oauth_client, GoogleOAuthClient};
use repositories::calendar_repository::CalendarRepository;
use repositories::campaign_repository::CampaignRepository;
use repositories::credit_repository::CreditRepository;
use repositories::lead_repository::LeadRepository;
use repositories::meeting_repository::MeetingRepository;
use repositories::user_repository::UserRepository;
use utils::encryption::TokenCipher;

use handlers::auth_handlers;
use handlers::billing_handlers;
use handlers::campaign_handlers;
use handlers::dashboard_handlers;
use handlers::google_calendar;
use handlers::google_calendar_auth;
use handlers::lead_handlers;
use handlers::meeting_handlers;
use handlers::stripe_handlers;

async fn health_check() -> &'static str {
    "OK"
}

pub struct AppState {
    config: AppConfig,
    user_repository: Arc<UserRepository>,
    campaign_repository: Arc<CampaignRepository>,
    lead_repository: Arc<LeadRepository>,
    credit_repository: Arc<CreditRepository>,
    meeting_repository: Arc<MeetingRepository>,
    calendar_repository: Arc<CalendarRepository>,
    lead_search: Arc<dyn LeadSearch>,
    calendar_api: GoogleCalendarApi,
    oauth_client: GoogleOAuthClient,
    session_store: MemoryStore,
}

impl AppState {
    pub fn new(config: AppConfig, pool: DbPool, lead_search: Arc<dyn LeadSearch>) -> anyhow::Result<Self> {
        let cipher = TokenCipher::from_base64_key(&config.encryption_key)?;
        let calendar_api = GoogleCalendarApi::new(&config.google_calendar_api_base)?;
        let oauth_client = build_oauth_client(&config)?;

        Ok(AppState {
            user_repository: Arc::new(UserRepository::new(pool.clone())),
            campaign_repository: Arc::new(CampaignRepository::new(pool.clone())),
            lead_repository: Arc::new(LeadRepository::new(pool.clone())),
            credit_repository: Arc::new(CreditRepository::new(pool.clone())),
            meeting_repository: Arc::new(MeetingRepository::new(pool.clone())),
            calendar_repository: Arc::new(CalendarRepository::new(pool, cipher)),
            lead_search,
            calendar_api,
            oauth_client,
            session_store: MemoryStore::default(),
            config,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::OPTIONS,
            axum::http::Method::DELETE,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION])
        .expose_headers([axum::http::header::CONTENT_TYPE]);
    let cors = match state.config.frontend_url.parse::<HeaderValue>() {
        Ok(origin) if !state.config.is_development() => cors.allow_origin(origin),
        _ => cors.allow_origin(Any),
    };

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/login", post(auth_handlers::login))
        .route("/api/register", post(auth_handlers::register))
        .route("/api/profile", get(auth_handlers::get_profile))

        .route("/api/campaigns", get(campaign_handlers::list_campaigns).post(campaign_handlers::create_campaign))
        .route(
            "/api/campaigns/{id}",
            get(campaign_handlers::get_campaign)
                .put(campaign_handlers::update_campaign)
                .delete(campaign_handlers::delete_campaign),
        )
        .route("/api/campaigns/{id}/launch", post(campaign_handlers::launch_campaign))
        .route("/api/campaigns/{id}/status", post(campaign_handlers::update_campaign_status))
        .route("/api/campaigns/{id}/stats", get(campaign_handlers::campaign_stats))
        .route("/api/campaigns/{id}/leads", get(lead_handlers::list_campaign_leads))

        .route("/api/leads/{id}/message-sent", post(lead_handlers::mark_message_sent))
        .route("/api/leads/{id}/reply", post(lead_handlers::record_reply))
        .route("/api/leads/{id}/notes", get(lead_handlers::list_notes).post(lead_handlers::add_note))

        .route("/api/billing/balance", get(billing_handlers::get_balance))
        .route("/api/billing/transactions", get(billing_handlers::get_transactions))
        .route("/api/billing/payment-intent", post(stripe_handlers::create_payment_intent))
        .route("/api/stripe/webhook", post(stripe_handlers::stripe_webhook))

        .route("/api/auth/google/calendar/login", get(google_calendar_auth::google_calendar_login))
        .route("/api/auth/google/calendar/callback", get(google_calendar_auth::google_calendar_callback))
        .route("/api/auth/google/calendar/status", get(google_calendar_auth::google_calendar_status))
        .route(
            "/api/auth/google/calendar/connection",
            axum::routing::delete(google_calendar_auth::delete_google_calendar_connection),
        )
        .route("/api/calendar/availability", get(google_calendar::get_availability))

        .route("/api/meetings", get(meeting_handlers::list_meetings).post(meeting_handlers::create_meeting))
        .route("/api/meetings/{id}/status", post(meeting_handlers::update_meeting_status))

        .route("/api/dashboard/stats", get(dashboard_handlers::get_dashboard_stats))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO))
        )
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;

    let _guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((dsn, sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(config.environment.clone().into()),
            ..Default::default()
        }))
    });

    let pool = db::build_pool(&config.database_url)?;
    db::run_migrations(&pool)?;

    let lead_search: Arc<dyn LeadSearch> = Arc::new(LixClient::new(
        config.lix_api_key.clone(),
        config.lix_base_url.clone(),
        config.lix_timeout_secs,
    )?);
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, pool, lead_search)?);

    let app = build_router(state.clone());

    // Start the scheduler
    let state_for_scheduler = state.clone();
    tokio::spawn(async move {
        if let Err(e) = jobs::scheduler::start_scheduler(state_for_scheduler).await {
            tracing::error!("Failed to start scheduler: {}", e);
        }
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on {}", bind_addr);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn test_state(config: AppConfig, lead_search: Arc<dyn LeadSearch>) -> Arc<AppState> {
    Arc::new(AppState::new(config, db::test_pool(), lead_search).expect("test state"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::lix::{LeadRecord, LixError, MockLeadSearch};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn idle_search() -> Arc<dyn LeadSearch> {
        let mut search = MockLeadSearch::new();
        search.expect_search_people().times(0);
        Arc::new(search)
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register(app: &Router, email: &str) -> String {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/register",
            None,
            Some(json!({"email": email, "password": "correct horse", "full_name": "Sam Seller"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    fn user_id_of(state: &AppState, email: &str) -> i32 {
        state.user_repository.find_by_email(email).unwrap().unwrap().id
    }

    async fn create_campaign(app: &Router, token: &str, max_leads: i32) -> i64 {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/campaigns",
            Some(token),
            Some(json!({
                "name": "Series A founders",
                "job_titles": ["Founder", "CEO"],
                "locations": ["Berlin"],
                "message_template": "Hi {first_name}",
                "max_leads": max_leads
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["campaign"]["status"], "draft");
        body["campaign"]["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn health_check_is_public() {
        let app = build_router(test_state(AppConfig::for_tests(), idle_search()));
        let response = app
            .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_login_and_profile() {
        let app = build_router(test_state(AppConfig::for_tests(), idle_search()));
        register(&app, "sam@example.com").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/register",
            None,
            Some(json!({"email": "SAM@example.com", "password": "another password"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/login",
            None,
            Some(json!({"email": "sam@example.com", "password": "wrong password"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/login",
            None,
            Some(json!({"email": "sam@example.com", "password": "correct horse"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = send(&app, Method::GET, "/api/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "sam@example.com");
        assert_eq!(body["user"]["full_name"], "Sam Seller");
        assert_eq!(body["user"]["credits_balance"], 0);
    }

    #[tokio::test]
    async fn protected_routes_require_a_token() {
        let app = build_router(test_state(AppConfig::for_tests(), idle_search()));
        let (status, body) = send(&app, Method::GET, "/api/campaigns", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);

        let (status, _) = send(&app, Method::GET, "/api/campaigns", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn launch_enriches_campaign_and_charges_found_leads() {
        let mut search = MockLeadSearch::new();
        search.expect_search_people().times(1).returning(|query| {
            assert_eq!(query.job_titles, vec!["Founder".to_string(), "CEO".to_string()]);
            Ok(vec![
                LeadRecord { full_name: Some("Ada L".into()), email: Some("ada@example.com".into()), ..Default::default() },
                LeadRecord { first_name: Some("Alan".into()), last_name: Some("T".into()), ..Default::default() },
            ])
        });
        let state = test_state(AppConfig::for_tests(), Arc::new(search));
        let app = build_router(state.clone());
        let token = register(&app, "launch@example.com").await;
        let user_id = user_id_of(&state, "launch@example.com");
        state.credit_repository.record_purchase(user_id, 100, "pi_seed", None).unwrap();

        let campaign_id = create_campaign(&app, &token, 10).await;
        let (status, body) = send(&app, Method::POST, &format!("/api/campaigns/{}/launch", campaign_id), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["success"], true);
        assert_eq!(body["status"], "active");
        assert_eq!(body["leads_generated"], 2);
        assert_eq!(body["credits_charged"], 2);

        let (_, body) = send(&app, Method::GET, "/api/billing/balance", Some(&token), None).await;
        assert_eq!(body["balance"], 98);

        let (_, body) = send(&app, Method::GET, &format!("/api/campaigns/{}/leads", campaign_id), Some(&token), None).await;
        assert_eq!(body["leads"].as_array().unwrap().len(), 2);

        // launching an active campaign again is refused
        let (status, _) = send(&app, Method::POST, &format!("/api/campaigns/{}/launch", campaign_id), Some(&token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, body) = send(&app, Method::GET, "/api/dashboard/stats", Some(&token), None).await;
        assert_eq!(body["total_campaigns"], 1);
        assert_eq!(body["campaigns_by_status"]["active"], 1);
        assert_eq!(body["total_leads"], 2);
        assert_eq!(body["credit_balance"], 98);
    }

    #[tokio::test]
    async fn failed_search_reports_retryable_failure() {
        let mut search = MockLeadSearch::new();
        search.expect_search_people().returning(|_| Err(LixError::Timeout(30)));
        let state = test_state(AppConfig::for_tests(), Arc::new(search));
        let app = build_router(state.clone());
        let token = register(&app, "timeout@example.com").await;
        let user_id = user_id_of(&state, "timeout@example.com");
        state.credit_repository.record_purchase(user_id, 50, "pi_seed", None).unwrap();

        let campaign_id = create_campaign(&app, &token, 25).await;
        let (status, body) = send(&app, Method::POST, &format!("/api/campaigns/{}/launch", campaign_id), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["status"], "failed");
        assert_eq!(body["retryable"], true);

        let (_, body) = send(&app, Method::GET, &format!("/api/campaigns/{}", campaign_id), Some(&token), None).await;
        assert_eq!(body["campaign"]["status"], "failed");
        let (_, body) = send(&app, Method::GET, "/api/billing/balance", Some(&token), None).await;
        assert_eq!(body["balance"], 50);
    }

    #[tokio::test]
    async fn campaigns_are_private_and_status_changes_are_validated() {
        let mut search = MockLeadSearch::new();
        search.expect_search_people().returning(|_| Ok(vec![LeadRecord { full_name: Some("Only One".into()), ..Default::default() }]));
        let state = test_state(AppConfig::for_tests(), Arc::new(search));
        let app = build_router(state.clone());
        let owner = register(&app, "owner@example.com").await;
        let other = register(&app, "other@example.com").await;
        let campaign_id = create_campaign(&app, &owner, 5).await;
        let uri = format!("/api/campaigns/{}", campaign_id);

        let (status, _) = send(&app, Method::GET, &uri, Some(&other), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::DELETE, &uri, Some(&other), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // draft cannot jump straight to paused
        let (status, _) = send(&app, Method::POST, &format!("{}/status", uri), Some(&owner), Some(json!({"status": "paused"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = send(&app, Method::POST, &format!("{}/status", uri), Some(&owner), Some(json!({"status": "enriching"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, Method::PUT, &uri, Some(&owner), Some(json!({"max_leads": 3, "industries": ["SaaS"]}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["campaign"]["max_leads"], 3);
        assert_eq!(body["campaign"]["industries"], json!(["SaaS"]));

        let owner_id = user_id_of(&state, "owner@example.com");
        state.credit_repository.record_purchase(owner_id, 10, "pi_owner", None).unwrap();
        send(&app, Method::POST, &format!("{}/launch", uri), Some(&owner), None).await;

        let (status, _) = send(&app, Method::PUT, &uri, Some(&owner), Some(json!({"name": "Renamed"}))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, Method::POST, &format!("{}/status", uri), Some(&owner), Some(json!({"status": "paused"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "paused");

        let (status, _) = send(&app, Method::DELETE, &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::GET, &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lead_tracking_updates_stats() {
        let mut search = MockLeadSearch::new();
        search.expect_search_people().returning(|_| {
            Ok(vec![
                LeadRecord { full_name: Some("Lead One".into()), ..Default::default() },
                LeadRecord { full_name: Some("Lead Two".into()), ..Default::default() },
            ])
        });
        let state = test_state(AppConfig::for_tests(), Arc::new(search));
        let app = build_router(state.clone());
        let token = register(&app, "tracker@example.com").await;
        let other = register(&app, "snoop@example.com").await;
        let user_id = user_id_of(&state, "tracker@example.com");
        state.credit_repository.record_purchase(user_id, 10, "pi_seed", None).unwrap();
        let campaign_id = create_campaign(&app, &token, 2).await;
        send(&app, Method::POST, &format!("/api/campaigns/{}/launch", campaign_id), Some(&token), None).await;

        let (_, body) = send(&app, Method::GET, &format!("/api/campaigns/{}/leads", campaign_id), Some(&token), None).await;
        let lead_id = body["leads"][0]["id"].as_i64().unwrap();

        let (status, _) = send(&app, Method::POST, &format!("/api/leads/{}/message-sent", lead_id), Some(&other), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, Method::POST, &format!("/api/leads/{}/message-sent", lead_id), Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lead"]["message_sent"], true);

        let (status, _) = send(
            &app, Method::POST, &format!("/api/leads/{}/reply", lead_id), Some(&token),
            Some(json!({"content": "Sounds good", "intent": "enthusiastic"})),
        ).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app, Method::POST, &format!("/api/leads/{}/reply", lead_id), Some(&token),
            Some(json!({"content": "Sounds good, let's talk", "intent": "meeting_request"})),
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lead"]["intent"], "meeting_request");

        send(&app, Method::POST, &format!("/api/leads/{}/notes", lead_id), Some(&token), Some(json!({"content": "Prefers mornings"}))).await;
        let (_, body) = send(&app, Method::GET, &format!("/api/leads/{}/notes", lead_id), Some(&token), None).await;
        assert_eq!(body["notes"][0]["content"], "Prefers mornings");

        let (_, body) = send(&app, Method::GET, &format!("/api/campaigns/{}/stats", campaign_id), Some(&token), None).await;
        assert_eq!(body["stats"]["total_leads"], 2);
        assert_eq!(body["stats"]["messages_sent"], 1);
        assert_eq!(body["stats"]["replies"], 1);
        assert_eq!(body["stats"]["positive_replies"], 1);
        assert_eq!(body["stats"]["reply_rate"], 1.0);
    }

    #[tokio::test]
    async fn webhook_requires_signature() {
        let app = build_router(test_state(AppConfig::for_tests(), idle_search()));
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/stripe/webhook")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/stripe/webhook")
                    .header("stripe-signature", "t=1,v1=deadbeef")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn purchase_below_minimum_is_rejected_before_stripe() {
        let app = build_router(test_state(AppConfig::for_tests(), idle_search()));
        let token = register(&app, "buyer@example.com").await;
        let (status, body) = send(&app, Method::POST, "/api/billing/payment-intent", Some(&token), Some(json!({"credits": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Minimum"));
    }

    #[tokio::test]
    async fn calendar_oauth_asks_for_offline_access() {
        let app = build_router(test_state(AppConfig::for_tests(), idle_search()));
        let token = register(&app, "oauth@example.com").await;

        let (status, body) = send(&app, Method::GET, "/api/auth/google/calendar/login", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        let auth_url = body["auth_url"].as_str().unwrap();
        assert!(auth_url.starts_with("https://accounts.google.com/o/oauth2/v2/auth"));
        assert!(auth_url.contains("access_type=offline"));
        assert!(auth_url.contains("prompt=consent"));
        assert!(auth_url.contains("code_challenge="));
        assert!(auth_url.contains("calendar.events"));

        let (status, _) = send(&app, Method::GET, "/api/auth/google/calendar/callback?code=abc&state=garbage", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, Method::GET, "/api/auth/google/calendar/callback?code=abc&state=12345:csrf", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, Method::GET, "/api/auth/google/calendar/status", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], false);
    }

    async fn google_mock() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh-token",
                "token_type": "Bearer",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/freeBusy"))
            .and(header("authorization", "Bearer stale-token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/freeBusy"))
            .and(header("authorization", "Bearer fresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "calendars": {"primary": {"busy": [
                    {"start": "2030-03-04T09:00:00Z", "end": "2030-03-04T10:00:00Z"}
                ]}}
            })))
            .mount(&server)
            .await;
        server
    }

    fn google_config(server: &MockServer) -> AppConfig {
        let mut config = AppConfig::for_tests();
        config.google_calendar_api_base = server.uri();
        config.google_token_url = format!("{}/token", server.uri());
        config
    }

    #[tokio::test]
    async fn availability_refreshes_expired_token_once() {
        let server = google_mock().await;
        let state = test_state(google_config(&server), idle_search());
        let app = build_router(state.clone());
        let token = register(&app, "cal@example.com").await;
        let user_id = user_id_of(&state, "cal@example.com");

        let (status, _) = send(
            &app, Method::GET,
            "/api/calendar/availability?start=2030-03-04T00:00:00Z&end=2030-03-05T00:00:00Z",
            Some(&token), None,
        ).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "no connection yet");

        state.calendar_repository
            .create_google_calendar_connection(user_id, "stale-token", "refresh-token", 3600)
            .unwrap();

        let (status, body) = send(
            &app, Method::GET,
            "/api/calendar/availability?start=2030-03-04T00:00:00Z&end=2030-03-05T00:00:00Z",
            Some(&token), None,
        ).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        let slots = body["slots"].as_array().unwrap();
        assert_eq!(slots.len(), 14);
        assert_eq!(slots[0]["start"], "2030-03-04T10:00:00Z");

        let (access, _) = state.calendar_repository.get_google_calendar_tokens(user_id).unwrap().unwrap();
        assert_eq!(access, "fresh-token");

        let (status, _) = send(
            &app, Method::GET,
            "/api/calendar/availability?start=2030-03-04T00:00:00Z&end=2030-05-04T00:00:00Z",
            Some(&token), None,
        ).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "range over 31 days");
    }

    #[tokio::test]
    async fn booking_checks_slot_then_creates_event() {
        let server = google_mock().await;
        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "evt_42",
                "htmlLink": "https://calendar.google.com/event?eid=42",
                "hangoutLink": "https://meet.google.com/xyz-abcd-efg"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut search = MockLeadSearch::new();
        search.expect_search_people().returning(|_| {
            Ok(vec![LeadRecord { full_name: Some("Grace H".into()), email: Some("grace@example.com".into()), ..Default::default() }])
        });
        let state = test_state(google_config(&server), Arc::new(search));
        let app = build_router(state.clone());
        let token = register(&app, "booker@example.com").await;
        let user_id = user_id_of(&state, "booker@example.com");
        state.credit_repository.record_purchase(user_id, 10, "pi_seed", None).unwrap();
        state.calendar_repository
            .create_google_calendar_connection(user_id, "fresh-token", "refresh-token", 3600)
            .unwrap();

        let campaign_id = create_campaign(&app, &token, 1).await;
        send(&app, Method::POST, &format!("/api/campaigns/{}/launch", campaign_id), Some(&token), None).await;
        let (_, body) = send(&app, Method::GET, &format!("/api/campaigns/{}/leads", campaign_id), Some(&token), None).await;
        let lead_id = body["leads"][0]["id"].as_i64().unwrap();

        let (status, _) = send(
            &app, Method::POST, "/api/meetings", Some(&token),
            Some(json!({"lead_id": lead_id, "start": "2030-03-04T09:30:00Z"})),
        ).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(
            &app, Method::POST, "/api/meetings", Some(&token),
            Some(json!({"lead_id": lead_id, "start": "2030-03-04T11:00:00Z", "duration_minutes": 45})),
        ).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["meeting"]["calendar_event_id"], "evt_42");
        assert_eq!(body["meeting"]["meeting_link"], "https://meet.google.com/xyz-abcd-efg");
        assert_eq!(body["meeting"]["status"], "scheduled");
        let meeting_id = body["meeting"]["id"].as_i64().unwrap();

        let (_, body) = send(&app, Method::GET, &format!("/api/campaigns/{}/leads", campaign_id), Some(&token), None).await;
        assert_eq!(body["leads"][0]["meeting_scheduled"], true);

        let (status, body) = send(
            &app, Method::POST, &format!("/api/meetings/{}/status", meeting_id), Some(&token),
            Some(json!({"status": "cancelled"})),
        ).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["meeting"]["status"], "cancelled");

        let (_, body) = send(&app, Method::GET, &format!("/api/campaigns/{}/leads", campaign_id), Some(&token), None).await;
        assert_eq!(body["leads"][0]["meeting_scheduled"], false);

        let (_, body) = send(&app, Method::GET, "/api/meetings", Some(&token), None).await;
        assert_eq!(body["meetings"].as_array().unwrap().len(), 1);
    }

    // Deletes the campaign while Google is creating the event, so recording the meeting fails.
    struct CampaignDeletedMidBooking {
        state: Arc<AppState>,
        campaign_id: i32,
        user_id: i32,
    }

    impl wiremock::Respond for CampaignDeletedMidBooking {
        fn respond(&self, _: &wiremock::Request) -> ResponseTemplate {
            assert!(self.state.campaign_repository.delete(self.campaign_id, self.user_id).unwrap());
            ResponseTemplate::new(200).set_body_json(json!({
                "id": "evt_orphan",
                "hangoutLink": "https://meet.google.com/orp-hane-vnt"
            }))
        }
    }

    #[tokio::test]
    async fn unrecorded_booking_removes_calendar_event() {
        let server = google_mock().await;
        let mut search = MockLeadSearch::new();
        search.expect_search_people().returning(|_| {
            Ok(vec![LeadRecord { full_name: Some("Linus T".into()), email: Some("linus@example.com".into()), ..Default::default() }])
        });
        let state = test_state(google_config(&server), Arc::new(search));
        let app = build_router(state.clone());
        let token = register(&app, "orphan@example.com").await;
        let user_id = user_id_of(&state, "orphan@example.com");
        state.credit_repository.record_purchase(user_id, 10, "pi_seed", None).unwrap();
        state.calendar_repository
            .create_google_calendar_connection(user_id, "fresh-token", "refresh-token", 3600)
            .unwrap();

        let campaign_id = create_campaign(&app, &token, 1).await;
        send(&app, Method::POST, &format!("/api/campaigns/{}/launch", campaign_id), Some(&token), None).await;
        let (_, body) = send(&app, Method::GET, &format!("/api/campaigns/{}/leads", campaign_id), Some(&token), None).await;
        let lead_id = body["leads"][0]["id"].as_i64().unwrap();

        Mock::given(method("POST"))
            .and(path("/calendars/primary/events"))
            .respond_with(CampaignDeletedMidBooking {
                state: state.clone(),
                campaign_id: campaign_id as i32,
                user_id,
            })
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/calendars/primary/events/evt_orphan"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let (status, body) = send(
            &app, Method::POST, "/api/meetings", Some(&token),
            Some(json!({"lead_id": lead_id, "start": "2030-03-04T11:00:00Z"})),
        ).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);

        let (_, body) = send(&app, Method::GET, "/api/meetings", Some(&token), None).await;
        assert!(body["meetings"].as_array().unwrap().is_empty());
        server.verify().await;
    }
}
