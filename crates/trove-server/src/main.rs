use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use trove_api::middleware::require_auth;
use trove_api::notify::{Notifier, NotifyTarget};
use trove_api::{AppState, AppStateInner, admin, auth, chat, items, otp, profile};
use trove_gateway::connection::{self, ChatDirectory, ItemParties, Participant};
use trove_gateway::dispatcher::Dispatcher;

/// Stand-in for a real SMS/email provider: codes go to the log. Swap this
/// out for a provider-backed implementation in deployment.
struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_code(&self, target: NotifyTarget<'_>, code: &str) {
        match target {
            NotifyTarget::Phone(phone) => info!("verification code for phone {}: {}", phone, code),
            NotifyTarget::Email(email) => info!("verification code for email {}: {}", email, code),
        }
    }
}

/// Gateway lookups backed by the shared database.
struct DbChatDirectory {
    state: AppState,
}

impl ChatDirectory for DbChatDirectory {
    fn participant(&self, user_id: i64) -> anyhow::Result<Option<Participant>> {
        let row = self.state.db.get_user_by_id(user_id)?;
        Ok(row.map(|u| Participant {
            user_id: u.id,
            role: u.role(),
            username: u.username,
        }))
    }

    fn item_parties(&self, item_id: i64) -> anyhow::Result<Option<ItemParties>> {
        let parties = self.state.db.item_parties(item_id)?;
        Ok(parties.map(|p| ItemParties {
            owner_id: p.owner_id,
            claimed_by: p.claimed_by,
        }))
    }
}

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    directory: Arc<dyn ChatDirectory>,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trove=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("TROVE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("TROVE_DB_PATH").unwrap_or_else(|_| "trove.db".into());
    let host = std::env::var("TROVE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("TROVE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let otp_ttl_minutes: i64 = std::env::var("TROVE_OTP_TTL_MINUTES")
        .unwrap_or_else(|_| "10".into())
        .parse()?;

    // Init database
    let db = trove_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let dispatcher = Dispatcher::new();
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: jwt_secret.clone(),
        dispatcher: dispatcher.clone(),
        notifier: Arc::new(LogNotifier),
        otp_ttl: chrono::Duration::minutes(otp_ttl_minutes),
    });

    let gateway_state = GatewayState {
        dispatcher,
        directory: Arc::new(DbChatDirectory {
            state: app_state.clone(),
        }),
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/otp/request", post(otp::request_code))
        .route("/auth/otp/verify", post(otp::verify_code))
        .route("/auth/password/forgot", post(auth::forgot_password))
        .route("/auth/password/reset", post(auth::reset_password))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/items", get(items::list_items).post(items::create_item))
        .route("/items/{id}", get(items::get_item))
        .route("/items/{id}/claim", post(items::claim_item))
        .route("/items/{id}/recover", post(items::recover_item))
        .route("/items/{id}/rating", post(items::rate_item))
        .route(
            "/items/{id}/messages",
            get(chat::get_messages).post(chat::send_message),
        )
        .route("/profile", get(profile::me))
        .route("/profile/email", post(profile::change_email))
        .route("/profile/email/verify", post(profile::verify_email_change))
        .route("/profile/phone", post(profile::change_phone))
        .route("/profile/phone/verify", post(profile::verify_phone_change))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/{id}", delete(admin::remove_user))
        .route("/admin/users/{id}/verify", post(admin::verify_user))
        .route("/admin/users/{id}/reject", post(admin::reject_user))
        .route("/admin/users/{id}/promote", post(admin::promote_user))
        .route("/admin/users/{id}/demote", post(admin::demote_user))
        .route("/admin/items/pending", get(admin::list_pending_items))
        .route("/admin/items/{id}", delete(admin::remove_item))
        .route("/admin/items/{id}/approve", post(admin::approve_item))
        .route("/admin/items/{id}/reject", post(admin::reject_item))
        .route("/admin/changes", get(admin::list_changes))
        .route("/admin/changes/{id}/approve", post(admin::approve_change))
        .route("/admin/changes/{id}/reject", post(admin::reject_change))
        .route("/admin/chats", get(admin::chat_summaries))
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Trove server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.directory, state.jwt_secret)
    })
}
