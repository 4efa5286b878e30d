pub mod admin;
pub mod auth;
pub mod chat;
pub mod error;
pub mod items;
pub mod middleware;
pub mod notify;
pub mod otp;
pub mod profile;

use std::sync::Arc;

use trove_db::{Database, StoreResult};
use trove_gateway::dispatcher::Dispatcher;

use crate::error::ApiError;
use crate::notify::Notifier;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
    pub notifier: Arc<dyn Notifier>,
    /// How long a one-time code stays valid.
    pub otp_ttl: chrono::Duration,
}

/// Run a rusqlite closure off the async runtime and fold both failure
/// layers (task join, store error) into `ApiError`.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("blocking task join error: {e}")))?
        .map_err(ApiError::from)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use trove_gateway::dispatcher::Dispatcher;

    use crate::notify::{Notifier, NotifyTarget};
    use crate::{AppState, AppStateInner};

    /// Captures the most recent code instead of sending it anywhere, so
    /// handler tests can complete OTP flows end to end.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub last_code: Mutex<Option<String>>,
    }

    impl RecordingNotifier {
        pub fn take(&self) -> String {
            self.last_code.lock().unwrap().take().unwrap()
        }
    }

    impl Notifier for RecordingNotifier {
        fn send_code(&self, _target: NotifyTarget<'_>, code: &str) {
            *self.last_code.lock().unwrap() = Some(code.to_string());
        }
    }

    pub fn state_with_notifier() -> (AppState, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let state = Arc::new(AppStateInner {
            db: trove_db::Database::open_in_memory().unwrap(),
            jwt_secret: "test-secret".into(),
            dispatcher: Dispatcher::new(),
            notifier: notifier.clone(),
            otp_ttl: chrono::Duration::minutes(10),
        });
        (state, notifier)
    }
}
