use crate::application::bootstrap::{BootstrapResult, bootstrap_workspace};
use crate::application::dual_store::DualModeStore;
use crate::application::identity::{AuthConfig, IdentityProvider, SignUpOutcome};
use crate::application::policy::{LocalOnlyPolicy, StoragePolicy};
use crate::application::spot_finder::{SaveSpotOutcome, SpotFinder};
use crate::application::timer_service::{CompletionNotifier, TimerService};
use crate::domain::models::{
    Facet, Filter, Session, StudySpot, Task, TaskDraft, TimerDurations, TimerSettings,
};
use crate::domain::timer::TimerSnapshot;
use crate::infrastructure::auth_client::{AuthHttpClient, ReqwestAuthClient};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::local_storage::{LocalStorage, SqliteLocalStorage};
use crate::infrastructure::maps_key::{MapsKeySource, ReqwestMapsKeyClient, StaticMapsKey};
use crate::infrastructure::session_store::{KeyringSessionStore, SessionStore};
use crate::infrastructure::tables_client::{ReqwestTablesClient, TablesClient};
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const CONFIRMATION_SENT_MESSAGE: &str = "Check your email for the confirmation link!";

pub type Identity = IdentityProvider<dyn SessionStore, dyn AuthHttpClient>;

/// Collaborators the state is assembled from; swapped for fakes in tests.
pub struct AppServices {
    pub session_store: Arc<dyn SessionStore>,
    pub auth_client: Option<Arc<dyn AuthHttpClient>>,
    pub tables: Option<Arc<dyn TablesClient>>,
    pub local_storage: Arc<dyn LocalStorage>,
    pub maps_key: Arc<dyn MapsKeySource>,
    pub notifier: Arc<dyn CompletionNotifier>,
}

impl AppServices {
    pub fn from_config(
        config: &AppConfig,
        database_path: &Path,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Result<Self, InfraError> {
        let (auth_client, tables) = match &config.backend {
            Some(backend) => (
                Some(Arc::new(ReqwestAuthClient::new(&backend.url, backend.anon_key.clone())?) as Arc<dyn AuthHttpClient>),
                Some(Arc::new(ReqwestTablesClient::new(&backend.url, backend.anon_key.clone())?) as Arc<dyn TablesClient>),
            ),
            None => (None, None),
        };
        let maps_key: Arc<dyn MapsKeySource> = match &config.maps.key_endpoint {
            Some(endpoint) => Arc::new(ReqwestMapsKeyClient::new(endpoint.clone())),
            None => Arc::new(StaticMapsKey::new(config.maps.api_key.clone().unwrap_or_default())),
        };

        Ok(Self {
            session_store: Arc::new(KeyringSessionStore::default()),
            auth_client,
            tables,
            local_storage: Arc::new(SqliteLocalStorage::open(database_path)?),
            maps_key,
            notifier,
        })
    }
}

pub struct AppState {
    logs_dir: PathBuf,
    app_name: String,
    identity: Option<Arc<Identity>>,
    tasks: Arc<DualModeStore<Task>>,
    settings: Arc<DualModeStore<TimerSettings>>,
    spots: Arc<DualModeStore<StudySpot>>,
    timer: TimerService,
    finder: SpotFinder,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf, notifier: Arc<dyn CompletionNotifier>) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let services = AppServices::from_config(&bootstrap.config, &bootstrap.database_path, notifier)?;
        Ok(Self::from_bootstrap(bootstrap, services))
    }

    pub fn from_bootstrap(bootstrap: BootstrapResult, services: AppServices) -> Self {
        let identity = services.auth_client.map(|auth_client| {
            Arc::new(IdentityProvider::new(
                AuthConfig {
                    email_redirect_to: bootstrap
                        .config
                        .backend
                        .as_ref()
                        .and_then(|backend| backend.email_redirect_to.clone()),
                },
                services.session_store,
                auth_client,
            ))
        });
        let policy: Arc<dyn StoragePolicy> = match &identity {
            Some(identity) => identity.clone(),
            None => Arc::new(LocalOnlyPolicy),
        };

        let tasks = Arc::new(DualModeStore::new(
            services.local_storage.clone(),
            services.tables.clone(),
            policy.clone(),
        ));
        let settings = Arc::new(DualModeStore::new(
            services.local_storage.clone(),
            services.tables.clone(),
            policy.clone(),
        ));
        let spots = Arc::new(DualModeStore::new(services.local_storage, services.tables, policy));
        let finder = SpotFinder::new(services.maps_key, spots.clone(), bootstrap.config.maps.phrasing.clone());

        Self {
            logs_dir: bootstrap.logs_dir,
            app_name: bootstrap.config.app_name,
            identity,
            tasks,
            settings,
            spots,
            timer: TimerService::new(TimerDurations::default(), services.notifier),
            finder,
            log_guard: Mutex::new(()),
        }
    }

    pub fn identity(&self) -> Option<Arc<Identity>> {
        self.identity.clone()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn identity_or_config_error(&self) -> Result<&Arc<Identity>, InfraError> {
        self.identity.as_ref().ok_or_else(|| {
            InfraError::InvalidConfig(
                "sign-in is unavailable: no hosted backend is configured".to_string(),
            )
        })
    }

    /// Re-reads every collection from whichever backend the session selects
    /// and feeds the owner's timer settings to the countdown.
    async fn refresh_collections(&self) -> Result<(), InfraError> {
        self.tasks.reload().await?;
        self.spots.reload().await?;
        self.settings.reload().await?;
        let settings = self.settings.current_or_create().await?;
        self.timer.apply_settings(settings.durations())?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionView {
    pub user_id: String,
    pub email: Option<String>,
    pub expires_at: String,
}

impl From<&Session> for SessionView {
    fn from(session: &Session) -> Self {
        Self {
            user_id: session.user.id.clone(),
            email: session.user.email.clone(),
            expires_at: session.expires_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub session: Option<SessionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HubSnapshot {
    pub app_name: String,
    pub session: Option<SessionView>,
    pub synced: bool,
    pub tasks: Vec<Task>,
    pub settings: TimerSettings,
    pub timer: TimerSnapshot,
    pub favorites: Vec<StudySpot>,
    pub filter: Filter,
    pub map_url: Option<String>,
}

pub async fn initialize_impl(state: &AppState) -> Result<HubSnapshot, InfraError> {
    if let Some(identity) = &state.identity {
        identity.fetch_session().await;
    }
    state.refresh_collections().await?;
    state.finder.initialize().await?;
    state.log_info("initialize", "collections loaded");
    hub_snapshot(state).await
}

pub fn get_session_impl(state: &AppState) -> Option<SessionView> {
    state
        .identity
        .as_ref()
        .and_then(|identity| identity.current_session())
        .map(|session| SessionView::from(&session))
}

/// Credential and service failures come back as an inline message.
pub async fn sign_up_impl(state: &AppState, email: String, password: String) -> Result<AuthResponse, InfraError> {
    let identity = match state.identity_or_config_error() {
        Ok(identity) => identity,
        Err(error) => return Ok(auth_failure(state, "sign_up", error)),
    };
    match identity.sign_up(&email, &password).await {
        Ok(SignUpOutcome::SignedIn(session)) => {
            state.refresh_collections().await?;
            state.log_info("sign_up", &format!("signed in user_id={}", session.user.id));
            Ok(AuthResponse {
                success: true,
                message: None,
                session: Some(SessionView::from(&session)),
            })
        }
        Ok(SignUpOutcome::ConfirmationRequired { email }) => {
            state.log_info("sign_up", &format!("confirmation sent to {email}"));
            Ok(AuthResponse {
                success: true,
                message: Some(CONFIRMATION_SENT_MESSAGE.to_string()),
                session: None,
            })
        }
        Err(error) => Ok(auth_failure(state, "sign_up", error)),
    }
}

pub async fn sign_in_impl(state: &AppState, email: String, password: String) -> Result<AuthResponse, InfraError> {
    let identity = match state.identity_or_config_error() {
        Ok(identity) => identity,
        Err(error) => return Ok(auth_failure(state, "sign_in", error)),
    };
    match identity.sign_in(&email, &password).await {
        Ok(session) => {
            state.refresh_collections().await?;
            state.log_info("sign_in", &format!("signed in user_id={}", session.user.id));
            Ok(AuthResponse {
                success: true,
                message: None,
                session: Some(SessionView::from(&session)),
            })
        }
        Err(error) => Ok(auth_failure(state, "sign_in", error)),
    }
}

pub async fn sign_out_impl(state: &AppState) -> Result<AuthResponse, InfraError> {
    let identity = state.identity_or_config_error()?;
    identity.sign_out().await?;
    state.refresh_collections().await?;
    state.log_info("sign_out", "signed out");
    Ok(AuthResponse {
        success: true,
        message: None,
        session: None,
    })
}

pub fn list_tasks_impl(state: &AppState) -> Result<Vec<Task>, InfraError> {
    state.tasks.list()
}

pub async fn add_task_impl(state: &AppState, text: String) -> Result<Option<Task>, InfraError> {
    let draft = TaskDraft::new(&text)
        .ok_or_else(|| InfraError::Validation("task text must not be empty".to_string()))?;
    let task = state.tasks.add(draft).await?;
    if let Some(task) = &task {
        state.log_info("add_task", &format!("created task_id={}", task.id));
    }
    Ok(task)
}

pub async fn toggle_task_impl(state: &AppState, task_id: String) -> Result<Option<Task>, InfraError> {
    let task = state
        .tasks
        .update(&task_id, |task| task.completed = !task.completed)
        .await?;
    if let Some(task) = &task {
        state.log_info(
            "toggle_task",
            &format!("task_id={} completed={}", task.id, task.completed),
        );
    }
    Ok(task)
}

pub async fn delete_task_impl(state: &AppState, task_id: String) -> Result<bool, InfraError> {
    let deleted = state.tasks.remove(&task_id).await?;
    if deleted {
        state.log_info("delete_task", &format!("deleted task_id={task_id}"));
    }
    Ok(deleted)
}

pub fn get_timer_state_impl(state: &AppState) -> Result<TimerSnapshot, InfraError> {
    state.timer.snapshot()
}

pub fn toggle_timer_impl(state: &AppState) -> Result<TimerSnapshot, InfraError> {
    let snapshot = state.timer.toggle()?;
    state.log_info(
        "toggle_timer",
        &format!("mode={} active={}", snapshot.mode.as_str(), snapshot.is_active),
    );
    Ok(snapshot)
}

pub fn reset_timer_impl(state: &AppState) -> Result<TimerSnapshot, InfraError> {
    state.timer.reset()
}

pub async fn get_timer_settings_impl(state: &AppState) -> Result<TimerSettings, InfraError> {
    state.settings.current_or_create().await
}

/// `None` when the backend rejected the change or the owner's settings
/// could not be loaded; the countdown then keeps its previous durations.
pub async fn update_timer_settings_impl(
    state: &AppState,
    durations: TimerDurations,
) -> Result<Option<TimerSettings>, InfraError> {
    durations.validate().map_err(InfraError::Validation)?;

    let current = state.settings.current_or_create().await?;
    let persisted = state
        .settings
        .list()?
        .iter()
        .any(|settings| settings.id == current.id);
    let saved = if persisted {
        state
            .settings
            .update(&current.id, |settings| settings.apply_durations(durations))
            .await?
    } else if state.settings.is_loaded()? {
        state.settings.add(durations).await?
    } else {
        // The owner's row may exist remotely; inserting now could duplicate it.
        None
    };

    if let Some(settings) = &saved {
        state.timer.apply_settings(settings.durations())?;
        state.log_info("update_timer_settings", &format!("settings_id={}", settings.id));
    }
    Ok(saved)
}

pub fn get_map_url_impl(state: &AppState) -> Result<Option<String>, InfraError> {
    state.finder.map_url()
}

pub fn toggle_filter_impl(state: &AppState, facet: String) -> Result<Filter, InfraError> {
    let facet = Facet::parse(&facet)
        .ok_or_else(|| InfraError::Validation(format!("unknown filter: {facet}")))?;
    state.finder.toggle_facet(facet)
}

pub async fn search_spots_impl(state: &AppState, query: String) -> Result<Option<String>, InfraError> {
    state.finder.search(&query).await
}

pub fn list_favorite_spots_impl(state: &AppState) -> Result<Vec<StudySpot>, InfraError> {
    state.finder.favorites()
}

pub async fn save_spot_impl(
    state: &AppState,
    name: String,
    address: Option<String>,
) -> Result<SaveSpotOutcome, InfraError> {
    let outcome = state.finder.save_spot(&name, address.as_deref()).await?;
    match &outcome.spot {
        Some(spot) => state.log_info("save_spot", &format!("saved spot_id={}", spot.id)),
        None => state.log_error("save_spot", &outcome.message),
    }
    Ok(outcome)
}

pub async fn view_spot_impl(state: &AppState, spot_id: String) -> Result<Option<String>, InfraError> {
    state.finder.view_spot(&spot_id).await
}

async fn hub_snapshot(state: &AppState) -> Result<HubSnapshot, InfraError> {
    Ok(HubSnapshot {
        app_name: state.app_name.clone(),
        session: get_session_impl(state),
        synced: state.tasks.is_remote(),
        tasks: state.tasks.list()?,
        settings: state.settings.current_or_create().await?,
        timer: state.timer.snapshot()?,
        favorites: state.spots.list()?,
        filter: state.finder.filter()?,
        map_url: state.finder.map_url()?,
    })
}

fn auth_failure(state: &AppState, command: &str, error: InfraError) -> AuthResponse {
    state.log_error(command, &error.to_string());
    AuthResponse {
        success: false,
        message: Some(error.to_string()),
        session: None,
    }
}
