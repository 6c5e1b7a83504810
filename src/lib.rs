pub mod application;
pub mod domain;
pub mod infrastructure;

#[cfg(feature = "desktop")]
mod desktop {
    use crate::application::commands::{
        AppState, AuthResponse, HubSnapshot, SessionView, add_task_impl, delete_task_impl,
        get_map_url_impl, get_session_impl, get_timer_settings_impl, get_timer_state_impl,
        initialize_impl, list_favorite_spots_impl, list_tasks_impl, reset_timer_impl,
        save_spot_impl, search_spots_impl, sign_in_impl, sign_out_impl, sign_up_impl,
        toggle_filter_impl, toggle_task_impl, toggle_timer_impl, update_timer_settings_impl,
        view_spot_impl,
    };
    use crate::application::spot_finder::SaveSpotOutcome;
    use crate::application::timer_service::TauriEventNotifier;
    use crate::domain::models::{Filter, StudySpot, Task, TimerDurations, TimerSettings};
    use crate::domain::timer::TimerSnapshot;
    use std::sync::Arc;
    use tauri::{Emitter, Manager};

    #[tauri::command]
    fn ping() -> &'static str {
        "pong"
    }

    #[tauri::command]
    async fn initialize(state: tauri::State<'_, AppState>) -> Result<HubSnapshot, String> {
        initialize_impl(state.inner())
            .await
            .map_err(|error| state.command_error("initialize", &error))
    }

    #[tauri::command]
    fn get_session(state: tauri::State<'_, AppState>) -> Option<SessionView> {
        get_session_impl(state.inner())
    }

    #[tauri::command]
    async fn sign_up(
        state: tauri::State<'_, AppState>,
        email: String,
        password: String,
    ) -> Result<AuthResponse, String> {
        sign_up_impl(state.inner(), email, password)
            .await
            .map_err(|error| state.command_error("sign_up", &error))
    }

    #[tauri::command]
    async fn sign_in(
        state: tauri::State<'_, AppState>,
        email: String,
        password: String,
    ) -> Result<AuthResponse, String> {
        sign_in_impl(state.inner(), email, password)
            .await
            .map_err(|error| state.command_error("sign_in", &error))
    }

    #[tauri::command]
    async fn sign_out(state: tauri::State<'_, AppState>) -> Result<AuthResponse, String> {
        sign_out_impl(state.inner())
            .await
            .map_err(|error| state.command_error("sign_out", &error))
    }

    #[tauri::command]
    fn list_tasks(state: tauri::State<'_, AppState>) -> Result<Vec<Task>, String> {
        list_tasks_impl(state.inner()).map_err(|error| state.command_error("list_tasks", &error))
    }

    #[tauri::command]
    async fn add_task(state: tauri::State<'_, AppState>, text: String) -> Result<Option<Task>, String> {
        add_task_impl(state.inner(), text)
            .await
            .map_err(|error| state.command_error("add_task", &error))
    }

    #[tauri::command]
    async fn toggle_task(state: tauri::State<'_, AppState>, task_id: String) -> Result<Option<Task>, String> {
        toggle_task_impl(state.inner(), task_id)
            .await
            .map_err(|error| state.command_error("toggle_task", &error))
    }

    #[tauri::command]
    async fn delete_task(state: tauri::State<'_, AppState>, task_id: String) -> Result<bool, String> {
        delete_task_impl(state.inner(), task_id)
            .await
            .map_err(|error| state.command_error("delete_task", &error))
    }

    #[tauri::command]
    fn get_timer_state(state: tauri::State<'_, AppState>) -> Result<TimerSnapshot, String> {
        get_timer_state_impl(state.inner()).map_err(|error| state.command_error("get_timer_state", &error))
    }

    // async so the ticker is spawned on the tokio runtime
    #[tauri::command]
    async fn toggle_timer(state: tauri::State<'_, AppState>) -> Result<TimerSnapshot, String> {
        toggle_timer_impl(state.inner()).map_err(|error| state.command_error("toggle_timer", &error))
    }

    #[tauri::command]
    fn reset_timer(state: tauri::State<'_, AppState>) -> Result<TimerSnapshot, String> {
        reset_timer_impl(state.inner()).map_err(|error| state.command_error("reset_timer", &error))
    }

    #[tauri::command]
    async fn get_timer_settings(state: tauri::State<'_, AppState>) -> Result<TimerSettings, String> {
        get_timer_settings_impl(state.inner())
            .await
            .map_err(|error| state.command_error("get_timer_settings", &error))
    }

    #[tauri::command]
    async fn update_timer_settings(
        state: tauri::State<'_, AppState>,
        durations: TimerDurations,
    ) -> Result<Option<TimerSettings>, String> {
        update_timer_settings_impl(state.inner(), durations)
            .await
            .map_err(|error| state.command_error("update_timer_settings", &error))
    }

    #[tauri::command]
    fn get_map_url(state: tauri::State<'_, AppState>) -> Result<Option<String>, String> {
        get_map_url_impl(state.inner()).map_err(|error| state.command_error("get_map_url", &error))
    }

    #[tauri::command]
    fn toggle_filter(state: tauri::State<'_, AppState>, facet: String) -> Result<Filter, String> {
        toggle_filter_impl(state.inner(), facet).map_err(|error| state.command_error("toggle_filter", &error))
    }

    #[tauri::command]
    async fn search_spots(state: tauri::State<'_, AppState>, query: String) -> Result<Option<String>, String> {
        search_spots_impl(state.inner(), query)
            .await
            .map_err(|error| state.command_error("search_spots", &error))
    }

    #[tauri::command]
    fn list_favorite_spots(state: tauri::State<'_, AppState>) -> Result<Vec<StudySpot>, String> {
        list_favorite_spots_impl(state.inner())
            .map_err(|error| state.command_error("list_favorite_spots", &error))
    }

    #[tauri::command]
    async fn save_spot(
        state: tauri::State<'_, AppState>,
        name: String,
        address: Option<String>,
    ) -> Result<SaveSpotOutcome, String> {
        save_spot_impl(state.inner(), name, address)
            .await
            .map_err(|error| state.command_error("save_spot", &error))
    }

    #[tauri::command]
    async fn view_spot(state: tauri::State<'_, AppState>, spot_id: String) -> Result<Option<String>, String> {
        view_spot_impl(state.inner(), spot_id)
            .await
            .map_err(|error| state.command_error("view_spot", &error))
    }

    pub fn run() {
        tauri::Builder::default()
            .plugin(
                tauri_plugin_log::Builder::new()
                    .level(log::LevelFilter::Info)
                    .build(),
            )
            .setup(|app| {
                let workspace_root = app.path().app_data_dir()?;
                let notifier = Arc::new(TauriEventNotifier::new(app.handle().clone()));
                let app_state = AppState::new(workspace_root, notifier)?;

                // Forward session changes to the webview for the lifetime of the app.
                if let Some(identity) = app_state.identity() {
                    let handle = app.handle().clone();
                    tauri::async_runtime::spawn(async move {
                        let mut subscription = identity.subscribe().await;
                        while let Some(event) = subscription.next().await {
                            let view = event.session.as_ref().map(SessionView::from);
                            if let Err(error) = handle.emit("session-changed", view) {
                                log::debug!("session event not delivered: {error}");
                            }
                        }
                    });
                }

                app.manage(app_state);
                Ok(())
            })
            .invoke_handler(tauri::generate_handler![
                ping,
                initialize,
                get_session,
                sign_up,
                sign_in,
                sign_out,
                list_tasks,
                add_task,
                toggle_task,
                delete_task,
                get_timer_state,
                toggle_timer,
                reset_timer,
                get_timer_settings,
                update_timer_settings,
                get_map_url,
                toggle_filter,
                search_spots,
                list_favorite_spots,
                save_spot,
                view_spot
            ])
            .run(tauri::generate_context!())
            .expect("failed to run tauri app");
    }
}

#[cfg(feature = "desktop")]
pub use desktop::run;
