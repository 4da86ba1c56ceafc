use crate::error::ApiError;
use crate::registry::{GuildRegistry, PresenceSnapshot};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use lop_core::mod_actions::{ModAction, ModActionStore};
use lop_core::{ChannelKind, ClaimAllState, GuildSettings, LevelRole, SettingsPatch};
use lop_leveling::{
    add_user_xp, claim_all, import_snapshot, leaderboard_page, level_up_notice,
    recalculate_levels, rank_card, set_user_xp, AccessPolicy, ClaimOptions, ClaimReport,
    GrantOutcome, ImportReport, LeaderboardPage, LevelUp, MessageActivity, Operator, RankCard,
    ReactionActivity, RecalcReport, XpAccrualEngine, DEFAULT_PAGE_SIZE,
};
use lop_storage::XpStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct AppState {
    store: Mutex<XpStore>,
    engine: XpAccrualEngine,
    policy: AccessPolicy,
    registry: GuildRegistry,
    mod_actions: Arc<dyn ModActionStore>,
}

impl AppState {
    pub fn new(
        store: XpStore,
        engine: XpAccrualEngine,
        policy: AccessPolicy,
        mod_actions: Arc<dyn ModActionStore>,
    ) -> Self {
        Self {
            store: Mutex::new(store),
            engine,
            policy,
            registry: GuildRegistry::default(),
            mod_actions,
        }
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, XpStore>, ApiError> {
        self.store.lock().map_err(|_| {
            error!(event = "store_lock_poisoned");
            ApiError::unavailable()
        })
    }

    pub fn start_voice_sweep(self: Arc<Self>, tick: Duration) {
        if tick.is_zero() {
            info!(event = "voice_sweep_disabled");
            return;
        }
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            // The first tick fires at once; members earn only after a full period.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let sweep_state = state.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let store = sweep_state.lock_store()?;
                    Ok::<_, ApiError>(sweep_state.engine.sweep_voice(
                        &store,
                        &*store,
                        &sweep_state.registry,
                    ))
                })
                .await;
                match result {
                    Ok(Ok(report)) => {
                        debug!(event = "voice_tick", granted = report.members_granted)
                    }
                    Ok(Err(err)) => warn!(event = "voice_tick_skipped", code = err.code),
                    Err(err) => error!(event = "voice_tick_failed", error = %err),
                }
            }
        });
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/guilds/:guild/members", put(replace_members))
        .route("/guilds/:guild/events/message", post(message_event))
        .route("/guilds/:guild/events/reaction", post(reaction_event))
        .route("/guilds/:guild/rank/:user", get(get_rank))
        .route("/guilds/:guild/leaderboard", get(get_leaderboard))
        .route(
            "/guilds/:guild/settings",
            get(get_settings).patch(update_settings),
        )
        .route("/guilds/:guild/admin/xp", post(adjust_xp))
        .route("/guilds/:guild/admin/import", post(import_legacy))
        .route("/guilds/:guild/admin/claim-all", post(run_claim_all))
        .route("/guilds/:guild/admin/recalc-levels", post(recalc_levels))
        .route("/guilds/:guild/mod-actions", post(record_mod_action))
        .route("/guilds/:guild/mod-actions/recent", get(find_mod_action))
        .with_state(state)
}

/// Runs a store operation on the blocking pool with the connection locked.
async fn blocking<T, F>(state: &Arc<AppState>, op: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&AppState, &XpStore) -> Result<T, ApiError> + Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || {
        let store = state.lock_store()?;
        op(state.as_ref(), &*store)
    })
    .await
    .map_err(|err| {
        error!(event = "blocking_task_failed", error = %err);
        ApiError::internal()
    })?
}

fn require_id(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::validation(format!("{field} must not be empty")));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct PresenceAccepted {
    members: usize,
    voice: usize,
}

async fn replace_members(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Json(snapshot): Json<PresenceSnapshot>,
) -> Result<Json<PresenceAccepted>, ApiError> {
    let accepted = PresenceAccepted {
        members: snapshot.members.len(),
        voice: snapshot.voice.len(),
    };
    state.registry.replace(&guild_id, snapshot).map_err(|err| {
        error!(event = "registry_error", error = %err);
        ApiError::internal()
    })?;
    debug!(
        event = "presence_replaced",
        guild_id = %guild_id,
        members = accepted.members,
        voice = accepted.voice
    );
    Ok(Json(accepted))
}

#[derive(Debug, Deserialize)]
struct MessageEventBody {
    user_id: String,
    channel_id: String,
    #[serde(default)]
    is_bot: bool,
}

#[derive(Debug, Deserialize)]
struct ReactionEventBody {
    user_id: String,
    #[serde(default)]
    is_bot: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct GrantResponse {
    granted: bool,
    outcome: Option<GrantOutcome>,
    level_up: Option<LevelUp>,
}

fn grant_response(
    store: &XpStore,
    guild_id: &str,
    user_id: &str,
    outcome: Option<GrantOutcome>,
) -> Result<GrantResponse, ApiError> {
    let Some(outcome) = outcome else {
        return Ok(GrantResponse {
            granted: false,
            outcome: None,
            level_up: None,
        });
    };
    let settings = store.guild_settings(guild_id)?;
    let level_up = level_up_notice(store, &settings, user_id, &outcome)?;
    Ok(GrantResponse {
        granted: true,
        outcome: Some(outcome),
        level_up,
    })
}

async fn message_event(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Json(body): Json<MessageEventBody>,
) -> Result<Json<GrantResponse>, ApiError> {
    require_id("user_id", &body.user_id)?;
    require_id("channel_id", &body.channel_id)?;
    let activity = MessageActivity {
        guild_id,
        user_id: body.user_id,
        channel_id: body.channel_id,
        is_bot: body.is_bot,
    };
    let now = Utc::now();
    blocking(&state, move |state, store| {
        let outcome =
            state
                .engine
                .on_message(store, store, &activity, now, &mut rand::thread_rng())?;
        grant_response(store, &activity.guild_id, &activity.user_id, outcome)
    })
    .await
    .map(Json)
}

async fn reaction_event(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Json(body): Json<ReactionEventBody>,
) -> Result<Json<GrantResponse>, ApiError> {
    require_id("user_id", &body.user_id)?;
    let activity = ReactionActivity {
        guild_id,
        user_id: body.user_id,
        is_bot: body.is_bot,
    };
    let now = Utc::now();
    blocking(&state, move |state, store| {
        let outcome = state.engine.on_reaction(store, store, &activity, now)?;
        grant_response(store, &activity.guild_id, &activity.user_id, outcome)
    })
    .await
    .map(Json)
}

async fn get_rank(
    State(state): State<Arc<AppState>>,
    Path((guild_id, user_id)): Path<(String, String)>,
) -> Result<Json<RankCard>, ApiError> {
    blocking(&state, move |_, store| {
        Ok(rank_card(store, &guild_id, &user_id)?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
struct LeaderboardQuery {
    page: Option<i64>,
    per_page: Option<u32>,
}

async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardPage>, ApiError> {
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PAGE_SIZE);
    blocking(&state, move |_, store| {
        Ok(leaderboard_page(store, &guild_id, page, per_page)?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Serialize, Deserialize)]
struct SettingsView {
    settings: GuildSettings,
    claim_all_state: ClaimAllState,
    level_roles: Vec<LevelRole>,
    ignored_text_channels: BTreeSet<String>,
    ignored_voice_channels: BTreeSet<String>,
}

fn settings_view(store: &XpStore, guild_id: &str) -> Result<SettingsView, ApiError> {
    Ok(SettingsView {
        settings: store.guild_settings(guild_id)?,
        claim_all_state: store.claim_all_state(guild_id)?,
        level_roles: store.level_roles(guild_id)?,
        ignored_text_channels: store.ignored_channels(guild_id, ChannelKind::Text)?,
        ignored_voice_channels: store.ignored_channels(guild_id, ChannelKind::Voice)?,
    })
}

async fn get_settings(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
) -> Result<Json<SettingsView>, ApiError> {
    blocking(&state, move |_, store| settings_view(store, &guild_id))
        .await
        .map(Json)
}

#[derive(Debug, Deserialize)]
struct SettingsUpdateBody {
    operator: Operator,
    changes: SettingsPatch,
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Json(body): Json<SettingsUpdateBody>,
) -> Result<Json<SettingsView>, ApiError> {
    state.policy.require_admin(&body.operator, "settings")?;
    if body.changes.is_empty() {
        return Err(ApiError::validation("no settings to change"));
    }
    blocking(&state, move |_, store| {
        store.update_guild_settings(&guild_id, &body.changes)?;
        info!(
            event = "settings_updated",
            guild_id = %guild_id,
            operator = %body.operator.user_id
        );
        settings_view(store, &guild_id)
    })
    .await
    .map(Json)
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum XpAdjustMode {
    Set,
    Add,
}

#[derive(Debug, Deserialize)]
struct XpAdjustBody {
    operator: Operator,
    user_id: String,
    mode: XpAdjustMode,
    amount: u64,
}

async fn adjust_xp(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Json(body): Json<XpAdjustBody>,
) -> Result<Json<GrantOutcome>, ApiError> {
    require_id("user_id", &body.user_id)?;
    blocking(&state, move |state, store| {
        let outcome = match body.mode {
            XpAdjustMode::Set => set_user_xp(
                store,
                &state.policy,
                &body.operator,
                &guild_id,
                &body.user_id,
                body.amount,
            )?,
            XpAdjustMode::Add => add_user_xp(
                &state.engine,
                store,
                &state.policy,
                &body.operator,
                &guild_id,
                &body.user_id,
                body.amount,
            )?,
        };
        Ok(outcome)
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
struct ImportBody {
    operator: Operator,
    snapshot: Value,
}

async fn import_legacy(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Json(body): Json<ImportBody>,
) -> Result<Json<ImportReport>, ApiError> {
    let document = serde_json::to_string(&body.snapshot)
        .map_err(|err| ApiError::validation(format!("snapshot is not serializable: {err}")))?;
    blocking(&state, move |state, store| {
        Ok(import_snapshot(
            store,
            &state.policy,
            &body.operator,
            &guild_id,
            &document,
        )?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
struct ClaimAllBody {
    operator: Operator,
    #[serde(default)]
    leave_unlocked: bool,
}

async fn run_claim_all(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Json(body): Json<ClaimAllBody>,
) -> Result<Json<ClaimReport>, ApiError> {
    let options = ClaimOptions {
        leave_unlocked: body.leave_unlocked,
    };
    let now = Utc::now();
    blocking(&state, move |state, store| {
        Ok(claim_all(
            store,
            &state.registry,
            &state.policy,
            &body.operator,
            &guild_id,
            options,
            now,
        )?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
struct OperatorBody {
    operator: Operator,
}

async fn recalc_levels(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Json(body): Json<OperatorBody>,
) -> Result<Json<RecalcReport>, ApiError> {
    blocking(&state, move |state, store| {
        Ok(recalculate_levels(
            store,
            &state.policy,
            &body.operator,
            &guild_id,
        )?)
    })
    .await
    .map(Json)
}

#[derive(Debug, Deserialize)]
struct ModActionBody {
    action: String,
    actor_id: String,
    #[serde(default)]
    data: Map<String, Value>,
}

async fn record_mod_action(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Json(body): Json<ModActionBody>,
) -> Result<Json<ModAction>, ApiError> {
    require_id("action", &body.action)?;
    require_id("actor_id", &body.actor_id)?;
    let action = ModAction {
        guild_id,
        action: body.action,
        actor_id: body.actor_id,
        data: body.data,
        at: Utc::now(),
    };
    state.mod_actions.record(action.clone());
    Ok(Json(action))
}

#[derive(Debug, Deserialize)]
struct RecentActionQuery {
    action: String,
    field: Option<String>,
    value: Option<String>,
}

async fn find_mod_action(
    State(state): State<Arc<AppState>>,
    Path(guild_id): Path<String>,
    Query(query): Query<RecentActionQuery>,
) -> Result<Json<ModAction>, ApiError> {
    require_id("action", &query.action)?;
    let matcher = |data: &Map<String, Value>| match (&query.field, &query.value) {
        (Some(field), Some(expected)) => data.get(field).is_some_and(|found| match found {
            Value::String(text) => text == expected,
            other => other.to_string() == *expected,
        }),
        (Some(field), None) => data.contains_key(field),
        _ => true,
    };
    state
        .mod_actions
        .find_recent(&guild_id, &query.action, Utc::now(), &matcher)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("no matching recent action"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use lop_core::mod_actions::InMemoryModActionStore;
    use serde_json::json;
    use tower::ServiceExt;

    fn app_with(policy: AccessPolicy) -> Router {
        let store = XpStore::open_in_memory().expect("open store");
        let state = Arc::new(AppState::new(
            store,
            XpAccrualEngine::default(),
            policy,
            Arc::new(InMemoryModActionStore::default()),
        ));
        router(state)
    }

    fn app() -> Router {
        app_with(AccessPolicy::default())
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn admin() -> Value {
        json!({ "user_id": "admin", "is_admin": true })
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let app = app();
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn message_xp_respects_cooldown() {
        let app = app();
        let event = json!({ "user_id": "u1", "channel_id": "general" });

        let (status, first) = send(&app, "POST", "/guilds/g/events/message", Some(event.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["granted"], json!(true));
        let xp = first["outcome"]["new_xp"].as_u64().expect("new xp");
        assert!((15..=25).contains(&xp));

        let (status, second) = send(&app, "POST", "/guilds/g/events/message", Some(event)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["granted"], json!(false));
    }

    #[tokio::test]
    async fn rank_for_unknown_user_is_unranked() {
        let app = app();
        let (status, card) = send(&app, "GET", "/guilds/g/rank/ghost", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(card["rank"], Value::Null);
        assert_eq!(card["progress"]["total_xp"], json!(0));
    }

    #[tokio::test]
    async fn leaderboard_rejects_oversized_pages() {
        let app = app();
        let (status, body) = send(&app, "GET", "/guilds/g/leaderboard?per_page=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], json!("validation"));

        let (status, body) = send(&app, "GET", "/guilds/g/leaderboard?page=0", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["page"], json!(1));
    }

    #[tokio::test]
    async fn admin_xp_requires_permission() {
        let app = app();
        let body = json!({
            "operator": { "user_id": "guest" },
            "user_id": "u1",
            "mode": "set",
            "amount": 5000
        });
        let (status, denied) = send(&app, "POST", "/guilds/g/admin/xp", Some(body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(denied["code"], json!("permission_denied"));

        let body = json!({ "operator": admin(), "user_id": "u1", "mode": "set", "amount": 5000 });
        let (status, outcome) = send(&app, "POST", "/guilds/g/admin/xp", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["new_xp"], json!(5000));
    }

    #[tokio::test]
    async fn settings_patch_is_validated() {
        let app = app();
        let inverted = json!({
            "operator": admin(),
            "changes": { "message_xp_min": 40, "message_xp_max": 10 }
        });
        let (status, _) = send(&app, "PATCH", "/guilds/g/settings", Some(inverted)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let valid = json!({
            "operator": admin(),
            "changes": { "reaction_xp": 7, "level_up_channel_id": "levels" }
        });
        let (status, view) = send(&app, "PATCH", "/guilds/g/settings", Some(valid)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["settings"]["reaction_xp"], json!(7));
        assert_eq!(view["settings"]["level_up_channel_id"], json!("levels"));
        assert_eq!(view["claim_all_state"], json!("not_run"));
    }

    #[tokio::test]
    async fn claim_all_runs_once_for_admins() {
        let app = app();
        let members = json!({
            "members": [
                { "id": "111", "handle": "rook" },
                { "id": "222", "handle": "pawn", "is_bot": true }
            ]
        });
        let (status, _) = send(&app, "PUT", "/guilds/g/members", Some(members)).await;
        assert_eq!(status, StatusCode::OK);

        let import = json!({
            "operator": admin(),
            "snapshot": [{ "username": "Rook", "xp": 12000 }, { "username": "" }]
        });
        let (status, report) = send(&app, "POST", "/guilds/g/admin/import", Some(import)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["accepted"], json!(1));
        assert_eq!(report["rejected"], json!(1));

        let claim = json!({ "operator": admin() });
        let (status, report) =
            send(&app, "POST", "/guilds/g/admin/claim-all", Some(claim.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["matched"], json!(1));
        assert_eq!(report["final_state"], json!("done"));

        let (status, denied) = send(&app, "POST", "/guilds/g/admin/claim-all", Some(claim)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(denied["code"], json!("claim_all_done"));

        let (_, card) = send(&app, "GET", "/guilds/g/rank/111", None).await;
        assert_eq!(card["progress"]["total_xp"], json!(12000));
        assert_eq!(card["progress"]["level"], json!(15));
    }

    #[tokio::test]
    async fn override_identity_can_rerun_claim_all() {
        let app = app_with(AccessPolicy::new(["owner"]));
        send(
            &app,
            "PUT",
            "/guilds/g/members",
            Some(json!({ "members": [{ "id": "111", "handle": "rook" }] })),
        )
        .await;
        let owner = json!({ "user_id": "owner" });
        send(
            &app,
            "POST",
            "/guilds/g/admin/import",
            Some(json!({ "operator": owner.clone(), "snapshot": [{ "username": "rook", "xp": 300 }] })),
        )
        .await;

        for expected_already in [0, 1] {
            let (status, report) = send(
                &app,
                "POST",
                "/guilds/g/admin/claim-all",
                Some(json!({ "operator": owner.clone() })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(report["already"], json!(expected_already));
        }
    }

    #[tokio::test]
    async fn claim_all_without_snapshot_is_not_found() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/guilds/g/admin/claim-all",
            Some(json!({ "operator": admin() })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], json!("not_found"));
    }

    #[tokio::test]
    async fn recent_mod_action_matches_on_field() {
        let app = app();
        for target in ["42", "43"] {
            let body = json!({ "action": "ban", "actor_id": "mod-1", "data": { "target_id": target } });
            let (status, _) = send(&app, "POST", "/guilds/g/mod-actions", Some(body)).await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, found) = send(
            &app,
            "GET",
            "/guilds/g/mod-actions/recent?action=ban&field=target_id&value=42",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["data"]["target_id"], json!("42"));

        let (status, _) = send(
            &app,
            "GET",
            "/guilds/g/mod-actions/recent?action=kick",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
