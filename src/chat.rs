use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ApiError;
use crate::footprint::{calculate, estimate_tokens, Footprint};
use crate::models::{GenerationModel, ModelError};
use crate::session::{session_title, Message, SessionTotals};
use crate::storage::SessionStore;

#[derive(Debug, Serialize)]
pub struct ExchangeMetrics {
    pub input_tokens: i64,
    pub output_tokens: i64,
    #[serde(flatten)]
    pub footprint: Footprint,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeOutcome {
    pub user_message: Message,
    pub assistant_message: Message,
    pub metrics: ExchangeMetrics,
    pub session_metrics: SessionTotals,
}

// Persist the user message, generate the reply, persist that, then fold the
// exchange into the session accumulator. No transaction spans the writes.
pub async fn run_exchange(
    store: &dyn SessionStore,
    model: &dyn GenerationModel,
    session_id: Uuid,
    content: &str,
) -> Result<ExchangeOutcome, ApiError> {
    let session = store
        .get_session(session_id)
        .await
        .map_err(|e| ApiError::store(e, "Failed to load session"))?
        .ok_or_else(|| ApiError::NotFound("Session not found".into()))?;

    let input_tokens = estimate_tokens(content);
    let user_message = Message::user(session_id, content.to_string(), input_tokens);
    store
        .append_message(&user_message)
        .await
        .map_err(|e| ApiError::store(e, "Failed to save user message"))?;

    // the first message titles the session; title failures only log
    match store.message_count(session_id).await {
        Ok(1) => {
            if let Err(e) = store.update_title(session_id, &session_title(content)).await {
                warn!("failed to set session title: {e:#}");
            }
        }
        Ok(_) => {}
        Err(e) => warn!("failed to count session messages: {e:#}"),
    }

    let reply = match model.generate(content).await {
        Ok(reply) => reply,
        Err(err) => {
            metrics::counter!("chat_upstream_failures_total").increment(1);
            // the user message stays persisted with no assistant reply
            let quota = matches!(err, ModelError::RateLimited { .. });
            return Err(ApiError::Upstream { message: err.to_string(), quota });
        }
    };

    let output_tokens = estimate_tokens(&reply);
    let assistant_message = Message::assistant(session_id, reply, output_tokens);
    store
        .append_message(&assistant_message)
        .await
        .map_err(|e| ApiError::store(e, "Failed to save assistant message"))?;

    let exchange_tokens = input_tokens + output_tokens;
    let footprint = calculate(exchange_tokens, &session.settings());
    // absolute sums from the snapshot loaded above; concurrent exchanges race last-write-wins
    let session_metrics = session.totals().plus_exchange(exchange_tokens, &footprint);
    store
        .apply_metrics(session_id, &session_metrics)
        .await
        .map_err(|e| ApiError::store(e, "Failed to update session metrics"))?;

    metrics::counter!("chat_exchanges_total").increment(1);
    metrics::counter!("chat_tokens_total").increment(exchange_tokens as u64);
    debug!(
        session = %session_id,
        input_tokens,
        output_tokens,
        "exchange complete"
    );

    Ok(ExchangeOutcome {
        user_message,
        assistant_message,
        metrics: ExchangeMetrics { input_tokens, output_tokens, footprint },
        session_metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footprint::{ModelSize, Settings};
    use crate::session::{Role, SessionPatch, DEFAULT_SESSION_TITLE};
    use crate::storage::SqliteStore;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct CannedModel(&'static str);

    #[async_trait]
    impl GenerationModel for CannedModel {
        async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
            Ok(self.0.to_string())
        }
    }

    struct FailingModel {
        quota: bool,
    }

    #[async_trait]
    impl GenerationModel for FailingModel {
        async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
            if self.quota {
                Err(ModelError::RateLimited { message: "quota exceeded".into() })
            } else {
                Err(ModelError::Failed { message: "upstream down".into() })
            }
        }
    }

    async fn store_in(dir: &tempfile::TempDir) -> SqliteStore {
        let path = dir.path().join("test.db");
        let url = format!("sqlite://{}", path.to_string_lossy());
        SqliteStore::initialize(&url).await.unwrap()
    }

    #[tokio::test]
    async fn exchange_persists_pair_and_accumulates_metrics() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir).await;
        let session = store.create_session(DEFAULT_SESSION_TITLE.into(), Settings::default()).await.unwrap();
        let model = CannedModel("Hi! How can I help you today?");

        let outcome = run_exchange(&store, &model, session.id, "Hello").await.unwrap();

        assert_eq!(outcome.user_message.role, Role::User);
        assert_eq!(outcome.user_message.input_tokens, 1);
        assert_eq!(outcome.assistant_message.role, Role::Assistant);
        assert!(outcome.assistant_message.output_tokens > 0);

        let total = outcome.metrics.input_tokens + outcome.metrics.output_tokens;
        assert_eq!(outcome.session_metrics.total_tokens, total);
        let expected = calculate(total, &Settings::default());
        assert!((outcome.session_metrics.energy_wh - expected.energy_wh).abs() < 1e-12);

        let stored = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.total_tokens, total);
        assert_eq!(stored.energy_wh, outcome.session_metrics.energy_wh);
        assert_eq!(stored.title, "Hello");
        assert_eq!(store.message_count(session.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn later_exchanges_add_and_keep_the_first_title() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir).await;
        let session = store.create_session(DEFAULT_SESSION_TITLE.into(), Settings::default()).await.unwrap();
        let model = CannedModel("Short reply here.");

        let first = run_exchange(&store, &model, session.id, "Hello").await.unwrap();
        let second = run_exchange(&store, &model, session.id, "Tell me more about that").await.unwrap();

        let expected_total = first.metrics.input_tokens
            + first.metrics.output_tokens
            + second.metrics.input_tokens
            + second.metrics.output_tokens;
        assert_eq!(second.session_metrics.total_tokens, expected_total);

        let stored = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.total_tokens, expected_total);
        assert_eq!(stored.title, "Hello");
        assert_eq!(store.message_count(session.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn accumulator_uses_settings_in_effect_per_exchange() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir).await;
        let session = store.create_session(DEFAULT_SESSION_TITLE.into(), Settings::default()).await.unwrap();
        let model = CannedModel("Short reply here.");

        let first = run_exchange(&store, &model, session.id, "Hello").await.unwrap();
        let medium_tokens = first.metrics.input_tokens + first.metrics.output_tokens;

        let patch = SessionPatch { model_size: Some(ModelSize::Large), ..SessionPatch::default() };
        store.update_session(session.id, patch).await.unwrap().unwrap();

        let second = run_exchange(&store, &model, session.id, "And again please").await.unwrap();
        let large_tokens = second.metrics.input_tokens + second.metrics.output_tokens;

        let medium = Settings::default();
        let large = Settings { model_size: ModelSize::Large, ..Settings::default() };
        let expected_energy =
            calculate(medium_tokens, &medium).energy_wh + calculate(large_tokens, &large).energy_wh;

        let stored = store.get_session(session.id).await.unwrap().unwrap();
        assert!((stored.energy_wh - expected_energy).abs() < 1e-12);
        // not recomputable from the current settings alone
        let naive = calculate(medium_tokens + large_tokens, &large).energy_wh;
        assert!((stored.energy_wh - naive).abs() > 1e-9);
    }

    #[tokio::test]
    async fn model_failure_leaves_user_message_and_stale_totals() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir).await;
        let session = store.create_session(DEFAULT_SESSION_TITLE.into(), Settings::default()).await.unwrap();

        let err = run_exchange(&store, &FailingModel { quota: false }, session.id, "Hello")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Upstream { quota: false, .. }));

        // partial-failure state: the user message is persisted, no reply, no
        // metrics movement
        let messages = store.list_messages(session.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        let stored = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.total_tokens, 0);
        assert_eq!(stored.energy_wh, 0.0);
    }

    #[tokio::test]
    async fn quota_failures_carry_the_flag() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir).await;
        let session = store.create_session(DEFAULT_SESSION_TITLE.into(), Settings::default()).await.unwrap();

        let err = run_exchange(&store, &FailingModel { quota: true }, session.id, "Hello")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::Upstream { quota: true, .. }));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found_before_any_write() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir).await;
        let model = CannedModel("never called");

        let err = run_exchange(&store, &model, Uuid::new_v4(), "Hello").await.err().unwrap();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
