//! Implementations for the service the app needs.
//!

use crate::config::Settings;
use crate::core::prompt::{ChatMessage, ExchangePair, PromptBuilder};
use crate::core::traits::{
    ChatOutcome, ChatRequest, ChatService, ChatStream, ConversationService, Generation,
    GenerationOverrides, InferenceHealth,
};
use crate::error::{ServiceError, ValidationError};
use crate::infrastructure::entities::{ConversationStats, Role, StoredMessage};
use crate::infrastructure::store::{ConversationStore, NewMessage, SearchHit, StoreHealth};
use crate::infrastructure::traits::{ChunkStream, GenerationParams, InferenceClient};
use async_trait::async_trait;
use di::{Ref, injectable};
use log::{debug, info, warn};

const HEALTH_PROMPT: &str = "Hello";
const HEALTH_PREVIEW_CHARS: usize = 50;

#[injectable(ConversationService)]
pub struct MyConversationService {
    store: Ref<ConversationStore>,
}

#[async_trait]
impl ConversationService for MyConversationService {
    async fn post_message(&self, message: NewMessage) -> Result<String, ServiceError> {
        Ok(self.store.append(message).await?)
    }

    async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, ServiceError> {
        Ok(self.store.list(conversation_id).await?)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ServiceError> {
        self.store.delete(conversation_id).await?;
        Ok(())
    }

    async fn conversation_stats(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationStats, ServiceError> {
        Ok(self.store.stats(conversation_id).await?)
    }

    async fn search(
        &self,
        conversation_id: &str,
        query: &str,
        n_results: i64,
    ) -> Result<Vec<SearchHit>, ServiceError> {
        let limit = usize::try_from(n_results)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or(ValidationError::InvalidResultCount)?;

        Ok(self.store.search(conversation_id, query, limit).await?)
    }

    async fn store_health(&self) -> StoreHealth {
        self.store.health().await
    }
}

#[injectable(ChatService)]
pub struct MyChatService {
    store: Ref<ConversationStore>,
    inference: Ref<dyn InferenceClient>,
    prompts: Ref<PromptBuilder>,
    settings: Ref<Settings>,
}

/// Everything a chat turn needs before inference starts.
struct PreparedTurn {
    conversation_id: String,
    user_message_id: String,
    is_first_message: bool,
    total_messages: usize,
    context_used: String,
    prompt: String,
    params: GenerationParams,
}

impl MyChatService {
    fn check_message(&self, message: &str) -> Result<(), ValidationError> {
        if message.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let max = self.store.limits().max_message_length;
        if message.chars().count() > max {
            return Err(ValidationError::ContentTooLong { max });
        }
        Ok(())
    }

    fn flatten(&self, messages: &[ChatMessage]) -> Result<String, ServiceError> {
        self.prompts
            .flatten(messages)
            .map_err(|e| ServiceError::Internal(format!("rendering prompt: {e}")))
    }

    /// Validates the request, reads history, builds the prompt and stores the
    /// user message.
    async fn prepare(&self, request: ChatRequest) -> Result<PreparedTurn, ServiceError> {
        let conversation_id = request.conversation_id.trim().to_owned();
        if conversation_id.is_empty() {
            return Err(ValidationError::EmptyConversationId.into());
        }
        self.check_message(&request.message)?;
        let params = request.overrides.resolve(&self.settings)?;

        let history: Vec<ChatMessage> = self
            .store
            .list(&conversation_id)
            .await?
            .into_iter()
            .map(ChatMessage::from)
            .collect();
        let is_first_message = history.is_empty();
        debug!(
            "Conversation {conversation_id} has {} previous messages",
            history.len()
        );

        let messages = self
            .prompts
            .build(&request.message, is_first_message, Some(&history));
        let prompt = self.flatten(&messages)?;

        let user_message_id = self
            .store
            .append(
                NewMessage::new(&conversation_id, Role::User.as_str(), request.message)
                    .first_in_conversation(is_first_message),
            )
            .await?;

        Ok(PreparedTurn {
            total_messages: history.len() + 2,
            context_used: self.prompts.describe_context(&history),
            conversation_id,
            user_message_id,
            is_first_message,
            prompt,
            params,
        })
    }

    fn check_reply(&self, reply: &str) -> Result<(), ServiceError> {
        if reply.trim().is_empty() {
            return Err(ServiceError::Internal(
                "AI service returned an empty response".to_owned(),
            ));
        }
        let max = self.store.limits().max_message_length;
        if reply.chars().count() > max {
            return Err(ServiceError::Internal(format!(
                "AI response exceeds maximum length of {max} characters"
            )));
        }
        Ok(())
    }

    async fn store_reply(&self, conversation_id: &str, reply: &str) -> Result<String, ServiceError> {
        self.check_reply(reply)?;
        let id = self
            .store
            .append(NewMessage::new(
                conversation_id,
                Role::Assistant.as_str(),
                reply,
            ))
            .await?;
        Ok(id)
    }
}

#[async_trait]
impl ChatService for MyChatService {
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, ServiceError> {
        let turn = self.prepare(request).await?;

        let ai_response = self.inference.complete(&turn.prompt, turn.params).await?;
        let ai_message_id = self.store_reply(&turn.conversation_id, &ai_response).await?;

        info!(
            "Chat turn stored in {} (first: {})",
            turn.conversation_id, turn.is_first_message
        );

        Ok(ChatOutcome {
            conversation_id: turn.conversation_id,
            user_message_id: turn.user_message_id,
            ai_message_id,
            ai_response,
            is_first_message: turn.is_first_message,
            total_messages: turn.total_messages,
            context_used: turn.context_used,
        })
    }

    async fn start_stream(&self, request: ChatRequest) -> Result<ChatStream, ServiceError> {
        let turn = self.prepare(request).await?;
        let chunks = self.inference.stream(&turn.prompt, turn.params).await?;

        Ok(ChatStream {
            conversation_id: turn.conversation_id,
            user_message_id: turn.user_message_id,
            is_first_message: turn.is_first_message,
            total_messages: turn.total_messages,
            context_used: turn.context_used,
            chunks,
        })
    }

    async fn record_reply(
        &self,
        conversation_id: &str,
        reply: &str,
    ) -> Result<String, ServiceError> {
        self.store_reply(conversation_id, reply).await
    }

    async fn generate(
        &self,
        prompt: &str,
        overrides: GenerationOverrides,
    ) -> Result<Generation, ServiceError> {
        if prompt.trim().is_empty() {
            return Err(ValidationError::MalformedBody("Prompt is required".to_owned()).into());
        }
        let params = overrides.resolve(&self.settings)?;

        let response = self.inference.complete(prompt, params).await?;

        Ok(Generation {
            response,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        })
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        overrides: GenerationOverrides,
    ) -> Result<ChunkStream, ServiceError> {
        if prompt.trim().is_empty() {
            return Err(ValidationError::MalformedBody("Prompt is required".to_owned()).into());
        }
        let params = overrides.resolve(&self.settings)?;

        let messages = self.prompts.build(prompt, true, None);
        let prompt = self.flatten(&messages)?;

        Ok(self.inference.stream(&prompt, params).await?)
    }

    async fn stateless_chat(
        &self,
        message: &str,
        history: &[ExchangePair],
        overrides: GenerationOverrides,
    ) -> Result<String, ServiceError> {
        self.check_message(message)?;
        let params = overrides.resolve(&self.settings)?;

        let messages = self.prompts.build_from_pairs(message, history);
        let prompt = self.flatten(&messages)?;

        Ok(self.inference.complete(&prompt, params).await?)
    }

    async fn inference_health(&self) -> InferenceHealth {
        let params = GenerationParams {
            max_tokens: self.settings.default_max_tokens,
            temperature: self.settings.default_temperature,
        };
        let model = self.inference.model().to_owned();

        match self.inference.complete(HEALTH_PROMPT, params).await {
            Ok(response) => {
                let mut preview: String = response.chars().take(HEALTH_PREVIEW_CHARS).collect();
                if response.chars().count() > HEALTH_PREVIEW_CHARS {
                    preview.push_str("...");
                }
                InferenceHealth {
                    status: "healthy",
                    ai_service: "operational",
                    model,
                    test_response: Some(preview),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Inference health check failed: {e}");
                InferenceHealth {
                    status: "unhealthy",
                    ai_service: "error",
                    model,
                    test_response: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::infrastructure::store::StoreLimits;
    use futures_util::{StreamExt, stream};
    use std::sync::{Arc, Mutex};

    /// Replays a fixed answer and records every prompt it receives.
    struct ScriptedClient {
        answer: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn answering(answer: &str) -> Arc<ScriptedClient> {
            Arc::new(ScriptedClient {
                answer: Ok(answer.to_owned()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<ScriptedClient> {
            Arc::new(ScriptedClient {
                answer: Err(()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn stream(
            &self,
            prompt: &str,
            _params: GenerationParams,
        ) -> Result<ChunkStream, InferenceError> {
            self.prompts.lock().unwrap().push(prompt.to_owned());
            match &self.answer {
                Ok(answer) => {
                    let words: Vec<Result<String, InferenceError>> = answer
                        .split_inclusive(' ')
                        .map(|w| Ok(w.to_owned()))
                        .collect();
                    Ok(Box::pin(stream::iter(words)))
                }
                Err(()) => Err(InferenceError::Unavailable(
                    "http://localhost:11434/api/generate".into(),
                )),
            }
        }
    }

    fn store() -> Arc<ConversationStore> {
        Arc::new(ConversationStore::in_memory(
            "chat_messages",
            StoreLimits {
                max_message_length: 100,
                max_conversation_messages: 1000,
            },
        ))
    }

    fn service(store: Arc<ConversationStore>, client: Arc<ScriptedClient>) -> MyChatService {
        let settings = Settings::default();
        MyChatService {
            store,
            inference: client,
            prompts: Arc::new(PromptBuilder::tutor(&settings).unwrap()),
            settings: Arc::new(settings),
        }
    }

    fn request(conversation_id: &str, message: &str) -> ChatRequest {
        ChatRequest {
            conversation_id: conversation_id.to_owned(),
            message: message.to_owned(),
            overrides: GenerationOverrides::default(),
        }
    }

    #[tokio::test]
    async fn test_first_chat_uses_system_prompt() {
        let store = store();
        let client = ScriptedClient::answering("Xin chào! Hello!");
        let service = service(store.clone(), client.clone());

        let outcome = service.chat(request("c1", "Hello")).await.unwrap();

        assert!(outcome.is_first_message);
        assert_eq!(outcome.total_messages, 2);
        assert_eq!(outcome.ai_response, "Xin chào! Hello!");
        assert_eq!(outcome.context_used, "No previous context");

        let prompt = &client.prompts()[0];
        assert!(prompt.starts_with("System: Bạn là giáo viên tiếng Anh"));
        assert!(prompt.ends_with("User: Hello\n\nAssistant: "));

        let messages = store.list("c1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, outcome.user_message_id);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].id, outcome.ai_message_id);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_follow_up_uses_history_and_reminder() {
        let store = store();
        let client = ScriptedClient::answering("Good job!");
        let service = service(store.clone(), client.clone());

        service.chat(request("c1", "Hello")).await.unwrap();
        let outcome = service.chat(request("c1", "My name is Anna.")).await.unwrap();

        assert!(!outcome.is_first_message);
        assert_eq!(outcome.total_messages, 4);
        assert_eq!(outcome.context_used, "User: Hello\nAssistant: Good job!");

        let prompt = &client.prompts()[1];
        assert!(!prompt.contains("System:"));
        assert!(prompt.starts_with("User: Hello\n\nAssistant: Good job!\n\n"));
        assert!(prompt.ends_with("tự nhiên.\nMy name is Anna.\n\nAssistant: "));
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_write() {
        let store = store();
        let client = ScriptedClient::answering("unused");
        let service = service(store.clone(), client.clone());

        for bad in [
            request("  ", "Hello"),
            request("c1", ""),
            request("c1", &"x".repeat(101)),
        ] {
            let err = service.chat(bad).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)));
        }

        let mut hot = request("c1", "Hello");
        hot.overrides.temperature = Some(3.0);
        assert!(matches!(
            service.chat(hot).await.unwrap_err(),
            ServiceError::Validation(ValidationError::InvalidTemperature)
        ));

        assert!(store.list("c1").await.unwrap().is_empty());
        assert!(client.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_inference_failure_is_unavailable() {
        let store = store();
        let service = service(store.clone(), ScriptedClient::failing());

        let err = service.chat(request("c1", "Hello")).await.unwrap_err();

        assert!(matches!(err, ServiceError::Unavailable(_)));
        assert!(err.to_string().starts_with("AI service is not running"));
    }

    #[tokio::test]
    async fn test_empty_reply_is_internal_error() {
        let service = service(store(), ScriptedClient::answering(""));

        let err = service.chat(request("c1", "Hello")).await.unwrap_err();

        assert!(matches!(err, ServiceError::Internal(_)));
    }

    #[tokio::test]
    async fn test_stream_then_record_reply() {
        let store = store();
        let service = service(store.clone(), ScriptedClient::answering("one two three"));

        let turn = service.start_stream(request("c1", "Hello")).await.unwrap();
        let reply: String = turn
            .chunks
            .map(|c| c.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat();
        let ai_message_id = service
            .record_reply(&turn.conversation_id, &reply)
            .await
            .unwrap();

        assert!(turn.is_first_message);
        let messages = store.list("c1").await.unwrap();
        assert_eq!(messages[0].id, turn.user_message_id);
        assert_eq!(messages[1].id, ai_message_id);
        assert_eq!(messages[1].content, "one two three");
    }

    #[tokio::test]
    async fn test_generate_echoes_params() {
        let service = service(store(), ScriptedClient::answering("42"));

        let generation = service
            .generate(
                "What is six times seven?",
                GenerationOverrides {
                    max_tokens: Some(16),
                    temperature: Some(0.1),
                },
            )
            .await
            .unwrap();

        assert_eq!(generation.response, "42");
        assert_eq!(generation.max_tokens, 16);
        assert!((generation.temperature - 0.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_stateless_chat_stores_nothing() {
        let store = store();
        let client = ScriptedClient::answering("Fine, thanks!");
        let service = service(store.clone(), client.clone());
        let history = vec![ExchangePair {
            user: "Hi".into(),
            ai: "Xin chào!".into(),
        }];

        let reply = service
            .stateless_chat("How are you?", &history, GenerationOverrides::default())
            .await
            .unwrap();

        assert_eq!(reply, "Fine, thanks!");
        assert!(client.prompts()[0].starts_with("User: Hi\n\nAssistant: Xin chào!\n\n"));
        assert_eq!(store.stats("c1").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_inference_health_truncates_preview() {
        let long = "a".repeat(60);
        let healthy = service(store(), ScriptedClient::answering(&long))
            .inference_health()
            .await;
        let unhealthy = service(store(), ScriptedClient::failing())
            .inference_health()
            .await;

        assert!(healthy.is_healthy());
        assert_eq!(healthy.test_response.unwrap(), format!("{}...", "a".repeat(50)));
        assert!(!unhealthy.is_healthy());
        assert!(unhealthy.error.is_some());
    }
}
