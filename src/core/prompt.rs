//! Tutor prompt assembly.
//!

use crate::config::Settings;
use crate::infrastructure::entities::{Role, StoredMessage};
use serde::{Deserialize, Serialize};

/// Persona sent as the system message on the first turn of a conversation.
pub const SYSTEM_PROMPT: &str = r#"Bạn là giáo viên tiếng Anh cho người Việt, chuyên luyện hội thoại song ngữ.

QUY TẮC BẮT BUỘC:
1. Mọi câu trả lời PHẢI mở đầu bằng tiếng Việt (giới thiệu, nhận xét, khen, hoặc giải thích ngắn) rồi mới đến phần tiếng Anh.
2. Khi dạy từ vựng: luôn ghi rõ (nghĩa tiếng Việt), ví dụ câu tiếng Anh, và dịch câu đó sang tiếng Việt.
3. Không bao giờ chỉ đưa tiếng Anh mà không có tiếng Việt.
4. Khi học viên sai → nêu lỗi bằng tiếng Việt, đưa câu đúng bằng tiếng Anh, rồi giải thích bằng tiếng Việt.
5. Khi học viên đúng → khen bằng tiếng Việt, gợi ý nâng cao bằng tiếng Anh (kèm dịch nghĩa).

VÍ DỤ:
Học viên: How old are they?
AI: Bạn trả lời chưa đúng, phải là: "How old are you?"
Because in English, "they" means someone else, but here you are asking about me. (Vì trong tiếng Anh, 'they' nghĩa là 'họ/những người đó', nhưng ở đây bạn đang hỏi tôi.)

Học viên: My name is Anna.
AI: Tốt lắm! 👍
You can also say: "I'm Anna, nice to meet you!" (Bạn cũng có thể nói: "Tôi là Anna, rất vui được gặp bạn!")

Học viên: Đề xuất từ vựng về du lịch.
AI: Đây là một số từ vựng về du lịch nhé:
1. Travel (du lịch) - I want to travel to Hanoi to explore its culture. (Tôi muốn đi du lịch Hà Nội để khám phá văn hóa.)
2. Vacation (kỳ nghỉ) - I want to take a vacation in Hanoi next summer. (Tôi muốn có kỳ nghỉ ở Hà Nội vào mùa hè tới.)
3. Destination (điểm đến) - Hanoi is my dream destination. (Hà Nội là điểm đến mơ ước của tôi.)
4. Tourist (khách du lịch) - I want to be a tourist in Hanoi. (Tôi muốn làm khách du lịch ở Hà Nội.)
5. Sightseeing (tham quan) - I want to go sightseeing in Hanoi. (Tôi muốn đi tham quan ở Hà Nội.)
6. Adventure (phiêu lưu) - I want to have an adventure in Hanoi. (Tôi muốn có cuộc phiêu lưu ở Hà Nội.)"#;

/// Prepended to every follow-up user message.
pub const REMINDER: &str = "Hãy trả lời thân thiện và khuyến khích học viên, sử dụng cả tiếng Việt và tiếng Anh một cách tự nhiên.";

const PROMPT_TEMPLATE: &str =
    "{% for message in messages %}{{ message.label }}: {{ message.content }}\n\n{% endfor %}Assistant: ";

const NO_CONTEXT: &str = "No previous context";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> ChatMessage {
        ChatMessage {
            role,
            content: content.into(),
        }
    }

    pub fn as_jinja_value(&self) -> minijinja::Value {
        minijinja::context! {
            label => self.role.label(),
            content => self.content
        }
    }
}

impl From<StoredMessage> for ChatMessage {
    fn from(m: StoredMessage) -> Self {
        Self {
            role: m.role,
            content: m.content,
        }
    }
}

/// One client-held exchange, as sent to the stateless chat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePair {
    pub user: String,
    pub ai: String,
}

pub struct PromptBuilder {
    system_prompt: String,
    reminder: Option<String>,
    history_window: usize,
    env: minijinja::Environment<'static>,
}

impl PromptBuilder {
    pub fn new(
        system_prompt: &str,
        reminder: Option<&str>,
        history_window: usize,
    ) -> Result<PromptBuilder, minijinja::Error> {
        let mut env = minijinja::Environment::new();
        env.set_trim_blocks(true);
        env.add_template("prompt", PROMPT_TEMPLATE)?;

        Ok(PromptBuilder {
            system_prompt: system_prompt.to_owned(),
            reminder: reminder.map(str::to_owned),
            history_window,
            env,
        })
    }

    pub fn tutor(settings: &Settings) -> Result<PromptBuilder, minijinja::Error> {
        Self::new(SYSTEM_PROMPT, Some(REMINDER), settings.history_window)
    }

    /// The most recent `history_window` entries of `history`.
    pub fn window<'a>(&self, history: &'a [ChatMessage]) -> &'a [ChatMessage] {
        let start = history.len().saturating_sub(self.history_window);
        &history[start..]
    }

    /// Ordered messages for the next inference request. A first message always
    /// gets the system prompt and never any history.
    pub fn build(
        &self,
        user_input: &str,
        is_first_message: bool,
        history: Option<&[ChatMessage]>,
    ) -> Vec<ChatMessage> {
        if is_first_message {
            return vec![
                ChatMessage::new(Role::System, self.system_prompt.clone()),
                ChatMessage::new(Role::User, user_input),
            ];
        }

        let mut messages = history.map(|h| self.window(h).to_vec()).unwrap_or_default();
        messages.push(self.follow_up(user_input));
        messages
    }

    /// Like [`Self::build`], for history held by the client as exchange pairs.
    /// The window applies to pairs rather than messages.
    pub fn build_from_pairs(&self, user_input: &str, pairs: &[ExchangePair]) -> Vec<ChatMessage> {
        if pairs.is_empty() {
            return self.build(user_input, true, None);
        }

        let start = pairs.len().saturating_sub(self.history_window);
        let mut messages: Vec<ChatMessage> = pairs[start..]
            .iter()
            .flat_map(|pair| {
                [
                    ChatMessage::new(Role::User, pair.user.clone()),
                    ChatMessage::new(Role::Assistant, pair.ai.clone()),
                ]
            })
            .collect();
        messages.push(self.follow_up(user_input));
        messages
    }

    fn follow_up(&self, user_input: &str) -> ChatMessage {
        match &self.reminder {
            Some(reminder) => ChatMessage::new(Role::User, format!("{reminder}\n{user_input}")),
            None => ChatMessage::new(Role::User, user_input),
        }
    }

    /// Renders messages as `Role: content` blocks followed by the assistant cue.
    pub fn flatten(&self, messages: &[ChatMessage]) -> Result<String, minijinja::Error> {
        let messages: Vec<minijinja::Value> =
            messages.iter().map(ChatMessage::as_jinja_value).collect();

        self.env
            .get_template("prompt")?
            .render(minijinja::context! { messages => messages })
    }

    /// Human readable summary of the history that fed a reply.
    pub fn describe_context(&self, history: &[ChatMessage]) -> String {
        let window = self.window(history);
        if window.is_empty() {
            return NO_CONTEXT.to_owned();
        }

        window
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
