use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Read-only view of a chat message as the chunker sees it.
///
/// `author()` resolves the display name first and falls back to the
/// username; implementors only need to supply the two raw fields.
pub trait ChatMessage {
    fn content(&self) -> &str;
    fn display_name(&self) -> Option<&str>;
    fn username(&self) -> Option<&str>;
    fn created_at(&self) -> Option<NaiveDateTime>;

    fn author(&self) -> &str {
        non_empty(self.display_name())
            .or_else(|| non_empty(self.username()))
            .unwrap_or("unknown")
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// One message row produced by the import layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: Option<u64>,
    pub server_id: Option<u64>,
    pub server_name: Option<String>,
    pub channel_id: Option<u64>,
    pub channel_name: Option<String>,
    pub thread_id: Option<u64>,
    pub author_id: Option<u64>,
    pub author: Option<String>,
    pub username: Option<String>,
    pub content: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub edited_at: Option<NaiveDateTime>,
    pub reply_to: Option<u64>,
}

#[cfg(test)]
impl MessageRecord {
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn at(mut self, created_at: NaiveDateTime) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

impl ChatMessage for MessageRecord {
    fn content(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    fn display_name(&self) -> Option<&str> {
        self.author.as_deref()
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    fn created_at(&self) -> Option<NaiveDateTime> {
        self.created_at
    }
}

impl<T: ChatMessage + ?Sized> ChatMessage for &T {
    fn content(&self) -> &str {
        (**self).content()
    }

    fn display_name(&self) -> Option<&str> {
        (**self).display_name()
    }

    fn username(&self) -> Option<&str> {
        (**self).username()
    }

    fn created_at(&self) -> Option<NaiveDateTime> {
        (**self).created_at()
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatMessage, MessageRecord};

    #[test]
    fn author_prefers_display_name() {
        let mut record = MessageRecord::new("Alice", "hi");
        record.username = Some("alice_raw".to_string());
        assert_eq!(record.author(), "Alice");
    }

    #[test]
    fn author_falls_back_to_username_then_unknown() {
        let mut record = MessageRecord {
            username: Some("bob".to_string()),
            ..MessageRecord::default()
        };
        assert_eq!(record.author(), "bob");

        record.author = Some("  ".to_string());
        assert_eq!(record.author(), "bob");

        record.username = None;
        assert_eq!(record.author(), "unknown");
    }

    #[test]
    fn missing_content_reads_as_empty() {
        let record = MessageRecord::default();
        assert_eq!(record.content(), "");
    }
}
