use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::redaction::TaintSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
            Self::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub index: usize,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    #[serde(default)]
    pub project: Option<String>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<TranscriptMessage>,
}

impl Transcript {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project: None,
            created_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn with_message(mut self, role: Role, content: impl Into<String>) -> Self {
        let index = self.messages.len();
        self.messages.push(TranscriptMessage {
            index,
            role,
            content: content.into(),
            file_type: None,
        });
        self
    }

    pub fn with_file_message(
        mut self,
        role: Role,
        content: impl Into<String>,
        file_type: impl Into<String>,
    ) -> Self {
        let index = self.messages.len();
        self.messages.push(TranscriptMessage {
            index,
            role,
            content: content.into(),
            file_type: Some(file_type.into()),
        });
        self
    }

    /// Split into fragments, one per message. The fragment text is the raw
    /// message; redaction and taint happen downstream.
    pub fn fragments(&self) -> Vec<TranscriptFragment> {
        self.messages
            .iter()
            .enumerate()
            .map(|(pos, msg)| {
                let preceding_role = pos
                    .checked_sub(1)
                    .and_then(|p| self.messages.get(p))
                    .map(|m| m.role);
                TranscriptFragment {
                    source_id: self.id.clone(),
                    range: FragmentRange::message(msg.index, msg.content.len()),
                    role: msg.role,
                    text: msg.content.clone(),
                    taint: TaintSet::for_role(msg.role),
                    context: FragmentContext {
                        file_type: msg.file_type.clone(),
                        preceding_role,
                    },
                }
            })
            .collect()
    }

    pub fn fragment_at(&self, range: &FragmentRange) -> Option<TranscriptFragment> {
        self.fragments()
            .into_iter()
            .find(|f| f.range.message_index == range.message_index)
    }
}

/// Location of a fragment inside its transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentRange {
    pub message_index: usize,
    pub byte_start: usize,
    pub byte_end: usize,
}

impl FragmentRange {
    pub fn message(message_index: usize, len: usize) -> Self {
        Self {
            message_index,
            byte_start: 0,
            byte_end: len,
        }
    }
}

impl std::fmt::Display for FragmentRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "m{}[{}..{}]",
            self.message_index, self.byte_start, self.byte_end
        )
    }
}

/// Owned pointer to a fragment: transcript id plus range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentRef {
    pub transcript_id: String,
    pub range: FragmentRange,
}

impl std::fmt::Display for FragmentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.transcript_id, self.range.message_index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preceding_role: Option<Role>,
}

/// A contiguous transcript excerpt attributable to one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptFragment {
    pub source_id: String,
    pub range: FragmentRange,
    pub role: Role,
    pub text: String,
    pub taint: TaintSet,
    #[serde(default)]
    pub context: FragmentContext,
}

impl TranscriptFragment {
    /// Stable identifier: `{transcript}#{message}`.
    pub fn fragment_id(&self) -> String {
        format!("{}#{}", self.source_id, self.range.message_index)
    }

    pub fn fragment_ref(&self) -> FragmentRef {
        FragmentRef {
            transcript_id: self.source_id.clone(),
            range: self.range,
        }
    }

    /// Deterministic ordering key: earliest transcript first, then message.
    pub fn order_key(&self) -> (&str, usize) {
        (&self.source_id, self.range.message_index)
    }
}
