use serde::{Deserialize, Serialize};

/// Who produced a turn. Developer turns are transient prompt scaffolding and
/// never survive into retained history or the read surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Developer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Developer => "developer",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    OutputText,
    Reasoning,
    ToolUse,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSegment {
    pub kind: SegmentKind,
    pub text: String,
}

impl ContentSegment {
    pub fn output_text(text: impl Into<String>) -> Self {
        Self { kind: SegmentKind::OutputText, text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self { kind: SegmentKind::Reasoning, text: text.into() }
    }

    pub fn tool_use(text: impl Into<String>) -> Self {
        Self { kind: SegmentKind::ToolUse, text: text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    Text(String),
    Segments(Vec<ContentSegment>),
}

/// One role-tagged unit of conversation history. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: TurnContent,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, content: TurnContent::Text(text.into()) }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Segments(vec![ContentSegment::output_text(text)]),
        }
    }

    pub fn assistant_segments(segments: Vec<ContentSegment>) -> Self {
        Self { role: Role::Assistant, content: TurnContent::Segments(segments) }
    }

    pub fn developer(text: impl Into<String>) -> Self {
        Self { role: Role::Developer, content: TurnContent::Text(text.into()) }
    }

    /// Transient turns exist only to steer a single runner invocation.
    pub fn is_transient(&self) -> bool {
        self.role == Role::Developer
    }

    /// Text surfaced to external readers, or `None` when the turn carries
    /// nothing user-visible. User turns surface their trimmed text; assistant
    /// turns surface only segments explicitly typed as final output text.
    pub fn visible_text(&self) -> Option<String> {
        let text = match (&self.role, &self.content) {
            (Role::Developer, _) => return None,
            (_, TurnContent::Text(text)) => text.trim().to_string(),
            (Role::User, TurnContent::Segments(segments)) => segments
                .iter()
                .map(|segment| segment.text.trim())
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            (Role::Assistant, TurnContent::Segments(segments)) => segments
                .iter()
                .filter(|segment| segment.kind == SegmentKind::OutputText)
                .map(|segment| segment.text.trim())
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        };

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Applies the retention policy to a flattened run result: transient turns
/// are stripped, then the oldest turns are evicted until at most `max_turns`
/// remain.
pub fn retain_history(turns: Vec<Turn>, max_turns: usize) -> Vec<Turn> {
    let mut retained: Vec<Turn> =
        turns.into_iter().filter(|turn| !turn.is_transient()).collect();
    if retained.len() > max_turns {
        retained.drain(..retained.len() - max_turns);
    }
    retained
}
