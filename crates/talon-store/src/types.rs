use serde::{Deserialize, Serialize};

/// Which memory store a row belongs to. Episodic rows are conversational
/// fragments that decay quickly; semantic rows are extracted durable facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemorySector {
    Semantic,
    Episodic,
}

impl std::fmt::Display for MemorySector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semantic => write!(f, "semantic"),
            Self::Episodic => write!(f, "episodic"),
        }
    }
}

impl std::str::FromStr for MemorySector {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(Self::Semantic),
            "episodic" => Ok(Self::Episodic),
            other => Err(format!("unknown memory sector: {other}")),
        }
    }
}

/// A single memory row. `salience` lives in [0, 5]; rows dropping below 0.1
/// during a decay sweep are deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: i64,
    pub chat_id: i64,
    pub topic_key: Option<String>,
    pub content: String,
    pub sector: MemorySector,
    pub salience: f64,
    pub created_at: i64,
    pub accessed_at: i64,
}

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Active,
    Paused,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A persisted scheduled task. `schedule` is a five-field cron expression;
/// `next_run`/`last_run` are unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub chat_id: i64,
    pub prompt: String,
    pub schedule: String,
    pub next_run: i64,
    pub last_run: Option<i64>,
    pub last_result: Option<String>,
    pub status: TaskStatus,
    pub created_at: i64,
}

/// Who authored a conversation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: i64,
    pub chat_id: i64,
    pub session_id: Option<String>,
    pub role: Role,
    pub content: String,
    pub created_at: i64,
}

/// One agent turn's token accounting, written after the reply is produced.
#[derive(Debug, Clone, Default)]
pub struct NewUsage {
    pub chat_id: i64,
    pub session_id: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read: u64,
    pub cost_usd: f64,
    pub did_compact: bool,
}

/// Aggregate over the usage ledger for a reporting window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CostSummary {
    pub turns: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub chat_id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    pub notes: Option<String>,
    pub photo_path: Option<String>,
    pub source: String,
    pub first_seen: i64,
    pub last_contact: i64,
    pub interaction_count: i64,
    pub updated_at: i64,
}

/// Fields accepted by the contact upsert. `None` leaves an existing column
/// untouched on update.
#[derive(Debug, Clone, Default)]
pub struct NewContact {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    pub notes: Option<String>,
    pub photo_path: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionType {
    Email,
    Meeting,
    Call,
    Note,
    Other,
}

impl std::fmt::Display for InteractionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Email => "email",
            Self::Meeting => "meeting",
            Self::Call => "call",
            Self::Note => "note",
            Self::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for InteractionType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Self::Email),
            "meeting" => Ok(Self::Meeting),
            "call" => Ok(Self::Call),
            "note" => Ok(Self::Note),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown interaction type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionSource {
    Manual,
    Auto,
}

impl std::fmt::Display for InteractionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for InteractionSource {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown interaction source: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Interaction {
    pub id: i64,
    pub chat_id: i64,
    pub contact_id: i64,
    pub kind: InteractionType,
    pub source: InteractionSource,
    pub summary: Option<String>,
    pub date: i64,
    pub created_at: i64,
}
