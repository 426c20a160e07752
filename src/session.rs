use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::footprint::{EnergyMix, Footprint, ModelSize, Settings};

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";
pub const MAX_SESSION_TITLE_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown message role: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: Role,
    pub content: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(session_id: Uuid, content: String, input_tokens: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: Role::User,
            content,
            input_tokens,
            output_tokens: 0,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(session_id: Uuid, content: String, output_tokens: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role: Role::Assistant,
            content,
            input_tokens: 0,
            output_tokens,
            created_at: Utc::now(),
        }
    }
}

// Metric fields accumulate across exchanges, each priced with the settings
// in effect at the time; they are not recomputable from current settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_tokens: i64,
    pub energy_wh: f64,
    pub carbon_gco2: f64,
    pub water_l: f64,
    pub model_size: ModelSize,
    pub energy_mix: EnergyMix,
    pub water_factor: f64,
}

impl Session {
    pub fn new(title: String, settings: Settings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title,
            created_at: now,
            updated_at: now,
            total_tokens: 0,
            energy_wh: 0.0,
            carbon_gco2: 0.0,
            water_l: 0.0,
            model_size: settings.model_size,
            energy_mix: settings.energy_mix,
            water_factor: settings.water_factor,
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            model_size: self.model_size,
            energy_mix: self.energy_mix,
            water_factor: self.water_factor,
        }
    }

    pub fn totals(&self) -> SessionTotals {
        SessionTotals {
            total_tokens: self.total_tokens,
            energy_wh: self.energy_wh,
            carbon_gco2: self.carbon_gco2,
            water_l: self.water_l,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub total_tokens: i64,
    pub energy_wh: f64,
    pub carbon_gco2: f64,
    pub water_l: f64,
}

impl SessionTotals {
    pub fn plus_exchange(&self, tokens: i64, footprint: &Footprint) -> SessionTotals {
        SessionTotals {
            total_tokens: self.total_tokens + tokens,
            energy_wh: self.energy_wh + footprint.energy_wh,
            carbon_gco2: self.carbon_gco2 + footprint.carbon_gco2,
            water_l: self.water_l + footprint.water_l,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub model_size: Option<ModelSize>,
    pub energy_mix: Option<EnergyMix>,
    pub water_factor: Option<f64>,
}

impl SessionPatch {
    pub fn apply(&self, session: &mut Session) {
        if let Some(title) = &self.title {
            session.title = title.clone();
        }
        if let Some(size) = self.model_size {
            session.model_size = size;
        }
        if let Some(mix) = self.energy_mix {
            session.energy_mix = mix;
        }
        if let Some(factor) = self.water_factor {
            session.water_factor = factor;
        }
    }
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}

pub fn session_title(first_message: &str) -> String {
    truncate(first_message, MAX_SESSION_TITLE_CHARS)
}
