//! Log actions that create sin and prayer records.

use crate::{DocumentStore, Error, EventDraft, EventKind, EventRecord, Identity, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The seven major sins offered as quick picks
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MajorSin {
    Pride,
    Lust,
    Greed,
    Envy,
    Gluttony,
    Wrath,
    Sloth,
}

impl MajorSin {
    pub const ALL: [MajorSin; 7] = [
        MajorSin::Pride,
        MajorSin::Lust,
        MajorSin::Greed,
        MajorSin::Envy,
        MajorSin::Gluttony,
        MajorSin::Wrath,
        MajorSin::Sloth,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MajorSin::Pride => "Pride",
            MajorSin::Lust => "Lust",
            MajorSin::Greed => "Greed",
            MajorSin::Envy => "Envy",
            MajorSin::Gluttony => "Gluttony",
            MajorSin::Wrath => "Wrath",
            MajorSin::Sloth => "Sloth",
        }
    }
}

impl fmt::Display for MajorSin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MajorSin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MajorSin::ALL
            .into_iter()
            .find(|sin| sin.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::InvalidInput(format!("unknown major sin: {}", s)))
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

/// Log a sin described in free text, or by a major sin when no text is given
pub fn log_sin<S: DocumentStore + ?Sized>(
    store: &S,
    user: Option<&Identity>,
    description: Option<&str>,
    major: Option<MajorSin>,
) -> Result<EventRecord> {
    let user = user.ok_or_else(|| Error::AuthRequired("log your sins".into()))?;

    let description = match (non_empty(description), major) {
        (Some(text), _) => text.to_string(),
        (None, Some(sin)) => sin.name().to_string(),
        (None, None) => {
            return Err(Error::InvalidInput(
                "describe the sin or pick a major sin".into(),
            ))
        }
    };

    let draft = EventDraft {
        kind: EventKind::Sin,
        title: None,
        description,
        created_at: Utc::now(),
    };
    let record = store.append_event(&user.uid, &draft).map_err(|e| {
        tracing::error!("There was an error logging a sin: {}", e);
        e
    })?;
    tracing::info!("Sin {} logged for {}", record.id, user.uid);
    Ok(record)
}

/// Log a prayer with an optional title
pub fn log_prayer<S: DocumentStore + ?Sized>(
    store: &S,
    user: Option<&Identity>,
    title: Option<&str>,
    details: &str,
) -> Result<EventRecord> {
    let user = user.ok_or_else(|| Error::AuthRequired("log your prayers".into()))?;

    let title = non_empty(title).map(str::to_string);
    let details = details.trim();
    if title.is_none() && details.is_empty() {
        return Err(Error::InvalidInput("a prayer needs a title or details".into()));
    }

    let draft = EventDraft {
        kind: EventKind::Prayer,
        title,
        description: details.to_string(),
        created_at: Utc::now(),
    };
    let record = store.append_event(&user.uid, &draft).map_err(|e| {
        tracing::error!("There was an error logging a prayer: {}", e);
        e
    })?;
    tracing::info!("Prayer {} logged for {}", record.id, user.uid);
    Ok(record)
}
