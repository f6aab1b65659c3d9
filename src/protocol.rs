//! Wire types exchanged with clients and with the backend service
//!
//! Clients send `{action, fileName?, audioData?, speakerName?}` text frames.
//! Each action maps to a [`Command`], which in turn produces exactly the
//! [`BackendMessage`] fields that action forwards. Backend replies are
//! opaque and never pass through these types.

use crate::error::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Validation text for `extract` without a speaker name
pub const SPEAKER_NAME_REQUIRED: &str = "Speaker name is required for extraction";
/// Validation text for `extract` without audio
pub const AUDIO_DATA_REQUIRED: &str = "Audio data is required for extraction";

/// Backend operation selected by a client request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Identify,
    Extract,
    Diarize,
    ViewEmbeddings,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Identify => "identify",
            Action::Extract => "extract",
            Action::Diarize => "diarize",
            Action::ViewEmbeddings => "view_embeddings",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "identify" => Ok(Action::Identify),
            "extract" => Ok(Action::Extract),
            "diarize" => Ok(Action::Diarize),
            "view_embeddings" => Ok(Action::ViewEmbeddings),
            other => Err(BrokerError::InvalidAction(other.to_string())),
        }
    }
}

/// Raw client request before action dispatch
///
/// The action stays a plain string here so that an unknown action is
/// reported as `InvalidAction` rather than as a parse failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    pub action: Option<String>,
    pub file_name: Option<String>,
    pub audio_data: Option<String>,
    pub speaker_name: Option<String>,
}

impl ClientRequest {
    /// Parse a text frame. Anything that is not a JSON object with
    /// string-typed fields is a `MalformedRequest`.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| BrokerError::MalformedRequest(e.to_string()))
    }
}

/// A validated client request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Identify {
        file_name: Option<String>,
        audio_data: Option<String>,
    },
    Extract {
        file_name: Option<String>,
        audio_data: String,
        speaker_name: String,
    },
    Diarize {
        file_name: Option<String>,
        audio_data: Option<String>,
    },
    ViewEmbeddings,
}

impl Command {
    /// Parse and validate one client text frame.
    pub fn parse(raw: &str) -> Result<Self> {
        Self::try_from(ClientRequest::parse(raw)?)
    }

    pub fn action(&self) -> Action {
        match self {
            Command::Identify { .. } => Action::Identify,
            Command::Extract { .. } => Action::Extract,
            Command::Diarize { .. } => Action::Diarize,
            Command::ViewEmbeddings => Action::ViewEmbeddings,
        }
    }

    /// Payload forwarded to the backend for this command.
    pub fn to_backend_message(&self) -> BackendMessage {
        let action = self.action();
        match self {
            Command::Identify {
                file_name,
                audio_data,
            }
            | Command::Diarize {
                file_name,
                audio_data,
            } => BackendMessage {
                action,
                file_name: file_name.clone(),
                audio_data: audio_data.clone(),
                speaker_name: None,
            },
            Command::Extract {
                file_name,
                audio_data,
                speaker_name,
            } => BackendMessage {
                action,
                file_name: file_name.clone(),
                audio_data: Some(audio_data.clone()),
                speaker_name: Some(speaker_name.clone()),
            },
            Command::ViewEmbeddings => BackendMessage {
                action,
                file_name: None,
                audio_data: None,
                speaker_name: None,
            },
        }
    }
}

impl TryFrom<ClientRequest> for Command {
    type Error = BrokerError;

    fn try_from(request: ClientRequest) -> Result<Self> {
        let action: Action = request.action.as_deref().unwrap_or_default().parse()?;

        match action {
            Action::Identify => Ok(Command::Identify {
                file_name: request.file_name,
                audio_data: request.audio_data,
            }),
            Action::Extract => {
                let speaker_name = request
                    .speaker_name
                    .filter(|name| !name.trim().is_empty())
                    .ok_or_else(|| BrokerError::Validation(SPEAKER_NAME_REQUIRED.to_string()))?;
                let audio_data = request
                    .audio_data
                    .filter(|data| !data.is_empty())
                    .ok_or_else(|| BrokerError::Validation(AUDIO_DATA_REQUIRED.to_string()))?;
                Ok(Command::Extract {
                    file_name: request.file_name,
                    audio_data,
                    speaker_name,
                })
            },
            Action::Diarize => Ok(Command::Diarize {
                file_name: request.file_name,
                audio_data: request.audio_data,
            }),
            Action::ViewEmbeddings => Ok(Command::ViewEmbeddings),
        }
    }
}

/// Payload sent to the backend; absent fields are omitted on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendMessage {
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
}

impl BackendMessage {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Into::into)
    }
}
