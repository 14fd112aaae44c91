//! The result envelope every action returns, whichever provider ran it.
//!
//! Wire shape (bit-exact with the JSON consumed by agents):
//! - success: `{ok, media_type, action, provider, output_path, mime, bytes}`
//! - transcription: `{ok, media_type, action: "transcribe", provider, output_path, transcription}`
//! - error: `{ok: false, error: {code, message}}`

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::PathBuf;

use crate::action::{Action, MediaType};
use crate::error::MediaError;

/// Closed set of error codes surfaced in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    FileNotFound,
    InvalidFormat,
    ProviderNotFound,
    NoProvider,
    ProviderError,
    NetworkError,
    ApiError,
    UnknownError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessResult {
    pub media_type: MediaType,
    pub action: Action,
    pub provider: String,
    pub output_path: PathBuf,
    pub mime: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionData {
    pub text: String,
    pub language: String,
    pub segments: Vec<TranscriptionSegment>,
}

/// Successful transcribe outcome; the action is always `transcribe`.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionSuccessResult {
    pub media_type: MediaType,
    pub provider: String,
    pub output_path: PathBuf,
    pub transcription: TranscriptionData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaResult {
    Success(SuccessResult),
    Transcription(TranscriptionSuccessResult),
    Error(ErrorResult),
}

impl MediaResult {
    pub fn success(
        action: Action,
        provider: impl Into<String>,
        output_path: impl Into<PathBuf>,
        mime: impl Into<String>,
        bytes: u64,
    ) -> Self {
        MediaResult::Success(SuccessResult {
            media_type: action.media_type(),
            action,
            provider: provider.into(),
            output_path: output_path.into(),
            mime: mime.into(),
            bytes,
        })
    }

    pub fn transcription(
        media_type: MediaType,
        provider: impl Into<String>,
        output_path: impl Into<PathBuf>,
        transcription: TranscriptionData,
    ) -> Self {
        MediaResult::Transcription(TranscriptionSuccessResult {
            media_type,
            provider: provider.into(),
            output_path: output_path.into(),
            transcription,
        })
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        MediaResult::Error(ErrorResult {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        })
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, MediaResult::Error(_))
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            MediaResult::Error(e) => Some(e.error.code),
            _ => None,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            MediaResult::Success(s) => Some(&s.provider),
            MediaResult::Transcription(t) => Some(&t.provider),
            MediaResult::Error(_) => None,
        }
    }

    pub fn output_path(&self) -> Option<&std::path::Path> {
        match self {
            MediaResult::Success(s) => Some(&s.output_path),
            MediaResult::Transcription(t) => Some(&t.output_path),
            MediaResult::Error(_) => None,
        }
    }

    /// Pretty JSON with two-space indentation, as printed on stdout.
    pub fn to_json_pretty(&self) -> String {
        // Serializing plain owned data into a String cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl From<MediaError> for MediaResult {
    fn from(err: MediaError) -> Self {
        MediaResult::error(err.code(), err.to_string())
    }
}

#[derive(Serialize)]
struct OkWire<'a, T> {
    ok: bool,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Serialize, Deserialize)]
struct TranscriptionWire {
    media_type: MediaType,
    action: Action,
    provider: String,
    output_path: PathBuf,
    transcription: TranscriptionData,
}

impl Serialize for MediaResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MediaResult::Success(s) => OkWire { ok: true, body: s }.serialize(serializer),
            MediaResult::Transcription(t) => {
                let wire = TranscriptionWire {
                    media_type: t.media_type,
                    action: Action::Transcribe,
                    provider: t.provider.clone(),
                    output_path: t.output_path.clone(),
                    transcription: t.transcription.clone(),
                };
                OkWire { ok: true, body: &wire }.serialize(serializer)
            }
            MediaResult::Error(e) => OkWire { ok: false, body: e }.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MediaResult {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut value = serde_json::Value::deserialize(deserializer)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| D::Error::custom("result must be a JSON object"))?;
        let ok = object
            .remove("ok")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| D::Error::custom("missing boolean 'ok' field"))?;

        if !ok {
            return serde_json::from_value(value)
                .map(MediaResult::Error)
                .map_err(D::Error::custom);
        }

        if object.contains_key("transcription") {
            let wire: TranscriptionWire = serde_json::from_value(value).map_err(D::Error::custom)?;
            if wire.action != Action::Transcribe {
                return Err(D::Error::custom("transcription result must have action 'transcribe'"));
            }
            return Ok(MediaResult::Transcription(TranscriptionSuccessResult {
                media_type: wire.media_type,
                provider: wire.provider,
                output_path: wire.output_path,
                transcription: wire.transcription,
            }));
        }

        serde_json::from_value(value)
            .map(MediaResult::Success)
            .map_err(D::Error::custom)
    }
}
