//! Process configuration read from the environment

use std::time::Duration;

const DEFAULT_API_URL: &str = "https://api.telnyx.com/v2";
const DEFAULT_CLOSING_REMARK: &str = "Bedankt voor uw antwoorden. Fijne dag verder!";

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub db_path: String,
    /// Ruleset used for every incoming call
    pub default_ruleset: String,
    pub telephony: TelephonyConfig,
    pub speech: SpeechSettings,
    pub aggregator: AggregatorSettings,
    pub validator: ValidatorConfig,
    pub mailer: MailerConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let db_path = std::env::var("CALLFLOW_DB_PATH").unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            format!("{home}/.callflow/callflow.db")
        });

        let port: u16 = std::env::var("CALLFLOW_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let speech_defaults = SpeechSettings::default();
        let speech = SpeechSettings {
            language: env_or("CALLFLOW_LANGUAGE", speech_defaults.language),
            transcription_language: env_or(
                "CALLFLOW_TRANSCRIPTION_LANGUAGE",
                speech_defaults.transcription_language,
            ),
            transcription_engine: env_or(
                "CALLFLOW_TRANSCRIPTION_ENGINE",
                speech_defaults.transcription_engine,
            ),
            voice: env_or("CALLFLOW_VOICE", speech_defaults.voice),
            closing_remark: env_or("CALLFLOW_CLOSING_REMARK", speech_defaults.closing_remark),
        };

        Self {
            port,
            db_path,
            default_ruleset: env_or("CALLFLOW_DEFAULT_RULESET", "default".to_string()),
            telephony: TelephonyConfig {
                api_key: std::env::var("TELNYX_API_KEY").unwrap_or_default(),
                api_url: env_or("TELNYX_API_URL", DEFAULT_API_URL.to_string()),
                retry: RetryPolicy::default(),
            },
            speech,
            aggregator: AggregatorSettings::default(),
            validator: ValidatorConfig {
                api_key: std::env::var("OPENAI_API_KEY").ok(),
                base_url: env_or(
                    "OPENAI_BASE_URL",
                    "https://api.openai.com/v1/chat/completions".to_string(),
                ),
                model: env_or("OPENAI_MODEL", "gpt-4o-mini".to_string()),
            },
            mailer: MailerConfig {
                relay_url: std::env::var("EMAIL_RELAY_URL").ok(),
                relay_token: std::env::var("EMAIL_RELAY_TOKEN").ok(),
                from: env_or("EMAIL_FROM", "noreply@callflow.local".to_string()),
                fallback_recipient: std::env::var("EMAIL_FALLBACK_RECIPIENT").ok(),
            },
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(default)
}

/// Call-control platform access
#[derive(Debug, Clone)]
pub struct TelephonyConfig {
    pub api_key: String,
    pub api_url: String,
    pub retry: RetryPolicy,
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: DEFAULT_API_URL.to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Fixed-delay retry for outbound commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Voice and transcription parameters sent with speech commands
#[derive(Debug, Clone)]
pub struct SpeechSettings {
    pub language: String,
    pub transcription_language: String,
    /// "A" selects Google, "B" the platform's own engine
    pub transcription_engine: String,
    pub voice: String,
    /// Spoken once the script is exhausted
    pub closing_remark: String,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            language: "nl-NL".to_string(),
            transcription_language: "nl".to_string(),
            transcription_engine: "A".to_string(),
            voice: "male".to_string(),
            closing_remark: DEFAULT_CLOSING_REMARK.to_string(),
        }
    }
}

/// End-of-call completion wait
#[derive(Debug, Clone, Copy)]
pub struct AggregatorSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Chat-completion endpoint used to normalise answers
#[derive(Debug, Clone, Default)]
pub struct ValidatorConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

/// HTTP mail relay
#[derive(Debug, Clone, Default)]
pub struct MailerConfig {
    pub relay_url: Option<String>,
    pub relay_token: Option<String>,
    pub from: String,
    pub fallback_recipient: Option<String>,
}
