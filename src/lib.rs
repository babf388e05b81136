pub mod error;
pub mod config;
pub mod message;
pub mod model;
pub mod providers;
pub mod request;
pub mod factory;
pub mod failover;
pub mod client;
use serde::{Deserialize, Serialize};

pub use client::AllmBackend;
pub use config::{AllmConfig, ChainConfig, GenerationDefaults, ProviderConfig};
pub use error::{AttemptFailure, Error, FailureKind};
pub use factory::{AdapterFactory, ProviderCredentials};
pub use failover::{ChainState, Orchestrator};
pub use message::{CanonicalMessage, Role};
pub use model::{ModelChain, ModelSpec};
pub use providers::{Adapter, MockAdapter, MockReply};
pub use request::{
  AttemptRecord, GenerationRequest, GenerationResult, OnToken, Outcome, Usage
};

/*

allm (All LLMs): one canonical "generate text from a conversation"
request, translated into each vendor's dialect and walked across an
ordered chain of candidate models until one answers.

allm/
├── Cargo.toml
├── src/
│   ├── lib.rs          # Actor API, provider registry, re-exports
│   ├── error.rs        # Error taxonomy and attempt failures
│   ├── message.rs      # Canonical messages and validation
│   ├── model.rs        # provider/model specs and the model chain
│   ├── request.rs      # Generation request/result, attempt records
│   ├── config.rs       # JSON configuration
│   ├── factory.rs      # ModelSpec -> Adapter
│   ├── failover.rs     # Chain state machine and orchestrator
│   ├── client.rs       # Backend task owning config, one task per call
│   └── providers/
│       ├── mod.rs      # Dialect contract and the Adapter enum
│       ├── http.rs     # Shared HTTP/SSE transport and classification
│       ├── openai.rs   # OpenAI-compatible chat completions
│       ├── anthropic.rs
│       ├── gemini.rs
│       └── mock.rs     # Deterministic, offline
└── tests/

*/

/// Install `env_logger` once; later calls are no-ops.
pub fn init_logging()
{   let _ = env_logger::Builder::from_env(
      env_logger::Env::default().default_filter_or("warn")
    )
    .try_init();
}

/// ALLM API INTERFACE:

// ===== Generate =====

pub type GenerateReply = Result<GenerationResult, crate::error::Error>;
pub type GenerateReplySender
  = tokio::sync::mpsc::UnboundedSender<GenerateReply>;

pub struct GenerateArgs
{   pub messages: Vec<CanonicalMessage>
  , pub max_tokens: Option<u32>
  , pub temperature: Option<f32>
  , pub on_token: Option<OnToken>
  , pub reply: GenerateReplySender
}

// ===== SetCredentials =====

pub type SetCredentialsReply = Result<(), crate::error::Error>;
pub type SetCredentialsReplySender
  = tokio::sync::mpsc::UnboundedSender<SetCredentialsReply>;

pub struct SetCredentialsArgs
{   pub credentials: Vec<CredentialSpec>
  , pub reply: SetCredentialsReplySender
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSpec
{   pub provider: crate::Provider
  , pub api_key: String
  , pub api_base: Option<String>
}

// ===== ListProviders =====

pub type ListProvidersReply
  = Result<Vec<crate::Provider>, crate::error::Error>;
pub type ListProvidersReplySender
  = tokio::sync::mpsc::UnboundedSender<ListProvidersReply>;

pub struct ListProvidersArgs
{   pub reply: ListProvidersReplySender
}

// ===== KillProcess =====

pub type KillProcessReply = Result<(), crate::error::Error>;
pub type KillProcessReplySender
  = tokio::sync::mpsc::UnboundedSender<KillProcessReply>;

pub struct KillProcessArgs
{   pub reply: KillProcessReplySender
}

// ===== SetModelChain =====

pub type SetModelChainReply = Result<(), crate::error::Error>;
pub type SetModelChainReplySender
  = tokio::sync::mpsc::UnboundedSender<SetModelChainReply>;

pub struct SetModelChainArgs
{   pub chain: ChainConfig
  , pub reply: SetModelChainReplySender
}

// ===== AllmHand (sender side) =====

pub struct AllmHand
{   pub generate_tx
      : tokio::sync::mpsc::UnboundedSender<GenerateArgs>
  , pub set_credentials_tx
      : tokio::sync::mpsc::UnboundedSender<SetCredentialsArgs>
  , pub list_providers_tx
      : tokio::sync::mpsc::UnboundedSender<ListProvidersArgs>
  , pub kill_process_tx
      : tokio::sync::mpsc::UnboundedSender<KillProcessArgs>
  , pub set_model_chain_tx
      : tokio::sync::mpsc::UnboundedSender<SetModelChainArgs>
}

// ===== AllmFoot (receiver side) =====

pub struct AllmFoot
{   pub generate_rx
      : tokio::sync::mpsc::UnboundedReceiver<GenerateArgs>
  , pub set_credentials_rx
      : tokio::sync::mpsc::UnboundedReceiver<SetCredentialsArgs>
  , pub list_providers_rx
      : tokio::sync::mpsc::UnboundedReceiver<ListProvidersArgs>
  , pub kill_process_rx
      : tokio::sync::mpsc::UnboundedReceiver<KillProcessArgs>
  , pub set_model_chain_rx
      : tokio::sync::mpsc::UnboundedReceiver<SetModelChainArgs>
}

/// ALLM STRUCTURES:

/// Wire dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind
{   /// `/chat/completions` with a flat role/content list
    OpenAiCompatible
  , /// `/messages` with a top-level `system` field
    Anthropic
  , /// `generateContent` with `systemInstruction`
    Gemini
  , /// Offline, for tests
    Mock
}

/// Every provider id the factory knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Hash)]
pub enum Provider
{
  // ===== OPENAI-COMPATIBLE =====
  /// OpenAI (GPT-4o, o-series)
  OpenAI
  ,
  /// Groq (hosted Llama, Gemma, DeepSeek)
  Groq
  ,
  /// DeepSeek
  DeepSeek
  ,
  /// Mistral AI
  MistralAi
  ,
  /// OpenRouter (unified API over many providers)
  OpenRouter
  ,
  /// xAI (Grok)
  Xai
  ,
  /// Together AI
  TogetherAi
  ,
  /// Local/self-hosted servers (Ollama, LM Studio, vLLM)
  Local
  ,
  // ===== NATIVE DIALECTS =====
  /// Anthropic (Claude models)
  Anthropic
  ,
  /// Google AI Studio (Gemini)
  Google
  ,
  // ===== TESTING =====
  /// Deterministic offline responses
  Mock
}

impl Provider
{   pub const ALL: [Provider; 11] =
    [   Provider::OpenAI
      , Provider::Groq
      , Provider::DeepSeek
      , Provider::MistralAi
      , Provider::OpenRouter
      , Provider::Xai
      , Provider::TogetherAi
      , Provider::Local
      , Provider::Anthropic
      , Provider::Google
      , Provider::Mock
    ];

    /// Id used in `provider/model` strings
    pub fn id(&self) -> &'static str
    {   match self
        {   Provider::OpenAI => "openai"
          , Provider::Groq => "groq"
          , Provider::DeepSeek => "deepseek"
          , Provider::MistralAi => "mistral"
          , Provider::OpenRouter => "openrouter"
          , Provider::Xai => "xai"
          , Provider::TogetherAi => "together"
          , Provider::Local => "local"
          , Provider::Anthropic => "anthropic"
          , Provider::Google => "gemini"
          , Provider::Mock => "mock"
        }
    }

    /// Case-insensitive lookup; `google` is accepted for Gemini.
    pub fn from_id(id: &str) -> Option<Provider>
    {   let id = id.trim().to_ascii_lowercase();
        if id == "google"
        {   return Some(Provider::Google);
        }
        Provider::ALL.iter().copied().find(|p| p.id() == id)
    }

    pub fn dialect(&self) -> DialectKind
    {   match self
        {   Provider::Anthropic => DialectKind::Anthropic
          , Provider::Google => DialectKind::Gemini
          , Provider::Mock => DialectKind::Mock
          , _ => DialectKind::OpenAiCompatible
        }
    }

    pub fn default_api_base(&self) -> &'static str
    {   match self
        {   Provider::OpenAI => "https://api.openai.com/v1"
          , Provider::Groq => "https://api.groq.com/openai/v1"
          , Provider::DeepSeek => "https://api.deepseek.com/v1"
          , Provider::MistralAi => "https://api.mistral.ai/v1"
          , Provider::OpenRouter => "https://openrouter.ai/api/v1"
          , Provider::Xai => "https://api.x.ai/v1"
          , Provider::TogetherAi => "https://api.together.xyz/v1"
          , Provider::Local => "http://localhost:11434/v1"
          , Provider::Anthropic => "https://api.anthropic.com/v1"
          , Provider::Google
              => "https://generativelanguage.googleapis.com/v1beta"
          , Provider::Mock => ""
        }
    }

    pub fn requires_api_key(&self) -> bool
    {   !matches!(self, Provider::Local | Provider::Mock)
    }

    /// Name of the output-limit field in the chat-completions body
    pub fn token_field(&self) -> providers::openai::TokenField
    {   match self
        {   Provider::OpenAI
              => providers::openai::TokenField::MaxCompletionTokens
          , _ => providers::openai::TokenField::MaxTokens
        }
    }
}

impl std::fmt::Display for Provider
{   fn fmt(&self, f: &mut std::fmt::Formatter<'_>)
      -> std::fmt::Result
    {   f.write_str(self.id())
    }
}
