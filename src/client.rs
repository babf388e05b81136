use tokio::sync::mpsc;
use log::{debug, error, info};

use crate::config::{AllmConfig, ChainConfig, GenerationDefaults};
use crate::error::Error;
use crate::factory::AdapterFactory;
use crate::failover::Orchestrator;
use crate::message::CanonicalMessage;
use crate::request::{GenerationRequest, OnToken};
use crate::AllmFoot;

/// Backend state: read-only inputs snapshotted by every call
pub struct AllmBackendState
{   pub factory: AdapterFactory
  , pub chain: ChainConfig
  , pub defaults: GenerationDefaults
  , pub http_client: reqwest::Client
}

impl AllmBackendState
{   pub fn new(
      config: &AllmConfig
    , factory: AdapterFactory
    ) -> Self
    {   debug!("Initializing AllmBackendState");
        AllmBackendState
        {   factory
          , chain: config.chain.clone()
          , defaults: config.generation.clone()
          , http_client: reqwest::Client::new()
        }
    }

    /// Resolve the chain now, so config changes apply to the next call.
    fn build_request(
      &self
    , messages: Vec<CanonicalMessage>
    , max_tokens: Option<u32>
    , temperature: Option<f32>
    , on_token: Option<OnToken>
    ) -> Result<GenerationRequest, Error>
    {   let chain = self.chain.resolve()?;
        let mut request = GenerationRequest::new(messages, chain)
          .with_max_tokens(max_tokens.unwrap_or(self.defaults.max_tokens))
          .with_temperature(
            temperature.unwrap_or(self.defaults.temperature)
          );
        request.timeout = self.defaults.timeout();
        request.on_token = on_token;
        Ok(request)
    }

    fn apply_credentials(&mut self, specs: Vec<crate::CredentialSpec>)
    {   for spec in specs
        {   let mut credentials = self.factory
              .credentials(spec.provider)
              .cloned()
              .unwrap_or_default();
            credentials.api_key = Some(spec.api_key);
            if spec.api_base.is_some()
            {   credentials.api_base = spec.api_base;
            }
            self.factory.set_credentials(spec.provider, credentials);
        }
    }

    fn set_chain(&mut self, chain: ChainConfig) -> Result<(), Error>
    {   chain.resolve()?;
        self.chain = chain;
        Ok(())
    }
}

/// Public API for ALLM backend - owns the task
pub struct AllmBackend
{   hand: crate::AllmHand
  , _task_handle: tokio::task::JoinHandle<()>
}

impl AllmBackend
{   /// Create and spawn a new ALLM backend from configuration
    pub fn new(config: AllmConfig) -> Result<Self, Error>
    {   let factory = config.factory()?;
        Ok(Self::with_factory(config, factory))
    }

    /// Create and spawn a backend with a prepared factory
    /// Returns immediately - spawns background task
    pub fn with_factory(
      config: AllmConfig
    , factory: AdapterFactory
    ) -> Self
    {   debug!("Creating AllmBackend with task ownership");

        let (generate_tx, generate_rx)
          = mpsc::unbounded_channel();
        let (set_credentials_tx, set_credentials_rx)
          = mpsc::unbounded_channel();
        let (list_providers_tx, list_providers_rx)
          = mpsc::unbounded_channel();
        let (kill_process_tx, kill_process_rx)
          = mpsc::unbounded_channel();
        let (set_model_chain_tx, set_model_chain_rx)
          = mpsc::unbounded_channel();

        let hand = crate::AllmHand
        {   generate_tx
          , set_credentials_tx
          , list_providers_tx
          , kill_process_tx
          , set_model_chain_tx
        };

        let foot = crate::AllmFoot
        {   generate_rx
          , set_credentials_rx
          , list_providers_rx
          , kill_process_rx
          , set_model_chain_rx
        };

        let state = AllmBackendState::new(&config, factory);
        let _task_handle = tokio::spawn(async move {
          run_backend_loop(foot, state).await
        });

        AllmBackend
        {   hand
          , _task_handle
        }
    }

    /// Queue a generation - returns almost immediately
    pub async fn generate(
      &self
    , messages: Vec<CanonicalMessage>
    , on_token: Option<OnToken>
    ) -> Result<
        mpsc::UnboundedReceiver<crate::GenerateReply>,
        Error
      >
    {   self.generate_with(messages, None, None, on_token).await
    }

    /// Queue a generation overriding the configured defaults
    pub async fn generate_with(
      &self
    , messages: Vec<CanonicalMessage>
    , max_tokens: Option<u32>
    , temperature: Option<f32>
    , on_token: Option<OnToken>
    ) -> Result<
        mpsc::UnboundedReceiver<crate::GenerateReply>,
        Error
      >
    {   debug!("generate queuing {} message(s)", messages.len());
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::GenerateArgs
        {   messages
          , max_tokens
          , temperature
          , on_token
          , reply: reply_tx
        };

        self.hand.generate_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            Error::BackendDisconnected
          })?;

        Ok(reply_rx)
    }

    /// Queue a single user prompt
    pub async fn send_prompt(
      &self
    , prompt: String
    ) -> Result<
        mpsc::UnboundedReceiver<crate::GenerateReply>,
        Error
      >
    {   self.generate(vec![CanonicalMessage::user(prompt)], None).await
    }

    /// Set credentials - returns almost immediately
    pub async fn set_credentials(
      &self
    , credentials: Vec<crate::CredentialSpec>
    ) -> Result<
        mpsc::UnboundedReceiver<crate::SetCredentialsReply>,
        Error
      >
    {   debug!("set_credentials queuing {} entries", credentials.len());
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::SetCredentialsArgs
        {   credentials
          , reply: reply_tx
        };

        self.hand.set_credentials_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            Error::BackendDisconnected
          })?;

        Ok(reply_rx)
    }

    /// List registered providers - returns almost immediately
    pub async fn list_providers(
      &self
    ) -> Result<
        mpsc::UnboundedReceiver<crate::ListProvidersReply>,
        Error
      >
    {   debug!("list_providers queuing command");
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::ListProvidersArgs
        {   reply: reply_tx
        };

        self.hand.list_providers_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            Error::BackendDisconnected
          })?;

        Ok(reply_rx)
    }

    /// Replace the model chain - returns almost immediately
    pub async fn set_model_chain(
      &self
    , chain: ChainConfig
    ) -> Result<
        mpsc::UnboundedReceiver<crate::SetModelChainReply>,
        Error
      >
    {   debug!("set_model_chain queuing primary {}", chain.primary);
        let (reply_tx, reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::SetModelChainArgs
        {   chain
          , reply: reply_tx
        };

        self.hand.set_model_chain_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel closed");
            Error::BackendDisconnected
          })?;

        Ok(reply_rx)
    }

    /// Gracefully shutdown the backend
    pub async fn shutdown(self)
      -> Result<(), Error>
    {   debug!("Shutting down AllmBackend");
        let (reply_tx, mut reply_rx)
          = mpsc::unbounded_channel();

        let cmd = crate::KillProcessArgs
        {   reply: reply_tx
        };

        self.hand.kill_process_tx
          .send(cmd)
          .map_err(|_| {
            error!("Backend channel already closed");
            Error::BackendDisconnected
          })?;

        // Wait for shutdown confirmation
        if let Some(result) = reply_rx.recv().await
        {   debug!("Backend shutdown confirmed");
            result
        } else
        {   error!("Backend dropped shutdown reply");
            Err(Error::BackendDisconnected)
        }
    }
}

/// Main backend event loop
///
/// select! only routes commands. Each generation runs in its own task
/// over a snapshot of the factory.
async fn run_backend_loop(
  foot: crate::AllmFoot
, mut state: AllmBackendState
)
{   debug!("Starting AllmBackend event loop");
    let AllmFoot
    {   mut generate_rx
      , mut set_credentials_rx
      , mut list_providers_rx
      , mut kill_process_rx
      , mut set_model_chain_rx
    } = foot;

    loop
    { tokio::select!
      { Some(cmd) = generate_rx.recv() => {
          debug!("Received Generate with {} message(s)", cmd.messages.len());
          let crate::GenerateArgs
          {   messages
            , max_tokens
            , temperature
            , on_token
            , reply
          } = cmd;

          match state.build_request(
            messages, max_tokens, temperature, on_token
          )
          {   Ok(request) => {
                let orchestrator = Orchestrator::with_client(
                  state.http_client.clone(),
                  state.factory.clone()
                );
                tokio::spawn(async move {
                  let result = orchestrator.generate(request).await;
                  let _ = reply.send(result);
                });
              }
            , Err(e) => {
                error!("Cannot build request: {}", e);
                let _ = reply.send(Err(e));
              }
          }
        }
      , Some(cmd) = set_credentials_rx.recv() => {
          debug!("Received SetCredentials");
          state.apply_credentials(cmd.credentials);
          let _ = cmd.reply.send(Ok(()));
        }
      , Some(cmd) = list_providers_rx.recv() => {
          debug!("Received ListProviders");
          let _ = cmd.reply.send(Ok(crate::Provider::ALL.to_vec()));
        }
      , Some(cmd) = kill_process_rx.recv() => {
          debug!("Received KillProcess");
          let _ = cmd.reply.send(Ok(()));
          info!("AllmBackend shutting down");
          break;
        }
      , Some(cmd) = set_model_chain_rx.recv() => {
          debug!("Received SetModelChain");
          let result = state.set_chain(cmd.chain);
          if let Err(e) = &result
          {   error!("Rejected model chain: {}", e);
          }
          let _ = cmd.reply.send(result);
        }
      , else => {
          debug!("All command channels closed");
          break;
        }
      }
    }
}
