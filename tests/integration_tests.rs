use std::sync::{Arc, Mutex};
use std::time::Duration;

use allm::{
  AdapterFactory, AllmBackend, AllmConfig, CanonicalMessage, ChainConfig
, ChainState, Error, FailureKind, GenerationRequest, MockAdapter
, ModelChain, ModelSpec, Orchestrator, Outcome, Provider
};
use tokio_test::{assert_err, assert_ok};

fn conversation() -> Vec<CanonicalMessage>
{   vec![
      CanonicalMessage::system("Answer briefly.")
    , CanonicalMessage::user("Hello there")
    ]
}

fn chain(primary: &str, fallbacks: &[&str]) -> ModelChain
{   ModelChain::resolve(primary, fallbacks)
      .expect("test chain should resolve")
}

/// Collects fragments handed to the streaming callback
fn token_sink() -> (Arc<Mutex<Vec<String>>>, impl FnMut(&str) + Send + 'static)
{   let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |fragment: &str| {
      sink.lock().unwrap().push(fragment.to_string());
    })
}

// ===== Chain walking =====

#[tokio::test]
async fn test_failover_reaches_third_candidate()
{   allm::init_logging();
    let factory = AdapterFactory::new()
      .with_mock("a", MockAdapter::failing(FailureKind::NetworkError))
      .with_mock("b", MockAdapter::failing(FailureKind::NetworkError))
      .with_mock("c", MockAdapter::fixed("from c"));

    let request = GenerationRequest::new(
      conversation(),
      chain("mock/a", &["mock/b", "mock/c"])
    );
    let result = assert_ok!(
      Orchestrator::new(factory).generate(request).await
    );

    assert_eq!(result.text, "from c");
    assert_eq!(result.model_used, ModelSpec::new("mock", "c"));
    let models: Vec<String> = result.attempts
      .iter()
      .map(|a| a.model.to_string())
      .collect();
    assert_eq!(models, vec!["mock/a", "mock/b", "mock/c"]);
    let outcomes: Vec<Outcome> = result.attempts
      .iter()
      .map(|a| a.outcome)
      .collect();
    assert_eq!(
      outcomes,
      vec![Outcome::NetworkError, Outcome::NetworkError, Outcome::Success]
    );
    assert!(result.attempts[0].detail.is_some());
    assert!(result.attempts[2].detail.is_none());
}

#[tokio::test]
async fn test_primary_success_stops_the_walk()
{   let factory = AdapterFactory::new()
      .with_mock("a", MockAdapter::fixed("first"))
      .with_mock("b", MockAdapter::failing(FailureKind::AuthError));

    let request = GenerationRequest::new(
      conversation(),
      chain("mock/a", &["mock/b"])
    );
    let result = assert_ok!(
      Orchestrator::new(factory).generate(request).await
    );

    assert_eq!(result.text, "first");
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.attempts[0].outcome, Outcome::Success);
}

#[tokio::test]
async fn test_single_candidate_failure_carries_one_attempt()
{   let factory = AdapterFactory::new()
      .with_mock("only", MockAdapter::failing(FailureKind::RateLimited));

    let request = GenerationRequest::new(
      conversation(),
      ModelChain::single(ModelSpec::new("mock", "only"))
    );
    let err = assert_err!(
      Orchestrator::new(factory).generate(request).await
    );

    match err
    {   Error::AllCandidatesFailed(attempts) => {
          assert_eq!(attempts.len(), 1);
          assert_eq!(attempts[0].model, ModelSpec::new("mock", "only"));
          assert_eq!(attempts[0].outcome, Outcome::RateLimited);
        }
      , other => panic!("unexpected error: {:?}", other)
    }
}

#[tokio::test]
async fn test_final_error_names_every_attempt()
{   let factory = AdapterFactory::new()
      .with_mock("keyless", MockAdapter::failing(FailureKind::AuthError))
      .with_mock("busy", MockAdapter::failing(FailureKind::RateLimited));

    let request = GenerationRequest::new(
      conversation(),
      chain("mock/keyless", &["mock/busy"])
    );
    let err = assert_err!(
      Orchestrator::new(factory).generate(request).await
    );
    let message = err.to_string();

    assert!(message.contains("All 2 candidate(s) failed"), "{}", message);
    let keyless = message.find("mock/keyless -> auth error");
    let busy = message.find("mock/busy -> rate limited");
    assert!(keyless.is_some(), "{}", message);
    assert!(busy.is_some(), "{}", message);
    assert!(keyless < busy, "attempts out of order: {}", message);
}

#[tokio::test]
async fn test_duplicate_candidates_are_each_attempted()
{   let factory = AdapterFactory::new()
      .with_mock("down", MockAdapter::failing(FailureKind::NetworkError));

    let request = GenerationRequest::new(
      conversation(),
      chain("mock/down", &["mock/down"])
    );
    let err = assert_err!(
      Orchestrator::new(factory).generate(request).await
    );

    match err
    {   Error::AllCandidatesFailed(attempts) => {
          assert_eq!(attempts.len(), 2);
          assert!(attempts.iter().all(|a| a.model.model_name == "down"));
        }
      , other => panic!("unexpected error: {:?}", other)
    }
}

#[tokio::test]
async fn test_missing_credentials_fail_without_network()
{   let request = GenerationRequest::new(
      conversation(),
      chain("openai/gpt-4o-mini", &["mock/echo"])
    );
    let result = assert_ok!(
      Orchestrator::new(AdapterFactory::new()).generate(request).await
    );

    assert_eq!(result.text, "Hello there");
    assert_eq!(result.attempts[0].outcome, Outcome::AuthError);
    let detail = result.attempts[0].detail.clone().unwrap_or_default();
    assert!(detail.contains("openai"), "{}", detail);
}

#[tokio::test]
async fn test_timeout_counts_as_network_error()
{   let factory = AdapterFactory::new()
      .with_mock(
        "slow",
        MockAdapter::fixed("late").with_delay(Duration::from_millis(500))
      );

    let request = GenerationRequest::new(
      conversation(),
      chain("mock/slow", &["mock/echo"])
    )
    .with_timeout(Duration::from_millis(20));
    let result = assert_ok!(
      Orchestrator::new(factory).generate(request).await
    );

    assert_eq!(result.text, "Hello there");
    assert_eq!(result.attempts[0].outcome, Outcome::NetworkError);
    let detail = result.attempts[0].detail.clone().unwrap_or_default();
    assert!(detail.contains("timed out"), "{}", detail);
}

// ===== Streaming =====

#[tokio::test]
async fn test_streaming_delivers_fragments_in_order()
{   let factory = AdapterFactory::new()
      .with_mock("stream", MockAdapter::fragments(["Hel", "lo"]));
    let (seen, sink) = token_sink();

    let request = GenerationRequest::new(
      conversation(),
      chain("mock/stream", &[])
    )
    .with_on_token(sink);
    let result = assert_ok!(
      Orchestrator::new(factory).generate(request).await
    );

    assert_eq!(*seen.lock().unwrap(), vec!["Hel", "lo"]);
    assert_eq!(result.text, "Hello");
}

#[tokio::test]
async fn test_mid_stream_failure_advances_without_rollback()
{   let factory = AdapterFactory::new()
      .with_mock(
        "flaky",
        MockAdapter::failing_after(["par", "tial"], FailureKind::NetworkError)
      )
      .with_mock("steady", MockAdapter::fragments(["fresh ", "answer"]));
    let (seen, sink) = token_sink();

    let request = GenerationRequest::new(
      conversation(),
      chain("mock/flaky", &["mock/steady"])
    )
    .with_on_token(sink);
    let result = assert_ok!(
      Orchestrator::new(factory).generate(request).await
    );

    assert_eq!(
      *seen.lock().unwrap(),
      vec!["par", "tial", "fresh ", "answer"]
    );
    assert_eq!(result.text, "fresh answer");
    assert_eq!(result.attempts[0].outcome, Outcome::NetworkError);
    assert_eq!(result.attempts[1].outcome, Outcome::Success);
}

#[tokio::test]
async fn test_non_streaming_adapter_ignores_callback()
{   let factory = AdapterFactory::new()
      .with_mock(
        "batch",
        MockAdapter::fragments(["a", "b"]).without_streaming()
      );
    let (seen, sink) = token_sink();

    let request = GenerationRequest::new(
      conversation(),
      chain("mock/batch", &[])
    )
    .with_on_token(sink);
    let result = assert_ok!(
      Orchestrator::new(factory).generate(request).await
    );

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(result.text, "ab");
}

#[tokio::test]
async fn test_fragments_concatenate_without_callback()
{   let factory = AdapterFactory::new()
      .with_mock("parts", MockAdapter::fragments(["one ", "two"]));

    let request = GenerationRequest::new(
      conversation(),
      chain("mock/parts", &[])
    );
    let result = assert_ok!(
      Orchestrator::new(factory).generate(request).await
    );
    assert_eq!(result.text, "one two");
}

// ===== Rejections before any attempt =====

#[tokio::test]
async fn test_malformed_requests_are_rejected()
{   let orchestrator = Orchestrator::new(AdapterFactory::new());
    let cases = vec![
      GenerationRequest::new(vec![], chain("mock/echo", &[]))
    , GenerationRequest::new(
        vec![CanonicalMessage::user("   ")],
        chain("mock/echo", &[])
      )
    , GenerationRequest::new(
        vec![
          CanonicalMessage::system("one")
        , CanonicalMessage::system("two")
        ],
        chain("mock/echo", &[])
      )
    , GenerationRequest::new(conversation(), chain("mock/echo", &[]))
        .with_max_tokens(0)
    , GenerationRequest::new(conversation(), chain("mock/echo", &[]))
        .with_temperature(2.5)
    , GenerationRequest::new(conversation(), chain("mock/echo", &[]))
        .with_temperature(f32::NAN)
    ];

    for request in cases
    {   let err = assert_err!(orchestrator.generate(request).await);
        assert!(
          matches!(err, Error::MalformedRequest(_)),
          "unexpected error: {:?}",
          err
        );
    }
}

#[tokio::test]
async fn test_boundary_settings_are_accepted()
{   let orchestrator = Orchestrator::new(AdapterFactory::new());
    let cases = vec![
      GenerationRequest::new(conversation(), chain("mock/echo", &[]))
        .with_temperature(0.0)
    , GenerationRequest::new(conversation(), chain("mock/echo", &[]))
        .with_temperature(2.0)
    , GenerationRequest::new(conversation(), chain("mock/echo", &[]))
        .with_max_tokens(1)
    ];

    for request in cases
    {   let result = assert_ok!(orchestrator.generate(request).await);
        assert_eq!(result.text, "Hello there");
        assert_eq!(result.attempts.len(), 1);
    }
}

#[tokio::test]
async fn test_unknown_provider_fails_before_any_attempt()
{   let factory = AdapterFactory::new()
      .with_mock("ok", MockAdapter::fixed("never used"));
    let request = GenerationRequest::new(
      conversation(),
      ModelChain::new(
        ModelSpec::new("mock", "ok"),
        vec![ModelSpec::new("acme", "model-1")]
      )
    );

    let err = assert_err!(
      Orchestrator::new(factory).generate(request).await
    );
    assert_eq!(err, Error::UnknownProvider("acme".to_string()));
}

// ===== Isolation =====

#[tokio::test]
async fn test_concurrent_calls_are_isolated()
{   let orchestrator = Orchestrator::new(
      AdapterFactory::new()
        .with_mock("left", MockAdapter::fixed("L"))
        .with_mock("right", MockAdapter::fixed("R"))
    );
    let left = orchestrator.clone();
    let right = orchestrator.clone();

    let (a, b) = tokio::join!(
      left.generate(GenerationRequest::new(
        conversation(),
        chain("mock/left", &[])
      )),
      right.generate(GenerationRequest::new(
        conversation(),
        chain("mock/right", &[])
      ))
    );

    assert_eq!(assert_ok!(a).text, "L");
    assert_eq!(assert_ok!(b).text, "R");
}

// ===== State machine =====

#[test]
fn test_chain_state_transitions()
{   let state = ChainState::Idle.start(3);
    assert_eq!(state, ChainState::Attempting(0));

    let state = state.after_attempt(Outcome::NetworkError, 3);
    assert_eq!(state, ChainState::Advancing(1));
    let state = state.resume();
    assert_eq!(state, ChainState::Attempting(1));

    let state = state.after_attempt(Outcome::AuthError, 3).resume();
    assert_eq!(state, ChainState::Attempting(2));
    assert_eq!(
      state.after_attempt(Outcome::InvalidResponse, 3),
      ChainState::Exhausted
    );
    assert_eq!(
      state.after_attempt(Outcome::Success, 3),
      ChainState::Succeeded(2)
    );
    assert!(ChainState::Exhausted.is_terminal());
    assert!(!ChainState::Advancing(1).is_terminal());
}

// ===== Backend =====

fn backend_config(primary: &str, fallbacks: &[&str]) -> AllmConfig
{   let mut chain = ChainConfig::new(primary);
    for fallback in fallbacks
    {   chain = chain.with_fallback(*fallback);
    }
    AllmConfig
    {   chain
      , ..Default::default()
    }
}

#[tokio::test]
async fn test_backend_initialization()
{   let backend = assert_ok!(AllmBackend::new(backend_config("mock/echo", &[])));
    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_generate_walks_chain()
{   let factory = AdapterFactory::new()
      .with_mock("down", MockAdapter::failing(FailureKind::NetworkError))
      .with_mock("up", MockAdapter::fixed("backend answer"));
    let backend = AllmBackend::with_factory(
      backend_config("mock/down", &["mock/up"]),
      factory
    );

    let mut rx = assert_ok!(backend.generate(conversation(), None).await);
    let result = match tokio::time::timeout(
      Duration::from_secs(5),
      rx.recv()
    ).await
    {   Ok(Some(reply)) => assert_ok!(reply)
      , other => panic!("no reply: {:?}", other.is_ok())
    };

    assert_eq!(result.text, "backend answer");
    assert_eq!(result.attempts.len(), 2);
    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_streams_tokens()
{   let factory = AdapterFactory::new()
      .with_mock("stream", MockAdapter::fragments(["Hel", "lo"]));
    let backend = AllmBackend::with_factory(
      backend_config("mock/stream", &[]),
      factory
    );
    let (seen, sink) = token_sink();

    let mut rx = assert_ok!(
      backend.generate(conversation(), Some(Box::new(sink))).await
    );
    let reply = rx.recv().await.expect("reply");
    assert_eq!(assert_ok!(reply).text, "Hello");
    assert_eq!(*seen.lock().unwrap(), vec!["Hel", "lo"]);
    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_generate_applies_overrides()
{   let backend = assert_ok!(AllmBackend::new(backend_config("mock/echo", &[])));

    let mut rx = assert_ok!(
      backend.generate_with(conversation(), Some(16), Some(3.0), None).await
    );
    let err = assert_err!(rx.recv().await.expect("reply"));
    assert!(matches!(err, Error::MalformedRequest(_)), "{:?}", err);

    let mut rx = assert_ok!(
      backend.generate_with(conversation(), Some(0), None, None).await
    );
    let err = assert_err!(rx.recv().await.expect("reply"));
    assert!(matches!(err, Error::MalformedRequest(_)), "{:?}", err);

    let mut rx = assert_ok!(
      backend.generate_with(conversation(), Some(1), Some(2.0), None).await
    );
    let reply = rx.recv().await.expect("reply");
    assert_eq!(assert_ok!(reply).text, "Hello there");
    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_rejects_bad_chain_and_keeps_previous()
{   let factory = AdapterFactory::new()
      .with_mock("kept", MockAdapter::fixed("still here"));
    let backend = AllmBackend::with_factory(
      backend_config("mock/kept", &[]),
      factory
    );

    let mut rx = assert_ok!(
      backend.set_model_chain(ChainConfig::new("badstring")).await
    );
    let err = assert_err!(rx.recv().await.expect("reply"));
    assert!(matches!(err, Error::InvalidConfiguration(_)), "{:?}", err);

    let mut rx = assert_ok!(backend.send_prompt("hi".to_string()).await);
    let reply = rx.recv().await.expect("reply");
    assert_eq!(assert_ok!(reply).text, "still here");
    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_chain_change_applies_to_next_call()
{   let factory = AdapterFactory::new()
      .with_mock("old", MockAdapter::fixed("old"))
      .with_mock("new", MockAdapter::fixed("new"));
    let backend = AllmBackend::with_factory(
      backend_config("mock/old", &[]),
      factory
    );

    let mut rx = assert_ok!(
      backend.set_model_chain(ChainConfig::new("mock/new")).await
    );
    assert_ok!(rx.recv().await.expect("reply"));

    let mut rx = assert_ok!(backend.send_prompt("hi".to_string()).await);
    let result = assert_ok!(rx.recv().await.expect("reply"));
    assert_eq!(result.text, "new");
    assert_eq!(result.model_used, ModelSpec::new("mock", "new"));
    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_set_credentials_and_list_providers()
{   let backend = assert_ok!(AllmBackend::new(backend_config("mock/echo", &[])));

    let mut rx = assert_ok!(
      backend.set_credentials(vec![
        allm::CredentialSpec
        {   provider: Provider::Anthropic
          , api_key: "test-key".to_string()
          , api_base: None
        }
      ]).await
    );
    assert_ok!(rx.recv().await.expect("reply"));

    let mut rx = assert_ok!(backend.list_providers().await);
    let providers = assert_ok!(rx.recv().await.expect("reply"));
    assert!(providers.contains(&Provider::Anthropic));
    assert!(providers.contains(&Provider::Google));
    assert!(providers.contains(&Provider::Mock));
    assert_ok!(backend.shutdown().await);
}

#[tokio::test]
async fn test_backend_reports_invalid_configured_chain()
{   let backend = assert_ok!(AllmBackend::new(AllmConfig::default()));

    let mut rx = assert_ok!(backend.send_prompt("hi".to_string()).await);
    let err = assert_err!(rx.recv().await.expect("reply"));
    assert!(matches!(err, Error::InvalidConfiguration(_)), "{:?}", err);
    assert_ok!(backend.shutdown().await);
}
