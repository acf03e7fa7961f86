#![cfg(feature = "integration-tests")]

use async_nats::jetstream::{self, consumer::pull};
use bytes::Bytes;
use chrono::Utc;
use common::nats::NatsClient;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use turbofan_router::domain::{LogSeverity, RouterContext, CORRELATION_ID, DEAD_LETTER};
use turbofan_router::nats::device_headers;
use turbofan_router::turbofan_router::{TurbofanRouter, TurbofanRouterConfig};

struct TestEnvironment {
    _nats_container: ContainerAsync<GenericImage>,
    jetstream: jetstream::Context,
    context: Arc<RouterContext>,
    shutdown: CancellationToken,
}

async fn setup_test_env() -> TestEnvironment {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();

    // Start NATS container with JetStream enabled
    let nats_container = GenericImage::new("nats", "latest")
        .with_exposed_port(4222.into())
        .with_cmd(["-js"])
        .start()
        .await
        .unwrap();

    let nats_host = nats_container.get_host().await.unwrap();
    let nats_port = nats_container.get_host_port_ipv4(4222).await.unwrap();
    let nats_url = format!("nats://{}:{}", nats_host, nats_port);

    let config = TurbofanRouterConfig {
        nats_batch_wait_secs: 1,
        ..TurbofanRouterConfig::default()
    };

    let nats_client = Arc::new(
        NatsClient::connect(&nats_url, Duration::from_secs(10))
            .await
            .expect("Failed to connect to NATS"),
    );
    nats_client
        .ensure_stream(&config.stream, vec!["turbofan.>".to_string()])
        .await
        .expect("Failed to create stream");
    let jetstream = nats_client.jetstream().clone();

    let context = Arc::new(RouterContext::default());
    let router = TurbofanRouter::new(nats_client, Arc::clone(&context), config)
        .await
        .expect("Failed to create router");

    let shutdown = CancellationToken::new();
    for (_, process) in router.into_runner_processes() {
        tokio::spawn(process(shutdown.child_token()));
    }

    TestEnvironment {
        _nats_container: nats_container,
        jetstream,
        context,
        shutdown,
    }
}

/// Fetch the next message published on `subject` within a few seconds
async fn next_output(env: &TestEnvironment, subject: &str) -> jetstream::Message {
    let stream = env.jetstream.get_stream("turbofan").await.unwrap();
    let consumer = stream
        .create_consumer(pull::Config {
            filter_subject: subject.to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let mut messages = consumer.messages().await.unwrap();

    timeout(Duration::from_secs(15), messages.next())
        .await
        .expect("timed out waiting for output")
        .expect("stream ended")
        .expect("failed to receive output")
}

#[tokio::test]
async fn test_device_reading_reaches_classifier_output() {
    let env = setup_test_env().await;

    env.jetstream
        .publish_with_headers(
            "turbofan.inputs.deviceInput",
            device_headers("engine-1", Some("cid-e2e"), Some(Utc::now())),
            Bytes::from_static(br#"{"CycleTime": 3, "Sensor11": 47.47}"#),
        )
        .await
        .unwrap()
        .await
        .unwrap();

    let message = next_output(&env, "turbofan.outputs.classOutput").await;
    let headers = message.headers.clone().expect("output carries headers");

    assert_eq!(
        headers.get(CORRELATION_ID).map(|v| v.as_str()),
        Some("cid-e2e")
    );
    let body: serde_json::Value = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(body["CycleTime"], serde_json::json!(3.0));

    env.shutdown.cancel();
}

#[tokio::test]
async fn test_unclassified_result_is_dead_lettered() {
    let env = setup_test_env().await;

    env.jetstream
        .publish_with_headers(
            "turbofan.inputs.rulInput",
            device_headers("engine-2", Some("cid-dead"), None),
            Bytes::from_static(br#"{"CycleTime": 5}"#),
        )
        .await
        .unwrap()
        .await
        .unwrap();

    let message = next_output(&env, "turbofan.outputs.deadMessages").await;
    let headers = message.headers.clone().expect("output carries headers");

    assert_eq!(headers.get(DEAD_LETTER).map(|v| v.as_str()), Some("true"));
    assert_eq!(message.payload.as_ref(), br#"{"CycleTime": 5}"#);

    env.shutdown.cancel();
}

#[tokio::test]
async fn test_desired_properties_update_changes_threshold() {
    let env = setup_test_env().await;

    env.jetstream
        .publish(
            "turbofan.twin.desired",
            Bytes::from_static(br#"{"LoggingLevel": "Warning"}"#),
        )
        .await
        .unwrap()
        .await
        .unwrap();

    let mut applied = false;
    for _ in 0..50 {
        if env.context.log_level().threshold() == LogSeverity::Warning {
            applied = true;
            break;
        }
        sleep(Duration::from_millis(200)).await;
    }
    assert!(applied, "desired-property update was not applied");

    env.shutdown.cancel();
}
