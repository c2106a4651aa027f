use fhir_validator::{ClientError, EngineState, ValidatorService};

use crate::fixture::config;

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires java and network access"]
async fn test_start_validate_stop() {
    let service = ValidatorService::new();
    assert!(!service.is_running());

    service.start(config(8182)).await.expect("start failed");
    assert!(service.is_running());
    assert_eq!(service.state(), EngineState::Ready);
    assert_eq!(service.port(), Some(8182));
    assert!(service.engine_version().is_some(), "banner not seen on stdout");

    let client = service.client();
    let outcome = client
        .validate(
            r#"{"resourceType": "Patient", "id": "example", "name": [{"family": "Chalmers"}]}"#,
            &Default::default(),
        )
        .await
        .expect("validate failed");
    assert!(outcome.is_operation_outcome());

    service.stop().await;
    assert!(!service.is_running());
    assert_eq!(service.state(), EngineState::Stopped);
    assert!(matches!(
        client.validate("{}", &Default::default()).await,
        Err(ClientError::NotReady)
    ));

    // second stop is a no-op
    service.stop().await;
    assert!(!service.is_running());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires java and network access"]
async fn test_ensure_validator_is_idempotent() {
    let service = ValidatorService::new();
    let first = service
        .ensure_validator(Default::default())
        .await
        .expect("ensure failed");
    assert!(first.path.exists());

    let second = service
        .ensure_validator(Default::default())
        .await
        .expect("ensure failed");
    assert!(!second.downloaded);
    assert_eq!(second.path, first.path);
    assert_eq!(
        service.fetcher().get_installed_version(),
        Some(second.version)
    );
}
