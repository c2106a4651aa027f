use fhir_validator::{ClientError, TxTestParams};

use crate::fixture::{get_fixture, TX_SERVER};

#[tokio::test]
#[ignore = "requires java and network access"]
async fn test_tx_test_missing_parameter() {
    let fixture = get_fixture().await;
    let params = TxTestParams::new(TX_SERVER, "simple-cases", "", "4.0");

    assert!(matches!(
        fixture.client.run_tx_test(&params).await,
        Err(ClientError::MissingParameter("testName"))
    ));
}

#[tokio::test]
#[ignore = "requires java and network access"]
async fn test_tx_test_unknown_case_fails_without_error() {
    let fixture = get_fixture().await;
    let params = TxTestParams::new(TX_SERVER, "no-such-suite", "no-such-test", "4.0");

    let outcome = fixture
        .client
        .run_tx_test(&params)
        .await
        .expect("run_tx_test should not error once parameters are present");
    assert!(!outcome.result);
    assert!(outcome.message.is_some());
}

#[tokio::test]
#[ignore = "requires java and network access"]
async fn test_load_ig() {
    let fixture = get_fixture().await;

    let outcome = fixture
        .client
        .load_ig("hl7.fhir.us.core", "6.1.0")
        .await
        .expect("load_ig failed");
    assert!(outcome.is_operation_outcome());
}
