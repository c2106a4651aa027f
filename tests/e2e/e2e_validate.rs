use fhir_validator::{IssueSeverity, ValidationOptions};
use serde_json::json;

use crate::fixture::get_fixture;

#[tokio::test]
#[ignore = "requires java and network access"]
async fn test_valid_patient() {
    let fixture = get_fixture().await;
    let patient = json!({
        "resourceType": "Patient",
        "id": "example",
        "active": true,
        "name": [{"use": "official", "family": "Chalmers", "given": ["Peter"]}],
        "gender": "male",
        "birthDate": "1974-12-25"
    });

    let outcome = fixture
        .client
        .validate_object(&patient, &ValidationOptions::default())
        .await
        .expect("validate failed");

    assert!(outcome.is_operation_outcome());
    assert!(
        !outcome.has_errors(),
        "unexpected errors: {:?}",
        outcome.errors().collect::<Vec<_>>()
    );
}

#[tokio::test]
#[ignore = "requires java and network access"]
async fn test_invalid_patient_reports_issues() {
    let fixture = get_fixture().await;
    let patient = json!({
        "resourceType": "Patient",
        "gender": "robot",
        "birthDate": "not-a-date"
    });

    let outcome = fixture
        .client
        .validate_object(&patient, &ValidationOptions::default())
        .await
        .expect("validate failed");

    assert!(outcome
        .issue
        .iter()
        .any(|i| matches!(i.severity, IssueSeverity::Error | IssueSeverity::Fatal | IssueSeverity::Warning)));
    assert!(outcome.has_errors());
}

#[tokio::test]
#[ignore = "requires java and network access"]
async fn test_xml_resource() {
    let fixture = get_fixture().await;
    let xml = br#"<Patient xmlns="http://hl7.org/fhir"><id value="x"/><active value="true"/></Patient>"#;

    let outcome = fixture
        .client
        .validate_bytes(xml, &ValidationOptions::default())
        .await
        .expect("validate failed");

    assert!(outcome.is_operation_outcome());
    assert!(!outcome.has_errors());
}

#[tokio::test]
#[ignore = "requires java and network access"]
async fn test_concurrent_validations() {
    let fixture = get_fixture().await;
    let options = ValidationOptions::default();

    let requests = (0..4).map(|i| {
        let client = fixture.client.clone();
        let options = options.clone();
        async move {
            let patient = json!({"resourceType": "Patient", "id": format!("p{}", i)});
            client.validate_object(&patient, &options).await
        }
    });

    for result in futures_util::future::join_all(requests).await {
        assert!(result.expect("validate failed").is_operation_outcome());
    }
}
