//! Shared engine for the end-to-end suite.
//!
//! These tests need `java` on PATH and network access to download the
//! validator and its packages. Run with `cargo test --test e2e -- --ignored`.

use std::sync::OnceLock;

use fhir_validator::{ServiceConfig, ValidatorClient, ValidatorService};

pub(crate) const FHIR_VERSION: &str = "4.0.1";
pub(crate) const TX_SERVER: &str = "http://tx.fhir.org";

/// Port for the shared engine. The lifecycle tests use their own.
const SHARED_PORT: u16 = 8181;

pub(crate) struct TestFixture {
    _runtime: tokio::runtime::Runtime,
    _service: ValidatorService,
    pub(crate) client: ValidatorClient,
}

static FIXTURE: OnceLock<TestFixture> = OnceLock::new();

pub(crate) fn config(port: u16) -> ServiceConfig {
    let log = std::env::temp_dir().join(format!("fhir-validator-e2e-{}.txlog", port));
    let mut config = ServiceConfig::new(FHIR_VERSION, TX_SERVER, log);
    config.port = port;
    config.timeout = 300_000;
    config
}

fn init_fixture() -> TestFixture {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to create runtime");

    let (service, client) = rt.block_on(async {
        let service = ValidatorService::new();
        service
            .start(config(SHARED_PORT))
            .await
            .expect("Failed to start validator");
        let client = service.client();
        (service, client)
    });

    TestFixture {
        _runtime: rt,
        _service: service,
        client,
    }
}

pub(crate) async fn get_fixture() -> &'static TestFixture {
    tokio::task::spawn_blocking(|| FIXTURE.get_or_init(init_fixture))
        .await
        .expect("spawn_blocking failed")
}
