#![cfg(feature = "mock")]

//! HTTP surface tests for the provisioning routes, with the table store and
//! the edge function client both mocked out.

use actix_web::{App, http::StatusCode, test, web, web::Data};
use chrono::{Duration, Utc};
use frostguard_ui::{
    api::Api,
    model::{
        ProvisioningState, Sensor, SensorStatus, SensorType, TtnConfig, TtnProvisioningStatus,
    },
    services::provisioning::ActionOutcome,
    supabase_client::{MockSensorStore, SensorPatch},
    ttn_client::{MockTtnProvisioning, SessionExpired},
};
use serde_json::{Value, json};

type TestApi = Api<MockTtnProvisioning, MockSensorStore>;

fn sensor(id: &str) -> Sensor {
    Sensor {
        id: id.to_string(),
        organization_id: "org-1".to_string(),
        name: "Freezer 1".to_string(),
        sensor_type: SensorType::Temperature,
        status: SensorStatus::Pending,
        provisioning_state: ProvisioningState::MissingInTtn,
        dev_eui: "A1B2C3D4E5F67890".to_string(),
        app_eui: "0000000000000001".to_string(),
        app_key: Some("00112233445566778899AABBCCDDEEFF".to_string()),
        ttn_device_id: None,
        site_id: None,
        unit_id: None,
        last_seen_at: None,
        archived_at: None,
        created_at: Utc::now(),
    }
}

fn ttn_config() -> TtnConfig {
    TtnConfig {
        is_enabled: true,
        cluster: "eu1".to_string(),
        application_id: Some("frostguard-org-1".to_string()),
        has_api_key: true,
        api_key_last4: Some("4F2A".to_string()),
        provisioning_status: TtnProvisioningStatus::Ready,
        provisioning_step: None,
        webhook_url: None,
        has_webhook_secret: true,
        webhook_events: vec![],
        functions_version: Some("1.4.2".to_string()),
    }
}

fn expect_settings(ttn: &mut MockTtnProvisioning, config: TtnConfig) {
    ttn.expect_get_settings()
        .returning(move || {
            let config = config.clone();
            Box::pin(async move { Ok(config) })
        });
}

async fn create_app(
    ttn: MockTtnProvisioning,
    store: MockSensorStore,
) -> impl actix_service::Service<
    actix_http::Request,
    Response = actix_web::dev::ServiceResponse,
    Error = actix_web::Error,
> {
    let api = Data::new(TestApi::new(ttn, store));

    test::init_service(
        App::new()
            .app_data(api)
            .route("/api/sensors", web::get().to(TestApi::list_sensors))
            .route("/api/sensors", web::post().to(TestApi::create_sensor))
            .route(
                "/api/sensors/from-qr",
                web::post().to(TestApi::create_sensor_from_qr),
            )
            .route(
                "/api/sensors/check-all",
                web::post().to(TestApi::check_all_sensors),
            )
            .route(
                "/api/sensors/{id}/provision",
                web::post().to(TestApi::provision_sensor),
            )
            .route(
                "/api/sensors/{id}/check",
                web::post().to(TestApi::check_sensor),
            )
            .route(
                "/api/sensors/{id}/unprovision",
                web::post().to(TestApi::unprovision_sensor),
            )
            .route("/api/sites", web::post().to(TestApi::create_site))
            .route("/api/units", web::post().to(TestApi::create_unit)),
    )
    .await
}

#[tokio::test]
async fn provision_decline_maps_to_conflict_with_structured_body() {
    let mut ttn = MockTtnProvisioning::new();
    let mut disabled = ttn_config();
    disabled.is_enabled = false;
    expect_settings(&mut ttn, disabled);
    ttn.expect_provision_device().times(0);

    let mut store = MockSensorStore::new();
    store
        .expect_get_sensor()
        .returning(|id| Box::pin(async move { Ok(sensor(&id)) }));

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::post()
        .uri("/api/sensors/row-1/provision")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "TTN_NOT_CONFIGURED");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn accepted_provision_persists_the_new_state() {
    let mut ttn = MockTtnProvisioning::new();
    expect_settings(&mut ttn, ttn_config());
    ttn.expect_provision_device().times(1).returning(|_| {
        Box::pin(async {
            Ok(ActionOutcome::Accepted(
                json!({"success": true, "device_id": "sensor-a1b2c3d4e5f67890"}),
            ))
        })
    });

    let mut store = MockSensorStore::new();
    store
        .expect_get_sensor()
        .returning(|id| Box::pin(async move { Ok(sensor(&id)) }));
    store
        .expect_update_sensor()
        .withf(|id, patch: &SensorPatch| {
            id.as_str() == "row-1"
                && patch.provisioning_state == Some(ProvisioningState::ExistsInTtn)
                && patch.ttn_device_id.as_deref() == Some("sensor-a1b2c3d4e5f67890")
        })
        .times(1)
        .returning(|id, _| Box::pin(async move { Ok(sensor(&id)) }));

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::post()
        .uri("/api/sensors/row-1/provision")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn transport_failure_maps_to_bad_gateway() {
    let mut ttn = MockTtnProvisioning::new();
    expect_settings(&mut ttn, ttn_config());
    ttn.expect_provision_device()
        .returning(|_| Box::pin(async { Err(anyhow::anyhow!("connection reset by peer")) }));

    let mut store = MockSensorStore::new();
    store
        .expect_get_sensor()
        .returning(|id| Box::pin(async move { Ok(sensor(&id)) }));

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::post()
        .uri("/api/sensors/row-1/provision")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn expired_remote_session_maps_to_unauthorized() {
    let mut ttn = MockTtnProvisioning::new();
    ttn.expect_get_settings()
        .returning(|| Box::pin(async { Err(anyhow::Error::new(SessionExpired)) }));

    let mut store = MockSensorStore::new();
    store
        .expect_get_sensor()
        .returning(|id| Box::pin(async move { Ok(sensor(&id)) }));

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::post()
        .uri("/api/sensors/row-1/provision")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unprovision_is_refused_without_touching_the_remote_side() {
    let ttn = MockTtnProvisioning::new();

    let mut store = MockSensorStore::new();
    store
        .expect_get_sensor()
        .returning(|id| Box::pin(async move { Ok(sensor(&id)) }));

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::post()
        .uri("/api/sensors/row-1/unprovision")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "UNPROVISION_UNSUPPORTED");
}

#[tokio::test]
async fn check_all_folds_the_report_into_row_states() {
    let mut ttn = MockTtnProvisioning::new();
    expect_settings(&mut ttn, ttn_config());
    ttn.expect_check_devices().times(1).returning(|_| {
        Box::pin(async {
            Ok(ActionOutcome::Accepted(json!({
                "success": true,
                "results": [
                    { "device_id": "sensor-a1b2c3d4e5f67890", "exists": true },
                ]
            })))
        })
    });

    let mut store = MockSensorStore::new();
    store
        .expect_list_sensors()
        .returning(|_| Box::pin(async { Ok(vec![sensor("row-1")]) }));
    store
        .expect_update_sensor()
        .withf(|id, patch: &SensorPatch| {
            id.as_str() == "row-1" && patch.provisioning_state == Some(ProvisioningState::ExistsInTtn)
        })
        .times(1)
        .returning(|id, _| Box::pin(async move { Ok(sensor(&id)) }));

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::post()
        .uri("/api/sensors/check-all?organization_id=org-1")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn listing_reports_effective_status_and_hides_the_app_key() {
    let ttn = MockTtnProvisioning::new();

    let mut store = MockSensorStore::new();
    store.expect_list_sensors().returning(|_| {
        Box::pin(async {
            let mut stale = sensor("row-1");
            stale.status = SensorStatus::Active;
            stale.last_seen_at = Some(Utc::now() - Duration::seconds(301));
            Ok(vec![stale])
        })
    });

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::get()
        .uri("/api/sensors?organization_id=org-1")
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body[0]["status"], "offline");
    assert!(body[0].get("app_key").is_none());
}

#[tokio::test]
async fn create_sensor_rejects_malformed_credentials() {
    let ttn = MockTtnProvisioning::new();
    let mut store = MockSensorStore::new();
    store.expect_insert_sensor().times(0);

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::post()
        .uri("/api/sensors")
        .set_json(json!({
            "organization_id": "org-1",
            "name": "Freezer 1",
            "sensor_type": "temperature",
            "dev_eui": "not-hex-at-all!!",
            "app_eui": "0000000000000001",
            "app_key": "00112233445566778899AABBCCDDEEFF",
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn created_site_is_returned_and_duplicates_map_to_conflict() {
    use frostguard_ui::model::Site;

    let ttn = MockTtnProvisioning::new();
    let mut store = MockSensorStore::new();

    let mut first = true;
    store.expect_insert_site().times(2).returning(move |row| {
        let fresh = first;
        first = false;
        Box::pin(async move {
            if fresh {
                Ok(Site {
                    id: "site-a".to_string(),
                    organization_id: row.organization_id,
                    name: row.name,
                    archived_at: None,
                    created_at: Utc::now(),
                })
            } else {
                Err(anyhow::anyhow!("duplicate row: sites_org_name_key"))
            }
        })
    });

    let app = create_app(ttn, store).await;
    let payload = json!({ "organization_id": "org-1", "name": "Cold Store North" });

    let req = test::TestRequest::post()
        .uri("/api/sites")
        .set_json(&payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["name"], "Cold Store North");

    let req = test::TestRequest::post()
        .uri("/api/sites")
        .set_json(&payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unit_under_a_missing_site_is_rejected() {
    let ttn = MockTtnProvisioning::new();
    let mut store = MockSensorStore::new();
    store.expect_insert_unit().times(1).returning(|_| {
        Box::pin(async {
            Err(anyhow::anyhow!(
                "referenced row does not exist: units_site_id_fkey"
            ))
        })
    });

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::post()
        .uri("/api/units")
        .set_json(json!({ "site_id": "site-does-not-exist", "name": "Walk-in Freezer" }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn qr_intake_creates_the_row_even_when_provisioning_declines() {
    use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};

    let mut ttn = MockTtnProvisioning::new();
    let mut disabled = ttn_config();
    disabled.is_enabled = false;
    expect_settings(&mut ttn, disabled);
    ttn.expect_provision_device().times(0);

    let mut store = MockSensorStore::new();
    store.expect_insert_sensor().times(1).returning(|row| {
        Box::pin(async move {
            let mut created = sensor("row-qr");
            created.dev_eui = row.dev_eui;
            created.app_eui = row.app_eui;
            created.sensor_type = row.sensor_type;
            Ok(created)
        })
    });

    let code = BASE64_URL_SAFE_NO_PAD.encode(
        r#"{"dev_eui":"a1b2c3d4e5f67890","app_eui":"0000000000000001","app_key":"00112233445566778899aabbccddeeff","model_key":"milesight:em500-co2"}"#,
    );

    let app = create_app(ttn, store).await;
    let req = test::TestRequest::post()
        .uri("/api/sensors/from-qr")
        .set_json(json!({ "organization_id": "org-1", "code": code }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["sensor"]["sensor_type"], "air_quality");
    assert_eq!(body["dev_eui_display"], "A1:B2:C3:D4:E5:F6:78:90");
    assert_eq!(body["provisioning"]["accepted"], false);
    assert_eq!(body["provisioning"]["decline"]["code"], "TTN_NOT_CONFIGURED");
}
