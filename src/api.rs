use crate::{
    catalog,
    config::AppConfig,
    credentials,
    http_client::handle_service_result,
    model::{GatewayStatus, ProvisioningState, Sensor, SensorStatus, SensorType, reconcile_unit},
    qr,
    services::{
        auth::{PasswordService, TokenManager},
        provisioning::{
            ActionOutcome,
            dispatch::{ActionDispatcher, CheckReport, ConfigAction},
            state::{ProvisioningEvent, transition},
            status::{StatusPolicy, effective_gateway_status, effective_sensor_status},
        },
    },
    supabase_client::{
        GatewayPatch, NewGateway, NewSensor, NewSite, NewUnit, SensorPatch, SensorStore, SitePatch,
        UnitPatch, is_duplicate, is_missing_reference,
    },
    ttn_client::{SessionExpired, TtnProvisioning, TtnSettingsPatch, functions_version_info},
};
use actix_session::Session;
use actix_web::{HttpResponse, Responder, web};
use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;

#[derive(Deserialize)]
pub struct OrgQuery {
    pub organization_id: String,
}

#[derive(Deserialize)]
pub struct SiteQuery {
    pub site_id: String,
}

// No Debug derive: the AppKey must not end up in a log line
#[derive(Deserialize)]
pub struct CreateSensorPayload {
    pub organization_id: String,
    pub name: String,
    pub sensor_type: SensorType,
    pub dev_eui: String,
    pub app_eui: String,
    pub app_key: String,
    pub site_id: Option<String>,
    pub unit_id: Option<String>,
}

/// Partial sensor update. A missing field means "leave unchanged"; an
/// explicit `null` for `site_id`/`unit_id` clears the assignment.
#[derive(Debug, Deserialize)]
pub struct UpdateSensorPayload {
    pub name: Option<String>,
    pub sensor_type: Option<SensorType>,
    #[serde(default, with = "double_option")]
    pub site_id: Option<Option<String>>,
    #[serde(default, with = "double_option")]
    pub unit_id: Option<Option<String>>,
}

// Missing field vs explicit null for nested Option fields
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer).map(Some)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateGatewayPayload {
    pub organization_id: String,
    pub name: String,
    pub gateway_eui: String,
    pub site_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateGatewayPayload {
    pub name: Option<String>,
    pub site_id: Option<String>,
    pub status: Option<GatewayStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSitePayload {
    pub organization_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSitePayload {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateUnitPayload {
    pub site_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUnitPayload {
    pub name: Option<String>,
    pub site_id: Option<String>,
}

#[derive(Deserialize)]
pub struct FromQrPayload {
    pub organization_id: String,
    pub code: String,
    pub name: Option<String>,
    pub site_id: Option<String>,
    pub unit_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPasswordPayload {
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordPayload {
    current_password: String,
    password: String,
}

pub struct Api<Ttn, Store>
where
    Ttn: TtnProvisioning,
    Store: SensorStore,
{
    pub dispatcher: ActionDispatcher<Ttn>,
    pub store: Store,
}

impl<Ttn, Store> Api<Ttn, Store>
where
    Ttn: TtnProvisioning + Send + Sync + 'static,
    Store: SensorStore + Send + Sync + 'static,
{
    pub fn new(ttn: Ttn, store: Store) -> Self {
        Api {
            dispatcher: ActionDispatcher::new(ttn),
            store,
        }
    }

    // --- sensors -----------------------------------------------------------

    pub async fn list_sensors(query: web::Query<OrgQuery>, api: web::Data<Self>) -> impl Responder {
        debug!("list_sensors() called");

        match api.store.list_sensors(query.organization_id.clone()).await {
            Ok(mut sensors) => {
                let now = Utc::now();
                let policy = StatusPolicy::from_config();
                for sensor in &mut sensors {
                    sensor.status = effective_sensor_status(sensor, now, &policy);
                }
                HttpResponse::Ok().json(sensors)
            }
            Err(e) => {
                error!("list_sensors failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn create_sensor(
        body: web::Json<CreateSensorPayload>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("create_sensor() called");

        let row = match Self::sensor_row_from_payload(body.into_inner()) {
            Ok(row) => row,
            Err(e) => {
                info!("create_sensor rejected: {e:#}");
                return HttpResponse::BadRequest().body(e.to_string());
            }
        };

        match api.store.insert_sensor(row).await {
            Ok(sensor) => HttpResponse::Created().json(sensor),
            Err(e) if is_duplicate(&e) => {
                info!("create_sensor declined: {e:#}");
                HttpResponse::Conflict().body(e.to_string())
            }
            Err(e) => {
                error!("create_sensor failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    fn sensor_row_from_payload(payload: CreateSensorPayload) -> Result<NewSensor> {
        Ok(NewSensor {
            organization_id: payload.organization_id,
            name: payload.name,
            sensor_type: payload.sensor_type,
            status: SensorStatus::Pending,
            provisioning_state: ProvisioningState::default(),
            dev_eui: credentials::normalize_eui("dev_eui", &payload.dev_eui)?,
            app_eui: credentials::normalize_eui("app_eui", &payload.app_eui)?,
            app_key: credentials::normalize_app_key(&payload.app_key)?,
            site_id: payload.site_id,
            unit_id: payload.unit_id,
        })
    }

    pub async fn update_sensor(
        path: web::Path<String>,
        body: web::Json<UpdateSensorPayload>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("update_sensor() called: {body:?}");

        match Self::apply_sensor_update(&api, path.into_inner(), body.into_inner()).await {
            Ok(sensor) => HttpResponse::Ok().json(sensor),
            Err(e) => {
                error!("update_sensor failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    async fn apply_sensor_update(
        api: &Self,
        id: String,
        payload: UpdateSensorPayload,
    ) -> Result<Sensor> {
        let current = api.store.get_sensor(id.clone()).await?;

        let new_site_id = match &payload.site_id {
            Some(site_id) => site_id.clone(),
            None => current.site_id.clone(),
        };
        let requested_unit_id = match &payload.unit_id {
            Some(unit_id) => unit_id.clone(),
            None => current.unit_id.clone(),
        };

        let unit = match &requested_unit_id {
            Some(unit_id) => api.store.get_unit(unit_id.clone()).await?,
            None => None,
        };
        let unit_id = reconcile_unit(new_site_id.as_deref(), unit.as_ref());

        let patch = SensorPatch {
            name: payload.name,
            sensor_type: payload.sensor_type,
            site_id: payload.site_id,
            unit_id: Some(unit_id),
            ..Default::default()
        };

        api.store.update_sensor(id, patch).await
    }

    pub async fn delete_sensor(path: web::Path<String>, api: web::Data<Self>) -> impl Responder {
        debug!("delete_sensor() called");

        match api.store.archive_sensor(path.into_inner()).await {
            Ok(()) => HttpResponse::NoContent().finish(),
            Err(e) => {
                error!("delete_sensor failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    // --- per-sensor provisioning actions -----------------------------------

    pub async fn provision_sensor(path: web::Path<String>, api: web::Data<Self>) -> impl Responder {
        debug!("provision_sensor() called");

        let id = path.into_inner();
        let sensor = match api.store.get_sensor(id.clone()).await {
            Ok(sensor) => sensor,
            Err(e) => {
                error!("provision_sensor failed to load sensor {id}: {e:#}");
                return HttpResponse::InternalServerError().body(e.to_string());
            }
        };

        let ttn_config = match api.dispatcher.client().get_settings().await {
            Ok(config) => config,
            Err(e) => return Self::transport_error(e, "provision_sensor"),
        };

        let outcome = api.dispatcher.provision(&sensor, Some(&ttn_config)).await;

        if let Ok(ActionOutcome::Accepted(value)) = &outcome {
            let state = transition(sensor.provisioning_state, ProvisioningEvent::Provisioned);
            let patch = SensorPatch {
                provisioning_state: Some(state),
                ttn_device_id: value
                    .get("device_id")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
                    .or_else(|| Some(sensor.device_id())),
                ..Default::default()
            };
            if let Err(e) = api.store.update_sensor(sensor.id.clone(), patch).await {
                // The next check reconciles; the accepted outcome still stands
                warn!("failed to persist provisioning result for {}: {e:#}", sensor.id);
            }
        }

        Self::respond_outcome(outcome, "provision_sensor")
    }

    pub async fn check_sensor(path: web::Path<String>, api: web::Data<Self>) -> impl Responder {
        debug!("check_sensor() called");

        let id = path.into_inner();
        let sensor = match api.store.get_sensor(id.clone()).await {
            Ok(sensor) => sensor,
            Err(e) => {
                error!("check_sensor failed to load sensor {id}: {e:#}");
                return HttpResponse::InternalServerError().body(e.to_string());
            }
        };

        let ttn_config = match api.dispatcher.client().get_settings().await {
            Ok(config) => config,
            Err(e) => return Self::transport_error(e, "check_sensor"),
        };

        let outcome = api.dispatcher.check(&sensor, Some(&ttn_config)).await;

        if let Ok(ActionOutcome::Accepted(value)) = &outcome {
            Self::persist_check_events(&api, &[sensor], value).await;
        }

        Self::respond_outcome(outcome, "check_sensor")
    }

    pub async fn diagnose_sensor(path: web::Path<String>, api: web::Data<Self>) -> impl Responder {
        debug!("diagnose_sensor() called");

        let id = path.into_inner();
        let sensor = match api.store.get_sensor(id.clone()).await {
            Ok(sensor) => sensor,
            Err(e) => {
                error!("diagnose_sensor failed to load sensor {id}: {e:#}");
                return HttpResponse::InternalServerError().body(e.to_string());
            }
        };

        let ttn_config = match api.dispatcher.client().get_settings().await {
            Ok(config) => config,
            Err(e) => return Self::transport_error(e, "diagnose_sensor"),
        };

        let outcome = api.dispatcher.diagnose(&sensor, Some(&ttn_config)).await;
        Self::respond_outcome(outcome, "diagnose_sensor")
    }

    pub async fn unprovision_sensor(
        path: web::Path<String>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("unprovision_sensor() called");

        let id = path.into_inner();
        let sensor = match api.store.get_sensor(id.clone()).await {
            Ok(sensor) => sensor,
            Err(e) => {
                error!("unprovision_sensor failed to load sensor {id}: {e:#}");
                return HttpResponse::InternalServerError().body(e.to_string());
            }
        };

        let outcome = api.dispatcher.unprovision(&sensor).await;
        Self::respond_outcome(outcome, "unprovision_sensor")
    }

    pub async fn check_all_sensors(
        query: web::Query<OrgQuery>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("check_all_sensors() called");

        let sensors = match api.store.list_sensors(query.organization_id.clone()).await {
            Ok(sensors) => sensors,
            Err(e) => {
                error!("check_all_sensors failed to list sensors: {e:#}");
                return HttpResponse::InternalServerError().body(e.to_string());
            }
        };

        let ttn_config = match api.dispatcher.client().get_settings().await {
            Ok(config) => config,
            Err(e) => return Self::transport_error(e, "check_all_sensors"),
        };

        let outcome = api
            .dispatcher
            .check_batch(
                &sensors,
                Some(&ttn_config),
                AppConfig::get().actions.check_batch,
            )
            .await;

        if let Ok(ActionOutcome::Accepted(value)) = &outcome {
            Self::persist_check_events(&api, &sensors, value).await;
        }

        Self::respond_outcome(outcome, "check_all_sensors")
    }

    /// Fold an accepted check report into the registration state of every
    /// matching sensor row. Persistence failures are logged, not surfaced;
    /// the report itself is still returned to the caller.
    async fn persist_check_events(api: &Self, sensors: &[Sensor], value: &serde_json::Value) {
        let report = match CheckReport::from_value(value) {
            Ok(report) => report,
            Err(e) => {
                warn!("check report not in the expected shape: {e:#}");
                return;
            }
        };

        for (device_id, event) in report.events() {
            let Some(sensor) = sensors.iter().find(|sensor| sensor.device_id() == device_id)
            else {
                continue;
            };

            let state = transition(sensor.provisioning_state, event);
            if state == sensor.provisioning_state {
                continue;
            }

            let patch = SensorPatch {
                provisioning_state: Some(state),
                ..Default::default()
            };
            if let Err(e) = api.store.update_sensor(sensor.id.clone(), patch).await {
                warn!("failed to persist check result for {}: {e:#}", sensor.id);
            }
        }
    }

    // --- QR intake ---------------------------------------------------------

    /// Create a sensor from a scanned kit QR code and immediately attempt to
    /// provision it. Creation and provisioning succeed or fail independently;
    /// a declined provisioning attempt still leaves the created row behind.
    pub async fn create_sensor_from_qr(
        body: web::Json<FromQrPayload>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("create_sensor_from_qr() called");

        let payload = body.into_inner();
        let row = match Self::sensor_row_from_qr(&payload) {
            Ok(row) => row,
            Err(e) => {
                info!("create_sensor_from_qr rejected: {e:#}");
                return HttpResponse::BadRequest().body(e.to_string());
            }
        };

        let sensor = match api.store.insert_sensor(row).await {
            Ok(sensor) => sensor,
            Err(e) if is_duplicate(&e) => {
                info!("create_sensor_from_qr declined: {e:#}");
                return HttpResponse::Conflict().body(e.to_string());
            }
            Err(e) => {
                error!("create_sensor_from_qr failed: {e:#}");
                return HttpResponse::InternalServerError().body(e.to_string());
            }
        };

        let provisioning = match api.dispatcher.client().get_settings().await {
            Ok(ttn_config) => match api.dispatcher.provision(&sensor, Some(&ttn_config)).await {
                Ok(ActionOutcome::Accepted(value)) => {
                    let state =
                        transition(sensor.provisioning_state, ProvisioningEvent::Provisioned);
                    let patch = SensorPatch {
                        provisioning_state: Some(state),
                        ttn_device_id: Some(sensor.device_id()),
                        ..Default::default()
                    };
                    if let Err(e) = api.store.update_sensor(sensor.id.clone(), patch).await {
                        warn!(
                            "failed to persist provisioning result for {}: {e:#}",
                            sensor.id
                        );
                    }
                    json!({ "accepted": true, "result": value })
                }
                Ok(ActionOutcome::Declined(decline)) => {
                    info!("create_sensor_from_qr provisioning declined: {}", decline.code);
                    json!({ "accepted": false, "decline": decline })
                }
                Err(e) => {
                    error!("create_sensor_from_qr provisioning failed: {e:#}");
                    json!({ "accepted": false, "error": e.to_string() })
                }
            },
            Err(e) => {
                error!("create_sensor_from_qr failed to load settings: {e:#}");
                json!({ "accepted": false, "error": e.to_string() })
            }
        };

        HttpResponse::Created().json(json!({
            "sensor": sensor,
            // Grouped form for the scan confirmation screen
            "dev_eui_display": credentials::format_eui(&sensor.dev_eui),
            "provisioning": provisioning,
        }))
    }

    fn sensor_row_from_qr(payload: &FromQrPayload) -> Result<NewSensor> {
        let decoded = qr::decode_qr_payload(&payload.code)?;
        let (manufacturer, model) = qr::split_model_key(&decoded.model_key)?;
        let model_key = format!("{manufacturer}:{model}");

        let sensor_type = catalog::lookup(&model_key)
            .and_then(|entry| catalog::sensor_type_for_kind(entry.sensor_kind))
            .unwrap_or(SensorType::Temperature);

        let name = match &payload.name {
            Some(name) => name.clone(),
            None => catalog::lookup(&model_key)
                .map(|entry| format!("{} {}", entry.manufacturer, entry.model))
                .unwrap_or_else(|| catalog::display_label(sensor_type).to_string()),
        };

        Ok(NewSensor {
            organization_id: payload.organization_id.clone(),
            name,
            sensor_type,
            status: SensorStatus::Pending,
            provisioning_state: ProvisioningState::default(),
            dev_eui: credentials::normalize_eui("dev_eui", &decoded.dev_eui)?,
            app_eui: credentials::normalize_eui("app_eui", &decoded.app_eui)?,
            app_key: credentials::normalize_app_key(&decoded.app_key)?,
            site_id: payload.site_id.clone(),
            unit_id: payload.unit_id.clone(),
        })
    }

    // --- gateways ----------------------------------------------------------

    pub async fn list_gateways(query: web::Query<OrgQuery>, api: web::Data<Self>) -> impl Responder {
        debug!("list_gateways() called");

        match api.store.list_gateways(query.organization_id.clone()).await {
            Ok(mut gateways) => {
                let now = Utc::now();
                let policy = StatusPolicy::from_config();
                for gateway in &mut gateways {
                    gateway.status = effective_gateway_status(gateway, now, &policy);
                }
                HttpResponse::Ok().json(gateways)
            }
            Err(e) => {
                error!("list_gateways failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn create_gateway(
        body: web::Json<CreateGatewayPayload>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("create_gateway() called: {body:?}");

        let payload = body.into_inner();
        let gateway_eui = match credentials::normalize_eui("gateway_eui", &payload.gateway_eui) {
            Ok(eui) => eui,
            Err(e) => {
                info!("create_gateway rejected: {e:#}");
                return HttpResponse::BadRequest().body(e.to_string());
            }
        };

        let row = NewGateway {
            organization_id: payload.organization_id,
            name: payload.name,
            ttn_gateway_id: Some(credentials::derive_gateway_id(&gateway_eui)),
            gateway_eui,
            status: GatewayStatus::Pending,
            site_id: payload.site_id,
        };

        match api.store.insert_gateway(row).await {
            Ok(gateway) => HttpResponse::Created().json(gateway),
            Err(e) if is_duplicate(&e) => {
                info!("create_gateway declined: {e:#}");
                HttpResponse::Conflict().body(e.to_string())
            }
            Err(e) => {
                error!("create_gateway failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn update_gateway(
        path: web::Path<String>,
        body: web::Json<UpdateGatewayPayload>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("update_gateway() called: {body:?}");

        let payload = body.into_inner();
        let patch = GatewayPatch {
            name: payload.name,
            site_id: payload.site_id,
            status: payload.status,
        };

        match api.store.update_gateway(path.into_inner(), patch).await {
            Ok(gateway) => HttpResponse::Ok().json(gateway),
            Err(e) => {
                error!("update_gateway failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn delete_gateway(path: web::Path<String>, api: web::Data<Self>) -> impl Responder {
        debug!("delete_gateway() called");

        match api.store.archive_gateway(path.into_inner()).await {
            Ok(()) => HttpResponse::NoContent().finish(),
            Err(e) => {
                error!("delete_gateway failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    // --- locations ---------------------------------------------------------

    pub async fn list_sites(query: web::Query<OrgQuery>, api: web::Data<Self>) -> impl Responder {
        debug!("list_sites() called");

        match api.store.list_sites(query.organization_id.clone()).await {
            Ok(sites) => HttpResponse::Ok().json(sites),
            Err(e) => {
                error!("list_sites failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn list_units(query: web::Query<SiteQuery>, api: web::Data<Self>) -> impl Responder {
        debug!("list_units() called");

        match api.store.list_units(query.site_id.clone()).await {
            Ok(units) => HttpResponse::Ok().json(units),
            Err(e) => {
                error!("list_units failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn create_site(
        body: web::Json<CreateSitePayload>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("create_site() called: {body:?}");

        let payload = body.into_inner();
        let row = NewSite {
            organization_id: payload.organization_id,
            name: payload.name,
        };

        match api.store.insert_site(row).await {
            Ok(site) => HttpResponse::Created().json(site),
            Err(e) if is_duplicate(&e) => {
                info!("create_site declined: {e:#}");
                HttpResponse::Conflict().body(e.to_string())
            }
            Err(e) => {
                error!("create_site failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn update_site(
        path: web::Path<String>,
        body: web::Json<UpdateSitePayload>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("update_site() called: {body:?}");

        let patch = SitePatch {
            name: body.into_inner().name,
        };

        match api.store.update_site(path.into_inner(), patch).await {
            Ok(site) => HttpResponse::Ok().json(site),
            Err(e) => {
                error!("update_site failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn delete_site(path: web::Path<String>, api: web::Data<Self>) -> impl Responder {
        debug!("delete_site() called");

        match api.store.archive_site(path.into_inner()).await {
            Ok(()) => HttpResponse::NoContent().finish(),
            Err(e) => {
                error!("delete_site failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn create_unit(
        body: web::Json<CreateUnitPayload>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("create_unit() called: {body:?}");

        let payload = body.into_inner();
        let row = NewUnit {
            site_id: payload.site_id,
            name: payload.name,
        };

        match api.store.insert_unit(row).await {
            Ok(unit) => HttpResponse::Created().json(unit),
            Err(e) if is_duplicate(&e) => {
                info!("create_unit declined: {e:#}");
                HttpResponse::Conflict().body(e.to_string())
            }
            Err(e) if is_missing_reference(&e) => {
                info!("create_unit rejected: {e:#}");
                HttpResponse::BadRequest().body(e.to_string())
            }
            Err(e) => {
                error!("create_unit failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn update_unit(
        path: web::Path<String>,
        body: web::Json<UpdateUnitPayload>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("update_unit() called: {body:?}");

        let payload = body.into_inner();
        let patch = UnitPatch {
            name: payload.name,
            site_id: payload.site_id,
        };

        match api.store.update_unit(path.into_inner(), patch).await {
            Ok(unit) => HttpResponse::Ok().json(unit),
            Err(e) if is_missing_reference(&e) => {
                info!("update_unit rejected: {e:#}");
                HttpResponse::BadRequest().body(e.to_string())
            }
            Err(e) => {
                error!("update_unit failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn delete_unit(path: web::Path<String>, api: web::Data<Self>) -> impl Responder {
        debug!("delete_unit() called");

        match api.store.archive_unit(path.into_inner()).await {
            Ok(()) => HttpResponse::NoContent().finish(),
            Err(e) => {
                error!("delete_unit failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn catalog() -> impl Responder {
        debug!("catalog() called");

        let entries: Vec<serde_json::Value> = catalog::CATALOG
            .iter()
            .map(|entry| {
                let sensor_type = catalog::sensor_type_for_kind(entry.sensor_kind);
                json!({
                    "model_key": entry.model_key,
                    "manufacturer": entry.manufacturer,
                    "model": entry.model,
                    "sensor_kind": entry.sensor_kind,
                    "sensor_type": sensor_type,
                    "label": sensor_type.map(catalog::display_label),
                })
            })
            .collect();

        HttpResponse::Ok().json(entries)
    }

    // --- organization-level TTN actions and settings -----------------------

    pub async fn ttn_retry(api: web::Data<Self>) -> impl Responder {
        debug!("ttn_retry() called");
        Self::run_config_action(&api, ConfigAction::Retry).await
    }

    pub async fn ttn_start_fresh(api: web::Data<Self>) -> impl Responder {
        debug!("ttn_start_fresh() called");
        Self::run_config_action(&api, ConfigAction::StartFresh).await
    }

    pub async fn ttn_deep_clean(api: web::Data<Self>) -> impl Responder {
        debug!("ttn_deep_clean() called");
        Self::run_config_action(&api, ConfigAction::DeepClean).await
    }

    pub async fn ttn_regenerate_webhook_secret(api: web::Data<Self>) -> impl Responder {
        debug!("ttn_regenerate_webhook_secret() called");
        Self::run_config_action(&api, ConfigAction::RegenerateWebhookSecret).await
    }

    async fn run_config_action(api: &Self, action: ConfigAction) -> HttpResponse {
        let ttn_config = match api.dispatcher.client().get_settings().await {
            Ok(config) => config,
            Err(e) => return Self::transport_error(e, "config_action"),
        };

        let outcome = api.dispatcher.config_action(action, Some(&ttn_config)).await;
        Self::respond_outcome(outcome, "config_action")
    }

    pub async fn get_ttn_settings(api: web::Data<Self>) -> impl Responder {
        debug!("get_ttn_settings() called");

        match api.dispatcher.client().get_settings().await {
            Ok(config) => HttpResponse::Ok().json(config),
            Err(e) => Self::transport_error(e, "get_ttn_settings"),
        }
    }

    pub async fn update_ttn_settings(
        body: web::Json<TtnSettingsPatch>,
        api: web::Data<Self>,
    ) -> impl Responder {
        debug!("update_ttn_settings() called");

        match api.dispatcher.client().update_settings(body.into_inner()).await {
            Ok(config) => HttpResponse::Ok().json(config),
            Err(e) => Self::transport_error(e, "update_ttn_settings"),
        }
    }

    pub async fn test_ttn_settings(api: web::Data<Self>) -> impl Responder {
        debug!("test_ttn_settings() called");

        let outcome = api.dispatcher.client().test_settings().await;
        Self::respond_outcome(outcome, "test_ttn_settings")
    }

    // --- health and session ------------------------------------------------

    pub async fn healthcheck(api: web::Data<Self>) -> impl Responder {
        debug!("healthcheck() called");

        match api.dispatcher.client().get_settings().await {
            Ok(config) if config.is_enabled => match functions_version_info(&config) {
                Ok(info) if info.mismatch => HttpResponse::ServiceUnavailable().json(info),
                Ok(info) => HttpResponse::Ok().json(info),
                Err(e) => {
                    error!("healthcheck failed: {e:#}");
                    HttpResponse::InternalServerError().body(e.to_string())
                }
            },
            Ok(_) => HttpResponse::Ok().json(json!({ "ttn": "disabled" })),
            Err(e) => {
                error!("healthcheck failed: {e:#}");
                HttpResponse::InternalServerError().body(e.to_string())
            }
        }
    }

    pub async fn token(session: Session, token_manager: web::Data<TokenManager>) -> impl Responder {
        debug!("token() called");
        Self::session_token(session, token_manager)
    }

    pub async fn logout(session: Session) -> impl Responder {
        debug!("logout() called");
        session.purge();
        HttpResponse::Ok().finish()
    }

    pub async fn version() -> impl Responder {
        HttpResponse::Ok().body(env!("CARGO_PKG_VERSION"))
    }

    pub async fn set_password(
        body: web::Json<SetPasswordPayload>,
        session: Session,
        token_manager: web::Data<TokenManager>,
    ) -> impl Responder {
        debug!("set_password() called");

        if PasswordService::password_exists() {
            return HttpResponse::Found()
                .append_header(("Location", "/login"))
                .finish();
        }

        if let Err(e) = PasswordService::store_or_update_password(&body.password) {
            error!("set_password failed: {e:#}");
            return HttpResponse::InternalServerError().body(e.to_string());
        }

        Self::session_token(session, token_manager)
    }

    pub async fn update_password(
        body: web::Json<UpdatePasswordPayload>,
        session: Session,
    ) -> impl Responder {
        debug!("update_password() called");

        if let Err(e) = PasswordService::validate_password(&body.current_password) {
            error!("validate_password failed: {e:#}");
            return HttpResponse::BadRequest().body("current password is not correct");
        }

        let result = PasswordService::store_or_update_password(&body.password);

        if result.is_ok() {
            session.purge();
        }

        handle_service_result(result, "update_password")
    }

    pub async fn require_set_password() -> impl Responder {
        debug!("require_set_password() called");

        let password_exists = PasswordService::password_exists();
        HttpResponse::Ok().json(!password_exists)
    }

    fn session_token(session: Session, token_manager: web::Data<TokenManager>) -> HttpResponse {
        let token = match token_manager.create_token() {
            Ok(token) => token,
            Err(e) => {
                error!("failed to create token: {e:#}");
                return HttpResponse::InternalServerError().body("failed to create token");
            }
        };

        if session.insert("token", &token).is_err() {
            error!("failed to insert token into session");
            return HttpResponse::InternalServerError().body("failed to insert token into session");
        }

        HttpResponse::Ok().body(token)
    }

    // --- outcome mapping ---------------------------------------------------

    /// Map an action result onto the HTTP surface: accepted responses pass
    /// through as 200, declines become 409 with the structured refusal, and
    /// transport errors become 502 (or 401 when the remote session expired).
    fn respond_outcome(outcome: Result<ActionOutcome>, operation: &str) -> HttpResponse {
        match outcome {
            Ok(ActionOutcome::Accepted(value)) => HttpResponse::Ok().json(value),
            Ok(ActionOutcome::Declined(decline)) => {
                info!("{operation} declined: {}: {}", decline.code, decline.message);
                HttpResponse::Conflict().json(decline)
            }
            Err(e) => Self::transport_error(e, operation),
        }
    }

    fn transport_error(e: anyhow::Error, operation: &str) -> HttpResponse {
        if e.root_cause().downcast_ref::<SessionExpired>().is_some() {
            info!("{operation}: remote session expired");
            return HttpResponse::Unauthorized().finish();
        }

        error!("{operation} failed: {e:#}");
        HttpResponse::BadGateway().body(e.to_string())
    }
}
