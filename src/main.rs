use frostguard_ui::{
    api::Api,
    config::AppConfig,
    middleware::AuthMw,
    services::auth::TokenManager,
    supabase_client::SupabaseRestClient,
    ttn_client::TtnEdgeClient,
};
use actix_cors::Cors;
use actix_files::Files;
use actix_server::ServerHandle;
use actix_session::{
    SessionMiddleware,
    config::{BrowserSession, CookieContentSecurity},
    storage::CookieSessionStore,
};
use actix_web::{
    App, HttpServer,
    cookie::{Key, SameSite},
    web::{self, Data},
};
use anyhow::{Context, Result};
use env_logger::{Builder, Env, Target};
use log::{debug, error, info};
use rustls::crypto::{CryptoProvider, ring::default_provider};
use std::io::Write;
use tokio::signal::unix::{SignalKind, signal};

type UiApi = Api<TtnEdgeClient, SupabaseRestClient>;

#[actix_web::main]
async fn main() {
    if let Err(e) = run().await {
        error!("application error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    initialize()?;

    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    let (server_handle, server_task) = run_server().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("ctrl-c received");
        },
        _ = sigterm.recv() => {
            debug!("SIGTERM received");
        },
        result = server_task => {
            match result {
                Ok(Ok(())) => debug!("server stopped normally"),
                Ok(Err(e)) => error!("server stopped with error: {e}"),
                Err(e) => error!("server task panicked: {e}"),
            }
        },
    };

    server_handle.stop(true).await;
    info!("shutdown complete");

    Ok(())
}

fn initialize() -> Result<()> {
    log_panics::init();

    let mut builder = if cfg!(debug_assertions) {
        Builder::from_env(Env::default().default_filter_or("debug"))
    } else {
        Builder::from_env(Env::default().default_filter_or("info"))
    };

    builder.format(|f, record| match record.level() {
        log::Level::Error => {
            eprintln!("{}", record.args());
            Ok(())
        }
        _ => {
            writeln!(f, "{}", record.args())
        }
    });

    builder.target(Target::Stdout).init();

    info!("service version: {}", env!("CARGO_PKG_VERSION"));

    CryptoProvider::install_default(default_provider())
        .map_err(|_| anyhow::anyhow!("crypto provider already installed"))?;

    Ok(())
}

async fn run_server() -> Result<(
    ServerHandle,
    tokio::task::JoinHandle<Result<(), std::io::Error>>,
)> {
    let ttn_client = TtnEdgeClient::new().context("failed to create TTN edge client")?;
    let store = SupabaseRestClient::new().context("failed to create table client")?;

    // One shared instance so the pending-action flags hold across workers
    let api = Data::new(UiApi::new(ttn_client, store));

    let tls_config = load_tls_config().context("failed to load tls config")?;
    let config = &AppConfig::get();
    let ui_port = config.ui.port;
    let static_dir = config.paths.static_dir.clone();
    let session_key = Key::generate();
    let token_manager = TokenManager::new(&config.session.token_secret);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_header()
                    .allowed_methods(vec!["GET"])
                    .supports_credentials()
                    .max_age(3600),
            )
            .wrap(
                SessionMiddleware::builder(CookieSessionStore::default(), session_key.clone())
                    .cookie_name(String::from("frostguard-ui-session"))
                    .cookie_secure(true)
                    .session_lifecycle(BrowserSession::default())
                    .cookie_same_site(SameSite::Strict)
                    .cookie_content_security(CookieContentSecurity::Private)
                    .cookie_http_only(true)
                    .build(),
            )
            .app_data(Data::new(token_manager.clone()))
            .app_data(api.clone())
            .service(
                web::scope("/api")
                    .wrap(AuthMw)
                    .route("/sensors", web::get().to(UiApi::list_sensors))
                    .route("/sensors", web::post().to(UiApi::create_sensor))
                    .route("/sensors/from-qr", web::post().to(UiApi::create_sensor_from_qr))
                    .route("/sensors/check-all", web::post().to(UiApi::check_all_sensors))
                    .route("/sensors/{id}", web::patch().to(UiApi::update_sensor))
                    .route("/sensors/{id}", web::delete().to(UiApi::delete_sensor))
                    .route(
                        "/sensors/{id}/provision",
                        web::post().to(UiApi::provision_sensor),
                    )
                    .route("/sensors/{id}/check", web::post().to(UiApi::check_sensor))
                    .route(
                        "/sensors/{id}/diagnose",
                        web::post().to(UiApi::diagnose_sensor),
                    )
                    .route(
                        "/sensors/{id}/unprovision",
                        web::post().to(UiApi::unprovision_sensor),
                    )
                    .route("/gateways", web::get().to(UiApi::list_gateways))
                    .route("/gateways", web::post().to(UiApi::create_gateway))
                    .route("/gateways/{id}", web::patch().to(UiApi::update_gateway))
                    .route("/gateways/{id}", web::delete().to(UiApi::delete_gateway))
                    .route("/sites", web::get().to(UiApi::list_sites))
                    .route("/sites", web::post().to(UiApi::create_site))
                    .route("/sites/{id}", web::patch().to(UiApi::update_site))
                    .route("/sites/{id}", web::delete().to(UiApi::delete_site))
                    .route("/units", web::get().to(UiApi::list_units))
                    .route("/units", web::post().to(UiApi::create_unit))
                    .route("/units/{id}", web::patch().to(UiApi::update_unit))
                    .route("/units/{id}", web::delete().to(UiApi::delete_unit))
                    .route("/catalog", web::get().to(UiApi::catalog))
                    .route("/ttn/settings", web::get().to(UiApi::get_ttn_settings))
                    .route("/ttn/settings", web::patch().to(UiApi::update_ttn_settings))
                    .route("/ttn/settings/test", web::post().to(UiApi::test_ttn_settings))
                    .route("/ttn/retry", web::post().to(UiApi::ttn_retry))
                    .route("/ttn/start-fresh", web::post().to(UiApi::ttn_start_fresh))
                    .route("/ttn/deep-clean", web::post().to(UiApi::ttn_deep_clean))
                    .route(
                        "/ttn/regenerate-webhook-secret",
                        web::post().to(UiApi::ttn_regenerate_webhook_secret),
                    ),
            )
            .route("/token/login", web::post().to(UiApi::token).wrap(AuthMw))
            .route("/token/refresh", web::get().to(UiApi::token).wrap(AuthMw))
            .route(
                "/require-set-password",
                web::get().to(UiApi::require_set_password),
            )
            .route("/set-password", web::post().to(UiApi::set_password))
            .route("/update-password", web::post().to(UiApi::update_password))
            .route("/version", web::get().to(UiApi::version))
            .route("/logout", web::post().to(UiApi::logout))
            .route("/healthcheck", web::get().to(UiApi::healthcheck))
            .service(Files::new("/", static_dir.clone()).index_file("index.html"))
    })
    .bind_rustls_0_23(format!("0.0.0.0:{ui_port}"), tls_config)
    .context("failed to bind server")?
    .disable_signals()
    .run();

    Ok((server.handle(), tokio::spawn(server)))
}

fn load_tls_config() -> Result<rustls::ServerConfig> {
    let paths = &AppConfig::get().certificate;

    let mut tls_certs = std::io::BufReader::new(
        std::fs::File::open(&paths.cert_path).context("failed to open certificate file")?,
    );

    let mut tls_key = std::io::BufReader::new(
        std::fs::File::open(&paths.key_path).context("failed to open key file")?,
    );

    let tls_certs = rustls_pemfile::certs(&mut tls_certs)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse certificate pem")?;

    let key_item = rustls_pemfile::read_one(&mut tls_key)
        .context("failed to read key pem file")?
        .context("no valid key found in pem file")?;

    let config = match key_item {
        rustls_pemfile::Item::Pkcs1Key(key) => rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(tls_certs, rustls::pki_types::PrivateKeyDer::Pkcs1(key))
            .context("failed to create tls config with pkcs1 key")?,
        rustls_pemfile::Item::Pkcs8Key(key) => rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(tls_certs, rustls::pki_types::PrivateKeyDer::Pkcs8(key))
            .context("failed to create tls config with pkcs8 key")?,
        _ => anyhow::bail!("unexpected key type in pem file"),
    };

    Ok(config)
}
