use anyhow::{Context, Result, ensure};
use std::{env, path::PathBuf, sync::OnceLock, time::Duration};
use uuid::Uuid;

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// UI server configuration
    pub ui: UiConfig,

    /// Supabase project configuration (PostgREST tables + edge functions)
    pub supabase: SupabaseConfig,

    /// Provisioning action configuration
    pub actions: ActionConfig,

    /// Status reconciliation configuration
    pub status: StatusConfig,

    /// Session token configuration
    pub session: SessionConfig,

    /// TLS certificate configuration
    pub certificate: CertificateConfig,

    /// Path configuration
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct UiConfig {
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
}

#[derive(Clone, Debug)]
pub struct ActionConfig {
    /// Request timeout for edge function and table calls. Bounds how long a
    /// row's pending flag can stay set on a hung remote call.
    pub request_timeout: Duration,
    /// Whether "check all" issues one batch call or falls back to per-row calls.
    pub check_batch: bool,
}

#[derive(Clone, Debug)]
pub struct StatusConfig {
    /// An active device whose last uplink is strictly older than this is
    /// reported offline.
    pub stale_after: chrono::Duration,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub token_secret: String,
}

#[derive(Clone, Debug)]
pub struct CertificateConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub data_dir: PathBuf,
    pub password_file: PathBuf,
    pub static_dir: PathBuf,
}

impl AppConfig {
    /// Get or load the application configuration
    ///
    /// Returns a reference to the cached configuration. On first call, it loads
    /// and validates all configuration from environment variables. Subsequent
    /// calls return the cached instance.
    ///
    /// # Panics
    /// Panics if configuration loading fails. This is intentional as the
    /// application cannot function without valid configuration.
    pub fn get() -> &'static Self {
        static APP_CONFIG: OnceLock<AppConfig> = OnceLock::new();
        APP_CONFIG.get_or_init(|| {
            Self::load_internal().expect("failed to load application configuration")
        })
    }

    /// Internal function to load and validate all configuration from environment variables
    ///
    /// This should only be called once via get(). It validates all
    /// required environment variables and returns an error if any are missing
    /// or invalid.
    fn load_internal() -> Result<Self> {
        let ui = UiConfig::load()?;
        let supabase = SupabaseConfig::load()?;
        let actions = ActionConfig::load()?;
        let status = StatusConfig::load()?;
        let session = SessionConfig::load()?;
        let certificate = CertificateConfig::load()?;
        let paths = PathConfig::load()?;

        Ok(Self {
            ui,
            supabase,
            actions,
            status,
            session,
            certificate,
            paths,
        })
    }
}

impl UiConfig {
    fn load() -> Result<Self> {
        let port = env::var("FG_UI_PORT")
            .unwrap_or_else(|_| "8443".to_string())
            .parse::<u16>()
            .context("failed to parse FG_UI_PORT: invalid format")?;

        Ok(Self { port })
    }
}

impl SupabaseConfig {
    fn load() -> Result<Self> {
        let url = env::var("SUPABASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:54321".to_string())
            .trim_end_matches('/')
            .to_string();

        // In test/mock mode, use a dummy key since no real project is reached
        #[cfg(any(test, feature = "mock"))]
        let service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .unwrap_or_else(|_| "test-service-role-key".to_string());
        #[cfg(not(any(test, feature = "mock")))]
        let service_role_key = env::var("SUPABASE_SERVICE_ROLE_KEY")
            .context("failed to get SUPABASE_SERVICE_ROLE_KEY")?;

        Ok(Self {
            url,
            service_role_key,
        })
    }
}

impl ActionConfig {
    fn load() -> Result<Self> {
        let timeout_secs = env::var("FG_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("failed to parse FG_REQUEST_TIMEOUT_SECS: invalid format")?;

        let check_batch = env::var("FG_CHECK_BATCH")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .context("failed to parse FG_CHECK_BATCH: invalid format")?;

        Ok(Self {
            request_timeout: Duration::from_secs(timeout_secs),
            check_batch,
        })
    }
}

impl StatusConfig {
    fn load() -> Result<Self> {
        let stale_after_secs = env::var("FG_STALE_AFTER_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<i64>()
            .context("failed to parse FG_STALE_AFTER_SECS: invalid format")?;

        Ok(Self {
            stale_after: chrono::Duration::seconds(stale_after_secs),
        })
    }
}

impl SessionConfig {
    /// jwt-simple refuses HS256 keys below 96 bits; a shorter secret would
    /// make every login fail at runtime, so reject it at startup instead.
    const MIN_SECRET_BYTES: usize = 12;

    fn load() -> Result<Self> {
        // Generate a unique signing secret for this instance; sessions do not
        // survive a restart
        let token_secret = env::var("FG_SESSION_SECRET")
            .unwrap_or_else(|_| Uuid::new_v4().to_string());

        Self::from_secret(token_secret)
    }

    fn from_secret(token_secret: String) -> Result<Self> {
        ensure!(
            token_secret.len() >= Self::MIN_SECRET_BYTES,
            "FG_SESSION_SECRET must be at least {} bytes",
            Self::MIN_SECRET_BYTES
        );

        Ok(Self { token_secret })
    }
}

impl CertificateConfig {
    fn load() -> Result<Self> {
        let cert_path = env::var("FG_CERT_PATH")
            .unwrap_or_else(|_| "/cert/cert.pem".to_string())
            .into();

        let key_path = env::var("FG_KEY_PATH")
            .unwrap_or_else(|_| "/cert/key.pem".to_string())
            .into();

        Ok(Self {
            cert_path,
            key_path,
        })
    }
}

impl PathConfig {
    fn load() -> Result<Self> {
        let data_dir = Self::data_dir();
        let config_dir = data_dir.join("config");

        std::fs::create_dir_all(&config_dir).context("failed to create config directory")?;

        let password_file = config_dir.join("password");
        let static_dir = env::var("FG_STATIC_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("static"));

        Ok(Self {
            data_dir,
            password_file,
            static_dir,
        })
    }

    #[cfg(not(any(test, feature = "mock")))]
    fn data_dir() -> PathBuf {
        PathBuf::from("/data/")
    }

    // In test mode, use temp directory as default to avoid /data requirement
    #[cfg(any(test, feature = "mock"))]
    fn data_dir() -> PathBuf {
        let data_dir = std::env::temp_dir().join("frostguard-ui-test");

        std::fs::create_dir_all(&data_dir)
            .context("failed to create data directory")
            .unwrap();
        data_dir
    }
}
