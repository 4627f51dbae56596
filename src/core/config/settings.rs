use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment,
    parse_fraction, parse_grade_bands, parse_u16, parse_u32, parse_u64, DEFAULT_GRADE_BANDS,
};
use super::secret::load_or_create_secret_key;
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, EngineSettings, RedisSettings,
    RuntimeSettings, SecuritySettings, ServerHost, ServerPort, ServerSettings, Settings,
    TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("EXAMCORE_HOST", "0.0.0.0");
        let port = env_or_default("EXAMCORE_PORT", "8000");

        let environment = parse_environment(
            env_optional("EXAMCORE_ENV").or_else(|| env_optional("ENVIRONMENT")),
        );
        let strict_config =
            env_optional("EXAMCORE_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Examcore API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let (secret_key, secret_key_explicit) = match env_optional("SECRET_KEY") {
            Some(value) => (value, true),
            None => (load_or_create_secret_key(), false),
        };
        let algorithm = env_or_default("ALGORITHM", "HS256");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "examcore");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "examcore");
        let database_url = env_optional("DATABASE_URL");
        let max_connections = parse_u32(
            "DATABASE_MAX_CONNECTIONS",
            env_or_default("DATABASE_MAX_CONNECTIONS", "30"),
        )?;

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let sweep_interval_seconds = parse_u64(
            "SWEEP_INTERVAL_SECONDS",
            env_or_default("SWEEP_INTERVAL_SECONDS", "30"),
        )?;
        let settle_interval_seconds = parse_u64(
            "SETTLE_INTERVAL_SECONDS",
            env_or_default("SETTLE_INTERVAL_SECONDS", "60"),
        )?;
        let sweep_batch_size =
            parse_u64("SWEEP_BATCH_SIZE", env_or_default("SWEEP_BATCH_SIZE", "200"))?;
        let grade_bands = parse_grade_bands(&env_or_default("GRADE_BANDS", DEFAULT_GRADE_BANDS))?;
        let grade_fallback = env_or_default("GRADE_FALLBACK", "U");
        let subjective_correct_threshold = parse_fraction(
            "SUBJECTIVE_CORRECT_THRESHOLD",
            env_or_default("SUBJECTIVE_CORRECT_THRESHOLD", "0"),
        )?;

        let log_level = env_or_default("EXAMCORE_LOG_LEVEL", "info");
        let json = env_optional("EXAMCORE_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            security: SecuritySettings { secret_key, secret_key_explicit, algorithm },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
                max_connections,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            engine: EngineSettings {
                sweep_interval_seconds,
                settle_interval_seconds,
                sweep_batch_size: sweep_batch_size as i64,
                grade_bands,
                grade_fallback,
                subjective_correct_threshold,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn security(&self) -> &SecuritySettings {
        &self.security
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.sweep_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SWEEP_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.engine.settle_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "SETTLE_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.engine.sweep_batch_size <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "SWEEP_BATCH_SIZE",
                value: self.engine.sweep_batch_size.to_string(),
            });
        }

        if self.engine.grade_fallback.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "GRADE_FALLBACK",
                value: String::from("<empty>"),
            });
        }

        if self.security.algorithm != "HS256" {
            return Err(ConfigError::InvalidValue {
                field: "ALGORITHM",
                value: self.security.algorithm.clone(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if !self.security.secret_key_explicit {
            return Err(ConfigError::MissingSecret("SECRET_KEY"));
        }

        Ok(())
    }
}

#[cfg(test)]
impl Settings {
    /// Deterministic settings for router and engine tests.
    pub(crate) fn for_tests() -> Self {
        use super::types::Environment;

        Self {
            server: ServerSettings {
                host: ServerHost("127.0.0.1".to_string()),
                port: ServerPort(8000),
            },
            runtime: RuntimeSettings { environment: Environment::Test, strict_config: false },
            api: ApiSettings {
                project_name: "Examcore API".to_string(),
                version: "test".to_string(),
                api_v1_str: "/api/v1".to_string(),
            },
            security: SecuritySettings {
                secret_key: "test-secret".to_string(),
                secret_key_explicit: true,
                algorithm: "HS256".to_string(),
            },
            cors: CorsSettings { origins: vec!["http://localhost:5173".to_string()] },
            database: DatabaseSettings {
                postgres_server: "localhost".to_string(),
                postgres_port: 5432,
                postgres_user: "examcore".to_string(),
                postgres_password: String::new(),
                postgres_db: "examcore".to_string(),
                database_url: None,
                max_connections: 5,
            },
            redis: RedisSettings {
                host: "localhost".to_string(),
                port: 6379,
                db: 0,
                password: String::new(),
            },
            engine: EngineSettings {
                sweep_interval_seconds: 30,
                settle_interval_seconds: 60,
                sweep_batch_size: 200,
                grade_bands: parse_grade_bands(DEFAULT_GRADE_BANDS).unwrap_or_default(),
                grade_fallback: "U".to_string(),
                subjective_correct_threshold: 0.0,
            },
            telemetry: TelemetrySettings {
                log_level: "info".to_string(),
                json: false,
                prometheus_enabled: false,
            },
        }
    }

    pub(crate) fn with_prometheus(mut self) -> Self {
        self.telemetry.prometheus_enabled = true;
        self
    }
}
