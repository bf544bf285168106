// API server configuration

/// Server settings loaded from the environment
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub jwt_secret: String,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        ApiConfig {
            bind_addr: std::env::var("FLOWLINE_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:9000".to_string()),
            jwt_secret: std::env::var("FLOWLINE_JWT_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-in-production".to_string()),
        }
    }
}
