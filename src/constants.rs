pub mod network {
    pub const TIMEOUT_API_REQUEST_MS: u64 = 30_000;
    pub const TIMEOUT_CONNECTION_MS: u64 = 5_000;
    pub const MAX_REQUEST_TIMEOUT_MS: u64 = 600_000;
    pub const USER_AGENT: &str = concat!("infra-mcp/", env!("CARGO_PKG_VERSION"));
}

pub mod retry {
    pub const MAX_ATTEMPTS: usize = 4;
    pub const BASE_DELAY_MS: u64 = 250;
    pub const MAX_DELAY_MS: u64 = 5_000;
    pub const JITTER: f64 = 0.2;
    pub const STATUS_CODES: &[u16] = &[502, 503, 504];
    pub const IDEMPOTENT_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "PUT", "DELETE"];
}

pub mod session {
    pub const EXPIRY_SKEW_SECS: i64 = 30;
    pub const MIN_TTL_SECS: i64 = 60;
    pub const SYNOLOGY_TTL_SECS: i64 = 15 * 60;
    pub const PROXMOX_TTL_SECS: i64 = 110 * 60;
    pub const PORTAINER_TTL_SECS: i64 = 8 * 60 * 60;
    pub const GRAFANA_TTL_SECS: i64 = 60 * 60;
    pub const SYNOLOGY_SESSION_NAME: &str = "infra-mcp";
}

pub mod limits {
    pub const ERROR_BODY_CHARS: usize = 500;
}

pub mod protocols {
    pub const ALLOWED_HTTP: &[&str] = &["http", "https"];
}
