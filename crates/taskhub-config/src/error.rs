use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("yaml parse error in {path}: {source}")]
    YamlParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid setting {setting}: {message}")]
    Invalid { setting: String, message: String },

    #[error("domain error: {0}")]
    Domain(#[from] taskhub_domain::DomainError),
}
