use {
    crate::{
        MAX_PAGES,
        chunk::{HEADER_SIZE, OBJECT_ALIGN, PAGE_BYTES, bootstrap_overhead},
    },
    serde::Deserialize,
    thiserror::Error,
};

/// Size of a heap chunk unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Tunables for a global context and its clients.
///
/// Every field has a default, so a configuration file
/// only needs to mention the fields it changes.
///
/// ```
/// use tads_cache::Config;
/// let config = Config::from_json(r#"{ "chunk_size": 8192 }"#).unwrap();
/// assert_eq!(config.chunk_size, 8192);
/// assert_eq!(config.max_pages, Config::default().max_pages);
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config
{
    /// Bytes in each heap chunk.
    ///
    /// This is also the bound on the size of a single object,
    /// minus two block headers.
    pub chunk_size: usize,

    /// Total bytes of heap chunks the cache may allocate.
    ///
    /// Raised to one chunk if smaller.
    pub max_bytes: usize,

    /// Maximum number of descriptor pages.
    ///
    /// Each page describes [`PAGE_SIZE`] objects.
    ///
    /// [`PAGE_SIZE`]: `crate::PAGE_SIZE`
    pub max_pages: usize,

    /// Maximum number of translation pages per client context.
    pub client_pages: usize,

    /// A free block is only split if at least this many bytes would be left.
    pub split_threshold: usize,

    /// Maximum size of the swap file, in bytes.
    pub swap_budget: Option<u64>,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self{
            chunk_size:      DEFAULT_CHUNK_SIZE,
            max_bytes:       8 * DEFAULT_CHUNK_SIZE,
            max_pages:       64,
            client_pages:    128,
            split_threshold: 64,
            swap_budget:     None,
        }
    }
}

impl Config
{
    /// Parse and validate a configuration in JSON format.
    pub fn from_json(json: &str) -> Result<Self, ConfigError>
    {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError>
    {
        use ConfigError::Invalid;

        if self.max_pages == 0 || self.max_pages > MAX_PAGES {
            return Err(Invalid("max_pages must be between 1 and 255"));
        }

        if self.client_pages == 0 || self.client_pages > MAX_PAGES {
            return Err(Invalid("client_pages must be between 1 and 255"));
        }

        if self.chunk_size % OBJECT_ALIGN != 0 {
            return Err(Invalid("chunk_size must be even"));
        }

        if self.split_threshold < HEADER_SIZE + OBJECT_ALIGN {
            return Err(Invalid("split_threshold must leave room for a block"));
        }

        // The first chunk holds the context, descriptor page 0,
        // and at least one free block worth splitting, plus the end marker.
        let minimum = bootstrap_overhead(self.max_pages)
            + HEADER_SIZE + PAGE_BYTES
            + HEADER_SIZE + self.split_threshold
            + HEADER_SIZE;
        if self.chunk_size < minimum {
            return Err(Invalid("chunk_size is too small for the bootstrap page"));
        }

        if u32::try_from(self.chunk_size).is_err() {
            return Err(Invalid("chunk_size must fit in 32 bits"));
        }

        Ok(())
    }
}

/// Returned when a configuration cannot be used.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ConfigError
{
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn default_is_valid()
    {
        Config::default().validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected()
    {
        let err = Config::from_json(r#"{ "chunk_sise": 4096 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn bad_values_are_rejected()
    {
        let cases = [
            r#"{ "max_pages": 0 }"#,
            r#"{ "max_pages": 256 }"#,
            r#"{ "client_pages": 300 }"#,
            r#"{ "chunk_size": 8191 }"#,
            r#"{ "chunk_size": 1024 }"#,
            r#"{ "split_threshold": 1 }"#,
        ];
        for json in cases {
            let err = Config::from_json(json).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{json}: {err}");
        }
    }

    #[test]
    fn swap_budget_is_optional()
    {
        let config = Config::from_json(r#"{ "swap_budget": 65536 }"#).unwrap();
        assert_eq!(config.swap_budget, Some(65536));
        assert_eq!(Config::default().swap_budget, None);
    }
}
