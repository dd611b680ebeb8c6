//! Action configuration
//!
//! Sizing parameters shared by host and accelerator: bus word size, element
//! width and the largest batch a job may declare. Defaults come from the
//! layout crate's compile-time checked constants; overrides come from the
//! environment and are validated once at startup, so a misaligned pair never
//! reaches the datapath.

use crate::error::{ActionError, Result};
use decmult_chip::packing::{BUS_WORD_BYTES, MAX_ELEMENTS_PER_BATCH};
use decmult_chip::{ElementWidth, PackingRule};
use tracing::debug;

/// Environment variable overriding the bus word size in bytes.
pub const ENV_BUS_WORD_BYTES: &str = "DECMULT_BUS_WORD_BYTES";
/// Environment variable overriding the element size in bytes (4 or 8).
pub const ENV_ELEMENT_BYTES: &str = "DECMULT_ELEMENT_BYTES";
/// Environment variable overriding the maximum elements per job.
pub const ENV_MAX_ELEMENTS: &str = "DECMULT_MAX_ELEMENTS";

/// Action sizing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionConfig {
    /// Bus word size in bytes
    pub bus_word_bytes: usize,
    /// Decimal element width
    pub element_width: ElementWidth,
    /// Largest element count a job may declare per operand
    pub max_elements: usize,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            bus_word_bytes: BUS_WORD_BYTES,
            element_width: ElementWidth::Double,
            max_elements: MAX_ELEMENTS_PER_BATCH,
        }
    }
}

impl ActionConfig {
    /// Explicit configuration.
    pub const fn new(bus_word_bytes: usize, element_width: ElementWidth, max_elements: usize) -> Self {
        Self {
            bus_word_bytes,
            element_width,
            max_elements,
        }
    }

    /// Set the element width.
    #[must_use]
    pub const fn with_element_width(mut self, element_width: ElementWidth) -> Self {
        self.element_width = element_width;
        self
    }

    /// Set the bus word size.
    #[must_use]
    pub const fn with_bus_word_bytes(mut self, bus_word_bytes: usize) -> Self {
        self.bus_word_bytes = bus_word_bytes;
        self
    }

    /// Set the maximum elements per job.
    #[must_use]
    pub const fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Defaults overridden by `DECMULT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::ConfigInvalid`] if a variable is set but does
    /// not parse, or if the resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by values from `lookup`, keyed by the `ENV_*` names.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse = |name: &str| -> Result<Option<usize>> {
            lookup(name)
                .map(|raw| {
                    raw.trim().parse::<usize>().map_err(|e| {
                        ActionError::config_invalid(format!("{name}={raw:?}: {e}"))
                    })
                })
                .transpose()
        };

        let mut config = Self::default();
        if let Some(bytes) = parse(ENV_BUS_WORD_BYTES)? {
            config.bus_word_bytes = bytes;
        }
        if let Some(bytes) = parse(ENV_ELEMENT_BYTES)? {
            config.element_width = ElementWidth::from_bytes(bytes)
                .map_err(|e| ActionError::config_invalid(format!("{ENV_ELEMENT_BYTES}: {e}")))?;
        }
        if let Some(max) = parse(ENV_MAX_ELEMENTS)? {
            config.max_elements = max;
        }

        config.validate()?;
        debug!("Action config: {config:?}");
        Ok(config)
    }

    /// Validate the configuration and derive its packing rule.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::ConfigInvalid`] if the bus word is not a whole
    /// multiple of the element size, or if the maximum batch is zero or does
    /// not fit the descriptor's 32-bit element count.
    pub fn validate(&self) -> Result<PackingRule> {
        let rule = PackingRule::for_width(self.bus_word_bytes, self.element_width)
            .map_err(|e| ActionError::config_invalid(e.to_string()))?;
        if self.max_elements == 0 {
            return Err(ActionError::config_invalid("maximum elements per job must be non-zero"));
        }
        if u32::try_from(self.max_elements).is_err() {
            return Err(ActionError::config_invalid(format!(
                "maximum elements per job {} exceeds the 32-bit element count field",
                self.max_elements
            )));
        }
        Ok(rule)
    }

    /// Bus words needed for the largest batch.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn words_per_batch(&self) -> Result<usize> {
        Ok(self.validate()?.words_per_batch(self.max_elements))
    }
}
