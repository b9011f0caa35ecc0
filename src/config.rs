use crate::adv::AdvKind;
use crate::att::MAX_VALUE_LEN;
use crate::bus::Path;
use crate::{Error, Result};

/// Server configuration.
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct Config {
    /// Server name. Used to derive the default base path.
    pub name: String,
    /// Adapter object path.
    pub adapter: String,
    /// Object path under which the application and advertisement are
    /// exported. Defaults to `/org/bluez/<name>` with invalid characters
    /// replaced by `_`.
    pub base_path: Option<String>,
    /// Maximum length of any attribute value.
    pub max_value_len: usize,
    /// Advertisement type.
    pub adv_kind: AdvKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "bless".to_owned(),
            adapter: "/org/bluez/hci0".to_owned(),
            base_path: None,
            max_value_len: MAX_VALUE_LEN,
            adv_kind: AdvKind::default(),
        }
    }
}

impl Config {
    /// Creates a default configuration for server `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the adapter object path.
    #[must_use]
    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = adapter.into();
        self
    }

    /// Sets the base object path.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the maximum attribute value length.
    #[must_use]
    pub fn with_max_value_len(mut self, n: usize) -> Self {
        self.max_value_len = n;
        self
    }

    /// Sets the advertisement type.
    #[must_use]
    pub fn with_adv_kind(mut self, kind: AdvKind) -> Self {
        self.adv_kind = kind;
        self
    }

    /// Returns the validated adapter path.
    pub(crate) fn adapter_path(&self) -> Result<Path> {
        Path::new(self.adapter.as_str())
    }

    /// Returns the validated base path.
    pub(crate) fn base_path(&self) -> Result<Path> {
        match self.base_path {
            Some(ref p) => Path::new(p.as_str()),
            None => Path::new(format!("/org/bluez/{}", Path::sanitize(&self.name))),
        }
    }

    /// Validates the configuration.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.max_value_len > MAX_VALUE_LEN {
            return Err(Error::InvalidState("maximum value length exceeds 512 bytes"));
        }
        self.adapter_path()?;
        self.base_path().map(|_| ())
    }
}
