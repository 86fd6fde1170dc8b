use std::str::FromStr;

use tenure_core::{AppError, AppResult, NonEmptyString};

/// One claimable role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChoice {
    key: String,
    role_id: NonEmptyString,
    role_name: NonEmptyString,
}

impl RoleChoice {
    /// Creates a validated role choice.
    ///
    /// The key is embedded in button identifiers, so it is restricted to
    /// lowercase ASCII letters, digits, `-` and `_`.
    pub fn new(
        key: impl Into<String>,
        role_id: impl Into<String>,
        role_name: impl Into<String>,
    ) -> AppResult<Self> {
        let key = key.into();
        if key.is_empty() || !key.chars().all(is_key_character) {
            return Err(AppError::Validation(format!(
                "role choice key '{key}' must be non-empty and use [a-z0-9_-]"
            )));
        }

        Ok(Self {
            key,
            role_id: NonEmptyString::new(role_id)?,
            role_name: NonEmptyString::new(role_name)?,
        })
    }

    /// Returns the choice key used in claim buttons.
    #[must_use]
    pub fn key(&self) -> &str {
        self.key.as_str()
    }

    /// Returns the platform role identifier.
    #[must_use]
    pub fn role_id(&self) -> &str {
        self.role_id.as_str()
    }

    /// Returns the role display name.
    #[must_use]
    pub fn role_name(&self) -> &str {
        self.role_name.as_str()
    }
}

fn is_key_character(character: char) -> bool {
    character.is_ascii_lowercase() || character.is_ascii_digit() || matches!(character, '-' | '_')
}

/// Ordered set of claimable roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCatalog {
    choices: Vec<RoleChoice>,
}

impl RoleCatalog {
    /// Creates a catalog, rejecting empty catalogs and duplicate keys.
    pub fn new(choices: Vec<RoleChoice>) -> AppResult<Self> {
        if choices.is_empty() {
            return Err(AppError::Validation(
                "role catalog must contain at least one role".to_owned(),
            ));
        }

        for (index, choice) in choices.iter().enumerate() {
            if choices[..index]
                .iter()
                .any(|previous| previous.key == choice.key)
            {
                return Err(AppError::Validation(format!(
                    "duplicate role choice key '{}'",
                    choice.key
                )));
            }
        }

        Ok(Self { choices })
    }

    /// Finds a role by its choice key.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<&RoleChoice> {
        self.choices.iter().find(|choice| choice.key == key)
    }

    /// Returns all roles in configured order.
    #[must_use]
    pub fn choices(&self) -> &[RoleChoice] {
        self.choices.as_slice()
    }
}

/// Parses `key=role_id:Role Name` entries separated by commas.
impl FromStr for RoleCatalog {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let choices = value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (key, rest) = entry.split_once('=').ok_or_else(|| {
                    AppError::Validation(format!(
                        "role choice '{entry}' must look like key=role_id:Role Name"
                    ))
                })?;
                let (role_id, role_name) = rest.split_once(':').ok_or_else(|| {
                    AppError::Validation(format!(
                        "role choice '{entry}' must look like key=role_id:Role Name"
                    ))
                })?;

                RoleChoice::new(key.trim(), role_id.trim(), role_name.trim())
            })
            .collect::<AppResult<Vec<_>>>()?;

        Self::new(choices)
    }
}
