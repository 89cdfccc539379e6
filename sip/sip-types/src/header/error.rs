use super::name::Name;

/// Error when decoding a typed header out of [`Headers`](crate::Headers)
#[derive(Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("header {0} is missing")]
    Missing(Name),
    #[error("header {name} was found but is malformed: {error}")]
    Malformed { name: Name, error: anyhow::Error },
}

impl HeaderError {
    pub const fn missing(name: Name) -> Self {
        Self::Missing(name)
    }

    pub fn malformed(name: Name, error: anyhow::Error) -> Self {
        Self::Malformed { name, error }
    }

    pub fn malformed_adhoc(name: Name, error: &'static str) -> Self {
        Self::Malformed {
            name,
            error: anyhow::Error::msg(error),
        }
    }

    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(..))
    }
}
