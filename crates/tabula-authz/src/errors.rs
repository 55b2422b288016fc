use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid permission level: {0}")]
    InvalidPermission(u8),
}

pub type AuthzResult<T> = Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let rendered = AuthzError::InvalidPermission(9).to_string();
        assert_eq!(rendered, "invalid permission level: 9");
    }
}
