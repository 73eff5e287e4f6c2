/// Source of the bearer token checked before every network call.
pub trait TokenProvider: Send + Sync {
    /// The current token, or `None` when nobody is signed in.
    fn token(&self) -> Option<String>;
}

/// A fixed token, e.g. one supplied through the environment.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone().filter(|t| !t.is_empty())
    }
}
