use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::conversation::VisitorOrigin;

/// Inbound chat message as handed over by the HTTP layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub raw: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub client_metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub origin: Option<VisitorOrigin>,
}

impl Query {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            session_id: None,
            client_metadata: BTreeMap::new(),
            origin: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_origin(mut self, origin: VisitorOrigin) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// Query after misspelling correction and entity normalization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedQuery {
    pub original: String,
    pub text: String,
}

impl ProcessedQuery {
    pub fn was_rewritten(&self) -> bool {
        self.original != self.text
    }

    pub fn lowercase(&self) -> String {
        self.text.to_lowercase()
    }
}
