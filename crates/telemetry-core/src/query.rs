// Historical event queries
//
// Filters operate only on the indexed columns (app, type, user, timestamp);
// location and payload blobs are never inspected.

use chrono::NaiveDateTime;

use crate::event::StoredRecord;

/// Column filter: wildcard or exact match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Filter {
    #[default]
    Any,
    Exact(String),
}

impl Filter {
    pub fn exact(value: impl Into<String>) -> Self {
        Filter::Exact(value.into())
    }

    /// Build from an optional request parameter; missing or empty means wildcard
    pub fn from_param(value: Option<String>) -> Self {
        match value {
            Some(v) if !v.is_empty() => Filter::Exact(v),
            _ => Filter::Any,
        }
    }

    pub fn as_exact(&self) -> Option<&str> {
        match self {
            Filter::Any => None,
            Filter::Exact(v) => Some(v),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Filter::Any => true,
            Filter::Exact(v) => v == value,
        }
    }
}

/// Range query over stored events. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub app: Filter,
    pub event_type: Filter,
    pub user: Filter,
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    /// Maximum number of records; `None` returns the whole matching set
    pub limit: Option<u32>,
}

impl EventQuery {
    /// Every record ever appended
    pub fn all() -> Self {
        Self::default()
    }

    pub fn app(mut self, app: Filter) -> Self {
        self.app = app;
        self
    }

    pub fn event_type(mut self, event_type: Filter) -> Self {
        self.event_type = event_type;
        self
    }

    pub fn user(mut self, user: Filter) -> Self {
        self.user = user;
        self
    }

    pub fn between(mut self, from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Self {
        self.from = from;
        self.to = to;
        self
    }

    pub fn limit(mut self, limit: Option<u32>) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, record: &StoredRecord) -> bool {
        self.app.matches(&record.app_name)
            && self.event_type.matches(&record.event_type)
            && self.user.matches(&record.user_id)
            && self.from.map_or(true, |from| record.timestamp >= from)
            && self.to.map_or(true, |to| record.timestamp <= to)
    }
}
