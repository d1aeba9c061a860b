//! Payload domain model.
//!
//! # Responsibility
//! - Define the kind-specific record attached 1:1 to every node.
//! - Derive appearance and capability facts from payload data.
//! - Surface payload validation as computed values, not errors.
//!
//! # Invariants
//! - `Payload::kind()` must agree with the owning node's kind; a mismatch
//!   indicates store corruption and is rejected at load sites.
//! - Only `Directory` is collapsible; only `Reference` is referencing.

use crate::model::node::{NodeId, NodeKind};
use crate::permission::PermissionMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Initial collapse behavior configured on a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityPolicy {
    /// Follow the consumer preference; defaults to expanded.
    Preference,
    /// Start collapsed; toggles are never persisted.
    Collapsed,
    /// Start expanded; toggles are never persisted.
    Expanded,
    /// Start from the last persisted value; toggles write back.
    Remember,
}

/// Kind-specific data record attached 1:1 to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum Payload {
    Directory {
        /// Configured grants consulted by the permission walk.
        permissions: PermissionMap,
        visibility: VisibilityPolicy,
        /// Last persisted collapse value; meaningful for `Remember` only.
        remembered_expanded: bool,
    },
    Application {
        /// Opaque launcher identifier consumed by the presentation layer.
        launcher_id: String,
    },
    Reference {
        /// Target node id. `None` or dangling means an inert broken reference.
        target_id: Option<NodeId>,
    },
    Website {
        url: String,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Note {
        body: String,
    },
    Checkbox {
        checked: bool,
    },
    Reminder {
        /// Epoch ms due time; `None` means not scheduled.
        remind_at_ms: Option<i64>,
    },
    Setting {
        /// Opaque setting identifier consumed by the presentation layer.
        setting_key: String,
    },
    File {
        path: String,
    },
}

impl Payload {
    /// Returns the node kind this payload variant belongs to.
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Directory { .. } => NodeKind::Directory,
            Self::Application { .. } => NodeKind::Application,
            Self::Reference { .. } => NodeKind::Reference,
            Self::Website { .. } => NodeKind::Website,
            Self::Location { .. } => NodeKind::Location,
            Self::Note { .. } => NodeKind::Note,
            Self::Checkbox { .. } => NodeKind::Checkbox,
            Self::Reminder { .. } => NodeKind::Reminder,
            Self::Setting { .. } => NodeKind::Setting,
            Self::File { .. } => NodeKind::File,
        }
    }

    /// Returns whether activating this payload triggers a side effect
    /// outside the tree (launch, open, toggle).
    pub fn is_activatable(&self) -> bool {
        !matches!(self, Self::Directory { .. })
    }

    /// Returns whether this payload owns collapse state.
    pub fn is_collapsible(&self) -> bool {
        matches!(self, Self::Directory { .. })
    }

    /// Returns whether this payload points at another node.
    pub fn is_referencing(&self) -> bool {
        matches!(self, Self::Reference { .. })
    }

    /// Creates a default directory payload granting everything.
    pub fn directory() -> Self {
        Self::Directory {
            permissions: PermissionMap::full(),
            visibility: VisibilityPolicy::Preference,
            remembered_expanded: true,
        }
    }
}

/// Resolved display facts for one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    /// Stable icon name consumed by the presentation layer.
    pub icon: &'static str,
    /// Render the label struck through (checked checkboxes).
    pub strikethrough: bool,
}

/// Derives the appearance for a payload.
///
/// A broken reference renders with the reference's own appearance; a working
/// reference renders with its target's, which callers obtain by passing the
/// resolved payload here.
pub fn appearance_for(payload: &Payload) -> Appearance {
    let icon = match payload {
        Payload::Directory { .. } => "directory",
        Payload::Application { .. } => "application",
        Payload::Reference { .. } => "reference",
        Payload::Website { .. } => "website",
        Payload::Location { .. } => "location",
        Payload::Note { .. } => "note",
        Payload::Checkbox { .. } => "checkbox",
        Payload::Reminder { .. } => "reminder",
        Payload::Setting { .. } => "setting",
        Payload::File { .. } => "file",
    };
    let strikethrough = matches!(payload, Payload::Checkbox { checked: true });
    Appearance {
        icon,
        strikethrough,
    }
}

/// Validation outcome surfaced to the consumer for user correction.
///
/// These are computed values, never errors: saving with an issue present is
/// a consumer policy decision, not a structural failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// Website URL does not look like an http(s) URL.
    InvalidUrl { url: String },
    /// Latitude or longitude is outside the valid range.
    InvalidCoordinate { latitude: f64, longitude: f64 },
}

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("static URL pattern must compile")
});

/// Validates one payload and returns every issue found.
pub fn validate_payload(payload: &Payload) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    match payload {
        Payload::Website { url } => {
            if !URL_PATTERN.is_match(url.trim()) {
                issues.push(ValidationIssue::InvalidUrl { url: url.clone() });
            }
        }
        Payload::Location {
            latitude,
            longitude,
        } => {
            let lat_ok = (-90.0..=90.0).contains(latitude) && latitude.is_finite();
            let lon_ok = (-180.0..=180.0).contains(longitude) && longitude.is_finite();
            if !lat_ok || !lon_ok {
                issues.push(ValidationIssue::InvalidCoordinate {
                    latitude: *latitude,
                    longitude: *longitude,
                });
            }
        }
        _ => {}
    }
    issues
}
