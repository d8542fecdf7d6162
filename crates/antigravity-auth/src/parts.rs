//! Refresh-parts codec
//!
//! A stored refresh string packs up to three values separated by `|`:
//! `refresh_token|project_id|managed_project_id`. Only the refresh token is
//! required; the project ids are optional and empty segments mean "absent".

use serde::{Deserialize, Serialize};

use crate::constants::REFRESH_PARTS_DELIMITER;

/// Structured view of an opaque refresh string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshParts {
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_project_id: Option<String>,
}

impl RefreshParts {
    /// Whether the parts carry a usable refresh token.
    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// Split a refresh string into its parts.
///
/// Never fails: an empty input yields an empty refresh token, and extra
/// segments past the third are ignored.
pub fn parse_refresh_parts(refresh: &str) -> RefreshParts {
    let mut segments = refresh.split(REFRESH_PARTS_DELIMITER);
    let refresh_token = segments.next().unwrap_or_default().to_string();
    let project_id = non_empty(segments.next());
    let managed_project_id = non_empty(segments.next());
    RefreshParts {
        refresh_token,
        project_id,
        managed_project_id,
    }
}

/// Pack parts back into a refresh string.
///
/// The managed project id is appended only when present, so
/// `{r, None, None}` formats as `r|`.
pub fn format_refresh_parts(parts: &RefreshParts) -> String {
    let project = parts.project_id.as_deref().unwrap_or_default();
    let mut out = format!("{}{REFRESH_PARTS_DELIMITER}{project}", parts.refresh_token);
    if let Some(managed) = parts.managed_project_id.as_deref() {
        out.push(REFRESH_PARTS_DELIMITER);
        out.push_str(managed);
    }
    out
}

fn non_empty(segment: Option<&str>) -> Option<String> {
    segment.filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_all_three_segments() {
        let parts = parse_refresh_parts("rt|proj|managed");
        assert_eq!(parts.refresh_token, "rt");
        assert_eq!(parts.project_id.as_deref(), Some("proj"));
        assert_eq!(parts.managed_project_id.as_deref(), Some("managed"));
    }

    #[test]
    fn parse_token_only() {
        let parts = parse_refresh_parts("rt");
        assert_eq!(parts.refresh_token, "rt");
        assert!(parts.project_id.is_none());
        assert!(parts.managed_project_id.is_none());
    }

    #[test]
    fn parse_empty_segments_are_absent() {
        let parts = parse_refresh_parts("rt||managed");
        assert!(parts.project_id.is_none());
        assert_eq!(parts.managed_project_id.as_deref(), Some("managed"));
    }

    #[test]
    fn parse_empty_input_has_no_refresh_token() {
        let parts = parse_refresh_parts("");
        assert!(!parts.has_refresh_token());
    }

    #[test]
    fn format_omits_missing_managed_project() {
        let parts = RefreshParts {
            refresh_token: "r1".into(),
            project_id: Some("p1".into()),
            managed_project_id: None,
        };
        assert_eq!(format_refresh_parts(&parts), "r1|p1");
    }

    #[test]
    fn format_keeps_project_slot_when_managed_present() {
        let parts = RefreshParts {
            refresh_token: "r1".into(),
            project_id: None,
            managed_project_id: Some("m1".into()),
        };
        let formatted = format_refresh_parts(&parts);
        assert_eq!(formatted, "r1||m1");
        assert_eq!(parse_refresh_parts(&formatted), parts);
    }

    #[test]
    fn format_token_only_keeps_trailing_delimiter() {
        let parts = parse_refresh_parts("r1");
        assert_eq!(format_refresh_parts(&parts), "r1|");
    }
}
