//! User-Agent string for artifact requests.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/harvester-rs/harvester";

/// Used when the browser session cannot report its own User-Agent.
#[must_use]
pub(crate) fn default_download_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("harvester/{version} (academic-research-tool; +{PROJECT_UA_URL})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ua_carries_crate_version_and_project_url() {
        let ua = default_download_user_agent();
        assert!(ua.contains(PROJECT_UA_URL), "UA must contain project URL: {ua}");
        assert_eq!(
            ua.strip_prefix("harvester/")
                .and_then(|s| s.split(' ').next()),
            Some(env!("CARGO_PKG_VERSION")),
        );
    }

    #[test]
    fn test_ua_identifies_as_research_tool() {
        assert!(default_download_user_agent().contains("academic-research-tool"));
    }
}
