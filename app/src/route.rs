//! Role selection from the page route.

use url::form_urlencoded;

/// Status shown to viewers until playback exists.
pub const VIEWER_STATUS: &str = "Waiting for stream to start...";

/// Which side of the live page this host is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Broadcaster,
    /// Not implemented yet: never captures or connects.
    Viewer,
}

impl Role {
    /// Pick the role from a route such as `/live?broadcaster=true`.
    pub fn from_route(route: &str) -> Self {
        let query = route.split_once('?').map(|(_, q)| q).unwrap_or("");
        Self::from_query(query)
    }

    /// Pick the role from a query string. Only `broadcaster=true` selects
    /// the broadcaster.
    pub fn from_query(query: &str) -> Self {
        let query = query.trim_start_matches('?');
        let is_broadcaster = form_urlencoded::parse(query.as_bytes())
            .any(|(key, value)| key == "broadcaster" && value == "true");

        if is_broadcaster {
            Self::Broadcaster
        } else {
            Self::Viewer
        }
    }

    pub fn is_broadcaster(self) -> bool {
        self == Self::Broadcaster
    }
}

/// Link viewers open to watch.
pub fn share_link(origin: &str) -> String {
    format!("{}/live", origin.trim_end_matches('/'))
}
