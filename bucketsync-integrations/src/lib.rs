pub mod ids;

/// Overlay categories a file manager extension can render for a tracked path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Synced,
    Pending,
    Failed,
    Conflict,
}

impl OverlayState {
    /// Maps a stored sync state (`synced`, `for_upload`, `download_failed`, ...)
    /// to its overlay category. Unknown values are shown as pending.
    pub fn from_sync_state(state: &str) -> Self {
        match state {
            "synced" => OverlayState::Synced,
            "conflict" => OverlayState::Conflict,
            "download_failed" | "upload_failed" => OverlayState::Failed,
            _ => OverlayState::Pending,
        }
    }
}

pub fn emblem_icon(state: OverlayState) -> &'static str {
    match state {
        OverlayState::Synced => "emblem-ok-symbolic",
        OverlayState::Pending => "view-refresh-symbolic",
        OverlayState::Failed => "dialog-error-symbolic",
        OverlayState::Conflict => "dialog-warning-symbolic",
    }
}

pub fn emblem_for_sync_state(state: &str) -> &'static str {
    emblem_icon(OverlayState::from_sync_state(state))
}
