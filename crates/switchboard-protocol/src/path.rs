//! Upgrade-path convention: `/<prefix>/<channel>`.

use crate::close::CloseReason;

/// Path segment brokers mount their channels under by default.
pub const DEFAULT_PREFIX: &str = "ServerChannel";

/// Extract the channel id from an upgrade request path.
///
/// The query string is ignored. The remainder must be exactly
/// `/<prefix>/<channel>`.
///
/// # Errors
///
/// Returns [`CloseReason::InvalidPath`] for any other shape and
/// [`CloseReason::MissingChannel`] when the channel segment is empty.
pub fn channel_id<'a>(path: &'a str, prefix: &str) -> Result<&'a str, CloseReason> {
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let rest = path
        .strip_prefix('/')
        .and_then(|p| p.strip_prefix(prefix))
        .and_then(|p| p.strip_prefix('/'))
        .ok_or(CloseReason::InvalidPath)?;

    if rest.contains('/') {
        return Err(CloseReason::InvalidPath);
    }
    if rest.is_empty() {
        return Err(CloseReason::MissingChannel);
    }

    Ok(rest)
}

/// Build the upgrade path for a channel.
#[must_use]
pub fn channel_path(prefix: &str, channel: &str) -> String {
    format!("/{}/{}", prefix, channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(channel_id("/ServerChannel/chat", DEFAULT_PREFIX), Ok("chat"));
        assert_eq!(
            channel_id("/ServerChannel/chat?token=abc", DEFAULT_PREFIX),
            Ok("chat")
        );
        assert_eq!(channel_id("/rt/auto_x1", "rt"), Ok("auto_x1"));
    }

    #[test]
    fn test_invalid_paths() {
        for path in [
            "",
            "/",
            "/ServerChannel",
            "/ServerChannelX/chat",
            "/other/chat",
            "ServerChannel/chat",
            "/ServerChannel/a/b",
        ] {
            assert_eq!(
                channel_id(path, DEFAULT_PREFIX),
                Err(CloseReason::InvalidPath),
                "path {:?}",
                path
            );
        }
    }

    #[test]
    fn test_empty_channel_segment() {
        assert_eq!(
            channel_id("/ServerChannel/", DEFAULT_PREFIX),
            Err(CloseReason::MissingChannel)
        );
    }

    #[test]
    fn test_channel_path() {
        let path = channel_path(DEFAULT_PREFIX, "chat");
        assert_eq!(path, "/ServerChannel/chat");
        assert_eq!(channel_id(&path, DEFAULT_PREFIX), Ok("chat"));
    }
}
