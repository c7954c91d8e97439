use anyhow::{Result, bail};

/// Validate a peer identity before it is published for handoff.
/// Rules: non-empty, max 128 chars, `[A-Za-z0-9._-]` only.
pub fn validate_peer_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("peer id must not be empty");
    }
    if id.len() > 128 {
        bail!("peer id '{}' exceeds 128 characters (got {})", id, id.len());
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        bail!(
            "peer id '{}' must contain only letters, digits, '.', '_' and '-'",
            id
        );
    }
    Ok(())
}
