//! Stale-session recovery for browser navigation.
//!
//! A navigation that lands on a stale-session or error page gets exactly one
//! recovery cycle: revisit a known-good entry URL, then the original target.
//! If that also lands on a stale page the caller skips the current item.

use tracing::warn;

use super::BrowserDriver;
use crate::error::Result;

/// Whether a page title carries a stale-session or error marker.
pub fn is_stale_title(title: &str) -> bool {
    let lower = title.to_lowercase();
    lower.contains("stale session") || lower.contains("error")
}

/// Navigate to `target`, recovering once via `entry_url` if the landing page
/// is stale. Returns whether the target was reached on a healthy page.
pub async fn navigate_with_recovery<D: BrowserDriver + ?Sized>(
    driver: &mut D,
    target: &str,
    entry_url: &str,
) -> Result<bool> {
    driver.navigate(target).await?;
    if !is_stale_title(&driver.page_title().await?) {
        return Ok(true);
    }

    warn!("stale browser session at {}, recovering via {}", target, entry_url);
    driver.navigate(entry_url).await?;
    driver.navigate(target).await?;

    if is_stale_title(&driver.page_title().await?) {
        warn!("still stale after recovery, skipping {}", target);
        return Ok(false);
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_title_markers() {
        assert!(is_stale_title("Stale Session"));
        assert!(is_stale_title("Error - something went wrong"));
        assert!(!is_stale_title("Tender Status"));
    }
}
