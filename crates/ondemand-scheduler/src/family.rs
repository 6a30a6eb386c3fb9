//! Task family naming.
//!
//! Families are content addressed: identical task configurations map to the
//! same family within a calendar month, so registration happens once per
//! configuration per month instead of once per job. The month bucket rotates
//! families so no single family accumulates revisions forever.

use chrono::{DateTime, Utc};
use ondemand_core::task::MAX_FAMILY_LEN;
use ondemand_core::{Error, Expr, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const FAMILY_PREFIX: &str = "ondemand";

/// Hex characters of the content digest kept in the family name.
const DIGEST_LEN: usize = 8;

/// Short hex digest of a serializable fingerprint.
pub fn content_digest<T: Serialize>(fingerprint: &T) -> Result<String> {
    let bytes = serde_json::to_vec(fingerprint)
        .map_err(|e| Error::Internal(format!("failed to encode fingerprint: {}", e)))?;
    let digest = hex::encode(Sha256::digest(&bytes));
    Ok(digest[..DIGEST_LEN].to_string())
}

/// Calendar month bucket, e.g. `202610`.
pub fn time_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y%m").to_string()
}

/// Collapse runs of anything outside `[A-Za-z0-9]` into single hyphens.
pub fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// `ondemand-<image slug>-<digest>-<YYYYMM>`, at most 255 characters.
///
/// Images that are template expressions contribute no slug.
pub fn family_name(image: &Expr, digest: &str, at: DateTime<Utc>) -> String {
    let bucket = time_bucket(at);
    let suffix = format!("-{}-{}", digest, bucket);

    let mut image_slug = image.as_literal().map(slug).unwrap_or_default();
    let budget = MAX_FAMILY_LEN - FAMILY_PREFIX.len() - 1 - suffix.len();
    if image_slug.len() > budget {
        // slug is ASCII, so byte truncation is safe
        image_slug.truncate(budget);
        while image_slug.ends_with('-') {
            image_slug.pop();
        }
    }

    if image_slug.is_empty() {
        format!("{}{}", FAMILY_PREFIX, suffix)
    } else {
        format!("{}-{}{}", FAMILY_PREFIX, image_slug, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ondemand_core::task::validate_family;

    fn october() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_slug() {
        assert_eq!(
            slug("012345678910.dkr.ecr.us-east-1.amazonaws.com/agent/buildkite:latest"),
            "012345678910-dkr-ecr-us-east-1-amazonaws-com-agent-buildkite-latest"
        );
        assert_eq!(slug("keithduncan/agent@sha256:94af"), "keithduncan-agent-sha256-94af");
        assert_eq!(slug("--//"), "");
    }

    #[test]
    fn test_family_shape() {
        let family = family_name(&Expr::literal("hashicorp/terraform:light"), "0a1b2c3d", october());
        assert_eq!(family, "ondemand-hashicorp-terraform-light-0a1b2c3d-202610");
        assert!(validate_family(&family).is_ok());
    }

    #[test]
    fn test_family_is_capped() {
        let image = format!("registry.example.com/{}", "x".repeat(400));
        let family = family_name(&Expr::literal(image), "0a1b2c3d", october());
        assert_eq!(family.len(), MAX_FAMILY_LEN);
        assert!(family.ends_with("-0a1b2c3d-202610"));
        assert!(validate_family(&family).is_ok());
    }

    #[test]
    fn test_template_image_has_no_slug() {
        let family = family_name(&Expr::reference("Image"), "0a1b2c3d", october());
        assert_eq!(family, "ondemand-0a1b2c3d-202610");
    }

    #[test]
    fn test_digest_is_stable() {
        let a = content_digest(&("alpine", 256, 512)).unwrap();
        let b = content_digest(&("alpine", 256, 512)).unwrap();
        let c = content_digest(&("alpine", 512, 1024)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), DIGEST_LEN);
    }
}
