use sha2::{Digest, Sha256};
use tagsmith_contracts::metadata::Metadata;
use uuid::Uuid;

/// The four media types accepted at intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Jpeg,
    Png,
    Webp,
    Pdf,
}

impl MediaType {
    pub fn from_file_name(name: &str) -> Option<MediaType> {
        let extension = name.rsplit_once('.').map(|(_, ext)| ext)?;
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            "webp" => Some(MediaType::Webp),
            "pdf" => Some(MediaType::Pdf),
            _ => None,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::Webp => "image/webp",
            MediaType::Pdf => "application/pdf",
        }
    }

    pub fn is_image(&self) -> bool {
        !matches!(self, MediaType::Pdf)
    }
}

/// One single-page/single-image payload. Immutable once its unit exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    pub file_name: String,
    pub media_type: MediaType,
    pub bytes: Vec<u8>,
}

impl Asset {
    /// Short content fingerprint used for event labeling and dryrun output.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        let digest = hasher.finalize();
        hex::encode(&digest[..6])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Pending => "pending",
            UnitStatus::Processing => "processing",
            UnitStatus::Completed => "completed",
            UnitStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitStatus::Completed | UnitStatus::Error)
    }
}

/// The atomic work item: one asset awaiting or having undergone
/// metadata generation.
///
/// Invariant: `result` is non-null iff `status == Completed` and
/// `error_message` is non-null iff `status == Error`. The batch state's
/// patch operations are the only writers, so the invariant holds by
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub id: String,
    pub asset: Asset,
    pub status: UnitStatus,
    pub result: Option<Metadata>,
    pub error_message: Option<String>,
}

impl Unit {
    fn new(asset: Asset) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            asset,
            status: UnitStatus::Pending,
            result: None,
            error_message: None,
        }
    }
}

/// Allocates fresh pending units for normalized assets. Ids are uuid-v4,
/// unique across the lifetime of the process, not just within one call.
pub fn create_units(assets: Vec<Asset>) -> Vec<Unit> {
    assets.into_iter().map(Unit::new).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn asset(name: &str) -> Asset {
        Asset {
            file_name: name.to_string(),
            media_type: MediaType::from_file_name(name).unwrap_or(MediaType::Jpeg),
            bytes: name.as_bytes().to_vec(),
        }
    }

    #[test]
    fn media_type_sniffs_extension_case_insensitively() {
        assert_eq!(MediaType::from_file_name("a.JPG"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_file_name("b.jpeg"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_file_name("c.png"), Some(MediaType::Png));
        assert_eq!(MediaType::from_file_name("d.webp"), Some(MediaType::Webp));
        assert_eq!(MediaType::from_file_name("e.Pdf"), Some(MediaType::Pdf));
        assert_eq!(MediaType::from_file_name("notes.txt"), None);
        assert_eq!(MediaType::from_file_name("no-extension"), None);
    }

    #[test]
    fn created_units_are_pending_with_unique_ids() {
        let first = create_units(vec![asset("a.jpg"), asset("b.jpg")]);
        let second = create_units(vec![asset("c.jpg")]);

        let mut ids = HashSet::new();
        for unit in first.iter().chain(second.iter()) {
            assert_eq!(unit.status, UnitStatus::Pending);
            assert!(unit.result.is_none());
            assert!(unit.error_message.is_none());
            assert!(ids.insert(unit.id.clone()), "duplicate id {}", unit.id);
        }
    }

    #[test]
    fn fingerprint_is_stable_per_content() {
        let a = asset("a.jpg");
        assert_eq!(a.fingerprint(), a.fingerprint());
        assert_eq!(a.fingerprint().len(), 12);
        assert_ne!(a.fingerprint(), asset("b.jpg").fingerprint());
    }
}
