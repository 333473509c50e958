use serde::{Deserialize, Serialize};
use toolforge_core::{Candidate, ToolRecord, ToolSignature};

/// One tool announcement, sent as a single JSON line. Delivery is
/// at-least-once; the `announce_id` is what makes redelivery idempotent on
/// the receiving side. The signature rides along because receivers
/// synthesize their own tests from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Announcement {
    pub announce_id: String,
    pub name: String,
    pub description: String,
    pub source: String,
    pub signature: ToolSignature,
    pub origin_peer_id: String,
    pub created_at: i64,
}

impl Announcement {
    pub fn for_record(
        record: &ToolRecord,
        signature: &ToolSignature,
        origin_peer_id: &str,
    ) -> Self {
        Self {
            announce_id: uuid::Uuid::new_v4().to_string(),
            name: record.name.clone(),
            description: record.description.clone(),
            source: record.source.clone(),
            signature: signature.clone(),
            origin_peer_id: origin_peer_id.to_string(),
            created_at: record.created_at,
        }
    }

    /// Repackage as an untrusted candidate for the receiver's own
    /// pipeline. Remote Active status carries no weight here.
    pub fn into_candidate(self) -> (String, Candidate) {
        (
            self.origin_peer_id,
            Candidate {
                name: self.name,
                description: self.description,
                source: self.source,
                signature: self.signature,
            },
        )
    }
}
