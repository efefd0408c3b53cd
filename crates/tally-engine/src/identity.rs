use anyhow::Result;
use tracing::debug;

use tally_db::Database;
use tally_types::models::Member;

use crate::service::PollService;

/// Lookup into the identity service. `Ok(None)` means the member is unknown.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, member_id: i64) -> Result<Option<Member>>;
}

/// The member table is the local projection of the identity service.
impl IdentityResolver for Database {
    fn resolve(&self, member_id: i64) -> Result<Option<Member>> {
        self.get_member(member_id)
    }
}

impl PollService {
    /// Refresh the local member copy from a profile the identity service
    /// vouched for. Later resolves and statistics see the new attributes.
    pub fn sync_member(&self, member: &Member) -> crate::Result<()> {
        self.db.upsert_member(member)?;
        debug!("Synced member {} as {}", member.id, member.role.as_str());
        Ok(())
    }
}
