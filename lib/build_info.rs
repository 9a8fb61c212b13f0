pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Abbreviated commit, or `unknown` for builds without git metadata.
pub const COMMIT: &str = env!("ATTENDANCE_SYNC_COMMIT");
/// `semver+commit`, with `.dirty` when the tree had uncommitted tracked changes.
pub const VERSION_WITH_COMMIT: &str = env!("ATTENDANCE_SYNC_VERSION");

pub fn is_dirty() -> bool {
    env!("ATTENDANCE_SYNC_DIRTY") == "true"
}
