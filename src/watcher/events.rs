//! Classification of filesystem events into the closed set of change kinds
//! that can trigger a reload.

use notify::EventKind;
use notify::event::ModifyKind;

/// The change kinds significant to live reload.
///
/// Everything else notify reports (access, metadata-only modifications) is
/// noise for this purpose and maps to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Write,
    Create,
    Remove,
    Rename,
}

impl ChangeKind {
    /// Map a notify event kind onto a significant change kind, if any.
    pub fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Create),
            EventKind::Remove(_) => Some(Self::Remove),
            EventKind::Modify(ModifyKind::Name(_)) => Some(Self::Rename),
            EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Some(Self::Write),
            _ => None,
        }
    }
}
