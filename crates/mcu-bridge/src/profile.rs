//! Conference profiles: the addressable identity of a member inside one
//! conference.

use crate::member::ConferenceMember;
use common::types::MemberId;
use std::fmt;
use std::sync::{Arc, Weak};

/// Directory record for one member of one conference.
///
/// Holds a non-owning handle to the member; it resolves only while the member
/// is still alive.
#[derive(Clone)]
pub struct ConferenceProfile {
    id: u64,
    member_id: MemberId,
    name: String,
    name_id: String,
    name_html: String,
    member: Weak<dyn ConferenceMember>,
}

impl ConferenceProfile {
    pub(crate) fn new(id: u64, member: &Arc<dyn ConferenceMember>) -> Self {
        let name = member.name().to_string();
        Self {
            id,
            member_id: member.id(),
            name_id: normalize_name(&name),
            name_html: escape_html(&name),
            name,
            member: Arc::downgrade(member),
        }
    }

    /// Per-conference numeric profile id, in join order.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn member_id(&self) -> MemberId {
        self.member_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Normalized lookup token; unique within a conference.
    #[must_use]
    pub fn name_id(&self) -> &str {
        &self.name_id
    }

    #[must_use]
    pub fn name_html(&self) -> &str {
        &self.name_html
    }

    /// The member this profile belongs to, if it is still alive.
    #[must_use]
    pub fn member(&self) -> Option<Arc<dyn ConferenceMember>> {
        self.member.upgrade()
    }
}

impl fmt::Debug for ConferenceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConferenceProfile")
            .field("id", &self.id)
            .field("member_id", &self.member_id)
            .field("name", &self.name)
            .field("name_id", &self.name_id)
            .finish_non_exhaustive()
    }
}

/// Lookup token for a display name: trimmed, lower-cased, inner whitespace
/// collapsed to single spaces.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// HTML-safe rendering of a display name.
#[must_use]
pub fn escape_html(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}
