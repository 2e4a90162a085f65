//! History payloads.

use crate::record::CleartextPayload;
use crate::types::{Guid, MicrosecondTimestamp};
use serde::{Deserialize, Serialize};

/// How a page visit came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum VisitType {
    /// Followed a link.
    Link,
    /// Typed the URL.
    Typed,
    /// Opened a bookmark.
    Bookmark,
    /// Embedded content.
    Embed,
    /// Permanent redirect.
    PermanentRedirect,
    /// Temporary redirect.
    TemporaryRedirect,
    /// Download.
    Download,
    /// Link followed inside a frame.
    FramedLink,
    /// Page reload.
    Reload,
}

impl VisitType {
    /// Converts to the numeric wire code.
    pub fn to_code(self) -> u8 {
        match self {
            VisitType::Link => 1,
            VisitType::Typed => 2,
            VisitType::Bookmark => 3,
            VisitType::Embed => 4,
            VisitType::PermanentRedirect => 5,
            VisitType::TemporaryRedirect => 6,
            VisitType::Download => 7,
            VisitType::FramedLink => 8,
            VisitType::Reload => 9,
        }
    }

    /// Converts from a numeric wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(VisitType::Link),
            2 => Some(VisitType::Typed),
            3 => Some(VisitType::Bookmark),
            4 => Some(VisitType::Embed),
            5 => Some(VisitType::PermanentRedirect),
            6 => Some(VisitType::TemporaryRedirect),
            7 => Some(VisitType::Download),
            8 => Some(VisitType::FramedLink),
            9 => Some(VisitType::Reload),
            _ => None,
        }
    }
}

impl TryFrom<u8> for VisitType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown visit type {code}"))
    }
}

impl From<VisitType> for u8 {
    fn from(visit_type: VisitType) -> Self {
        visit_type.to_code()
    }
}

/// A single visit to a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Visit {
    /// Visit time in microseconds.
    pub date: MicrosecondTimestamp,
    /// Visit transition type.
    #[serde(rename = "type")]
    pub visit_type: VisitType,
}

impl Visit {
    /// Creates a visit.
    pub fn new(date: MicrosecondTimestamp, visit_type: VisitType) -> Self {
        Self { date, visit_type }
    }
}

/// Cleartext payload of a history record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HistoryPayload {
    /// Place GUID.
    pub id: Guid,
    /// Page URL.
    pub hist_uri: String,
    /// Page title.
    pub title: String,
    /// Visits known for the page.
    pub visits: Vec<Visit>,
    /// Deletion flag.
    pub deleted: bool,
}

impl CleartextPayload for HistoryPayload {
    fn id(&self) -> &Guid {
        &self.id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn is_valid(&self) -> bool {
        if self.id.is_empty() {
            return false;
        }
        self.deleted || !self.hist_uri.is_empty()
    }

    fn tombstone(id: Guid) -> Self {
        Self {
            id,
            deleted: true,
            ..Self::default()
        }
    }
}
