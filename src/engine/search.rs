use ulid::Ulid;

use crate::model::*;

use super::availability::is_available;
use super::ports::RoomCatalog;
use super::EngineError;

/// Attribute filters. Text filters are case-insensitive substring matches,
/// `rooms_count` is exact. Unset fields match everything; a set text filter
/// never matches a room without that attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuralFilter {
    pub room_type: Option<String>,
    pub rooms_count: Option<u32>,
    pub location: Option<String>,
}

fn contains_ignore_case(field: Option<&str>, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => field.is_some_and(|f| f.to_lowercase().contains(&needle.to_lowercase())),
    }
}

impl StructuralFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, room: &Room) -> bool {
        contains_ignore_case(room.room_type.as_deref(), self.room_type.as_deref())
            && self.rooms_count.is_none_or(|n| room.rooms_count == Some(n))
            && contains_ignore_case(room.location.as_deref(), self.location.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFilter {
    pub structure: StructuralFilter,
    pub check_in: Option<Ms>,
    pub check_out: Option<Ms>,
}

impl RoomFilter {
    /// The stay to check availability for. Only when both dates are given;
    /// a lone check-in or check-out does not narrow the search.
    pub fn stay(&self) -> Result<Option<Span>, EngineError> {
        match (self.check_in, self.check_out) {
            (Some(check_in), Some(check_out)) => Ok(Some(Span::new(check_in, check_out)?)),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub id: Ulid,
    pub title: String,
    pub subtitle: Option<String>,
    pub image_url: Option<String>,
}

impl RoomSummary {
    pub fn from_state(rs: &RoomState) -> Self {
        Self {
            id: rs.room.id,
            title: rs.room.title.clone(),
            subtitle: rs.room.subtitle.clone(),
            image_url: rs.images.first().map(|image| format!("/images/{image}")),
        }
    }
}

/// Structural filter first, then availability, then summaries. Results keep
/// the catalog's order.
pub struct RoomSearch<'a> {
    catalog: &'a dyn RoomCatalog,
}

impl<'a> RoomSearch<'a> {
    pub fn new(catalog: &'a dyn RoomCatalog) -> Self {
        Self { catalog }
    }

    pub async fn search(&self, filter: &RoomFilter) -> Result<Vec<RoomSummary>, EngineError> {
        let stay = filter.stay()?;
        let rooms = self.catalog.query_rooms(&filter.structure).await;
        Ok(rooms
            .iter()
            .filter(|rs| stay.is_none_or(|s| is_available(rs, &s)))
            .map(RoomSummary::from_state)
            .collect())
    }
}
