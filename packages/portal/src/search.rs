//! Search predicates and the form encoding of a portal ticket search.
//!
//! The portal's ticket list takes any number of predicates as four
//! parallel form sequences (field, operator code, first value, second
//! value), one slot per predicate.

use chrono::NaiveDate;
use strum_macros::{AsRefStr, Display, EnumString};

/// Form key of the predicate field sequence.
pub const FIELD_KEY: &str = "ticketList-f";
/// Form key of the predicate operator sequence.
pub const OPERATOR_KEY: &str = "ticketList-fop";
/// Form key of the first predicate value sequence.
pub const VALUE1_KEY: &str = "ticketList-v1";
/// Form key of the second predicate value sequence (only used by BETWEEN).
pub const VALUE2_KEY: &str = "ticketList-v2";
/// Form key of the output column list.
pub const COLUMNS_KEY: &str = "co";
/// Form key of the sort order.
pub const ORDER_KEY: &str = "ticketList-oo";
/// Form key of the export mode selector.
pub const EXPORT_MODE_KEY: &str = "d-2698956-e";
/// Export mode value selecting CSV output.
pub const CSV_EXPORT_MODE: &str = "1";

/// Date format the portal expects in predicate values.
pub const PORTAL_DATE_FORMAT: &str = "%m/%d/%Y";

/// Columns requested in every export, in output order.
pub const OUTPUT_COLUMNS: &[&str] = &[
    "TICKETNO",
    "TICKETSTATUS",
    "TICKETPLATE",
    "TICKETPLATEPROVINCE",
    "INFRACTIONDATE",
    "TICKETCREATIONTIME",
    "TICKETATTESTAGENTBADGENO",
    "TICKETAGENTNAME",
    "TICKETAGENTUNIT",
    "LOCATIONDISTRICTNAME",
    "TICKETINFRACTIONCODE",
    "INFRACTIONTEXTEN",
    "TICKETFINE",
    "LOCATIONCIVICNO",
    "LOCATIONDIRECTIONNAMEEN",
    "LOCATIONSTREETNAME",
    "CLIENTID",
    "ISSERVEROWNER",
    "CLIENTSOFTWARE",
    "TICKETEXPORTDATE",
];

/// A searchable ticket attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr)]
pub enum SearchField {
    #[strum(serialize = "TICKETVIEW.TICKETNO")]
    TicketNo,
    #[strum(serialize = "TICKETVIEW.TICKETSTATUS")]
    TicketStatus,
    #[strum(serialize = "TICKETVIEW.TICKETPLATE")]
    Plate,
    #[strum(serialize = "TICKETVIEW.TICKETPLATEPROVINCE")]
    PlateState,
    #[strum(serialize = "TICKETVIEW.INFRACTIONDATE")]
    InfractionDate,
    #[strum(serialize = "TICKETVIEW.TICKETCREATIONTIME")]
    CreationTime,
    #[strum(serialize = "TICKETVIEW.TICKETATTESTAGENTBADGENO")]
    OfficerBadgeNo,
    #[strum(serialize = "TICKETVIEW.TICKETAGENTNAME")]
    OfficerName,
    #[strum(serialize = "TICKETVIEW.TICKETAGENTUNIT")]
    Squad,
    #[strum(serialize = "TICKETVIEW.LOCATIONDISTRICTNAME")]
    District,
    #[strum(serialize = "TICKETVIEW.TICKETINFRACTIONCODE")]
    ViolationCode,
    #[strum(serialize = "TICKETVIEW.INFRACTIONTEXTEN")]
    InfractionText,
    #[strum(serialize = "TICKETVIEW.LOCATIONCIVICNO")]
    CivicNo,
    #[strum(serialize = "TICKETVIEW.LOCATIONDIRECTIONNAMEEN")]
    Direction,
    #[strum(serialize = "TICKETVIEW.LOCATIONSTREETNAME")]
    Street,
    #[strum(serialize = "TICKETVIEW.CLIENTID")]
    ClientId,
    #[strum(serialize = "TICKETVIEW.ISSERVEROWNER")]
    Server,
    #[strum(serialize = "TICKETVIEW.CLIENTSOFTWARE")]
    Software,
    #[strum(serialize = "TICKETVIEW.TICKETEXPORTDATE")]
    ExportDate,
}

/// Comparison operator of a predicate. The portal identifies each by a
/// small integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Is,
    Contains,
    LessOrEqual,
    GreaterOrEqual,
    Less,
    Greater,
    Between,
    IsNot,
    NotContains,
    IsNotNull,
    IsNull,
}

impl FilterOperator {
    /// The portal's numeric code for this operator.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Is => 1,
            Self::Contains => 3,
            Self::LessOrEqual => 5,
            Self::GreaterOrEqual => 6,
            Self::Less => 7,
            Self::Greater => 8,
            Self::Between => 9,
            Self::IsNot => 101,
            Self::NotContains => 102,
            Self::IsNotNull => 104,
            Self::IsNull => 201,
        }
    }
}

/// One search predicate: `field operator value1 [value2]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub field: SearchField,
    pub operator: FilterOperator,
    pub value1: String,
    pub value2: String,
}

impl SearchFilter {
    /// `field IS value`.
    #[must_use]
    pub fn is(field: SearchField, value: impl Into<String>) -> Self {
        Self {
            field,
            operator: FilterOperator::Is,
            value1: value.into(),
            value2: String::new(),
        }
    }

    /// `field BETWEEN low AND high`.
    #[must_use]
    pub fn between(field: SearchField, low: impl Into<String>, high: impl Into<String>) -> Self {
        Self {
            field,
            operator: FilterOperator::Between,
            value1: low.into(),
            value2: high.into(),
        }
    }

    /// Tickets whose infraction date is `date`.
    #[must_use]
    pub fn infraction_date(date: NaiveDate) -> Self {
        Self::is(
            SearchField::InfractionDate,
            date.format(PORTAL_DATE_FORMAT).to_string(),
        )
    }

    /// Tickets whose infraction date falls in `start..=end`.
    #[must_use]
    pub fn infraction_date_between(start: NaiveDate, end: NaiveDate) -> Self {
        Self::between(
            SearchField::InfractionDate,
            start.format(PORTAL_DATE_FORMAT).to_string(),
            end.format(PORTAL_DATE_FORMAT).to_string(),
        )
    }
}

/// Encodes `filters` as the portal's CSV export form.
#[must_use]
pub fn build_search_form(filters: &[SearchFilter]) -> Vec<(&'static str, String)> {
    let mut form = Vec::with_capacity(filters.len() * 4 + OUTPUT_COLUMNS.len() + 2);

    for filter in filters {
        form.push((FIELD_KEY, filter.field.as_ref().to_string()));
        form.push((OPERATOR_KEY, filter.operator.code().to_string()));
        form.push((VALUE1_KEY, filter.value1.clone()));
        form.push((VALUE2_KEY, filter.value2.clone()));
    }

    for column in OUTPUT_COLUMNS {
        form.push((COLUMNS_KEY, (*column).to_string()));
    }

    form.push((ORDER_KEY, "DESC".to_string()));
    form.push((EXPORT_MODE_KEY, CSV_EXPORT_MODE.to_string()));
    form
}
