//! Column resolution and cell parsing
//!
//! Headers are resolved in three passes: explicit hints, the alias table
//! (exact match before substring match), then content sniffing.

use super::AliasTable;
use crate::error::SchemaError;
use crate::models::{ColumnHints, ColumnMapping, RawTable};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%m/%d/%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// Parse a calendar day from the formats seen in spreadsheet exports
pub fn parse_date(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }

    // Compact yyyymmdd; chrono's %Y is not fixed-width
    if cell.len() == 8 && cell.bytes().all(|b| b.is_ascii_digit()) {
        let year = cell[0..4].parse().ok()?;
        let month = cell[4..6].parse().ok()?;
        let day = cell[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(cell, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(cell, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(cell)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Parse a non-negative finite quantity; anything else is treated as missing
pub fn parse_quantity(cell: &str) -> Option<f64> {
    let cleaned: String = cell
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}

fn is_date(cell: &str) -> bool {
    parse_date(cell).is_some()
}

fn is_numeric(cell: &str) -> bool {
    let cleaned: String = cell.trim().chars().filter(|c| *c != ',').collect();
    cleaned.parse::<f64>().is_ok()
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    Date,
    Item,
    Quantity,
}

impl Field {
    fn label(self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::Item => "item",
            Field::Quantity => "quantity",
        }
    }

    fn accepts(self) -> fn(&str) -> bool {
        match self {
            Field::Date => is_date,
            Field::Item => |cell| !cell.trim().is_empty(),
            Field::Quantity => is_numeric,
        }
    }
}

/// Resolved column indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndices {
    pub date: usize,
    pub item: Option<usize>,
    pub quantity: usize,
}

impl ColumnIndices {
    pub fn to_mapping(self, headers: &[String]) -> ColumnMapping {
        ColumnMapping {
            date: headers[self.date].clone(),
            item: self.item.map(|i| headers[i].clone()),
            quantity: headers[self.quantity].clone(),
        }
    }
}

pub struct ColumnResolver<'a> {
    aliases: &'a AliasTable,
    content_match_ratio: f64,
}

impl<'a> ColumnResolver<'a> {
    pub fn new(aliases: &'a AliasTable, content_match_ratio: f64) -> Self {
        Self {
            aliases,
            content_match_ratio,
        }
    }

    pub fn resolve(&self, table: &RawTable, hints: &ColumnHints) -> Result<ColumnIndices, SchemaError> {
        let headers: Vec<String> = table
            .headers
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let mut claimed: Vec<Option<usize>> = vec![None; 3];
        let fields = [Field::Date, Field::Item, Field::Quantity];

        for (slot, (field, hint)) in fields
            .iter()
            .zip([&hints.date, &hints.item, &hints.quantity])
            .enumerate()
        {
            if let Some(hint) = hint {
                let wanted = hint.trim().to_lowercase();
                let index = headers.iter().position(|h| *h == wanted).ok_or_else(|| {
                    SchemaError::UnknownColumn {
                        field: field.label(),
                        hint: hint.clone(),
                    }
                })?;
                claimed[slot] = Some(index);
            }
        }

        // Exact alias matches for every field first, so a substring hit for one
        // field cannot steal a column another field names exactly. Date and
        // quantity candidates must also hold parseable content; the first
        // name-only hit is kept as a last resort.
        let mut fallback: Vec<Option<usize>> = vec![None; 3];
        for exact in [true, false] {
            for (slot, field) in fields.iter().enumerate() {
                if claimed[slot].is_some() {
                    continue;
                }
                let taken: Vec<usize> = claimed.iter().flatten().copied().collect();
                let candidates = self.match_alias(&headers, *field, &taken, exact);
                claimed[slot] = match field {
                    Field::Item => candidates.first().copied(),
                    Field::Date | Field::Quantity => {
                        let found = candidates
                            .iter()
                            .copied()
                            .find(|&index| self.content_matches(table, index, field.accepts()));
                        if found.is_none() && fallback[slot].is_none() {
                            fallback[slot] = candidates.first().copied();
                        }
                        found
                    }
                };
            }
        }

        for slot in [0, 2] {
            if claimed[slot].is_none() {
                let taken: Vec<usize> = claimed.iter().flatten().copied().collect();
                claimed[slot] = self
                    .sniff(table, &taken, fields[slot].accepts())
                    .or_else(|| fallback[slot].filter(|index| !taken.contains(index)));
            }
        }

        let unresolved = |field: Field| SchemaError::UnresolvedColumn {
            field: field.label(),
            headers: table.headers.clone(),
        };

        Ok(ColumnIndices {
            date: claimed[0].ok_or_else(|| unresolved(Field::Date))?,
            item: claimed[1],
            quantity: claimed[2].ok_or_else(|| unresolved(Field::Quantity))?,
        })
    }

    /// Unclaimed columns whose header matches one of the field's aliases
    fn match_alias(&self, headers: &[String], field: Field, taken: &[usize], exact: bool) -> Vec<usize> {
        let aliases = match field {
            Field::Date => &self.aliases.date,
            Field::Item => &self.aliases.item,
            Field::Quantity => &self.aliases.quantity,
        };

        headers
            .iter()
            .enumerate()
            .filter(|(index, _)| !taken.contains(index))
            .filter_map(|(index, header)| {
                let hit = aliases.iter().any(|alias| {
                    let alias = alias.to_lowercase();
                    if exact {
                        *header == alias
                    } else {
                        header.contains(&alias)
                    }
                });
                hit.then_some(index)
            })
            .collect()
    }

    /// First unclaimed column whose non-empty cells mostly satisfy `accepts`
    fn sniff(&self, table: &RawTable, taken: &[usize], accepts: fn(&str) -> bool) -> Option<usize> {
        (0..table.headers.len())
            .filter(|index| !taken.contains(index))
            .find(|&index| self.content_matches(table, index, accepts))
    }

    fn content_matches(&self, table: &RawTable, index: usize, accepts: fn(&str) -> bool) -> bool {
        let (mut total, mut hits) = (0usize, 0usize);
        for cell in table.column(index).filter(|c| !c.trim().is_empty()) {
            total += 1;
            if accepts(cell) {
                hits += 1;
            }
        }
        total > 0 && hits as f64 / total as f64 > self.content_match_ratio
    }
}
