//! Pricing catalog: salon services and cafe menu items.
//!
//! Reference data for billing. Items carry a unit price, an optional
//! duration, and the commission rate paid to the employee who performs
//! them. Items are never deleted, only deactivated, so historical service
//! records keep resolving.

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::{self, DbState};
use crate::error::{PosError, PosResult};

/// Which side of the business an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Salon,
    Cafe,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Salon => "salon",
            Section::Cafe => "cafe",
        }
    }

    pub fn parse(raw: &str) -> PosResult<Section> {
        match raw {
            "salon" => Ok(Section::Salon),
            "cafe" => Ok(Section::Cafe),
            other => Err(PosError::invalid_arg(format!("unknown section: {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
    pub section: Section,
    pub unit_price: f64,
    pub duration_minutes: Option<i64>,
    pub commission_rate: f64,
    pub is_active: bool,
}

/// Input for [`add_item`]. Validated before insertion.
#[derive(Debug, Clone)]
pub struct NewCatalogItem {
    pub name: String,
    pub section: Section,
    pub unit_price: f64,
    pub duration_minutes: Option<i64>,
    pub commission_rate: f64,
}

/// A structured `{id, label}` pair for UI pick lists. The UI passes the id
/// back; it never parses the label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: i64,
    pub label: String,
}

fn map_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<CatalogItem> {
    let section_raw: String = row.get(2)?;
    let section = Section::parse(&section_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(CatalogItem {
        id: row.get(0)?,
        name: row.get(1)?,
        section,
        unit_price: row.get(3)?,
        duration_minutes: row.get(4)?,
        commission_rate: row.get(5)?,
        is_active: row.get::<_, i64>(6)? != 0,
    })
}

const ITEM_COLUMNS: &str =
    "id, name, section, unit_price, duration_minutes, commission_rate, is_active";

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Add a catalog item.
pub fn add_item(db: &DbState, new: &NewCatalogItem) -> PosResult<CatalogItem> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(PosError::invalid_arg("item name must not be empty"));
    }
    if !new.unit_price.is_finite() || new.unit_price < 0.0 {
        return Err(PosError::invalid_arg(format!(
            "unit price must not be negative: {}",
            new.unit_price
        )));
    }
    if !new.commission_rate.is_finite() || !(0.0..=100.0).contains(&new.commission_rate) {
        return Err(PosError::invalid_arg(format!(
            "commission rate must be between 0 and 100: {}",
            new.commission_rate
        )));
    }
    if let Some(minutes) = new.duration_minutes {
        if minutes <= 0 {
            return Err(PosError::invalid_arg(format!(
                "duration must be positive: {minutes}"
            )));
        }
    }

    let conn = db.lock();
    conn.execute(
        "INSERT INTO catalog_items (name, section, unit_price, duration_minutes, commission_rate)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            name,
            new.section.as_str(),
            new.unit_price,
            new.duration_minutes,
            new.commission_rate,
        ],
    )?;
    let id = conn.last_insert_rowid();

    info!(item_id = id, name = %name, section = new.section.as_str(), "Catalog item added");

    Ok(CatalogItem {
        id,
        name: name.to_string(),
        section: new.section,
        unit_price: new.unit_price,
        duration_minutes: new.duration_minutes,
        commission_rate: new.commission_rate,
        is_active: true,
    })
}

/// Look up a catalog item by id (active or not).
pub fn get_item(db: &DbState, id: i64) -> PosResult<CatalogItem> {
    let conn = db.lock();
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM catalog_items WHERE id = ?1"),
        params![id],
        map_item,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            PosError::not_found(format!("catalog item {id}"))
        }
        other => other.into(),
    })
}

/// List active items in a section, ordered by name.
pub fn list_active(db: &DbState, section: Section) -> PosResult<Vec<CatalogItem>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM catalog_items
         WHERE section = ?1 AND is_active = 1
         ORDER BY name"
    ))?;
    let items = stmt
        .query_map(params![section.as_str()], map_item)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(items)
}

/// Deactivate an item. Items are never deleted.
pub fn deactivate_item(db: &DbState, id: i64) -> PosResult<()> {
    let conn = db.lock();
    let changed = conn.execute(
        "UPDATE catalog_items SET is_active = 0 WHERE id = ?1",
        params![id],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format!("catalog item {id}")));
    }
    info!(item_id = id, "Catalog item deactivated");
    Ok(())
}

/// Active items as `{id, label}` pairs for the UI's pick list. The label
/// carries the item name, price, and configured currency.
pub fn choices(db: &DbState, section: Section) -> PosResult<Vec<Choice>> {
    let conn = db.lock();
    let currency =
        db::get_setting(&conn, "business", "currency").unwrap_or_else(|| "Toman".to_string());
    let mut stmt = conn.prepare(
        "SELECT id, name, unit_price FROM catalog_items
         WHERE section = ?1 AND is_active = 1
         ORDER BY name",
    )?;
    let choices = stmt
        .query_map(params![section.as_str()], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let price: f64 = row.get(2)?;
            Ok(Choice {
                id,
                label: format!("{name} ({price:.2} {currency})"),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(choices)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn haircut() -> NewCatalogItem {
        NewCatalogItem {
            name: "Haircut".to_string(),
            section: Section::Salon,
            unit_price: 25.0,
            duration_minutes: Some(30),
            commission_rate: 18.0,
        }
    }

    #[test]
    fn test_add_and_get_item() {
        let db = test_db();
        let added = add_item(&db, &haircut()).unwrap();
        let fetched = get_item(&db, added.id).unwrap();
        assert_eq!(fetched.name, "Haircut");
        assert_eq!(fetched.section, Section::Salon);
        assert_eq!(fetched.unit_price, 25.0);
        assert_eq!(fetched.commission_rate, 18.0);
        assert!(fetched.is_active);
    }

    #[test]
    fn test_add_item_validation() {
        let db = test_db();
        let mut bad = haircut();
        bad.name = "   ".to_string();
        assert!(matches!(
            add_item(&db, &bad),
            Err(PosError::InvalidArgument(_))
        ));

        let mut bad = haircut();
        bad.unit_price = -1.0;
        assert!(matches!(
            add_item(&db, &bad),
            Err(PosError::InvalidArgument(_))
        ));

        let mut bad = haircut();
        bad.commission_rate = 101.0;
        assert!(matches!(
            add_item(&db, &bad),
            Err(PosError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_get_item_not_found() {
        let db = test_db();
        assert!(matches!(get_item(&db, 999), Err(PosError::NotFound(_))));
    }

    #[test]
    fn test_deactivate_hides_from_listing_but_not_lookup() {
        let db = test_db();
        let added = add_item(&db, &haircut()).unwrap();

        deactivate_item(&db, added.id).unwrap();

        let listed = list_active(&db, Section::Salon).unwrap();
        assert!(listed.is_empty());

        // Historical lookups still resolve
        let fetched = get_item(&db, added.id).unwrap();
        assert!(!fetched.is_active);
    }

    #[test]
    fn test_choices_are_structured_pairs() {
        let db = test_db();
        let added = add_item(&db, &haircut()).unwrap();
        add_item(
            &db,
            &NewCatalogItem {
                name: "Espresso".to_string(),
                section: Section::Cafe,
                unit_price: 4.5,
                duration_minutes: None,
                commission_rate: 0.0,
            },
        )
        .unwrap();

        let salon = choices(&db, Section::Salon).unwrap();
        assert_eq!(salon.len(), 1);
        assert_eq!(salon[0].id, added.id);
        assert_eq!(salon[0].label, "Haircut (25.00 Toman)");
    }

    #[test]
    fn test_sections_are_separated() {
        let db = test_db();
        add_item(&db, &haircut()).unwrap();
        assert!(list_active(&db, Section::Cafe).unwrap().is_empty());
        assert_eq!(list_active(&db, Section::Salon).unwrap().len(), 1);
    }
}
