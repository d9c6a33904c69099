//! Discount campaigns and coupon resolution.
//!
//! A campaign carries a percentage discount behind a generated coupon code
//! and is valid within an inclusive date window. Resolution is read-only:
//! the invoice lifecycle decides whether to apply the resolved amount.

use chrono::NaiveDate;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::error::{PosError, PosResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub discount_percentage: f64,
    pub code: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub is_active: bool,
}

/// Input for [`create_campaign`]. The coupon code is generated, never
/// user-supplied.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub description: Option<String>,
    pub discount_percentage: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

fn map_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
    Ok(Campaign {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        discount_percentage: row.get(3)?,
        code: row.get(4)?,
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        is_active: row.get::<_, i64>(7)? != 0,
    })
}

const CAMPAIGN_COLUMNS: &str =
    "id, name, description, discount_percentage, code, start_date, end_date, is_active";

/// Generate an 8-character uppercase coupon code.
fn generate_code() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_uppercase()
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Create a campaign with a freshly generated code.
pub fn create_campaign(db: &DbState, new: &NewCampaign) -> PosResult<Campaign> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(PosError::invalid_arg("campaign name must not be empty"));
    }
    if !new.discount_percentage.is_finite() || !(0.0..=100.0).contains(&new.discount_percentage) {
        return Err(PosError::invalid_arg(format!(
            "discount percentage must be between 0 and 100: {}",
            new.discount_percentage
        )));
    }
    if new.start_date > new.end_date {
        return Err(PosError::invalid_arg(format!(
            "campaign window is inverted: {} > {}",
            new.start_date, new.end_date
        )));
    }

    let code = generate_code();
    let conn = db.lock();
    conn.execute(
        "INSERT INTO campaigns (name, description, discount_percentage, code, start_date, end_date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            name,
            new.description,
            new.discount_percentage,
            code,
            new.start_date,
            new.end_date,
        ],
    )?;
    let id = conn.last_insert_rowid();

    info!(campaign_id = id, code = %code, pct = new.discount_percentage, "Campaign created");

    Ok(Campaign {
        id,
        name: name.to_string(),
        description: new.description.clone(),
        discount_percentage: new.discount_percentage,
        code,
        start_date: new.start_date,
        end_date: new.end_date,
        is_active: true,
    })
}

/// Resolve a coupon code against `today` and a subtotal.
///
/// Returns the discount amount (`subtotal × pct / 100`, unrounded —
/// rounding happens when the invoice persists). NotFound when no active
/// campaign carries the code; CampaignExpired when today falls outside the
/// inclusive `[start_date, end_date]` window. Read-only: nothing is applied
/// here.
pub fn resolve_discount(
    db: &DbState,
    code: &str,
    today: NaiveDate,
    subtotal: f64,
) -> PosResult<f64> {
    if !subtotal.is_finite() || subtotal < 0.0 {
        return Err(PosError::invalid_arg(format!(
            "subtotal must not be negative: {subtotal}"
        )));
    }

    let code = code.trim();
    let conn = db.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
         WHERE code = ?1 AND is_active = 1
         ORDER BY id"
    ))?;
    let matches = stmt
        .query_map(params![code], map_campaign)?
        .collect::<Result<Vec<_>, _>>()?;

    let campaign = match matches.first() {
        None => return Err(PosError::not_found(format!("campaign code {code}"))),
        Some(campaign) => {
            if matches.len() > 1 {
                // Uniqueness is a schema invariant; seeing this means legacy
                // data was imported past it. Pick the lowest id, loudly.
                warn!(
                    code = %code,
                    matches = matches.len(),
                    picked = campaign.id,
                    "duplicate campaign code; resolving to lowest id"
                );
            }
            campaign
        }
    };

    if today < campaign.start_date || today > campaign.end_date {
        return Err(PosError::CampaignExpired {
            code: code.to_string(),
        });
    }

    Ok(subtotal * (campaign.discount_percentage / 100.0))
}

/// Deactivate a campaign. Campaigns are never deleted.
pub fn deactivate_campaign(db: &DbState, id: i64) -> PosResult<()> {
    let conn = db.lock();
    let changed = conn.execute(
        "UPDATE campaigns SET is_active = 0 WHERE id = ?1",
        params![id],
    )?;
    if changed == 0 {
        return Err(PosError::not_found(format!("campaign {id}")));
    }
    info!(campaign_id = id, "Campaign deactivated");
    Ok(())
}

/// Active campaigns, newest window first.
pub fn list_active(db: &DbState) -> PosResult<Vec<Campaign>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns
         WHERE is_active = 1
         ORDER BY start_date DESC"
    ))?;
    let campaigns = stmt
        .query_map([], map_campaign)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(campaigns)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn spring_sale(db: &DbState, pct: f64, start: &str, end: &str) -> Campaign {
        create_campaign(
            db,
            &NewCampaign {
                name: "Spring Sale".to_string(),
                description: None,
                discount_percentage: pct,
                start_date: date(start),
                end_date: date(end),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_generated_code_shape() {
        let db = test_db();
        let campaign = spring_sale(&db, 20.0, "2024-03-01", "2024-03-31");
        assert_eq!(campaign.code.len(), 8);
        assert!(campaign
            .code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_resolve_active_campaign() {
        let db = test_db();
        let campaign = spring_sale(&db, 20.0, "2024-03-01", "2024-03-31");

        let discount =
            resolve_discount(&db, &campaign.code, date("2024-03-15"), 120.0).unwrap();
        assert_eq!(discount, 24.0);
    }

    #[test]
    fn test_window_is_inclusive() {
        let db = test_db();
        let campaign = spring_sale(&db, 10.0, "2024-03-01", "2024-03-31");

        assert!(resolve_discount(&db, &campaign.code, date("2024-03-01"), 100.0).is_ok());
        assert!(resolve_discount(&db, &campaign.code, date("2024-03-31"), 100.0).is_ok());
        assert!(matches!(
            resolve_discount(&db, &campaign.code, date("2024-02-29"), 100.0),
            Err(PosError::CampaignExpired { .. })
        ));
        assert!(matches!(
            resolve_discount(&db, &campaign.code, date("2024-04-01"), 100.0),
            Err(PosError::CampaignExpired { .. })
        ));
    }

    #[test]
    fn test_unknown_and_inactive_codes_are_not_found() {
        let db = test_db();
        let campaign = spring_sale(&db, 10.0, "2024-03-01", "2024-03-31");

        assert!(matches!(
            resolve_discount(&db, "NOPE1234", date("2024-03-15"), 100.0),
            Err(PosError::NotFound(_))
        ));

        deactivate_campaign(&db, campaign.id).unwrap();
        assert!(matches!(
            resolve_discount(&db, &campaign.code, date("2024-03-15"), 100.0),
            Err(PosError::NotFound(_))
        ));
    }

    #[test]
    fn test_resolver_has_no_side_effects() {
        let db = test_db();
        let campaign = spring_sale(&db, 20.0, "2024-03-01", "2024-03-31");

        resolve_discount(&db, &campaign.code, date("2024-03-15"), 120.0).unwrap();
        resolve_discount(&db, &campaign.code, date("2024-03-15"), 120.0).unwrap();

        let listed = list_active(&db).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].discount_percentage, 20.0);
    }

    #[test]
    fn test_create_campaign_validation() {
        let db = test_db();
        let mut bad = NewCampaign {
            name: "X".to_string(),
            description: None,
            discount_percentage: 120.0,
            start_date: date("2024-03-01"),
            end_date: date("2024-03-31"),
        };
        assert!(matches!(
            create_campaign(&db, &bad),
            Err(PosError::InvalidArgument(_))
        ));

        bad.discount_percentage = 10.0;
        bad.start_date = date("2024-04-01");
        assert!(matches!(
            create_campaign(&db, &bad),
            Err(PosError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_and_full_percentage() {
        let db = test_db();
        let free = spring_sale(&db, 100.0, "2024-03-01", "2024-03-31");
        assert_eq!(
            resolve_discount(&db, &free.code, date("2024-03-15"), 80.0).unwrap(),
            80.0
        );

        let nothing = spring_sale(&db, 0.0, "2024-03-01", "2024-03-31");
        assert_eq!(
            resolve_discount(&db, &nothing.code, date("2024-03-15"), 80.0).unwrap(),
            0.0
        );
    }
}
