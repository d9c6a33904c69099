//! Unified invoicing and the cashier payment flow.
//!
//! An invoice starts Open and accumulates line items in memory — salon
//! services, cafe orders, closed gaming sessions, or ad-hoc amounts. At
//! most one discount applies (re-applying overwrites). Finalize freezes
//! subtotal/discount/final and persists the row; pay is the separate
//! terminal transition that records the payment method and is the only
//! path that mutates the customer ledger.
//!
//! `Open → Finalized → Paid`, no transition skips a state. Paying anything
//! but a Finalized invoice is an error and mutates nothing — enforced on
//! the in-memory state and again on the persisted paid flag, so a stale
//! handle cannot double-pay.

use chrono::NaiveDate;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::campaigns;
use crate::catalog::Section;
use crate::clock::Clock;
use crate::customers;
use crate::db::DbState;
use crate::error::{PosError, PosResult};
use crate::round2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineItemKind {
    SalonService,
    CafeOrder,
    GamnetSession,
    AdHoc,
}

impl From<Section> for LineItemKind {
    fn from(section: Section) -> Self {
        match section {
            Section::Salon => LineItemKind::SalonService,
            Section::Cafe => LineItemKind::CafeOrder,
        }
    }
}

/// One billable component of an invoice. Exists in memory only until the
/// invoice is finalized, then persists inside the invoice row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub kind: LineItemKind,
    pub description: String,
    pub amount: f64,
}

impl LineItem {
    pub fn new(kind: LineItemKind, description: impl Into<String>, amount: f64) -> PosResult<Self> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(PosError::invalid_arg(format!(
                "line item amount must not be negative: {amount}"
            )));
        }
        Ok(LineItem {
            kind,
            description: description.into(),
            amount,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::Card => "Card",
            PaymentMethod::Wallet => "Wallet",
        }
    }

    pub fn parse(raw: &str) -> PosResult<PaymentMethod> {
        match raw {
            "Cash" => Ok(PaymentMethod::Cash),
            "Card" => Ok(PaymentMethod::Card),
            "Wallet" => Ok(PaymentMethod::Wallet),
            other => Err(PosError::invalid_arg(format!(
                "unknown payment method: {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceState {
    Open,
    Finalized,
    Paid,
}

/// An invoice moving through `Open → Finalized → Paid`.
///
/// Fields are private; every mutation goes through the state-checked
/// methods below.
#[derive(Debug, Clone)]
pub struct Invoice {
    id: Option<i64>,
    customer_id: i64,
    items: Vec<LineItem>,
    discount_amount: f64,
    campaign_code: Option<String>,
    payment_method: Option<PaymentMethod>,
    state: InvoiceState,
    // Frozen at finalize; meaningless while Open.
    subtotal: f64,
    final_amount: f64,
}

impl Invoice {
    /// Start assembling an invoice for a customer.
    pub fn open(customer_id: i64) -> Invoice {
        Invoice {
            id: None,
            customer_id,
            items: Vec::new(),
            discount_amount: 0.0,
            campaign_code: None,
            payment_method: None,
            state: InvoiceState::Open,
            subtotal: 0.0,
            final_amount: 0.0,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn customer_id(&self) -> i64 {
        self.customer_id
    }

    pub fn state(&self) -> InvoiceState {
        self.state
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn discount_amount(&self) -> f64 {
        self.discount_amount
    }

    pub fn campaign_code(&self) -> Option<&str> {
        self.campaign_code.as_deref()
    }

    pub fn payment_method(&self) -> Option<PaymentMethod> {
        self.payment_method
    }

    /// Sum of line item amounts. Live while Open, frozen afterwards.
    pub fn subtotal(&self) -> f64 {
        match self.state {
            InvoiceState::Open => self.items.iter().map(|item| item.amount).sum(),
            _ => self.subtotal,
        }
    }

    /// Amount payable: subtotal minus the discount, never negative.
    pub fn final_amount(&self) -> f64 {
        match self.state {
            InvoiceState::Open => {
                let subtotal = self.subtotal();
                (subtotal - self.discount_amount.min(subtotal)).max(0.0)
            }
            _ => self.final_amount,
        }
    }

    // -----------------------------------------------------------------
    // Open-state mutations
    // -----------------------------------------------------------------

    /// Append a line item.
    pub fn add_line_item(&mut self, item: LineItem) -> PosResult<()> {
        if self.state != InvoiceState::Open {
            return Err(PosError::invalid_state(format!(
                "cannot add line items to a {:?} invoice",
                self.state
            )));
        }
        self.items.push(item);
        Ok(())
    }

    /// Apply a discount amount, replacing any previously applied discount.
    /// Discounts never stack.
    pub fn apply_discount(&mut self, amount: f64) -> PosResult<()> {
        if self.state != InvoiceState::Open {
            return Err(PosError::invalid_state(format!(
                "cannot discount a {:?} invoice",
                self.state
            )));
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(PosError::invalid_arg(format!(
                "discount must not be negative: {amount}"
            )));
        }
        let subtotal = self.subtotal();
        if amount > subtotal {
            return Err(PosError::invalid_arg(format!(
                "discount {amount:.2} exceeds subtotal {subtotal:.2}"
            )));
        }
        self.discount_amount = amount;
        Ok(())
    }

    /// Resolve a coupon code and apply the resulting discount. On NotFound
    /// or CampaignExpired the invoice is left untouched.
    pub fn apply_campaign(
        &mut self,
        db: &DbState,
        clock: &dyn Clock,
        code: &str,
    ) -> PosResult<f64> {
        if self.state != InvoiceState::Open {
            return Err(PosError::invalid_state(format!(
                "cannot discount a {:?} invoice",
                self.state
            )));
        }
        let amount = campaigns::resolve_discount(db, code, clock.today(), self.subtotal())?;
        self.apply_discount(amount)?;
        self.campaign_code = Some(code.trim().to_string());
        Ok(amount)
    }

    // -----------------------------------------------------------------
    // Finalize
    // -----------------------------------------------------------------

    /// Freeze the totals and persist the invoice row. Requires at least one
    /// line item. Amounts are rounded to two decimals here, at the point of
    /// persistence.
    pub fn finalize(&mut self, db: &DbState, clock: &dyn Clock) -> PosResult<i64> {
        if self.state != InvoiceState::Open {
            return Err(PosError::invalid_state(format!(
                "cannot finalize a {:?} invoice",
                self.state
            )));
        }
        if self.items.is_empty() {
            return Err(PosError::EmptyInvoice);
        }

        let subtotal = round2(self.subtotal());
        let discount = round2(self.discount_amount.min(subtotal));
        let final_amount = round2((subtotal - discount).max(0.0));

        let line_items = serde_json::to_string(&self.items)
            .map_err(|e| PosError::invalid_arg(format!("line items not serializable: {e}")))?;

        let conn = db.lock();
        conn.execute(
            "INSERT INTO invoices
                (customer_id, invoice_date, line_items, subtotal, discount_amount,
                 final_amount, campaign_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                self.customer_id,
                clock.now(),
                line_items,
                subtotal,
                discount,
                final_amount,
                self.campaign_code,
            ],
        )?;
        let id = conn.last_insert_rowid();

        self.id = Some(id);
        self.subtotal = subtotal;
        self.discount_amount = discount;
        self.final_amount = final_amount;
        self.state = InvoiceState::Finalized;

        info!(
            invoice_id = id,
            customer_id = self.customer_id,
            subtotal,
            discount,
            final_amount,
            "Invoice finalized"
        );

        Ok(id)
    }

    // -----------------------------------------------------------------
    // Pay
    // -----------------------------------------------------------------

    /// Record payment and apply the customer ledger, atomically.
    ///
    /// Wallet payments require sufficient balance and deduct it by relative
    /// delta. The ledger updater runs exactly once, inside the same
    /// transaction. The persisted paid flag is re-checked in the UPDATE, so
    /// a second handle to the same invoice cannot pay it twice.
    pub fn pay(&mut self, db: &DbState, clock: &dyn Clock, method: PaymentMethod) -> PosResult<()> {
        match self.state {
            InvoiceState::Finalized => {}
            InvoiceState::Open => {
                return Err(PosError::invalid_state(
                    "cannot pay an invoice that was never finalized",
                ))
            }
            InvoiceState::Paid => {
                return Err(PosError::invalid_state("invoice is already paid"));
            }
        }
        let id = self
            .id
            .ok_or_else(|| PosError::invalid_state("finalized invoice has no id"))?;

        let conn = db.lock();
        let now = clock.now();
        let today = clock.today();

        conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> PosResult<()> {
            let changed = conn.execute(
                "UPDATE invoices SET is_paid = 1, payment_method = ?1, paid_at = ?2
                 WHERE id = ?3 AND is_paid = 0",
                params![method.as_str(), now, id],
            )?;
            if changed == 0 {
                return Err(PosError::invalid_state(format!(
                    "invoice {id} is already paid"
                )));
            }

            if method == PaymentMethod::Wallet {
                let balance: f64 = conn.query_row(
                    "SELECT wallet_balance FROM customers WHERE id = ?1",
                    params![self.customer_id],
                    |row| row.get(0),
                )?;
                if balance < self.final_amount {
                    return Err(PosError::InsufficientFunds {
                        required: self.final_amount,
                        available: balance,
                    });
                }
                conn.execute(
                    "UPDATE customers SET wallet_balance = wallet_balance - ?1 WHERE id = ?2",
                    params![self.final_amount, self.customer_id],
                )?;
            }

            customers::apply_payment_tx(&conn, self.customer_id, self.final_amount, today, Some(id))?;
            Ok(())
        })();

        match result {
            Ok(()) => conn.execute_batch("COMMIT")?,
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK");
                return Err(e);
            }
        }

        self.payment_method = Some(method);
        self.state = InvoiceState::Paid;

        info!(
            invoice_id = id,
            method = method.as_str(),
            amount = self.final_amount,
            "Invoice paid"
        );

        Ok(())
    }

    // -----------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------

    /// Rehydrate a persisted invoice (Finalized or Paid).
    pub fn load(db: &DbState, id: i64) -> PosResult<Invoice> {
        let conn = db.lock();
        let (customer_id, line_items, subtotal, discount, final_amount, campaign_code, method, is_paid): (
            i64,
            String,
            f64,
            f64,
            f64,
            Option<String>,
            Option<String>,
            i64,
        ) = conn
            .query_row(
                "SELECT customer_id, line_items, subtotal, discount_amount, final_amount,
                        campaign_code, payment_method, is_paid
                 FROM invoices WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    PosError::not_found(format!("invoice {id}"))
                }
                other => other.into(),
            })?;

        let items: Vec<LineItem> = serde_json::from_str(&line_items)
            .map_err(|e| PosError::invalid_arg(format!("stored line items malformed: {e}")))?;
        let payment_method = method.as_deref().map(PaymentMethod::parse).transpose()?;

        Ok(Invoice {
            id: Some(id),
            customer_id,
            items,
            discount_amount: discount,
            campaign_code,
            payment_method,
            state: if is_paid != 0 {
                InvoiceState::Paid
            } else {
                InvoiceState::Finalized
            },
            subtotal,
            final_amount,
        })
    }
}

// ---------------------------------------------------------------------------
// Cashier flow
// ---------------------------------------------------------------------------

/// Look up a finalized invoice by id and pay it.
pub fn pay_invoice(
    db: &DbState,
    clock: &dyn Clock,
    invoice_id: i64,
    method: PaymentMethod,
) -> PosResult<Invoice> {
    let mut invoice = Invoice::load(db, invoice_id)?;
    invoice.pay(db, clock, method)?;
    Ok(invoice)
}

/// One row of the invoice-history listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub id: i64,
    pub customer_name: String,
    pub customer_phone: String,
    pub final_amount: f64,
    pub payment_method: Option<String>,
    pub is_paid: bool,
}

/// Invoices issued on a given day, newest first.
pub fn invoices_for_day(db: &DbState, date: NaiveDate) -> PosResult<Vec<InvoiceSummary>> {
    let conn = db.lock();
    let mut stmt = conn.prepare(
        "SELECT i.id, c.name, c.phone, i.final_amount, i.payment_method, i.is_paid
         FROM invoices i
         JOIN customers c ON i.customer_id = c.id
         WHERE substr(i.invoice_date, 1, 10) = ?1
         ORDER BY i.invoice_date DESC",
    )?;
    let summaries = stmt
        .query_map(params![date.to_string()], |row| {
            Ok(InvoiceSummary {
                id: row.get(0)?,
                customer_name: row.get(1)?,
                customer_phone: row.get(2)?,
                final_amount: row.get(3)?,
                payment_method: row.get(4)?,
                is_paid: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(summaries)
}

// ===========================================================================
// Tests
// ===========================================================================
