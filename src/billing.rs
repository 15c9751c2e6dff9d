// src/billing.rs
//
// Purchase ledger and payment reconciliation.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::config::Config;
use crate::db;
use crate::error::AppError;
use crate::gateway::{CheckoutGateway, CheckoutSessionRequest};
use crate::models::{Course, Principal};

/// Price after a percentage discount, rounded half-up to whole cents.
pub fn compute_amount(price: Decimal, discount: Decimal) -> Decimal {
    let hundred = Decimal::ONE_HUNDRED;
    (price - discount * price / hundred)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Amount in the smallest currency unit, as checkout providers expect it.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
}

#[derive(Debug, Clone)]
pub struct PurchaseInitiated {
    pub purchase_id: Uuid,
    pub checkout_url: String,
}

/// Records a pending purchase at the course's current discounted price and
/// opens a checkout session for it.
///
/// The pending row is written before the provider is called, so a gateway
/// failure leaves an orphaned pending row behind. It has no effect until a
/// payment for it is reconciled.
pub async fn initiate_purchase(
    pool: &PgPool,
    gateway: &dyn CheckoutGateway,
    config: &Config,
    principal: Principal,
    course_id: Uuid,
) -> Result<PurchaseInitiated, AppError> {
    let user = db::get_user(pool, principal.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    let course = fetch_course(pool, course_id).await?;

    let amount = compute_amount(course.course_price, course.discount);
    let unit_amount = to_minor_units(amount)
        .ok_or_else(|| AppError::Internal(format!("amount {amount} out of range")))?;

    let purchase = db::insert_pending_purchase(pool, user.id, course.id, amount).await?;

    let session = gateway
        .create_session(CheckoutSessionRequest {
            currency: config.checkout_currency.clone(),
            unit_amount,
            product_name: course.course_title.clone(),
            quantity: 1,
            success_url: format!(
                "{}/success?session_id={{CHECKOUT_SESSION_ID}}&course_id={}",
                config.frontend_url, course.id
            ),
            cancel_url: format!("{}/cancel", config.frontend_url),
            client_reference: purchase.id.to_string(),
        })
        .await
        .map_err(|e| {
            log::error!(
                "checkout session create failed purchase_id={} user_id={}: {e}",
                purchase.id,
                user.id
            );
            AppError::from(e)
        })?;

    log::info!(
        "purchase initiated purchase_id={} user_id={} course_id={} amount={} session_id={}",
        purchase.id,
        user.id,
        course.id,
        amount,
        session.id
    );

    Ok(PurchaseInitiated {
        purchase_id: purchase.id,
        checkout_url: session.url,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// A completed row already existed; nothing was written.
    AlreadyCompleted(Uuid),
    /// A pending row was flipped to completed.
    Completed(Uuid),
    /// No pending row was left for the pair; a completed one was inserted.
    Inserted(Uuid),
}

impl LedgerOutcome {
    pub fn purchase_id(self) -> Uuid {
        match self {
            Self::AlreadyCompleted(id) | Self::Completed(id) | Self::Inserted(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciled {
    pub newly_enrolled: bool,
    pub ledger: LedgerOutcome,
}

/// Confirms a checkout session with the provider and, once it is paid,
/// enrolls the principal and completes the purchase.
///
/// The session's client reference must name a purchase that belongs to the
/// principal and `course_id`; otherwise a paid session for one course could
/// be replayed to enroll in another.
pub async fn reconcile_purchase(
    pool: &PgPool,
    gateway: &dyn CheckoutGateway,
    principal: Principal,
    session_id: &str,
    course_id: Uuid,
) -> Result<Reconciled, AppError> {
    if !is_session_id(session_id) {
        return Err(AppError::validation("Session ID is invalid"));
    }

    let session = gateway.get_session(session_id).await.map_err(|e| {
        log::error!("checkout session lookup failed session_id={session_id}: {e}");
        AppError::from(e)
    })?;

    if !session.is_paid() {
        log::info!(
            "payment not completed session_id={} status={}",
            session_id,
            session.payment_status
        );
        return Err(AppError::PaymentIncomplete);
    }

    let reference = session
        .client_reference
        .as_deref()
        .ok_or_else(|| AppError::validation("Checkout session has no purchase reference"))?;

    let mismatch = || AppError::forbidden("Checkout session does not match this purchase");
    let purchase_id = Uuid::parse_str(reference).map_err(|_| mismatch())?;
    let purchase = {
        let mut conn = pool.acquire().await?;
        db::get_purchase(&mut conn, purchase_id).await?
    }
    .ok_or_else(mismatch)?;

    if purchase.user_id != principal.user_id || purchase.course_id != course_id {
        log::warn!(
            "session reference mismatch session_id={} purchase_id={} principal={} course_id={}",
            session_id,
            purchase.id,
            principal.user_id,
            course_id
        );
        return Err(mismatch());
    }

    apply_paid_purchase(pool, principal.user_id, course_id, Some(purchase.id)).await
}

/// Checkout session ids are opaque provider tokens such as `cs_test_a1B2`.
fn is_session_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= 255
        && raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Reconciles a purchase the provider reported as paid through its webhook.
/// Returns `None` when the reference names no purchase in the ledger.
pub async fn reconcile_paid_reference(
    pool: &PgPool,
    purchase_id: Uuid,
) -> Result<Option<Reconciled>, AppError> {
    let purchase = {
        let mut conn = pool.acquire().await?;
        db::get_purchase(&mut conn, purchase_id).await?
    };

    let Some(purchase) = purchase else {
        return Ok(None);
    };

    apply_paid_purchase(pool, purchase.user_id, purchase.course_id, Some(purchase.id))
        .await
        .map(Some)
}

/// Enrollment and ledger completion as one transaction. Concurrent calls for
/// the same pair are serialized by an advisory lock, so the pair ends up with
/// exactly one enrollment row and one completed purchase.
async fn apply_paid_purchase(
    pool: &PgPool,
    user_id: Uuid,
    course_id: Uuid,
    reference: Option<Uuid>,
) -> Result<Reconciled, AppError> {
    let user = db::get_user(pool, user_id)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;
    let course = fetch_course(pool, course_id).await?;

    let mut tx = pool.begin().await?;
    db::lock_purchase_pair(&mut tx, user.id, course.id).await?;

    let newly_enrolled = db::enroll_user(&mut tx, user.id, course.id).await?;
    let ledger = settle_ledger(&mut tx, user.id, &course, reference).await?;

    tx.commit().await?;

    log::info!(
        "purchase reconciled user_id={} course_id={} ledger={:?} newly_enrolled={}",
        user.id,
        course.id,
        ledger,
        newly_enrolled
    );

    Ok(Reconciled {
        newly_enrolled,
        ledger,
    })
}

async fn settle_ledger(
    conn: &mut PgConnection,
    user_id: Uuid,
    course: &Course,
    reference: Option<Uuid>,
) -> Result<LedgerOutcome, sqlx::Error> {
    if let Some(id) = db::find_completed_purchase(conn, user_id, course.id).await? {
        return Ok(LedgerOutcome::AlreadyCompleted(id));
    }

    if let Some(id) = reference {
        if db::complete_purchase(conn, id).await? {
            return Ok(LedgerOutcome::Completed(id));
        }
    }

    if let Some(id) = db::latest_pending_purchase(conn, user_id, course.id).await? {
        if db::complete_purchase(conn, id).await? {
            return Ok(LedgerOutcome::Completed(id));
        }
    }

    let amount = compute_amount(course.course_price, course.discount);
    let id = db::insert_completed_purchase(conn, user_id, course.id, amount).await?;
    Ok(LedgerOutcome::Inserted(id))
}

async fn fetch_course(pool: &PgPool, course_id: Uuid) -> Result<Course, AppError> {
    let mut conn = pool.acquire().await?;
    db::get_course(&mut conn, course_id)
        .await?
        .ok_or_else(|| AppError::not_found("Course not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn session_ids_are_plain_tokens() {
        assert!(is_session_id("cs_test_a1B2c3"));
        assert!(!is_session_id(""));
        assert!(!is_session_id("cs_test/../customers"));
        assert!(!is_session_id("cs_test?expand=all"));
        assert!(!is_session_id(&"a".repeat(256)));
    }

    #[test]
    fn discount_is_a_percentage_of_price() {
        assert_eq!(compute_amount(dec!(100), dec!(25)), dec!(75.00));
        assert_eq!(compute_amount(dec!(49.99), dec!(0)), dec!(49.99));
        assert_eq!(compute_amount(dec!(49.99), dec!(100)), dec!(0.00));
    }

    #[test]
    fn amount_rounds_half_up_to_cents() {
        // 19.99 * 0.85 = 16.9915
        assert_eq!(compute_amount(dec!(19.99), dec!(15)), dec!(16.99));
        // 10.05 * 0.5 = 5.025
        assert_eq!(compute_amount(dec!(10.05), dec!(50)), dec!(5.03));
        // 0.01 * 0.5 = 0.005
        assert_eq!(compute_amount(dec!(0.01), dec!(50)), dec!(0.01));
    }

    #[test]
    fn minor_units_are_cents() {
        assert_eq!(to_minor_units(dec!(75.00)), Some(7500));
        assert_eq!(to_minor_units(dec!(16.99)), Some(1699));
        assert_eq!(to_minor_units(dec!(0)), Some(0));
    }

    #[test]
    fn ledger_outcome_exposes_row_id() {
        let id = Uuid::new_v4();
        assert_eq!(LedgerOutcome::AlreadyCompleted(id).purchase_id(), id);
        assert_eq!(LedgerOutcome::Inserted(id).purchase_id(), id);
    }
}
