use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::{
    audit::AuditEvent,
    domain::{NewPayment, Offer, OfferId, UserId},
    errors::Error,
    messaging::types::{Invoice, PaymentSucceeded, PreCheckout},
    session::{Session, TransitionError, Trigger},
    texts, Result,
};

use super::Pipeline;

const CONFIRM_ATTEMPTS: usize = 3;
const TEST_CHARGE_ID: &str = "test_payment";

/// Invoice payload: `offer:<offer_id>:<user_id>:<unix_ts>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvoicePayload {
    pub offer_id: OfferId,
    pub user_id: UserId,
    pub issued_at: i64,
}

impl InvoicePayload {
    pub fn new(offer_id: OfferId, user_id: UserId, issued_at: DateTime<Utc>) -> Self {
        Self {
            offer_id,
            user_id,
            issued_at: issued_at.timestamp(),
        }
    }
}

impl fmt::Display for InvoicePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "offer:{}:{}:{}",
            self.offer_id.0, self.user_id.0, self.issued_at
        )
    }
}

impl FromStr for InvoicePayload {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::Validation(format!("malformed invoice payload: {s:?}"));
        let mut parts = s.split(':');
        if parts.next() != Some("offer") {
            return Err(bad());
        }
        let mut next_i64 = || -> Result<i64> {
            parts
                .next()
                .and_then(|p| p.parse::<i64>().ok())
                .ok_or_else(bad)
        };
        let offer_id = OfferId(next_i64()?);
        let user_id = UserId(next_i64()?);
        let issued_at = next_i64()?;
        if parts.next().is_some() {
            return Err(bad());
        }
        Ok(Self {
            offer_id,
            user_id,
            issued_at,
        })
    }
}

impl Pipeline {
    /// "Pay" pressed: move to AwaitingPayment and send the invoice.
    pub(super) async fn request_payment(&self, session: Session, offer_id: OfferId) -> Result<()> {
        let user = session.user_id;
        let offer = match self.store.offer(offer_id).await? {
            Some(o) if o.active => o,
            _ => {
                self.reply(user, texts::TOPIC_NOT_FOUND).await?;
                return Ok(());
            }
        };

        let next = match session.apply(Trigger::RequestPayment(offer.id), self.clock.now()) {
            Ok(next) => next,
            Err(TransitionError::UnexpectedState { .. }) => {
                self.reply(user, texts::PAID_IN_PROGRESS).await?;
                return Ok(());
            }
            Err(e) => return Err(Error::Validation(e.to_string())),
        };
        if !self.commit(&session, &next).await? {
            self.reply(user, texts::ALREADY_HANDLED).await?;
            return Ok(());
        }

        let invoice = Invoice {
            title: texts::INVOICE_TITLE.to_string(),
            description: texts::invoice_description(offer.duration_days, &offer.title),
            payload: InvoicePayload::new(offer.id, user, self.clock.now()).to_string(),
            currency: self.settings.currency.clone(),
            price_label: texts::INVOICE_PRICE_LABEL.to_string(),
            amount: offer.price,
        };
        if let Err(e) = self.messenger.send_invoice(user.chat(), &invoice).await {
            self.roll_back(&session, &next).await;
            return Err(e);
        }
        info!(user_id = user.0, offer_id = offer.id.0, amount = offer.price, "invoice sent");
        Ok(())
    }

    /// Approve only checkouts that still match an active offer at its current price.
    pub(super) async fn on_pre_checkout(&self, q: PreCheckout) -> Result<()> {
        let verdict = match self.check_pre_checkout(&q).await {
            Ok(()) => Ok(()),
            Err(reason) => {
                warn!(user_id = q.from.0, payload = %q.payload, reason, "pre-checkout declined");
                Err(texts::PRE_CHECKOUT_UNAVAILABLE.to_string())
            }
        };
        self.messenger.answer_pre_checkout(&q.query_id, verdict).await
    }

    async fn check_pre_checkout(&self, q: &PreCheckout) -> std::result::Result<(), &'static str> {
        let payload: InvoicePayload = q.payload.parse().map_err(|_| "malformed payload")?;
        if payload.user_id != q.from {
            return Err("payer mismatch");
        }
        let offer = match self.store.offer(payload.offer_id).await {
            Ok(Some(o)) if o.active => o,
            Ok(_) => return Err("offer inactive"),
            Err(e) => {
                warn!(error = %e, "offer lookup failed during pre-checkout");
                return Err("store unavailable");
            }
        };
        if q.total_amount != offer.price || q.currency != self.settings.currency {
            return Err("amount mismatch");
        }
        Ok(())
    }

    pub(super) async fn on_payment(&self, p: PaymentSucceeded) -> Result<()> {
        let payload: InvoicePayload = p.payload.parse()?;
        let user = p.from.user_id;
        let _guard = self.locks.lock_user(user).await;
        self.store.get_or_create_session(user, &p.from.profile).await?;

        let offer = self
            .store
            .offer(payload.offer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("offer {}", payload.offer_id.0)))?;
        self.confirm_payment(user, &offer, &p.charge_id, p.total_amount, &p.currency)
            .await
    }

    /// `/testpay`: simulate a successful charge for the selected offer.
    pub(super) async fn test_payment(&self, session: Session) -> Result<()> {
        let user = session.user_id;
        let Some(offer_id) = session.offer_id else {
            self.reply(user, texts::SELECT_TOPIC_FIRST).await?;
            return Ok(());
        };
        let offer = self
            .store
            .offer(offer_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("offer {}", offer_id.0)))?;
        let currency = self.settings.currency.clone();
        self.confirm_payment(user, &offer, TEST_CHARGE_ID, offer.price, &currency)
            .await
    }

    /// Record the charge, then grant the content slot. The payment row is written
    /// before any state change so a charge is never lost. Caller holds the user lock.
    async fn confirm_payment(
        &self,
        user: UserId,
        offer: &Offer,
        charge_id: &str,
        amount: i64,
        currency: &str,
    ) -> Result<()> {
        self.store
            .record_payment(NewPayment {
                user_id: user,
                offer_id: offer.id,
                charge_id: charge_id.to_string(),
                amount,
                currency: currency.to_string(),
                created_at: self.clock.now(),
            })
            .await?;
        self.audit
            .record(AuditEvent::payment(user, offer.id, amount, currency, charge_id));

        for attempt in 1..=CONFIRM_ATTEMPTS {
            let session = self
                .store
                .session(user)
                .await?
                .ok_or_else(|| Error::NotFound(format!("session {}", user.0)))?;
            let next = match session.apply(Trigger::PaymentConfirmed(offer.id), self.clock.now()) {
                Ok(next) => next,
                Err(TransitionError::Banned) => {
                    warn!(user_id = user.0, charge_id, "payment from banned user recorded");
                    return Ok(());
                }
                Err(e) => return Err(Error::Validation(e.to_string())),
            };
            if self.commit(&session, &next).await? {
                self.pending.discard(user, self.messenger.as_ref()).await;
                info!(user_id = user.0, offer_id = offer.id.0, amount, "payment confirmed");
                self.reply(user, &texts::payment_success(offer.max_photos))
                    .await?;
                return Ok(());
            }
            warn!(user_id = user.0, attempt, "session moved while confirming payment");
        }
        Err(Error::Store(format!(
            "could not confirm payment {charge_id} for user {}",
            user.0
        )))
    }
}
