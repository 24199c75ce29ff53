use crate::{
    db::is_unique_violation,
    entities::{checkout_session, order, order::OrderStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayError, PaymentGateway, SessionFacts},
    money,
    notifications::{NotificationError, Notifier},
    services::cart::clear_lines,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const MAX_SESSION_ID_LEN: usize = 255;
const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// What the gateway says about a session, as a value rather than an error.
#[derive(Debug)]
pub enum SessionOutcome {
    Paid(SessionFacts),
    Incomplete(SessionFacts),
    NotFound,
    GatewayFailure(GatewayError),
}

impl SessionOutcome {
    pub fn classify(result: Result<Option<SessionFacts>, GatewayError>) -> Self {
        match result {
            Ok(Some(facts)) if facts.paid => SessionOutcome::Paid(facts),
            Ok(Some(facts)) => SessionOutcome::Incomplete(facts),
            Ok(None) => SessionOutcome::NotFound,
            Err(e) => SessionOutcome::GatewayFailure(e),
        }
    }
}

/// Result of a confirmation request.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    /// A PAID order was written by this call.
    Confirmed { order: order::Model, notified: bool },
    /// The session already had a PAID order; nothing was done.
    Replayed { order: order::Model },
    /// The gateway reported the session unpaid; the order is recorded as FAILED.
    PaymentIncomplete { order: order::Model },
}

impl ConfirmationOutcome {
    pub fn order(&self) -> &order::Model {
        match self {
            ConfirmationOutcome::Confirmed { order, .. }
            | ConfirmationOutcome::Replayed { order }
            | ConfirmationOutcome::PaymentIncomplete { order } => order,
        }
    }

    /// Whether the customer has been sent a confirmation for this order.
    pub fn notified(&self) -> bool {
        match self {
            ConfirmationOutcome::Confirmed { notified, .. } => *notified,
            ConfirmationOutcome::Replayed { order } => order.notified_at.is_some(),
            ConfirmationOutcome::PaymentIncomplete { .. } => false,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, ConfirmationOutcome::Replayed { .. })
    }

    /// Maps the unpaid outcome to `ServiceError::PaymentIncomplete` for callers that
    /// answer with an error status.
    pub fn into_result(self) -> Result<Self, ServiceError> {
        match self {
            ConfirmationOutcome::PaymentIncomplete { order } => {
                Err(ServiceError::PaymentIncomplete(order.session_id))
            }
            other => Ok(other),
        }
    }
}

/// Rejects ids that could not have come from the gateway.
pub fn validate_session_id(session_id: &str) -> Result<(), ServiceError> {
    let well_formed = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if well_formed {
        Ok(())
    } else {
        Err(ServiceError::ValidationError(
            "sessionId is missing or malformed".to_string(),
        ))
    }
}

/// Materializes orders from gateway payment facts, at most once per session.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    event_sender: Arc<EventSender>,
    notify_timeout: Duration,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            notifier,
            event_sender,
            notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
        }
    }

    /// Caps how long a confirmation waits on notification delivery.
    pub fn with_notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    /// Confirms the payment session and creates its order.
    ///
    /// Repeated or concurrent calls for the same session produce a single order;
    /// later calls observe it as a replay. A gateway failure leaves no trace and
    /// can be retried. Notification failures are reported in the outcome and
    /// never undo the order.
    #[instrument(skip(self))]
    pub async fn confirm_order(
        &self,
        session_id: &str,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        validate_session_id(session_id)?;

        if let Some(existing) = self.find_by_session(session_id).await? {
            return replay(existing);
        }

        let session = checkout_session::Entity::find_by_id(session_id.to_string())
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Checkout session {} not found", session_id))
            })?;

        match SessionOutcome::classify(self.gateway.get_session(session_id).await) {
            SessionOutcome::NotFound => Err(ServiceError::NotFound(format!(
                "Checkout session {} not found at the payment gateway",
                session_id
            ))),
            SessionOutcome::GatewayFailure(e) => {
                warn!(session_id, error = %e, "could not fetch session from gateway");
                Err(e.into())
            }
            SessionOutcome::Incomplete(facts) => self.record_failed(&session, &facts).await,
            SessionOutcome::Paid(facts) => self.record_paid(&session, &facts).await,
        }
    }

    /// Stored order for a session.
    #[instrument(skip(self))]
    pub async fn get_order(&self, session_id: &str) -> Result<order::Model, ServiceError> {
        validate_session_id(session_id)?;
        self.find_by_session(session_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No order for session {}", session_id)))
    }

    async fn find_by_session(&self, session_id: &str) -> Result<Option<order::Model>, ServiceError> {
        let found = order::Entity::find()
            .filter(order::Column::SessionId.eq(session_id))
            .one(&*self.db)
            .await?;
        Ok(found.map(normalized))
    }

    async fn record_failed(
        &self,
        session: &checkout_session::Model,
        facts: &SessionFacts,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let txn = self.db.begin().await?;
        let inserted = new_order(session, facts, OrderStatus::Failed).insert(&txn).await;

        let order = match inserted {
            Ok(order) => {
                txn.commit().await?;
                normalized(order)
            }
            Err(e) if is_unique_violation(&e) => {
                txn.rollback().await?;
                return self.concurrent_winner(&session.session_id).await;
            }
            Err(e) => return Err(e.into()),
        };

        self.event_sender
            .send_or_log(Event::OrderPaymentFailed {
                order_id: order.id,
                session_id: order.session_id.clone(),
            })
            .await;

        info!(
            "Recorded FAILED order {} for unpaid session {}",
            order.id, order.session_id
        );
        Ok(ConfirmationOutcome::PaymentIncomplete { order })
    }

    async fn record_paid(
        &self,
        session: &checkout_session::Model,
        facts: &SessionFacts,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        if facts.amount_total_minor != session.amount_total_minor {
            warn!(
                session_id = %session.session_id,
                gateway_total = facts.amount_total_minor,
                snapshot_total = session.amount_total_minor,
                "gateway total differs from checkout snapshot"
            );
        }

        // The unique index on orders.session_id is the only serialization point here
        let txn = self.db.begin().await?;
        let inserted = new_order(session, facts, OrderStatus::Paid).insert(&txn).await;

        let order = match inserted {
            Ok(order) => order,
            Err(e) if is_unique_violation(&e) => {
                txn.rollback().await?;
                return self.concurrent_winner(&session.session_id).await;
            }
            Err(e) => return Err(e.into()),
        };

        let cleared = clear_lines(&txn, &session.cart_id).await?;
        txn.commit().await?;

        let order = normalized(order);
        info!(
            "Confirmed order {} for session {} (total {}, cleared {} cart lines)",
            order.id, order.session_id, order.total_amount, cleared
        );

        self.event_sender
            .send_or_log(Event::OrderConfirmed {
                order_id: order.id,
                session_id: order.session_id.clone(),
                total_amount: order.total_amount,
            })
            .await;
        self.event_sender
            .send_or_log(Event::CartCleared {
                cart_id: session.cart_id.clone(),
            })
            .await;

        let (order, notified) = self.notify(order).await;
        Ok(ConfirmationOutcome::Confirmed { order, notified })
    }

    /// Lost the insert race: the other writer's order is the answer.
    async fn concurrent_winner(&self, session_id: &str) -> Result<ConfirmationOutcome, ServiceError> {
        info!(session_id, "order already confirmed by a concurrent call");
        let existing = self.find_by_session(session_id).await?.ok_or_else(|| {
            ServiceError::InternalError(format!(
                "unique violation on session {} but no order found",
                session_id
            ))
        })?;
        replay(existing)
    }

    /// Best-effort delivery after commit, bounded by `notify_timeout`.
    /// Returns the order with `notified_at` set on success.
    async fn notify(&self, mut order: order::Model) -> (order::Model, bool) {
        let delivery = match order.customer_email.as_deref() {
            Some(email) => {
                let send = self.notifier.send(email, order.id, order.total_amount);
                tokio::time::timeout(self.notify_timeout, send)
                    .await
                    .unwrap_or_else(|_| Err(NotificationError::TimedOut(self.notify_timeout)))
            }
            None => Err(NotificationError::InvalidRecipient(
                "gateway reported no customer email".to_string(),
            )),
        };

        match delivery {
            Ok(()) => {
                let now = Utc::now();
                let marked = order::Entity::update_many()
                    .col_expr(order::Column::NotifiedAt, Expr::value(now))
                    .filter(order::Column::Id.eq(order.id))
                    .exec(&*self.db)
                    .await;
                if let Err(e) = marked {
                    warn!(order_id = %order.id, error = %e, "confirmation sent but not recorded");
                }
                order.notified_at = Some(now);
                (order, true)
            }
            Err(e) => {
                error!(order_id = %order.id, error = %e, "order confirmation not delivered");
                self.event_sender
                    .send_or_log(Event::NotificationFailed {
                        order_id: order.id,
                        reason: e.to_string(),
                    })
                    .await;
                (order, false)
            }
        }
    }
}

fn replay(existing: order::Model) -> Result<ConfirmationOutcome, ServiceError> {
    match existing.status {
        OrderStatus::Paid => Ok(ConfirmationOutcome::Replayed { order: existing }),
        OrderStatus::Failed => Ok(ConfirmationOutcome::PaymentIncomplete { order: existing }),
        OrderStatus::Pending => Err(ServiceError::Conflict(format!(
            "Order for session {} is still pending",
            existing.session_id
        ))),
    }
}

fn new_order(
    session: &checkout_session::Model,
    facts: &SessionFacts,
    status: OrderStatus,
) -> order::ActiveModel {
    order::ActiveModel {
        id: Set(Uuid::new_v4()),
        session_id: Set(session.session_id.clone()),
        cart_id: Set(Some(session.cart_id.clone())),
        customer_email: Set(facts.customer_email.clone()),
        total_amount: Set(money::from_minor_units(facts.amount_total_minor)),
        currency: Set(session.currency.clone()),
        status: Set(status),
        items: Set(session.line_snapshot.clone()),
        notified_at: Set(None),
        created_at: Set(Utc::now()),
    }
}

fn normalized(mut order: order::Model) -> order::Model {
    order.total_amount = money::normalize(order.total_amount);
    order
}
