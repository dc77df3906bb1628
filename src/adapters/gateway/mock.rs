//! Scripted payment gateway for tests.
//!
//! Lets tests choose what the gateway reports for charges and status
//! queries, and counts calls so properties like "no charge intent after
//! a terminal state" are observable.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::foundation::{CycleId, SubscriptionId};
use crate::ports::{ChargeOutcome, GatewayError, PaymentGateway};

#[derive(Debug, Clone)]
enum Scripted {
    Succeed,
    Fail(String),
    Pending,
}

impl Scripted {
    fn outcome(&self) -> ChargeOutcome {
        match self {
            Scripted::Succeed => ChargeOutcome::Succeeded,
            Scripted::Fail(reason) => ChargeOutcome::Failed {
                reason: reason.clone(),
            },
            Scripted::Pending => ChargeOutcome::Pending,
        }
    }
}

/// Scripted gateway.
pub struct MockPaymentGateway {
    charge: Mutex<Scripted>,
    query: Mutex<Scripted>,
    query_not_found: AtomicBool,
    transient_query_failures: AtomicU32,
    charge_calls: AtomicU32,
    query_calls: AtomicU32,
    refund_calls: AtomicU32,
}

impl MockPaymentGateway {
    fn with(charge: Scripted, query: Scripted) -> Self {
        Self {
            charge: Mutex::new(charge),
            query: Mutex::new(query),
            query_not_found: AtomicBool::new(false),
            transient_query_failures: AtomicU32::new(0),
            charge_calls: AtomicU32::new(0),
            query_calls: AtomicU32::new(0),
            refund_calls: AtomicU32::new(0),
        }
    }

    /// Every charge and query settles successfully.
    pub fn succeeding() -> Self {
        Self::with(Scripted::Succeed, Scripted::Succeed)
    }

    /// Every charge and query reports a failed charge.
    pub fn failing(reason: &str) -> Self {
        Self::with(Scripted::Fail(reason.to_string()), Scripted::Fail(reason.to_string()))
    }

    /// Every charge and query reports the charge as still pending.
    pub fn pending() -> Self {
        Self::with(Scripted::Pending, Scripted::Pending)
    }

    /// Status queries report the charge as unknown to the gateway;
    /// charges succeed. Models a charge that never left the process.
    pub fn not_found_then_succeeding() -> Self {
        let gateway = Self::with(Scripted::Succeed, Scripted::Succeed);
        gateway.query_not_found.store(true, Ordering::SeqCst);
        gateway
    }

    /// The first `failures` status queries fail transiently, then queries
    /// succeed.
    pub fn flaky_then_succeeding(failures: u32) -> Self {
        let gateway = Self::with(Scripted::Succeed, Scripted::Succeed);
        gateway
            .transient_query_failures
            .store(failures, Ordering::SeqCst);
        gateway
    }

    /// Change what subsequent charges report.
    pub fn set_charge_succeeds(&self) {
        *self.charge.lock().unwrap() = Scripted::Succeed;
        *self.query.lock().unwrap() = Scripted::Succeed;
    }

    /// Change what subsequent charges report.
    pub fn set_charge_fails(&self, reason: &str) {
        *self.charge.lock().unwrap() = Scripted::Fail(reason.to_string());
        *self.query.lock().unwrap() = Scripted::Fail(reason.to_string());
    }

    /// Change what subsequent charges report.
    pub fn set_charge_pending(&self) {
        *self.charge.lock().unwrap() = Scripted::Pending;
    }

    /// Change what subsequent status queries report, independent of
    /// charges.
    pub fn set_query_succeeds(&self) {
        *self.query.lock().unwrap() = Scripted::Succeed;
        self.query_not_found.store(false, Ordering::SeqCst);
    }

    /// Charges issued so far.
    pub fn charge_calls(&self) -> u32 {
        self.charge_calls.load(Ordering::SeqCst)
    }

    /// Status queries issued so far.
    pub fn query_calls(&self) -> u32 {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Refunds issued so far.
    pub fn refund_calls(&self) -> u32 {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(
        &self,
        _subscription_id: &SubscriptionId,
        _cycle_id: &CycleId,
    ) -> Result<ChargeOutcome, GatewayError> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.charge.lock().unwrap().outcome())
    }

    async fn query_status(&self, _cycle_id: &CycleId) -> Result<ChargeOutcome, GatewayError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.transient_query_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_query_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::network("simulated transient failure"));
        }

        if self.query_not_found.load(Ordering::SeqCst) {
            return Err(GatewayError::not_found("charge"));
        }

        Ok(self.query.lock().unwrap().outcome())
    }

    async fn refund(
        &self,
        _subscription_id: &SubscriptionId,
        _cycle_id: &CycleId,
    ) -> Result<(), GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
