//! Invoice side: turn each booked ticket into one invoice and submit it to the ERP
//!
//! The ticket is upserted by id and at most one invoice exists per ticket.
//! The ERP submission is tracked on the invoice, so a redelivery after an
//! ERP failure retries the submission without creating a second invoice.

use crate::contracts::BookingCreatedEvent;
use crate::error::{EventError, Result};
use crate::event::IntegrationEvent;
use crate::registry::MessageHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Tax rate applied to every invoice, in percent
pub const TAX_PERCENT: f64 = 10.0;

/// Invoice's copy of a booked ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub site_name: String,
    pub plate_number: String,
    pub phone_number: String,
    pub booking_from: DateTime<Utc>,
    pub booking_to: DateTime<Utc>,
    pub total_price: f64,
}

impl From<&BookingCreatedEvent> for Ticket {
    fn from(event: &BookingCreatedEvent) -> Self {
        Self {
            id: event.ticket_id(),
            site_name: event.site_name().to_string(),
            plate_number: event.plate_number().to_string(),
            phone_number: event.phone_number().to_string(),
            booking_from: event.booking_from(),
            booking_to: event.booking_to(),
            total_price: event.total_price(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: Uuid,
    pub ticket_id: Uuid,
    /// Tax rate in percent
    pub tax_amount: f64,
    pub total_amount_before_tax: f64,
    pub total_amount_after_tax: f64,
    /// Nine-digit, zero-padded
    pub ticket_serial_number: String,
    pub erp_submitted: bool,
}

impl Invoice {
    /// New, not yet submitted invoice for a ticket
    pub fn for_ticket(ticket: &Ticket) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id: ticket.id,
            tax_amount: TAX_PERCENT,
            total_amount_before_tax: amount_before_tax(ticket.total_price, TAX_PERCENT),
            total_amount_after_tax: ticket.total_price,
            ticket_serial_number: generate_serial(),
            erp_submitted: false,
        }
    }
}

/// `total - total * tax_percent / 100`
pub fn amount_before_tax(total: f64, tax_percent: f64) -> f64 {
    total - (tax_percent / 100.0) * total
}

/// Whole hours between two instants, truncated toward zero
pub fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_hours()
}

/// Random nine-digit serial, zero-padded
pub fn generate_serial() -> String {
    format!("{:09}", Uuid::new_v4().as_u128() % 1_000_000_000)
}

/// Invoice payload sent to the ERP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpInvoice {
    pub invoice_id: Uuid,
    pub ticket_id: Uuid,
    pub ticket_serial: String,
    pub booking_from: DateTime<Utc>,
    pub booking_to: DateTime<Utc>,
    pub num_of_hours: i64,
    pub plate_number: String,
    pub total_amount_before_tax: f64,
    pub total_amount_after_tax: f64,
}

impl ErpInvoice {
    pub fn new(invoice: &Invoice, ticket: &Ticket) -> Self {
        Self {
            invoice_id: invoice.id,
            ticket_id: invoice.ticket_id,
            ticket_serial: invoice.ticket_serial_number.clone(),
            booking_from: ticket.booking_from,
            booking_to: ticket.booking_to,
            num_of_hours: hours_between(ticket.booking_from, ticket.booking_to),
            plate_number: ticket.plate_number.clone(),
            total_amount_before_tax: amount_before_tax(ticket.total_price, invoice.tax_amount),
            total_amount_after_tax: ticket.total_price,
        }
    }
}

/// Client for the external ERP
#[async_trait]
pub trait ErpGateway: Send + Sync {
    async fn submit(&self, invoice: &ErpInvoice) -> Result<()>;
}

/// Invoice service's tickets and invoices
#[async_trait]
pub trait InvoiceLedger: Send + Sync {
    /// Insert or replace a ticket by id
    async fn upsert_ticket(&self, ticket: Ticket) -> Result<()>;

    async fn ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>>;

    async fn invoice_for_ticket(&self, ticket_id: Uuid) -> Result<Option<Invoice>>;

    /// Insert a new invoice; fails if the ticket already has one
    async fn insert_invoice(&self, invoice: Invoice) -> Result<()>;

    async fn mark_submitted(&self, invoice_id: Uuid) -> Result<()>;
}

#[derive(Debug, Default)]
struct LedgerState {
    tickets: HashMap<Uuid, Ticket>,
    /// Keyed by ticket id
    invoices: HashMap<Uuid, Invoice>,
}

#[derive(Debug, Default)]
pub struct MemoryInvoiceLedger {
    state: RwLock<LedgerState>,
}

impl MemoryInvoiceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All invoices, in no particular order
    pub async fn invoices(&self) -> Vec<Invoice> {
        self.state.read().await.invoices.values().cloned().collect()
    }

    pub async fn ticket_count(&self) -> usize {
        self.state.read().await.tickets.len()
    }
}

#[async_trait]
impl InvoiceLedger for MemoryInvoiceLedger {
    async fn upsert_ticket(&self, ticket: Ticket) -> Result<()> {
        self.state.write().await.tickets.insert(ticket.id, ticket);
        Ok(())
    }

    async fn ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>> {
        Ok(self.state.read().await.tickets.get(&ticket_id).cloned())
    }

    async fn invoice_for_ticket(&self, ticket_id: Uuid) -> Result<Option<Invoice>> {
        Ok(self.state.read().await.invoices.get(&ticket_id).cloned())
    }

    async fn insert_invoice(&self, invoice: Invoice) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.tickets.contains_key(&invoice.ticket_id) {
            return Err(EventError::NotFound(format!("ticket {}", invoice.ticket_id)));
        }
        if state.invoices.contains_key(&invoice.ticket_id) {
            return Err(EventError::Store(format!(
                "ticket {} already has an invoice",
                invoice.ticket_id
            )));
        }
        state.invoices.insert(invoice.ticket_id, invoice);
        Ok(())
    }

    async fn mark_submitted(&self, invoice_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let invoice = state
            .invoices
            .values_mut()
            .find(|i| i.id == invoice_id)
            .ok_or_else(|| EventError::NotFound(format!("invoice {}", invoice_id)))?;
        invoice.erp_submitted = true;
        Ok(())
    }
}

/// Records submissions instead of calling a real ERP
#[derive(Debug, Default)]
pub struct MemoryErpGateway {
    submitted: Mutex<Vec<ErpInvoice>>,
    failures: AtomicUsize,
}

impl MemoryErpGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` submissions fail
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<ErpInvoice> {
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ErpGateway for MemoryErpGateway {
    async fn submit(&self, invoice: &ErpInvoice) -> Result<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EventError::Provider("ERP unavailable".to_string()));
        }
        self.submitted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(invoice.clone());
        Ok(())
    }
}

/// Applies `BookingCreatedEvent`: ticket, invoice, ERP submission
pub struct InvoiceOnBookingHandler<L: ?Sized, G: ?Sized> {
    ledger: Arc<L>,
    erp: Arc<G>,
}

impl<L, G> InvoiceOnBookingHandler<L, G>
where
    L: InvoiceLedger + ?Sized,
    G: ErpGateway + ?Sized,
{
    pub fn new(ledger: Arc<L>, erp: Arc<G>) -> Self {
        Self { ledger, erp }
    }
}

#[async_trait]
impl<L, G> MessageHandler<BookingCreatedEvent> for InvoiceOnBookingHandler<L, G>
where
    L: InvoiceLedger + ?Sized,
    G: ErpGateway + ?Sized,
{
    async fn handle(&self, event: BookingCreatedEvent, cancel: CancellationToken) -> Result<()> {
        let ticket = Ticket::from(&event);
        self.ledger.upsert_ticket(ticket.clone()).await?;

        let invoice = match self.ledger.invoice_for_ticket(ticket.id).await? {
            Some(existing) => existing,
            None => {
                let invoice = Invoice::for_ticket(&ticket);
                self.ledger.insert_invoice(invoice.clone()).await?;
                tracing::info!(
                    ticket_id = %ticket.id,
                    invoice_id = %invoice.id,
                    serial = %invoice.ticket_serial_number,
                    site_name = %ticket.site_name,
                    "Invoice created"
                );
                invoice
            }
        };

        if invoice.erp_submitted {
            tracing::debug!(
                ticket_id = %ticket.id,
                event_id = %event.event_id(),
                "Invoice already submitted to ERP"
            );
            return Ok(());
        }

        if cancel.is_cancelled() {
            return Err(EventError::handler(
                BookingCreatedEvent::EVENT_TYPE,
                "cancelled before ERP submission",
            ));
        }

        self.erp
            .submit(&ErpInvoice::new(&invoice, &ticket))
            .await
            .map_err(|e| {
                EventError::handler(
                    BookingCreatedEvent::EVENT_TYPE,
                    format!("ERP submission failed: {}", e),
                )
            })?;
        self.ledger.mark_submitted(invoice.id).await?;

        tracing::info!(invoice_id = %invoice.id, ticket_id = %ticket.id, "Invoice submitted to ERP");
        Ok(())
    }
}
